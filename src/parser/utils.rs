// ========================================
// ユーティリティ関数モジュール
// ========================================
//
// このモジュールは文字列処理、イベント名の変換などのヘルパー関数を提供します。

/// 文字列リテラルのクォート記号を除去する関数
pub fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    let unquoted = if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    process_escape_sequences(unquoted)
}

/// エスケープシーケンスを処理する関数
pub fn process_escape_sequences(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next_ch) = chars.next() {
                match next_ch {
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    'r' => result.push('\r'),
                    '\\' => result.push('\\'),
                    '"' => result.push('"'),
                    '\'' => result.push('\''),
                    _ => {
                        // 認識できないエスケープシーケンスはそのまま
                        result.push('\\');
                        result.push(next_ch);
                    }
                }
            } else {
                result.push('\\');
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// "onClick" -> "click"。既に正規化済みならそのまま
pub fn normalize_event_name(name: &str) -> String {
    let mut chars = name.chars();
    if name.len() > 2 && name.starts_with("on") {
        chars.nth(1);
        if let Some(first) = chars.next() {
            if first.is_ascii_uppercase() {
                let mut out = String::with_capacity(name.len() - 2);
                out.push(first.to_ascii_lowercase());
                out.extend(chars);
                return out;
            }
        }
    }
    name.to_string()
}

/// "click" -> "onClick"（ホスト側のプロパティ名）
pub fn event_prop_name(event: &str) -> String {
    if event.starts_with("on") && event.chars().nth(2).is_some_and(|c| c.is_ascii_uppercase()) {
        return event.to_string();
    }
    let mut chars = event.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(event.len() + 2);
            out.push_str("on");
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
            out
        }
        None => "on".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote_handles_both_quote_styles() {
        assert_eq!(unquote("'Ann'"), "Ann");
        assert_eq!(unquote("\"Bo\""), "Bo");
        assert_eq!(unquote("'a\\'b'"), "a'b");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn test_event_names() {
        assert_eq!(normalize_event_name("onClick"), "click");
        assert_eq!(normalize_event_name("click"), "click");
        assert_eq!(normalize_event_name("once"), "once");
        assert_eq!(normalize_event_name("onValueChange"), "valueChange");

        assert_eq!(event_prop_name("click"), "onClick");
        assert_eq!(event_prop_name("valueChange"), "onValueChange");
        assert_eq!(event_prop_name("onSubmit"), "onSubmit");
    }
}
