use log::{error, info};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type ReloadCallback = Arc<Mutex<Option<Box<dyn Fn() + Send + 'static>>>>;

pub struct HotReloader {
    _watcher: RecommendedWatcher,
    reload_callback: ReloadCallback,
}

impl HotReloader {
    /// スキーマファイルを監視するホットリローダーを作成
    pub fn new<P: AsRef<Path>>(schema_path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let schema_path = schema_path.as_ref();
        let file_name = schema_path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| format!("{} is not a file path", schema_path.display()))?;
        // エディタは一時ファイル経由で保存することがあるので親ディレクトリごと監視する
        let watch_dir = match schema_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let (tx, rx): (Sender<notify::Result<Event>>, Receiver<notify::Result<Event>>) = mpsc::channel();

        let config = Config::default().with_poll_interval(Duration::from_millis(100));

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                if let Err(e) = tx.send(res) {
                    error!("Error sending watch event: {}", e);
                }
            },
            config,
        )?;

        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        info!("🔥 Hot reload enabled for: {}", schema_path.display());

        let reload_callback: ReloadCallback = Arc::new(Mutex::new(None));

        // ファイル監視を別スレッドで開始
        let callback_clone = Arc::clone(&reload_callback);
        thread::spawn(move || {
            loop {
                match rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(Ok(event)) => {
                        if should_reload(&event, &file_name) {
                            info!("🔄 Schema changed, reloading...");

                            // 少し待ってからリロード（ファイル書き込みが完了するのを待つ）
                            thread::sleep(Duration::from_millis(100));
                            // 保存1回で複数イベントが来るのでまとめて捨てる
                            while rx.try_recv().is_ok() {}

                            if let Ok(callback_guard) = callback_clone.lock() {
                                if let Some(ref cb) = *callback_guard {
                                    cb();
                                }
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Watch error: {:?}", e);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        // タイムアウトは正常、続行
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        error!("Watcher disconnected");
                        break;
                    }
                }
            }
        });

        Ok(HotReloader {
            _watcher: watcher,
            reload_callback,
        })
    }

    /// リロード時のコールバック関数を設定
    pub fn set_reload_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + 'static,
    {
        match self.reload_callback.lock() {
            Ok(mut cb) => *cb = Some(Box::new(callback)),
            Err(e) => error!("Failed to set reload callback: {}", e),
        }
    }
}

/// ファイル変更イベントがリロードをトリガーすべきかを判断
fn should_reload(event: &Event, file_name: &OsString) -> bool {
    use notify::EventKind;

    match event.kind {
        EventKind::Modify(_) | EventKind::Create(_) => {
            // 監視対象のスキーマファイルの変更のみ
            event
                .paths
                .iter()
                .any(|path| path.file_name().map(|name| name == file_name.as_os_str()).unwrap_or(false))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::EventKind;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_should_reload_only_for_schema_file() {
        let name = OsString::from("page.json");
        assert!(should_reload(&event(EventKind::Modify(ModifyKind::Any), "/site/page.json"), &name));
        assert!(should_reload(&event(EventKind::Create(CreateKind::File), "/site/page.json"), &name));
        assert!(!should_reload(&event(EventKind::Modify(ModifyKind::Any), "/site/other.json"), &name));
        assert!(!should_reload(&event(EventKind::Remove(RemoveKind::File), "/site/page.json"), &name));
    }
}
