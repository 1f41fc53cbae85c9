#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    /// コンポーネントIDのパス（"list/item" 形式）やデータソースID
    pub location: Option<String>,
}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

impl Diagnostic {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, msg)
    }
    pub fn warning(msg: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, msg)
    }
    pub fn info(msg: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, msg)
    }
    fn new(level: DiagnosticLevel, msg: impl Into<String>) -> Self {
        Self {
            level,
            message: msg.into(),
            location: None,
        }
    }
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }
}
