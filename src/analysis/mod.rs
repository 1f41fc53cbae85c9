pub mod error;
pub mod lint;

use crate::engine::registry::ComponentRegistry;
use crate::parser::ast::PageSchema;

use error::{Diagnostic, DiagnosticLevel};
use lint::run_lints;

pub struct AnalysisResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisResult {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn count(&self, level: DiagnosticLevel) -> usize {
        self.diagnostics.iter().filter(|d| d.level == level).count()
    }
}

/// スキーマを静的解析する。診断は描画を止めない
pub fn analyze_schema(schema: &PageSchema, registry: &dyn ComponentRegistry) -> AnalysisResult {
    AnalysisResult {
        diagnostics: run_lints(schema, registry),
    }
}
