//! The language transpilation step is assumed provided externally (§1, §6):
//! converts a source string + language tag into an executable module source.
//! Called once per `Execute` before enqueue; on a non-empty diagnostic of
//! severity `error`, `Execute` fails without touching the pool.

use crate::domain::job::Language;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct TranspileOutput {
    pub code: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl TranspileOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == DiagnosticSeverity::Error)
    }
}

#[async_trait]
pub trait Transpiler: Send + Sync {
    async fn transpile(&self, source: &str, language: Language) -> TranspileOutput;
}

/// Identity transpiler for `js` sources where no transform is needed; useful
/// as a default and in tests. `ts` sources always require a real transpiler.
pub struct PassthroughTranspiler;

#[async_trait]
impl Transpiler for PassthroughTranspiler {
    async fn transpile(&self, source: &str, _language: Language) -> TranspileOutput {
        TranspileOutput { code: source.to_string(), diagnostics: Vec::new() }
    }
}
