//! Interface-only collaborators the kernel core consumes but does not
//! implement (§1, §6): persistence, auth, and transpilation.

pub mod auth;
pub mod store;
pub mod transpiler;

pub use auth::{Auth, Role};
pub use store::{InMemoryNotebookStore, NotebookRecord, NotebookStore};
pub use transpiler::{Diagnostic, DiagnosticSeverity, PassthroughTranspiler, Transpiler, TranspileOutput};
