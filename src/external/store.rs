//! `NotebookStore` / `UserStore` — persistence of notebook documents,
//! attachments, users, sessions-on-disk, and invitations is explicitly out
//! of scope (§1); the kernel core only needs to resolve a notebook id when a
//! session is created. Interface-only.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct NotebookRecord {
    pub id: String,
    pub owner_id: String,
}

#[async_trait]
pub trait NotebookStore: Send + Sync {
    async fn get_notebook(&self, id: &str) -> Option<NotebookRecord>;
    async fn save_notebook(&self, record: NotebookRecord);
}

/// Permissive stand-in that resolves any notebook id on first access,
/// creating it with an unknown owner. Not a real persistence layer; a
/// deployment wires in its own `NotebookStore` backed by the actual
/// notebook database (§1). Useful for bringing the kernel server up
/// without that dependency.
#[derive(Default)]
pub struct InMemoryNotebookStore {
    notebooks: Mutex<HashMap<String, NotebookRecord>>,
}

impl InMemoryNotebookStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotebookStore for InMemoryNotebookStore {
    async fn get_notebook(&self, id: &str) -> Option<NotebookRecord> {
        let mut notebooks = self.notebooks.lock().expect("notebook store mutex poisoned");
        Some(notebooks.entry(id.to_string()).or_insert_with(|| NotebookRecord { id: id.to_string(), owner_id: "unknown".to_string() }).clone())
    }

    async fn save_notebook(&self, record: NotebookRecord) {
        self.notebooks.lock().expect("notebook store mutex poisoned").insert(record.id.clone(), record);
    }
}
