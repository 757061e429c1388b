//! Authentication/authorization is assumed enforced upstream of session
//! creation (§1, §4.6); the Bridge performs no additional auth. Interface-only
//! so the HTTP layer (out of scope here) can be swapped without touching the
//! kernel core.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Viewer,
    Editor,
    Owner,
}

#[async_trait]
pub trait Auth: Send + Sync {
    async fn check_session_access(&self, user_id: &str, notebook_id: &str) -> Option<Role>;
}
