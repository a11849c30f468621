use thiserror::Error;

use super::BoxFuture;
use crate::schema::FieldValue;
use crate::session::{Advance, Session};

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("no active session")]
    NotFound,
    #[error("session is at field {actual}, not {expected}")]
    Stale { expected: String, actual: String },
    #[error("session points at unknown field {0}")]
    UnknownField(String),
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Per-user conversational state. Every operation touches exactly one user's
/// entry; implementations must make `advance` atomic for that user.
pub trait SessionStore: Send + Sync {
    /// Creates or replaces the user's session at the schema's first field.
    fn begin(&self, user_id: &str) -> BoxFuture<'_, Result<Session, SessionError>>;

    fn get(&self, user_id: &str) -> BoxFuture<'_, Result<Option<Session>, SessionError>>;

    /// Records `value` under `expected_field` and moves to the next field.
    /// Fails with `Stale` when the session has already moved past it.
    fn advance(
        &self,
        user_id: &str,
        expected_field: &str,
        value: FieldValue,
    ) -> BoxFuture<'_, Result<Advance, SessionError>>;

    fn cancel(&self, user_id: &str) -> BoxFuture<'_, Result<bool, SessionError>>;

    fn purge_expired(&self) -> BoxFuture<'_, Result<usize, SessionError>>;
}
