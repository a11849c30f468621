use thiserror::Error;

use super::BoxFuture;
use crate::DomainResult;
use crate::report::{Report, ReportDraft};

#[allow(clippy::needless_pass_by_value)]
pub trait ReportRepository: Send + Sync {
    /// Materializes the draft into an immutable report with a fresh id and
    /// appends it to the user's sequence.
    fn append(&self, draft: &ReportDraft) -> BoxFuture<'_, DomainResult<Report>>;

    fn list_for_user(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Report>>>;

    /// All reports in append order.
    fn list_all(&self) -> BoxFuture<'_, DomainResult<Vec<Report>>>;
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror io error: {0}")]
    Io(String),
    #[error("mirror serialization error: {0}")]
    Serialization(String),
}

/// Durable per-user copy of the report ledger, used for crash recovery only.
pub trait ReportMirror: Send + Sync {
    fn write(&self, user_id: &str, reports: &[Report]) -> BoxFuture<'_, Result<(), MirrorError>>;

    fn load_all(&self) -> BoxFuture<'_, Result<Vec<Report>, MirrorError>>;
}
