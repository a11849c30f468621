use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;
use crate::report::Report;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentFormat {
    Html,
    Plain,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: Option<String>,
    pub body: String,
    pub format: ContentFormat,
}

impl RenderedContent {
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            subject: None,
            body: body.into(),
            format: ContentFormat::Html,
        }
    }

    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            subject: None,
            body: body.into(),
            format: ContentFormat::Plain,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel transport failed: {0}")]
    Transport(String),
    #[error("channel rejected delivery: {0}")]
    Rejected(String),
    #[error("channel does not accept documents")]
    Unsupported,
}

/// A delivery target: the user's conversation, the admin mailbox, a public
/// broadcast channel. Transport timeouts are the adapter's concern.
pub trait OutboundChannel: Send + Sync {
    fn name(&self) -> &'static str;

    fn send(
        &self,
        destination: &str,
        content: &RenderedContent,
    ) -> BoxFuture<'_, Result<(), ChannelError>>;

    fn send_document(
        &self,
        _destination: &str,
        _path: &Path,
        _caption: &str,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async { Err(ChannelError::Unsupported) })
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export io error: {0}")]
    Io(String),
    #[error("export encoding error: {0}")]
    Encode(String),
    #[error("nothing to export")]
    Empty,
}

/// Produces temporary spreadsheet artifacts. Callers own the returned path
/// and must hand it back to `release` once delivery has been attempted.
pub trait ArtifactExporter: Send + Sync {
    fn generate(&self, report: &Report) -> BoxFuture<'_, Result<PathBuf, ExportError>>;

    fn generate_many(
        &self,
        reports: &[Report],
        label: &str,
    ) -> BoxFuture<'_, Result<PathBuf, ExportError>>;

    fn release(&self, path: &Path) -> BoxFuture<'_, Result<(), ExportError>>;
}
