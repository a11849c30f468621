use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::DomainError;
use crate::ports::channels::{ArtifactExporter, OutboundChannel, RenderedContent};
use crate::ports::reports::ReportRepository;
use crate::render::{render_acknowledgement, render_admin_mail, render_broadcast};
use crate::report::{Report, ReportDraft, ReportId};
use crate::schema::FieldSchema;

pub const CHANNEL_ACKNOWLEDGEMENT: &str = "acknowledgement";
pub const CHANNEL_ADMIN_MAIL: &str = "admin_mail";
pub const CHANNEL_ARTIFACT: &str = "artifact";
pub const CHANNEL_BROADCAST: &str = "broadcast";

pub const ADMIN_MAIL_NOTICE: &str = "The report was sent to the administrator mailbox.";
pub const ARTIFACT_CAPTION: &str = "Your report as a spreadsheet";
pub const ARTIFACT_WARNING: &str = "Could not generate the spreadsheet file.";
pub const BROADCAST_NOTICE: &str = "The report was published to the channel.";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Succeeded,
    Failed(String),
    /// The channel is not configured.
    Skipped,
}

impl ChannelOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistributionOutcome {
    pub report_id: ReportId,
    pub per_channel: BTreeMap<String, ChannelOutcome>,
}

impl DistributionOutcome {
    fn new(report_id: ReportId) -> Self {
        Self {
            report_id,
            per_channel: BTreeMap::new(),
        }
    }

    fn record(&mut self, channel: &str, outcome: ChannelOutcome) {
        self.per_channel.insert(channel.to_string(), outcome);
    }

    pub fn channel(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.per_channel.get(channel)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.per_channel
            .iter()
            .filter_map(|(channel, outcome)| match outcome {
                ChannelOutcome::Failed(reason) => Some((channel.as_str(), reason.as_str())),
                _ => None,
            })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Distributed {
    pub report: Report,
    pub outcome: DistributionOutcome,
}

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("report could not be persisted: {0}")]
    Persistence(#[source] DomainError),
}

#[derive(Clone)]
pub struct AdminMailbox {
    pub channel: Arc<dyn OutboundChannel>,
    pub address: String,
}

#[derive(Clone)]
pub struct BroadcastTarget {
    pub channel: Arc<dyn OutboundChannel>,
    pub destination: String,
}

/// Persists a completed report, then fans it out to each delivery channel.
/// Persistence must succeed before any channel is tried; after that every
/// channel fails on its own without affecting the others.
#[derive(Clone)]
pub struct DistributionPipeline {
    schema: Arc<FieldSchema>,
    repository: Arc<dyn ReportRepository>,
    conversation: Arc<dyn OutboundChannel>,
    exporter: Arc<dyn ArtifactExporter>,
    admin_mail: Option<AdminMailbox>,
    broadcast: Option<BroadcastTarget>,
}

impl DistributionPipeline {
    pub fn new(
        schema: Arc<FieldSchema>,
        repository: Arc<dyn ReportRepository>,
        conversation: Arc<dyn OutboundChannel>,
        exporter: Arc<dyn ArtifactExporter>,
    ) -> Self {
        Self {
            schema,
            repository,
            conversation,
            exporter,
            admin_mail: None,
            broadcast: None,
        }
    }

    pub fn with_admin_mail(mut self, mailbox: AdminMailbox) -> Self {
        self.admin_mail = Some(mailbox);
        self
    }

    pub fn with_broadcast(mut self, target: BroadcastTarget) -> Self {
        self.broadcast = Some(target);
        self
    }

    pub async fn distribute(
        &self,
        draft: &ReportDraft,
        chat_id: &str,
    ) -> Result<Distributed, DistributionError> {
        let report = self.repository.append(draft).await.map_err(|err| {
            warn!(user_id = %draft.user_id, error = %err, "report persistence failed");
            DistributionError::Persistence(err)
        })?;
        info!(report_id = %report.id, user_id = %report.user_id, "report persisted");

        let mut outcome = DistributionOutcome::new(report.id);
        outcome.record(
            CHANNEL_ACKNOWLEDGEMENT,
            self.acknowledge(&report, chat_id).await,
        );
        outcome.record(CHANNEL_ADMIN_MAIL, self.notify_admin(&report, chat_id).await);
        outcome.record(CHANNEL_ARTIFACT, self.deliver_artifact(&report, chat_id).await);
        outcome.record(CHANNEL_BROADCAST, self.broadcast(&report, chat_id).await);

        for (channel, reason) in outcome.failures() {
            warn!(report_id = %report.id, channel, reason, "channel delivery failed");
        }
        info!(report_id = %report.id, "report distribution finished");

        Ok(Distributed { report, outcome })
    }

    async fn acknowledge(&self, report: &Report, chat_id: &str) -> ChannelOutcome {
        let content = render_acknowledgement(&self.schema, report);
        match self.conversation.send(chat_id, &content).await {
            Ok(()) => ChannelOutcome::Succeeded,
            Err(err) => ChannelOutcome::Failed(err.to_string()),
        }
    }

    async fn notify_admin(&self, report: &Report, chat_id: &str) -> ChannelOutcome {
        let Some(mailbox) = &self.admin_mail else {
            return ChannelOutcome::Skipped;
        };
        let content = render_admin_mail(&self.schema, report);
        match mailbox.channel.send(&mailbox.address, &content).await {
            Ok(()) => {
                self.notice(chat_id, ADMIN_MAIL_NOTICE).await;
                ChannelOutcome::Succeeded
            }
            Err(err) => ChannelOutcome::Failed(err.to_string()),
        }
    }

    async fn deliver_artifact(&self, report: &Report, chat_id: &str) -> ChannelOutcome {
        let path = match self.exporter.generate(report).await {
            Ok(path) => path,
            Err(err) => {
                self.notice(chat_id, ARTIFACT_WARNING).await;
                return ChannelOutcome::Failed(err.to_string());
            }
        };

        let delivery = self
            .conversation
            .send_document(chat_id, &path, ARTIFACT_CAPTION)
            .await;
        if let Err(err) = self.exporter.release(&path).await {
            warn!(path = %path.display(), error = %err, "failed to release artifact");
        }

        match delivery {
            Ok(()) => ChannelOutcome::Succeeded,
            Err(err) => {
                self.notice(chat_id, ARTIFACT_WARNING).await;
                ChannelOutcome::Failed(err.to_string())
            }
        }
    }

    async fn broadcast(&self, report: &Report, chat_id: &str) -> ChannelOutcome {
        let Some(target) = &self.broadcast else {
            return ChannelOutcome::Skipped;
        };
        let content = render_broadcast(&self.schema, report);
        match target.channel.send(&target.destination, &content).await {
            Ok(()) => {
                self.notice(chat_id, BROADCAST_NOTICE).await;
                ChannelOutcome::Succeeded
            }
            Err(err) => ChannelOutcome::Failed(err.to_string()),
        }
    }

    async fn notice(&self, chat_id: &str, text: &str) {
        if let Err(err) = self
            .conversation
            .send(chat_id, &RenderedContent::plain(text))
            .await
        {
            warn!(chat_id, error = %err, "failed to send notice");
        }
    }
}
