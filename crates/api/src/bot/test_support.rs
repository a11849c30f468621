use std::path::Path;
use std::sync::Arc;

use fieldreport_domain::DomainResult;
use fieldreport_domain::collection::CollectionMachine;
use fieldreport_domain::distribution::DistributionPipeline;
use fieldreport_domain::error::DomainError;
use fieldreport_domain::ports::BoxFuture;
use fieldreport_domain::ports::channels::{
    ArtifactExporter, ChannelError, OutboundChannel, RenderedContent,
};
use fieldreport_domain::ports::reports::ReportRepository;
use fieldreport_domain::report::{Report, ReportDraft, ReportService};
use fieldreport_domain::schema::{FieldSchema, NumericBounds, work_report_schema};
use fieldreport_domain::session::{InMemorySessionStore, SessionConfig};
use fieldreport_infra::export::CsvReportExporter;
use tokio::sync::{Mutex, Notify};

use super::conversation::{Conversation, Reply};
use super::handler::{EventHandler, InboundEvent};

#[derive(Default)]
pub(crate) struct RecordingConversation {
    pub replies: Mutex<Vec<(String, Reply)>>,
    pub documents: Mutex<Vec<(String, String)>>,
    pub acknowledged: Mutex<Vec<String>>,
    /// Replies to this chat wait for `release` before being recorded.
    pub blocked_chat: Option<String>,
    pub release: Notify,
}

impl RecordingConversation {
    pub async fn texts(&self) -> Vec<String> {
        self.replies
            .lock()
            .await
            .iter()
            .map(|(_, reply)| reply.content.body.clone())
            .collect()
    }
}

impl Conversation for RecordingConversation {
    fn reply(&self, chat_id: &str, reply: &Reply) -> BoxFuture<'_, Result<(), ChannelError>> {
        let entry = (chat_id.to_string(), reply.clone());
        Box::pin(async move {
            if self.blocked_chat.as_deref() == Some(entry.0.as_str()) {
                self.release.notified().await;
            }
            self.replies.lock().await.push(entry);
            Ok(())
        })
    }

    fn send_document(
        &self,
        chat_id: &str,
        path: &Path,
        _caption: &str,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        let chat_id = chat_id.to_string();
        let path = path.to_path_buf();
        Box::pin(async move {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| ChannelError::Transport(err.to_string()))?;
            self.documents.lock().await.push((chat_id, contents));
            Ok(())
        })
    }

    fn acknowledge_selection(
        &self,
        callback_id: &str,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        let callback_id = callback_id.to_string();
        Box::pin(async move {
            self.acknowledged.lock().await.push(callback_id);
            Ok(())
        })
    }
}

/// Pipeline-side channel; records message bodies only.
#[derive(Default)]
pub(crate) struct RecordingChannel {
    pub sent: Mutex<Vec<String>>,
}

impl OutboundChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(
        &self,
        _destination: &str,
        content: &RenderedContent,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        let body = content.body.clone();
        Box::pin(async move {
            self.sent.lock().await.push(body);
            Ok(())
        })
    }
}

pub(crate) struct FailingRepository;

impl ReportRepository for FailingRepository {
    fn append(&self, _draft: &ReportDraft) -> BoxFuture<'_, DomainResult<Report>> {
        Box::pin(async { Err(DomainError::Unavailable("disk full".to_string())) })
    }

    fn list_for_user(&self, _user_id: &str) -> BoxFuture<'_, DomainResult<Vec<Report>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn list_all(&self) -> BoxFuture<'_, DomainResult<Vec<Report>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

pub(crate) struct Fixture {
    pub handler: EventHandler,
    pub conversation: Arc<RecordingConversation>,
    pub channel: Arc<RecordingChannel>,
    pub repository: Arc<dyn ReportRepository>,
    pub dir: tempfile::TempDir,
}

pub(crate) fn fixture(repository: Arc<dyn ReportRepository>) -> Fixture {
    fixture_with_conversation(repository, RecordingConversation::default())
}

pub(crate) fn fixture_with_conversation(
    repository: Arc<dyn ReportRepository>,
    conversation: RecordingConversation,
) -> Fixture {
    let schema: Arc<FieldSchema> =
        Arc::new(work_report_schema(NumericBounds::default()).expect("schema"));
    let dir = tempfile::tempdir().expect("tempdir");
    let exporter: Arc<dyn ArtifactExporter> =
        Arc::new(CsvReportExporter::new(dir.path(), schema.clone()));
    let conversation = Arc::new(conversation);
    let channel = Arc::new(RecordingChannel::default());
    let sessions = Arc::new(InMemorySessionStore::new(
        schema.clone(),
        SessionConfig::default(),
    ));
    let machine = CollectionMachine::new(schema.clone(), sessions);
    let pipeline = DistributionPipeline::new(
        schema.clone(),
        repository.clone(),
        channel.clone(),
        exporter.clone(),
    );
    let reports = ReportService::new(repository.clone(), schema);
    let handler = EventHandler::new(
        machine,
        pipeline,
        reports,
        exporter,
        conversation.clone(),
    );
    Fixture {
        handler,
        conversation,
        channel,
        repository,
        dir,
    }
}

pub(crate) const ANSWERS: &[&str] = &[
    "Acme",
    "Main st 1",
    "+7 900 000-00-00",
    "Ivan Petrov",
    "01.02.2024",
    "2",
    "10.5",
    "3",
    "0",
    "1",
    "0",
    "yes",
    "4.25",
    "1",
    "none",
];

pub(crate) async fn submit_report(handler: &EventHandler, user_id: &str) {
    handler
        .handle(InboundEvent::text(user_id, user_id, "/new_report"))
        .await;
    handler
        .handle(InboundEvent::selection(
            user_id,
            user_id,
            "customer_type:subscriber",
            "cb-1",
        ))
        .await;
    for answer in ANSWERS {
        handler
            .handle(InboundEvent::text(user_id, user_id, *answer))
            .await;
    }
}
