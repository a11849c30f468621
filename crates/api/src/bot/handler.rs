use std::sync::Arc;

use fieldreport_domain::collection::{
    CollectionEvent, CollectionMachine, Effect, InputModality, Prompt, UserInput,
};
use fieldreport_domain::distribution::{DistributionError, DistributionPipeline};
use fieldreport_domain::ports::channels::ArtifactExporter;
use fieldreport_domain::render::{
    escape_html, render_aggregate, render_daily_summary, render_report_line,
};
use fieldreport_domain::report::ReportService;
use fieldreport_domain::util::{now_ms, utc_date_of_ms};

use super::commands::{Command, HELP_TEXT, WELCOME_TEXT};
use super::conversation::{Conversation, Reply, ReplyOption};
use crate::observability;

const RECENT_REPORTS: usize = 5;

pub const SUBMISSION_FAILED: &str =
    "The report could not be saved. Nothing was sent; please try again later.";
pub const CANCELLED: &str = "Report cancelled. Send /new_report to start again.";
pub const NO_ACTIVE_SESSION: &str =
    "There is no report in progress. Send /new_report to start one.";
pub const UNKNOWN_COMMAND: &str = "Unknown command. Send /help for the list of commands.";
pub const TEMPORARY_FAILURE: &str = "Something went wrong, please try again.";
pub const NO_REPORTS: &str = "You have not submitted any reports yet.";
const EXPORT_CAPTION: &str = "Your reports";

/// One inbound user interaction, already stripped of transport details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: String,
    pub chat_id: String,
    pub modality: InputModality,
    pub payload: String,
    /// Set for menu taps that must be acknowledged.
    pub callback_id: Option<String>,
}

impl InboundEvent {
    pub fn text(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            modality: InputModality::Text,
            payload: payload.into(),
            callback_id: None,
        }
    }

    pub fn selection(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        payload: impl Into<String>,
        callback_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            modality: InputModality::Selection,
            payload: payload.into(),
            callback_id: Some(callback_id.into()),
        }
    }
}

/// Handles one event for one user: command routing, the collection state
/// machine, and executing the resulting effects.
pub struct EventHandler {
    machine: CollectionMachine,
    pipeline: DistributionPipeline,
    reports: ReportService,
    exporter: Arc<dyn ArtifactExporter>,
    conversation: Arc<dyn Conversation>,
}

impl EventHandler {
    pub fn new(
        machine: CollectionMachine,
        pipeline: DistributionPipeline,
        reports: ReportService,
        exporter: Arc<dyn ArtifactExporter>,
        conversation: Arc<dyn Conversation>,
    ) -> Self {
        Self {
            machine,
            pipeline,
            reports,
            exporter,
            conversation,
        }
    }

    pub async fn handle(&self, event: InboundEvent) {
        if let Some(callback_id) = &event.callback_id {
            if let Err(err) = self.conversation.acknowledge_selection(callback_id).await {
                tracing::debug!(error = %err, "failed to acknowledge selection");
            }
        }

        if event.modality == InputModality::Text && Command::is_command_like(&event.payload) {
            match Command::parse(&event.payload) {
                Some(command) => self.run_command(&event, command).await,
                None => self.reply(&event.chat_id, Reply::plain(UNKNOWN_COMMAND)).await,
            }
            return;
        }

        let input = UserInput {
            modality: event.modality,
            payload: event.payload.clone(),
        };
        self.collect(&event, CollectionEvent::Input(input)).await;
    }

    async fn run_command(&self, event: &InboundEvent, command: Command) {
        tracing::debug!(user_id = %event.user_id, ?command, "command received");
        match command {
            Command::Start => self.reply(&event.chat_id, Reply::plain(WELCOME_TEXT)).await,
            Command::Help => self.reply(&event.chat_id, Reply::html(HELP_TEXT)).await,
            Command::NewReport => self.collect(event, CollectionEvent::Start).await,
            Command::Cancel => {
                let input = UserInput::text("/cancel");
                self.collect(event, CollectionEvent::Input(input)).await;
            }
            Command::MyReports => self.recent_reports(event).await,
            Command::Stats => self.stats(event).await,
            Command::DailySummary => self.daily_summary(event).await,
            Command::Export => self.export(event).await,
        }
    }

    async fn collect(&self, event: &InboundEvent, collection_event: CollectionEvent) {
        let effects = match self.machine.handle(&event.user_id, collection_event).await {
            Ok(effects) => effects,
            Err(err) => {
                tracing::warn!(user_id = %event.user_id, error = %err, "session store failed");
                self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                    .await;
                return;
            }
        };
        for effect in effects {
            self.execute(event, effect).await;
        }
    }

    async fn execute(&self, event: &InboundEvent, effect: Effect) {
        match effect {
            Effect::Prompt(prompt) => self.reply(&event.chat_id, prompt_reply(&prompt)).await,
            Effect::Rejected { field, message } => {
                tracing::debug!(user_id = %event.user_id, field, "input rejected");
                self.reply(
                    &event.chat_id,
                    Reply::plain(format!("Invalid value. {message}")),
                )
                .await;
            }
            Effect::Cancelled => self.reply(&event.chat_id, Reply::plain(CANCELLED)).await,
            Effect::NoActiveSession => {
                self.reply(&event.chat_id, Reply::plain(NO_ACTIVE_SESSION))
                    .await
            }
            Effect::Submit(draft) => match self.pipeline.distribute(&draft, &event.chat_id).await {
                Ok(distributed) => {
                    observability::register_submission("accepted");
                    observability::register_distribution(&distributed.outcome);
                }
                Err(DistributionError::Persistence(err)) => {
                    observability::register_submission("persistence_failed");
                    tracing::error!(user_id = %event.user_id, error = %err, "report submission lost");
                    self.reply(&event.chat_id, Reply::plain(SUBMISSION_FAILED))
                        .await;
                }
            },
        }
    }

    async fn recent_reports(&self, event: &InboundEvent) {
        let reports = match self.reports.list_for_user(&event.user_id).await {
            Ok(reports) => reports,
            Err(err) => {
                tracing::warn!(user_id = %event.user_id, error = %err, "listing reports failed");
                self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                    .await;
                return;
            }
        };
        if reports.is_empty() {
            self.reply(&event.chat_id, Reply::plain(NO_REPORTS)).await;
            return;
        }
        let mut lines = vec![format!(
            "<b>Your reports</b> ({} total)\n",
            reports.len()
        )];
        lines.extend(
            reports
                .iter()
                .rev()
                .take(RECENT_REPORTS)
                .map(|report| render_report_line(self.reports.schema(), report)),
        );
        self.reply(&event.chat_id, Reply::html(lines.join("\n")))
            .await;
    }

    async fn stats(&self, event: &InboundEvent) {
        match self.reports.aggregate().await {
            Ok(aggregate) => {
                let content = render_aggregate(self.reports.schema(), &aggregate);
                self.reply(&event.chat_id, Reply::html(content.body)).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "aggregate failed");
                self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                    .await;
            }
        }
    }

    async fn daily_summary(&self, event: &InboundEvent) {
        let Some(today) = utc_date_of_ms(now_ms()) else {
            self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                .await;
            return;
        };
        match self.reports.aggregate_on_day(today).await {
            Ok(aggregate) => {
                let content = render_daily_summary(self.reports.schema(), today, &aggregate);
                self.reply(&event.chat_id, Reply::html(content.body)).await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "daily aggregate failed");
                self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                    .await;
            }
        }
    }

    async fn export(&self, event: &InboundEvent) {
        let reports = match self.reports.list_for_user(&event.user_id).await {
            Ok(reports) if reports.is_empty() => {
                self.reply(&event.chat_id, Reply::plain(NO_REPORTS)).await;
                return;
            }
            Ok(reports) => reports,
            Err(err) => {
                tracing::warn!(user_id = %event.user_id, error = %err, "listing reports failed");
                self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                    .await;
                return;
            }
        };

        let path = match self.exporter.generate_many(&reports, &event.user_id).await {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(user_id = %event.user_id, error = %err, "export failed");
                self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                    .await;
                return;
            }
        };
        let sent = self
            .conversation
            .send_document(&event.chat_id, &path, EXPORT_CAPTION)
            .await;
        if let Err(err) = self.exporter.release(&path).await {
            tracing::warn!(path = %path.display(), error = %err, "failed to release export");
        }
        if let Err(err) = sent {
            tracing::warn!(user_id = %event.user_id, error = %err, "export upload failed");
            self.reply(&event.chat_id, Reply::plain(TEMPORARY_FAILURE))
                .await;
        }
    }

    async fn reply(&self, chat_id: &str, reply: Reply) {
        if let Err(err) = self.conversation.reply(chat_id, &reply).await {
            tracing::warn!(chat_id, error = %err, "reply delivery failed");
        }
    }
}

fn prompt_reply(prompt: &Prompt) -> Reply {
    let options = prompt
        .options
        .iter()
        .map(|option| ReplyOption {
            label: option.label.clone(),
            payload: format!("{}:{}", prompt.field, option.value),
        })
        .collect();
    Reply::html(format!(
        "<b>Step {}/{}</b>\n{}",
        prompt.step,
        prompt.total,
        escape_html(&prompt.text)
    ))
    .with_options(options)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fieldreport_domain::ports::reports::ReportRepository;
    use fieldreport_infra::repositories::InMemoryReportRepository;

    use super::*;
    use crate::bot::test_support::{FailingRepository, fixture, submit_report};

    #[tokio::test]
    async fn full_conversation_persists_and_acknowledges() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        submit_report(&fixture.handler, "100").await;

        let reports = fixture.repository.list_for_user("100").await.expect("list");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].text("customer_type"), Some("subscriber"));
        assert_eq!(
            fixture.conversation.acknowledged.lock().await.as_slice(),
            ["cb-1".to_string()]
        );

        let sent = fixture.channel.sent.lock().await;
        assert!(sent[0].contains("saved"));
        assert!(sent[0].contains("Acme"));
    }

    #[tokio::test]
    async fn first_prompt_offers_the_customer_menu() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        fixture
            .handler
            .handle(InboundEvent::text("100", "100", "/new_report"))
            .await;

        let replies = fixture.conversation.replies.lock().await;
        let (chat_id, reply) = &replies[0];
        assert_eq!(chat_id, "100");
        assert!(reply.content.body.starts_with("<b>Step 1/16</b>"));
        let payloads: Vec<&str> = reply
            .options
            .iter()
            .map(|option| option.payload.as_str())
            .collect();
        assert_eq!(
            payloads,
            vec!["customer_type:subscriber", "customer_type:legal_entity"]
        );
    }

    #[tokio::test]
    async fn invalid_answer_is_explained_and_reprompted() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        let handler = &fixture.handler;
        handler
            .handle(InboundEvent::text("100", "100", "/new_report"))
            .await;
        handler
            .handle(InboundEvent::text("100", "100", "nobody"))
            .await;

        let texts = fixture.conversation.texts().await;
        assert!(texts[1].starts_with("Invalid value."));
        assert!(texts[2].starts_with("<b>Step 1/16</b>"));
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_to_the_user_only() {
        let fixture = fixture(Arc::new(FailingRepository));
        submit_report(&fixture.handler, "100").await;

        let texts = fixture.conversation.texts().await;
        assert_eq!(texts.last().map(String::as_str), Some(SUBMISSION_FAILED));
        assert!(fixture.channel.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_and_unknown_commands() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        let handler = &fixture.handler;
        handler
            .handle(InboundEvent::text("100", "100", "/cancel"))
            .await;
        handler
            .handle(InboundEvent::text("100", "100", "/new_report"))
            .await;
        handler
            .handle(InboundEvent::text("100", "100", "/cancel"))
            .await;
        handler
            .handle(InboundEvent::text("100", "100", "Acme"))
            .await;
        handler
            .handle(InboundEvent::text("100", "100", "/launch"))
            .await;

        let texts = fixture.conversation.texts().await;
        assert_eq!(texts[0], NO_ACTIVE_SESSION);
        assert_eq!(texts[2], CANCELLED);
        assert_eq!(texts[3], NO_ACTIVE_SESSION);
        assert_eq!(texts[4], UNKNOWN_COMMAND);
    }

    #[tokio::test]
    async fn my_reports_lists_newest_first() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        let handler = &fixture.handler;
        handler
            .handle(InboundEvent::text("100", "100", "/my_reports"))
            .await;
        submit_report(handler, "100").await;
        fixture.conversation.replies.lock().await.clear();

        handler
            .handle(InboundEvent::text("100", "100", "/my_reports"))
            .await;
        let texts = fixture.conversation.texts().await;
        assert!(texts[0].contains("(1 total)"));
        assert!(texts[0].contains("Acme"));
    }

    #[tokio::test]
    async fn export_sends_the_users_reports_and_cleans_up() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        let handler = &fixture.handler;
        handler
            .handle(InboundEvent::text("200", "200", "/export"))
            .await;
        assert_eq!(fixture.conversation.texts().await, vec![NO_REPORTS.to_string()]);

        submit_report(handler, "100").await;
        submit_report(handler, "200").await;
        handler
            .handle(InboundEvent::text("200", "200", "/export"))
            .await;

        let documents = fixture.conversation.documents.lock().await;
        assert_eq!(documents.len(), 1);
        let (chat_id, contents) = &documents[0];
        assert_eq!(chat_id, "200");
        assert_eq!(contents.lines().count(), 2);

        let leftovers = std::fs::read_dir(fixture.dir.path())
            .expect("read export dir")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn stats_reply_summarises_all_users() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        submit_report(&fixture.handler, "100").await;
        submit_report(&fixture.handler, "200").await;
        fixture.conversation.replies.lock().await.clear();

        fixture
            .handler
            .handle(InboundEvent::text("300", "300", "/stats"))
            .await;
        let texts = fixture.conversation.texts().await;
        assert!(texts[0].contains("Reports: <b>2</b>"));
        assert!(texts[0].contains("Users: <b>2</b>"));
    }

    #[tokio::test]
    async fn summary_reply_covers_todays_reports() {
        let fixture = fixture(Arc::new(InMemoryReportRepository::new()));
        submit_report(&fixture.handler, "100").await;
        fixture.conversation.replies.lock().await.clear();

        fixture
            .handler
            .handle(InboundEvent::text("100", "100", "/summary"))
            .await;
        let texts = fixture.conversation.texts().await;
        assert!(texts[0].starts_with("<b>Summary for "));
        assert!(texts[0].contains("Reports: <b>1</b>"));
    }
}
