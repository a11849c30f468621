use std::time::Duration;

use fieldreport_domain::ports::BoxFuture;
use fieldreport_domain::ports::channels::{
    ChannelError, ContentFormat, OutboundChannel, RenderedContent,
};
use serde::Serialize;

use crate::config::AppConfig;

const DEFAULT_SUBJECT: &str = "Work report";

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

/// Admin mailbox delivered through an HTTP mail relay: one JSON POST per
/// message, bearer token when configured.
#[derive(Debug, Clone)]
pub struct MailRelayChannel {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl MailRelayChannel {
    pub fn new(endpoint: &str, token: Option<&str>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim().to_string(),
            token: token
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(str::to_string),
            timeout,
        }
    }

    /// `None` when the admin address or relay url is missing.
    pub fn from_config(config: &AppConfig) -> Option<(Self, String)> {
        let (address, endpoint) = config.admin_mail()?;
        Some((
            Self::new(
                endpoint,
                Some(&config.mail_relay_token),
                config.telegram_request_timeout(),
            ),
            address.to_string(),
        ))
    }
}

impl OutboundChannel for MailRelayChannel {
    fn name(&self) -> &'static str {
        "mail_relay"
    }

    fn send(
        &self,
        destination: &str,
        content: &RenderedContent,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        let destination = destination.to_string();
        let content = content.clone();
        Box::pin(async move {
            let (html, text) = match content.format {
                ContentFormat::Html => (Some(content.body.as_str()), None),
                ContentFormat::Plain => (None, Some(content.body.as_str())),
            };
            let message = RelayMessage {
                to: &destination,
                subject: content.subject.as_deref().unwrap_or(DEFAULT_SUBJECT),
                html,
                text,
            };

            let mut request = self
                .http
                .post(&self.endpoint)
                .timeout(self.timeout)
                .json(&message);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|err| ChannelError::Transport(err.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            let reason = format!("status {}: {}", status.as_u16(), body);
            if status.is_server_error() {
                Err(ChannelError::Transport(reason))
            } else {
                Err(ChannelError::Rejected(reason))
            }
        })
    }
}
