use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fieldreport_domain::ports::BoxFuture;
use fieldreport_domain::ports::channels::{
    ChannelError, ContentFormat, OutboundChannel, RenderedContent,
};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::AppConfig;

const PARSE_MODE_HTML: &str = "HTML";
const ALLOWED_UPDATES: &[&str] = &["message", "callback_query"];

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram client configuration error: {0}")]
    Configuration(String),
    #[error("telegram transport error: {0}")]
    Transport(String),
    #[error("telegram api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("telegram response decode error: {0}")]
    InvalidResponse(String),
    #[error("telegram attachment error: {0}")]
    Attachment(String),
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Thin Bot API client. Every call is a POST to `<base>/bot<token>/<method>`.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout: Duration,
    request_timeout: Duration,
}

impl TelegramClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, TelegramError> {
        let token = config.telegram_bot_token.trim();
        if token.is_empty() {
            return Err(TelegramError::Configuration(
                "TELEGRAM_BOT_TOKEN is not set".to_string(),
            ));
        }
        Ok(Self::new(
            &config.telegram_api_base,
            token,
            Duration::from_secs(config.telegram_poll_timeout_secs),
            config.telegram_request_timeout(),
        ))
    }

    pub fn new(
        api_base: &str,
        token: &str,
        poll_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/bot{token}", api_base.trim_end_matches('/')),
            poll_timeout,
            request_timeout,
        }
    }

    /// Long-polls for updates after `offset`. Blocks up to the poll timeout
    /// when nothing is pending.
    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TelegramError> {
        let mut payload = json!({
            "timeout": self.poll_timeout.as_secs(),
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        self.call("getUpdates", &payload, self.poll_timeout + self.request_timeout)
            .await
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        parse_mode: Option<&str>,
        keyboard: Option<&[Vec<InlineButton>]>,
    ) -> Result<Message, TelegramError> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(parse_mode) = parse_mode {
            payload["parse_mode"] = json!(parse_mode);
        }
        if let Some(rows) = keyboard.filter(|rows| !rows.is_empty()) {
            payload["reply_markup"] = json!({ "inline_keyboard": rows });
        }
        self.call("sendMessage", &payload, self.request_timeout).await
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<bool, TelegramError> {
        let payload = json!({ "callback_query_id": callback_id });
        self.call("answerCallbackQuery", &payload, self.request_timeout)
            .await
    }

    pub async fn send_document(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
    ) -> Result<Message, TelegramError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| TelegramError::Attachment(format!("{}: {err}", path.display())))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("report.csv")
            .to_string();
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("text/csv")
            .map_err(|err| TelegramError::Attachment(err.to_string()))?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", part);

        let response = self
            .http
            .post(self.endpoint("sendDocument"))
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|err| TelegramError::Transport(err.to_string()))?;
        Self::decode(response).await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<T, TelegramError> {
        let response = self
            .http
            .post(self.endpoint(method))
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|err| TelegramError::Transport(err.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TelegramError> {
        let status = response.status();
        let body = response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|err| TelegramError::InvalidResponse(err.to_string()))?;
        if !body.ok {
            return Err(TelegramError::Api {
                code: body.error_code.unwrap_or(i64::from(status.as_u16())),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result.ok_or_else(|| {
            TelegramError::InvalidResponse("response is missing the result field".to_string())
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }
}

impl From<TelegramError> for ChannelError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Api { .. } => ChannelError::Rejected(err.to_string()),
            other => ChannelError::Transport(other.to_string()),
        }
    }
}

/// Delivers rendered content to a chat or a public channel id.
#[derive(Clone)]
pub struct TelegramChannel {
    client: Arc<TelegramClient>,
}

impl TelegramChannel {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

impl OutboundChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send(
        &self,
        destination: &str,
        content: &RenderedContent,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        let destination = destination.to_string();
        let content = content.clone();
        Box::pin(async move {
            let parse_mode = match content.format {
                ContentFormat::Html => Some(PARSE_MODE_HTML),
                ContentFormat::Plain => None,
            };
            self.client
                .send_message(&destination, &content.body, parse_mode, None)
                .await?;
            Ok(())
        })
    }

    fn send_document(
        &self,
        destination: &str,
        path: &Path,
        caption: &str,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        let destination = destination.to_string();
        let path = path.to_path_buf();
        let caption = caption.to_string();
        Box::pin(async move {
            self.client
                .send_document(&destination, &path, &caption)
                .await?;
            Ok(())
        })
    }
}
