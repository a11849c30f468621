use std::path::Path;
use std::sync::Arc;

use fieldreport_domain::ports::BoxFuture;
use fieldreport_domain::ports::channels::{ChannelError, ContentFormat, RenderedContent};
use fieldreport_infra::telegram::{InlineButton, TelegramClient};

const BUTTONS_PER_ROW: usize = 2;

/// A menu entry: what the user sees and the payload sent back on tap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyOption {
    pub label: String,
    pub payload: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub content: RenderedContent,
    pub options: Vec<ReplyOption>,
}

impl Reply {
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            content: RenderedContent::html(body),
            options: Vec::new(),
        }
    }

    pub fn plain(body: impl Into<String>) -> Self {
        Self {
            content: RenderedContent::plain(body),
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<ReplyOption>) -> Self {
        self.options = options;
        self
    }
}

/// The bot's side of a private chat: replies with optional menus, file
/// uploads, and acknowledging menu taps.
pub trait Conversation: Send + Sync {
    fn reply(&self, chat_id: &str, reply: &Reply) -> BoxFuture<'_, Result<(), ChannelError>>;

    fn send_document(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
    ) -> BoxFuture<'_, Result<(), ChannelError>>;

    fn acknowledge_selection(&self, callback_id: &str) -> BoxFuture<'_, Result<(), ChannelError>>;
}

#[derive(Clone)]
pub struct TelegramConversation {
    client: Arc<TelegramClient>,
}

impl TelegramConversation {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

fn keyboard(options: &[ReplyOption]) -> Vec<Vec<InlineButton>> {
    options
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            row.iter()
                .map(|option| InlineButton::new(&option.label, &option.payload))
                .collect()
        })
        .collect()
}

impl Conversation for TelegramConversation {
    fn reply(&self, chat_id: &str, reply: &Reply) -> BoxFuture<'_, Result<(), ChannelError>> {
        let chat_id = chat_id.to_string();
        let reply = reply.clone();
        Box::pin(async move {
            let parse_mode = match reply.content.format {
                ContentFormat::Html => Some("HTML"),
                ContentFormat::Plain => None,
            };
            let rows = keyboard(&reply.options);
            self.client
                .send_message(&chat_id, &reply.content.body, parse_mode, Some(rows.as_slice()))
                .await?;
            Ok(())
        })
    }

    fn send_document(
        &self,
        chat_id: &str,
        path: &Path,
        caption: &str,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        let chat_id = chat_id.to_string();
        let path = path.to_path_buf();
        let caption = caption.to_string();
        Box::pin(async move {
            self.client.send_document(&chat_id, &path, &caption).await?;
            Ok(())
        })
    }

    fn acknowledge_selection(&self, callback_id: &str) -> BoxFuture<'_, Result<(), ChannelError>> {
        let callback_id = callback_id.to_string();
        Box::pin(async move {
            self.client.answer_callback_query(&callback_id).await?;
            Ok(())
        })
    }
}
