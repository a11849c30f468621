pub mod commands;
pub mod conversation;
pub mod dispatch;
pub mod handler;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use fieldreport_domain::collection::CollectionMachine;
use fieldreport_domain::distribution::{AdminMailbox, BroadcastTarget, DistributionPipeline};
use fieldreport_domain::ports::sessions::SessionStore;
use fieldreport_infra::mail::MailRelayChannel;
use fieldreport_infra::telegram::{TelegramChannel, TelegramClient, TelegramError, Update};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use self::conversation::TelegramConversation;
use self::dispatch::Dispatcher;
use self::handler::{EventHandler, InboundEvent};
use crate::observability;
use crate::state::AppState;

const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_BACKOFF_BASE: Duration = Duration::from_secs(1);
const POLL_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Long-polls Telegram and feeds every update through the per-user
/// dispatcher. Also sweeps idle sessions on an interval.
pub struct BotRuntime {
    client: Arc<TelegramClient>,
    dispatcher: Dispatcher,
    sessions: Arc<dyn SessionStore>,
    sweep_interval: Duration,
}

impl BotRuntime {
    pub fn from_state(state: &AppState) -> Result<Self, TelegramError> {
        let config = &state.config;
        let client = Arc::new(TelegramClient::from_config(config)?);
        let channel = Arc::new(TelegramChannel::new(client.clone()));

        let mut pipeline = DistributionPipeline::new(
            state.schema.clone(),
            state.repository.clone(),
            channel.clone(),
            state.exporter.clone(),
        );
        match MailRelayChannel::from_config(config) {
            Some((mail, address)) => {
                pipeline = pipeline.with_admin_mail(AdminMailbox {
                    channel: Arc::new(mail),
                    address,
                });
            }
            None => tracing::info!("admin mail is not configured; skipping that channel"),
        }
        match config.broadcast_channel() {
            Some(destination) => {
                pipeline = pipeline.with_broadcast(BroadcastTarget {
                    channel: channel.clone(),
                    destination: destination.to_string(),
                });
            }
            None => tracing::info!("broadcast channel is not configured; skipping that channel"),
        }

        let machine = CollectionMachine::new(state.schema.clone(), state.sessions.clone());
        let handler = EventHandler::new(
            machine,
            pipeline,
            state.reports.clone(),
            state.exporter.clone(),
            Arc::new(TelegramConversation::new(client.clone())),
        );

        Ok(Self {
            client,
            dispatcher: Dispatcher::new(Arc::new(handler), WORKER_IDLE_TIMEOUT),
            sessions: state.sessions.clone(),
            sweep_interval: config.session_sweep_interval(),
        })
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let sweeper = tokio::spawn(sweep_sessions(
            self.sessions.clone(),
            self.sweep_interval,
            shutdown.clone(),
        ));
        tracing::info!("bot runtime started");

        let mut offset: Option<i64> = None;
        let mut failures: u32 = 0;
        loop {
            let updates = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.client.get_updates(offset) => result,
            };

            match updates {
                Ok(updates) => {
                    failures = 0;
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        match inbound_event(&update) {
                            Some(event) => {
                                observability::register_bot_update(event_kind(&event));
                                self.dispatcher.dispatch(event).await;
                            }
                            None => observability::register_bot_update("ignored"),
                        }
                    }
                }
                Err(err) => {
                    observability::register_bot_poll_error();
                    let delay = backoff_for_attempt(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(error = %err, delay_ms = delay.as_millis() as u64, "polling telegram failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        sweeper.abort();
        let active_workers = self.dispatcher.active_workers().await;
        tracing::info!(
            active_workers = active_workers,
            "bot runtime stopped"
        );
    }
}

async fn sweep_sessions(
    sessions: Arc<dyn SessionStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        match sessions.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => {
                observability::register_expired_sessions(purged);
                tracing::info!(purged, "expired idle report sessions");
            }
            Err(err) => tracing::warn!(error = %err, "session sweep failed"),
        }
    }
}

/// Text messages and menu taps from a user; everything else is ignored.
pub fn inbound_event(update: &Update) -> Option<InboundEvent> {
    if let Some(message) = &update.message {
        let text = message.text.as_deref()?;
        let user_id = message
            .from
            .as_ref()
            .map(|user| user.id)
            .unwrap_or(message.chat.id);
        return Some(InboundEvent::text(
            user_id.to_string(),
            message.chat.id.to_string(),
            text,
        ));
    }

    let callback = update.callback_query.as_ref()?;
    let data = callback.data.as_deref()?;
    let chat_id = callback
        .message
        .as_ref()
        .map(|message| message.chat.id)
        .unwrap_or(callback.from.id);
    Some(InboundEvent::selection(
        callback.from.id.to_string(),
        chat_id.to_string(),
        data,
        callback.id.clone(),
    ))
}

fn event_kind(event: &InboundEvent) -> &'static str {
    if event.callback_id.is_some() {
        "selection"
    } else {
        "text"
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let multiplier = 1u32 << attempt.min(5);
    (POLL_BACKOFF_BASE * multiplier).min(POLL_BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use fieldreport_domain::collection::InputModality;
    use fieldreport_infra::telegram::{CallbackQuery, Chat, Message, User};

    use super::*;

    fn user(id: i64) -> User {
        User {
            id,
            first_name: "Ivan".to_string(),
            username: None,
        }
    }

    #[test]
    fn messages_become_text_events() {
        let update = Update {
            update_id: 1,
            message: Some(Message {
                message_id: 10,
                chat: Chat { id: 500 },
                from: Some(user(42)),
                text: Some("Acme".to_string()),
            }),
            callback_query: None,
        };
        let event = inbound_event(&update).expect("event");
        assert_eq!(event, InboundEvent::text("42", "500", "Acme"));
    }

    #[test]
    fn callbacks_become_selections_in_the_originating_chat() {
        let update = Update {
            update_id: 2,
            message: None,
            callback_query: Some(CallbackQuery {
                id: "cb-9".to_string(),
                from: user(42),
                message: Some(Message {
                    message_id: 11,
                    chat: Chat { id: 500 },
                    from: None,
                    text: Some("Step 1/16".to_string()),
                }),
                data: Some("customer_type:subscriber".to_string()),
            }),
        };
        let event = inbound_event(&update).expect("event");
        assert_eq!(event.modality, InputModality::Selection);
        assert_eq!(event.chat_id, "500");
        assert_eq!(event.callback_id.as_deref(), Some("cb-9"));
        assert_eq!(event.payload, "customer_type:subscriber");
    }

    #[test]
    fn non_text_updates_are_ignored() {
        let update = Update {
            update_id: 3,
            message: Some(Message {
                message_id: 12,
                chat: Chat { id: 500 },
                from: Some(user(42)),
                text: None,
            }),
            callback_query: None,
        };
        assert_eq!(inbound_event(&update), None);
    }

    #[test]
    fn poll_backoff_is_capped() {
        assert_eq!(backoff_for_attempt(0), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(8));
        assert_eq!(backoff_for_attempt(20), Duration::from_secs(30));
    }
}
