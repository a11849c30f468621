use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;

use super::handler::{EventHandler, InboundEvent};
use crate::observability;

const QUEUE_CAPACITY: usize = 32;

type Workers = Arc<Mutex<HashMap<String, mpsc::Sender<InboundEvent>>>>;

/// Routes events to one worker task per user. A user's events are handled
/// strictly in arrival order; different users run concurrently. Idle
/// workers exit and are respawned by the next event.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<EventHandler>,
    workers: Workers,
    idle_timeout: Duration,
}

impl Dispatcher {
    pub fn new(handler: Arc<EventHandler>, idle_timeout: Duration) -> Self {
        Self {
            handler,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    pub async fn active_workers(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Never waits on a user's queue, so one slow user cannot hold up the
    /// poll loop. Events beyond the queue capacity are dropped.
    pub async fn dispatch(&self, event: InboundEvent) {
        let mut workers = self.workers.lock().await;
        let event = match workers.get(&event.user_id) {
            Some(sender) => match sender.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(dropped)) => {
                    observability::register_dropped_event();
                    tracing::warn!(
                        user_id = %dropped.user_id,
                        capacity = QUEUE_CAPACITY,
                        "user queue is full; dropping event"
                    );
                    return;
                }
                Err(TrySendError::Closed(returned)) => {
                    workers.remove(&returned.user_id);
                    returned
                }
            },
            None => event,
        };

        let sender = self.spawn_worker(&mut workers, &event.user_id);
        if let Err(err) = sender.try_send(event) {
            tracing::warn!(error = %err, "fresh user worker refused an event");
        }
    }

    fn spawn_worker(
        &self,
        workers: &mut HashMap<String, mpsc::Sender<InboundEvent>>,
        user_id: &str,
    ) -> mpsc::Sender<InboundEvent> {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        workers.insert(user_id.to_string(), sender.clone());
        observability::set_active_workers(workers.len());

        let worker = Worker {
            user_id: user_id.to_string(),
            handler: self.handler.clone(),
            workers: self.workers.clone(),
            sender: sender.clone(),
            idle_timeout: self.idle_timeout,
        };
        tokio::spawn(worker.run(receiver));
        sender
    }
}

struct Worker {
    user_id: String,
    handler: Arc<EventHandler>,
    workers: Workers,
    sender: mpsc::Sender<InboundEvent>,
    idle_timeout: Duration,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<InboundEvent>) {
        tracing::debug!(user_id = %self.user_id, "user worker started");
        loop {
            match tokio::time::timeout(self.idle_timeout, receiver.recv()).await {
                Ok(Some(event)) => self.handler.handle(event).await,
                Ok(None) => break,
                Err(_) => {
                    // Sends happen under the registry lock, so an empty queue
                    // seen here stays empty once the entry is gone.
                    let mut workers = self.workers.lock().await;
                    if !receiver.is_empty() {
                        continue;
                    }
                    if workers
                        .get(&self.user_id)
                        .is_some_and(|sender| sender.same_channel(&self.sender))
                    {
                        workers.remove(&self.user_id);
                    }
                    observability::set_active_workers(workers.len());
                    receiver.close();
                    break;
                }
            }
        }
        while let Ok(event) = receiver.try_recv() {
            self.handler.handle(event).await;
        }
        tracing::debug!(user_id = %self.user_id, "user worker stopped");
    }
}
