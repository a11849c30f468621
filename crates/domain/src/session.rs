use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ports::BoxFuture;
use crate::ports::sessions::{SessionError, SessionStore};
use crate::report::ReportDraft;
use crate::schema::{FieldSchema, FieldValue, Next};
use crate::util::now_ms;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub user_id: String,
    pub current_field: String,
    pub collected: BTreeMap<String, FieldValue>,
    pub started_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Advance {
    Next(Session),
    Completed(ReportDraft),
}

impl Session {
    pub fn begin(schema: &FieldSchema, user_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            user_id: user_id.into(),
            current_field: schema.first().key.clone(),
            collected: BTreeMap::new(),
            started_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Records an already validated value for the current field and moves to
    /// the next one, or completes when the current field is terminal.
    pub fn record(
        &self,
        schema: &FieldSchema,
        value: FieldValue,
        now_ms: i64,
    ) -> Result<Advance, SessionError> {
        let field = schema
            .field(&self.current_field)
            .ok_or_else(|| SessionError::UnknownField(self.current_field.clone()))?;
        let mut collected = self.collected.clone();
        collected.insert(field.key.clone(), value);

        match &field.next {
            Next::Field(next) => Ok(Advance::Next(Self {
                user_id: self.user_id.clone(),
                current_field: next.clone(),
                collected,
                started_at_ms: self.started_at_ms,
                updated_at_ms: now_ms,
            })),
            Next::Terminal => Ok(Advance::Completed(ReportDraft {
                user_id: self.user_id.clone(),
                values: collected,
                started_at_ms: self.started_at_ms,
                completed_at_ms: now_ms,
            })),
        }
    }

    fn is_expired(&self, ttl: Duration, now_ms: i64) -> bool {
        if ttl.is_zero() {
            return false;
        }
        now_ms.saturating_sub(self.updated_at_ms) >= ttl.as_millis() as i64
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Idle time after which an abandoned session is dropped. Zero disables
    /// expiry.
    pub idle_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct InMemorySessionStore {
    schema: Arc<FieldSchema>,
    config: SessionConfig,
    inner: Arc<Mutex<HashMap<String, Session>>>,
}

impl InMemorySessionStore {
    pub fn new(schema: Arc<FieldSchema>, config: SessionConfig) -> Self {
        Self {
            schema,
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn begin(&self, user_id: &str) -> BoxFuture<'_, Result<Session, SessionError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let session = Session::begin(&self.schema, user_id.clone(), now_ms());
            self.inner.lock().await.insert(user_id, session.clone());
            Ok(session)
        })
    }

    fn get(&self, user_id: &str) -> BoxFuture<'_, Result<Option<Session>, SessionError>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let mut guard = self.inner.lock().await;
            let Some(session) = guard.get(&user_id) else {
                return Ok(None);
            };
            if session.is_expired(self.config.idle_ttl, now_ms()) {
                guard.remove(&user_id);
                tracing::debug!(user_id = %user_id, "dropped expired session");
                return Ok(None);
            }
            Ok(Some(session.clone()))
        })
    }

    fn advance(
        &self,
        user_id: &str,
        expected_field: &str,
        value: FieldValue,
    ) -> BoxFuture<'_, Result<Advance, SessionError>> {
        let user_id = user_id.to_string();
        let expected_field = expected_field.to_string();
        Box::pin(async move {
            let now = now_ms();
            let mut guard = self.inner.lock().await;
            let Some(session) = guard.get(&user_id) else {
                return Err(SessionError::NotFound);
            };
            if session.is_expired(self.config.idle_ttl, now) {
                guard.remove(&user_id);
                return Err(SessionError::NotFound);
            }
            if session.current_field != expected_field {
                return Err(SessionError::Stale {
                    expected: expected_field,
                    actual: session.current_field.clone(),
                });
            }

            let advance = session.record(&self.schema, value, now)?;
            match &advance {
                Advance::Next(next) => {
                    guard.insert(user_id, next.clone());
                }
                Advance::Completed(_) => {
                    guard.remove(&user_id);
                }
            }
            Ok(advance)
        })
    }

    fn cancel(&self, user_id: &str) -> BoxFuture<'_, Result<bool, SessionError>> {
        let user_id = user_id.to_string();
        Box::pin(async move { Ok(self.inner.lock().await.remove(&user_id).is_some()) })
    }

    fn purge_expired(&self) -> BoxFuture<'_, Result<usize, SessionError>> {
        Box::pin(async move {
            let now = now_ms();
            let mut guard = self.inner.lock().await;
            let before = guard.len();
            guard.retain(|_, session| !session.is_expired(self.config.idle_ttl, now));
            Ok(before - guard.len())
        })
    }
}
