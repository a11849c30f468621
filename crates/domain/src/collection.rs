use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ports::sessions::{SessionError, SessionStore};
use crate::report::ReportDraft;
use crate::schema::{ChoiceOption, FieldSchema, FieldSpec, FieldValue, InputKind, Validator};
use crate::session::{Advance, Session};
use crate::util::now_ms;

const CANCEL_TOKENS: &[&str] = &["/cancel", "cancel", "отмена"];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputModality {
    Text,
    Selection,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInput {
    pub modality: InputModality,
    pub payload: String,
}

impl UserInput {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            modality: InputModality::Text,
            payload: payload.into(),
        }
    }

    pub fn selection(payload: impl Into<String>) -> Self {
        Self {
            modality: InputModality::Selection,
            payload: payload.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionEvent {
    Start,
    Input(UserInput),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CollectionState {
    Idle,
    Collecting(Session),
    Completed(ReportDraft),
}

/// The store operation a transition requires. Applied by the driver.
#[derive(Clone, Debug, PartialEq)]
pub enum Commit {
    None,
    Begin,
    Advance { field: String, value: FieldValue },
    Cancel,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    pub field: String,
    pub text: String,
    pub options: Vec<ChoiceOption>,
    pub step: usize,
    pub total: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Prompt(Prompt),
    Rejected { field: String, message: String },
    Cancelled,
    NoActiveSession,
    Submit(ReportDraft),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: CollectionState,
    pub effects: Vec<Effect>,
    pub commit: Commit,
}

pub fn is_cancel_token(raw: &str) -> bool {
    let normalized = raw.trim().to_lowercase();
    CANCEL_TOKENS.contains(&normalized.as_str())
}

pub const STALE_SELECTION: &str = "That menu belongs to another question; use the current one.";

/// Reduces typed text and menu selections to the same raw string. Menu
/// payloads are `field:value`; a selection without a prefix or made from
/// another field's menu yields `None`.
pub fn normalize_input(field: &FieldSpec, input: &UserInput) -> Option<String> {
    match input.modality {
        InputModality::Text => Some(input.payload.trim().to_string()),
        InputModality::Selection => match input.payload.trim().split_once(':') {
            Some((key, value)) if key == field.key => Some(value.trim().to_string()),
            _ => None,
        },
    }
}

/// Menu options offered for a field; empty for free-text fields.
pub fn field_options(field: &FieldSpec) -> Vec<ChoiceOption> {
    match (&field.validator, field.input_kind()) {
        (Validator::Choice(options), _) => options.clone(),
        (_, InputKind::Boolean) => vec![
            ChoiceOption::new("yes", "Yes"),
            ChoiceOption::new("no", "No"),
        ],
        _ => Vec::new(),
    }
}

pub fn prompt_for(schema: &FieldSchema, field: &FieldSpec) -> Prompt {
    Prompt {
        field: field.key.clone(),
        text: field.prompt.clone(),
        options: field_options(field),
        step: schema.position(&field.key).unwrap_or(1),
        total: schema.len(),
    }
}

/// Pure transition of one user's collection state on one event.
pub fn transition(
    schema: &FieldSchema,
    user_id: &str,
    state: &CollectionState,
    event: &CollectionEvent,
    now_ms: i64,
) -> Transition {
    let input = match event {
        CollectionEvent::Start => {
            let session = Session::begin(schema, user_id, now_ms);
            return Transition {
                state: CollectionState::Collecting(session),
                effects: vec![Effect::Prompt(prompt_for(schema, schema.first()))],
                commit: Commit::Begin,
            };
        }
        CollectionEvent::Input(input) => input,
    };

    let session = match state {
        CollectionState::Collecting(session) => session,
        CollectionState::Idle | CollectionState::Completed(_) => {
            return Transition {
                state: CollectionState::Idle,
                effects: vec![Effect::NoActiveSession],
                commit: Commit::None,
            };
        }
    };

    let cancelled = Transition {
        state: CollectionState::Idle,
        effects: vec![Effect::Cancelled],
        commit: Commit::Cancel,
    };
    if is_cancel_token(&input.payload) {
        return cancelled;
    }
    let Some(field) = schema.field(&session.current_field) else {
        return cancelled;
    };

    let reject = |message: String| Transition {
        state: state.clone(),
        effects: vec![
            Effect::Rejected {
                field: field.key.clone(),
                message,
            },
            Effect::Prompt(prompt_for(schema, field)),
        ],
        commit: Commit::None,
    };
    let Some(raw) = normalize_input(field, input) else {
        return reject(STALE_SELECTION.to_string());
    };
    let value = match field.validate(&raw) {
        Ok(value) => value,
        Err(err) => return reject(format!("Expected {}.", err.expected)),
    };

    let commit = Commit::Advance {
        field: field.key.clone(),
        value: value.clone(),
    };
    match session.record(schema, value, now_ms) {
        Ok(Advance::Next(next)) => {
            let effects = schema
                .field(&next.current_field)
                .map(|field| vec![Effect::Prompt(prompt_for(schema, field))])
                .unwrap_or_default();
            Transition {
                state: CollectionState::Collecting(next),
                effects,
                commit,
            }
        }
        Ok(Advance::Completed(draft)) => Transition {
            state: CollectionState::Completed(draft.clone()),
            effects: vec![Effect::Submit(draft)],
            commit,
        },
        Err(_) => cancelled,
    }
}

/// Drives sessions held in a [`SessionStore`] through [`transition`].
#[derive(Clone)]
pub struct CollectionMachine {
    schema: Arc<FieldSchema>,
    sessions: Arc<dyn SessionStore>,
}

impl CollectionMachine {
    pub fn new(schema: Arc<FieldSchema>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { schema, sessions }
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub async fn state(&self, user_id: &str) -> Result<CollectionState, SessionError> {
        Ok(match self.sessions.get(user_id).await? {
            Some(session) => CollectionState::Collecting(session),
            None => CollectionState::Idle,
        })
    }

    pub async fn handle(
        &self,
        user_id: &str,
        event: CollectionEvent,
    ) -> Result<Vec<Effect>, SessionError> {
        let state = self.state(user_id).await?;
        let transition = transition(&self.schema, user_id, &state, &event, now_ms());

        match transition.commit {
            Commit::None => {}
            Commit::Begin => {
                self.sessions.begin(user_id).await?;
                tracing::info!(user_id = %user_id, "report session started");
            }
            Commit::Cancel => {
                self.sessions.cancel(user_id).await?;
                tracing::info!(user_id = %user_id, "report session cancelled");
            }
            Commit::Advance { field, value } => {
                let advance = self.sessions.advance(user_id, &field, value).await?;
                if let Advance::Completed(_) = advance {
                    tracing::info!(user_id = %user_id, "report session completed");
                }
            }
        }

        Ok(transition.effects)
    }
}
