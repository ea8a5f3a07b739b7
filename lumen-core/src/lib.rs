use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use lumen_catalog::{FieldCatalog, SummaryProvider};
use lumen_context::ContextBuilder;
use lumen_host::HostPlatform;
use lumen_infer::{ChatModel, HttpChatModel, ModelClient, ModelError, FALLBACK_REPLY};
use lumen_interpret::{Interpretation, ResponseInterpreter};
use lumen_types::{ChartRef, Message};
use lumen_viz::{RenderOutcome, VisualizationBridge};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod settings;
pub use settings::{Settings, SettingsError};

/// Bot reply used when a turn failed outside the model call itself.
pub const TURN_FALLBACK: &str = "Sorry, I encountered an error. Please try again.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Where the session is within the current turn.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    AwaitingModel,
    Rendering,
    Done,
}

/// Result of one `submit` call.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// Empty or whitespace-only input; nothing happened.
    Ignored,
    /// Another turn is still in flight; nothing happened.
    Busy,
    /// The turn finished and this bot message was appended.
    Replied(Message),
}

type PhaseCell = Arc<StdMutex<TurnPhase>>;

fn lock_phase(cell: &PhaseCell) -> MutexGuard<'_, TurnPhase> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_phase(cell: &PhaseCell, next: TurnPhase) {
    let mut phase = lock_phase(cell);
    tracing::debug!(from = ?*phase, to = ?next, "turn phase");
    *phase = next;
}

/// Holds the session's single turn slot. Dropping it always returns the
/// session to `Idle`, whatever happened to the turn.
struct TurnGuard {
    phase: PhaseCell,
}

impl TurnGuard {
    fn begin(phase: &PhaseCell) -> Option<Self> {
        let mut current = lock_phase(phase);
        if *current != TurnPhase::Idle {
            return None;
        }
        *current = TurnPhase::AwaitingModel;
        Some(Self {
            phase: Arc::clone(phase),
        })
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        set_phase(&self.phase, TurnPhase::Done);
        set_phase(&self.phase, TurnPhase::Idle);
    }
}

/// The per-turn pipeline: context, model, interpretation, rendering.
struct Pipeline {
    context: ContextBuilder,
    model: ModelClient,
    interpreter: ResponseInterpreter,
    bridge: VisualizationBridge,
}

impl Pipeline {
    async fn answer(&self, question: &str, phase: &PhaseCell) -> Message {
        let context = self.context.build(question).await;
        let reply = self.model.ask(question, &context).await;
        let Interpretation {
            display_text,
            chart,
        } = self.interpreter.interpret(&reply);

        let Some(spec) = chart else {
            return text_reply(display_text);
        };

        set_phase(phase, TurnPhase::Rendering);
        let target_id = format!("chart_{}", Uuid::new_v4().simple());
        match self.bridge.render(&spec, &target_id).await {
            RenderOutcome::Rendered(_) => {
                Message::bot_with_chart(display_text, ChartRef { target_id, spec })
            }
            RenderOutcome::Failed(_) => text_reply(display_text),
        }
    }
}

fn text_reply(text: String) -> Message {
    if text.trim().is_empty() {
        Message::bot(FALLBACK_REPLY)
    } else {
        Message::bot(text)
    }
}

/// One chat conversation: an append-only transcript and at most one turn in flight.
pub struct ConversationSession {
    pipeline: Arc<Pipeline>,
    transcript: Arc<Mutex<Vec<Message>>>,
    phase: PhaseCell,
}

impl ConversationSession {
    pub fn new(
        context: ContextBuilder,
        model: ModelClient,
        interpreter: ResponseInterpreter,
        bridge: VisualizationBridge,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                context,
                model,
                interpreter,
                bridge,
            }),
            transcript: Arc::new(Mutex::new(Vec::new())),
            phase: Arc::new(StdMutex::new(TurnPhase::Idle)),
        }
    }

    /// Wire a session from settings against an already-connected chat model.
    ///
    /// Populates the field catalog from the host before returning.
    pub async fn assemble(
        settings: &Settings,
        host: Arc<dyn HostPlatform>,
        chat_model: Arc<dyn ChatModel>,
    ) -> Self {
        let mut catalog = FieldCatalog::new(settings.sample_cap);
        catalog.initialize_from_host(host.as_ref()).await;

        let summaries = if settings.cache_summaries {
            SummaryProvider::new(Arc::clone(&host))
        } else {
            SummaryProvider::uncached(Arc::clone(&host))
        };
        let context = ContextBuilder::new(Arc::new(catalog), Arc::clone(&host), Arc::new(summaries))
            .with_match_mode(settings.match_mode)
            .with_objects(settings.object_ids());
        let model = ModelClient::new(chat_model).with_pre_prompt(settings.pre_prompt.clone());

        Self::new(
            context,
            model,
            ResponseInterpreter::new(settings.marker.clone()),
            VisualizationBridge::new(host),
        )
    }

    /// Validate settings, build the HTTP model client and [`assemble`](Self::assemble).
    pub async fn connect(settings: &Settings, host: Arc<dyn HostPlatform>) -> Result<Self, SessionError> {
        settings.validate()?;
        let chat_model = HttpChatModel::new(settings.model.clone(), settings.api_key.clone())?;
        tracing::info!(
            backend = ?settings.model.backend,
            endpoint = settings.model.endpoint(),
            model = settings.model.model(),
            "chat model configured"
        );
        Ok(Self::assemble(settings, host, Arc::new(chat_model)).await)
    }

    /// Run one user turn.
    ///
    /// Every accepted question gets exactly one bot message, even if the
    /// pipeline panics or the caller stops awaiting this future: the turn
    /// runs on its own task and appends its reply itself.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        let question = text.trim();
        if question.is_empty() {
            return SubmitOutcome::Ignored;
        }
        let Some(guard) = TurnGuard::begin(&self.phase) else {
            tracing::debug!("turn in flight; rejecting submission");
            return SubmitOutcome::Busy;
        };

        self.transcript.lock().await.push(Message::user(question));

        let pipeline = Arc::clone(&self.pipeline);
        let transcript = Arc::clone(&self.transcript);
        let question = question.to_string();
        let turn = tokio::spawn(async move {
            let phase = Arc::clone(&guard.phase);
            let answer = tokio::spawn(async move { pipeline.answer(&question, &phase).await });
            let reply = match answer.await {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = %e, "turn pipeline failed");
                    Message::bot(TURN_FALLBACK)
                }
            };
            transcript.lock().await.push(reply.clone());
            drop(guard);
            reply
        });

        match turn.await {
            Ok(reply) => SubmitOutcome::Replied(reply),
            Err(e) => {
                tracing::error!(error = %e, "turn task failed");
                let reply = Message::bot(TURN_FALLBACK);
                self.transcript.lock().await.push(reply.clone());
                SubmitOutcome::Replied(reply)
            }
        }
    }

    pub async fn transcript(&self) -> Vec<Message> {
        self.transcript.lock().await.clone()
    }

    pub fn phase(&self) -> TurnPhase {
        *lock_phase(&self.phase)
    }

    /// True while a turn is in flight.
    pub fn is_loading(&self) -> bool {
        self.phase() != TurnPhase::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_admits_one_turn_and_resets() {
        let phase: PhaseCell = Arc::new(StdMutex::new(TurnPhase::Idle));
        let guard = TurnGuard::begin(&phase).unwrap();
        assert_eq!(*lock_phase(&phase), TurnPhase::AwaitingModel);
        assert!(TurnGuard::begin(&phase).is_none());

        set_phase(&phase, TurnPhase::Rendering);
        assert!(TurnGuard::begin(&phase).is_none());

        drop(guard);
        assert_eq!(*lock_phase(&phase), TurnPhase::Idle);
        assert!(TurnGuard::begin(&phase).is_some());
    }

    #[test]
    fn blank_text_reply_becomes_fallback() {
        assert_eq!(text_reply("  ".into()).text, FALLBACK_REPLY);
        assert_eq!(text_reply("ok".into()).text, "ok");
    }
}
