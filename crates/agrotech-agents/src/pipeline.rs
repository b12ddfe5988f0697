//! Multi-stage assessment pipeline
//!
//! A [`Pipeline`] runs its stages strictly in order and reports progress as
//! [`OutboundEvent`]s on an mpsc sink:
//!
//! ```text
//! scenario, (status, agent_result) per stage, status "✅ Análisis completado"
//! ```
//!
//! Recoverable failures never show up here: every stage yields a result.
//! A fatal agent error emits one `error` event and fails the run. A closed
//! sink or a cancelled session abandons the remaining stages.

use std::sync::Arc;
use std::time::Duration;

use agrotech_core::{InboundMessage, OutboundEvent, ResponseParser};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentError, AgentRole, PromptContext};
use crate::roles::{self, RoleSpec};
use crate::transport::LlmTransport;

/// Final status line of a successful run
pub const COMPLETION_MESSAGE: &str = "✅ Análisis completado";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Event channel closed after {completed} stage(s)")]
    ChannelClosed { completed: usize },

    #[error("Session cancelled after {completed} stage(s)")]
    Cancelled { completed: usize },

    #[error(transparent)]
    Agent(#[from] AgentError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    StageRunning(usize),
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Failed)
    }
}

/// One analysis request and everything it has produced so far
#[derive(Debug)]
pub struct PipelineSession {
    id: Uuid,
    scenario: String,
    context: PromptContext,
    state: PipelineState,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

impl PipelineSession {
    pub fn new(scenario: impl Into<String>, context: PromptContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario: scenario.into(),
            context,
            state: PipelineState::Idle,
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Tie the session to an outer token (usually the connection's)
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn context(&self) -> &PromptContext {
        &self.context
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Ordered list of agent roles
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<AgentRole>,
    stage_delay: Duration,
}

impl Pipeline {
    pub fn new(stages: Vec<AgentRole>) -> Self {
        Self {
            stages,
            stage_delay: Duration::ZERO,
        }
    }

    /// Pause between consecutive stages
    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(AgentRole::name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(
        &self,
        session: &mut PipelineSession,
        events: &mpsc::Sender<OutboundEvent>,
    ) -> Result<()> {
        tracing::info!(
            "Pipeline {} started: {} [{}]",
            session.id,
            session.scenario,
            self.stage_names().join(" → ")
        );

        let announcement = OutboundEvent::scenario(&session.scenario);
        self.emit(session, events, announcement, 0).await?;

        for (index, stage) in self.stages.iter().enumerate() {
            if session.is_cancelled() {
                session.state = PipelineState::Failed;
                tracing::info!("Pipeline {} cancelled before {}", session.id, stage.name());
                return Err(PipelineError::Cancelled { completed: index });
            }

            session.state = PipelineState::StageRunning(index);
            self.emit(
                session,
                events,
                OutboundEvent::status(&stage.spec().status_message),
                index,
            )
            .await?;

            let result = match stage.run(&session.context).await {
                Ok(result) => result,
                Err(e) => {
                    session.state = PipelineState::Failed;
                    tracing::error!("Pipeline {} failed at {}: {}", session.id, stage.name(), e);
                    let _ = events
                        .send(OutboundEvent::error(format!("Error en análisis: {}", e)))
                        .await;
                    return Err(e.into());
                }
            };

            publish(stage.spec(), &result.mapping, &mut session.context);
            session.context.push_result(result.clone());

            self.emit(session, events, OutboundEvent::agent_result(result), index)
                .await?;

            if !self.stage_delay.is_zero() && index + 1 < self.stages.len() {
                tokio::time::sleep(self.stage_delay).await;
            }
        }

        self.emit(
            session,
            events,
            OutboundEvent::status(COMPLETION_MESSAGE),
            self.stages.len(),
        )
        .await?;

        session.state = PipelineState::Completed;
        tracing::info!(
            "Pipeline {} completed in {}ms",
            session.id,
            (Utc::now() - session.started_at).num_milliseconds()
        );
        Ok(())
    }

    async fn emit(
        &self,
        session: &mut PipelineSession,
        events: &mpsc::Sender<OutboundEvent>,
        event: OutboundEvent,
        completed: usize,
    ) -> Result<()> {
        if events.send(event).await.is_err() {
            tracing::warn!("Pipeline {}: event channel closed", session.id);
            session.cancel();
            session.state = PipelineState::Failed;
            return Err(PipelineError::ChannelClosed { completed });
        }
        Ok(())
    }
}

/// Export the fields a role publishes as inputs for later stages
fn publish(spec: &RoleSpec, mapping: &agrotech_core::Mapping, context: &mut PromptContext) {
    for field in &spec.publishes {
        match mapping.get(field) {
            Some(Value::String(text)) => context.insert_input(field, text.as_str()),
            Some(Value::Null) | None => {}
            Some(other) => context.insert_input(field, other.to_string()),
        }
    }
}

/// Builds the pipeline matching each inbound scenario
#[derive(Clone)]
pub struct AgentPanel {
    transport: Arc<dyn LlmTransport>,
    parser: Arc<ResponseParser>,
    stage_delay: Duration,
}

impl AgentPanel {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            transport,
            parser: Arc::new(ResponseParser::default()),
            stage_delay: Duration::ZERO,
        }
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn with_stage_delay(mut self, delay: Duration) -> Self {
        self.stage_delay = delay;
        self
    }

    pub fn transport(&self) -> &Arc<dyn LlmTransport> {
        &self.transport
    }

    pub fn pipeline(&self, specs: Vec<RoleSpec>) -> Pipeline {
        let stages = specs
            .into_iter()
            .map(|spec| {
                AgentRole::new(spec, self.transport.clone()).with_parser(self.parser.clone())
            })
            .collect();
        Pipeline::new(stages).with_stage_delay(self.stage_delay)
    }

    /// Pipeline and fresh session for an inbound message
    pub fn prepare(&self, message: &InboundMessage) -> (Pipeline, PipelineSession) {
        let (specs, context) = match message {
            InboundMessage::CustomScenario {
                image_description,
                environment_description,
            } => (
                roles::custom_scenario_stages(),
                PromptContext::new()
                    .with_input("image_description", image_description.as_str())
                    .with_input("environment_description", environment_description.as_str()),
            ),
            InboundMessage::ImageScenario {
                image_base64,
                environment_description,
            } => (
                roles::image_scenario_stages(),
                PromptContext::new()
                    .with_input("image_base64", image_base64.as_str())
                    .with_input("environment_description", environment_description.as_str()),
            ),
        };

        (
            self.pipeline(specs),
            PipelineSession::new(message.scenario_name(), context),
        )
    }
}

impl std::fmt::Debug for AgentPanel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPanel")
            .field("model", &self.transport.model_name())
            .field("stage_delay", &self.stage_delay)
            .finish()
    }
}
