//! Agent role execution
//!
//! [`AgentRole`] renders a role's template against a [`PromptContext`],
//! calls the transport, parses the output and always produces a result with
//! the role's full schema. Only fatal transport errors escape.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use agrotech_core::{AgentResult, Mapping, ParseOutcome, PromptRequest, Provenance, ResponseParser};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use thiserror::Error;

use crate::roles::RoleSpec;
use crate::transport::{LlmTransport, TransportError};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("valid placeholder regex");
}

/// Errors that stop a pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("{role}: fatal transport failure: {source}")]
    FatalTransport {
        role: String,
        #[source]
        source: TransportError,
    },
}

/// Scenario inputs plus the results of stages run so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptContext {
    inputs: BTreeMap<String, String>,
    results: Vec<AgentResult>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_input(key, value);
        self
    }

    pub fn insert_input(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inputs.insert(key.into(), value.into());
    }

    pub fn input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).map(String::as_str)
    }

    /// Record a stage result; a later result for the same role replaces it
    pub fn push_result(&mut self, result: AgentResult) {
        self.results.retain(|r| r.role != result.role);
        self.results.push(result);
    }

    pub fn result(&self, role: &str) -> Option<&AgentResult> {
        self.results.iter().find(|r| r.role == role)
    }

    pub fn results(&self) -> &[AgentResult] {
        &self.results
    }

    /// Substitute `{{key}}` placeholders
    ///
    /// Inputs win over results. A role name expands to the pretty-printed
    /// mapping of that role's result. Unknown keys are left in place.
    pub fn render(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                let key = &caps[1];
                if let Some(value) = self.input(key) {
                    return value.to_string();
                }
                if let Some(result) = self.result(key) {
                    return serde_json::to_string_pretty(&result.mapping)
                        .unwrap_or_else(|_| "{}".to_string());
                }
                tracing::warn!("Unresolved prompt placeholder: {}", key);
                caps[0].to_string()
            })
            .into_owned()
    }
}

/// Executes one [`RoleSpec`] against a transport
#[derive(Clone)]
pub struct AgentRole {
    spec: RoleSpec,
    transport: Arc<dyn LlmTransport>,
    parser: Arc<ResponseParser>,
}

impl AgentRole {
    pub fn new(spec: RoleSpec, transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            spec,
            transport,
            parser: Arc::new(ResponseParser::default()),
        }
    }

    pub fn with_parser(mut self, parser: Arc<ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &RoleSpec {
        &self.spec
    }

    pub fn build_request(&self, context: &PromptContext) -> PromptRequest {
        let prompt = context.render(&self.spec.template);
        let request = PromptRequest::new(
            &self.spec.name,
            &self.spec.expertise,
            prompt,
            self.spec.options.clone(),
        );

        match self.spec.image_input.as_deref() {
            Some(key) => match context.input(key) {
                Some(image) => request.with_image(image),
                None => {
                    tracing::warn!("[{}] No image under input '{}'", self.spec.name, key);
                    request
                }
            },
            None => request,
        }
    }

    /// The fallback mapping, confidence 0
    pub fn fallback_result(&self) -> AgentResult {
        AgentResult::new(&self.spec.name, self.spec.fallback.clone(), Provenance::Fallback)
    }

    pub async fn run(&self, context: &PromptContext) -> Result<AgentResult, AgentError> {
        let request = self.build_request(context);
        let start = Instant::now();

        let output = match self.transport.generate(&request).await {
            Ok(output) => output,
            Err(e) if e.is_fatal() => {
                return Err(AgentError::FatalTransport {
                    role: self.spec.name.clone(),
                    source: e,
                })
            }
            Err(e) => {
                tracing::warn!("[{}] Using fallback response: {}", self.spec.name, e);
                return Ok(self.fallback_result());
            }
        };

        let result = match self.parser.parse(&output.text) {
            ParseOutcome::Structured(mapping) => self.complete(mapping, Provenance::Model),
            ParseOutcome::PartialRecovery {
                mapping,
                marked_fields,
            } => {
                tracing::info!(
                    "[{}] Partial recovery, defaulted fields: {:?}",
                    self.spec.name,
                    marked_fields
                );
                self.complete(mapping, Provenance::Partial)
            }
            ParseOutcome::Failed(reason) => {
                tracing::warn!(
                    "[{}] Unparsable output ({}), using fallback",
                    self.spec.name,
                    reason
                );
                self.fallback_result()
            }
        };

        tracing::info!(
            "[{}] Completed in {:.2}s ({}, confidence {:.2})",
            self.spec.name,
            start.elapsed().as_secs_f64(),
            result.provenance,
            result.confidence()
        );

        Ok(result)
    }

    /// Fill schema fields the model left out from the fallback
    fn complete(&self, mut mapping: Mapping, provenance: Provenance) -> AgentResult {
        for (key, value) in &self.spec.fallback {
            mapping.entry(key.clone()).or_insert_with(|| value.clone());
        }
        AgentResult::new(&self.spec.name, mapping, provenance)
    }
}

impl std::fmt::Debug for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRole")
            .field("name", &self.spec.name)
            .field("model", &self.transport.model_name())
            .finish()
    }
}
