//! Agent client (C2): a thin, role-addressed HTTP streaming client over
//! whatever model-serving endpoint is configured per role. The orchestrator
//! never talks to a specific model by name — it asks "the Coder" or "the
//! Voter" and this module resolves that to an endpoint, a concurrency
//! semaphore, and a degradation tracker.

mod degradation;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::AppError;

pub use degradation::DegradationTracker;

/// Seam the orchestrator, MAKER engine, and context compressor call through
/// instead of a concrete [`AgentClient`] — the same "trait over the opaque
/// backend" idiom as [`crate::kv::KvBackend`], so tests can swap in a fake
/// agent endpoint instead of hitting the network.
#[async_trait]
pub trait AgentPort: Send + Sync {
    async fn call(&self, request: AgentRequest) -> Result<AgentResponse, AppError>;
}

/// The five roles an agent call can be made on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Preprocessor,
    Planner,
    Coder,
    Reviewer,
    Voter,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Preprocessor => "preprocessor",
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Voter => "voter",
        }
    }
}

/// A request to an agent endpoint.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: AgentRole,
    pub system_prompt: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// A completed (non-streaming) agent response.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub text: String,
    pub tokens_used: u32,
    pub latency_ms: u64,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    token: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    tokens_used: u32,
}

struct RoleEndpoint {
    url: String,
    semaphore: Arc<Semaphore>,
}

/// Routes agent requests to per-role endpoints, enforcing per-role
/// concurrency and tracking consecutive failures for observability.
pub struct AgentClient {
    http: reqwest::Client,
    endpoints: HashMap<AgentRole, RoleEndpoint>,
    degradation: DegradationTracker,
    timeout: Duration,
}

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

impl AgentClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(e.to_string()))?;

        let mut endpoints = HashMap::new();
        for role in [
            AgentRole::Preprocessor,
            AgentRole::Planner,
            AgentRole::Coder,
            AgentRole::Reviewer,
            AgentRole::Voter,
        ] {
            let Some(cfg) = config.agents.get(role.as_str()) else {
                continue;
            };
            endpoints.insert(
                role,
                RoleEndpoint {
                    url: cfg.url.clone(),
                    semaphore: Arc::new(Semaphore::new(
                        cfg.max_concurrency.unwrap_or(DEFAULT_CONCURRENCY),
                    )),
                },
            );
        }

        Ok(Self {
            http,
            endpoints,
            degradation: DegradationTracker::new(3),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Issue a single non-streaming call, collecting the streamed response
    /// into a final string. The wire format always streams (`stream: true`)
    /// so this path and `call_streaming` share one request/parse routine.
    pub async fn call(&self, request: AgentRequest) -> Result<AgentResponse, AppError> {
        let started = std::time::Instant::now();
        let mut text = String::new();
        let mut tokens_used = 0u32;

        let mut stream = self.call_streaming(request.clone()).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            text.push_str(&chunk.token);
            if chunk.done {
                tokens_used = chunk.tokens_used;
            }
        }

        self.degradation.record_success(request.role);
        Ok(AgentResponse {
            text,
            tokens_used,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Stream raw token chunks from the configured endpoint for `request.role`.
    ///
    /// Parses newline-delimited `data: {json}` frames, matching the
    /// orchestrator's SSE parsing loop over its model server's streaming API.
    pub async fn call_streaming(
        &self,
        request: AgentRequest,
    ) -> Result<impl futures::Stream<Item = Result<StreamChunk, AppError>> + '_, AppError> {
        let endpoint = self.endpoints.get(&request.role).ok_or_else(|| {
            AppError::configuration(
                format!("no endpoint configured for agent role {:?}", request.role),
                None,
            )
        })?;

        let _permit = endpoint
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| AppError::internal(e.to_string()))?;

        let wire = WireRequest {
            prompt: &request.prompt,
            system: request.system_prompt.as_deref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let response = self
            .http
            .post(&endpoint.url)
            .timeout(self.timeout)
            .json(&wire)
            .send()
            .await
            .map_err(|e| {
                self.degradation.record_failure(request.role);
                if e.is_timeout() {
                    AppError::model_timeout(request.role.as_str(), Some(&endpoint.url))
                } else {
                    AppError::network(e.to_string(), Some(&endpoint.url))
                }
            })?;

        if !response.status().is_success() {
            self.degradation.record_failure(request.role);
            return Err(AppError::network(
                format!("agent endpoint returned status {}", response.status()),
                Some(&endpoint.url),
            ));
        }

        let role = request.role;
        let byte_stream = response.bytes_stream();
        let parsed = byte_stream.scan(Vec::<u8>::new(), move |buf, chunk| {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => return futures::future::ready(Some(Err(AppError::network(e.to_string(), None)))),
            };
            buf.extend_from_slice(&chunk);
            futures::future::ready(Some(Ok(std::mem::take(buf))))
        });

        let _ = role;
        let lines = parsed.flat_map(|raw_buf| {
            let lines: Vec<Result<StreamChunk, AppError>> = match raw_buf {
                Ok(buf) => parse_sse_lines(&buf)
                    .into_iter()
                    .map(Ok)
                    .collect(),
                Err(e) => vec![Err(e)],
            };
            futures::stream::iter(lines)
        });

        Ok(lines)
    }

    pub fn degradation(&self) -> &DegradationTracker {
        &self.degradation
    }
}

#[async_trait]
impl AgentPort for AgentClient {
    async fn call(&self, request: AgentRequest) -> Result<AgentResponse, AppError> {
        AgentClient::call(self, request).await
    }
}

impl Clone for AgentRequest {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            system_prompt: self.system_prompt.clone(),
            prompt: self.prompt.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// A single streamed token chunk.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub token: String,
    pub done: bool,
    pub tokens_used: u32,
}

fn parse_sse_lines(buf: &[u8]) -> Vec<StreamChunk> {
    let text = String::from_utf8_lossy(buf);
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if payload.trim() == "[DONE]" {
            out.push(StreamChunk { token: String::new(), done: true, tokens_used: 0 });
            continue;
        }
        match serde_json::from_str::<WireChunk>(payload) {
            Ok(chunk) => out.push(StreamChunk {
                token: chunk.token,
                done: chunk.done,
                tokens_used: chunk.tokens_used,
            }),
            Err(e) => {
                debug!(error = %e, "skipping malformed SSE frame");
            }
        }
    }
    out
}

/// Fan out the same prompt across N candidates at increasing temperature,
/// per spec.md's `0.3 + 0.1*i` schedule. Each candidate call is independent;
/// a single failed candidate does not fail the batch (MAKER tolerates
/// missing candidates — see [`crate::maker`]).
pub async fn generate_candidates(
    client: &dyn AgentPort,
    role: AgentRole,
    system_prompt: Option<&str>,
    prompt: &str,
    n: usize,
) -> Vec<Option<AgentResponse>> {
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let temperature = 0.3 + 0.1 * i as f32;
        let request = AgentRequest {
            role,
            system_prompt: system_prompt.map(|s| s.to_string()),
            prompt: prompt.to_string(),
            temperature,
            max_tokens: None,
        };
        handles.push(async move {
            match client.call(request).await {
                Ok(r) => Some(r),
                Err(e) => {
                    warn!(candidate = i, error = %e, "candidate generation failed");
                    None
                }
            }
        });
    }
    futures::future::join_all(handles).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sse_data_frames() {
        let buf = b"data: {\"token\":\"hel\",\"done\":false,\"tokens_used\":0}\ndata: {\"token\":\"lo\",\"done\":true,\"tokens_used\":2}\n";
        let chunks = parse_sse_lines(buf);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token, "hel");
        assert!(chunks[1].done);
        assert_eq!(chunks[1].tokens_used, 2);
    }

    #[test]
    fn skips_malformed_frames() {
        let buf = b"data: not json\ndata: {\"token\":\"x\",\"done\":false,\"tokens_used\":0}\n";
        let chunks = parse_sse_lines(buf);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token, "x");
    }

    #[test]
    fn temperature_schedule_matches_spec() {
        let temps: Vec<f32> = (0..5).map(|i| 0.3 + 0.1 * i as f32).collect();
        assert!((temps[0] - 0.3).abs() < 1e-6);
        assert!((temps[4] - 0.7).abs() < 1e-6);
    }
}
