//! Completion service abstraction.
//!
//! The [`CompletionClient`] trait decouples planning and generation from the
//! language-model backend. Responses are raw text; callers extract the JSON
//! object themselves. Tests use scripted clients that return canned text.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::io::config::{CompletionBackend, CompletionConfig};
use crate::io::process::run_command_with_timeout;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const USER_AGENT: &str = concat!("mikalia-agent/", env!("CARGO_PKG_VERSION"));

/// One text-in/text-out completion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Abstraction over completion backends.
pub trait CompletionClient {
    /// Return the raw completion text. Transport failures are errors;
    /// unusable text is the caller's problem.
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Build the client selected by `[completion].backend`.
pub fn client_from_config(cfg: &CompletionConfig) -> Result<Box<dyn CompletionClient>> {
    match cfg.backend {
        CompletionBackend::Anthropic => Ok(Box::new(AnthropicCompletion::from_config(cfg)?)),
        CompletionBackend::Command => Ok(Box::new(CommandCompletion::from_config(cfg))),
    }
}

/// Anthropic Messages API client.
pub struct AnthropicCompletion {
    api_url: String,
    api_key: String,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl AnthropicCompletion {
    pub fn from_config(cfg: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .with_context(|| format!("read API key from ${}", cfg.api_key_env))?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("${} is empty", cfg.api_key_env));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build();
        Ok(Self {
            api_url: cfg.api_url.clone(),
            api_key,
            model: cfg.model.clone(),
            agent,
        })
    }
}

impl CompletionClient for AnthropicCompletion {
    #[instrument(skip_all, fields(model = %self.model, max_tokens = request.max_tokens))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [{"role": "user", "content": request.user_prompt}],
        });

        debug!("sending messages request");
        let response = self
            .agent
            .post(&self.api_url)
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .set("content-type", "application/json")
            .send_json(body);

        let response = match response {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                warn!(status = code, "completion request rejected");
                return Err(anyhow!("completion API returned HTTP {code}: {}", body.trim()));
            }
            Err(e) => return Err(e).context("send completion request"),
        };

        let parsed: MessagesResponse = response
            .into_json()
            .context("decode completion response")?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

/// Runs a local command per request: the request JSON goes to stdin and the
/// completion text is read from stdout.
pub struct CommandCompletion {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCompletion {
    pub fn from_config(cfg: &CompletionConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl CompletionClient for CommandCompletion {
    #[instrument(skip_all, fields(program = ?self.command.first()))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("completion.command is empty"))?;
        let input = serde_json::to_vec(request).context("serialize completion request")?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command_with_timeout(
            cmd,
            Some(&input),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run completion command {program}"))?;

        if !output.succeeded() {
            return Err(anyhow!(output.failure_summary("completion command")));
        }
        if output.stdout_truncated > 0 {
            warn!(
                truncated = output.stdout_truncated,
                "completion output truncated"
            );
        }
        Ok(output.stdout_lossy())
    }
}
