//! Generation oracle backends.
//!
//! The [`Oracle`] trait decouples the verify/repair engine from the text
//! generator. Failures are values, never errors: the caller owns retry policy
//! through [`generate_with_retry`]. Tests use a scripted oracle that returns
//! predetermined responses.

use std::env;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::OracleError;
use crate::io::config::{OracleBackend, OracleConfig};
use crate::io::process::run_command_with_timeout;

/// Result of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResponse {
    pub success: bool,
    pub content: String,
    pub error: String,
}

impl OracleResponse {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: String::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: error.into(),
        }
    }
}

/// Abstraction over text-generation backends.
pub trait Oracle {
    /// Turn `prompt` into candidate content. Must not panic on backend failure.
    fn generate(&self, prompt: &str) -> OracleResponse;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn generate(&self, prompt: &str) -> OracleResponse {
        (**self).generate(prompt)
    }
}

/// Call `oracle` up to `retries` times with a fixed `backoff` between calls.
///
/// Empty content counts as a failed call.
#[instrument(skip_all, fields(retries = retries, prompt_bytes = prompt.len()))]
pub fn generate_with_retry<O: Oracle + ?Sized>(
    oracle: &O,
    prompt: &str,
    retries: u32,
    backoff: Duration,
) -> Result<String, OracleError> {
    let mut last_error = String::from("oracle was not called");
    for attempt in 1..=retries {
        let response = oracle.generate(prompt);
        if response.success && !response.content.trim().is_empty() {
            debug!(attempt, "oracle produced content");
            return Ok(response.content);
        }
        last_error = if response.success {
            "oracle returned empty content".to_string()
        } else {
            response.error
        };
        warn!(attempt, err = %last_error, "oracle call failed");
        if attempt < retries && !backoff.is_zero() {
            thread::sleep(backoff);
        }
    }
    Err(OracleError {
        attempts: retries,
        last_error,
    })
}

/// Build the backend selected in config.
pub fn oracle_from_config(cfg: &OracleConfig, output_limit_bytes: usize) -> Result<Box<dyn Oracle>> {
    match cfg.backend {
        OracleBackend::Command => Ok(Box::new(CommandOracle::new(cfg, output_limit_bytes)?)),
        OracleBackend::Gemini => Ok(Box::new(GeminiOracle::from_env(cfg)?)),
        OracleBackend::Zhipu => Ok(Box::new(ZhipuOracle::from_env(cfg)?)),
    }
}

/// Oracle that pipes the prompt to a local command and reads content from stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(cfg: &OracleConfig, output_limit_bytes: usize) -> Result<Self> {
        let (program, args) = cfg
            .command
            .split_first()
            .ok_or_else(|| anyhow!("oracle.command must be a non-empty array"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes,
        })
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(program = %self.program))]
    fn generate(&self, prompt: &str) -> OracleResponse {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        let output = match run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => return OracleResponse::failure(format!("{err:#}")),
        };
        if output.timed_out {
            return OracleResponse::failure(format!(
                "{} timed out after {:?}",
                self.program, self.timeout
            ));
        }
        if !output.success() {
            return OracleResponse::failure(format!(
                "{} exited with status {:?}: {}",
                self.program,
                output.status.code(),
                output.diagnostic()
            ));
        }
        OracleResponse::ok(output.stdout_text())
    }
}

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Oracle backed by the Gemini `generateContent` endpoint.
pub struct GeminiOracle {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiCandidateContent>,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiOracle {
    /// Read the API key from `GEMINI_API_KEY` or `GOOGLE_API_KEY`.
    ///
    /// The model comes from config, then `GEMINI_MODEL`, then the default.
    pub fn from_env(cfg: &OracleConfig) -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .or_else(|_| env::var("GOOGLE_API_KEY"))
            .map_err(|_| anyhow!("GEMINI_API_KEY or GOOGLE_API_KEY must be set"))?;
        let model = model_name(cfg, "GEMINI_MODEL", DEFAULT_GEMINI_MODEL);
        let client = http_client(cfg)?;
        info!(model = %model, "using gemini oracle");
        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

impl Oracle for GeminiOracle {
    #[instrument(skip_all, fields(model = %self.model))]
    fn generate(&self, prompt: &str) -> OracleResponse {
        let url = format!("{GEMINI_API_BASE}/{}:generateContent", self.model);
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
        };
        let response = match self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
        {
            Ok(response) => response,
            Err(err) => return OracleResponse::failure(format!("gemini request failed: {err}")),
        };
        let status = response.status();
        match response.text() {
            Ok(text) => parse_gemini_response(status, &text),
            Err(err) => OracleResponse::failure(format!("read gemini response: {err}")),
        }
    }
}

/// Model from config, then `env_var`, then `default`.
fn model_name(cfg: &OracleConfig, env_var: &str, default: &str) -> String {
    if cfg.model.trim().is_empty() {
        env::var(env_var).unwrap_or_else(|_| default.to_string())
    } else {
        cfg.model.clone()
    }
}

fn http_client(cfg: &OracleConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .context("build http client")
}

fn parse_gemini_response(status: StatusCode, body: &str) -> OracleResponse {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return OracleResponse::failure(format!("gemini quota exceeded (429): {body}"));
    }
    if !status.is_success() {
        return OracleResponse::failure(format!("gemini error ({}): {body}", status.as_u16()));
    }
    let parsed: GeminiResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => return OracleResponse::failure(format!("parse gemini response: {err}")),
    };
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().map(|part| part.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        return OracleResponse::failure("gemini response had no candidate text");
    }
    OracleResponse::ok(text)
}

const ZHIPU_API_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";
const DEFAULT_ZHIPU_MODEL: &str = "glm-4";

/// Oracle backed by the Zhipu GLM chat-completions endpoint.
pub struct ZhipuOracle {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

impl ZhipuOracle {
    /// Read the API key from `ZHIPU_API_KEY`.
    ///
    /// The model comes from config, then `ZHIPU_MODEL`, then `glm-4`.
    pub fn from_env(cfg: &OracleConfig) -> Result<Self> {
        let api_key =
            env::var("ZHIPU_API_KEY").map_err(|_| anyhow!("ZHIPU_API_KEY must be set"))?;
        let model = model_name(cfg, "ZHIPU_MODEL", DEFAULT_ZHIPU_MODEL);
        let client = http_client(cfg)?;
        info!(model = %model, "using zhipu oracle");
        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

impl Oracle for ZhipuOracle {
    #[instrument(skip_all, fields(model = %self.model))]
    fn generate(&self, prompt: &str) -> OracleResponse {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };
        let response = match self
            .client
            .post(ZHIPU_API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
        {
            Ok(response) => response,
            Err(err) => return OracleResponse::failure(format!("zhipu request failed: {err}")),
        };
        let status = response.status();
        match response.text() {
            Ok(text) => parse_zhipu_response(status, &text),
            Err(err) => OracleResponse::failure(format!("read zhipu response: {err}")),
        }
    }
}

fn parse_zhipu_response(status: StatusCode, body: &str) -> OracleResponse {
    if !status.is_success() {
        let quota = status == StatusCode::TOO_MANY_REQUESTS
            || body.to_lowercase().contains("quota")
            || body.contains("余额不足");
        if quota {
            return OracleResponse::failure(format!(
                "zhipu quota or balance exhausted ({}): {body}",
                status.as_u16()
            ));
        }
        return OracleResponse::failure(format!("zhipu error ({}): {body}", status.as_u16()));
    }
    let parsed: ChatResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => return OracleResponse::failure(format!("parse zhipu response: {err}")),
    };
    match parsed.choices.into_iter().next() {
        Some(choice) if !choice.message.content.is_empty() => {
            OracleResponse::ok(choice.message.content)
        }
        _ => OracleResponse::failure("zhipu response had no choice content"),
    }
}
