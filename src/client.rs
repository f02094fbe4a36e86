use serde_json::Value;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config_loader::Settings;
use crate::credentials::ApiKey;
use crate::error::{Result, TtsError};
use crate::request::SpeechRequest;

/// Longest wait between two attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Audio bytes as they arrive from the remote service.
pub type AudioStream = Box<dyn Read + Send>;

/// Anything that can turn a request into an audio byte stream.
/// The remote endpoint is the production implementation; tests plug in fakes.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay; doubled on every further attempt.
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.api_base_url.clone(),
            timeout: Duration::from_secs(settings.request_timeout_secs),
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Blocking client for an OpenAI-compatible `/audio/speech` endpoint.
pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    api_key: ApiKey,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: ApiKey, config: &ClientConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("universal-tts/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/audio/speech", config.base_url.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        })
    }

    fn send_once(&self, request: &SpeechRequest) -> Result<reqwest::blocking::Response> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(request)
            .send()?;

        let status = response.status();
        info!("Response received. Status: {}", status);
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().unwrap_or_default();
        Err(TtsError::SynthesisFailed {
            status: Some(status.as_u16()),
            message: error_message(status.as_u16(), &body),
        })
    }
}

impl SpeechSynthesizer for OpenAiClient {
    fn synthesize(&self, request: &SpeechRequest) -> Result<AudioStream> {
        debug!(
            model = %request.model,
            voice = %request.voice,
            format = %request.response_format,
            speed = ?request.speed,
            has_instructions = request.instructions.is_some(),
            input_chars = request.input.chars().count(),
            "API call parameters"
        );

        let mut attempt = 0;
        loop {
            match self.send_once(request) {
                Ok(response) => return Ok(Box::new(response)),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = backoff_delay(self.retry_delay, attempt);
                    attempt += 1;
                    warn!(
                        "Attempt {} failed ({}). Retrying in {:?}",
                        attempt, e, delay
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// `base * 2^attempt`, capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

/// The service reports `{"error": {"message": ...}}`; fall back to the raw body.
fn error_message(status: u16, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok().and_then(|json| {
        json.get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    match parsed {
        Some(message) => format!("HTTP {}: {}", status, message),
        None if body.trim().is_empty() => format!("HTTP {}", status),
        None => {
            let snippet: String = body.trim().chars().take(200).collect();
            format!("HTTP {}: {}", status, snippet)
        }
    }
}
