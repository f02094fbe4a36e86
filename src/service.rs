//! The credential manager and the HTTP client, bundled and passed around
//! explicitly. The client is swapped as a whole when the key changes.

use arc_swap::ArcSwapOption;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::catalog::AudioFormat;
use crate::client::{ClientConfig, OpenAiClient, SpeechSynthesizer};
use crate::config_loader::Settings;
use crate::credentials::{ApiKey, CredentialManager, DeletionReport, KeyDestination, KeySource};
use crate::error::{Result, TtsError};
use crate::request::{preview_sample, SpeechRequest, SpeechRequestBuilder, SynthesisOptions};
use crate::writer;

/// What a finished generation produced.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub elapsed: Duration,
    /// Character count of the input before it was cut to the limit.
    pub truncated_from: Option<usize>,
}

struct Backend {
    synthesizer: Box<dyn SpeechSynthesizer>,
    source: Option<KeySource>,
}

pub struct TtsService {
    credentials: CredentialManager,
    backend: ArcSwapOption<Backend>,
    client_config: ClientConfig,
    max_input_chars: usize,
}

impl TtsService {
    /// Resolves the key once and builds the HTTP client for it.
    pub fn new(settings: &Settings, credentials: CredentialManager) -> Self {
        let service = Self {
            credentials,
            backend: ArcSwapOption::empty(),
            client_config: ClientConfig::from_settings(settings),
            max_input_chars: settings.max_input_chars,
        };
        match service.credentials.resolve() {
            Some(resolved) => {
                if let Err(e) = service.install_key(resolved.key, resolved.source) {
                    warn!("Could not create API client: {}", e);
                }
            }
            None => warn!("No API key configured; synthesis is disabled until one is set"),
        }
        service
    }

    /// Service backed by an arbitrary synthesizer.
    pub fn with_synthesizer(
        settings: &Settings,
        credentials: CredentialManager,
        synthesizer: Box<dyn SpeechSynthesizer>,
    ) -> Self {
        let service = Self {
            credentials,
            backend: ArcSwapOption::empty(),
            client_config: ClientConfig::from_settings(settings),
            max_input_chars: settings.max_input_chars,
        };
        service.backend.store(Some(Arc::new(Backend {
            synthesizer,
            source: None,
        })));
        service
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn has_client(&self) -> bool {
        self.backend.load().is_some()
    }

    pub fn key_source(&self) -> Option<KeySource> {
        self.backend.load_full().and_then(|backend| backend.source)
    }

    /// Saves the key and replaces the client so later requests use it.
    pub fn update_key(&self, key: ApiKey, destination: KeyDestination) -> Result<KeySource> {
        let source = self.credentials.save(key.clone(), destination)?;
        self.install_key(key, source)?;
        Ok(source)
    }

    /// Forgets the key everywhere and drops the client.
    pub fn delete_key(&self) -> DeletionReport {
        let report = self.credentials.delete_all();
        self.backend.store(None);
        report
    }

    fn install_key(&self, key: ApiKey, source: KeySource) -> Result<()> {
        let client = OpenAiClient::new(key, &self.client_config)?;
        self.backend.store(Some(Arc::new(Backend {
            synthesizer: Box::new(client),
            source: Some(source),
        })));
        Ok(())
    }

    pub fn build_request(&self, text: &str, options: &SynthesisOptions) -> Result<SpeechRequest> {
        SpeechRequestBuilder::new(text)
            .options(options.clone())
            .max_input_chars(self.max_input_chars)
            .build()
    }

    fn synthesizer(&self) -> Result<Arc<Backend>> {
        self.backend.load_full().ok_or(TtsError::CredentialMissing)
    }

    /// Synthesizes `text` and streams the audio into `destination`.
    pub fn generate(
        &self,
        text: &str,
        options: &SynthesisOptions,
        destination: &Path,
    ) -> Result<GenerationReport> {
        let started = Instant::now();
        let request = self.build_request(text, options)?;
        let backend = self.synthesizer()?;

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                writer::ensure_output_dir(parent)?;
            }
        }

        info!(
            "Generating audio with voice {} and model {} ({} characters)",
            request.voice,
            request.model,
            request.input.chars().count()
        );
        let stream = backend.synthesizer.synthesize(&request)?;
        let bytes_written = writer::persist(stream, destination)?;

        Ok(GenerationReport {
            path: destination.to_path_buf(),
            bytes_written,
            elapsed: started.elapsed(),
            truncated_from: request.truncated_from,
        })
    }

    /// Fetches a short raw PCM clip of `text` into memory.
    pub fn preview(&self, text: &str, options: &SynthesisOptions) -> Result<Vec<u8>> {
        let sample = preview_sample(text);
        let options = SynthesisOptions {
            format: AudioFormat::Pcm,
            ..options.clone()
        };
        let request = self.build_request(&sample, &options)?;
        let backend = self.synthesizer()?;

        info!(
            "Previewing {} characters with voice {}",
            request.input.chars().count(),
            request.voice
        );
        let mut stream = backend.synthesizer.synthesize(&request)?;
        let mut clip = Vec::new();
        stream
            .read_to_end(&mut clip)
            .map_err(|e| TtsError::SynthesisFailed {
                status: None,
                message: format!("preview stream interrupted: {}", e),
            })?;
        info!("Preview received: {} bytes", clip.len());
        Ok(clip)
    }
}
