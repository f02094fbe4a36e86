use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::{Model, Voice};

pub type Result<T> = std::result::Result<T, TtsError>;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("No API key configured. Set OPENAI_API_KEY or run `universal-tts key set`")]
    CredentialMissing,

    #[error("Unsupported file type '{extension}': {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("Voice '{voice}' is not compatible with model '{model}'")]
    IncompatibleVoiceModel { voice: Voice, model: Model },

    #[error("No text to synthesize")]
    EmptyInput,

    #[error("Speech synthesis failed: {message}")]
    SynthesisFailed {
        status: Option<u16>,
        message: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not extract text from {path}: {message}")]
    Document { path: PathBuf, message: String },

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl TtsError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn document(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Document {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Transport failures, throttling and server errors are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SynthesisFailed { status: None, .. } => true,
            Self::SynthesisFailed {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TtsError {
    fn from(source: reqwest::Error) -> Self {
        Self::SynthesisFailed {
            status: source.status().map(|s| s.as_u16()),
            message: source.to_string(),
        }
    }
}
