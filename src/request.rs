use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{self, AudioFormat, Model, Voice};
use crate::error::{Result, TtsError};

/// Documented input limit of the speech endpoint.
pub const DEFAULT_MAX_INPUT_CHARS: usize = 4096;

/// Body of a speech synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    pub model: Model,
    pub voice: Voice,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub response_format: AudioFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    /// Original length in characters when the input had to be cut.
    #[serde(skip)]
    pub truncated_from: Option<usize>,
}

/// Per-call options shared by every front end.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOptions {
    pub model: Model,
    pub voice: Voice,
    pub format: AudioFormat,
    pub speed: f32,
    pub instructions: Option<String>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            model: Model::default(),
            voice: Voice::default(),
            format: AudioFormat::default(),
            speed: catalog::DEFAULT_SPEED,
            instructions: None,
        }
    }
}

pub struct SpeechRequestBuilder {
    text: String,
    options: SynthesisOptions,
    max_input_chars: usize,
}

impl SpeechRequestBuilder {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: SynthesisOptions::default(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }

    pub fn options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(mut self, model: Model) -> Self {
        self.options.model = model;
        self
    }

    pub fn voice(mut self, voice: Voice) -> Self {
        self.options.voice = voice;
        self
    }

    pub fn format(mut self, format: AudioFormat) -> Self {
        self.options.format = format;
        self
    }

    pub fn speed(mut self, speed: f32) -> Self {
        self.options.speed = speed;
        self
    }

    pub fn instructions(mut self, instructions: Option<String>) -> Self {
        self.options.instructions = instructions;
        self
    }

    pub fn max_input_chars(mut self, limit: usize) -> Self {
        self.max_input_chars = limit;
        self
    }

    pub fn build(self) -> Result<SpeechRequest> {
        let SynthesisOptions {
            model,
            voice,
            format,
            speed,
            instructions,
        } = self.options;

        if !catalog::is_compatible(voice, model) {
            return Err(TtsError::IncompatibleVoiceModel { voice, model });
        }
        if self.text.trim().is_empty() {
            return Err(TtsError::EmptyInput);
        }

        let (input, truncated_from) = truncate_chars(self.text, self.max_input_chars);
        if let Some(original) = truncated_from {
            warn!(
                "Text exceeds the {} character limit ({} chars). Truncating",
                self.max_input_chars, original
            );
        }

        let speed = if model.supports_speed() {
            let speed = clamp_speed(speed);
            info!("Using speed {} with compatible model {}", speed, model);
            Some(speed)
        } else {
            if (speed - catalog::DEFAULT_SPEED).abs() > f32::EPSILON {
                info!(
                    "Speed parameter ignored for model {} (only tts-1 and tts-1-hd honour it)",
                    model
                );
            }
            None
        };

        let instructions = instructions
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty());

        Ok(SpeechRequest {
            model,
            voice,
            input,
            instructions,
            response_format: format,
            speed,
            truncated_from,
        })
    }
}

/// Clamps into the accepted range; anything that is not a number becomes the default.
pub fn clamp_speed(speed: f32) -> f32 {
    if !speed.is_finite() {
        warn!("Speed value {} is not a number. Using {}", speed, catalog::DEFAULT_SPEED);
        return catalog::DEFAULT_SPEED;
    }
    let clamped = speed.clamp(catalog::MIN_SPEED, catalog::MAX_SPEED);
    if clamped != speed {
        warn!(
            "Speed value {} is out of range ({}-{}). Using {}",
            speed,
            catalog::MIN_SPEED,
            catalog::MAX_SPEED,
            clamped
        );
    }
    clamped
}

/// Cuts on a character boundary. Returns the original character count when cut.
fn truncate_chars(text: String, limit: usize) -> (String, Option<usize>) {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => {
            let original = text.chars().count();
            let mut text = text;
            text.truncate(byte_index);
            (text, Some(original))
        }
        None => (text, None),
    }
}

/// Short clip used for previews: the first line of the first 190
/// characters, widened to 100 characters when that line is very short.
pub fn preview_sample(text: &str) -> String {
    let head: String = text.chars().take(190).collect();
    let mut sample = match head.split_once('\n') {
        Some((first, _)) => first.to_string(),
        None => head,
    };
    if sample.chars().count() < 50 && text.chars().count() > 50 {
        sample = text.chars().take(100).collect();
    }
    sample
}
