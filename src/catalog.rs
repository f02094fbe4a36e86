//! Models, voices and audio formats offered by the speech endpoint, and the
//! table of which voices each model accepts.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 4.0;
pub const DEFAULT_SPEED: f32 = 1.0;

/// Marker appended to special voices in listings.
pub const SPECIAL_MARKER: &str = " *";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
pub enum Model {
    /// Newest model; accepts every voice and free-text instructions
    #[default]
    #[serde(rename = "gpt-4o-mini-tts")]
    #[value(name = "gpt-4o-mini-tts")]
    Gpt4oMiniTts,
    /// Standard quality, lower latency
    #[serde(rename = "tts-1")]
    #[value(name = "tts-1")]
    Tts1,
    /// High definition quality
    #[serde(rename = "tts-1-hd")]
    #[value(name = "tts-1-hd")]
    Tts1Hd,
}

impl Model {
    pub const ALL: [Model; 3] = [Model::Gpt4oMiniTts, Model::Tts1, Model::Tts1Hd];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oMiniTts => "gpt-4o-mini-tts",
            Self::Tts1 => "tts-1",
            Self::Tts1Hd => "tts-1-hd",
        }
    }

    /// Only the legacy models honour the speed parameter.
    pub fn supports_speed(&self) -> bool {
        matches!(self, Self::Tts1 | Self::Tts1Hd)
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gpt-4o-mini-tts" => Ok(Self::Gpt4oMiniTts),
            "tts-1" => Ok(Self::Tts1),
            "tts-1-hd" => Ok(Self::Tts1Hd),
            other => Err(format!("unknown model '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    #[default]
    Alloy,
    Echo,
    Fable,
    Onyx,
    Nova,
    Shimmer,
    Ash,
    Ballad,
    Coral,
    Sage,
    Verse,
}

const COMMON_VOICES: [Voice; 6] = [
    Voice::Alloy,
    Voice::Echo,
    Voice::Fable,
    Voice::Onyx,
    Voice::Nova,
    Voice::Shimmer,
];

const ALL_VOICES: [Voice; 11] = [
    Voice::Alloy,
    Voice::Echo,
    Voice::Fable,
    Voice::Onyx,
    Voice::Nova,
    Voice::Shimmer,
    Voice::Ash,
    Voice::Ballad,
    Voice::Coral,
    Voice::Sage,
    Voice::Verse,
];

const LEGACY_VOICES: [Voice; 9] = [
    Voice::Alloy,
    Voice::Echo,
    Voice::Fable,
    Voice::Onyx,
    Voice::Nova,
    Voice::Shimmer,
    Voice::Ash,
    Voice::Coral,
    Voice::Sage,
];

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Echo => "echo",
            Self::Fable => "fable",
            Self::Onyx => "onyx",
            Self::Nova => "nova",
            Self::Shimmer => "shimmer",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Sage => "sage",
            Self::Verse => "verse",
        }
    }

    pub fn all() -> &'static [Voice] {
        &ALL_VOICES
    }

    pub fn is_special(&self) -> bool {
        !COMMON_VOICES.contains(self)
    }

    /// Name as shown in listings, with the special marker where it applies.
    pub fn display_name(&self) -> String {
        if self.is_special() {
            format!("{}{}", self.as_str(), SPECIAL_MARKER)
        } else {
            self.as_str().to_string()
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_end_matches(SPECIAL_MARKER).trim().to_lowercase();
        ALL_VOICES
            .iter()
            .copied()
            .find(|v| v.as_str() == name)
            .ok_or_else(|| format!("unknown voice '{}'", name))
    }
}

/// Voices the given model accepts.
pub fn voices_for(model: Model) -> &'static [Voice] {
    match model {
        Model::Gpt4oMiniTts => &ALL_VOICES,
        Model::Tts1 | Model::Tts1Hd => &LEGACY_VOICES,
    }
}

pub fn is_compatible(voice: Voice, model: Model) -> bool {
    voices_for(model).contains(&voice)
}

/// Fallback when a previously chosen voice no longer fits the model.
pub fn first_compatible_voice(model: Model) -> Voice {
    voices_for(model)[0]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Opus,
    Aac,
    Flac,
    Wav,
    /// Raw 24kHz 16-bit mono little-endian samples
    Pcm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "opus" => Ok(Self::Opus),
            "aac" => Ok(Self::Aac),
            "flac" => Ok(Self::Flac),
            "wav" => Ok(Self::Wav),
            "pcm" => Ok(Self::Pcm),
            other => Err(format!("unknown audio format '{}'", other)),
        }
    }
}
