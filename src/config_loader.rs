use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::catalog::{self, AudioFormat, Model, Voice};

pub const DEFAULT_INSTRUCTIONS: &str = "Speak clearly, with a warm and narrative tone.";

/// Upper bound for `max_retries`.
pub const MAX_RETRIES: u32 = 10;

/// Values given on the command line. `None` keeps the loaded setting.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<Model>,
    pub voice: Option<Voice>,
    pub format: Option<AudioFormat>,
    pub speed: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    // Synthesis defaults
    pub voice: Voice,
    pub model: Model,
    pub format: AudioFormat,
    pub speed: f32,
    // Locations
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub instructions_file: PathBuf,
    pub default_instructions: String,
    pub log_dir: PathBuf,
    // Credentials
    pub env_file: PathBuf,
    pub api_key_env: String,
    // Remote endpoint
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    // Text limits
    pub max_input_chars: usize, // longer input is truncated with a warning
    pub min_text_chars: usize,  // batch files shorter than this are skipped
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voice: Voice::Coral,
            model: Model::Gpt4oMiniTts,
            format: AudioFormat::Mp3,
            speed: catalog::DEFAULT_SPEED,
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            instructions_file: PathBuf::from("instructions.txt"),
            default_instructions: DEFAULT_INSTRUCTIONS.to_string(),
            log_dir: PathBuf::from("logs"),
            env_file: PathBuf::from(".env"),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_base_url: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: 120,
            max_retries: 2,
            max_input_chars: 4096,
            min_text_chars: 10,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        Self::load(None)
    }

    /// Defaults, then `UniversalTts.*` in the working directory, then the
    /// per-user file, then `explicit`, then `UTTS_*` environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, config::ConfigError> {
        let d = Settings::default();
        let mut builder = Config::builder()
            .set_default("voice", d.voice.as_str())?
            .set_default("model", d.model.as_str())?
            .set_default("format", d.format.as_str())?
            .set_default("speed", d.speed as f64)?
            .set_default("input_dir", path_default(&d.input_dir))?
            .set_default("output_dir", path_default(&d.output_dir))?
            .set_default("instructions_file", path_default(&d.instructions_file))?
            .set_default("default_instructions", d.default_instructions.clone())?
            .set_default("log_dir", path_default(&d.log_dir))?
            .set_default("env_file", path_default(&d.env_file))?
            .set_default("api_key_env", d.api_key_env.clone())?
            .set_default("api_base_url", d.api_base_url.clone())?
            .set_default("request_timeout_secs", d.request_timeout_secs as i64)?
            .set_default("max_retries", d.max_retries as i64)?
            .set_default("max_input_chars", d.max_input_chars as i64)?
            .set_default("min_text_chars", d.min_text_chars as i64)?
            .add_source(File::with_name("UniversalTts").required(false));

        if let Some(user_config) = user_config_path() {
            builder = builder
                .add_source(File::with_name(&user_config.to_string_lossy()).required(false));
        }
        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        // e.g. UTTS_VOICE=nova, UTTS_OUTPUT_DIR=/tmp/audio
        let settings: Settings = builder
            .add_source(Environment::with_prefix("UTTS"))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Applies command-line values on top of the loaded settings. When only
    /// the model changes and the configured voice does not fit it, the first
    /// voice of the new model is used.
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<(), config::ConfigError> {
        if let Some(model) = overrides.model {
            self.model = model;
        }
        match overrides.voice {
            Some(voice) => self.voice = voice,
            None if !catalog::is_compatible(self.voice, self.model) => {
                let voice = catalog::first_compatible_voice(self.model);
                warn!(
                    "Voice '{}' is not available for {}. Using '{}'",
                    self.voice, self.model, voice
                );
                self.voice = voice;
            }
            None => {}
        }
        if let Some(format) = overrides.format {
            self.format = format;
        }
        if let Some(speed) = overrides.speed {
            self.speed = speed;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if !self.speed.is_finite() {
            return Err(config::ConfigError::Message(format!(
                "Invalid speed: {}. Must be a number between {} and {}",
                self.speed,
                catalog::MIN_SPEED,
                catalog::MAX_SPEED
            )));
        }
        if self.max_input_chars == 0 {
            return Err(config::ConfigError::Message(
                "max_input_chars must be greater than 0".to_string(),
            ));
        }
        if self.max_retries > MAX_RETRIES {
            return Err(config::ConfigError::Message(format!(
                "max_retries must be at most {}",
                MAX_RETRIES
            )));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "api_base_url must not be empty".to_string(),
            ));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "api_key_env must name an environment variable".to_string(),
            ));
        }
        if !catalog::is_compatible(self.voice, self.model) {
            return Err(config::ConfigError::Message(format!(
                "Voice '{}' is not available for model '{}'",
                self.voice, self.model
            )));
        }
        Ok(())
    }
}

fn path_default(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("universal-tts").join("UniversalTts"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_config_load() {
        let settings = Settings::new().expect("Failed to load settings");
        assert!(settings.max_input_chars > 0);
        assert!(catalog::is_compatible(settings.voice, settings.model));
    }

    #[test]
    #[serial]
    fn explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "voice = \"nova\"\nmodel = \"tts-1\"\nspeed = 1.5").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.voice, Voice::Nova);
        assert_eq!(settings.model, Model::Tts1);
        assert!((settings.speed - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    #[serial]
    fn incompatible_pair_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "voice = \"verse\"\nmodel = \"tts-1-hd\"").unwrap();

        assert!(Settings::load(Some(file.path())).is_err());
    }

    #[test]
    #[serial]
    fn environment_overrides_files() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "voice = \"echo\"\nmax_input_chars = 100").unwrap();

        std::env::set_var("UTTS_VOICE", "nova");
        std::env::set_var("UTTS_MAX_INPUT_CHARS", "2000");
        std::env::set_var("UTTS_OUTPUT_DIR", "/tmp/audio");
        let loaded = Settings::load(Some(file.path()));
        std::env::remove_var("UTTS_VOICE");
        std::env::remove_var("UTTS_MAX_INPUT_CHARS");
        std::env::remove_var("UTTS_OUTPUT_DIR");

        let settings = loaded.unwrap();
        assert_eq!(settings.voice, Voice::Nova);
        assert_eq!(settings.max_input_chars, 2000);
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/audio"));
    }

    #[test]
    fn model_override_replaces_unfit_voice() {
        let mut settings = Settings {
            voice: Voice::Verse,
            ..Settings::default()
        };
        settings
            .apply_overrides(&Overrides {
                model: Some(Model::Tts1),
                ..Overrides::default()
            })
            .unwrap();
        assert_eq!(settings.model, Model::Tts1);
        assert_eq!(settings.voice, catalog::first_compatible_voice(Model::Tts1));
    }

    #[test]
    fn model_override_keeps_fitting_voice() {
        let mut settings = Settings {
            voice: Voice::Coral,
            ..Settings::default()
        };
        settings
            .apply_overrides(&Overrides {
                model: Some(Model::Tts1Hd),
                format: Some(AudioFormat::Wav),
                speed: Some(2.0),
                ..Overrides::default()
            })
            .unwrap();
        assert_eq!(settings.voice, Voice::Coral);
        assert_eq!(settings.format, AudioFormat::Wav);
        assert!((settings.speed - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn explicit_unfit_voice_is_rejected() {
        let mut settings = Settings::default();
        let result = settings.apply_overrides(&Overrides {
            model: Some(Model::Tts1),
            voice: Some(Voice::Ballad),
            ..Overrides::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn validate_bounds_retries() {
        let settings = Settings {
            max_retries: MAX_RETRIES + 1,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_limit() {
        let settings = Settings {
            max_input_chars: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_nan_speed() {
        let settings = Settings {
            speed: f32::NAN,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
