//! universal-tts - convert text and documents to speech files
//!
//! Text comes from the command line or from .txt/.docx/.pdf files and is
//! sent to an OpenAI-compatible speech endpoint; the audio is saved locally.

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::info;

use universal_tts::batch::{self, BatchJob};
use universal_tts::catalog::{self, AudioFormat, Model, Voice};
use universal_tts::config_loader::{Overrides, Settings};
use universal_tts::controller::{Command, Controller, ControllerEvent};
use universal_tts::credentials::{ApiKey, CredentialManager, KeyDestination};
use universal_tts::document;
use universal_tts::logging;
use universal_tts::request::SynthesisOptions;
use universal_tts::service::{GenerationReport, TtsService};
use universal_tts::writer;

/// Text and document to speech converter
#[derive(Parser)]
#[command(name = "universal-tts")]
#[command(version)]
#[command(about = "Convert text, DOCX and PDF files to speech", long_about = None)]
struct Cli {
    #[command(flatten)]
    shared: SharedOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SharedOptions {
    /// Voice to use
    #[arg(long, global = true, value_enum)]
    voice: Option<Voice>,
    /// Synthesis model
    #[arg(long, global = true, value_enum)]
    model: Option<Model>,
    /// Output audio format
    #[arg(long, global = true, value_enum)]
    format: Option<AudioFormat>,
    /// Speaking speed (0.25-4.0, tts-1 and tts-1-hd only)
    #[arg(long, global = true)]
    speed: Option<f32>,
    /// Voice instructions, overrides the instructions file
    #[arg(long, global = true)]
    instructions: Option<String>,
    /// File to read voice instructions from
    #[arg(long, global = true)]
    instructions_file: Option<PathBuf>,
    /// Extra configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert text or a single document to an audio file
    Speak {
        /// Text to speak
        text: Option<String>,
        /// Read the text from a .txt, .docx or .pdf file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Where to save the audio (default: output dir, generated name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert every file in the input directory
    Batch {
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Synthesize a short sample of the text
    Preview {
        /// Text to preview
        text: Option<String>,
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Save the raw PCM clip (24 kHz mono s16le)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List voices for each model
    Voices,

    /// Manage the API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Line-driven session with persistent voice settings
    Interactive,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Show where the active key comes from
    Status,
    /// Store a new key
    Set {
        key: String,
        #[arg(long, value_enum, default_value = "env-file")]
        store: KeyDestination,
    },
    /// Remove the key from every location
    Delete,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.shared.config.as_deref())?;
    let log = logging::init(&settings.log_dir);
    apply_overrides(&mut settings, &cli.shared)?;

    let result = run(cli, &settings);
    if let Err(e) = &result {
        tracing::error!("{}", e);
    }
    drop(log);
    result
}

fn run(cli: Cli, settings: &Settings) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Voices => {
            print_voices(cli.shared.model);
            return Ok(());
        }
        Commands::Key { action } => return key_command(action, settings),
        _ => {}
    }

    let options = synthesis_options(settings, &cli.shared);
    let service = TtsService::new(settings, CredentialManager::from_settings(settings));

    match cli.command {
        Commands::Speak { text, file, output } => {
            let (text, stem) = input_text(text, file.as_deref(), settings.min_text_chars)?;
            let destination = match output {
                Some(path) => path,
                None => {
                    writer::ensure_output_dir(&settings.output_dir)?;
                    let name = writer::output_file_name(
                        stem.as_deref(),
                        options.voice,
                        options.format,
                        Local::now(),
                    );
                    writer::unique_path(&settings.output_dir, &name)
                }
            };
            println!("Generating audio...");
            let report = service.generate(&text, &options, &destination)?;
            print_report(&report);
        }

        Commands::Batch {
            input_dir,
            output_dir,
        } => {
            let input_dir = input_dir.unwrap_or_else(|| settings.input_dir.clone());
            let output_dir = output_dir.unwrap_or_else(|| settings.output_dir.clone());
            let summary = batch::run(
                &service,
                &BatchJob {
                    input_dir: &input_dir,
                    output_dir: &output_dir,
                    options: &options,
                    min_text_chars: settings.min_text_chars,
                },
            )?;

            println!();
            println!("Batch Summary");
            println!("─────────────");
            println!("{} processed", summary.processed_count());
            println!("{} skipped", summary.skipped.len());
            println!("{} failed", summary.failures.len());
            for failure in &summary.failures {
                println!("  {}: {}", failure.path.display(), failure.error);
            }
            println!("Total time:   {:.2} s", summary.elapsed.as_secs_f64());
            if let Some(average) = summary.average() {
                println!("Per file:     {:.2} s", average.as_secs_f64());
            }
            println!("Output:       {}", output_dir.display());
        }

        Commands::Preview { text, file, output } => {
            let (text, _) = input_text(text, file.as_deref(), settings.min_text_chars)?;
            println!("Generating preview...");
            let clip = service.preview(&text, &options)?;
            println!("Preview received: {} bytes", clip.len());
            if let Some(path) = output {
                std::fs::write(&path, &clip)?;
                println!("Saved to {}", path.display());
            }
            play_clip(&clip);
        }

        Commands::Interactive => interactive(service, options, settings)?,
        Commands::Voices | Commands::Key { .. } => {}
    }
    Ok(())
}

/// Command-line flags win over every configuration source.
fn apply_overrides(settings: &mut Settings, shared: &SharedOptions) -> Result<(), Box<dyn Error>> {
    settings.apply_overrides(&Overrides {
        model: shared.model,
        voice: shared.voice,
        format: shared.format,
        speed: shared.speed,
    })?;
    Ok(())
}

fn synthesis_options(settings: &Settings, shared: &SharedOptions) -> SynthesisOptions {
    let instructions = match &shared.instructions {
        Some(text) => text.clone(),
        None => {
            let path = shared
                .instructions_file
                .as_deref()
                .unwrap_or(&settings.instructions_file);
            batch::load_instructions(path, &settings.default_instructions)
        }
    };
    SynthesisOptions {
        model: settings.model,
        voice: settings.voice,
        format: settings.format,
        speed: settings.speed,
        instructions: Some(instructions),
    }
}

/// Text from the argument or the file, plus the file stem for naming output.
fn input_text(
    text: Option<String>,
    file: Option<&Path>,
    min_text_chars: usize,
) -> Result<(String, Option<String>), Box<dyn Error>> {
    match (text, file) {
        (_, Some(path)) => {
            let text = batch::read_source(path, min_text_chars)?
                .ok_or_else(|| format!("File is empty or too short: {}", path.display()))?;
            info!("Read {} characters from {}", text.chars().count(), path.display());
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned());
            Ok((text, stem))
        }
        (Some(text), None) => Ok((text, None)),
        (None, None) => Err(format!(
            "Provide text or --file ({})",
            document::SUPPORTED_EXTENSIONS.join(", ")
        )
        .into()),
    }
}

fn print_report(report: &GenerationReport) {
    if let Some(original) = report.truncated_from {
        println!("Note: text was truncated from {} characters", original);
    }
    println!("Audio saved to {}", report.path.display());
    println!(
        "Size: {:.2} KB, generated in {:.2} s",
        report.bytes_written as f64 / 1024.0,
        report.elapsed.as_secs_f64()
    );
}

fn print_voices(model: Option<Model>) {
    let models: Vec<Model> = match model {
        Some(m) => vec![m],
        None => Model::ALL.to_vec(),
    };
    for model in models {
        println!("{}", model);
        for voice in catalog::voices_for(model) {
            println!("  {}", voice.display_name());
        }
    }
    println!();
    println!("* special voice");
}

fn key_command(action: KeyAction, settings: &Settings) -> Result<(), Box<dyn Error>> {
    let credentials = CredentialManager::from_settings(settings);
    match action {
        KeyAction::Status => {
            match credentials.status() {
                Some(source) => println!("API key configured ({})", source),
                None => println!("No API key configured"),
            }
            println!(
                "Credential manager: {}",
                if credentials.is_store_available() {
                    "available"
                } else {
                    "not available"
                }
            );
        }
        KeyAction::Set { key, store } => {
            let key = ApiKey::new(key).ok_or("API key must not be empty")?;
            let source = credentials.save(key, store)?;
            println!("API key saved ({})", source);
        }
        KeyAction::Delete => print_deletion(&credentials.delete_all()),
    }
    Ok(())
}

fn print_deletion(report: &universal_tts::credentials::DeletionReport) {
    if report.removed.is_empty() && report.failed.is_empty() {
        println!("No API key was stored");
    }
    for line in &report.removed {
        println!("  {}", line);
    }
    for line in &report.failed {
        println!("  Failed: {}", line);
    }
}

#[cfg(feature = "playback")]
fn play_clip(clip: &[u8]) {
    println!("Playing preview...");
    if let Err(e) = universal_tts::playback::play_pcm(clip) {
        eprintln!("Playback failed: {}", e);
    }
}

#[cfg(not(feature = "playback"))]
fn play_clip(_clip: &[u8]) {
    info!("Built without the playback feature; clip not played");
}

const INTERACTIVE_HELP: &str = "\
Commands:
  say <text>           generate audio from text
  file <path>          load a .txt, .docx or .pdf file
  generate             generate audio from the loaded file
  preview [text]       preview text (or the loaded file)
  voice <name>         change voice
  model <name>         change model
  format <name>        change output format
  speed <value>        change speed (tts-1 and tts-1-hd only)
  instructions <text>  change voice instructions
  key set <key> [keyring|env-file|session]
  key delete | key status
  settings             show current settings
  voices               list voices for the current model
  help | quit";

fn interactive(
    service: TtsService,
    mut options: SynthesisOptions,
    settings: &Settings,
) -> Result<(), Box<dyn Error>> {
    let (controller, events) = Controller::new(Arc::new(service));
    let mut loaded: Option<(String, Option<String>)> = None;

    println!("universal-tts interactive mode. Type 'help' for commands.");
    if !controller.service().has_client() {
        println!("No API key configured. Use 'key set <key>' to add one.");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "tts> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((c, r)) => (c, r.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "quit" | "exit" => break,
            "help" => println!("{}", INTERACTIVE_HELP),
            "settings" => print_settings(&options),
            "voices" => print_voices(Some(options.model)),
            "voice" => match rest.parse::<Voice>() {
                Ok(voice) if catalog::is_compatible(voice, options.model) => {
                    options.voice = voice;
                    println!("Voice: {}", voice);
                }
                Ok(voice) => println!("'{}' is not available for {}", voice, options.model),
                Err(e) => println!("{}", e),
            },
            "model" => match rest.parse::<Model>() {
                Ok(model) => {
                    options.model = model;
                    if !catalog::is_compatible(options.voice, model) {
                        options.voice = catalog::first_compatible_voice(model);
                        println!("Voice changed to {}", options.voice);
                    }
                    if !model.supports_speed() {
                        println!("Speed is ignored for {}", model);
                    }
                    println!("Model: {}", model);
                }
                Err(e) => println!("{}", e),
            },
            "format" => match rest.parse::<AudioFormat>() {
                Ok(format) => {
                    options.format = format;
                    println!("Format: {}", format);
                }
                Err(e) => println!("{}", e),
            },
            "speed" => match rest.parse::<f32>() {
                Ok(speed) => {
                    options.speed = speed;
                    println!("Speed: {}", speed);
                }
                Err(_) => println!(
                    "Speed must be a number between {} and {}",
                    catalog::MIN_SPEED,
                    catalog::MAX_SPEED
                ),
            },
            "instructions" => {
                options.instructions = Some(rest.to_string()).filter(|s| !s.is_empty());
                println!("Instructions updated");
            }
            "file" => match batch::read_source(Path::new(rest), settings.min_text_chars) {
                Ok(None) => println!("File is empty or too short: {}", rest),
                Ok(Some(text)) => {
                    println!("{}", document::file_preview(&text));
                    println!("Loaded {} characters", text.chars().count());
                    let stem = Path::new(rest)
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned());
                    loaded = Some((text, stem));
                }
                Err(e) => println!("Error: {}", e),
            },
            "say" | "generate" => {
                let (text, stem) = if command == "say" {
                    (rest.to_string(), None)
                } else {
                    match &loaded {
                        Some((text, stem)) => (text.clone(), stem.clone()),
                        None => {
                            println!("No file loaded. Use 'file <path>' first");
                            continue;
                        }
                    }
                };
                if let Err(e) = writer::ensure_output_dir(&settings.output_dir) {
                    println!("Error: {}", e);
                    continue;
                }
                let name = writer::output_file_name(
                    stem.as_deref(),
                    options.voice,
                    options.format,
                    Local::now(),
                );
                let destination = writer::unique_path(&settings.output_dir, &name);
                let id = controller.submit(Command::Generate {
                    text,
                    options: options.clone(),
                    destination,
                });
                wait_for(&events, id);
            }
            "preview" => {
                let text = if rest.is_empty() {
                    loaded.as_ref().map(|(text, _)| text.clone()).unwrap_or_default()
                } else {
                    rest.to_string()
                };
                let id = controller.submit(Command::Preview {
                    text,
                    options: options.clone(),
                });
                wait_for(&events, id);
            }
            "key" => key_interactive(&controller, rest),
            other => println!("Unknown command '{}'. Type 'help'", other),
        }
    }
    Ok(())
}

/// Prints events until `id` finishes.
fn wait_for(events: &Receiver<ControllerEvent>, id: u64) {
    while let Ok(event) = events.recv() {
        let done = event.id() == id && event.is_terminal();
        match event {
            ControllerEvent::Started { .. } => println!("Working..."),
            ControllerEvent::Completed { report, .. } => print_report(&report),
            ControllerEvent::PreviewReady { bytes, .. } => {
                println!("Preview received: {} bytes", bytes.len());
                play_clip(&bytes);
            }
            ControllerEvent::Failed { message, .. } => println!("Error: {}", message),
        }
        if done {
            break;
        }
    }
}

fn key_interactive(controller: &Controller, args: &str) {
    let mut parts = args.split_whitespace();
    match parts.next() {
        Some("status") => match controller.service().key_source() {
            Some(source) => println!("API key active ({})", source),
            None => println!("No API key configured"),
        },
        Some("delete") => print_deletion(&controller.delete_key()),
        Some("set") => {
            let Some(key) = parts.next().and_then(ApiKey::new) else {
                println!("Usage: key set <key> [keyring|env-file|session]");
                return;
            };
            let destination = match parts.next() {
                None | Some("env-file") => KeyDestination::EnvFile,
                Some("keyring") => KeyDestination::CredentialStore,
                Some("session") => KeyDestination::Session,
                Some(other) => {
                    println!("Unknown key store '{}'", other);
                    return;
                }
            };
            match controller.update_key(key, destination) {
                Ok(source) => println!("API key saved ({})", source),
                Err(e) => println!("Error: {}", e),
            }
        }
        _ => println!("Usage: key set <key> [store] | key delete | key status"),
    }
}

fn print_settings(options: &SynthesisOptions) {
    println!("Model:        {}", options.model);
    println!("Voice:        {}", options.voice.display_name());
    println!("Format:       {}", options.format);
    if options.model.supports_speed() {
        println!("Speed:        {}", options.speed);
    } else {
        println!("Speed:        n/a for {}", options.model);
    }
    println!(
        "Instructions: {}",
        options.instructions.as_deref().unwrap_or("(none)")
    );
}
