//! Command layer for interactive front ends. Every command runs on its own
//! worker thread and reports back through a channel, so the caller's loop
//! never blocks on the network.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

use crate::catalog;
use crate::credentials::{ApiKey, DeletionReport, KeyDestination, KeySource};
use crate::error::{Result, TtsError};
use crate::request::SynthesisOptions;
use crate::service::{GenerationReport, TtsService};

#[derive(Debug, Clone)]
pub enum Command {
    Generate {
        text: String,
        options: SynthesisOptions,
        destination: PathBuf,
    },
    Preview {
        text: String,
        options: SynthesisOptions,
    },
}

impl Command {
    fn text(&self) -> &str {
        match self {
            Command::Generate { text, .. } | Command::Preview { text, .. } => text,
        }
    }

    fn options(&self) -> &SynthesisOptions {
        match self {
            Command::Generate { options, .. } | Command::Preview { options, .. } => options,
        }
    }
}

#[derive(Debug)]
pub enum ControllerEvent {
    Started { id: u64 },
    Completed { id: u64, report: GenerationReport },
    PreviewReady { id: u64, bytes: Vec<u8> },
    Failed { id: u64, message: String },
}

impl ControllerEvent {
    pub fn id(&self) -> u64 {
        match self {
            ControllerEvent::Started { id }
            | ControllerEvent::Completed { id, .. }
            | ControllerEvent::PreviewReady { id, .. }
            | ControllerEvent::Failed { id, .. } => *id,
        }
    }

    /// True for the last event a command produces.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ControllerEvent::Started { .. })
    }
}

pub struct Controller {
    service: Arc<TtsService>,
    tx: Sender<ControllerEvent>,
    next_id: AtomicU64,
}

impl Controller {
    /// The receiver belongs to the thread that owns the display.
    pub fn new(service: Arc<TtsService>) -> (Self, Receiver<ControllerEvent>) {
        let (tx, rx) = channel();
        let controller = Self {
            service,
            tx,
            next_id: AtomicU64::new(1),
        };
        (controller, rx)
    }

    pub fn service(&self) -> &TtsService {
        &self.service
    }

    /// Queues `command` and returns its id. Invalid commands fail right away
    /// without starting a worker.
    pub fn submit(&self, command: Command) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.validate(&command) {
            error!("Command {} rejected: {}", id, e);
            self.post(ControllerEvent::Failed {
                id,
                message: e.to_string(),
            });
            return id;
        }

        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(ControllerEvent::Started { id });
            let event = run(&service, id, command);
            if tx.send(event).is_err() {
                debug!("Command {} finished after the receiver went away", id);
            }
        });
        id
    }

    fn validate(&self, command: &Command) -> Result<()> {
        let options = command.options();
        if command.text().trim().is_empty() {
            return Err(TtsError::EmptyInput);
        }
        if !catalog::is_compatible(options.voice, options.model) {
            return Err(TtsError::IncompatibleVoiceModel {
                voice: options.voice,
                model: options.model,
            });
        }
        if !self.service.has_client() {
            return Err(TtsError::CredentialMissing);
        }
        Ok(())
    }

    fn post(&self, event: ControllerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn update_key(&self, key: ApiKey, destination: KeyDestination) -> Result<KeySource> {
        let source = self.service.update_key(key, destination)?;
        info!("API key updated ({})", source);
        Ok(source)
    }

    pub fn delete_key(&self) -> DeletionReport {
        let report = self.service.delete_key();
        info!(
            "API key deleted from {} location(s), {} failure(s)",
            report.removed.len(),
            report.failed.len()
        );
        report
    }
}

fn run(service: &TtsService, id: u64, command: Command) -> ControllerEvent {
    let outcome = match command {
        Command::Generate {
            text,
            options,
            destination,
        } => service
            .generate(&text, &options, &destination)
            .map(|report| ControllerEvent::Completed { id, report }),
        Command::Preview { text, options } => service
            .preview(&text, &options)
            .map(|bytes| ControllerEvent::PreviewReady { id, bytes }),
    };
    outcome.unwrap_or_else(|e| {
        error!("Command {} failed: {}", id, e);
        ControllerEvent::Failed {
            id,
            message: e.to_string(),
        }
    })
}
