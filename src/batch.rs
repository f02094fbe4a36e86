use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::document;
use crate::error::{Result, TtsError};
use crate::request::SynthesisOptions;
use crate::service::{GenerationReport, TtsService};
use crate::writer;

pub struct BatchFailure {
    pub path: PathBuf,
    pub error: TtsError,
}

#[derive(Default)]
pub struct BatchSummary {
    pub processed: Vec<GenerationReport>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<BatchFailure>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn total_files(&self) -> usize {
        self.processed.len() + self.skipped.len() + self.failures.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.processed.iter().map(|r| r.bytes_written).sum()
    }

    /// Mean wall time per successfully processed file.
    pub fn average(&self) -> Option<Duration> {
        match self.processed.len() {
            0 => None,
            n => Some(self.elapsed / n as u32),
        }
    }
}

pub struct BatchJob<'a> {
    pub input_dir: &'a Path,
    pub output_dir: &'a Path,
    pub options: &'a SynthesisOptions,
    /// Files whose text is shorter than this are skipped.
    pub min_text_chars: usize,
}

/// Instructions from `path` when it exists and is non-empty, else `fallback`.
pub fn load_instructions(path: &Path, fallback: &str) -> String {
    if path.exists() {
        match document::read_txt(path) {
            Ok(text) if !text.is_empty() => {
                info!("Loaded instructions from {}", path.display());
                return text;
            }
            Ok(_) => warn!("Instructions file {} is empty", path.display()),
            Err(e) => warn!("Could not read instructions file: {}", e),
        }
    } else {
        info!(
            "No instructions file found at {}. Using default instructions",
            path.display()
        );
    }
    fallback.to_string()
}

/// Text of `path`, or `None` when it is shorter than `min_text_chars`.
pub fn read_source(path: &Path, min_text_chars: usize) -> Result<Option<String>> {
    let text = document::read_document(path)?;
    if text.trim().chars().count() < min_text_chars {
        return Ok(None);
    }
    Ok(Some(text))
}

/// Regular, non-hidden files directly inside `dir`, sorted by name.
pub fn input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| TtsError::io(dir, e))? {
        let entry = entry.map_err(|e| TtsError::io(dir, e))?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Converts every file in the input directory. A failing file is logged and
/// recorded; the rest of the batch still runs.
pub fn run(service: &TtsService, job: &BatchJob<'_>) -> Result<BatchSummary> {
    let started = Instant::now();
    let mut summary = BatchSummary::default();

    if !job.input_dir.exists() {
        writer::ensure_output_dir(job.input_dir)?;
        warn!("Created empty input directory {}", job.input_dir.display());
    }
    writer::ensure_output_dir(job.output_dir)?;

    let files = input_files(job.input_dir)?;
    if files.is_empty() {
        warn!("No files found in the input folder: {}", job.input_dir.display());
        return Ok(summary);
    }

    info!(
        "Starting batch processing at {}",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("Found {} files to process", files.len());

    for (i, path) in files.iter().enumerate() {
        info!("[{}/{}] Processing: {}", i + 1, files.len(), display_name(path));
        match process_file(service, job, path) {
            Ok(Some(report)) => {
                info!(
                    "Audio saved to {} ({:.2} KB in {:.2} s)",
                    report.path.display(),
                    report.bytes_written as f64 / 1024.0,
                    report.elapsed.as_secs_f64()
                );
                summary.processed.push(report);
            }
            Ok(None) => {
                warn!("File is empty or too short: {}", display_name(path));
                summary.skipped.push(path.clone());
            }
            Err(e) => {
                error!("Error with file {}: {}", display_name(path), e);
                summary.failures.push(BatchFailure {
                    path: path.clone(),
                    error: e,
                });
            }
        }
    }

    summary.elapsed = started.elapsed();
    info!(
        "Batch processing completed in {:.2} seconds: {} processed, {} skipped, {} failed",
        summary.elapsed.as_secs_f64(),
        summary.processed_count(),
        summary.skipped.len(),
        summary.failures.len()
    );
    Ok(summary)
}

fn process_file(
    service: &TtsService,
    job: &BatchJob<'_>,
    path: &Path,
) -> Result<Option<GenerationReport>> {
    let Some(text) = read_source(path, job.min_text_chars)? else {
        return Ok(None);
    };
    info!("Text length: {} characters", text.chars().count());

    let stem = path.file_stem().and_then(|s| s.to_str());
    let name = writer::output_file_name(stem, job.options.voice, job.options.format, Local::now());
    let destination = writer::unique_path(job.output_dir, &name);
    service.generate(&text, job.options, &destination).map(Some)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn instructions_fall_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("instructions.txt");
        assert_eq!(load_instructions(&path, "default"), "default");

        fs::write(&path, "  Calm and slow.\n").unwrap();
        assert_eq!(load_instructions(&path, "default"), "Calm and slow.");

        fs::write(&path, "\n").unwrap();
        assert_eq!(load_instructions(&path, "default"), "default");
    }

    #[test]
    fn hidden_files_and_directories_are_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join(".DS_Store"), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let files = input_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.txt"), dir.path().join("b.txt")]
        );
    }

    #[test]
    fn short_sources_are_rejected() {
        let dir = tempdir().unwrap();
        let short = dir.path().join("short.txt");
        let long = dir.path().join("long.txt");
        fs::write(&short, "  too few \n").unwrap();
        fs::write(&long, "Long enough to read aloud.").unwrap();

        assert_eq!(read_source(&short, 10).unwrap(), None);
        assert_eq!(
            read_source(&long, 10).unwrap().as_deref(),
            Some("Long enough to read aloud.")
        );
        assert!(matches!(
            read_source(&dir.path().join("a.odt"), 10),
            Err(TtsError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn average_ignores_empty_batches() {
        let summary = BatchSummary::default();
        assert_eq!(summary.average(), None);
        assert_eq!(summary.total_files(), 0);
    }
}
