use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::catalog::{AudioFormat, Voice};
use crate::error::{Result, TtsError};

const CHUNK_SIZE: usize = 8 * 1024;

/// Copies `reader` into `destination` chunk by chunk and returns the bytes written.
///
/// A failure part-way through leaves the partial file on disk.
pub fn persist<R: Read>(mut reader: R, destination: &Path) -> Result<u64> {
    let file = File::create(destination).map_err(|e| TtsError::io(destination, e))?;
    let mut out = BufWriter::new(file);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TtsError::io(destination, e)),
        };
        out.write_all(&buf[..n])
            .map_err(|e| TtsError::io(destination, e))?;
        bytes_written += n as u64;
    }

    out.flush().map_err(|e| TtsError::io(destination, e))?;
    info!(
        "Audio file saved: {}, Size: {} bytes",
        destination.display(),
        bytes_written
    );
    Ok(bytes_written)
}

pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| TtsError::io(dir, e))
}

/// `{stem}_{voice}_{timestamp}.{ext}` for file input, `speech_{voice}_{timestamp}.{ext}` otherwise.
pub fn output_file_name(
    stem: Option<&str>,
    voice: Voice,
    format: AudioFormat,
    now: DateTime<Local>,
) -> String {
    let timestamp = now.format("%Y%m%d_%H%M%S");
    let base = stem.unwrap_or("speech");
    format!("{}_{}_{}.{}", base, voice, timestamp, format.extension())
}

/// `dir/name`, or `dir/name_N` with the first free N when the name is taken.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let extension = as_path.extension().and_then(|s| s.to_str());

    let mut counter = 1;
    loop {
        let name = match extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            debug!("Output name taken, using {}", candidate.display());
            return candidate;
        }
        counter += 1;
    }
}
