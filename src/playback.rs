use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tracing::debug;

/// Raw `pcm` responses are 24 kHz, mono, signed 16-bit little endian.
pub const PCM_SAMPLE_RATE: u32 = 24_000;
pub const PCM_CHANNELS: u16 = 1;

pub fn pcm_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Plays a preview clip on the default output device and waits for it to end.
pub fn play_pcm(bytes: &[u8]) -> Result<(), String> {
    let samples = pcm_samples(bytes);
    debug!("Playing {} PCM samples", samples.len());

    let (_stream, handle) =
        OutputStream::try_default().map_err(|e| format!("No audio output device: {}", e))?;
    let sink = Sink::try_new(&handle).map_err(|e| format!("Failed to create sink: {}", e))?;
    sink.append(SamplesBuffer::new(PCM_CHANNELS, PCM_SAMPLE_RATE, samples));
    sink.sleep_until_end();
    Ok(())
}
