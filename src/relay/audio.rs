//! PCM to WAV wrapping and WAV to Ogg/Opus transcoding.

use crate::error::AudioError;

use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

/// Speech parts arrive as 16-bit mono PCM.
pub const SPEECH_BITS_PER_SAMPLE: u16 = 16;
pub const SPEECH_CHANNELS: u16 = 1;

/// Upper bound for one `ffmpeg` run; the child is killed when it expires.
pub const ENCODER_TIMEOUT: Duration = Duration::from_secs(60);

const WAV_HEADER_LEN: usize = 44;

const FFMPEG_OGG_ARGS: &[&str] = &[
    "-hide_banner",
    "-loglevel",
    "error",
    "-i",
    "pipe:0",
    "-c:a",
    "libopus",
    "-b:a",
    "128k",
    "-f",
    "ogg",
    "pipe:1",
];

/// Codec and sample rate from a MIME type like `audio/L16;codec=pcm;rate=24000`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioFormat {
    pub codec: String,
    pub rate: u32,
}

impl AudioFormat {
    pub fn parse(mime_type: &str) -> Self {
        let mut format = AudioFormat::default();
        for parameter in mime_type.split(';').map(str::trim) {
            if let Some(codec) = parameter.strip_prefix("codec=") {
                format.codec = codec.to_ascii_lowercase();
            } else if let Some(rate) = parameter.strip_prefix("rate=") {
                format.rate = rate.parse().unwrap_or(0);
            }
        }
        format
    }

    pub fn is_pcm(&self) -> bool {
        self.codec == "pcm" && self.rate > 0
    }
}

/// Wrap raw little-endian signed PCM samples into a WAV file.
///
/// A trailing partial frame is dropped.
pub fn pcm_to_wav(
    pcm: &[u8],
    sample_rate: u32,
    bits_per_sample: u16,
    channels: u16,
) -> Result<Vec<u8>, AudioError> {
    let invalid = || {
        AudioError::InvalidParameters(format!(
            "rate {sample_rate}, {bits_per_sample} bits, {channels} channel(s)"
        ))
    };
    if sample_rate == 0 || channels == 0 || !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
        return Err(invalid());
    }
    // Header fields derived from these must fit their u16/u32 slots.
    let block_align = channels
        .checked_mul(bits_per_sample / 8)
        .ok_or_else(invalid)?;
    sample_rate
        .checked_mul(u32::from(block_align))
        .ok_or_else(invalid)?;

    let frames_len = pcm.len() - pcm.len() % usize::from(block_align);
    u32::try_from(frames_len)
        .ok()
        .and_then(|len| len.checked_add(36))
        .ok_or_else(|| AudioError::InvalidParameters("PCM data too large for WAV".into()))?;

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + frames_len));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for sample in pcm[..frames_len].chunks_exact(usize::from(bits_per_sample / 8)) {
        writer.write_sample(sample_value(sample))?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

/// Sign-extend one little-endian sample of 1 to 4 bytes.
fn sample_value(bytes: &[u8]) -> i32 {
    let mut word = [0u8; 4];
    word[4 - bytes.len()..].copy_from_slice(bytes);
    i32::from_le_bytes(word) >> (32 - 8 * bytes.len() as u32)
}

/// Encode WAV to Ogg/Opus with `ffmpeg`, piping through stdin and stdout.
pub async fn wav_to_ogg(wav: Vec<u8>) -> Result<Vec<u8>, AudioError> {
    let mut command = Command::new("ffmpeg");
    command.args(FFMPEG_OGG_ARGS);
    run_encoder(command, wav, ENCODER_TIMEOUT).await
}

async fn run_encoder(
    mut command: Command,
    input: Vec<u8>,
    limit: Duration,
) -> Result<Vec<u8>, AudioError> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(AudioError::Spawn)?;

    // Feed stdin concurrently so a full stdout pipe cannot deadlock the encoder.
    let writer = child.stdin.take().map(|mut stdin| {
        tokio::spawn(async move {
            if let Err(error) = stdin.write_all(&input).await {
                tracing::debug!(%error, "encoder closed stdin early");
            }
        })
    });

    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.map_err(AudioError::Spawn)?,
        Err(_) => {
            if let Some(writer) = writer {
                writer.abort();
            }
            return Err(AudioError::Timeout(limit));
        }
    };
    if let Some(writer) = writer {
        writer.await.ok();
    }

    if !output.status.success() {
        return Err(AudioError::Encoder {
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}
