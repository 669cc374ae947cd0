//! In-memory WAV framing of raw PCM segments.

use std::io::Cursor;

use base64::Engine as _;

use crate::error::{Result, SphinxError};

/// Wrap little-endian 16-bit mono PCM in a WAV container.
///
/// A trailing odd byte (half a sample) is dropped.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| SphinxError::Transport(format!("wav header: {e}")))?;
        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| SphinxError::Transport(format!("wav sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SphinxError::Transport(format!("wav finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// WAV-frame a PCM segment and base64-encode it for transport.
pub fn encode_segment(pcm: &[u8], sample_rate: u32) -> Result<String> {
    let wav = pcm16_to_wav(pcm, sample_rate)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(wav))
}
