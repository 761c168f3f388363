//! RIFF/WAVE framing for captured utterances.

use std::io::Cursor;

use vx_domain::{Error, Result};

/// Wrap mono 16-bit PCM in a standard 44-byte RIFF header.
pub fn wrap_pcm16(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Audio(format!("wav header: {e}")))?;
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| Error::Audio(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::Audio(format!("wav finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Extract mono 16-bit PCM (as LE bytes) and the sample rate from a WAV
/// blob. Used when a synthesis backend returns WAV instead of raw PCM.
pub fn parse_pcm16(wav: &[u8]) -> Result<(Vec<u8>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(wav))
        .map_err(|e| Error::Audio(format!("wav parse: {e}")))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::Audio(format!(
            "expected 16-bit int samples, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let mut pcm = Vec::with_capacity(reader.len() as usize * 2);
    for sample in reader.samples::<i16>() {
        let s = sample.map_err(|e| Error::Audio(format!("wav read: {e}")))?;
        pcm.extend_from_slice(&s.to_le_bytes());
    }
    Ok((pcm, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_wrap() {
        let samples: Vec<i16> = (0..200).map(|i| (i * 31) as i16).collect();
        let wav = wrap_pcm16(&samples, 16_000).unwrap();
        let (pcm, rate) = parse_pcm16(&wav).unwrap();
        assert_eq!(rate, 16_000);
        assert_eq!(pcm.len(), samples.len() * 2);
        assert_eq!(&pcm[0..2], &samples[0].to_le_bytes());
    }

    #[test]
    fn header_is_44_bytes() {
        let wav = wrap_pcm16(&[0i16; 160], 16_000).unwrap();
        assert_eq!(wav.len(), 44 + 160 * 2);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
    }

    #[test]
    fn declares_mono_16khz() {
        let wav = wrap_pcm16(&[0i16; 16], 16_000).unwrap();
        // fmt chunk: channels at offset 22, sample rate at offset 24.
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 16_000);
    }

    #[test]
    fn empty_utterance_is_header_only() {
        let wav = wrap_pcm16(&[], 16_000).unwrap();
        assert_eq!(wav.len(), 44);
    }
}
