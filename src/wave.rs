//! Wave asset loading: RIFF/WAVE (`.wav`) and the engine's native
//! 16-byte-header `.bin` format, both producing a [`WaveData`] record.

use std::fs;
use std::path::Path;

use crate::error::WaveError;

/// An immutable 8-bit signed PCM sample with header metadata.
///
/// `data` carries one extra trailing byte (a copy of the last real sample)
/// so the PCM resampler's one-ahead interpolation tap never reads out of
/// bounds.
#[derive(Debug, Clone)]
pub struct WaveData {
    /// Playback frequency word: the rate at which the sample should be
    /// advanced to play back at MIDI key 60 with no fine adjustment.
    pub freq: u32,
    /// Inclusive-start sample index the loop wraps back to.
    pub loop_start: u32,
    /// Number of real samples (excludes the trailing guard byte).
    pub size: u32,
    pub loop_enabled: bool,
    /// `size + 1` signed 8-bit samples; index `size` duplicates `size - 1`.
    pub data: Vec<i8>,
}

impl WaveData {
    fn from_samples(freq: u32, loop_start: u32, loop_enabled: bool, mut samples: Vec<i8>) -> Self {
        let size = samples.len() as u32;
        let guard = *samples.last().unwrap_or(&0);
        samples.push(guard);
        WaveData {
            freq,
            loop_start,
            size,
            loop_enabled,
            data: samples,
        }
    }
}

/// Loads a `.wav` or `.bin` wave asset from `path`, dispatching on the
/// file extension (case-insensitively).
pub fn load(path: &Path) -> Result<WaveData, WaveError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "wav" => load_wav(path),
        "bin" => load_bin(path),
        other => Err(WaveError::FormatError(format!(
            "unsupported wave asset extension: {other}"
        ))),
    }
}

/// Loads a 16-byte-packed 4-bit-nibble programmable wave table (`.pcm`).
pub fn load_programmable_wave(path: &Path) -> Result<[u8; 16], WaveError> {
    let bytes = fs::read(path)?;
    if bytes.len() != 16 {
        return Err(WaveError::FormatError(format!(
            "programmable wave file {} must be exactly 16 bytes, got {}",
            path.display(),
            bytes.len()
        )));
    }
    let mut table = [0u8; 16];
    table.copy_from_slice(&bytes);
    Ok(table)
}

fn load_bin(path: &Path) -> Result<WaveData, WaveError> {
    let bytes = fs::read(path)?;
    if bytes.len() < 16 {
        return Err(WaveError::FormatError(format!(
            "{}: truncated .bin header",
            path.display()
        )));
    }
    let status = u16::from_le_bytes([bytes[2], bytes[3]]);
    let freq = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let loop_start = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let size = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let loop_enabled = status & 0xC000 != 0;

    let body = &bytes[16..];
    if (body.len() as u64) < size as u64 {
        return Err(WaveError::FormatError(format!(
            "{}: .bin declares {} samples but only {} bytes follow the header",
            path.display(),
            size,
            body.len()
        )));
    }
    let samples: Vec<i8> = body[..size as usize].iter().map(|&b| b as i8).collect();
    Ok(WaveData::from_samples(freq, loop_start, loop_enabled, samples))
}

struct RiffChunk {
    id: [u8; 4],
    data: Vec<u8>,
}

fn parse_riff_chunks(bytes: &[u8]) -> Result<Vec<RiffChunk>, WaveError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WaveError::FormatError("not a RIFF/WAVE file".into()));
    }
    let mut chunks = Vec::new();
    let mut pos = 12usize;
    while pos + 8 <= bytes.len() {
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[pos..pos + 4]);
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let data_start = pos + 8;
        let data_end = data_start
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| WaveError::FormatError(format!("chunk {:?} overruns file", id)))?;
        chunks.push(RiffChunk {
            id,
            data: bytes[data_start..data_end].to_vec(),
        });
        pos = data_end + (size & 1); // chunks are word-aligned
    }
    Ok(chunks)
}

enum SampleFormat {
    Pcm(u16),
    Float(u16),
}

fn load_wav(path: &Path) -> Result<WaveData, WaveError> {
    let bytes = fs::read(path)?;
    let chunks = parse_riff_chunks(&bytes)?;

    let fmt = chunks
        .iter()
        .find(|c| &c.id == b"fmt ")
        .ok_or_else(|| WaveError::FormatError("missing fmt chunk".into()))?;
    if fmt.data.len() < 16 {
        return Err(WaveError::FormatError("truncated fmt chunk".into()));
    }
    let format_tag = u16::from_le_bytes([fmt.data[0], fmt.data[1]]);
    let sample_rate = u32::from_le_bytes([fmt.data[4], fmt.data[5], fmt.data[6], fmt.data[7]]);
    let bits_per_sample = u16::from_le_bytes([fmt.data[14], fmt.data[15]]);

    let format = match format_tag {
        1 => SampleFormat::Pcm(bits_per_sample),
        3 => SampleFormat::Float(bits_per_sample),
        other => {
            return Err(WaveError::FormatError(format!(
                "unsupported WAVE format tag {other}"
            )))
        }
    };

    let data_chunk = chunks
        .iter()
        .find(|c| &c.id == b"data")
        .ok_or_else(|| WaveError::FormatError("missing data chunk".into()))?;
    let samples = convert_samples(&data_chunk.data, &format)?;

    let mut midi_key = 60u8;
    let mut midi_pitch_fraction = 0u32;
    let mut loop_start = 0u32;
    let mut loop_end: Option<u32> = None;

    if let Some(smpl) = chunks.iter().find(|c| &c.id == b"smpl") {
        if smpl.data.len() >= 36 + 24 {
            midi_key = smpl.data[12];
            midi_pitch_fraction = u32::from_le_bytes([
                smpl.data[16],
                smpl.data[17],
                smpl.data[18],
                smpl.data[19],
            ]);
            let num_loops =
                u32::from_le_bytes([smpl.data[28], smpl.data[29], smpl.data[30], smpl.data[31]]);
            if num_loops > 0 {
                let loop_rec = &smpl.data[36..36 + 24];
                loop_start =
                    u32::from_le_bytes([loop_rec[8], loop_rec[9], loop_rec[10], loop_rec[11]]);
                let inclusive_end =
                    u32::from_le_bytes([loop_rec[12], loop_rec[13], loop_rec[14], loop_rec[15]]);
                loop_end = Some(inclusive_end + 1);
            }
        }
    }

    let mut agbp_override: Option<u32> = None;
    if let Some(agbp) = chunks.iter().find(|c| &c.id == b"agbp") {
        if agbp.data.len() >= 4 {
            agbp_override = Some(u32::from_le_bytes([
                agbp.data[0],
                agbp.data[1],
                agbp.data[2],
                agbp.data[3],
            ]));
        }
    }
    if let Some(agbl) = chunks.iter().find(|c| &c.id == b"agbl") {
        if agbl.data.len() >= 4 {
            loop_end = Some(u32::from_le_bytes([
                agbl.data[0],
                agbl.data[1],
                agbl.data[2],
                agbl.data[3],
            ]));
        }
    }

    let freq = if let Some(agbp) = agbp_override {
        agbp
    } else if midi_key == 60 && midi_pitch_fraction == 0 {
        (sample_rate as f64 * 1024.0).round() as u32
    } else {
        let semitone_offset = (60.0 - midi_key as f64) / 12.0;
        let fraction = (midi_pitch_fraction as f64 / (u32::MAX as f64 + 1.0)) / 100.0 / 12.0;
        (sample_rate as f64 * 1024.0 * 2f64.powf(semitone_offset + fraction)).round() as u32
    };

    let loop_enabled = loop_end.is_some();
    Ok(WaveData::from_samples(freq, loop_start, loop_enabled, samples))
}

fn convert_samples(data: &[u8], format: &SampleFormat) -> Result<Vec<i8>, WaveError> {
    match format {
        SampleFormat::Pcm(8) => Ok(data.iter().map(|&b| (b as i16 - 128) as i8).collect()),
        SampleFormat::Pcm(16) => Ok(data
            .chunks_exact(2)
            .map(|c| (i16::from_le_bytes([c[0], c[1]]) >> 8) as i8)
            .collect()),
        SampleFormat::Pcm(24) => Ok(data
            .chunks_exact(3)
            .map(|c| {
                let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                (v >> 16) as i8
            })
            .collect()),
        SampleFormat::Pcm(32) => Ok(data
            .chunks_exact(4)
            .map(|c| (i32::from_le_bytes([c[0], c[1], c[2], c[3]]) >> 24) as i8)
            .collect()),
        SampleFormat::Float(32) => Ok(data
            .chunks_exact(4)
            .map(|c| float_to_i8(f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64))
            .collect()),
        SampleFormat::Float(64) => Ok(data
            .chunks_exact(8)
            .map(|c| {
                float_to_i8(f64::from_le_bytes([
                    c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7],
                ]))
            })
            .collect()),
        SampleFormat::Pcm(other) => Err(WaveError::FormatError(format!(
            "unsupported integer PCM width: {other} bits"
        ))),
        SampleFormat::Float(other) => Err(WaveError::FormatError(format!(
            "unsupported float PCM width: {other} bits"
        ))),
    }
}

fn float_to_i8(x: f64) -> i8 {
    (x * 128.0).floor().clamp(-128.0, 127.0) as i8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_minimal_wav(path: &Path, pcm8_samples: &[u8]) {
        let mut fmt = Vec::new();
        fmt.extend_from_slice(&1u16.to_le_bytes()); // PCM
        fmt.extend_from_slice(&1u16.to_le_bytes()); // mono
        fmt.extend_from_slice(&8000u32.to_le_bytes()); // sample rate
        fmt.extend_from_slice(&8000u32.to_le_bytes()); // byte rate
        fmt.extend_from_slice(&1u16.to_le_bytes()); // block align
        fmt.extend_from_slice(&8u16.to_le_bytes()); // bits per sample

        let mut body = Vec::new();
        body.extend_from_slice(b"fmt ");
        body.extend_from_slice(&(fmt.len() as u32).to_le_bytes());
        body.extend_from_slice(&fmt);
        body.extend_from_slice(b"data");
        body.extend_from_slice(&(pcm8_samples.len() as u32).to_le_bytes());
        body.extend_from_slice(pcm8_samples);

        let mut file = Vec::new();
        file.extend_from_slice(b"RIFF");
        file.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        file.extend_from_slice(b"WAVE");
        file.extend_from_slice(&body);

        fs::File::create(path).unwrap().write_all(&file).unwrap();
    }

    #[test]
    fn loads_minimal_pcm8_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_minimal_wav(&path, &[128, 192, 255, 64]);

        let wav = load(&path).unwrap();
        assert_eq!(wav.size, 4);
        assert_eq!(wav.data.len(), 5);
        assert_eq!(wav.data[0], 0);
        assert_eq!(wav.data[4], wav.data[3]);
        assert_eq!(wav.freq, (8000.0 * 1024.0).round() as u32);
    }

    #[test]
    fn rejects_truncated_bin_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.bin");
        fs::write(&path, [0u8; 8]).unwrap();
        assert!(matches!(load(&path), Err(WaveError::FormatError(_))));
    }

    #[test]
    fn loads_bin_with_loop_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0xC000u16.to_le_bytes());
        bytes.extend_from_slice(&1000u32.to_le_bytes());
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&4u32.to_le_bytes());
        bytes.extend_from_slice(&[10i8 as u8, 20, 30, 40]);
        fs::write(&path, &bytes).unwrap();

        let wav = load(&path).unwrap();
        assert!(wav.loop_enabled);
        assert_eq!(wav.loop_start, 2);
        assert_eq!(wav.size, 4);
    }

    #[test]
    fn loads_programmable_wave_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wave.pcm");
        fs::write(&path, [0x42u8; 16]).unwrap();
        let table = load_programmable_wave(&path).unwrap();
        assert_eq!(table.len(), 16);
        assert_eq!(table[0], 0x42);
    }
}
