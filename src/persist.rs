//! Persisted plugin state: a small, versioned byte blob carrying the
//! loader's `(project_root, voicegroup_name)` inputs and the engine's
//! byte-sized tuning knobs, so a host can save/restore a session
//! without this crate knowing anything about where the bytes live.

use crate::error::LoaderError;

const FORMAT_VERSION: u8 = 1;

/// Round-trips through [`to_bytes`]/[`from_bytes`] (methods named to
/// match this codebase's other hand-rolled binary formats rather than
/// `serde`, since the wire format here is deliberately small and fixed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedState {
    pub project_root: String,
    pub voicegroup_name: String,
    pub master_volume: u8,
    pub song_master_volume: u8,
    pub max_pcm_channels: u8,
    pub reverb_amount: u8,
    pub analog_filter: bool,
}

impl PersistedState {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            1 + 2 + self.project_root.len() + 2 + self.voicegroup_name.len() + 5,
        );
        out.push(FORMAT_VERSION);
        write_string(&mut out, &self.project_root);
        write_string(&mut out, &self.voicegroup_name);
        out.push(self.master_volume);
        out.push(self.song_master_volume);
        out.push(self.max_pcm_channels);
        out.push(self.reverb_amount);
        out.push(self.analog_filter as u8);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoaderError> {
        let mut cursor = Cursor { bytes, pos: 0 };

        let version = cursor.take_u8()?;
        if version != FORMAT_VERSION {
            return Err(LoaderError::FormatError(format!(
                "unrecognised persisted-state version {version}"
            )));
        }

        let project_root = cursor.take_string()?;
        let voicegroup_name = cursor.take_string()?;
        let master_volume = cursor.take_u8()?;
        let song_master_volume = cursor.take_u8()?;
        let max_pcm_channels = cursor.take_u8()?;
        let reverb_amount = cursor.take_u8()?;
        let analog_filter = cursor.take_u8()? != 0;

        Ok(PersistedState {
            project_root,
            voicegroup_name,
            master_volume,
            song_master_volume,
            max_pcm_channels,
            reverb_amount,
            analog_filter,
        })
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let len = s.len().min(u16::MAX as usize) as u16;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&s.as_bytes()[..len as usize]);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_u8(&mut self) -> Result<u8, LoaderError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| LoaderError::FormatError("truncated persisted-state blob".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take_string(&mut self) -> Result<String, LoaderError> {
        let lo = self.take_u8()?;
        let hi = self.take_u8()?;
        let len = u16::from_le_bytes([lo, hi]) as usize;
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| LoaderError::FormatError("truncated persisted-state string".into()))?;
        self.pos = end;
        String::from_utf8(slice.to_vec())
            .map_err(|_| LoaderError::FormatError("persisted-state string is not valid UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PersistedState {
        PersistedState {
            project_root: "/home/user/project".to_string(),
            voicegroup_name: "lead_synth".to_string(),
            master_volume: 15,
            song_master_volume: 100,
            max_pcm_channels: 5,
            reverb_amount: 40,
            analog_filter: true,
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let state = sample();
        let bytes = state.to_bytes();
        let restored = PersistedState::from_bytes(&bytes).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn rejects_truncated_blob() {
        let bytes = sample().to_bytes();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            PersistedState::from_bytes(truncated),
            Err(LoaderError::FormatError(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0xFF;
        assert!(matches!(
            PersistedState::from_bytes(&bytes),
            Err(LoaderError::FormatError(_))
        ));
    }

    #[test]
    fn rejects_empty_blob() {
        assert!(matches!(
            PersistedState::from_bytes(&[]),
            Err(LoaderError::FormatError(_))
        ));
    }
}
