//! A real-time, MIDI-driven sound engine modeled on the Game Boy
//! Advance's M4A/MusicPlayer2000 architecture: a PCM (DirectSound)
//! mixer with fractional resampling and ADSR envelopes, four CGB-style
//! channels (two square, one wavetable, one noise), multi-tap reverb,
//! and a project-tree voicegroup asset loader.

mod bit;
mod cgb_channel;
mod engine;
mod error;
mod pcm_channel;
mod persist;
mod reverb;
mod tables;
mod track;
mod voicegroup;
mod wave;

pub use engine::{Engine, EngineConfig, MAX_CGB_CHANNELS, MAX_PCM_CHANNELS, MAX_SONG_VOLUME, MAX_TRACKS};
pub use error::{LoaderError, WaveError};
pub use persist::PersistedState;
pub use tables::{GBA_PCM_RATE, VBLANK_RATE};
pub use voicegroup::{Loader, LoaderConfig, ToneData, Voicegroup};
pub use wave::WaveData;
