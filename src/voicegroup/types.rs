//! The resolved voice graph: one [`Voicegroup`] of 128 [`ToneData`]
//! slots, with sub-voicegroups and shared assets held by `Rc`.

use std::rc::Rc;

use crate::wave::WaveData;

pub enum ToneData {
    /// No voice defined for this program slot.
    Silent,
    DirectSound {
        key: u8,
        pan: i8,
        wav: Option<Rc<WaveData>>,
        fixed_freq: bool,
        attack: u8,
        decay: u8,
        sustain: u8,
        release: u8,
    },
    Square1 {
        key: u8,
        pan: i8,
        sweep: u8,
        duty: u8,
        attack: u8,
        decay: u8,
        sustain: u8,
        release: u8,
    },
    Square2 {
        key: u8,
        pan: i8,
        duty: u8,
        attack: u8,
        decay: u8,
        sustain: u8,
        release: u8,
    },
    ProgrammableWave {
        key: u8,
        pan: i8,
        table: Option<Rc<[u8; 16]>>,
        attack: u8,
        decay: u8,
        sustain: u8,
        release: u8,
    },
    Noise {
        key: u8,
        pan: i8,
        period_7bit: bool,
        attack: u8,
        decay: u8,
        sustain: u8,
        release: u8,
    },
    KeySplit {
        sub: Option<Rc<Voicegroup>>,
        table: Rc<[u8; 128]>,
    },
    DrumKit {
        sub: Option<Rc<Voicegroup>>,
    },
    Cry {
        wav: Option<Rc<WaveData>>,
        reverse: bool,
    },
}

impl ToneData {
    pub fn is_key_split_like(&self) -> bool {
        matches!(self, ToneData::KeySplit { .. } | ToneData::DrumKit { .. })
    }
}

pub struct Voicegroup {
    pub voices: Vec<ToneData>,
}

impl Voicegroup {
    pub fn new() -> Self {
        Voicegroup {
            voices: vec![ToneData::Silent; 128],
        }
    }

    pub fn voice(&self, program: u8) -> &ToneData {
        &self.voices[program as usize & 0x7F]
    }
}

impl Clone for ToneData {
    fn clone(&self) -> Self {
        match self {
            ToneData::Silent => ToneData::Silent,
            ToneData::DirectSound {
                key,
                pan,
                wav,
                fixed_freq,
                attack,
                decay,
                sustain,
                release,
            } => ToneData::DirectSound {
                key: *key,
                pan: *pan,
                wav: wav.clone(),
                fixed_freq: *fixed_freq,
                attack: *attack,
                decay: *decay,
                sustain: *sustain,
                release: *release,
            },
            ToneData::Square1 {
                key,
                pan,
                sweep,
                duty,
                attack,
                decay,
                sustain,
                release,
            } => ToneData::Square1 {
                key: *key,
                pan: *pan,
                sweep: *sweep,
                duty: *duty,
                attack: *attack,
                decay: *decay,
                sustain: *sustain,
                release: *release,
            },
            ToneData::Square2 {
                key,
                pan,
                duty,
                attack,
                decay,
                sustain,
                release,
            } => ToneData::Square2 {
                key: *key,
                pan: *pan,
                duty: *duty,
                attack: *attack,
                decay: *decay,
                sustain: *sustain,
                release: *release,
            },
            ToneData::ProgrammableWave {
                key,
                pan,
                table,
                attack,
                decay,
                sustain,
                release,
            } => ToneData::ProgrammableWave {
                key: *key,
                pan: *pan,
                table: table.clone(),
                attack: *attack,
                decay: *decay,
                sustain: *sustain,
                release: *release,
            },
            ToneData::Noise {
                key,
                pan,
                period_7bit,
                attack,
                decay,
                sustain,
                release,
            } => ToneData::Noise {
                key: *key,
                pan: *pan,
                period_7bit: *period_7bit,
                attack: *attack,
                decay: *decay,
                sustain: *sustain,
                release: *release,
            },
            ToneData::KeySplit { sub, table } => ToneData::KeySplit {
                sub: sub.clone(),
                table: table.clone(),
            },
            ToneData::DrumKit { sub } => ToneData::DrumKit { sub: sub.clone() },
            ToneData::Cry { wav, reverse } => ToneData::Cry {
                wav: wav.clone(),
                reverse: *reverse,
            },
        }
    }
}
