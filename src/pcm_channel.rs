//! PCM ("DirectSound") channel: envelope state machine + 23-bit
//! fractional resampler with linear interpolation and loop wrap.

use std::rc::Rc;

use crate::bit::test_bit;
use crate::wave::WaveData;

pub const STATUS_START: u8 = 0x80;
pub const STATUS_STOP: u8 = 0x40;
pub const STATUS_LOOP: u8 = 0x10;
pub const STATUS_IEC: u8 = 0x04;
const ENV_MASK: u8 = 0x03;
const ENV_ATTACK: u8 = 0x03;
const ENV_DECAY: u8 = 0x02;
const ENV_SUSTAIN: u8 = 0x01;
const ENV_RELEASE: u8 = 0x00;
pub const STATUS_ON: u8 = STATUS_START | STATUS_STOP | STATUS_IEC | ENV_MASK;

/// Parameters needed to start a PCM note, gathered from the resolved
/// voice and the owning track.
pub struct PcmStartParams {
    pub wav: Rc<WaveData>,
    pub key: u8,
    pub midi_key: u8,
    pub velocity: u8,
    pub priority: u8,
    pub track_index: usize,
    pub right_volume: u8,
    pub left_volume: u8,
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
    pub pseudo_echo_volume: u8,
    pub pseudo_echo_length: u8,
    pub gate_time: u8,
    pub frequency: u32,
    /// Fixed-frequency (`FIX`) voices resample the source by whole samples
    /// only; no linear interpolation between neighbors.
    pub fixed_freq: bool,
    /// Plays the sample back from its last frame to its first. Used for
    /// `cry_reverse` voices; one-shot regardless of the source's loop flag.
    pub reverse: bool,
}

pub struct PcmChannel {
    status: u8,
    right_volume: u8,
    left_volume: u8,
    attack: u8,
    decay: u8,
    sustain: u8,
    release: u8,
    key: u8,
    envelope_volume: u8,
    envelope_volume_right: u8,
    envelope_volume_left: u8,
    pseudo_echo_volume: u8,
    pseudo_echo_length: u8,
    midi_key: u8,
    velocity: u8,
    pub priority: u8,
    gate_time: u8,

    wav: Option<Rc<WaveData>>,
    current_pointer: u32,
    count: i32,
    fw: u32,
    frequency: u32,
    fixed_freq: bool,
    reverse: bool,

    pub track_index: usize,
    is_loop: bool,
    loop_len: i32,
    loop_start: u32,
}

impl Default for PcmChannel {
    fn default() -> Self {
        PcmChannel {
            status: 0,
            right_volume: 0,
            left_volume: 0,
            attack: 0,
            decay: 0,
            sustain: 0,
            release: 0,
            key: 0,
            envelope_volume: 0,
            envelope_volume_right: 0,
            envelope_volume_left: 0,
            pseudo_echo_volume: 0,
            pseudo_echo_length: 0,
            midi_key: 0,
            velocity: 0,
            priority: 0,
            gate_time: 0,
            wav: None,
            current_pointer: 0,
            count: 0,
            fw: 0,
            frequency: 0,
            fixed_freq: false,
            reverse: false,
            track_index: 0,
            is_loop: false,
            loop_len: 0,
            loop_start: 0,
        }
    }
}

impl PcmChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.status != 0
    }

    pub fn is_stopping(&self) -> bool {
        self.status & STATUS_STOP != 0
    }

    pub fn midi_key(&self) -> u8 {
        self.midi_key
    }

    /// Starts a new note, immediately advancing the envelope by one
    /// attack step so the first rendered sample is non-zero.
    pub fn start(&mut self, params: PcmStartParams) {
        let wav = params.wav;
        self.reverse = params.reverse;
        self.is_loop = wav.loop_enabled && !self.reverse;
        self.loop_start = wav.loop_start;
        self.loop_len = wav.size as i32 - wav.loop_start as i32;
        self.count = wav.size as i32;
        self.current_pointer = if self.reverse { wav.size.saturating_sub(1) } else { 0 };
        self.fw = 0;
        self.fixed_freq = params.fixed_freq;
        self.wav = Some(wav);

        self.key = params.key;
        self.midi_key = params.midi_key;
        self.velocity = params.velocity;
        self.priority = params.priority;
        self.track_index = params.track_index;
        self.right_volume = params.right_volume;
        self.left_volume = params.left_volume;
        self.attack = params.attack;
        self.decay = params.decay;
        self.sustain = params.sustain;
        self.release = params.release;
        self.pseudo_echo_volume = params.pseudo_echo_volume;
        self.pseudo_echo_length = params.pseudo_echo_length;
        self.gate_time = params.gate_time;
        self.frequency = params.frequency;

        self.envelope_volume = 0;
        self.status = STATUS_START | ENV_ATTACK;
        if self.is_loop {
            self.status |= STATUS_LOOP;
        }

        self.tick_envelope(15);
    }

    pub fn release(&mut self) {
        if self.status != 0 {
            self.status |= STATUS_STOP;
        }
    }

    pub fn deactivate(&mut self) {
        self.status = 0;
        self.wav = None;
    }

    pub fn tick_gate(&mut self) {
        if self.gate_time > 0 {
            self.gate_time -= 1;
            if self.gate_time == 0 {
                self.release();
            }
        }
    }

    /// Runs one ~60 Hz envelope tick; `master_volume` is 0-15.
    pub fn tick_envelope(&mut self, master_volume: u8) {
        if self.status == 0 {
            return;
        }

        if self.status & STATUS_START != 0 {
            self.status = (self.status & !STATUS_START) & !ENV_MASK | ENV_ATTACK;
        } else if self.status & STATUS_IEC != 0 {
            self.pseudo_echo_length = self.pseudo_echo_length.saturating_sub(1);
            if self.pseudo_echo_length == 0 {
                self.deactivate();
                return;
            }
        } else if self.status & STATUS_STOP != 0 {
            self.envelope_volume = ((self.envelope_volume as u32 * self.release as u32) >> 8) as u8;
            if self.envelope_volume <= self.pseudo_echo_volume {
                if self.pseudo_echo_volume == 0 {
                    self.deactivate();
                    return;
                }
                self.status = (self.status & !ENV_MASK) | STATUS_IEC;
            }
        } else {
            match self.status & ENV_MASK {
                ENV_DECAY => {
                    self.envelope_volume =
                        ((self.envelope_volume as u32 * self.decay as u32) >> 8) as u8;
                    if self.envelope_volume <= self.sustain {
                        self.envelope_volume = self.sustain;
                        self.status = if self.sustain == 0 {
                            (self.status & !ENV_MASK) | STATUS_IEC
                        } else {
                            (self.status & !ENV_MASK) | ENV_SUSTAIN
                        };
                    }
                }
                ENV_ATTACK => {
                    let next = self.envelope_volume as u16 + self.attack as u16;
                    if next >= 0xFF {
                        self.envelope_volume = 0xFF;
                        self.status = (self.status & !ENV_MASK) | ENV_DECAY;
                    } else {
                        self.envelope_volume = next as u8;
                    }
                }
                _ => {} // Sustain: hold.
            }
        }

        let vol = ((master_volume as u32 + 1) * self.envelope_volume as u32) >> 4;
        self.envelope_volume_right = ((self.right_volume as u32 * vol) >> 8) as u8;
        self.envelope_volume_left = ((self.left_volume as u32 * vol) >> 8) as u8;
    }

    pub fn set_frequency(&mut self, frequency: u32) {
        self.frequency = frequency;
    }

    pub fn set_pan_volumes(&mut self, right_volume: u8, left_volume: u8) {
        self.right_volume = right_volume;
        self.left_volume = left_volume;
    }

    /// Renders one sample, accumulating into `mix_l`/`mix_r`.
    pub fn render(&mut self, mix_l: &mut i32, mix_r: &mut i32) {
        if self.status & STATUS_ON == 0 {
            return;
        }
        let Some(wav) = self.wav.as_ref() else {
            self.deactivate();
            return;
        };

        let ptr = self.current_pointer as usize;
        let sample = if self.fixed_freq {
            wav.data.get(ptr).copied().unwrap_or(0) as i32
        } else if self.reverse {
            if ptr >= 1 && ptr < wav.data.len() {
                let a = wav.data[ptr] as i32;
                let b = wav.data[ptr - 1] as i32;
                a + (((b - a) * self.fw as i32) >> 23)
            } else {
                *wav.data.first().unwrap_or(&0) as i32
            }
        } else if ptr + 1 < wav.data.len() {
            let a = wav.data[ptr] as i32;
            let b = wav.data[ptr + 1] as i32;
            a + (((b - a) * self.fw as i32) >> 23)
        } else {
            *wav.data.last().unwrap_or(&0) as i32
        };

        *mix_r += (sample * self.envelope_volume_right as i32) >> 8;
        *mix_l += (sample * self.envelope_volume_left as i32) >> 8;

        self.fw = self.fw.wrapping_add(self.frequency);
        let advance = (self.fw >> 23) as i32;
        self.fw &= 0x7F_FFFF;
        self.count -= advance;

        if self.reverse {
            if self.count <= 0 || self.current_pointer < advance as u32 {
                self.deactivate();
            } else {
                self.current_pointer -= advance as u32;
            }
        } else if self.count <= 0 {
            if self.is_loop && self.loop_len > 0 {
                while self.count <= 0 {
                    self.count += self.loop_len;
                }
                self.current_pointer = (self.loop_start as i32 + (self.loop_len - self.count)) as u32;
            } else {
                self.deactivate();
            }
        } else {
            self.current_pointer = self.current_pointer.wrapping_add(advance as u32);
        }
    }

    pub fn status_byte(&self) -> u8 {
        self.status
    }
}

/// Whether a status byte indicates the release (stop) phase.
pub fn is_in_release(status: u8) -> bool {
    test_bit(status, 6)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_with(samples: &[i8], loop_start: u32, loop_enabled: bool) -> Rc<WaveData> {
        let mut data: Vec<i8> = samples.to_vec();
        let guard = *data.last().unwrap_or(&0);
        let size = data.len() as u32;
        data.push(guard);
        Rc::new(WaveData {
            freq: 1_000_000,
            loop_start,
            size,
            loop_enabled,
            data,
        })
    }

    fn start_params(wav: Rc<WaveData>, attack: u8) -> PcmStartParams {
        PcmStartParams {
            wav,
            key: 60,
            midi_key: 60,
            velocity: 127,
            priority: 0,
            track_index: 0,
            right_volume: 255,
            left_volume: 255,
            attack,
            decay: 200,
            sustain: 100,
            release: 200,
            pseudo_echo_volume: 0,
            pseudo_echo_length: 0,
            gate_time: 0,
            frequency: 1 << 23,
            fixed_freq: false,
            reverse: false,
        }
    }

    #[test]
    fn attack_saturation_drops_to_decay() {
        let wav = wav_with(&[10, 20, 30, 40], 0, false);
        let mut ch = PcmChannel::new();
        ch.start(start_params(wav, 0xFF));
        assert_eq!(ch.envelope_volume, 0xFF);
        ch.tick_envelope(15);
        assert_eq!(ch.status & ENV_MASK, ENV_DECAY);
    }

    #[test]
    fn loop_continuity_never_deactivates() {
        let wav = wav_with(&[10, 20, 30, 40], 1, true);
        let mut ch = PcmChannel::new();
        ch.start(start_params(wav, 0xFF));
        ch.tick_envelope(15);
        let mut l = 0;
        let mut r = 0;
        let mut any_nonzero = false;
        for _ in 0..10_000 {
            ch.render(&mut l, &mut r);
            if l != 0 || r != 0 {
                any_nonzero = true;
            }
            assert!(ch.is_active(), "looping channel must never go silent-inactive");
        }
        assert!(any_nonzero);
    }

    #[test]
    fn non_looping_deactivates_at_end() {
        let wav = wav_with(&[10, 20], 0, false);
        let mut ch = PcmChannel::new();
        let mut params = start_params(wav, 0xFF);
        params.frequency = 1 << 24; // two samples per output sample
        ch.start(params);
        let mut l = 0;
        let mut r = 0;
        for _ in 0..10 {
            ch.render(&mut l, &mut r);
        }
        assert!(!ch.is_active());
    }

    #[test]
    fn fixed_freq_skips_interpolation() {
        let wav = wav_with(&[0, 100], 0, false);
        let mut ch = PcmChannel::new();
        let mut params = start_params(wav, 0xFF);
        params.fixed_freq = true;
        params.frequency = 1 << 22; // half a sample per output sample
        ch.start(params);
        ch.tick_envelope(15);
        let mut l = 0;
        let mut r = 0;
        ch.render(&mut l, &mut r);
        // Nearest-sample lookup at a fractional position must still read
        // the raw sample 0, never a value interpolated toward sample 1.
        assert_eq!(l, 0);
        assert_eq!(r, 0);
    }

    #[test]
    fn reverse_plays_from_the_last_sample() {
        let wav = wav_with(&[10, 20, 30, 40], 0, true);
        let mut ch = PcmChannel::new();
        let mut params = start_params(wav, 0xFF);
        params.reverse = true;
        ch.start(params);
        ch.tick_envelope(15);
        assert_eq!(ch.current_pointer, 3);
        assert!(!ch.is_loop, "reverse playback is one-shot regardless of the source's loop flag");

        let mut l = 0;
        let mut r = 0;
        let mut saw_end = false;
        for _ in 0..20 {
            ch.render(&mut l, &mut r);
            if !ch.is_active() {
                saw_end = true;
                break;
            }
        }
        assert!(saw_end, "reverse playback must deactivate after running off the start of the sample");
    }
}
