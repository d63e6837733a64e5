//! The top-level engine: owns tracks, channels, reverb, and the
//! render loop, and is the crate's MIDI-facing entry point.

use std::rc::Rc;

use log::{trace, warn};

use crate::cgb_channel::{CgbChannel, CgbKind, CgbStartParams};
use crate::error::LoaderError;
use crate::pcm_channel::{PcmChannel, PcmStartParams};
use crate::reverb::Reverb;
use crate::tables::{midi_key_to_freq, pcm_freq_for_channel_count, GBA_PCM_RATE, VBLANK_RATE};
use crate::track::{ModType, Track};
use crate::voicegroup::{ToneData, Voicegroup};

pub const MAX_PCM_CHANNELS: usize = 12;
pub const MAX_CGB_CHANNELS: usize = 4;
pub const MAX_TRACKS: usize = 16;
pub const MAX_SONG_VOLUME: u8 = 127;

const TEMPO_TICK_THRESHOLD: u32 = 150;

/// Construction-time knobs; every field has the engine's documented
/// default so callers only override what they need.
pub struct EngineConfig {
    pub sample_rate: f64,
    pub master_volume: u8,
    pub song_master_volume: u8,
    pub max_pcm_channels: u8,
    pub reverb_amount: u8,
    pub analog_filter: bool,
}

impl EngineConfig {
    pub fn new(sample_rate: f64) -> Self {
        EngineConfig {
            sample_rate,
            master_volume: 15,
            song_master_volume: MAX_SONG_VOLUME,
            max_pcm_channels: 5,
            reverb_amount: 0,
            analog_filter: false,
        }
    }
}

pub struct Engine {
    sample_rate: f64,
    tracks: Vec<Track>,
    pcm_channels: Vec<PcmChannel>,
    cgb_channels: [CgbChannel; MAX_CGB_CHANNELS],
    reverb: Reverb,

    master_volume: u8,
    song_master_volume: u8,
    max_pcm_channels: u8,
    analog_filter: bool,
    lp_l: f32,
    lp_r: f32,

    voicegroup: Option<Rc<Voicegroup>>,

    tempo_i: u32,
    tempo_c: u32,
    tick_accum: f64,
    samples_per_tick: f64,
    c15: u8,
}

impl Engine {
    pub fn init(config: EngineConfig) -> Self {
        let samples_per_tick = config.sample_rate / VBLANK_RATE;
        Engine {
            sample_rate: config.sample_rate,
            tracks: (0..MAX_TRACKS).map(|_| Track::new()).collect(),
            pcm_channels: (0..MAX_PCM_CHANNELS).map(|_| PcmChannel::new()).collect(),
            cgb_channels: [
                CgbChannel::new(CgbKind::Square1),
                CgbChannel::new(CgbKind::Square2),
                CgbChannel::new(CgbKind::Wave),
                CgbChannel::new(CgbKind::Noise),
            ],
            reverb: Reverb::new(config.sample_rate, config.reverb_amount),
            master_volume: config.master_volume,
            song_master_volume: config.song_master_volume,
            max_pcm_channels: config.max_pcm_channels,
            analog_filter: config.analog_filter,
            lp_l: 0.0,
            lp_r: 0.0,
            voicegroup: None,
            tempo_i: 120,
            tempo_c: 0,
            tick_accum: 0.0,
            samples_per_tick,
            c15: 14,
        }
    }

    pub fn set_voicegroup(&mut self, vg: Rc<Voicegroup>) {
        self.voicegroup = Some(vg);
    }

    /// Retained for host API compatibility: this engine resolves each
    /// track's voice fresh from the voicegroup at note-on time rather
    /// than caching a per-track pointer, so there is nothing stale to
    /// refresh.
    pub fn refresh_voices(&mut self) {}

    pub fn set_song_volume(&mut self, v: u8) {
        self.song_master_volume = v.min(MAX_SONG_VOLUME);
        for track in &mut self.tracks {
            track.vol_x = self.song_master_volume;
        }
    }

    pub fn set_tempo_bpm(&mut self, bpm: f64) {
        self.tempo_i = bpm.round().max(1.0) as u32;
    }

    pub fn set_reverb_amount(&mut self, amount: u8) {
        self.reverb.set_amount(amount);
    }

    pub fn note_on(&mut self, track_index: usize, key: u8, velocity: u8) {
        let Some(track) = self.tracks.get(track_index) else {
            return;
        };
        let Some(vg) = self.voicegroup.clone() else {
            return;
        };

        let program = track.current_program;
        let Some((tone, effective_key, is_sub)) = resolve_voice(&vg, program, key) else {
            return;
        };

        let base_pan = resolve_pan(tone_base_pan(tone), is_sub);
        let vp = self.tracks[track_index].recompute(base_pan);
        let priority = self.tracks[track_index].priority;
        let gate_time = self.tracks[track_index].gate_time;

        match tone {
            ToneData::DirectSound { wav, fixed_freq, attack, decay, sustain, release, .. } => {
                self.start_pcm(
                    wav.clone(),
                    *fixed_freq,
                    false,
                    *attack,
                    *decay,
                    *sustain,
                    *release,
                    effective_key,
                    velocity,
                    priority,
                    track_index,
                    gate_time,
                    vp,
                );
            }
            ToneData::Cry { wav, reverse } => {
                self.start_pcm(wav.clone(), false, *reverse, 0xFF, 0, 0xFF, 0, effective_key, velocity, priority, track_index, gate_time, vp);
            }
            ToneData::Square1 { duty, attack, decay, sustain, release, .. } => {
                self.start_cgb(0, CgbKind::Square1, effective_key, velocity, track_index, priority, gate_time, *duty, None, false, vp, *attack, *decay, *sustain, *release);
            }
            ToneData::Square2 { duty, attack, decay, sustain, release, .. } => {
                self.start_cgb(1, CgbKind::Square2, effective_key, velocity, track_index, priority, gate_time, *duty, None, false, vp, *attack, *decay, *sustain, *release);
            }
            ToneData::ProgrammableWave { table, attack, decay, sustain, release, .. } => {
                let table = table.as_ref().map(|t| **t).unwrap_or([0; 16]);
                self.start_cgb(2, CgbKind::Wave, effective_key, velocity, track_index, priority, gate_time, 0, Some(table), false, vp, *attack, *decay, *sustain, *release);
            }
            ToneData::Noise { period_7bit, attack, decay, sustain, release, .. } => {
                self.start_cgb(3, CgbKind::Noise, effective_key, velocity, track_index, priority, gate_time, 0, None, *period_7bit, vp, *attack, *decay, *sustain, *release);
            }
            ToneData::KeySplit { .. } | ToneData::DrumKit { .. } | ToneData::Silent => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn start_pcm(
        &mut self,
        wav: Option<Rc<crate::wave::WaveData>>,
        fixed_freq: bool,
        reverse: bool,
        attack: u8,
        decay: u8,
        sustain: u8,
        release: u8,
        effective_key: u8,
        velocity: u8,
        priority: u8,
        track_index: usize,
        gate_time: u8,
        vp: crate::track::TrackVolPitch,
    ) {
        let Some(wav) = wav else {
            warn!("note_on: voice has no sample, dropping note on track {track_index}");
            return;
        };

        let div_freq = (2f64.powi(24) / GBA_PCM_RATE / 2.0).round();
        let pcm_freq = pcm_freq_for_channel_count(self.max_pcm_channels);
        let frequency = if fixed_freq {
            (0x800000_u64 as f64 * self.sample_rate / GBA_PCM_RATE) as u32
        } else {
            let key_m = self.tracks[track_index].last_vol_pitch.key_m;
            let pit_m = self.tracks[track_index].last_vol_pitch.pit_m;
            let shifted_key = (effective_key as i32 + key_m).clamp(0, 255) as u8;
            let base = midi_key_to_freq(wav.freq, shifted_key, pit_m);
            (base as f64 * div_freq * self.sample_rate / pcm_freq) as u32
        };

        let Some(idx) = allocate_pcm_channel(&self.pcm_channels, self.max_pcm_channels, priority, track_index) else {
            return;
        };
        self.pcm_channels[idx].start(PcmStartParams {
            wav,
            key: effective_key,
            midi_key: effective_key,
            velocity,
            priority,
            track_index,
            right_volume: vp.vol_mr,
            left_volume: vp.vol_ml,
            attack,
            decay,
            sustain,
            release,
            pseudo_echo_volume: self.tracks[track_index].pseudo_echo_volume,
            pseudo_echo_length: self.tracks[track_index].pseudo_echo_length,
            gate_time,
            frequency,
            fixed_freq,
            reverse,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn start_cgb(
        &mut self,
        channel_index: usize,
        kind: CgbKind,
        key: u8,
        velocity: u8,
        track_index: usize,
        priority: u8,
        gate_time: u8,
        duty: u8,
        wave_table: Option<[u8; 16]>,
        noise_narrow: bool,
        vp: crate::track::TrackVolPitch,
        attack: u8,
        decay: u8,
        sustain: u8,
        release: u8,
    ) {
        if self.cgb_channels[channel_index].is_active() {
            // Only replace when priority allows it.
            let incumbent_track = self.cgb_channels[channel_index].track_index;
            let incumbent_stealable = self.tracks.get(incumbent_track).map(|t| t.priority).unwrap_or(0) <= priority;
            if !incumbent_stealable {
                return;
            }
        }

        self.cgb_channels[channel_index].start(CgbStartParams {
            kind,
            key,
            velocity,
            track_index,
            right_volume: vp.vol_mr,
            left_volume: vp.vol_ml,
            attack,
            decay,
            sustain,
            release,
            duty,
            wave_table,
            noise_narrow,
            gate_time,
        });
    }

    pub fn note_off(&mut self, track_index: usize, key: u8) {
        if track_index >= self.tracks.len() {
            return;
        }
        for ch in &mut self.pcm_channels {
            if ch.track_index == track_index && ch.is_active() && ch.midi_key() == key {
                ch.release();
            }
        }
        for ch in &mut self.cgb_channels {
            if ch.track_index == track_index && ch.is_active() && ch.key() == key {
                ch.release();
            }
        }
    }

    pub fn program_change(&mut self, track_index: usize, program: u8) {
        let Some(track) = self.tracks.get_mut(track_index) else {
            return;
        };
        track.current_program = program & 0x7F;
    }

    pub fn cc(&mut self, track_index: usize, cc: u8, value: u8) {
        let Some(track) = self.tracks.get_mut(track_index) else {
            return;
        };

        match cc {
            7 => track.volume = value,
            10 => track.pan = (value as i32 - 64) as i8,
            1 => track.mod_depth = value,
            65 => {} // Portamento: accepted, no render-path state to update.
            11 => track.vol_x = value,
            6 => {
                track.bend_range = value;
            }
            38 | 100 | 101 => {} // RPN/data-entry plumbing folded into CC6 above.
            12 => track.lfo_speed = value,
            13 => track.lfo_delay = value,
            14 => track.mod_depth = value,
            15 => {
                track.mod_type = match value {
                    1 => ModType::Tremolo,
                    2 => ModType::AutoPan,
                    _ => ModType::Vibrato,
                };
            }
            20 => track.pseudo_echo_volume = value,
            21 => track.pseudo_echo_length = value,
            80 => track.priority = value,
            _ => trace!("unhandled CC {cc} on track {track_index}"),
        }

        let vp = track.recompute(0);
        track.last_vol_pitch = vp;
        self.push_vol_pitch_to_channels(track_index, vp, false);
    }

    pub fn pitch_bend(&mut self, track_index: usize, bend: i8) {
        let Some(track) = self.tracks.get_mut(track_index) else {
            return;
        };
        track.bend = bend;
        let vp = track.recompute(0);
        track.last_vol_pitch = vp;
        self.push_vol_pitch_to_channels(track_index, vp, true);
    }

    /// Pushes a recomputed vol/pan onto every channel currently sounding
    /// for `track_index`. Volumes refresh unconditionally; frequencies
    /// refresh only for CGB channels, and only when `refresh_pitch` is set
    /// (vibrato's per-tick recompute, or a bend/bend-range change) — PCM
    /// pitch steering on sustained notes is not modeled, matching the
    /// reference sequencer's DirectSound channels.
    fn push_vol_pitch_to_channels(&mut self, track_index: usize, vp: crate::track::TrackVolPitch, refresh_pitch: bool) {
        let refresh_pitch = refresh_pitch || self.tracks[track_index].mod_type == ModType::Vibrato;
        for ch in &mut self.pcm_channels {
            if ch.track_index == track_index && ch.is_active() {
                ch.set_pan_volumes(vp.vol_mr, vp.vol_ml);
            }
        }
        for ch in &mut self.cgb_channels {
            if ch.track_index == track_index && ch.is_active() {
                ch.set_volumes(vp.vol_mr, vp.vol_ml);
                if refresh_pitch {
                    ch.refresh_frequency(vp.key_m, vp.pit_m);
                }
            }
        }
    }

    pub fn all_notes_off(&mut self, track_index: usize) {
        if track_index >= self.tracks.len() {
            return;
        }
        for ch in &mut self.pcm_channels {
            if ch.track_index == track_index && ch.is_active() {
                ch.release();
            }
        }
        for ch in &mut self.cgb_channels {
            if ch.track_index == track_index && ch.is_active() {
                ch.release();
            }
        }
    }

    pub fn all_sound_off(&mut self) {
        for ch in &mut self.pcm_channels {
            ch.deactivate();
        }
        for ch in &mut self.cgb_channels {
            ch.deactivate();
        }
        self.reverb.reset();
    }

    fn tick(&mut self) {
        for ch in &mut self.pcm_channels {
            ch.tick_gate();
            ch.tick_envelope(self.master_volume);
        }
        for ch in &mut self.cgb_channels {
            ch.tick_gate();
        }
        self.c15 = if self.c15 == 0 { 14 } else { self.c15 - 1 };
        let envelope_ticks = if self.c15 == 14 { 2 } else { 1 };
        for _ in 0..envelope_ticks {
            for ch in &mut self.cgb_channels {
                ch.tick_envelope(self.master_volume);
            }
        }

        self.tempo_c += self.tempo_i;
        while self.tempo_c >= TEMPO_TICK_THRESHOLD {
            self.tempo_c -= TEMPO_TICK_THRESHOLD;
            for track_index in 0..self.tracks.len() {
                if self.tracks[track_index].tick_lfo() {
                    let vp = self.tracks[track_index].recompute(0);
                    self.tracks[track_index].last_vol_pitch = vp;
                    self.push_vol_pitch_to_channels(track_index, vp, false);
                }
            }
        }
    }

    /// Renders `num_frames` stereo samples into `out_l`/`out_r`
    /// (caller-owned buffers, each at least `num_frames` long).
    pub fn process(&mut self, out_l: &mut [f32], out_r: &mut [f32], num_frames: usize) {
        for i in 0..num_frames {
            self.tick_accum += 1.0;
            if self.tick_accum >= self.samples_per_tick {
                self.tick_accum -= self.samples_per_tick;
                self.tick();
            }

            let mut mix_l = 0i32;
            let mut mix_r = 0i32;

            for ch in &mut self.pcm_channels {
                ch.render(&mut mix_l, &mut mix_r);
            }

            self.reverb.process(&mut mix_l, &mut mix_r);

            for ch in &mut self.cgb_channels {
                ch.render(self.sample_rate, &mut mix_l, &mut mix_r);
            }

            let mut l = (mix_l as f32) / 256.0 / 128.0;
            let mut r = (mix_r as f32) / 256.0 / 128.0;

            if self.analog_filter {
                self.lp_l = self.lp_l * 0.6 + l * 0.4;
                self.lp_r = self.lp_r * 0.6 + r * 0.4;
                l = self.lp_l;
                r = self.lp_r;
            }

            out_l[i] = l;
            out_r[i] = r;
        }
    }
}

fn tone_base_pan(tone: &ToneData) -> i8 {
    match tone {
        ToneData::DirectSound { pan, .. }
        | ToneData::Square1 { pan, .. }
        | ToneData::Square2 { pan, .. }
        | ToneData::ProgrammableWave { pan, .. }
        | ToneData::Noise { pan, .. } => *pan,
        _ => 0,
    }
}

fn resolve_pan(raw_pan: i8, is_sub_voice: bool) -> i8 {
    let byte = raw_pan as u8;
    if is_sub_voice && byte & 0x80 != 0 {
        (((byte as i32) - 0xC0) * 2).clamp(-128, 127) as i8
    } else {
        raw_pan
    }
}

/// Voice resolution per the key-split/drum-kit dispatch rule: nested
/// splits are treated as a resolution failure.
fn resolve_voice(vg: &Voicegroup, program: u8, key: u8) -> Option<(&ToneData, u8, bool)> {
    let voice = vg.voice(program);
    match voice {
        ToneData::KeySplit { sub, table } => {
            let idx = table[key as usize & 0x7F];
            let sub_vg = sub.as_ref()?;
            let sub_voice = sub_vg.voice(idx);
            if sub_voice.is_key_split_like() {
                return None;
            }
            Some((sub_voice, key, true))
        }
        ToneData::DrumKit { sub } => {
            let sub_vg = sub.as_ref()?;
            let sub_voice = sub_vg.voice(key & 0x7F);
            if sub_voice.is_key_split_like() {
                return None;
            }
            let fixed_key = tone_base_key(sub_voice);
            Some((sub_voice, fixed_key, true))
        }
        ToneData::Silent => None,
        other => Some((other, key, false)),
    }
}

fn tone_base_key(tone: &ToneData) -> u8 {
    match tone {
        ToneData::DirectSound { key, .. }
        | ToneData::Square1 { key, .. }
        | ToneData::Square2 { key, .. }
        | ToneData::ProgrammableWave { key, .. }
        | ToneData::Noise { key, .. } => *key,
        _ => 60,
    }
}

fn allocate_pcm_channel(channels: &[PcmChannel], max_channels: u8, new_priority: u8, new_track: usize) -> Option<usize> {
    let limit = (max_channels as usize).min(channels.len());

    if let Some(idx) = (0..limit).find(|&i| !channels[i].is_active()) {
        return Some(idx);
    }

    let mut best_stopping: Option<usize> = None;
    for i in 0..limit {
        if channels[i].is_stopping() {
            best_stopping = Some(match best_stopping {
                None => i,
                Some(cur) => pick_steal_candidate(channels, cur, i),
            });
        }
    }
    if let Some(idx) = best_stopping {
        return Some(idx);
    }

    let mut best_active: Option<usize> = None;
    for i in 0..limit {
        best_active = Some(match best_active {
            None => i,
            Some(cur) => pick_steal_candidate(channels, cur, i),
        });
    }
    if let Some(idx) = best_active {
        if channels[idx].priority <= new_priority {
            return Some(idx);
        }
    }

    None
}

fn pick_steal_candidate(channels: &[PcmChannel], a: usize, b: usize) -> usize {
    let pa = channels[a].priority;
    let pb = channels[b].priority;
    if pb < pa {
        b
    } else if pa < pb {
        a
    } else if channels[b].track_index > channels[a].track_index {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_sets_documented_defaults() {
        let engine = Engine::init(EngineConfig::new(48000.0));
        assert_eq!(engine.master_volume, 15);
        assert_eq!(engine.song_master_volume, 127);
        assert_eq!(engine.max_pcm_channels, 5);
    }

    #[test]
    fn process_without_voicegroup_is_silent() {
        let mut engine = Engine::init(EngineConfig::new(48000.0));
        engine.note_on(0, 60, 127);
        let mut l = vec![0.0f32; 100];
        let mut r = vec![0.0f32; 100];
        engine.process(&mut l, &mut r, 100);
        assert!(l.iter().all(|&x| x == 0.0));
        assert!(r.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn all_sound_off_is_idempotent() {
        let mut engine = Engine::init(EngineConfig::new(48000.0));
        engine.all_sound_off();
        engine.all_sound_off();
        assert!(engine.pcm_channels.iter().all(|c| !c.is_active()));
        assert!(engine.cgb_channels.iter().all(|c| !c.is_active()));
    }

    #[test]
    fn out_of_range_track_index_is_silently_dropped() {
        let mut engine = Engine::init(EngineConfig::new(48000.0));
        engine.note_on(999, 60, 127);
        engine.note_off(999, 60);
        engine.program_change(999, 1);
        engine.cc(999, 7, 100);
        engine.pitch_bend(999, 10);
        engine.all_notes_off(999);
        // No panic is the assertion.
    }

    #[test]
    fn pcm_allocation_prefers_idle_channel() {
        let channels: Vec<PcmChannel> = (0..5).map(|_| PcmChannel::new()).collect();
        let idx = allocate_pcm_channel(&channels, 5, 0, 0);
        assert_eq!(idx, Some(0));
    }

    #[test]
    fn key_split_dispatches_by_table_range() {
        let mut sub = Voicegroup::new();
        sub.voices[0] = ToneData::Square1 {
            key: 60,
            pan: 0,
            sweep: 0,
            duty: 2,
            attack: 1,
            decay: 1,
            sustain: 100,
            release: 1,
        };
        sub.voices[1] = ToneData::Square2 {
            key: 66,
            pan: 0,
            duty: 2,
            attack: 1,
            decay: 1,
            sustain: 100,
            release: 1,
        };

        let mut table = [0u8; 128];
        table[60..64].fill(0);
        table[64..72].fill(1);

        let mut vg = Voicegroup::new();
        vg.voices[0] = ToneData::KeySplit {
            sub: Some(Rc::new(sub)),
            table: Rc::new(table),
        };

        let (tone, effective_key, is_sub) = resolve_voice(&vg, 0, 60).expect("key 60 resolves");
        assert!(matches!(tone, ToneData::Square1 { .. }), "key 60 should hit sub-voice 0");
        assert_eq!(effective_key, 60);
        assert!(is_sub);

        let (tone, effective_key, _) = resolve_voice(&vg, 0, 66).expect("key 66 resolves");
        assert!(matches!(tone, ToneData::Square2 { .. }), "key 66 should hit sub-voice 1");
        assert_eq!(effective_key, 66);
    }

    #[test]
    fn drum_kit_uses_sub_voice_own_key_and_rhythm_pan() {
        let mut sub = Voicegroup::new();
        // Bit 7 set on the pan byte signals the rhythm-pan sweep encoding.
        let pan_sweep: u8 = 0xD0;
        sub.voices[36] = ToneData::Square1 {
            key: 72,
            pan: pan_sweep as i8,
            sweep: 0,
            duty: 2,
            attack: 1,
            decay: 1,
            sustain: 100,
            release: 1,
        };

        let mut vg = Voicegroup::new();
        vg.voices[0] = ToneData::DrumKit { sub: Some(Rc::new(sub)) };

        let (tone, effective_key, is_sub) = resolve_voice(&vg, 0, 36).expect("drum kit resolves");
        assert_eq!(effective_key, 72, "drum kit uses the sub-voice's own key, not the pressed key");
        assert!(is_sub);

        let pan = resolve_pan(tone_base_pan(tone), is_sub);
        assert_eq!(pan, (((pan_sweep as i32) - 0xC0) * 2) as i8);
    }
}
