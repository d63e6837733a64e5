//! Recursive-descent, line-oriented parser for the voice macro
//! language: turns a window of source lines into 128 [`ToneData`]
//! slots, recursing into sub-voicegroups for key-split/drum-kit
//! voices via the supplied `resolve_sub` callback.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use log::{trace, warn};

use crate::voicegroup::symbols::{strip_comment, KeySplitDef};
use crate::voicegroup::types::{ToneData, Voicegroup};
use crate::wave::WaveData;

/// Resolves a `voice_keysplit`/`voice_keysplit_all` sub-voicegroup
/// reference by name, recursing back into the owning loader. Returns
/// `None` on any resolution failure (missing file, cycle), which the
/// caller turns into a silent voice.
pub type SubResolver<'a> = dyn FnMut(
        &str,
        &mut HashMap<PathBuf, Rc<WaveData>>,
        &mut HashMap<PathBuf, Rc<[u8; 16]>>,
    ) -> Option<Rc<Voicegroup>>
    + 'a;

fn parse_num(token: &str) -> Option<i64> {
    let token = token.trim();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        token.parse::<i64>().ok()
    }
}

fn split_macro(line: &str) -> Option<(&str, Vec<&str>)> {
    let line = line.trim();
    let space = line.find(|c: char| c.is_whitespace())?;
    let (name, rest) = line.split_at(space);
    let args: Vec<&str> = rest.split(',').map(|a| a.trim()).collect();
    Some((name, args))
}

fn strip_suffix_variants<'a>(name: &'a str, base: &str) -> Option<&'a str> {
    if name == base {
        return Some("");
    }
    for suffix in ["_alt", "_no_resample", "_no_resample_alt", "_reverse"] {
        if name == format!("{base}{suffix}") {
            return Some(suffix);
        }
    }
    None
}

fn load_wav_cached(
    sample_symbols: &HashMap<String, PathBuf>,
    wav_cache: &mut HashMap<PathBuf, Rc<WaveData>>,
    symbol: &str,
) -> Option<Rc<WaveData>> {
    let path = sample_symbols.get(symbol)?.clone();
    if let Some(cached) = wav_cache.get(&path) {
        return Some(cached.clone());
    }
    match crate::wave::load(&path) {
        Ok(wav) => {
            let rc = Rc::new(wav);
            wav_cache.insert(path, rc.clone());
            Some(rc)
        }
        Err(e) => {
            warn!("voice sample {} ({}) failed to load: {}", symbol, path.display(), e);
            None
        }
    }
}

fn load_progwave_cached(
    wave_symbols: &HashMap<String, PathBuf>,
    progwave_cache: &mut HashMap<PathBuf, Rc<[u8; 16]>>,
    symbol: &str,
) -> Option<Rc<[u8; 16]>> {
    let path = wave_symbols.get(symbol)?.clone();
    if let Some(cached) = progwave_cache.get(&path) {
        return Some(cached.clone());
    }
    match crate::wave::load_programmable_wave(&path) {
        Ok(table) => {
            let rc: Rc<[u8; 16]> = Rc::new(table);
            progwave_cache.insert(path, rc.clone());
            Some(rc)
        }
        Err(e) => {
            warn!("programmable wave {} ({}) failed to load: {}", symbol, path.display(), e);
            None
        }
    }
}

fn cgb_adsr(attack: i64, decay: i64, sustain: i64, release: i64) -> (u8, u8, u8, u8) {
    (
        (attack & 0x7) as u8,
        (decay & 0x7) as u8,
        (sustain & 0xF) as u8,
        (release & 0x7) as u8,
    )
}

/// Parses `lines` into a fresh [`Voicegroup`]. `lines` must already be
/// the correctly-windowed slice (whole file for a standalone
/// voicegroup, or the label-bounded slice of a monolithic file).
#[allow(clippy::too_many_arguments)]
pub fn parse_lines(
    lines: &[&str],
    sample_symbols: &HashMap<String, PathBuf>,
    wave_symbols: &HashMap<String, PathBuf>,
    keysplit_tables: &HashMap<String, KeySplitDef>,
    wav_cache: &mut HashMap<PathBuf, Rc<WaveData>>,
    progwave_cache: &mut HashMap<PathBuf, Rc<[u8; 16]>>,
    resolver: &mut SubResolver,
) -> Voicegroup {
    let mut vg = Voicegroup::new();
    let mut cursor: usize = 0;

    for raw_line in lines {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        trace!("voice parser: {}", line);

        let Some((macro_name, args)) = split_macro(line) else {
            continue;
        };

        if macro_name == "voice_group" {
            if args.len() >= 2 {
                if let Some(start) = parse_num(args[1]) {
                    cursor = (start.max(0) as usize) & 0x7F;
                }
            }
            continue;
        }

        let tone = dispatch_macro(
            macro_name,
            &args,
            sample_symbols,
            wave_symbols,
            keysplit_tables,
            wav_cache,
            progwave_cache,
            resolver,
        );
        if let Some(tone) = tone {
            if cursor < vg.voices.len() {
                vg.voices[cursor] = tone;
            }
            cursor = (cursor + 1) & 0x7F;
        }
    }

    vg
}

#[allow(clippy::too_many_arguments)]
fn dispatch_macro(
    macro_name: &str,
    args: &[&str],
    sample_symbols: &HashMap<String, PathBuf>,
    wave_symbols: &HashMap<String, PathBuf>,
    keysplit_tables: &HashMap<String, KeySplitDef>,
    wav_cache: &mut HashMap<PathBuf, Rc<WaveData>>,
    progwave_cache: &mut HashMap<PathBuf, Rc<[u8; 16]>>,
    resolver: &mut SubResolver,
) -> Option<ToneData> {
    if let Some(suffix) = strip_suffix_variants(macro_name, "voice_directsound") {
        if args.len() < 7 {
            return None;
        }
        let key = parse_num(args[0])? as u8;
        let pan = parse_num(args[1])? as i8;
        let wav = load_wav_cached(sample_symbols, wav_cache, args[2]);
        let (a, d, s, r) = (
            parse_num(args[3])? as u8,
            parse_num(args[4])? as u8,
            parse_num(args[5])? as u8,
            parse_num(args[6])? as u8,
        );
        return Some(ToneData::DirectSound {
            key,
            pan,
            wav,
            fixed_freq: suffix.contains("no_resample"),
            attack: a,
            decay: d,
            sustain: s,
            release: r,
        });
    }

    if strip_suffix_variants(macro_name, "voice_square_1").is_some() {
        if args.len() < 8 {
            return None;
        }
        let key = parse_num(args[0])? as u8;
        let pan = parse_num(args[1])? as i8;
        let sweep = parse_num(args[2])? as u8;
        let duty = (parse_num(args[3])? & 0x3) as u8;
        let (a, d, s, r) = cgb_adsr(
            parse_num(args[4])?,
            parse_num(args[5])?,
            parse_num(args[6])?,
            parse_num(args[7])?,
        );
        return Some(ToneData::Square1 {
            key,
            pan,
            sweep,
            duty,
            attack: a,
            decay: d,
            sustain: s,
            release: r,
        });
    }

    if strip_suffix_variants(macro_name, "voice_square_2").is_some() {
        if args.len() < 7 {
            return None;
        }
        let key = parse_num(args[0])? as u8;
        let pan = parse_num(args[1])? as i8;
        let duty = (parse_num(args[2])? & 0x3) as u8;
        let (a, d, s, r) = cgb_adsr(
            parse_num(args[3])?,
            parse_num(args[4])?,
            parse_num(args[5])?,
            parse_num(args[6])?,
        );
        return Some(ToneData::Square2 {
            key,
            pan,
            duty,
            attack: a,
            decay: d,
            sustain: s,
            release: r,
        });
    }

    if strip_suffix_variants(macro_name, "voice_programmable_wave").is_some() {
        if args.len() < 7 {
            return None;
        }
        let key = parse_num(args[0])? as u8;
        let pan = parse_num(args[1])? as i8;
        let table = load_progwave_cached(wave_symbols, progwave_cache, args[2]);
        let (a, d, s, r) = cgb_adsr(
            parse_num(args[3])?,
            parse_num(args[4])?,
            parse_num(args[5])?,
            parse_num(args[6])?,
        );
        return Some(ToneData::ProgrammableWave {
            key,
            pan,
            table,
            attack: a,
            decay: d,
            sustain: s,
            release: r,
        });
    }

    if strip_suffix_variants(macro_name, "voice_noise").is_some() {
        if args.len() < 7 {
            return None;
        }
        let key = parse_num(args[0])? as u8;
        let pan = parse_num(args[1])? as i8;
        let period = parse_num(args[2])? & 0x1;
        let (a, d, s, r) = cgb_adsr(
            parse_num(args[3])?,
            parse_num(args[4])?,
            parse_num(args[5])?,
            parse_num(args[6])?,
        );
        return Some(ToneData::Noise {
            key,
            pan,
            period_7bit: period != 0,
            attack: a,
            decay: d,
            sustain: s,
            release: r,
        });
    }

    if macro_name == "voice_keysplit" {
        if args.len() < 2 {
            return None;
        }
        let sub = resolver(args[0], wav_cache, progwave_cache);
        let table = keysplit_tables.get(args[1]).copied().unwrap_or([0u8; 128]);
        return Some(ToneData::KeySplit {
            sub,
            table: Rc::new(table),
        });
    }

    if macro_name == "voice_keysplit_all" {
        if args.is_empty() {
            return None;
        }
        let sub = resolver(args[0], wav_cache, progwave_cache);
        return Some(ToneData::DrumKit { sub });
    }

    if let Some(suffix) = strip_suffix_variants(macro_name, "cry") {
        if args.is_empty() {
            return None;
        }
        let wav = load_wav_cached(sample_symbols, wav_cache, args[0]);
        return Some(ToneData::Cry {
            wav,
            reverse: suffix == "_reverse",
        });
    }

    None
}
