//! Symbol indexing: turns `direct_sound_data.inc`-style files into
//! `symbol -> path` maps, and `keysplit_tables.inc` into parsed
//! key-split tables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

/// A fully resolved 128-entry key-split table (sub-voice index per MIDI
/// key).
pub type KeySplitDef = [u8; 128];

pub fn strip_comment(line: &str) -> &str {
    let line = match line.find('@') {
        Some(idx) => &line[..idx],
        None => line,
    };
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Parses a `.set <symbol>, <relative-path>`-style data index file.
/// Tolerant of blank lines and comments; unrecognised lines are
/// skipped with a debug log rather than failing the whole file.
pub fn index_symbol_file(path: &Path, base_dir: &Path) -> HashMap<String, PathBuf> {
    let mut map = HashMap::new();
    let Ok(contents) = fs::read_to_string(path) else {
        warn!("symbol index: could not read {}", path.display());
        return map;
    };

    for raw_line in contents.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if let Some((symbol, rel_path)) = parse_symbol_line(line) {
            debug!("symbol index: {} -> {}", symbol, rel_path);
            map.insert(symbol, base_dir.join(rel_path));
        }
    }
    map
}

fn parse_symbol_line(line: &str) -> Option<(String, String)> {
    let line = line.strip_prefix(".set")?.trim();
    let (symbol, rest) = line.split_once(',')?;
    let rel_path = rest.trim().trim_matches('"').to_string();
    Some((symbol.trim().to_string(), rel_path))
}

/// Parses every key-split table file into a `name -> KeySplitDef` map,
/// supporting both the macro-style (`keysplit`/`split`) and raw-style
/// (`.set`/`.byte`) surface syntaxes.
pub fn index_keysplit_files(paths: &[PathBuf]) -> HashMap<String, KeySplitDef> {
    let mut map = HashMap::new();
    for path in paths {
        parse_keysplit_file(path, &mut map);
    }
    map
}

fn parse_keysplit_file(path: &Path, map: &mut HashMap<String, KeySplitDef>) {
    let Ok(contents) = fs::read_to_string(path) else {
        warn!("keysplit index: could not read {}", path.display());
        return;
    };

    let mut current_macro: Option<(String, u8, KeySplitDef)> = None;
    let mut current_raw: Option<(String, KeySplitDef, usize)> = None;

    for raw_line in contents.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("keysplit") {
            if let Some((name, table)) = current_macro.take() {
                map.insert(format!("keysplit_{name}"), table.2);
                let _ = (name, table);
            }
            if let Some((name, table, _)) = current_raw.take() {
                map.insert(name, table);
            }
            if let Some((name, start)) = parse_two_args(rest) {
                current_macro = Some((name, start as u8, [0u8; 128]));
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("split") {
            if let Some((name_ignored, sub_index)) = parse_two_args(rest) {
                if let Some((_, start_note, table)) = current_macro.as_mut() {
                    let end_note: u8 = name_ignored.parse().unwrap_or(*start_note);
                    let sub_index: u8 = sub_index.parse().unwrap_or(0);
                    for key in *start_note..end_note {
                        table[key as usize] = sub_index;
                    }
                    *start_note = end_note;
                }
            }
            continue;
        }

        if line.starts_with(".set") {
            if let Some((name, table, _)) = current_raw.take() {
                map.insert(name, table);
            }
            if let Some((name, start_note)) = parse_symbol_set(line) {
                current_raw = Some((name, [0u8; 128], start_note));
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(".byte") {
            if let Some((_, table, count)) = current_raw.as_mut() {
                for tok in rest.split(',') {
                    let tok = tok.trim();
                    if let Ok(v) = tok.parse::<u8>() {
                        if *count < table.len() {
                            table[*count] = v;
                            *count += 1;
                        }
                    }
                }
            }
        }
    }

    if let Some((name, _, table)) = current_macro {
        map.insert(format!("keysplit_{name}"), table);
    }
    if let Some((name, table, _)) = current_raw {
        map.insert(name, table);
    }
}

fn parse_two_args(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();
    let (a, b) = rest.split_once(',')?;
    Some((a.trim().to_string(), b.trim().to_string()))
}

/// Parses `.set <Name>, . - <startNote>`, returning the table's starting
/// fill index (`startNote`). Forms without the `. -` offset expression
/// (or that fail to parse as a number) start filling at index 0.
fn parse_symbol_set(line: &str) -> Option<(String, usize)> {
    let rest = line.strip_prefix(".set")?.trim();
    let (name, rhs) = rest.split_once(',')?;
    let start_note = rhs
        .trim()
        .strip_prefix(".")
        .and_then(|s| s.trim_start().strip_prefix('-'))
        .and_then(|s| s.trim().parse::<usize>().ok())
        .unwrap_or(0);
    Some((name.trim().to_string(), start_note))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn indexes_direct_sound_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("direct_sound_data.inc");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "@ comment").unwrap();
        writeln!(file, ".set sample_piano, piano.wav").unwrap();
        writeln!(file, ".set sample_drum, drums/kick.bin").unwrap();
        drop(file);

        let map = index_symbol_file(&path, dir.path());
        assert_eq!(map.get("sample_piano"), Some(&dir.path().join("piano.wav")));
        assert_eq!(map.get("sample_drum"), Some(&dir.path().join("drums/kick.bin")));
    }

    #[test]
    fn parses_macro_style_keysplit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keysplit_tables.inc");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "keysplit lead, 60").unwrap();
        writeln!(file, "split 0, 64").unwrap();
        writeln!(file, "split 1, 72").unwrap();
        drop(file);

        let map = index_keysplit_files(&[path]);
        let table = map.get("keysplit_lead").expect("table present");
        assert_eq!(table[60], 0);
        assert_eq!(table[63], 0);
        assert_eq!(table[64], 1);
        assert_eq!(table[71], 1);
    }

    #[test]
    fn parses_raw_style_keysplit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keysplit_tables.inc");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, ".set DrumKeys, . - 35").unwrap();
        writeln!(file, ".byte 0, 1, 2").unwrap();
        drop(file);

        let map = index_keysplit_files(&[path]);
        let table = map.get("DrumKeys").expect("table present");
        assert_eq!(table[35], 0);
        assert_eq!(table[36], 1);
        assert_eq!(table[37], 2);
        assert_eq!(table[0], 0, "entries before startNote are left zeroed, not shifted into");
    }
}
