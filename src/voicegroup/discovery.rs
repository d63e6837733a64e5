//! Project-tree discovery: scans a project root for the files and
//! directories the symbol indexer and voice parser need, without
//! reading their contents.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

const MAX_LIST_LEN: usize = 32;
const SCAN_DEPTH: u32 = 3;

const VOICE_MACROS: &[&str] = &[
    "voice_directsound",
    "voice_square_1",
    "voice_square_2",
    "voice_programmable_wave",
    "voice_noise",
    "voice_keysplit",
    "voice_keysplit_all",
    "cry",
];

/// Extra search-path lists a caller can prepend to auto-discovery.
/// Each list is capped at 8 entries by the caller's convention;
/// discovery itself does not enforce that cap, it only prepends.
#[derive(Default, Clone)]
pub struct LoaderConfig {
    pub sound_data_paths: Vec<PathBuf>,
    pub voicegroup_paths: Vec<PathBuf>,
    pub sample_dirs: Vec<PathBuf>,
}

#[derive(Default)]
pub struct ProjectPaths {
    pub direct_sound_data_files: Vec<PathBuf>,
    pub prog_wave_data_files: Vec<PathBuf>,
    pub key_split_table_files: Vec<PathBuf>,
    pub voicegroup_dirs: Vec<PathBuf>,
    pub monolithic_vg_files: Vec<PathBuf>,
    pub wav_sample_dirs: Vec<PathBuf>,
}

fn push_capped(list: &mut Vec<PathBuf>, path: PathBuf, label: &str) {
    if list.len() >= MAX_LIST_LEN || list.contains(&path) {
        return;
    }
    debug!("discovery: adding {} to {}", path.display(), label);
    list.push(path);
}

pub fn discover_project(root: &Path, config: &LoaderConfig) -> ProjectPaths {
    let mut paths = ProjectPaths::default();

    for p in &config.sound_data_paths {
        push_capped(&mut paths.direct_sound_data_files, p.clone(), "direct_sound_data_files");
    }
    for p in &config.voicegroup_paths {
        classify_config_voicegroup_path(&mut paths, p);
    }
    for p in &config.sample_dirs {
        push_capped(&mut paths.wav_sample_dirs, p.clone(), "wav_sample_dirs");
    }

    let sound_dir = root.join("sound");

    add_if_file(
        &mut paths.direct_sound_data_files,
        sound_dir.join("direct_sound_data.inc"),
        "direct_sound_data_files",
    );
    add_if_file(
        &mut paths.prog_wave_data_files,
        sound_dir.join("programmable_wave_data.inc"),
        "prog_wave_data_files",
    );
    add_if_file(
        &mut paths.key_split_table_files,
        sound_dir.join("keysplit_tables.inc"),
        "key_split_table_files",
    );

    let voicegroups_dir = sound_dir.join("voicegroups");
    add_if_dir(&mut paths.voicegroup_dirs, voicegroups_dir.clone(), "voicegroup_dirs");
    add_if_dir(
        &mut paths.voicegroup_dirs,
        voicegroups_dir.join("keysplits"),
        "voicegroup_dirs",
    );
    add_if_dir(
        &mut paths.voicegroup_dirs,
        voicegroups_dir.join("drumsets"),
        "voicegroup_dirs",
    );

    if sound_dir.is_dir() {
        scan_dirs_recursive(&sound_dir, 0, &mut paths);
    }

    let monolithic_candidate = sound_dir.join("voice_groups.inc");
    if monolithic_candidate.is_file() && is_monolithic_voicegroup_file(&monolithic_candidate) {
        push_capped(&mut paths.monolithic_vg_files, monolithic_candidate, "monolithic_vg_files");
    }

    paths
}

fn classify_config_voicegroup_path(paths: &mut ProjectPaths, path: &Path) {
    if path.is_dir() {
        push_capped(&mut paths.voicegroup_dirs, path.to_path_buf(), "voicegroup_dirs");
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                let p = entry.path();
                if is_asm_source(&p) && is_monolithic_voicegroup_file(&p) {
                    push_capped(&mut paths.monolithic_vg_files, p, "monolithic_vg_files");
                }
            }
        }
    } else if path.is_file() && is_monolithic_voicegroup_file(path) {
        push_capped(&mut paths.monolithic_vg_files, path.to_path_buf(), "monolithic_vg_files");
    }
}

fn add_if_file(list: &mut Vec<PathBuf>, path: PathBuf, label: &str) {
    if path.is_file() {
        push_capped(list, path, label);
    }
}

fn add_if_dir(list: &mut Vec<PathBuf>, path: PathBuf, label: &str) {
    if path.is_dir() {
        push_capped(list, path, label);
    }
}

fn is_asm_source(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("inc") | Some("s")
    )
}

fn scan_dirs_recursive(dir: &Path, depth: u32, paths: &mut ProjectPaths) {
    if depth > SCAN_DEPTH {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut has_voicegroup_source = false;
    let mut has_wav = false;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_dirs_recursive(&path, depth + 1, paths);
        } else if is_asm_source(&path) && mentions_voice_macro(&path) {
            has_voicegroup_source = true;
        } else if path.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("wav")).unwrap_or(false) {
            has_wav = true;
        }
    }

    if has_voicegroup_source {
        debug!("discovery: classifying {} as a voicegroup directory", dir.display());
        push_capped(&mut paths.voicegroup_dirs, dir.to_path_buf(), "voicegroup_dirs");
    }
    if has_wav {
        debug!("discovery: classifying {} as a WAV sample directory", dir.display());
        push_capped(&mut paths.wav_sample_dirs, dir.to_path_buf(), "wav_sample_dirs");
    }
}

fn mentions_voice_macro(path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(path) else {
        return false;
    };
    contents
        .lines()
        .take(50)
        .any(|line| VOICE_MACROS.iter().any(|m| line.contains(m)))
}

/// A file is monolithic if it has at least two top-level labels, at
/// least one voice macro, and more voice macros than `.include`
/// directives.
fn is_monolithic_voicegroup_file(path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(path) else {
        return false;
    };

    let mut top_level_labels = 0usize;
    let mut macro_count = 0usize;
    let mut include_count = 0usize;

    for raw_line in contents.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(' ') && !line.starts_with('\t') && line.ends_with("::") {
            top_level_labels += 1;
        }
        if VOICE_MACROS.iter().any(|m| line.starts_with(m)) {
            macro_count += 1;
        }
        if line.starts_with(".include") {
            include_count += 1;
        }
    }

    top_level_labels >= 2 && macro_count > 0 && macro_count > include_count
}

fn strip_comment(line: &str) -> &str {
    let line = match line.find('@') {
        Some(idx) => &line[..idx],
        None => line,
    };
    match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    }
}
