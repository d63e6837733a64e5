//! Voicegroup loader: discovers a GBA assembler project tree, indexes
//! its sample/keysplit symbols, and recursively parses voice macros
//! into a resolved [`Voicegroup`] tree.

mod discovery;
mod parser;
mod symbols;
mod types;

pub use discovery::LoaderConfig;
pub use types::{ToneData, Voicegroup};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, error};

use crate::error::LoaderError;
use crate::wave::WaveData;
use discovery::{discover_project, ProjectPaths};
use parser::parse_lines;
use symbols::{index_keysplit_files, index_symbol_file, KeySplitDef};

enum VoiceSource {
    Standalone(PathBuf),
    Monolithic(PathBuf, String),
}

/// Everything discovered about a project tree that doesn't change
/// across loads: file lists and the parsed symbol tables. Kept
/// separate from the mutable caches so the recursive resolver can hold
/// a shared borrow of this while mutably borrowing the caches.
struct ProjectIndex {
    root: PathBuf,
    paths: ProjectPaths,
    sample_symbols: HashMap<String, PathBuf>,
    wave_symbols: HashMap<String, PathBuf>,
    keysplit_tables: HashMap<String, KeySplitDef>,
}

/// Owns everything the loader discovered and cached for one project
/// root, and can resolve any number of top-level voicegroups against
/// it without re-scanning the filesystem.
pub struct Loader {
    index: ProjectIndex,
    wav_cache: HashMap<PathBuf, Rc<WaveData>>,
    progwave_cache: HashMap<PathBuf, Rc<[u8; 16]>>,
    visited: HashSet<PathBuf>,
}

impl Loader {
    pub fn new(project_root: &Path, config: &LoaderConfig) -> Result<Self, LoaderError> {
        if !project_root.is_dir() {
            return Err(LoaderError::NotFound(format!(
                "project root {} does not exist",
                project_root.display()
            )));
        }

        let paths = discover_project(project_root, config);

        let mut sample_symbols = HashMap::new();
        for file in &paths.direct_sound_data_files {
            let base = file.parent().unwrap_or(project_root);
            sample_symbols.extend(index_symbol_file(file, base));
        }

        let mut wave_symbols = HashMap::new();
        for file in &paths.prog_wave_data_files {
            let base = file.parent().unwrap_or(project_root);
            wave_symbols.extend(index_symbol_file(file, base));
        }

        let keysplit_tables = index_keysplit_files(&paths.key_split_table_files);

        Ok(Loader {
            index: ProjectIndex {
                root: project_root.to_path_buf(),
                paths,
                sample_symbols,
                wave_symbols,
                keysplit_tables,
            },
            wav_cache: HashMap::new(),
            progwave_cache: HashMap::new(),
            visited: HashSet::new(),
        })
    }

    /// Loads the top-level voicegroup named `name`, relative to this
    /// loader's discovered project tree.
    pub fn load(&mut self, name: &str) -> Result<Rc<Voicegroup>, LoaderError> {
        let source = locate(&self.index, name).ok_or_else(|| {
            LoaderError::NotFound(format!(
                "voicegroup {name} not found under {}",
                self.index.root.display()
            ))
        })?;
        load_source_rec(
            &self.index,
            &mut self.visited,
            &mut self.wav_cache,
            &mut self.progwave_cache,
            source,
        )
        .map(Rc::new)
        .map_err(|e| {
            error!("failed to load voicegroup {name}: {e}");
            e
        })
    }
}

fn locate(index: &ProjectIndex, name: &str) -> Option<VoiceSource> {
    for dir in &index.paths.voicegroup_dirs {
        let inc = dir.join(format!("{name}.inc"));
        if inc.is_file() {
            return Some(VoiceSource::Standalone(inc));
        }
        let s = dir.join(format!("{name}.s"));
        if s.is_file() {
            return Some(VoiceSource::Standalone(s));
        }
    }

    if let Some(base) = name.strip_suffix("_keysplit").or_else(|| name.strip_suffix("_drumset")) {
        for dir in &index.paths.voicegroup_dirs {
            for sub in ["keysplits", "drumsets"] {
                let candidate = dir.join(sub).join(format!("{base}.inc"));
                if candidate.is_file() {
                    return Some(VoiceSource::Standalone(candidate));
                }
            }
        }
        for dir in &index.paths.voicegroup_dirs {
            let is_split_dir = dir
                .file_name()
                .map(|n| n == "keysplits" || n == "drumsets")
                .unwrap_or(false);
            if is_split_dir {
                let candidate = dir.join(format!("{base}.inc"));
                if candidate.is_file() {
                    return Some(VoiceSource::Standalone(candidate));
                }
            }
        }
    }

    for dir in &index.paths.voicegroup_dirs {
        for candidate in [dir.join(format!("vg_{name}.inc")), dir.join(format!("vg_{name}.s"))] {
            if candidate.is_file() {
                return Some(VoiceSource::Standalone(candidate));
            }
        }
    }

    for file in &index.paths.monolithic_vg_files {
        if let Ok(contents) = fs::read_to_string(file) {
            let label = format!("{name}::");
            if contents.lines().any(|l| l.trim() == label) {
                return Some(VoiceSource::Monolithic(file.clone(), name.to_string()));
            }
        }
    }

    None
}

/// Extracts the label-bounded window of a monolithic file: everything
/// strictly after the `<label>::` line up to (but not including) the
/// next top-level label or a `.align 2` directive.
fn window_monolithic<'a>(lines: &[&'a str], label: &str) -> Vec<&'a str> {
    let target = format!("{label}::");
    let mut out = Vec::new();
    let mut in_window = false;

    for &line in lines {
        let trimmed = line.trim();
        if in_window {
            let is_top_level_label =
                !line.starts_with(' ') && !line.starts_with('\t') && trimmed.ends_with("::");
            if is_top_level_label || trimmed == ".align 2" {
                break;
            }
            out.push(line);
        } else if trimmed == target {
            in_window = true;
        }
    }

    out
}

fn load_source_rec(
    index: &ProjectIndex,
    visited: &mut HashSet<PathBuf>,
    wav_cache: &mut HashMap<PathBuf, Rc<WaveData>>,
    progwave_cache: &mut HashMap<PathBuf, Rc<[u8; 16]>>,
    source: VoiceSource,
) -> Result<Voicegroup, LoaderError> {
    let path = match &source {
        VoiceSource::Standalone(p) => p.clone(),
        VoiceSource::Monolithic(p, _) => p.clone(),
    };

    if visited.contains(&path) {
        return Err(LoaderError::NotFound(format!(
            "cyclic voicegroup reference through {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(&path)?;
    let all_lines: Vec<&str> = contents.lines().collect();

    let window: Vec<&str> = match &source {
        VoiceSource::Standalone(_) => all_lines,
        VoiceSource::Monolithic(_, label) => window_monolithic(&all_lines, label),
    };

    debug!("loading voicegroup source {}", path.display());
    visited.insert(path.clone());

    let mut resolver = |name: &str,
                         wav_cache: &mut HashMap<PathBuf, Rc<WaveData>>,
                         progwave_cache: &mut HashMap<PathBuf, Rc<[u8; 16]>>|
     -> Option<Rc<Voicegroup>> {
        let sub_source = locate(index, name)?;
        load_source_rec(index, visited, wav_cache, progwave_cache, sub_source)
            .map(Rc::new)
            .ok()
    };

    let vg = parse_lines(
        &window,
        &index.sample_symbols,
        &index.wave_symbols,
        &index.keysplit_tables,
        wav_cache,
        progwave_cache,
        &mut resolver,
    );

    visited.remove(&path);
    Ok(vg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &Path, contents: &str) {
        let mut file = fs::File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    fn setup_project(dir: &Path) {
        fs::create_dir_all(dir.join("sound/voicegroups")).unwrap();
        write(
            &dir.join("sound/direct_sound_data.inc"),
            ".set sample_piano, piano.wav\n",
        );
        write(&dir.join("sound/piano.wav"), "");

        // Minimal valid RIFF/WAVE so the sample actually loads.
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&28u32.to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&8000u32.to_le_bytes());
        wav.extend_from_slice(&8000u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&8u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&2u32.to_le_bytes());
        wav.extend_from_slice(&[128, 200]);
        fs::write(dir.join("sound/piano.wav"), wav).unwrap();

        write(
            &dir.join("sound/voicegroups/lead.inc"),
            "voice_directsound 60, 0, sample_piano, 0xFF, 200, 100, 200\n",
        );
    }

    #[test]
    fn loads_a_standalone_voicegroup() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());

        let mut loader = Loader::new(dir.path(), &LoaderConfig::default()).unwrap();
        let vg = loader.load("lead").unwrap();
        match vg.voice(0) {
            ToneData::DirectSound { wav, key, .. } => {
                assert_eq!(*key, 60);
                assert!(wav.is_some());
            }
            _ => panic!("expected DirectSound voice"),
        }
    }

    #[test]
    fn missing_project_root_is_not_found() {
        let result = Loader::new(Path::new("/nonexistent/project/root"), &LoaderConfig::default());
        assert!(matches!(result, Err(LoaderError::NotFound(_))));
    }

    #[test]
    fn missing_voicegroup_name_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        setup_project(dir.path());
        let mut loader = Loader::new(dir.path(), &LoaderConfig::default()).unwrap();
        assert!(matches!(loader.load("nonexistent"), Err(LoaderError::NotFound(_))));
    }

    #[test]
    fn monolithic_window_stops_at_next_label() {
        let lines = vec![
            "Foo::",
            "voice_directsound 60, 0, sample_piano, 0xFF, 200, 100, 200",
            "Bar::",
            "voice_directsound 61, 0, sample_piano, 0xFF, 200, 100, 200",
        ];
        let window = window_monolithic(&lines, "Foo");
        assert_eq!(window.len(), 1);
        assert!(window[0].contains("60"));
    }
}
