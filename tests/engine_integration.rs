//! End-to-end: load a voicegroup from a constructed project tree and
//! drive it through the engine's note-on/render path.

use std::fs;
use std::io::Write;
use std::path::Path;

use m4a_core::{Engine, EngineConfig, Loader, LoaderConfig};

fn write(path: &Path, contents: &str) {
    let mut file = fs::File::create(path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
}

fn write_minimal_wav(path: &Path) {
    let mut body = Vec::new();
    body.extend_from_slice(b"fmt ");
    body.extend_from_slice(&16u32.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&8000u32.to_le_bytes());
    body.extend_from_slice(&8000u32.to_le_bytes());
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&8u16.to_le_bytes());
    body.extend_from_slice(b"data");
    let samples: Vec<u8> = (0..64).map(|i| 128u8.wrapping_add((i * 7) as u8)).collect();
    body.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    body.extend_from_slice(&samples);

    let mut file = Vec::new();
    file.extend_from_slice(b"RIFF");
    file.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
    file.extend_from_slice(b"WAVE");
    file.extend_from_slice(&body);
    fs::write(path, file).unwrap();
}

fn build_project(root: &Path) {
    fs::create_dir_all(root.join("sound/voicegroups")).unwrap();
    write(&root.join("sound/direct_sound_data.inc"), ".set sample_kick, kick.wav\n");
    write_minimal_wav(&root.join("sound/kick.wav"));
    write(
        &root.join("sound/voicegroups/drums.inc"),
        "voice_directsound 60, 0, sample_kick, 0xFF, 200, 100, 200\n\
         voice_square_1 62, 0, 0, 2, 7, 7, 15, 7\n",
    );
}

#[test]
fn loads_and_renders_a_project() {
    let dir = tempfile::tempdir().unwrap();
    build_project(dir.path());

    let mut loader = Loader::new(dir.path(), &LoaderConfig::default()).unwrap();
    let vg = loader.load("drums").unwrap();

    let mut engine = Engine::init(EngineConfig::new(48_000.0));
    engine.set_voicegroup(vg);

    engine.note_on(0, 60, 127);
    engine.note_on(1, 62, 100);

    let mut l = vec![0.0f32; 4_000];
    let mut r = vec![0.0f32; 4_000];
    engine.process(&mut l, &mut r, 4_000);

    assert!(l.iter().any(|&x| x != 0.0), "PCM + square notes should produce audible output");
    assert!(l.iter().all(|&x| x.is_finite()));
    assert!(r.iter().all(|&x| x.is_finite()));

    engine.note_off(0, 60);
    engine.all_notes_off(1);
    engine.all_sound_off();

    let mut l2 = vec![0.0f32; 1_000];
    let mut r2 = vec![0.0f32; 1_000];
    engine.process(&mut l2, &mut r2, 1_000);
    assert!(l2.iter().all(|&x| x == 0.0));
    assert!(r2.iter().all(|&x| x == 0.0));
}

#[test]
fn missing_voicegroup_name_propagates_not_found() {
    let dir = tempfile::tempdir().unwrap();
    build_project(dir.path());
    let mut loader = Loader::new(dir.path(), &LoaderConfig::default()).unwrap();
    assert!(loader.load("nonexistent").is_err());
}
