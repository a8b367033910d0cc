//! Drives the built `strand` binary end to end.

use std::fs;
use std::path::Path;
use std::process::Command;

fn strand() -> Command {
    Command::new(env!("CARGO_BIN_EXE_strand"))
}

#[test]
fn commit_then_restore_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    fs::create_dir_all(source.join("sub")).unwrap();
    fs::write(source.join("a.txt"), b"alpha\n").unwrap();
    fs::write(source.join("sub/b.bin"), vec![7u8; 20_000]).unwrap();
    let repo = dir.path().join("repo");
    let dest = dir.path().join("restored");

    let status = strand()
        .args(["commit"])
        .arg(&source)
        .arg(&repo)
        .status()
        .unwrap();
    assert!(status.success());
    assert!(repo.join("00000").join("recipe").is_file());

    let status = strand()
        .args(["restore"])
        .arg(&repo)
        .arg(&dest)
        .status()
        .unwrap();
    assert!(status.success());

    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha\n");
    assert_eq!(fs::read(dest.join("sub/b.bin")).unwrap(), vec![7u8; 20_000]);
}

#[test]
fn export_to_directory() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("data.bin"), vec![3u8; 9000]).unwrap();
    let repo = dir.path().join("repo");
    let export = dir.path().join("export");

    assert!(strand()
        .args(["commit"])
        .arg(&source)
        .arg(&repo)
        .status()
        .unwrap()
        .success());

    assert!(strand()
        .args(["export"])
        .arg(&repo)
        .arg(&export)
        .args(["--format", "dir"])
        .status()
        .unwrap()
        .success());

    for name in ["chunks", "recipe", "files"] {
        assert!(
            export.join("00000").join(name).is_file(),
            "missing exported {name}"
        );
    }
    // The exported recipe bytes are the stored version file, verbatim.
    assert_eq!(
        fs::read(export.join("00000/recipe")).unwrap(),
        fs::read(repo.join("00000/recipe")).unwrap()
    );
}

#[test]
fn unknown_command_exits_non_zero() {
    let status = strand().arg("frobnicate").status().unwrap();
    assert!(!status.success());
}

#[test]
fn zero_chunk_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let status = strand()
        .args(["-c", "0", "commit"])
        .arg(dir.path().join("source"))
        .arg(dir.path().join("repo"))
        .status()
        .unwrap();
    assert!(!status.success());
}
