//! Integration tests for `sagedet checkpoints`.

use assert_cmd::Command;
use flate2::Compression;
use flate2::write::GzEncoder;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MODEL: &str = "efficientdet_d1_coco17_tpu-32";

fn build_archive(dir: &Path) -> PathBuf {
    let path = dir.join(format!("{MODEL}.tar.gz"));
    let file = std::fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for (name, body) in [
        ("checkpoint/checkpoint", "model_checkpoint_path: \"ckpt-0\"\n"),
        ("checkpoint/ckpt-0.index", "index"),
        ("checkpoint/ckpt-0.data-00000-of-00001", "weights"),
        ("pipeline.config", "model {}\n"),
        ("saved_model/saved_model.pb", "pb"),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, format!("{MODEL}/{name}"), body.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn workspace() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let archive = build_archive(temp_dir.path());
    let config = format!(
        "[[checkpoints]]\nurl = \"file://{}\"\narchive_path = \"{MODEL}/checkpoint\"\n\
         destination = \"source_dir/checkpoint\"\n",
        archive.display()
    );
    std::fs::write(temp_dir.path().join("sagedet.toml"), config).unwrap();
    temp_dir
}

fn sagedet(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sagedet").unwrap();
    cmd.current_dir(dir.path()).env_remove("SAGEDET_WORKSPACE");
    cmd
}

fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> =
        std::fs::read_dir(dir).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().to_string()).collect();
    names.sort();
    names
}

#[test]
fn test_fetch_extracts_checkpoint_subtree() {
    let temp_dir = workspace();
    let dest = temp_dir.path().join("source_dir/checkpoint");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("ckpt-7.index"), "stale").unwrap();

    sagedet(&temp_dir)
        .args(["checkpoints", "fetch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ckpt-0.index"));

    assert_eq!(list(&dest), vec!["checkpoint", "ckpt-0.data-00000-of-00001", "ckpt-0.index"]);
    assert_eq!(std::fs::read_to_string(dest.join("ckpt-0.index")).unwrap(), "index");
}

#[test]
fn test_list_after_fetch() {
    let temp_dir = workspace();
    sagedet(&temp_dir).args(["checkpoints", "fetch", "--json"]).assert().success();

    let output =
        sagedet(&temp_dir).args(["checkpoints", "list", "--json"]).assert().success().get_output().stdout.clone();
    let assets: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let files: Vec<&str> =
        assets[0]["files"].as_array().unwrap().iter().map(|f| f["path"].as_str().unwrap()).collect();
    assert_eq!(files, vec!["checkpoint", "ckpt-0.data-00000-of-00001", "ckpt-0.index"]);
}

#[test]
fn test_fetch_wrong_archive_path_fails() {
    let temp_dir = TempDir::new().unwrap();
    let archive = build_archive(temp_dir.path());
    std::fs::write(
        temp_dir.path().join("sagedet.toml"),
        format!(
            "[[checkpoints]]\nurl = \"{}\"\narchive_path = \"other_model/checkpoint\"\n\
             destination = \"source_dir/checkpoint\"\n",
            archive.display()
        ),
    )
    .unwrap();

    sagedet(&temp_dir).args(["checkpoints", "fetch"]).assert().failure();
    assert!(!temp_dir.path().join("source_dir/checkpoint").exists());
}
