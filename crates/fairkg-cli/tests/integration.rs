//! Integration tests for the fairkg CLI.
//!
//! Run the built binary on small synthetic files and inspect what it writes.

use std::path::{Path, PathBuf};
use std::process::Command;

use burn::backend::ndarray::NdArray;
use fairkg::training::metrics::MetricRecord;
use fairkg::training::trainer::{load_checkpoint_meta, load_encoder};
use fairkg::{KgEncoder, TransEncoderConfig};

const NUM_USERS: usize = 16;
const NUM_SUBS: usize = 4;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_fairkg"))
}

fn write_triplets(dir: &Path) -> PathBuf {
    let path = dir.join("triplets.txt");
    let text: String = (0..NUM_USERS)
        .map(|u| format!("{u}\t{}\n", u % NUM_SUBS))
        .collect();
    std::fs::write(&path, text).unwrap();
    path
}

fn write_attribute(dir: &Path) -> PathBuf {
    let path = dir.join("gender.json");
    let labels: Vec<i64> = (0..NUM_USERS as i64).map(|u| u % 2).collect();
    let json = serde_json::json!({ "name": "gender", "num_classes": 2, "labels": labels });
    std::fs::write(&path, json.to_string()).unwrap();
    path
}

#[test]
fn test_summary_json() {
    let tmp = tempfile::TempDir::new().unwrap();
    let triplets = write_triplets(tmp.path());

    let output = bin()
        .args(["summary", "--json", "--triplets"])
        .arg(&triplets)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["triplets"], NUM_USERS);
    assert_eq!(summary["num_users"], NUM_USERS);
    assert_eq!(summary["num_subreddits"], NUM_SUBS);
}

#[test]
fn test_summary_missing_file_fails() {
    let output = bin()
        .args(["summary", "--triplets", "/nonexistent/triplets.txt"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn test_train_writes_checkpoints_and_metrics() {
    let tmp = tempfile::TempDir::new().unwrap();
    let triplets = write_triplets(tmp.path());
    let attribute = write_attribute(tmp.path());
    let out_dir = tmp.path().join("ckpt");
    let metrics = tmp.path().join("metrics.jsonl");
    let config = tmp.path().join("train.toml");
    std::fs::write(
        &config,
        "[training]\nembed_dim = 4\nhidden_dim = 8\nd_steps = 1\nnum_epochs = 5\n",
    )
    .unwrap();

    let output = bin()
        .arg("train")
        .arg("--triplets")
        .arg(&triplets)
        .arg("--attribute")
        .arg(&attribute)
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&out_dir)
        .arg("--metrics")
        .arg(&metrics)
        .args(["--epochs", "2", "--batch-size", "8", "--sample-mask"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    // CLI epochs beat the TOML value
    assert!(out_dir.join("epoch_0").exists());
    assert!(out_dir.join("epoch_1").exists());
    assert!(!out_dir.join("epoch_2").exists());
    assert!(out_dir.join("config.json").exists());

    let meta = load_checkpoint_meta(&out_dir.join("epoch_1")).unwrap();
    assert_eq!(meta.epoch, 1);
    assert_eq!(meta.batches, 2);
    assert_eq!(meta.attributes, vec!["gender".to_string()]);

    let device = Default::default();
    let encoder_config = TransEncoderConfig::new(NUM_USERS, NUM_SUBS)
        .with_embed_dim(4)
        .with_num_filters(1);
    let encoder =
        load_encoder::<NdArray<f32>>(&out_dir.join("epoch_1/encoder"), &encoder_config, &device)
            .unwrap();
    assert_eq!(encoder.embed_dim(), 4);

    let records: Vec<MetricRecord> = std::fs::read_to_string(&metrics)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.iter().filter(|r| r.name == "NCE Loss").count(), 2);
    assert_eq!(records.iter().filter(|r| r.name == "Train gender Disc").count(), 2);
}

#[test]
fn test_train_rejects_odd_batch() {
    let tmp = tempfile::TempDir::new().unwrap();
    let triplets = write_triplets(tmp.path());

    let output = bin()
        .arg("train")
        .arg("--triplets")
        .arg(&triplets)
        .arg("--output-dir")
        .arg(tmp.path().join("ckpt"))
        .args(["--epochs", "1", "--batch-size", "5"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("even"));
}
