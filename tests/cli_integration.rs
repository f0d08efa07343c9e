// CLI integration tests for paths, inspect, and dump.
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Value, json};
use shardkeep::api::{Component, LoadOptions, Registry};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_shardkeep");
    let mut command = Command::new(exe);
    command.env_remove("SHARDKEEP_WORKSPACE").env_remove("RUST_LOG");
    command
}

fn parse_json(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    serde_json::from_str(line).expect("valid json")
}

fn write_config(dir: &Path, workspace: &Path) -> PathBuf {
    let config = json!({
        "kind": "compound",
        "metas": { "name": "real-compound", "workspace": workspace },
        "components": [
            { "kind": "meta", "metas": { "name": "test_meta" } },
            { "kind": "vector_indexer", "with": { "index_filename": "npidx" }, "metas": { "name": "test_numpy" } }
        ]
    });
    let path = dir.join("compound.json");
    std::fs::write(&path, config.to_string()).expect("write config");
    path
}

fn seed_shard(config: &Path, shard_id: u32, rows: &[[f32; 2]]) {
    let options = LoadOptions::new().with_shard_id(shard_id).separated(true);
    let mut node = Registry::default()
        .load_path(config, &options)
        .expect("load");
    let compound = node.as_compound_mut().expect("compound");
    let keys = (0..rows.len() as u64).collect::<Vec<_>>();
    let numpy = compound.get_mut("test_numpy").expect("child");
    numpy
        .as_vector_mut()
        .expect("vector")
        .append(&keys, rows)
        .expect("append");
    numpy.save().expect("save");
    let meta = compound.get_mut("test_meta").expect("child");
    meta.as_meta_mut().expect("meta").set_attr("seeded_by", "cli test");
    meta.save().expect("save");
}

#[test]
fn paths_reports_isolated_layout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);

    let output = cmd()
        .arg("paths")
        .arg(&config)
        .args(["--shard-id", "2", "--separated"])
        .output()
        .expect("paths");
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    let root = &json["paths"];
    assert_eq!(root["name"], "real-compound");
    assert_eq!(root["shard_id"], 2);
    assert!(root.get("payload").is_none());
    let numpy = &root["components"][1];
    assert_eq!(numpy["name"], "test_numpy");
    assert!(
        numpy["payload"]
            .as_str()
            .expect("payload")
            .ends_with("real-compound/shard-2/test_numpy.npidx")
    );
    assert!(
        numpy["snapshot"]
            .as_str()
            .expect("snapshot")
            .ends_with("real-compound/shard-2/test_numpy.bin")
    );
    assert!(!workspace.join("real-compound/shard-2/test_numpy.bin").exists());
}

#[test]
fn read_only_commands_leave_workspace_empty() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);

    for command in ["paths", "inspect"] {
        let output = cmd()
            .arg(command)
            .arg(&config)
            .args(["--shard-id", "4", "--separated"])
            .output()
            .expect(command);
        assert!(output.status.success(), "{command} failed");
    }
    assert!(workspace.is_dir());
    let entries = std::fs::read_dir(&workspace).expect("read dir").count();
    assert_eq!(entries, 0);
}

#[test]
fn inspect_reports_sizes_per_shard() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);
    seed_shard(&config, 1, &[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);

    let output = cmd()
        .arg("inspect")
        .arg(&config)
        .args(["--shard-id", "1", "--separated"])
        .output()
        .expect("inspect");
    assert!(output.status.success());
    let tree = &parse_json(&output.stdout)["tree"];
    assert_eq!(tree["snapshot_exists"], false);
    assert_eq!(tree["dirty"], false);
    let meta = &tree["components"][0];
    assert_eq!(meta["attributes"]["seeded_by"], "cli test");
    let numpy = &tree["components"][1];
    assert_eq!(numpy["size"], 3);
    assert_eq!(numpy["dimension"], 2);
    assert_eq!(numpy["metric"], "euclidean");

    let output = cmd()
        .arg("inspect")
        .arg(&config)
        .args(["--shard-id", "0", "--separated"])
        .output()
        .expect("inspect");
    assert!(output.status.success());
    assert_eq!(parse_json(&output.stdout)["tree"]["components"][1]["size"], 0);
}

#[test]
fn dump_prints_entries_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);
    seed_shard(&config, 2, &[[0.5, 1.5], [2.5, 3.5]]);

    let output = cmd()
        .arg("dump")
        .arg(&config)
        .arg("test_numpy")
        .args(["--shard-id", "2", "--separated", "--limit", "1"])
        .output()
        .expect("dump");
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    assert_eq!(json["component"], "test_numpy");
    assert_eq!(json["total"], 2);
    assert_eq!(json["entries"], json!([{ "key": 0, "vector": [0.5, 1.5] }]));
}

#[test]
fn dump_of_non_indexer_is_type_mismatch() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);

    let output = cmd()
        .arg("dump")
        .arg(&config)
        .arg("test_meta")
        .output()
        .expect("dump");
    assert_eq!(output.status.code(), Some(5));
    let err = &parse_json(&output.stderr)["error"];
    assert_eq!(err["kind"], "TypeMismatch");
    assert_eq!(err["component"], "test_meta");
}

#[test]
fn unknown_child_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);

    let output = cmd()
        .arg("dump")
        .arg(&config)
        .arg("missing")
        .output()
        .expect("dump");
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(parse_json(&output.stderr)["error"]["kind"], "NotFound");
}

#[test]
fn separated_without_shard_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);

    let output = cmd()
        .arg("paths")
        .arg(&config)
        .arg("--separated")
        .output()
        .expect("paths");
    assert_eq!(output.status.code(), Some(2));
    let err = &parse_json(&output.stderr)["error"];
    assert_eq!(err["kind"], "Config");
    assert!(err.get("hint").is_some());
}

#[test]
fn corrupt_snapshot_exits_with_corrupt_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let workspace = temp.path().join("ws");
    let config = write_config(temp.path(), &workspace);
    seed_shard(&config, 0, &[[1.0, 1.0]]);
    let snapshot = workspace.join("real-compound/shard-0/test_numpy.bin");
    std::fs::write(&snapshot, b"not a snapshot").expect("corrupt");

    let output = cmd()
        .arg("inspect")
        .arg(&config)
        .args(["--shard-id", "0", "--separated"])
        .output()
        .expect("inspect");
    assert_eq!(output.status.code(), Some(7));
    let err = &parse_json(&output.stderr)["error"];
    assert_eq!(err["kind"], "CorruptState");
    assert_eq!(err["component"], "test_numpy");
    assert_eq!(err["shard_id"], 0);
}
