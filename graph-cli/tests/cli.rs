use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn graphcli(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("graphcli").expect("binary builds");
    // Keep config, logs and history inside the test directory.
    cmd.current_dir(dir.path()).env("HOME", dir.path()).arg("--quiet");
    cmd
}

#[test]
fn version_flag_prints_and_exits() {
    let dir = TempDir::new().unwrap();
    graphcli(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("graphcli"));
}

#[test]
fn one_shot_queries_run_against_a_fresh_graph() {
    let dir = TempDir::new().unwrap();
    graphcli(&dir)
        .arg("--query=VERTEX;VERTEX;EDGE 1 2 likes;STATS")
        .assert()
        .success()
        .stdout(predicate::str::contains("vertex 1"))
        .stdout(predicate::str::contains("edge 3: 1 -[likes]-> 2"))
        .stdout(predicate::str::contains("vertices: 2, edges: 1"));
}

#[test]
fn piped_commands_run_non_interactively() {
    let dir = TempDir::new().unwrap();
    graphcli(&dir)
        .write_stdin("VERTEX\nLABEL 1 person\nHAS 1 person\nDEGREE 1\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("true"))
        .stdout(predicate::str::contains("0"));
}

#[test]
fn unknown_commands_fail_loudly() {
    let dir = TempDir::new().unwrap();
    graphcli(&dir)
        .arg("--query=FROBNICATE")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown command"));
}
