//! The `kiln` binary end to end. HOME points into a temp dir so the user's
//! config and logs are never touched.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

use crate::common::write;

fn kiln(home: &Path, cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_kiln"))
        .args(args)
        .current_dir(cwd)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("KILN_LSP_COMMAND")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn new_then_add_records_absolute_paths() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    write(work.path(), "main.cpp", "int main() {}\n");
    std::fs::create_dir(work.path().join("include")).unwrap();

    let out = kiln(home.path(), work.path(), &["new", "demo"]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).trim_end().ends_with("demo.kproj.json"));

    let out = kiln(
        home.path(),
        work.path(),
        &["add", "main.cpp", "main.cpp", "-I", "include"],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "2 added");

    let raw = std::fs::read_to_string(work.path().join("demo.kproj.json")).unwrap();
    let json: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["name"], "demo");
    let sources = json["sourceFiles"].as_array().unwrap();
    assert_eq!(sources.len(), 1);
    let source = Path::new(sources[0].as_str().unwrap());
    assert!(source.is_absolute());
    assert!(source.ends_with("main.cpp"));
    assert_eq!(json["includeDirs"].as_array().unwrap().len(), 1);

    // Nothing new the second time; the file is left alone.
    let out = kiln(home.path(), work.path(), &["add", "main.cpp"]);
    assert_eq!(stdout(&out).trim(), "0 added");
}

#[test]
fn logs_go_to_home_not_stdout() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let out = kiln(home.path(), work.path(), &["new", "demo"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out).lines().count(), 1);
    assert!(home.path().join(".kiln/logs/kiln.log").exists());
}

#[test]
fn build_without_project_file_fails() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let out = kiln(home.path(), work.path(), &["build"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("pass --project"), "{}", stderr(&out));
}

#[test]
fn build_with_two_project_files_asks_for_one() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    assert!(kiln(home.path(), work.path(), &["new", "a"]).status.success());
    assert!(kiln(home.path(), work.path(), &["new", "b"]).status.success());

    let out = kiln(home.path(), work.path(), &["build"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("several project files"));
}

#[test]
fn check_refuses_when_language_server_disabled() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    std::fs::create_dir(home.path().join(".kiln")).unwrap();
    write(
        &home.path().join(".kiln"),
        "config.toml",
        "[lsp]\nenabled = false\n",
    );
    write(work.path(), "main.cpp", "int main() {}\n");

    let out = kiln(home.path(), work.path(), &["check", "main.cpp"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("disabled"), "{}", stderr(&out));
}

#[test]
fn broken_config_is_reported_and_ignored() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    std::fs::create_dir(home.path().join(".kiln")).unwrap();
    write(&home.path().join(".kiln"), "config.toml", "[build\n");

    let out = kiln(home.path(), work.path(), &["new", "demo"]);
    assert!(out.status.success());
    assert!(stderr(&out).contains("Ignoring config"));
}

#[test]
fn debug_rejects_malformed_breakpoint() {
    let home = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();
    assert!(kiln(home.path(), work.path(), &["new", "demo"]).status.success());

    let out = kiln(home.path(), work.path(), &["debug", "-b", "main.cpp"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("not file:line"), "{}", stderr(&out));
}
