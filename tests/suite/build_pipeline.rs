//! Build and run through the workbench with a recording compiler.

use kiln_core::Project;
use kiln_engine::{BUILD_SUCCEEDED_NO_OUTPUT, BuildSubmission};
use kiln_tools::quote_arg;
use serde_json::Value;

use crate::common::{RecordingLauncher, workbench, write};

#[tokio::test]
async fn build_saves_edits_before_compiling() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() {}\n");

    let (mut wb, _wire) = workbench(RecordingLauncher::new("main.cpp:1: warning: meh\n"));
    wb.new_project(dir.path(), "demo");
    wb.project_mut().add_source_file(&main);
    wb.open_file(&main).await.unwrap();
    wb.tabs_mut()
        .current_tab_mut()
        .unwrap()
        .document_mut()
        .insert_text(0, "// edited\n");

    let ticket = wb.build().into_ticket().expect("build should start");
    let report = ticket.wait().await.unwrap();

    assert_eq!(
        std::fs::read_to_string(&main).unwrap(),
        "// edited\nint main() {}\n"
    );
    assert!(!wb.tabs().has_unsaved_changes());
    assert!(report.success);
    assert_eq!(report.output, "main.cpp:1: warning: meh\n");
    assert_eq!(
        wb.build_orchestrator().last_build_output().as_deref(),
        Some("main.cpp:1: warning: meh\n")
    );

    let commands = wb.build_orchestrator().launcher().commands.lock().unwrap().clone();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].starts_with("g++ "));
    assert!(commands[0].contains(&quote_arg(&main)));
    assert!(commands[0].contains(&format!("-o {}", quote_arg(&wb.project().executable_path()))));
}

#[tokio::test]
async fn every_build_sees_the_latest_edits() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() {}\n");

    let (mut wb, _wire) = workbench(RecordingLauncher::new(""));
    wb.new_project(dir.path(), "demo");
    wb.project_mut().add_source_file(&main);
    wb.open_file(&main).await.unwrap();

    wb.build().into_ticket().unwrap().wait().await.unwrap();
    assert!(!wb.project().is_dirty());

    wb.tabs_mut()
        .current_tab_mut()
        .unwrap()
        .document_mut()
        .insert_text(0, "// second\n");
    wb.build().into_ticket().unwrap().wait().await.unwrap();

    assert_eq!(
        std::fs::read_to_string(&main).unwrap(),
        "// second\nint main() {}\n"
    );
    assert!(!wb.tabs().has_unsaved_changes());
    assert_eq!(wb.build_orchestrator().launcher().compiles(), 2);
}

#[tokio::test]
async fn build_writes_project_file_in_camel_case() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() {}\n");

    let (mut wb, _wire) = workbench(RecordingLauncher::new(""));
    wb.new_project(dir.path(), "demo");
    wb.project_mut().add_source_file(&main);
    wb.project_mut().add_include_dir(dir.path().join("include"));

    let report = wb.build().into_ticket().unwrap().wait().await.unwrap();
    assert_eq!(report.output, BUILD_SUCCEEDED_NO_OUTPUT);

    let path = dir.path().join("demo.kproj.json");
    let json: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["name"], "demo");
    assert_eq!(json["compiler"], "gcc");
    assert_eq!(json["sourceFiles"].as_array().unwrap().len(), 1);
    assert_eq!(json["includeDirs"].as_array().unwrap().len(), 1);
    assert!(json.get("projectFilePath").is_some());
    assert!(json.get("source_files").is_none());

    let reopened = Project::open(&path).unwrap();
    assert_eq!(reopened.source_files(), wb.project().source_files());
    assert!(!reopened.is_dirty());
}

#[tokio::test]
async fn second_build_is_rejected_while_first_runs() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(dir.path(), "main.cpp", "int main() {}\n");

    let (mut wb, _wire) = workbench(RecordingLauncher::gated(""));
    wb.new_project(dir.path(), "demo");
    wb.project_mut().add_source_file(&main);

    let first = wb.build().into_ticket().unwrap();
    assert!(wb.build_orchestrator().is_building());
    assert!(matches!(wb.build(), BuildSubmission::AlreadyRunning));

    wb.build_orchestrator().launcher().release();
    first.wait().await.unwrap();
    assert!(!wb.build_orchestrator().is_building());
    assert_eq!(wb.build_orchestrator().launcher().compiles(), 1);

    wb.build_orchestrator().launcher().release();
    let again = wb.build().into_ticket().unwrap();
    again.wait().await.unwrap();
    assert_eq!(wb.build_orchestrator().launcher().compiles(), 2);
}

#[tokio::test]
async fn build_without_project_does_nothing() {
    let (mut wb, _wire) = workbench(RecordingLauncher::new(""));
    assert!(matches!(wb.build(), BuildSubmission::NoProject));
    assert_eq!(wb.build_orchestrator().launcher().compiles(), 0);
}

#[tokio::test]
async fn run_executes_project_target() {
    let dir = tempfile::tempdir().unwrap();
    let (mut wb, _wire) = workbench(RecordingLauncher::new(""));
    wb.new_project(dir.path(), "demo");

    let output = wb.run().await.unwrap();
    assert_eq!(output.text, "Hello from the program\n");
    assert_eq!(
        wb.build_orchestrator().last_console_output().as_deref(),
        Some("Hello from the program\n")
    );
    let programs = wb.build_orchestrator().launcher().programs.lock().unwrap().clone();
    assert_eq!(programs, vec![wb.project().executable_path()]);
}
