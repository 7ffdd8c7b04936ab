use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kiln_core::PROJECT_EXTENSION;
use kiln_engine::{KilnConfig, Workbench};
use kiln_lsp::{CompletionItem, document_uri, file_uri_to_path};
use kiln_types::CursorPos;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "kiln")]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: KilnCommand,
}

#[derive(Debug, Subcommand)]
pub enum KilnCommand {
    /// Create a project file.
    New(New),
    /// Add source files or include directories to a project.
    Add(Add),
    /// Compile the project.
    Build(ProjectArg),
    /// Run the last built executable.
    Run(ProjectArg),
    /// Run the executable under gdb.
    Debug(DebugArgs),
    /// Ask the language server for completions at a position.
    Complete(Complete),
    /// Print language server diagnostics for files.
    Check(Check),
}

#[derive(Debug, Parser)]
pub struct ProjectArg {
    /// Project file. Defaults to the only `*.kproj.json` in the current directory.
    #[arg(long, short)]
    project: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct New {
    name: String,
    /// Project root. Defaults to the current directory.
    #[arg(long)]
    root: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct Add {
    #[command(flatten)]
    project: ProjectArg,
    /// Source files.
    files: Vec<PathBuf>,
    /// Include directories.
    #[arg(long = "include", short = 'I')]
    includes: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
pub struct DebugArgs {
    #[command(flatten)]
    project: ProjectArg,
    /// Breakpoint as `file:line`. Repeatable.
    #[arg(long = "break", short = 'b')]
    breakpoints: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct Complete {
    file: PathBuf,
    /// 0-indexed line.
    #[arg(long)]
    line: u32,
    /// 0-indexed byte column.
    #[arg(long)]
    column: u32,
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

#[derive(Debug, Parser)]
pub struct Check {
    files: Vec<PathBuf>,
    /// How long to wait for every file to receive diagnostics.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

impl KilnCommand {
    pub async fn execute(&self, config: &KilnConfig) -> Result<ExitCode> {
        let mut wb = Workbench::from_config(config, Handle::current());
        match self {
            Self::New(cmd) => cmd.execute(&mut wb),
            Self::Add(cmd) => cmd.execute(&mut wb),
            Self::Build(cmd) => build(&mut wb, cmd).await,
            Self::Run(cmd) => run(&mut wb, cmd).await,
            Self::Debug(cmd) => cmd.execute(&mut wb).await,
            Self::Complete(cmd) => cmd.execute(&mut wb).await,
            Self::Check(cmd) => cmd.execute(&mut wb).await,
        }
    }
}

impl ProjectArg {
    fn open(&self, wb: &mut Workbench) -> Result<()> {
        let path = match &self.project {
            Some(path) => path.clone(),
            None => find_project(&std::env::current_dir()?)?,
        };
        wb.open_project(&path)
            .with_context(|| format!("opening {}", path.display()))
    }
}

/// The single project file in `dir`.
pub fn find_project(dir: &Path) -> Result<PathBuf> {
    let suffix = format!(".{PROJECT_EXTENSION}");
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(&suffix))
        })
        .collect();
    found.sort();

    match found.len() {
        0 => bail!("no *{suffix} in {}; pass --project", dir.display()),
        1 => Ok(found.remove(0)),
        _ => bail!(
            "several project files in {}; pass --project ({})",
            dir.display(),
            found
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolving {}", path.display()))
}

impl New {
    fn execute(&self, wb: &mut Workbench) -> Result<ExitCode> {
        let root = match &self.root {
            Some(root) => absolute(root)?,
            None => std::env::current_dir()?,
        };
        wb.new_project(root, self.name.clone());
        wb.save_project()?;
        println!("{}", wb.project().project_file_path().display());
        Ok(ExitCode::SUCCESS)
    }
}

impl Add {
    fn execute(&self, wb: &mut Workbench) -> Result<ExitCode> {
        self.project.open(wb)?;
        let mut changed = 0;
        for file in &self.files {
            if wb.project_mut().add_source_file(absolute(file)?) {
                changed += 1;
            }
        }
        for dir in &self.includes {
            if wb.project_mut().add_include_dir(absolute(dir)?) {
                changed += 1;
            }
        }
        if changed > 0 {
            wb.save_project()?;
        }
        println!("{changed} added");
        Ok(ExitCode::SUCCESS)
    }
}

async fn build(wb: &mut Workbench, args: &ProjectArg) -> Result<ExitCode> {
    args.open(wb)?;
    let Some(ticket) = wb.build().into_ticket() else {
        bail!("build did not start");
    };
    let report = ticket
        .wait()
        .await
        .context("build task ended without a report")?;
    print_block(&report.output);
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(wb: &mut Workbench, args: &ProjectArg) -> Result<ExitCode> {
    args.open(wb)?;
    let output = wb.run().await?;
    print!("{}", output.text);
    Ok(exit_code(output.exit_code))
}

fn exit_code(code: Option<i32>) -> ExitCode {
    match code {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    }
}

fn print_block(text: &str) {
    if text.ends_with('\n') {
        print!("{text}");
    } else {
        println!("{text}");
    }
}

fn parse_breakpoint(raw: &str) -> Result<(String, u32)> {
    let (file, line) = raw
        .rsplit_once(':')
        .with_context(|| format!("breakpoint '{raw}' is not file:line"))?;
    let line = line
        .parse()
        .with_context(|| format!("breakpoint '{raw}' has no line number"))?;
    Ok((file.to_string(), line))
}

impl DebugArgs {
    async fn execute(&self, wb: &mut Workbench) -> Result<ExitCode> {
        self.project.open(wb)?;
        for raw in &self.breakpoints {
            let (file, line) = parse_breakpoint(raw)?;
            wb.debug_session_mut().add_breakpoint(file, line);
        }
        let output = wb.debug().await?;
        print!("{}", output.text);
        Ok(exit_code(output.exit_code))
    }
}

async fn start_language_server(wb: &mut Workbench) -> Result<()> {
    if !wb.lsp().settings().enabled {
        bail!("language server is disabled in config");
    }
    wb.start_lsp().await.context("starting language server")
}

impl Complete {
    async fn execute(&self, wb: &mut Workbench) -> Result<ExitCode> {
        let file = absolute(&self.file)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        wb.lsp().set_on_completion(move |id, items| {
            let _ = tx.send((id, items.to_vec()));
        });

        start_language_server(wb).await?;
        wb.open_file(&file).await?;
        if let Some(tab) = wb.tabs_mut().current_tab_mut() {
            tab.document_mut()
                .set_cursor_position(CursorPos::new(self.line, self.column));
        }
        let id = wb.complete_at_cursor().await?;

        let items = tokio::time::timeout(Duration::from_millis(self.timeout_ms), async {
            while let Some((got, items)) = rx.recv().await {
                if got == id {
                    return Some(items);
                }
            }
            None
        })
        .await;
        wb.shutdown().await;

        match items {
            Ok(Some(items)) => {
                print_completions(&items);
                Ok(ExitCode::SUCCESS)
            }
            Ok(None) => bail!("language server stopped before answering"),
            Err(_) => bail!("no completion response within {} ms", self.timeout_ms),
        }
    }
}

fn print_completions(items: &[CompletionItem]) {
    for item in items {
        match &item.detail {
            Some(detail) => println!("{}\t{}", item.label, detail),
            None => println!("{}", item.label),
        }
    }
}

impl Check {
    async fn execute(&self, wb: &mut Workbench) -> Result<ExitCode> {
        if self.files.is_empty() {
            bail!("no files to check");
        }
        let files = self
            .files
            .iter()
            .map(|f| absolute(f))
            .collect::<Result<Vec<_>>>()?;
        let mut waiting: HashSet<String> = files
            .iter()
            .map(|f| document_uri(f))
            .collect::<Result<_, _>>()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        wb.lsp().set_on_diagnostics(move |uri, _| {
            let _ = tx.send(uri.to_string());
        });

        start_language_server(wb).await?;
        for file in &files {
            wb.open_file(file).await?;
        }

        let deadline = tokio::time::sleep(Duration::from_millis(self.timeout_ms));
        tokio::pin!(deadline);
        while !waiting.is_empty() {
            tokio::select! {
                () = &mut deadline => {
                    tracing::warn!(pending = waiting.len(), "Stopped waiting for diagnostics");
                    break;
                }
                uri = rx.recv() => match uri {
                    Some(uri) => { waiting.remove(&uri); }
                    None => break,
                },
            }
        }

        let snapshot = wb.lsp().diagnostics_snapshot();
        wb.shutdown().await;

        for (uri, diagnostics) in snapshot.files() {
            let file = file_uri_to_path(uri)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| uri.clone());
            for diagnostic in diagnostics {
                println!("{}", diagnostic.display_with_file(&file));
            }
        }
        if !snapshot.is_empty() {
            eprintln!("{}", snapshot.status_string());
        }

        Ok(if snapshot.error_count() > 0 {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "kiln", "complete", "main.cpp", "--line", "3", "--column", "7",
        ])
        .unwrap();
        let KilnCommand::Complete(cmd) = cli.command else {
            panic!("expected complete");
        };
        assert_eq!((cmd.line, cmd.column, cmd.timeout_ms), (3, 7, 5000));

        let cli = Cli::try_parse_from(["kiln", "add", "-p", "x.kproj.json", "a.cpp", "-I", "inc"])
            .unwrap();
        let KilnCommand::Add(cmd) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(cmd.files, vec![PathBuf::from("a.cpp")]);
        assert_eq!(cmd.includes, vec![PathBuf::from("inc")]);
    }

    #[test]
    fn breakpoints_parse_file_and_line() {
        assert_eq!(
            parse_breakpoint("src/main.cpp:12").unwrap(),
            ("src/main.cpp".to_string(), 12)
        );
        assert_eq!(
            parse_breakpoint("C:/src/main.cpp:4").unwrap(),
            ("C:/src/main.cpp".to_string(), 4)
        );
        assert!(parse_breakpoint("main.cpp").is_err());
        assert!(parse_breakpoint("main.cpp:x").is_err());
    }

    #[test]
    fn find_project_needs_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_project(dir.path()).is_err());

        let first = dir.path().join("a.kproj.json");
        std::fs::write(&first, "{}").unwrap();
        assert_eq!(find_project(dir.path()).unwrap(), first);

        std::fs::write(dir.path().join("b.kproj.json"), "{}").unwrap();
        assert!(find_project(dir.path()).is_err());
    }

    #[test]
    fn exit_codes_follow_child() {
        assert_eq!(exit_code(Some(0)), ExitCode::SUCCESS);
        assert_eq!(exit_code(None), ExitCode::FAILURE);
        assert_eq!(exit_code(Some(3)), ExitCode::from(3));
    }
}
