//! Process plumbing shared by the build and run paths.
//!
//! - [`shell`]: picks the command interpreter that runs compiler invocations.
//! - [`process`]: spawns a child, waits for it, and captures its console output.

pub mod process;
pub mod shell;

pub use process::{CapturedOutput, ProcessError, run_executable, run_shell_command};
pub use shell::{DetectedShell, ShellConfig, detect_shell, quote_arg};
