//! Orchestration layer for kiln.
//!
//! - [`build`]: compiler invocation with a single in-flight build, plus running the result.
//! - [`debug`]: breakpoint bookkeeping and `gdb` launch.
//! - [`config`]: `~/.kiln/config.toml`.
//! - [`Workbench`]: the explicitly owned object tying tabs, project, build and
//!   language server together.

pub mod build;
pub mod config;
pub mod debug;
mod workbench;

pub use build::{
    BUILD_SUCCEEDED_NO_OUTPUT, BuildOrchestrator, BuildReport, BuildSettings, BuildSubmission,
    BuildTicket, COMPILER_SPAWN_FAILED, Launcher, RunError, ShellLauncher, build_command,
    flags_to_string, sources_to_string,
};
pub use config::{BuildConfig, ConfigError, EditorConfig, KilnConfig, LSP_COMMAND_ENV};
pub use debug::{Breakpoint, BreakpointKind, BreakpointStatus, DebugError, DebugSession};
pub use workbench::{Workbench, WorkbenchError};
