use std::path::{Path, PathBuf};
use std::{env, io};

use kiln_core::RandomIdSource;
use kiln_lsp::LspSettings;
use kiln_tools::ShellConfig;
use kiln_types::{CompileMode, Compiler, CompilerFlag};
use serde::Deserialize;
use thiserror::Error;

use crate::build::BuildSettings;

/// Replaces `lsp.command` when set.
pub const LSP_COMMAND_ENV: &str = "KILN_LSP_COMMAND";

/// Contents of `~/.kiln/config.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub build: BuildConfig,
    pub lsp: LspSettings,
    pub editor: EditorConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub compiler: Compiler,
    pub flags: Vec<CompilerFlag>,
    pub mode: CompileMode,
    /// Interpreter used for compiler command lines. Platform default when absent.
    pub shell: Option<ShellConfig>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let settings = BuildSettings::default();
        Self {
            compiler: settings.compiler,
            flags: settings.flags,
            mode: settings.mode,
            shell: None,
        }
    }
}

impl BuildConfig {
    #[must_use]
    pub fn settings(&self) -> BuildSettings {
        BuildSettings {
            compiler: self.compiler,
            flags: self.flags.clone(),
            mode: self.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Length of generated tab identifiers.
    pub id_length: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            id_length: RandomIdSource::DEFAULT_LEN,
        }
    }
}

/// Expand `${VAR}` references. Unset variables expand to nothing; an
/// unterminated `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    expand_vars_with(value, |name| env::var(name).ok())
}

fn expand_vars_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = &after[..end];
        if !name.is_empty()
            && let Some(replacement) = lookup(name)
        {
            out.push_str(&replacement);
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

impl KilnConfig {
    /// Load the user config. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Apply `KILN_LSP_COMMAND` and expand `${VAR}` in the server command line.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_with(|name| env::var(name).ok());
    }

    fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(command) = lookup(LSP_COMMAND_ENV).filter(|c| !c.trim().is_empty()) {
            tracing::debug!(command = %command, "LSP command overridden from environment");
            self.lsp.command = command;
        }
        self.lsp.command = expand_vars_with(&self.lsp.command, &lookup);
        for arg in &mut self.lsp.args {
            *arg = expand_vars_with(arg, &lookup);
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kiln").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn expand_vars_no_vars() {
        assert_eq!(expand_vars_with("hello world", vars(&[])), "hello world");
    }

    #[test]
    fn expand_vars_multiple() {
        let lookup = vars(&[("A", "alpha"), ("B", "beta")]);
        assert_eq!(expand_vars_with("${A}-${B}", lookup), "alpha-beta");
    }

    #[test]
    fn expand_vars_missing_becomes_empty() {
        assert_eq!(
            expand_vars_with("before ${NOPE} after", vars(&[])),
            "before  after"
        );
    }

    #[test]
    fn expand_vars_unterminated_is_literal() {
        let lookup = vars(&[("A", "alpha")]);
        assert_eq!(expand_vars_with("${A} ${B", lookup), "alpha ${B");
    }

    #[test]
    fn expand_vars_keeps_unicode() {
        let lookup = vars(&[("HOME", "/home/é")]);
        assert_eq!(expand_vars_with("ü${HOME}/bin", lookup), "ü/home/é/bin");
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: KilnConfig = toml::from_str("").unwrap();
        assert_eq!(config.build.compiler, Compiler::Gcc);
        assert_eq!(config.build.flags, vec![CompilerFlag::Cpp20]);
        assert_eq!(config.build.mode, CompileMode::CompileAndLink);
        assert_eq!(config.lsp, LspSettings::default());
        assert_eq!(config.editor.id_length, 8);
    }

    #[test]
    fn full_file_parses() {
        let config: KilnConfig = toml::from_str(
            r#"
            [build]
            compiler = "clang"
            flags = ["cpp17", "wall", "optimize2"]
            mode = "compile_only"

            [build.shell]
            binary = "bash"

            [lsp]
            command = "clangd-18"
            args = ["--background-index"]
            shutdown_timeout_ms = 500

            [editor]
            id_length = 12
            "#,
        )
        .unwrap();

        let settings = config.build.settings();
        assert_eq!(settings.compiler, Compiler::Clang);
        assert_eq!(
            settings.flags,
            vec![CompilerFlag::Cpp17, CompilerFlag::Wall, CompilerFlag::Optimize2]
        );
        assert_eq!(settings.mode, CompileMode::CompileOnly);
        assert_eq!(
            config.build.shell.and_then(|s| s.binary),
            Some("bash".to_string())
        );
        assert_eq!(config.lsp.command, "clangd-18");
        assert!(config.lsp.enabled);
        assert_eq!(config.editor.id_length, 12);
    }

    #[test]
    fn unknown_flag_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[build]\nflags = [\"turbo\"]\n").unwrap();

        let err = KilnConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), path.as_path());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = KilnConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn env_override_replaces_command() {
        let mut config = KilnConfig::default();
        config.lsp.args = vec!["--log=${LEVEL}".to_string()];
        config.apply_overrides_with(vars(&[
            (LSP_COMMAND_ENV, "/opt/llvm/bin/clangd"),
            ("LEVEL", "verbose"),
        ]));
        assert_eq!(config.lsp.command, "/opt/llvm/bin/clangd");
        assert_eq!(config.lsp.args, vec!["--log=verbose"]);
    }

    #[test]
    fn blank_env_override_is_ignored() {
        let mut config = KilnConfig::default();
        config.apply_overrides_with(vars(&[(LSP_COMMAND_ENV, "  ")]));
        assert_eq!(config.lsp.command, "clangd");
    }
}
