//! Compiler selection and command-line flag vocabulary.
//!
//! Every enum variant maps to exactly one canonical command-line token.
//! The mapping is total and stable so build invocations are reproducible.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown compiler '{0}' (expected gcc, clang or msvc)")]
pub struct UnknownCompiler(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown compiler flag '{0}'")]
pub struct UnknownCompilerFlag(String);

/// Supported compiler front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    #[default]
    #[serde(alias = "g++")]
    Gcc,
    #[serde(alias = "cl")]
    Msvc,
    Clang,
}

impl Compiler {
    pub const ALL: [Compiler; 3] = [Compiler::Gcc, Compiler::Msvc, Compiler::Clang];

    /// Executable name invoked for this compiler.
    #[must_use]
    pub const fn executable(self) -> &'static str {
        match self {
            Self::Gcc => "g++",
            Self::Msvc => "cl",
            Self::Clang => "clang",
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Gcc => "gcc",
            Self::Msvc => "msvc",
            Self::Clang => "clang",
        }
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compiler {
    type Err = UnknownCompiler;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gcc" | "g++" => Ok(Self::Gcc),
            "msvc" | "cl" => Ok(Self::Msvc),
            "clang" | "clang++" => Ok(Self::Clang),
            other => Err(UnknownCompiler(other.to_string())),
        }
    }
}

/// Whether the compiler should link or stop after producing object files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileMode {
    #[default]
    CompileAndLink,
    CompileOnly,
}

impl CompileMode {
    /// Token for this mode, `None` when the mode adds nothing to the command line.
    #[must_use]
    pub const fn as_flag(self) -> Option<&'static str> {
        match self {
            Self::CompileAndLink => None,
            Self::CompileOnly => Some("-c"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilerFlag {
    // Language standards
    Cpp98,
    Cpp03,
    Cpp11,
    Cpp14,
    Cpp17,
    Cpp20,
    Cpp23,

    // Optimization levels
    Optimize0,
    Optimize1,
    Optimize2,
    Optimize3,
    OptimizeSize,
    OptimizeFast,

    // Warnings
    Wall,
    Wextra,
    Werror,

    Debug,

    // Runtime sanitizers
    AddressSanitizer,
    ThreadSanitizer,
    UndefinedBehaviorSanitizer,

    Pedantic,
    StdLibcxx,
    NoExceptions,
    NoRtti,
}

impl CompilerFlag {
    pub const ALL: [CompilerFlag; 24] = [
        CompilerFlag::Cpp98,
        CompilerFlag::Cpp03,
        CompilerFlag::Cpp11,
        CompilerFlag::Cpp14,
        CompilerFlag::Cpp17,
        CompilerFlag::Cpp20,
        CompilerFlag::Cpp23,
        CompilerFlag::Optimize0,
        CompilerFlag::Optimize1,
        CompilerFlag::Optimize2,
        CompilerFlag::Optimize3,
        CompilerFlag::OptimizeSize,
        CompilerFlag::OptimizeFast,
        CompilerFlag::Wall,
        CompilerFlag::Wextra,
        CompilerFlag::Werror,
        CompilerFlag::Debug,
        CompilerFlag::AddressSanitizer,
        CompilerFlag::ThreadSanitizer,
        CompilerFlag::UndefinedBehaviorSanitizer,
        CompilerFlag::Pedantic,
        CompilerFlag::StdLibcxx,
        CompilerFlag::NoExceptions,
        CompilerFlag::NoRtti,
    ];

    /// Canonical command-line token.
    #[must_use]
    pub const fn as_flag(self) -> &'static str {
        match self {
            Self::Cpp98 => "-std=c++98",
            Self::Cpp03 => "-std=c++03",
            Self::Cpp11 => "-std=c++11",
            Self::Cpp14 => "-std=c++14",
            Self::Cpp17 => "-std=c++17",
            Self::Cpp20 => "-std=c++20",
            Self::Cpp23 => "-std=c++23",
            Self::Optimize0 => "-O0",
            Self::Optimize1 => "-O1",
            Self::Optimize2 => "-O2",
            Self::Optimize3 => "-O3",
            Self::OptimizeSize => "-Os",
            Self::OptimizeFast => "-Ofast",
            Self::Wall => "-Wall",
            Self::Wextra => "-Wextra",
            Self::Werror => "-Werror",
            Self::Debug => "-g",
            Self::AddressSanitizer => "-fsanitize=address",
            Self::ThreadSanitizer => "-fsanitize=thread",
            Self::UndefinedBehaviorSanitizer => "-fsanitize=undefined",
            Self::Pedantic => "-pedantic",
            Self::StdLibcxx => "-stdlib=libc++",
            Self::NoExceptions => "-fno-exceptions",
            Self::NoRtti => "-fno-rtti",
        }
    }

    /// Name used in configuration files (matches the serde representation).
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpp98 => "cpp98",
            Self::Cpp03 => "cpp03",
            Self::Cpp11 => "cpp11",
            Self::Cpp14 => "cpp14",
            Self::Cpp17 => "cpp17",
            Self::Cpp20 => "cpp20",
            Self::Cpp23 => "cpp23",
            Self::Optimize0 => "optimize0",
            Self::Optimize1 => "optimize1",
            Self::Optimize2 => "optimize2",
            Self::Optimize3 => "optimize3",
            Self::OptimizeSize => "optimize_size",
            Self::OptimizeFast => "optimize_fast",
            Self::Wall => "wall",
            Self::Wextra => "wextra",
            Self::Werror => "werror",
            Self::Debug => "debug",
            Self::AddressSanitizer => "address_sanitizer",
            Self::ThreadSanitizer => "thread_sanitizer",
            Self::UndefinedBehaviorSanitizer => "undefined_behavior_sanitizer",
            Self::Pedantic => "pedantic",
            Self::StdLibcxx => "std_libcxx",
            Self::NoExceptions => "no_exceptions",
            Self::NoRtti => "no_rtti",
        }
    }
}

impl fmt::Display for CompilerFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

impl FromStr for CompilerFlag {
    type Err = UnknownCompilerFlag;

    /// Accepts either the canonical token (`-O2`) or the config name (`optimize2`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        Self::ALL
            .iter()
            .find(|f| f.as_flag() == trimmed || f.name() == lower)
            .copied()
            .ok_or_else(|| UnknownCompilerFlag(trimmed.to_string()))
    }
}
