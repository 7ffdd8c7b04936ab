//! Shared infrastructure utilities for kiln.
//!
//! - **`atomic_write`**: Crash-safe file persistence (temp + rename) used when
//!   saving source buffers and project files.

pub mod atomic_write;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, ParentDirs, atomic_write, atomic_write_with_options,
};
