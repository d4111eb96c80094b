//! Core primitives shared by every workflow-engine subsystem.
//!
//! Nothing in here knows about tasks, sessions, or evidence — that
//! domain logic lives in the top-level modules (`entity`, `session`,
//! `workflow`, `evidence`, ...). `core` only provides the ambient
//! plumbing those modules are built from: path/identity resolution,
//! layered config, the dynamic `Value` tree, atomic I/O + locking,
//! timestamps, embedded assets, a git subprocess helper, and the
//! diagnostics event stream.

pub mod assets;
pub mod atomic_io;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod git;
pub mod glob;
pub mod path;
pub mod time;
pub mod value;
