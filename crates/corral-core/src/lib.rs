//! Shared foundation for the corral fleet control plane: entity types,
//! configuration, the on-disk coordination layout, append-only JSONL logs,
//! and PID/lockfile guards.
//!
//! Everything here is also a contract with out-of-process tooling — the
//! files under `pids/`, `panes/`, and `.beads/` are read and written by
//! shell helpers that predate this crate, so formats stay stable and all
//! rewrites go through atomic rename.

pub mod activity;
pub mod config;
pub mod fsutil;
pub mod heartbeat;
pub mod lockfile;
pub mod paths;
pub mod pidfile;
pub mod types;
