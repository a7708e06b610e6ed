//! Shared wiring for the paystream binaries: network presets and SQLite
//! persistence for resume/dedupe state.

pub mod config;
pub mod persistence;
