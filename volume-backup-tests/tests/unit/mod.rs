//! Unit tests against the public library API
//!
//! Run with: `cargo test -p volume-backup-tests --test unit`

mod config;
mod labels;
mod retention;
