//! Integration tests for xsh.
//!
//! These tests verify end-to-end scenarios including:
//! - Group fan-out with isolated per-host failures
//! - Copy steps validated against the local filesystem
//! - Task files from YAML through to rendered results
//! - Inventory and settings loaded from disk

mod common;

mod integration {
    pub mod config;
    pub mod dispatch;
    pub mod task;
}
