//! Recordroom agent library: configuration, logging and the stdin pipe.
//!
//! Kept apart from main.rs so the pipe can be exercised by integration tests.

pub mod config;
pub mod logging;
pub mod pipe;
