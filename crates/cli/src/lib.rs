//! Command handlers and output rendering for the `photoup` binary.
pub mod commands;
pub mod render;
