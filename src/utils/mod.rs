/// Shared helpers for subprocesses and polling
pub mod command;
pub mod polling;
