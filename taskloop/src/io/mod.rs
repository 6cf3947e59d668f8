//! I/O collaborators: config, child processes, agent, tracker, prompts, logs.

pub mod agent;
pub mod config;
pub mod iteration_log;
pub mod process;
pub mod prompt;
pub mod tracker;
