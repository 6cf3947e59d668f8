//! Unattended agent loop over an issue-tracker backlog.
//!
//! Each iteration picks the most urgent ready task, runs a coding agent on it
//! once, and streams the agent's output back as it arrives. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (stream decoding, display
//!   filtering, task readiness). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (agent process, tracker CLI,
//!   config, prompts, iteration logs). Behind traits where tests need fakes.
//!
//! [`orchestrator`] coordinates the two and reports progress as a sequence of
//! [`events::RunEvent`]s; [`select`] backs `taskloop next`.

pub mod control;
pub mod core;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod select;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
