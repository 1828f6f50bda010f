//! Steno: an AI chat recorder.
//!
//! One invocation sends one prompt to an AI completion service, streams the
//! response to the terminal and archives the prompt/response pair as a new
//! markdown file in a GitHub repository. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (config record and merges, model
//!   specs, schema checks, transcript formatting). No I/O.
//! - **[`io`]**: Side-effecting adapters (config file and environment,
//!   completion and GitHub HTTP clients, transcript store).
//!
//! [`session`] wires the adapters into a single prompt/response/archive cycle;
//! [`logging`] installs the tracing sinks for a run.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
