//! Stable exit codes for the steno CLI.

/// The response was streamed and archived.
pub const OK: i32 = 0;
/// Configuration was invalid, the prompt was blank, or the transcript
/// repository could not be connected.
pub const INVALID: i32 = 1;
/// Bad command-line usage. Reserved: clap exits with this code on its own.
pub const USAGE: i32 = 2;
/// The configured service or model is not supported; no AI call was made.
pub const UNSUPPORTED: i32 = 3;
/// The response was printed but could not be archived.
pub const ARCHIVE_FAILED: i32 = 4;
/// The completion request failed.
pub const COMPLETION_FAILED: i32 = 5;
