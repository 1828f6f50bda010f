//! Side-effecting adapters: config files and environment, HTTP services,
//! and the transcript archive.

pub mod completion;
pub mod config;
pub mod github;
pub mod transcript_store;
