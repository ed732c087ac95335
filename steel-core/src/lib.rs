//! # Steel Core
//!
//! The chunk system of the Steel server: ticket driven loading, staged world generation,
//! lighting, saving and unloading of chunks.
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    clippy::unwrap_used
)]
#![allow(
    clippy::single_call_fn,
    clippy::multiple_inherent_impl,
    clippy::shadow_unrelated,
    clippy::missing_errors_doc,
    clippy::struct_excessive_bools,
    clippy::needless_pass_by_value,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

/// The chunk module.
pub mod chunk;
/// Chunk persistence.
pub mod chunk_saver;
/// The chunk system configuration.
pub mod config;
