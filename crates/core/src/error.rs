//! Shared error variants reused across every taskfabric crate.
//!
//! Each crate defines its own `thiserror`-derived error enum (following
//! `layer4::Layer4Error`'s pattern of one error type per subsystem) but
//! several failure modes recur verbatim across the spec (§7): not-found,
//! invalid-argument, and timeout. They live here so crates convert into
//! them with `#[from]` instead of redefining them.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timed out after waiting for: {0}")]
    Timeout(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
