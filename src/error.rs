//! Error taxonomy (§7).
//!
//! Follows the `thiserror`-derived library error enums used by the
//! `terraphim-core` / `terraphim_types` crates; `main.rs` itself only
//! reaches for `anyhow` at its binary's top level, which doesn't fit a
//! library crate meant to be matched on by callers.

use thiserror::Error;

/// Context a failed adapter call happened in, attached to `Error::Adapter`
/// and to the `error` event payload (§4.3, §7.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterContext {
    EnsureRange,
    LoadMore,
    LoadInitial,
}

impl std::fmt::Display for AdapterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdapterContext::EnsureRange => "ensureRange",
            AdapterContext::LoadMore => "loadMore",
            AdapterContext::LoadInitial => "loadInitial",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid construction config (§7.1) — fails at `create`, the
    /// engine is never built.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    /// The user-supplied adapter's `read` rejected or threw (§7.2).
    /// The engine stays operable; this is stored in state and emitted, not
    /// propagated as a panic.
    #[error("adapter read failed during {context}: {message}")]
    Adapter {
        context: AdapterContext,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
