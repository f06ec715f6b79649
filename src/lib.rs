//! A framework-agnostic virtual list engine for large scrolling DOM lists.
//!
//! The crate is organized around the virtual-list pipeline's own stages:
//! [`size_cache`] is the size cache (A), [`sparse_store`] the sparse item
//! store (B), [`scheduler`] the
//! adapter fetch scheduler (C), [`viewport`] the pure viewport computation
//! (D), [`compression`] the scale engine (E), [`scroll`] the scroll
//! controller (F), [`recycler`] the DOM recycler/renderer (G), and
//! [`engine`] the top-level engine loop and public API (H).

pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod item;
pub mod raf;
pub mod recycler;
pub mod scheduler;
pub mod scroll;
pub mod selection;
pub mod size_cache;
pub mod sparse_store;
pub mod viewport;

pub use config::{Align, EngineOptions, ItemSize};
pub use engine::{Engine, EngineConfig, NoAdapter, ScrollSnapshot};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventKind, Subscription};
pub use item::{ItemSlot, ListItem, PlaceholderKey, Range};
pub use recycler::{Host, TemplateCtx};
pub use scheduler::{Adapter, Direction, ReadRequest, ReadResponse};
pub use selection::SelectionMode;

#[cfg(target_arch = "wasm32")]
pub use recycler::WebSysHost;

use once_cell::sync::OnceCell;

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Installs the panic hook and logger, exactly once regardless of how many
/// times it's called. Follows `main.rs`'s `App` entry point, which
/// does the same pairing (`console_error_panic_hook::set_once` +
/// `wasm_logger::init`) before mounting anything. Callers should invoke this
/// before constructing an [`Engine`]; it is a no-op off the `wasm32` target.
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        #[cfg(target_arch = "wasm32")]
        {
            console_error_panic_hook::set_once();
            wasm_logger::init(wasm_logger::Config::default());
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            let _ = env_logger_fallback();
        }
    });
}

/// Off-target logging: `main.rs` only ever runs under `wasm_logger`, but
/// this crate's own test suite (and any non-wasm host embedding it, e.g. a
/// server-rendered preview) still benefits from `log` output going
/// somewhere. `log::set_boxed_logger` is deliberately allowed to fail
/// silently (`Err` means something else already installed a logger, which
/// is fine).
#[cfg(not(target_arch = "wasm32"))]
fn env_logger_fallback() -> std::result::Result<(), log::SetLoggerError> {
    struct StderrLogger;
    impl log::Log for StderrLogger {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Info
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                eprintln!("[{}] {}", record.level(), record.args());
            }
        }
        fn flush(&self) {}
    }
    static LOGGER: StderrLogger = StderrLogger;
    log::set_logger(&LOGGER).map(|()| log::set_max_level(log::LevelFilter::Info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
