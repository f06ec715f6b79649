//! `requestAnimationFrame` binding and a trivial off-target future driver.
//!
//! The `wasm_bindgen extern "C"` binding is the same shape
//! `components/virtual_list.rs` already declares locally for its own
//! scroll-update throttling; this module generalizes it into one shared
//! binding reused by the scroll controller's lerp/momentum ticks and the
//! engine loop's scroll-tick throttling.

#[cfg(target_arch = "wasm32")]
mod wasm_impl {
    use wasm_bindgen::prelude::*;

    #[wasm_bindgen]
    extern "C" {
        #[wasm_bindgen(js_name = requestAnimationFrame)]
        fn request_animation_frame(closure: &js_sys::Function);

        #[wasm_bindgen(js_name = cancelAnimationFrame)]
        fn cancel_animation_frame(handle: i32);
    }

    /// A cancellable scheduled RAF callback. Dropping it without calling
    /// [`RafHandle::cancel`] leaves the frame scheduled but harmless (the
    /// closure still owns its captured state until it fires once).
    pub struct RafHandle {
        _closure: Closure<dyn FnMut()>,
    }

    pub fn request(mut callback: impl FnMut() + 'static) -> RafHandle {
        let closure = Closure::wrap(Box::new(move || callback()) as Box<dyn FnMut()>);
        request_animation_frame(closure.as_ref().unchecked_ref());
        RafHandle { _closure: closure }
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_impl::{request, RafHandle};

/// Drives idle detection independent of the RAF-throttled render loop: once
/// a scroll burst ends, no further `scroll` events arrive to re-trigger a
/// render tick, so [`crate::scroll::ScrollController::check_idle`] would
/// never be polled again without something else calling it. This loop polls
/// it on a fixed cadence via `gloo_timers`' futures API until `on_tick`
/// reports the host wants to stop (the engine was destroyed).
#[cfg(target_arch = "wasm32")]
pub async fn idle_poll_loop(interval_ms: u32, mut on_tick: impl FnMut() -> bool + 'static) {
    loop {
        gloo_timers::future::TimeoutFuture::new(interval_ms).await;
        if !on_tick() {
            return;
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub struct RafHandle;

#[cfg(not(target_arch = "wasm32"))]
pub fn request(mut callback: impl FnMut() + 'static) -> RafHandle {
    // No event loop off-target: run synchronously so non-wasm unit tests of
    // callers that schedule a tick still observe its effect.
    callback();
    RafHandle
}

/// Off-target (non-wasm) driver for the fire-and-forget futures the
/// scheduler spawns with `wasm_bindgen_futures::spawn_local` on the real
/// target. Every future this crate spawns completes without ever yielding
/// on a real I/O event (the adapter's `read` is caller-supplied and, in
/// tests, resolves immediately), so `futures::executor::block_on` — the
/// corpus-idiomatic way to drive a ready future to completion — is enough;
/// this is a test convenience, not a general executor.
#[cfg(not(target_arch = "wasm32"))]
pub fn block_on<F: std::future::Future<Output = ()>>(fut: F) {
    futures::executor::block_on(fut);
}
