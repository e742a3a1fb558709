//! kolibri-bridge - browser-side host bridge for the KolibriScript interpreter
//!
//! The bridge loads `kolibri.wasm` (the compiled KolibriScript interpreter),
//! supplies it an emulated `wasi_snapshot_preview1` subset, and exposes one
//! `ask` operation that synthesizes a KolibriScript program from a prompt,
//! marshals it through guest linear memory, and relays the interpreter's
//! output. When the module cannot be loaded, a same-contract fallback
//! answers every request with a labeled diagnostic instead.
//!
//! # Module binary contract
//!
//! Required exports:
//!
//! | Export                     | Type                                   |
//! |----------------------------|----------------------------------------|
//! | `memory`                   | Memory                                 |
//! | `_malloc`                  | `(size: i32) -> i32` (0 = failure)     |
//! | `_free`                    | `(ptr: i32)`                           |
//! | `_kolibri_bridge_init`     | `() -> i32` (0 = ok)                   |
//! | `_kolibri_bridge_reset`    | `() -> i32` (0 = ok)                   |
//! | `_kolibri_bridge_execute`  | `(program, output, capacity) -> i32`   |
//!
//! `execute` returns the number of output bytes written, or a negative code
//! from the closed set {-1..-5} (see [`abi::ExecuteError`]).
//!
//! Imports provided by the host, under `wasi_snapshot_preview1`:
//! `fd_write`, `fd_fdstat_get`, `fd_close`, `fd_seek`, `environ_sizes_get`,
//! `environ_get`, `args_sizes_get`, `args_get`, `clock_time_get`,
//! `random_get`, `proc_exit` (see [`wasi`]).
//!
//! # Concurrency model
//!
//! Single-threaded cooperative scheduling. The only suspension point is the
//! one-time load; an `ask` runs synchronously from guest allocation to
//! release, which is what keeps concurrent callers from interleaving
//! allocations on the shared guest allocator (see [`session`]).

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod abi;
pub mod error;
pub mod fallback;
pub mod memory;
pub mod script;
pub mod session;
pub mod wasi;

#[cfg(target_arch = "wasm32")]
pub mod loader;

#[cfg(target_arch = "wasm32")]
use fallback::Bridge;
#[cfg(target_arch = "wasm32")]
use session::JsExports;

/// Initialize panic hook for better error messages in browser console
#[cfg(target_arch = "wasm32")]
fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// The bridge as seen from JavaScript
///
/// Obtained from [`create_bridge`]; by the time the constructor's promise
/// resolves the bridge is either live or permanently degraded, so `ask` and
/// `reset` are plain synchronous calls.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub struct KolibriBridge {
    inner: Bridge<JsExports>,
}

/// Load the module and construct the bridge. The resolution of the returned
/// promise is the one-shot readiness signal; it never rejects. A load
/// failure routes every subsequent call to the degraded fallback.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(js_name = createBridge)]
pub async fn create_bridge() -> KolibriBridge {
    init_panic_hook();
    let inner = match loader::load().await {
        Ok(module_exports) => Bridge::ready(module_exports),
        Err(reason) => {
            web_sys::console::warn_1(&JsValue::from_str(
                "[kolibri-bridge] Переход в деградированный режим без WebAssembly.",
            ));
            Bridge::degraded(reason)
        }
    };
    KolibriBridge { inner }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
impl KolibriBridge {
    /// Execute one prompt. Interpreter-side failures and degraded mode both
    /// resolve with diagnostic text; only genuine protocol or memory errors
    /// reject.
    pub fn ask(&self, prompt: &str, mode: Option<String>) -> Result<String, JsValue> {
        self.inner
            .ask(prompt, mode.as_deref())
            .map_err(|error| JsValue::from_str(&error.to_string()))
    }

    /// Reset interpreter state. A no-op in degraded mode.
    pub fn reset(&self) -> Result<(), JsValue> {
        self.inner
            .reset()
            .map_err(|error| JsValue::from_str(&error.to_string()))
    }

    /// Whether the bridge is running the degraded fallback.
    #[wasm_bindgen(js_name = isDegraded)]
    pub fn is_degraded(&self) -> bool {
        self.inner.is_degraded()
    }
}
