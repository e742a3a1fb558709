//! Module loader
//!
//! Fetches and instantiates `kolibri.wasm` against the WASI emulator's
//! import table, validates the required entry points, and runs the module's
//! one-time initialization. The loader either hands back a fully usable
//! export table or a textual reason an end user can act on — never a
//! half-initialized instance and never an uncaught exception.
//!
//! Instantiation prefers the streaming path (compile while downloading). The
//! common way that fails is a serving layer without the `application/wasm`
//! content type, so a full-fetch ArrayBuffer path is always tried before the
//! load is declared failed.

#![cfg(target_arch = "wasm32")]

use js_sys::{Function, Object, Reflect, WebAssembly};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::Response;

use crate::abi::{exports, WASM_INFO_URL, WASM_RESOURCE_URL};
use crate::error::{BridgeError, BridgeResult};
use crate::memory::GuestMemory;
use crate::session::{describe_js_value, JsExports};
use crate::wasi::WasiContext;

/// Load and initialize the Kolibri module.
///
/// On failure the returned reason already includes the co-located
/// `kolibri.wasm.txt` diagnostic when that resource is reachable.
pub async fn load() -> Result<JsExports, String> {
    match try_load().await {
        Ok(module_exports) => Ok(module_exports),
        Err(error) => Err(describe_failure(&error).await),
    }
}

async fn try_load() -> BridgeResult<JsExports> {
    let wasi = WasiContext::new(Some(Box::new(|text| {
        web_sys::console::debug_2(
            &JsValue::from_str("[kolibri-bridge][wasi]"),
            &JsValue::from_str(text),
        );
    })))?;
    let imports = wasi.import_object()?;

    let instance = instantiate(&imports).await?;
    let export_table = instance.exports();

    // Bind memory into the emulator before any entry point can run.
    let memory = resolve_memory(&export_table)?;
    wasi.bind_memory(memory.clone());

    let module_exports = JsExports::new(
        GuestMemory::new(memory),
        resolve_function(&export_table, exports::MALLOC)?,
        resolve_function(&export_table, exports::FREE)?,
        resolve_function(&export_table, exports::INIT)?,
        resolve_function(&export_table, exports::RESET)?,
        resolve_function(&export_table, exports::EXECUTE)?,
    );

    use crate::session::ModuleExports;
    let code = module_exports.init()?;
    if code != 0 {
        return Err(BridgeError::InitFailed { code });
    }

    Ok(module_exports)
}

/// Streaming instantiation with an ArrayBuffer fallback
async fn instantiate(imports: &Object) -> BridgeResult<WebAssembly::Instance> {
    let window = web_sys::window().ok_or_else(|| BridgeError::Load {
        reason: "объект window недоступен".to_string(),
    })?;

    let streaming =
        WebAssembly::instantiate_streaming(&window.fetch_with_str(WASM_RESOURCE_URL), imports);
    match JsFuture::from(streaming).await {
        Ok(result) => return extract_instance(&result),
        Err(error) => {
            // Usually a missing application/wasm content type.
            web_sys::console::warn_2(
                &JsValue::from_str(
                    "Kolibri WASM streaming instantiation failed, retrying with ArrayBuffer.",
                ),
                &error,
            );
        }
    }

    let response = fetch(&window, WASM_RESOURCE_URL).await?;
    if !response.ok() {
        return Err(BridgeError::Load {
            reason: format!(
                "Не удалось загрузить kolibri.wasm: {} {}",
                response.status(),
                response.status_text()
            ),
        });
    }

    let buffer_promise = response.array_buffer().map_err(|error| BridgeError::Load {
        reason: format!(
            "Не удалось прочитать kolibri.wasm: {}",
            describe_js_value(&error)
        ),
    })?;
    let buffer = JsFuture::from(buffer_promise)
        .await
        .map_err(|error| BridgeError::Load {
            reason: format!(
                "Не удалось прочитать kolibri.wasm: {}",
                describe_js_value(&error)
            ),
        })?;
    let bytes = js_sys::Uint8Array::new(&buffer).to_vec();

    let result = JsFuture::from(WebAssembly::instantiate_buffer(&bytes, imports))
        .await
        .map_err(|error| BridgeError::Load {
            reason: describe_js_value(&error),
        })?;
    extract_instance(&result)
}

async fn fetch(window: &web_sys::Window, url: &str) -> BridgeResult<Response> {
    let value = JsFuture::from(window.fetch_with_str(url))
        .await
        .map_err(|error| BridgeError::Load {
            reason: format!(
                "Не удалось загрузить {}: {}",
                url,
                describe_js_value(&error)
            ),
        })?;
    value.dyn_into::<Response>().map_err(|_| BridgeError::Load {
        reason: format!("Не удалось загрузить {}: ответ не является Response", url),
    })
}

/// Both instantiation paths resolve to `{ module, instance }`.
fn extract_instance(result: &JsValue) -> BridgeResult<WebAssembly::Instance> {
    let instance = Reflect::get(result, &JsValue::from_str("instance")).map_err(|_| {
        BridgeError::Load {
            reason: "результат инстанцирования не содержит instance".to_string(),
        }
    })?;
    instance
        .dyn_into::<WebAssembly::Instance>()
        .map_err(|_| BridgeError::Load {
            reason: "результат инстанцирования не является WebAssembly.Instance".to_string(),
        })
}

fn resolve_memory(export_table: &Object) -> BridgeResult<WebAssembly::Memory> {
    let value = Reflect::get(export_table, &JsValue::from_str(exports::MEMORY)).map_err(|_| {
        BridgeError::MissingExport {
            name: exports::MEMORY,
        }
    })?;
    value
        .dyn_into::<WebAssembly::Memory>()
        .map_err(|_| BridgeError::WrongExportType {
            name: exports::MEMORY,
        })
}

fn resolve_function(export_table: &Object, name: &'static str) -> BridgeResult<Function> {
    let value = Reflect::get(export_table, &JsValue::from_str(name))
        .map_err(|_| BridgeError::MissingExport { name })?;
    if value.is_undefined() || value.is_null() {
        return Err(BridgeError::MissingExport { name });
    }
    value
        .dyn_into::<Function>()
        .map_err(|_| BridgeError::WrongExportType { name })
}

/// Build the degradation reason: the original error, plus the co-located
/// diagnostic resource when it is reachable and non-empty. A failure to
/// fetch the diagnostic never masks the original error.
async fn describe_failure(error: &BridgeError) -> String {
    let base_reason = error.to_string();

    let Some(window) = web_sys::window() else {
        return base_reason;
    };
    let response = match fetch(&window, WASM_INFO_URL).await {
        Ok(response) => response,
        Err(info_error) => {
            web_sys::console::debug_2(
                &JsValue::from_str("[kolibri-bridge] Не удалось получить информацию о kolibri.wasm."),
                &JsValue::from_str(&info_error.to_string()),
            );
            return base_reason;
        }
    };
    if !response.ok() {
        return base_reason;
    }

    let text_promise = match response.text() {
        Ok(promise) => promise,
        Err(_) => return base_reason,
    };
    let info_text = match JsFuture::from(text_promise).await {
        Ok(value) => value.as_string().unwrap_or_default(),
        Err(_) => return base_reason,
    };
    let info_text = info_text.trim();
    if info_text.is_empty() {
        return base_reason;
    }

    format!("{}\n\n{}", base_reason, info_text)
}
