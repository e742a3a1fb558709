//! Bridge session: one interpreter invocation per request
//!
//! The session owns the instantiated module's export table and implements
//! the allocate → write → invoke → read → free protocol. The whole span from
//! the first `malloc` to the final `free` is synchronous — there is no await
//! point inside it. That absence of suspension is the only thing keeping two
//! logically concurrent `ask` calls from interleaving their allocations on
//! the shared guest allocator; an implementation that adds an await inside
//! this span must add explicit mutual exclusion instead.

use crate::abi::{ExecuteError, DEFAULT_MODE, OUTPUT_CAPACITY};
use crate::error::{BridgeError, BridgeResult};
use crate::memory::GuestMemory;
use crate::script::build_script;

#[cfg(target_arch = "wasm32")]
use js_sys::Function;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Result reported when a program ran but wrote nothing.
pub const NO_OUTPUT_SENTINEL: &str = "KolibriScript завершил работу без вывода.";

/// The module's export table as the session needs it
///
/// `Err` from any method means the guest call trapped (including a
/// `proc_exit` unwind); an `Ok` value is whatever the guest returned, null
/// allocation handles included.
pub trait ModuleExports {
    /// `_malloc(size) -> ptr`; 0 is the guest's allocation-failure signal.
    fn malloc(&self, size: u32) -> BridgeResult<u32>;
    /// `_free(ptr)`; must be called exactly once per successful allocation.
    fn free(&self, ptr: u32) -> BridgeResult<()>;
    /// `_kolibri_bridge_init() -> i32`
    fn init(&self) -> BridgeResult<i32>;
    /// `_kolibri_bridge_reset() -> i32`
    fn reset(&self) -> BridgeResult<i32>;
    /// `_kolibri_bridge_execute(program_ptr, output_ptr, capacity) -> i32`
    fn execute(&self, program_ptr: u32, output_ptr: u32, capacity: u32) -> BridgeResult<i32>;
    /// Handle to the instance's linear memory.
    fn memory(&self) -> GuestMemory;
}

/// A live bridge session over an instantiated module
pub struct Session<E: ModuleExports> {
    exports: E,
}

impl<E: ModuleExports> Session<E> {
    pub fn new(exports: E) -> Self {
        Self { exports }
    }

    /// Tear the session down and hand the export table back.
    pub fn into_exports(self) -> E {
        self.exports
    }

    /// Synthesize a program from the prompt and run it, returning the
    /// decoded interpreter output.
    ///
    /// Interpreter-side failures surface as [`BridgeError`] values that all
    /// render to user-facing text; the session stays usable afterwards.
    pub fn ask(&self, prompt: &str, mode: Option<&str>) -> BridgeResult<String> {
        let script = build_script(prompt, mode.unwrap_or(DEFAULT_MODE));
        self.invoke(&script)
    }

    /// Reset the interpreter's persistent state. No allocation protocol of
    /// its own; a non-zero return is fatal to the request.
    pub fn reset(&self) -> BridgeResult<()> {
        let code = self.exports.reset()?;
        if code != 0 {
            return Err(BridgeError::ResetFailed { code });
        }
        Ok(())
    }

    /// Run one synthesized program. Synchronous from allocation to release.
    fn invoke(&self, script: &str) -> BridgeResult<String> {
        let program = script.as_bytes();
        let program_len = program.len() as u32 + 1; // trailing NUL

        let program_ptr = self.exports.malloc(program_len)?;
        let output_ptr = match self.exports.malloc(OUTPUT_CAPACITY) {
            Ok(ptr) => ptr,
            Err(error) => {
                // The second malloc trapped; the trap is the interesting
                // error, but the first region still has to go back.
                if program_ptr != 0 {
                    let _ = self.exports.free(program_ptr);
                }
                return Err(error);
            }
        };

        if program_ptr == 0 || output_ptr == 0 {
            // Never call the interpreter with a partial allocation.
            if program_ptr != 0 {
                let _ = self.exports.free(program_ptr);
            }
            if output_ptr != 0 {
                let _ = self.exports.free(output_ptr);
            }
            return Err(BridgeError::OutOfMemory {
                requested: program_len.max(OUTPUT_CAPACITY),
            });
        }

        let result = self.run(program, program_ptr, output_ptr);

        // Both regions are released exactly once on every path; only then is
        // the run outcome inspected.
        let freed_program = self.exports.free(program_ptr);
        let freed_output = self.exports.free(output_ptr);
        let output = result?;
        freed_program?;
        freed_output?;
        Ok(output)
    }

    fn run(&self, program: &[u8], program_ptr: u32, output_ptr: u32) -> BridgeResult<String> {
        let memory = self.exports.memory();
        memory.write(program_ptr, program)?;
        memory.write(program_ptr + program.len() as u32, &[0])?;

        let written = self
            .exports
            .execute(program_ptr, output_ptr, OUTPUT_CAPACITY)?;
        if written < 0 {
            return Err(BridgeError::Execution(ExecuteError::from_code(written)));
        }

        let written = written as u32;
        if written >= OUTPUT_CAPACITY {
            return Err(BridgeError::OutputOverflow {
                reported: written,
                capacity: OUTPUT_CAPACITY,
            });
        }

        let raw = memory.read(output_ptr, written)?;
        let text = String::from_utf8(raw).map_err(|_| BridgeError::OutputNotUtf8)?;
        if text.trim().is_empty() {
            Ok(NO_OUTPUT_SENTINEL.to_string())
        } else {
            Ok(text.trim_end().to_string())
        }
    }
}

/// Export table of a live `WebAssembly.Instance`
///
/// Built by the loader after instantiation; every required entry point has
/// already been resolved to a `Function`, so session calls cannot fail on a
/// missing export.
#[cfg(target_arch = "wasm32")]
pub struct JsExports {
    memory: GuestMemory,
    malloc: Function,
    free: Function,
    init: Function,
    reset: Function,
    execute: Function,
}

#[cfg(target_arch = "wasm32")]
impl JsExports {
    pub fn new(
        memory: GuestMemory,
        malloc: Function,
        free: Function,
        init: Function,
        reset: Function,
        execute: Function,
    ) -> Self {
        Self {
            memory,
            malloc,
            free,
            init,
            reset,
            execute,
        }
    }
}

/// Render a thrown JS value as text: plain strings as-is, `Error` objects by
/// message.
#[cfg(target_arch = "wasm32")]
pub fn describe_js_value(value: &JsValue) -> String {
    use wasm_bindgen::JsCast;
    if let Some(text) = value.as_string() {
        return text;
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    format!("{:?}", value)
}

#[cfg(target_arch = "wasm32")]
fn trap(value: JsValue) -> BridgeError {
    BridgeError::Trap {
        reason: describe_js_value(&value),
    }
}

#[cfg(target_arch = "wasm32")]
impl ModuleExports for JsExports {
    fn malloc(&self, size: u32) -> BridgeResult<u32> {
        let value = self
            .malloc
            .call1(&JsValue::NULL, &JsValue::from(size))
            .map_err(trap)?;
        Ok(value.as_f64().unwrap_or(0.0) as u32)
    }

    fn free(&self, ptr: u32) -> BridgeResult<()> {
        self.free
            .call1(&JsValue::NULL, &JsValue::from(ptr))
            .map_err(trap)?;
        Ok(())
    }

    fn init(&self) -> BridgeResult<i32> {
        let value = self.init.call0(&JsValue::NULL).map_err(trap)?;
        Ok(value.as_f64().unwrap_or(0.0) as i32)
    }

    fn reset(&self) -> BridgeResult<i32> {
        let value = self.reset.call0(&JsValue::NULL).map_err(trap)?;
        Ok(value.as_f64().unwrap_or(0.0) as i32)
    }

    fn execute(&self, program_ptr: u32, output_ptr: u32, capacity: u32) -> BridgeResult<i32> {
        let value = self
            .execute
            .call3(
                &JsValue::NULL,
                &JsValue::from(program_ptr),
                &JsValue::from(output_ptr),
                &JsValue::from(capacity),
            )
            .map_err(trap)?;
        Ok(value.as_f64().unwrap_or(0.0) as i32)
    }

    fn memory(&self) -> GuestMemory {
        self.memory.clone()
    }
}
