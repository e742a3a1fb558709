//! WASI system-call emulation
//!
//! The Kolibri module is compiled against `wasi_snapshot_preview1` and
//! imports eleven calls from that group. None of them touch a real file
//! system, process table, or network: stdout/stderr writes are captured and
//! forwarded to an observer, the clock and random source come from the host
//! environment, and everything else reports empty results with errno 0.
//!
//! The syscall semantics live in [`WasiState`] so they can be tested
//! natively; on wasm32 a [`WasiContext`] wraps the state in the JS closures
//! the `WebAssembly.instantiate` import object needs.
//!
//! Binding contract: the guest memory view is bound exactly once, right
//! after instantiation. Calls that need memory before the bind fail with
//! errno `INVAL`. The view itself is re-derived per access (see
//! [`crate::memory::GuestMemory`]) so later memory growth is tolerated.

use crate::abi::{errno, fd, FDSTAT_SIZE, FILETYPE_CHARACTER_DEVICE};
use crate::memory::GuestMemory;

#[cfg(target_arch = "wasm32")]
use crate::abi::IMPORT_NAMESPACE;
#[cfg(target_arch = "wasm32")]
use crate::error::{BridgeError, BridgeResult};
#[cfg(target_arch = "wasm32")]
use js_sys::{Object, Reflect};
#[cfg(target_arch = "wasm32")]
use std::cell::RefCell;
#[cfg(target_arch = "wasm32")]
use std::rc::Rc;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Receives UTF-8 text the guest wrote to stdout or stderr.
pub type StdoutObserver = Box<dyn Fn(&str)>;

/// Emulator state shared by all system-call handlers
pub struct WasiState {
    memory: Option<GuestMemory>,
    observer: Option<StdoutObserver>,
    exit_code: Option<i32>,
}

impl WasiState {
    pub fn new(observer: Option<StdoutObserver>) -> Self {
        Self {
            memory: None,
            observer,
            exit_code: None,
        }
    }

    /// Bind the instantiated module's memory. Happens once, immediately
    /// after instantiation; the bind is never re-done when memory grows.
    pub fn bind_memory(&mut self, memory: GuestMemory) {
        self.memory = Some(memory);
    }

    pub fn memory_bound(&self) -> bool {
        self.memory.is_some()
    }

    /// Exit code recorded by `proc_exit`, if the guest terminated.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// `fd_write(fd, iovs_ptr, iovs_len, nwritten_ptr)`
    ///
    /// Concatenates the iovec spans addressed to stdout/stderr, forwards the
    /// decoded text to the observer, and reports the total byte count back
    /// through `nwritten_ptr`. Succeeds for every descriptor; non-standard
    /// descriptors only get byte-counting semantics.
    pub fn fd_write(&self, fd_num: i32, iovs_ptr: u32, iovs_len: u32, nwritten_ptr: u32) -> i32 {
        let Some(memory) = self.memory.as_ref() else {
            return errno::INVAL;
        };

        let mut total: u32 = 0;
        let mut aggregated = String::new();
        for index in 0..iovs_len {
            // Each iovec entry is (u32 ptr, u32 len), little-endian.
            let entry = iovs_ptr + index * 8;
            let (ptr, len) = match (memory.read_u32_le(entry), memory.read_u32_le(entry + 4)) {
                (Ok(ptr), Ok(len)) => (ptr, len),
                _ => return errno::INVAL,
            };
            if len == 0 {
                continue;
            }
            total = total.saturating_add(len);
            if fd_num == fd::STDOUT || fd_num == fd::STDERR {
                match memory.read(ptr, len) {
                    Ok(bytes) => aggregated.push_str(&String::from_utf8_lossy(&bytes)),
                    Err(_) => return errno::INVAL,
                }
            }
        }

        if memory.write_u32_le(nwritten_ptr, total).is_err() {
            return errno::INVAL;
        }
        if !aggregated.is_empty() {
            if let Some(observer) = &self.observer {
                observer(&aggregated);
            }
        }
        errno::SUCCESS
    }

    /// `fd_fdstat_get(fd, stat_ptr)`
    ///
    /// Reports a fixed character-device status for any non-negative
    /// descriptor.
    pub fn fd_fdstat_get(&self, fd_num: i32, stat_ptr: u32) -> i32 {
        if fd_num < 0 {
            return errno::BADF;
        }
        let Some(memory) = self.memory.as_ref() else {
            return errno::INVAL;
        };
        let mut stat = [0u8; FDSTAT_SIZE];
        stat[0] = FILETYPE_CHARACTER_DEVICE;
        match memory.write(stat_ptr, &stat) {
            Ok(()) => errno::SUCCESS,
            Err(_) => errno::INVAL,
        }
    }

    /// `fd_close(fd)`: nothing to close, always succeeds.
    pub fn fd_close(&self, _fd_num: i32) -> i32 {
        errno::SUCCESS
    }

    /// `fd_seek(fd, offset, whence, newoffset_ptr)`: no seekable streams
    /// exist; the new offset is always reported as zero.
    pub fn fd_seek(&self, _fd_num: i32, _offset: i64, _whence: i32, newoffset_ptr: u32) -> i32 {
        if let Some(memory) = self.memory.as_ref() {
            if memory.write_u64_le(newoffset_ptr, 0).is_err() {
                return errno::INVAL;
            }
        }
        errno::SUCCESS
    }

    /// `environ_sizes_get` / `args_sizes_get`: permanently empty.
    pub fn sizes_get(&self, count_ptr: u32, size_ptr: u32) -> i32 {
        if let Some(memory) = self.memory.as_ref() {
            if memory.write_u32_le(count_ptr, 0).is_err()
                || memory.write_u32_le(size_ptr, 0).is_err()
            {
                return errno::INVAL;
            }
        }
        errno::SUCCESS
    }

    /// `environ_get` / `args_get`: nothing to copy.
    pub fn list_get(&self, _list_ptr: u32, _buf_ptr: u32) -> i32 {
        errno::SUCCESS
    }

    /// `clock_time_get(id, precision, time_ptr)`: one coarse host wall
    /// clock, in nanoseconds; the requested clock id and precision are
    /// ignored.
    pub fn clock_time_get(&self, _clock_id: i32, _precision: i64, time_ptr: u32) -> i32 {
        if let Some(memory) = self.memory.as_ref() {
            if memory.write_u64_le(time_ptr, now_nanos()).is_err() {
                return errno::INVAL;
            }
        }
        errno::SUCCESS
    }

    /// `random_get(buf_ptr, len)`: fills the span from the host's strong
    /// source when one exists, otherwise from a non-cryptographic fallback.
    pub fn random_get(&self, buf_ptr: u32, len: u32) -> i32 {
        let Some(memory) = self.memory.as_ref() else {
            return errno::INVAL;
        };
        let mut buffer = vec![0u8; len as usize];
        fill_random(&mut buffer);
        match memory.write(buf_ptr, &buffer) {
            Ok(()) => errno::SUCCESS,
            Err(_) => errno::INVAL,
        }
    }

    /// `proc_exit(code)`: records the code; the wasm32 wiring additionally
    /// throws so the in-flight guest call unwinds instead of returning.
    pub fn proc_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }
}

/// Host wall-clock time in nanoseconds since the Unix epoch
#[cfg(target_arch = "wasm32")]
fn now_nanos() -> u64 {
    (js_sys::Date::now() * 1_000_000.0) as u64
}

#[cfg(not(target_arch = "wasm32"))]
fn now_nanos() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Fill a buffer with random bytes: `crypto.getRandomValues` when available,
/// `Math.random` otherwise. Callers must not rely on cryptographic quality
/// in the fallback branch.
#[cfg(target_arch = "wasm32")]
fn fill_random(buffer: &mut [u8]) {
    if let Some(crypto) = web_sys::window().and_then(|w| w.crypto().ok()) {
        if crypto.get_random_values_with_u8_array(buffer).is_ok() {
            return;
        }
    }
    for byte in buffer.iter_mut() {
        *byte = (js_sys::Math::random() * 256.0) as u8;
    }
}

/// Native stand-in for the browser's weak fallback source (tests only care
/// that the span is filled, not about its quality).
#[cfg(not(target_arch = "wasm32"))]
fn fill_random(buffer: &mut [u8]) {
    let mut state = now_nanos() | 1;
    for byte in buffer.iter_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte = state as u8;
    }
}

/// Shared handle to the emulator state used by the import closures
#[cfg(target_arch = "wasm32")]
pub type SharedWasiState = Rc<RefCell<WasiState>>;

/// Emulator wired up as a `wasi_snapshot_preview1` import object
#[cfg(target_arch = "wasm32")]
pub struct WasiContext {
    state: SharedWasiState,
    imports: Object,
}

#[cfg(target_arch = "wasm32")]
impl WasiContext {
    pub fn new(observer: Option<StdoutObserver>) -> BridgeResult<Self> {
        let state = Rc::new(RefCell::new(WasiState::new(observer)));
        let imports = build_imports(&state)?;
        Ok(Self { state, imports })
    }

    /// The `{ wasi_snapshot_preview1: ... }` object handed to
    /// `WebAssembly.instantiate`.
    pub fn import_object(&self) -> BridgeResult<Object> {
        let imports = Object::new();
        Reflect::set(
            &imports,
            &JsValue::from_str(IMPORT_NAMESPACE),
            &self.imports,
        )
        .map_err(|_| BridgeError::Load {
            reason: format!("не удалось собрать импорты {}", IMPORT_NAMESPACE),
        })?;
        Ok(imports)
    }

    /// Bind the instantiated module's memory into the emulator (§ binding
    /// contract in the module docs).
    pub fn bind_memory(&self, memory: js_sys::WebAssembly::Memory) {
        self.state
            .borrow_mut()
            .bind_memory(GuestMemory::new(memory));
    }
}

#[cfg(target_arch = "wasm32")]
fn set_import(imports: &Object, name: &str, value: &JsValue) -> BridgeResult<()> {
    Reflect::set(imports, &JsValue::from_str(name), value)
        .map(|_| ())
        .map_err(|_| BridgeError::Load {
            reason: format!("не удалось зарегистрировать импорт {}", name),
        })
}

#[cfg(target_arch = "wasm32")]
fn build_imports(state: &SharedWasiState) -> BridgeResult<Object> {
    let imports = Object::new();

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |fd_num: i32| -> i32 {
            state.borrow().fd_close(fd_num)
        }) as Box<dyn Fn(i32) -> i32>);
        set_import(&imports, "fd_close", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |fd_num: i32, stat_ptr: i32| -> i32 {
            state.borrow().fd_fdstat_get(fd_num, stat_ptr as u32)
        }) as Box<dyn Fn(i32, i32) -> i32>);
        set_import(&imports, "fd_fdstat_get", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(
            move |fd_num: i32, offset: i64, whence: i32, newoffset_ptr: i32| -> i32 {
                state
                    .borrow()
                    .fd_seek(fd_num, offset, whence, newoffset_ptr as u32)
            },
        )
            as Box<dyn Fn(i32, i64, i32, i32) -> i32>);
        set_import(&imports, "fd_seek", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(
            move |fd_num: i32, iovs_ptr: i32, iovs_len: i32, nwritten_ptr: i32| -> i32 {
                state.borrow().fd_write(
                    fd_num,
                    iovs_ptr as u32,
                    iovs_len as u32,
                    nwritten_ptr as u32,
                )
            },
        )
            as Box<dyn Fn(i32, i32, i32, i32) -> i32>);
        set_import(&imports, "fd_write", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |count_ptr: i32, size_ptr: i32| -> i32 {
            state.borrow().sizes_get(count_ptr as u32, size_ptr as u32)
        }) as Box<dyn Fn(i32, i32) -> i32>);
        set_import(&imports, "environ_sizes_get", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |environ_ptr: i32, buf_ptr: i32| -> i32 {
            state.borrow().list_get(environ_ptr as u32, buf_ptr as u32)
        }) as Box<dyn Fn(i32, i32) -> i32>);
        set_import(&imports, "environ_get", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |count_ptr: i32, size_ptr: i32| -> i32 {
            state.borrow().sizes_get(count_ptr as u32, size_ptr as u32)
        }) as Box<dyn Fn(i32, i32) -> i32>);
        set_import(&imports, "args_sizes_get", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |argv_ptr: i32, buf_ptr: i32| -> i32 {
            state.borrow().list_get(argv_ptr as u32, buf_ptr as u32)
        }) as Box<dyn Fn(i32, i32) -> i32>);
        set_import(&imports, "args_get", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(
            move |clock_id: i32, precision: i64, time_ptr: i32| -> i32 {
                state
                    .borrow()
                    .clock_time_get(clock_id, precision, time_ptr as u32)
            },
        ) as Box<dyn Fn(i32, i64, i32) -> i32>);
        set_import(&imports, "clock_time_get", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |buf_ptr: i32, len: i32| -> i32 {
            state.borrow().random_get(buf_ptr as u32, len as u32)
        }) as Box<dyn Fn(i32, i32) -> i32>);
        set_import(&imports, "random_get", closure.as_ref())?;
        closure.forget();
    }

    {
        let state = Rc::clone(state);
        let closure = Closure::wrap(Box::new(move |code: i32| {
            state.borrow_mut().proc_exit(code);
            // Unwind the in-flight guest call; the session maps the thrown
            // text back to a failure carrying the code.
            wasm_bindgen::throw_str(&crate::error::BridgeError::GuestExit { code }.to_string());
        }) as Box<dyn Fn(i32)>);
        set_import(&imports, "proc_exit", closure.as_ref())?;
        closure.forget();
    }

    Ok(imports)
}
