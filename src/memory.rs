//! Guest linear memory access
//!
//! A `GuestMemory` handle lets the host read and write byte ranges inside
//! the module's flat heap. On wasm32 it wraps the instance's
//! `WebAssembly.Memory`; natively it wraps a plain byte buffer so protocol
//! logic and tests run without a browser.
//!
//! The byte view is re-derived on every access. Guest memory may grow during
//! a call, which detaches any previously created `Uint8Array`, so caching a
//! view (or its length) would read through a stale buffer.

use crate::error::{BridgeError, BridgeResult};

#[cfg(target_arch = "wasm32")]
use js_sys::{Uint8Array, WebAssembly};
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsCast;

#[cfg(not(target_arch = "wasm32"))]
use std::cell::RefCell;
#[cfg(not(target_arch = "wasm32"))]
use std::rc::Rc;

/// Handle to the module instance's linear memory
#[cfg(target_arch = "wasm32")]
#[derive(Clone)]
pub struct GuestMemory {
    memory: WebAssembly::Memory,
}

#[cfg(target_arch = "wasm32")]
impl GuestMemory {
    pub fn new(memory: WebAssembly::Memory) -> Self {
        Self { memory }
    }

    /// Current memory size in bytes
    pub fn size(&self) -> u32 {
        let buffer: js_sys::ArrayBuffer = self.memory.buffer().unchecked_into();
        buffer.byte_length()
    }

    fn view(&self) -> Uint8Array {
        Uint8Array::new(&self.memory.buffer())
    }

    /// Read `len` bytes starting at `offset`
    pub fn read(&self, offset: u32, len: u32) -> BridgeResult<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let mut out = vec![0u8; len as usize];
        self.view().subarray(offset, offset + len).copy_to(&mut out);
        Ok(out)
    }

    /// Write bytes starting at `offset`
    pub fn write(&self, offset: u32, data: &[u8]) -> BridgeResult<()> {
        let len = data.len() as u32;
        self.check_bounds(offset, len)?;
        self.view().subarray(offset, offset + len).copy_from(data);
        Ok(())
    }
}

/// Handle to an emulated linear memory (native test double)
#[cfg(not(target_arch = "wasm32"))]
#[derive(Clone)]
pub struct GuestMemory {
    data: Rc<RefCell<Vec<u8>>>,
}

#[cfg(not(target_arch = "wasm32"))]
impl GuestMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: Rc::new(RefCell::new(vec![0; size])),
        }
    }

    /// Wrap a buffer shared with a fake module, so test allocators and the
    /// bridge observe the same bytes.
    pub fn from_shared(data: Rc<RefCell<Vec<u8>>>) -> Self {
        Self { data }
    }

    /// Current memory size in bytes
    pub fn size(&self) -> u32 {
        self.data.borrow().len() as u32
    }

    /// Read `len` bytes starting at `offset`
    pub fn read(&self, offset: u32, len: u32) -> BridgeResult<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let start = offset as usize;
        Ok(self.data.borrow()[start..start + len as usize].to_vec())
    }

    /// Write bytes starting at `offset`
    pub fn write(&self, offset: u32, data: &[u8]) -> BridgeResult<()> {
        self.check_bounds(offset, data.len() as u32)?;
        let start = offset as usize;
        self.data.borrow_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl GuestMemory {
    fn check_bounds(&self, offset: u32, len: u32) -> BridgeResult<()> {
        let memory_size = self.size();
        match offset.checked_add(len) {
            Some(end) if end <= memory_size => Ok(()),
            _ => Err(BridgeError::MemoryAccessOutOfBounds {
                address: offset,
                size: len,
                memory_size,
            }),
        }
    }

    /// Read a little-endian u32
    pub fn read_u32_le(&self, offset: u32) -> BridgeResult<u32> {
        let bytes = self.read(offset, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Write a little-endian u32
    pub fn write_u32_le(&self, offset: u32, value: u32) -> BridgeResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Write a little-endian u64
    pub fn write_u64_le(&self, offset: u32, value: u64) -> BridgeResult<()> {
        self.write(offset, &value.to_le_bytes())
    }
}
