//! Kolibri module ABI types and constants
//!
//! This module defines the stable binary interface between the host bridge
//! and the compiled KolibriScript interpreter module (`kolibri.wasm`).

/// Fixed capacity of the pre-allocated guest output region, in bytes.
///
/// The execute entry point reports how many bytes it wrote; a report at or
/// above this capacity is a protocol violation and is never trusted.
pub const OUTPUT_CAPACITY: u32 = 8192;

/// Mode label that suppresses the mode-announcement line in synthesized
/// programs.
pub const DEFAULT_MODE: &str = "Быстрый ответ";

/// Well-known location of the compiled interpreter module.
pub const WASM_RESOURCE_URL: &str = "/kolibri.wasm";

/// Co-located plain-text diagnostic resource, appended to load failures.
pub const WASM_INFO_URL: &str = "/kolibri.wasm.txt";

/// Import group the module expects its system-call emulation under.
pub const IMPORT_NAMESPACE: &str = "wasi_snapshot_preview1";

/// Required export names
pub mod exports {
    /// The linear memory export name
    pub const MEMORY: &str = "memory";
    /// Guest allocator: `_malloc(size) -> ptr` (0 = allocation failure)
    pub const MALLOC: &str = "_malloc";
    /// Guest allocator: `_free(ptr)`
    pub const FREE: &str = "_free";
    /// One-time runtime initialization: `() -> i32` (0 = ok)
    pub const INIT: &str = "_kolibri_bridge_init";
    /// Interpreter state reset: `() -> i32` (0 = ok)
    pub const RESET: &str = "_kolibri_bridge_reset";
    /// Program execution: `(program_ptr, output_ptr, capacity) -> i32`
    /// (>= 0 = bytes written, < 0 = one of [`ExecuteError`]'s codes)
    pub const EXECUTE: &str = "_kolibri_bridge_execute";
}

/// WASI errno values the emulator hands back to the guest
pub mod errno {
    pub const SUCCESS: i32 = 0;
    pub const BADF: i32 = 8;
    pub const INVAL: i32 = 28;
}

/// WASI file-descriptor numbers with host-side behavior
pub mod fd {
    pub const STDOUT: i32 = 1;
    pub const STDERR: i32 = 2;
}

/// `filetype` value reported by `fd_fdstat_get` for every descriptor.
pub const FILETYPE_CHARACTER_DEVICE: u8 = 2;

/// Size of the `fdstat` structure written by `fd_fdstat_get`.
pub const FDSTAT_SIZE: usize = 24;

/// Failure codes returned by the execute entry point
///
/// The enumeration is closed on purpose: the five defined codes map to fixed
/// diagnostics, and anything else is visibly `Unrecognized` rather than
/// folded into a catch-all, so a future ABI extension cannot masquerade as a
/// known failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteError {
    /// -1: the interpreter runtime could not initialize
    InitFailure,
    /// -2: the module failed to prepare its temporary output buffer
    OutputPreparation,
    /// -3: the program did not parse
    Parse,
    /// -4: a runtime error occurred while executing the program
    Runtime,
    /// -5: the entry point was called with invalid arguments
    InvalidArguments,
    /// Any other negative return value
    Unrecognized(i32),
}

impl ExecuteError {
    /// Map a negative execute return value to its failure variant.
    pub fn from_code(code: i32) -> Self {
        match code {
            -1 => Self::InitFailure,
            -2 => Self::OutputPreparation,
            -3 => Self::Parse,
            -4 => Self::Runtime,
            -5 => Self::InvalidArguments,
            other => Self::Unrecognized(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::InitFailure => -1,
            Self::OutputPreparation => -2,
            Self::Parse => -3,
            Self::Runtime => -4,
            Self::InvalidArguments => -5,
            Self::Unrecognized(code) => *code,
        }
    }
}

impl std::fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InitFailure => {
                write!(f, "Не удалось инициализировать KolibriScript.")
            }
            Self::OutputPreparation => {
                write!(f, "WASM-модуль не смог подготовить временный вывод.")
            }
            Self::Parse => {
                write!(f, "KolibriScript сообщил об ошибке при разборе программы.")
            }
            Self::Runtime => {
                write!(f, "Во время выполнения KolibriScript произошла ошибка.")
            }
            Self::InvalidArguments => {
                write!(f, "Некорректные аргументы вызова KolibriScript.")
            }
            Self::Unrecognized(code) => {
                write!(f, "Неизвестная ошибка KolibriScript (код {}).", code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_error_codes_roundtrip() {
        for code in [-1, -2, -3, -4, -5] {
            assert_eq!(ExecuteError::from_code(code).code(), code);
        }
        assert_eq!(
            ExecuteError::from_code(-42),
            ExecuteError::Unrecognized(-42)
        );
        assert_eq!(ExecuteError::Unrecognized(-42).code(), -42);
    }

    #[test]
    fn test_execute_error_messages_are_fixed() {
        assert_eq!(
            ExecuteError::from_code(-1).to_string(),
            "Не удалось инициализировать KolibriScript."
        );
        assert_eq!(
            ExecuteError::from_code(-2).to_string(),
            "WASM-модуль не смог подготовить временный вывод."
        );
        assert_eq!(
            ExecuteError::from_code(-3).to_string(),
            "KolibriScript сообщил об ошибке при разборе программы."
        );
        assert_eq!(
            ExecuteError::from_code(-4).to_string(),
            "Во время выполнения KolibriScript произошла ошибка."
        );
        assert_eq!(
            ExecuteError::from_code(-5).to_string(),
            "Некорректные аргументы вызова KolibriScript."
        );
    }

    #[test]
    fn test_unknown_code_message_contains_code() {
        let message = ExecuteError::from_code(-17).to_string();
        assert!(message.contains("-17"));
        assert!(message.contains("Неизвестная ошибка"));
    }
}
