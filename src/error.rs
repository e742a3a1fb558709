//! Error types for the bridge
//!
//! Every failure the bridge can hit is convertible to user-facing text; the
//! loader relies on this to build the degraded-mode diagnostic.

use std::fmt;

use crate::abi::ExecuteError;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur while loading the module or running a program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The bridge was used before its one-shot readiness resolved
    NotReady,

    /// The module could not be fetched or instantiated
    Load { reason: String },

    /// Required export is missing
    MissingExport { name: &'static str },

    /// Export exists but is not callable / not a memory object
    WrongExportType { name: &'static str },

    /// The init entry point returned a non-zero code
    InitFailed { code: i32 },

    /// The reset entry point returned a non-zero code
    ResetFailed { code: i32 },

    /// The guest allocator returned a null handle
    OutOfMemory { requested: u32 },

    /// Host-side access outside the range the guest allocator granted
    MemoryAccessOutOfBounds {
        address: u32,
        size: u32,
        memory_size: u32,
    },

    /// A system call ran before the emulator's memory view was bound
    MemoryUnbound,

    /// The execute entry point reported a failure code
    Execution(ExecuteError),

    /// The reported output length reached or exceeded the requested capacity
    OutputOverflow { reported: u32, capacity: u32 },

    /// The output region did not contain valid UTF-8
    OutputNotUtf8,

    /// The guest terminated the in-flight call via `proc_exit`
    GuestExit { code: i32 },

    /// The guest call trapped
    Trap { reason: String },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => {
                write!(f, "Kolibri WASM мост не готов")
            }
            Self::Load { reason } => {
                write!(f, "{}", reason)
            }
            Self::MissingExport { name } => {
                write!(f, "WASM-модуль не содержит экспорт '{}'", name)
            }
            Self::WrongExportType { name } => {
                write!(f, "Экспорт '{}' WASM-модуля имеет неверный тип", name)
            }
            Self::InitFailed { code } => {
                write!(f, "Не удалось инициализировать KolibriScript (код {})", code)
            }
            Self::ResetFailed { code } => {
                write!(f, "Не удалось сбросить KolibriScript (код {})", code)
            }
            Self::OutOfMemory { .. } => {
                write!(f, "Недостаточно памяти для выполнения KolibriScript")
            }
            Self::MemoryAccessOutOfBounds {
                address,
                size,
                memory_size,
            } => {
                write!(
                    f,
                    "Выход за границы памяти WASM: адрес {} + {} байт при размере памяти {}",
                    address, size, memory_size
                )
            }
            Self::MemoryUnbound => {
                write!(f, "WASI memory не инициализирована")
            }
            Self::Execution(error) => {
                write!(f, "{}", error)
            }
            Self::OutputOverflow { reported, capacity } => {
                write!(
                    f,
                    "KolibriScript сообщил недопустимую длину вывода: {} при ёмкости {} байт",
                    reported, capacity
                )
            }
            Self::OutputNotUtf8 => {
                write!(f, "Вывод KolibriScript не является корректной строкой UTF-8")
            }
            Self::GuestExit { code } => {
                write!(f, "WASM завершил выполнение с кодом {}", code)
            }
            Self::Trap { reason } => {
                write!(f, "Выполнение WASM прервано: {}", reason)
            }
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<ExecuteError> for BridgeError {
    fn from(error: ExecuteError) -> Self {
        Self::Execution(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BridgeError::NotReady;
        assert_eq!(err.to_string(), "Kolibri WASM мост не готов");

        let err = BridgeError::MissingExport { name: "_malloc" };
        assert!(err.to_string().contains("_malloc"));

        let err = BridgeError::InitFailed { code: 3 };
        assert_eq!(
            err.to_string(),
            "Не удалось инициализировать KolibriScript (код 3)"
        );

        let err = BridgeError::MemoryAccessOutOfBounds {
            address: 1000,
            size: 100,
            memory_size: 1024,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn test_execution_error_passthrough() {
        let err = BridgeError::from(ExecuteError::Parse);
        assert_eq!(
            err.to_string(),
            "KolibriScript сообщил об ошибке при разборе программы."
        );
    }

    #[test]
    fn test_guest_exit_carries_code() {
        let err = BridgeError::GuestExit { code: 7 };
        assert_eq!(err.to_string(), "WASM завершил выполнение с кодом 7");
    }
}
