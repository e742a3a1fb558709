//! Degraded fallback and the unified bridge surface
//!
//! When the loader fails, a [`Fallback`] takes the place of the live
//! session. It satisfies the same two-operation contract, so callers never
//! branch on bridge health: `ask` resolves with a labeled diagnostic instead
//! of executing anything, and `reset` is a no-op. The [`Bridge`] enum is the
//! one surface both variants sit behind.

use crate::error::BridgeResult;
use crate::session::{ModuleExports, Session};

/// Same-contract stand-in used when the module cannot be loaded
pub struct Fallback {
    reason: String,
}

impl Fallback {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The captured loader failure reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Fixed three-line diagnostic: unavailability, reason, remediation.
    /// The prompt and mode are ignored entirely.
    pub fn ask(&self) -> String {
        [
            "KolibriScript недоступен: kolibri.wasm не был загружен.",
            &format!("Причина: {}", self.reason),
            "Запустите scripts/build_wasm.sh и перезапустите фронтенд, чтобы восстановить работоспособность ядра.",
        ]
        .join("\n")
    }
}

/// Terminal bridge state: a live session or the degraded fallback
///
/// Constructed once from the loader's outcome; there is no transition back.
pub enum Bridge<E: ModuleExports> {
    Ready(Session<E>),
    Degraded(Fallback),
}

impl<E: ModuleExports> Bridge<E> {
    pub fn ready(module_exports: E) -> Self {
        Self::Ready(Session::new(module_exports))
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded(Fallback::new(reason))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    /// Run a prompt. Once ready, interpreter-side failures come back as
    /// `Err` values that render to diagnostic text; in degraded mode every
    /// call resolves with the fallback diagnostic and never fails.
    pub fn ask(&self, prompt: &str, mode: Option<&str>) -> BridgeResult<String> {
        match self {
            Self::Ready(session) => session.ask(prompt, mode),
            Self::Degraded(fallback) => Ok(fallback.ask()),
        }
    }

    /// Reset interpreter state; a no-op in degraded mode.
    pub fn reset(&self) -> BridgeResult<()> {
        match self {
            Self::Ready(session) => session.reset(),
            Self::Degraded(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_diagnostic_has_three_lines() {
        let fallback = Fallback::new("fetch rejected: 404 Not Found");
        let text = fallback.ask();
        let lines: Vec<&str> = text.split('\n').collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "KolibriScript недоступен: kolibri.wasm не был загружен."
        );
        assert!(lines[1].contains("fetch rejected: 404 Not Found"));
        assert!(lines[2].contains("scripts/build_wasm.sh"));
    }

    #[test]
    fn test_fallback_keeps_reason() {
        let fallback = Fallback::new("причина");
        assert_eq!(fallback.reason(), "причина");
    }
}
