//! Integration tests for the bridge invocation protocol
//!
//! Drives `Session` and `Bridge` through an instrumented fake module: a bump
//! allocator over a shared byte buffer that records every allocation and
//! release, plus configurable execute/reset behavior. The central invariant
//! checked throughout: the number of free calls equals the number of
//! successful (non-null) allocations, with no double-free, on every path.

#![cfg(not(target_arch = "wasm32"))]

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use kolibri_bridge::abi::{ExecuteError, OUTPUT_CAPACITY};
use kolibri_bridge::error::{BridgeError, BridgeResult};
use kolibri_bridge::fallback::Bridge;
use kolibri_bridge::memory::GuestMemory;
use kolibri_bridge::session::{ModuleExports, Session, NO_OUTPUT_SENTINEL};

/// What the fake execute entry point should do
enum Exec {
    /// Write these bytes to the output region and return their length
    Output(Vec<u8>),
    /// Return this raw code without touching the output region
    Code(i32),
    /// Report this output length without writing anything
    ReportLen(i32),
    /// Trap mid-call
    Trap(String),
}

struct FakeModule {
    memory: Rc<RefCell<Vec<u8>>>,
    next_ptr: Cell<u32>,
    malloc_calls: Cell<usize>,
    successful_allocs: Cell<usize>,
    live: RefCell<HashSet<u32>>,
    free_calls: Cell<usize>,
    double_free: Cell<bool>,
    /// 0-based malloc call indices that return a null handle
    null_allocs: Vec<usize>,
    exec: Exec,
    reset_code: i32,
    /// Program text read back during the last execute call
    last_program: RefCell<Option<String>>,
}

impl FakeModule {
    fn new(exec: Exec) -> Self {
        Self {
            memory: Rc::new(RefCell::new(vec![0; 256 * 1024])),
            next_ptr: Cell::new(8),
            malloc_calls: Cell::new(0),
            successful_allocs: Cell::new(0),
            live: RefCell::new(HashSet::new()),
            free_calls: Cell::new(0),
            double_free: Cell::new(false),
            null_allocs: Vec::new(),
            exec,
            reset_code: 0,
            last_program: RefCell::new(None),
        }
    }

    fn with_null_allocs(mut self, indices: &[usize]) -> Self {
        self.null_allocs = indices.to_vec();
        self
    }

    fn with_reset_code(mut self, code: i32) -> Self {
        self.reset_code = code;
        self
    }

    fn assert_balanced(&self) {
        assert_eq!(
            self.free_calls.get(),
            self.successful_allocs.get(),
            "every successful allocation must be released exactly once"
        );
        assert!(self.live.borrow().is_empty(), "leaked guest allocations");
        assert!(!self.double_free.get(), "double-freed guest allocation");
    }
}

impl ModuleExports for FakeModule {
    fn malloc(&self, size: u32) -> BridgeResult<u32> {
        let index = self.malloc_calls.get();
        self.malloc_calls.set(index + 1);
        if self.null_allocs.contains(&index) {
            return Ok(0);
        }
        let ptr = self.next_ptr.get();
        self.next_ptr.set(ptr + size.max(8));
        self.live.borrow_mut().insert(ptr);
        self.successful_allocs.set(self.successful_allocs.get() + 1);
        Ok(ptr)
    }

    fn free(&self, ptr: u32) -> BridgeResult<()> {
        self.free_calls.set(self.free_calls.get() + 1);
        if !self.live.borrow_mut().remove(&ptr) {
            self.double_free.set(true);
        }
        Ok(())
    }

    fn init(&self) -> BridgeResult<i32> {
        Ok(0)
    }

    fn reset(&self) -> BridgeResult<i32> {
        Ok(self.reset_code)
    }

    fn execute(&self, program_ptr: u32, output_ptr: u32, capacity: u32) -> BridgeResult<i32> {
        let memory = self.memory();

        // Read the NUL-terminated program back, like the real interpreter.
        let mut program = Vec::new();
        let mut offset = program_ptr;
        loop {
            let byte = memory.read(offset, 1)?[0];
            if byte == 0 {
                break;
            }
            program.push(byte);
            offset += 1;
        }
        *self.last_program.borrow_mut() = Some(String::from_utf8(program).unwrap());

        match &self.exec {
            Exec::Output(bytes) => {
                assert!(bytes.len() <= capacity as usize);
                memory.write(output_ptr, bytes)?;
                Ok(bytes.len() as i32)
            }
            Exec::Code(code) => Ok(*code),
            Exec::ReportLen(len) => Ok(*len),
            Exec::Trap(reason) => Err(BridgeError::Trap {
                reason: reason.clone(),
            }),
        }
    }

    fn memory(&self) -> GuestMemory {
        GuestMemory::from_shared(Rc::clone(&self.memory))
    }
}

// ============================================================================
// Successful invocations
// ============================================================================

#[test]
fn test_ask_returns_decoded_output() {
    let module = FakeModule::new(Exec::Output("Колибри — это ядро.".as_bytes().to_vec()));
    let session = Session::new(module);
    let answer = session.ask("Что такое Kolibri?", None).unwrap();
    assert_eq!(answer, "Колибри — это ядро.");
}

#[test]
fn test_successful_ask_balances_allocations() {
    let module = FakeModule::new(Exec::Output(b"ok".to_vec()));
    let session = Session::new(module);
    session.ask("привет", None).unwrap();
    let module = session.into_exports();
    assert_eq!(module.successful_allocs.get(), 2);
    module.assert_balanced();
}

#[test]
fn test_trailing_whitespace_is_trimmed() {
    let module = FakeModule::new(Exec::Output(b"answer \n\n".to_vec()));
    let session = Session::new(module);
    assert_eq!(session.ask("q", None).unwrap(), "answer");
}

#[test]
fn test_empty_output_becomes_sentinel() {
    let module = FakeModule::new(Exec::Output(Vec::new()));
    let session = Session::new(module);
    assert_eq!(session.ask("q", None).unwrap(), NO_OUTPUT_SENTINEL);
}

#[test]
fn test_whitespace_only_output_becomes_sentinel() {
    let module = FakeModule::new(Exec::Output(b"  \n\t ".to_vec()));
    let session = Session::new(module);
    assert_eq!(session.ask("q", None).unwrap(), NO_OUTPUT_SENTINEL);
}

#[test]
fn test_default_mode_synthesizes_plain_print_program() {
    let module = FakeModule::new(Exec::Output(b"ok".to_vec()));
    let session = Session::new(module);
    session
        .ask("Что такое Kolibri?", Some("Быстрый ответ"))
        .unwrap();
    let module = session.into_exports();
    let program = module.last_program.borrow().clone().unwrap();
    assert_eq!(
        program,
        "начало:\n    показать \"Что такое Kolibri?\"\nконец.\n"
    );
    assert!(!program.contains("Режим:"));
}

#[test]
fn test_non_default_mode_is_announced_to_interpreter() {
    let module = FakeModule::new(Exec::Output(b"ok".to_vec()));
    let session = Session::new(module);
    session.ask("вопрос", Some("Подробный ответ")).unwrap();
    let module = session.into_exports();
    let program = module.last_program.borrow().clone().unwrap();
    assert!(program.contains("показать \"Режим: Подробный ответ\""));
}

// ============================================================================
// Execute failure codes
// ============================================================================

#[test]
fn test_each_failure_code_maps_to_its_fixed_message() {
    let cases = [
        (-1, "Не удалось инициализировать KolibriScript."),
        (-2, "WASM-модуль не смог подготовить временный вывод."),
        (-3, "KolibriScript сообщил об ошибке при разборе программы."),
        (-4, "Во время выполнения KolibriScript произошла ошибка."),
        (-5, "Некорректные аргументы вызова KolibriScript."),
    ];
    for (code, message) in cases {
        let module = FakeModule::new(Exec::Code(code));
        let session = Session::new(module);
        let error = session.ask("q", None).unwrap_err();
        assert_eq!(error.to_string(), message);
        session.into_exports().assert_balanced();
    }
}

#[test]
fn test_unrecognized_code_is_distinguishable() {
    let module = FakeModule::new(Exec::Code(-99));
    let session = Session::new(module);
    let error = session.ask("q", None).unwrap_err();
    assert_eq!(
        error,
        BridgeError::Execution(ExecuteError::Unrecognized(-99))
    );
    assert!(error.to_string().contains("-99"));
    session.into_exports().assert_balanced();
}

// ============================================================================
// Allocation failures
// ============================================================================

#[test]
fn test_null_program_allocation_fails_without_invoking() {
    let module = FakeModule::new(Exec::Output(b"never".to_vec())).with_null_allocs(&[0]);
    let session = Session::new(module);
    let error = session.ask("q", None).unwrap_err();
    assert!(matches!(error, BridgeError::OutOfMemory { .. }));
    assert_eq!(
        error.to_string(),
        "Недостаточно памяти для выполнения KolibriScript"
    );
    let module = session.into_exports();
    // The interpreter never ran with a partial allocation.
    assert!(module.last_program.borrow().is_none());
    assert_eq!(module.successful_allocs.get(), 1);
    module.assert_balanced();
}

#[test]
fn test_null_output_allocation_releases_program_region() {
    let module = FakeModule::new(Exec::Output(b"never".to_vec())).with_null_allocs(&[1]);
    let session = Session::new(module);
    assert!(matches!(
        session.ask("q", None).unwrap_err(),
        BridgeError::OutOfMemory { .. }
    ));
    let module = session.into_exports();
    assert!(module.last_program.borrow().is_none());
    assert_eq!(module.successful_allocs.get(), 1);
    module.assert_balanced();
}

#[test]
fn test_both_allocations_null_frees_nothing() {
    let module = FakeModule::new(Exec::Output(b"never".to_vec())).with_null_allocs(&[0, 1]);
    let session = Session::new(module);
    assert!(session.ask("q", None).is_err());
    let module = session.into_exports();
    assert_eq!(module.successful_allocs.get(), 0);
    module.assert_balanced();
}

#[test]
fn test_session_stays_usable_after_allocation_failure() {
    let module = FakeModule::new(Exec::Output(b"ok".to_vec())).with_null_allocs(&[0]);
    let session = Session::new(module);
    assert!(session.ask("q", None).is_err());
    assert_eq!(session.ask("q", None).unwrap(), "ok");
    session.into_exports().assert_balanced();
}

// ============================================================================
// Protocol violations and traps
// ============================================================================

#[test]
fn test_reported_length_at_capacity_is_rejected() {
    let module = FakeModule::new(Exec::ReportLen(OUTPUT_CAPACITY as i32));
    let session = Session::new(module);
    let error = session.ask("q", None).unwrap_err();
    assert_eq!(
        error,
        BridgeError::OutputOverflow {
            reported: OUTPUT_CAPACITY,
            capacity: OUTPUT_CAPACITY,
        }
    );
    session.into_exports().assert_balanced();
}

#[test]
fn test_reported_length_above_capacity_is_rejected() {
    let module = FakeModule::new(Exec::ReportLen(OUTPUT_CAPACITY as i32 + 512));
    let session = Session::new(module);
    assert!(matches!(
        session.ask("q", None).unwrap_err(),
        BridgeError::OutputOverflow { .. }
    ));
    session.into_exports().assert_balanced();
}

#[test]
fn test_malformed_utf8_output_is_a_hard_failure() {
    let module = FakeModule::new(Exec::Output(vec![0xFF, 0xFE, 0x41]));
    let session = Session::new(module);
    assert_eq!(
        session.ask("q", None).unwrap_err(),
        BridgeError::OutputNotUtf8
    );
    let module = session.into_exports();
    module.assert_balanced();
}

#[test]
fn test_execute_trap_still_releases_both_regions() {
    let module = FakeModule::new(Exec::Trap("WASM завершил выполнение с кодом 1".to_string()));
    let session = Session::new(module);
    let error = session.ask("q", None).unwrap_err();
    assert!(matches!(error, BridgeError::Trap { .. }));
    session.into_exports().assert_balanced();
}

// ============================================================================
// Reset
// ============================================================================

#[test]
fn test_reset_zero_is_ok() {
    let session = Session::new(FakeModule::new(Exec::Output(Vec::new())));
    assert!(session.reset().is_ok());
}

#[test]
fn test_reset_nonzero_is_fatal_with_code() {
    let session = Session::new(FakeModule::new(Exec::Output(Vec::new())).with_reset_code(5));
    let error = session.reset().unwrap_err();
    assert_eq!(error, BridgeError::ResetFailed { code: 5 });
    assert_eq!(error.to_string(), "Не удалось сбросить KolibriScript (код 5)");
}

// ============================================================================
// Unified bridge surface
// ============================================================================

#[test]
fn test_ready_bridge_answers_through_same_surface() {
    let bridge = Bridge::ready(FakeModule::new(Exec::Output("ответ".as_bytes().to_vec())));
    assert!(!bridge.is_degraded());
    assert_eq!(bridge.ask("q", None).unwrap(), "ответ");
    assert!(bridge.reset().is_ok());
}

#[test]
fn test_degraded_bridge_resolves_with_three_line_diagnostic() {
    let bridge: Bridge<FakeModule> = Bridge::degraded("simulated fetch rejection");
    assert!(bridge.is_degraded());

    let answer = bridge.ask("anything", None).unwrap();
    let lines: Vec<&str> = answer.split('\n').collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "KolibriScript недоступен: kolibri.wasm не был загружен."
    );
    assert!(lines[1].contains("simulated fetch rejection"));
    assert!(lines[2].contains("scripts/build_wasm.sh"));
}

#[test]
fn test_degraded_bridge_ignores_prompt_and_mode() {
    let bridge: Bridge<FakeModule> = Bridge::degraded("причина");
    let a = bridge.ask("первый", Some("Режим А")).unwrap();
    let b = bridge.ask("второй", None).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_degraded_reset_is_a_noop() {
    let bridge: Bridge<FakeModule> = Bridge::degraded("причина");
    assert!(bridge.reset().is_ok());
}
