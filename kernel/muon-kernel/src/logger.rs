//! Log sinks and the fan-out logger.
//!
//! Two phases, one contract. The boot stub registers the early serial
//! functions before anything else runs; once the heap is up,
//! [`init`] installs the [`Logger`] and fans output across its sinks:
//! the serial port takes everything, the framebuffer console takes raw
//! prints and warnings-or-worse — per the error-handling rules, kernel
//! diagnostics belong on serial and user-visible text on the terminal.

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::{self, Write as _};

use crate::drivers::{fbcon, uart16550::{COM1, Uart16550}};
use crate::log::LogLevel;
use crate::sync::SpinLock;

/// An output sink for kernel text.
pub trait LogSink: Send + Sync {
    /// Writes a text fragment.
    fn write_str(&self, s: &str);
    /// Most verbose level this sink accepts.
    fn max_level(&self) -> LogLevel;
}

/// Serial sink: everything, for the boot log and diagnostics.
struct SerialSink {
    uart: Uart16550,
}

impl LogSink for SerialSink {
    fn write_str(&self, s: &str) {
        let mut uart = self.uart;
        let _ = uart.write_str(s);
    }

    fn max_level(&self) -> LogLevel {
        LogLevel::Debug
    }
}

/// Framebuffer sink: raw prints plus warnings and errors.
struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn write_str(&self, s: &str) {
        fbcon::write_str(s);
    }

    fn max_level(&self) -> LogLevel {
        LogLevel::Warn
    }
}

struct LoggerInner {
    sinks: Vec<Box<dyn LogSink>>,
}

/// Fan-out logger over registered sinks.
pub struct Logger {
    inner: SpinLock<Option<LoggerInner>>,
}

static LOGGER: Logger = Logger {
    inner: SpinLock::new(None),
};

impl Logger {
    /// Raw write: all sinks, no filtering.
    fn write_fmt(&self, args: fmt::Arguments<'_>) {
        let guard = self.inner.lock();
        if let Some(inner) = guard.as_ref() {
            for sink in &inner.sinks {
                let mut writer = SinkWriter(sink.as_ref());
                let _ = writer.write_fmt(args);
            }
        }
    }

    /// Leveled write: tagged, filtered per sink.
    fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        let guard = self.inner.lock();
        if let Some(inner) = guard.as_ref() {
            for sink in &inner.sinks {
                if level <= sink.max_level() {
                    let mut writer = SinkWriter(sink.as_ref());
                    let _ = write!(writer, "[{}] {}\n", level.name(), args);
                }
            }
        }
    }
}

/// `fmt::Write` adapter over a `&dyn LogSink`.
struct SinkWriter<'a>(&'a dyn LogSink);

impl fmt::Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

fn logger_print(args: fmt::Arguments<'_>) {
    LOGGER.write_fmt(args);
}

fn logger_log(level: LogLevel, args: fmt::Arguments<'_>) {
    LOGGER.log(level, args);
}

// ── Early serial (pre-heap) ──────────────────────────────────────────

fn early_serial_print(args: fmt::Arguments<'_>) {
    let mut uart = Uart16550::new(COM1);
    let _ = uart.write_fmt(args);
}

fn early_serial_log(level: LogLevel, args: fmt::Arguments<'_>) {
    let mut uart = Uart16550::new(COM1);
    let _ = write!(uart, "[{}] {}\n", level.name(), args);
}

/// Registers lock-free, allocation-free serial output functions.
///
/// The boot stub calls this right after UART init so every line of the
/// boot sequence reaches the serial log.
pub fn init_early_serial() {
    // SAFETY: Both functions construct a stateless UART handle on the
    // stack and are callable from any context.
    unsafe {
        crate::log::set_print_fn(early_serial_print);
        crate::log::set_log_fn(early_serial_log);
    }
}

/// Installs the fan-out logger (serial + framebuffer console).
///
/// Requires the heap. The framebuffer console must have been bound via
/// [`fbcon::init`] for its sink to produce output.
pub fn init() {
    {
        let mut guard = LOGGER.inner.lock();
        let mut sinks: Vec<Box<dyn LogSink>> = Vec::with_capacity(2);
        sinks.push(Box::new(SerialSink {
            uart: Uart16550::new(COM1),
        }));
        sinks.push(Box::new(ConsoleSink));
        *guard = Some(LoggerInner { sinks });
    }

    // SAFETY: logger_print/logger_log are callable from any context; the
    // lock inside uses try-free spinning only.
    unsafe {
        crate::log::set_print_fn(logger_print);
        crate::log::set_log_fn(logger_log);
    }
}

/// Writes a panic report straight to COM1: no locks, no allocation, so
/// it works even if the panic happened inside the logger.
pub fn panic_serial(info: &core::panic::PanicInfo<'_>) {
    let mut uart = Uart16550::new(COM1);
    let _ = write!(uart, "\n!!! KERNEL PANIC !!!\n{info}\n");
}
