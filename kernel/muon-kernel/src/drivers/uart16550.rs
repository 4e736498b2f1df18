//! UART 16550 serial port driver.
//!
//! Carries no state beyond the base port address, so a handle can be
//! conjured on the stack anywhere — including the panic path — and
//! still talk to the configured hardware.

use core::fmt;

use bitflags::bitflags;

use crate::arch::x86_64::instructions::Port;

/// Register offsets from the UART base address.
mod reg {
    /// Transmit Holding Register (write, DLAB=0).
    pub const THR: u16 = 0;
    /// Receive Buffer Register (read, DLAB=0).
    #[allow(dead_code)]
    pub const RBR: u16 = 0;
    /// Divisor Latch Low (DLAB=1).
    pub const DLL: u16 = 0;
    /// Interrupt Enable Register (DLAB=0).
    pub const IER: u16 = 1;
    /// Divisor Latch High (DLAB=1).
    pub const DLM: u16 = 1;
    /// FIFO Control Register (write).
    pub const FCR: u16 = 2;
    /// Line Control Register.
    pub const LCR: u16 = 3;
    /// Modem Control Register.
    pub const MCR: u16 = 4;
    /// Line Status Register.
    pub const LSR: u16 = 5;
}

bitflags! {
    /// Line Status Register bits.
    #[derive(Debug, Clone, Copy)]
    pub struct Lsr: u8 {
        /// Received data available.
        const DATA_READY = 1 << 0;
        /// Transmit holding register empty.
        const THR_EMPTY  = 1 << 5;
    }
}

/// Standard COM1 base address.
pub const COM1: u16 = 0x3F8;

/// Divisor for 115200 baud.
const BAUD_115200_DIVISOR: u16 = 1;

/// DLAB bit in the LCR.
const LCR_DLAB: u8 = 0x80;

/// 8 data bits, no parity, one stop bit.
const LCR_8N1: u8 = 0x03;

/// A 16550 UART identified by its base I/O address.
#[derive(Debug, Clone, Copy)]
pub struct Uart16550 {
    base: u16,
}

impl Uart16550 {
    /// Creates a handle. Does not touch hardware.
    #[must_use]
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    const fn port(self, offset: u16) -> Port<u8> {
        Port::new(self.base + offset)
    }

    /// Programs 115200 baud, 8N1, FIFOs enabled.
    ///
    /// # Safety
    ///
    /// `base` must address a 16550-compatible UART; call once before
    /// concurrent use.
    pub unsafe fn init(self) {
        // SAFETY: Standard 16550 programming sequence.
        unsafe {
            self.port(reg::IER).write(0x00);
            self.port(reg::LCR).write(LCR_DLAB);
            self.port(reg::DLL).write(BAUD_115200_DIVISOR as u8);
            self.port(reg::DLM).write((BAUD_115200_DIVISOR >> 8) as u8);
            self.port(reg::LCR).write(LCR_8N1);
            self.port(reg::FCR).write(0xC7); // enable + clear FIFOs, 14-byte trigger
            self.port(reg::MCR).write(0x0B); // DTR + RTS + OUT2
        }
    }

    /// Current line status.
    #[must_use]
    pub fn line_status(self) -> Lsr {
        // SAFETY: Reading LSR is side-effect free.
        unsafe { Lsr::from_bits_truncate(self.port(reg::LSR).read()) }
    }

    /// Writes one byte, busy-waiting for transmit space.
    pub fn write_byte(self, byte: u8) {
        while !self.line_status().contains(Lsr::THR_EMPTY) {
            core::hint::spin_loop();
        }
        // SAFETY: THR is empty; writing transmits one byte.
        unsafe { self.port(reg::THR).write(byte) };
    }
}

impl fmt::Write for Uart16550 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}
