//! Polled PS/2 keyboard input (i8042 controller).
//!
//! The kernel never unmasks IRQ1; it busy-polls the controller's status
//! port and translates scancode set 1 make codes to ASCII. Shift is
//! tracked; everything else (caps lock, alt, extended codes) is
//! swallowed.

use crate::arch::x86_64::instructions::Port;
use crate::sync::SpinLock;

/// Data port: scancodes.
const DATA_PORT: u16 = 0x60;
/// Status register.
const STATUS_PORT: u16 = 0x64;

/// Status bit: output buffer full.
const STATUS_OUTPUT_FULL: u8 = 1 << 0;
/// Status bit: data came from the mouse port.
const STATUS_MOUSE_DATA: u8 = 1 << 5;

/// Break-code bit in set-1 scancodes.
const BREAK_BIT: u8 = 0x80;

/// Left/right shift make codes.
const SC_LSHIFT: u8 = 0x2A;
const SC_RSHIFT: u8 = 0x36;

/// Set-1 scancode to ASCII, unshifted. Index = scancode, 0 = no mapping.
static KEYMAP: [u8; 88] = [
    0, 27, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', b'\n', 0, b'a', b's',
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0, b'\\', b'z', b'x', b'c', b'v',
    b'b', b'n', b'm', b',', b'.', b'/', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Set-1 scancode to ASCII with shift held.
static KEYMAP_SHIFTED: [u8; 88] = [
    0, 27, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t',
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', b'\n', 0, b'A', b'S',
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0, b'|', b'Z', b'X', b'C', b'V',
    b'B', b'N', b'M', b'<', b'>', b'?', 0, b'*', 0, b' ', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// Decoder state: just the shift keys.
struct KeyboardState {
    shift: bool,
}

static STATE: SpinLock<KeyboardState> = SpinLock::new(KeyboardState { shift: false });

/// Drains any bytes the controller buffered before the kernel was ready.
pub fn init() {
    // SAFETY: Reading the status/data ports only consumes stale bytes.
    unsafe {
        let status = Port::<u8>::new(STATUS_PORT);
        let data = Port::<u8>::new(DATA_PORT);
        while status.read() & STATUS_OUTPUT_FULL != 0 {
            let _ = data.read();
        }
    }
}

/// Non-blocking read of one translated character.
///
/// Returns `None` when no complete keypress is pending. Mouse bytes,
/// break codes, and unmapped keys are consumed silently.
#[must_use]
pub fn try_read_char() -> Option<u8> {
    // SAFETY: Status/data reads follow the i8042 polling protocol.
    let scancode = unsafe {
        let status = Port::<u8>::new(STATUS_PORT).read();
        if status & STATUS_OUTPUT_FULL == 0 {
            return None;
        }
        let byte = Port::<u8>::new(DATA_PORT).read();
        if status & STATUS_MOUSE_DATA != 0 {
            return None;
        }
        byte
    };

    let mut state = STATE.lock();
    let make = scancode & !BREAK_BIT;
    let released = scancode & BREAK_BIT != 0;

    if make == SC_LSHIFT || make == SC_RSHIFT {
        state.shift = !released;
        return None;
    }
    if released {
        return None;
    }

    let map = if state.shift { &KEYMAP_SHIFTED } else { &KEYMAP };
    match map.get(make as usize) {
        Some(&ch) if ch != 0 => Some(ch),
        _ => None,
    }
}

/// Blocking read: busy-polls until a key arrives.
///
/// This is the kernel's only wait loop; with no scheduler there is
/// nothing else to run.
#[must_use]
pub fn read_char() -> u8 {
    loop {
        if let Some(ch) = try_read_char() {
            return ch;
        }
        core::hint::spin_loop();
    }
}
