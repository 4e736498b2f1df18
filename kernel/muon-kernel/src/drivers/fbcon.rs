//! Framebuffer text console.
//!
//! Renders the built-in 8x8 font (scan-doubled to 8x16 cells) onto a
//! 32bpp linear framebuffer. This is the user-visible terminal: shell
//! I/O and user `write`s to stdout land here.

use core::ptr;

use crate::boot::FramebufferInfo;
use crate::sync::SpinLock;

use super::font::{GLYPH_HEIGHT, GLYPH_WIDTH, glyph};

/// Light-grey-on-black, packed for the common BGR/RGB 32-bit layouts
/// (all channels equal, so the channel order is irrelevant).
const FG_COLOR: u32 = 0x00AA_AAAA;
const BG_COLOR: u32 = 0x0000_0000;

/// The console state: framebuffer geometry plus the cursor.
struct Console {
    address: *mut u8,
    width: u32,
    height: u32,
    pitch: u32,
    cols: u32,
    rows: u32,
    col: u32,
    row: u32,
}

// SAFETY: Access is serialized by the CONSOLE SpinLock.
unsafe impl Send for Console {}

static CONSOLE: SpinLock<Option<Console>> = SpinLock::new(None);

/// Binds the console to a framebuffer. 32bpp only; anything else leaves
/// the console disabled and output goes to serial alone.
pub fn init(info: &FramebufferInfo) {
    if info.bpp != 32 {
        crate::kwarn!("fbcon: unsupported depth ({} bpp), console disabled", info.bpp);
        return;
    }

    let mut console = CONSOLE.lock();
    *console = Some(Console {
        address: info.address.as_mut_ptr(),
        width: info.width,
        height: info.height,
        pitch: info.pitch,
        cols: info.width / GLYPH_WIDTH,
        rows: info.height / GLYPH_HEIGHT,
        col: 0,
        row: 0,
    });
}

/// Writes text to the console. No-op before [`init`].
pub fn write_str(s: &str) {
    let mut guard = CONSOLE.lock();
    if let Some(console) = guard.as_mut() {
        for byte in s.bytes() {
            console.put_byte(byte);
        }
    }
}

/// Clears the screen and homes the cursor.
pub fn clear() {
    let mut guard = CONSOLE.lock();
    if let Some(console) = guard.as_mut() {
        console.clear();
    }
}

impl Console {
    fn put_pixel(&self, x: u32, y: u32, color: u32) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = y as usize * self.pitch as usize + x as usize * 4;
        // SAFETY: The offset is inside the framebuffer; volatile keeps
        // the store from being elided.
        unsafe { ptr::write_volatile(self.address.add(offset).cast::<u32>(), color) };
    }

    fn draw_glyph(&self, col: u32, row: u32, byte: u8) {
        let rows = glyph(byte);
        let x0 = col * GLYPH_WIDTH;
        let y0 = row * GLYPH_HEIGHT;
        for (i, &bits) in rows.iter().enumerate() {
            for dx in 0..GLYPH_WIDTH {
                let on = bits & (0x80 >> dx) != 0;
                let color = if on { FG_COLOR } else { BG_COLOR };
                let y = y0 + (i as u32) * 2;
                self.put_pixel(x0 + dx, y, color);
                self.put_pixel(x0 + dx, y + 1, color);
            }
        }
    }

    fn put_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.col = 0;
                self.row += 1;
            }
            b'\r' => self.col = 0,
            0x08 => {
                // Backspace: move left; the shell echoes "\x08 \x08" to erase.
                self.col = self.col.saturating_sub(1);
            }
            byte => {
                if self.col >= self.cols {
                    self.col = 0;
                    self.row += 1;
                }
                if self.row >= self.rows {
                    self.scroll();
                }
                self.draw_glyph(self.col, self.row, byte);
                self.col += 1;
            }
        }
        if self.row >= self.rows {
            self.scroll();
        }
    }

    /// Scrolls up one text row and blanks the last.
    fn scroll(&mut self) {
        let row_bytes = self.pitch as usize * GLYPH_HEIGHT as usize;
        let visible_rows = self.rows as usize;
        if visible_rows <= 1 {
            self.row = 0;
            return;
        }
        // SAFETY: Source and destination both lie inside the framebuffer.
        unsafe {
            ptr::copy(
                self.address.add(row_bytes),
                self.address,
                row_bytes * (visible_rows - 1),
            );
            ptr::write_bytes(self.address.add(row_bytes * (visible_rows - 1)), 0, row_bytes);
        }
        self.row = self.rows - 1;
    }

    fn clear(&mut self) {
        let total = self.pitch as usize * self.height as usize;
        // SAFETY: Zeroing the framebuffer region blanks the display.
        unsafe { ptr::write_bytes(self.address, 0, total) };
        self.col = 0;
        self.row = 0;
    }
}
