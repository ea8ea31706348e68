// src/logging/vga.rs
//
// VGA テキストモード(0xb8000)への最小限出力。
// - カーソル位置（row, col）を進めながら書き、最下行まで来たら 1 行スクロール。
// - serial が見えない実機でも起動ログと panic が読めることが目的。

use core::fmt::{self, Write};
use spin::Mutex;
use volatile::Volatile;

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

/// 属性バイト: 黒地にライトグレー
const COLOR_CODE: u8 = 0x07;

#[repr(C)]
#[derive(Clone, Copy)]
struct ScreenChar {
    ascii_character: u8,
    color_code: u8,
}

const BLANK: ScreenChar = ScreenChar {
    ascii_character: b' ',
    color_code: COLOR_CODE,
};

#[repr(transparent)]
struct Buffer {
    chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

struct Writer {
    row: usize,
    col: usize,
    buffer: &'static mut Buffer,
}

impl Writer {
    fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.col >= BUFFER_WIDTH {
                    self.new_line();
                }
                self.buffer.chars[self.row][self.col].write(ScreenChar {
                    ascii_character: byte,
                    color_code: COLOR_CODE,
                });
                self.col += 1;
            }
        }
    }

    fn new_line(&mut self) {
        self.col = 0;
        if self.row + 1 < BUFFER_HEIGHT {
            self.row += 1;
            return;
        }

        // 最下行に達したので全体を 1 行持ち上げる
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let ch = self.buffer.chars[row][col].read();
                self.buffer.chars[row - 1][col].write(ch);
            }
        }
        for col in 0..BUFFER_WIDTH {
            self.buffer.chars[BUFFER_HEIGHT - 1][col].write(BLANK);
        }
    }

    fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                self.buffer.chars[row][col].write(BLANK);
            }
        }
        self.row = 0;
        self.col = 0;
    }
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.write_byte(b);
        }
        Ok(())
    }
}

static WRITER: Mutex<Option<Writer>> = Mutex::new(None);

pub fn init() {
    let mut writer = Writer {
        row: 0,
        col: 0,
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    };
    // ブートローダの残した画面を消してから使う
    writer.clear();
    *WRITER.lock() = Some(writer);
}

pub fn write_str(s: &str) {
    crate::arch::cpu::without_interrupts(|| {
        if let Some(ref mut w) = *WRITER.lock() {
            let _ = w.write_str(s);
        }
    });
}

pub fn write_line(s: &str) {
    crate::arch::cpu::without_interrupts(|| {
        if let Some(ref mut w) = *WRITER.lock() {
            let _ = w.write_str(s);
            let _ = w.write_str("\n");
        }
    });
}
