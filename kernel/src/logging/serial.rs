// src/logging/serial.rs
//
// COM1 (0x3F8) への最小限のシリアル出力。
// - init(): 115200bps, 8N1 に初期化
// - write_str() / write_line(): 文字列を送信
//
// 注意:
// - write_byte は送信待ちループを含むので without_interrupts では囲まない。
// - init 前の出力は黙って捨てる（boot 直後や panic 経路でも安全に呼べるように）。

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use x86::io::{inb, outb};

const COM1: u16 = 0x3F8;

static SERIAL_INITIALIZED: AtomicBool = AtomicBool::new(false);

pub fn init() {
    if SERIAL_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    unsafe {
        // 割り込みを無効化
        outb(COM1 + 1, 0x00);

        // DLAB 有効化 → 115200bps (divisor 1)
        outb(COM1 + 3, 0x80);
        outb(COM1 + 0, 0x01);
        outb(COM1 + 1, 0x00);

        // 8N1
        outb(COM1 + 3, 0x03);

        // FIFO 有効化
        outb(COM1 + 2, 0xC7);

        // RTS/DSR
        outb(COM1 + 4, 0x0B);
    }
}

fn write_byte(byte: u8) {
    unsafe {
        // ビット5 (0x20) がセットされるまで待つ（送信バッファ空き待ち）
        while (inb(COM1 + 5) & 0x20) == 0 {}
        outb(COM1, byte);
    }
}

pub fn write_str(s: &str) {
    if !SERIAL_INITIALIZED.load(Ordering::Relaxed) {
        return;
    }
    for b in s.bytes() {
        write_byte(b);
    }
}

pub fn write_line(s: &str) {
    write_str(s);
    write_str("\r\n");
}

/// fmt::Write 実装。panic ハンドラが PanicInfo をそのまま流すのに使う。
pub struct SerialWriter;

impl fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        write_str(s);
        Ok(())
    }
}
