// src/timer.rs
//
// 8253/8254 PIT channel 0 を system tick の供給源にする。
// - init(): TICK_HZ で IRQ0 が上がるようにプログラムし、vector 32 に橋渡しする
// - register_handler(): tick ごとに呼ばれるコールバックを 1 つ登録する
//
// PIC の remap と EOI は割り込み基盤（外部）の責務。

use spin::Mutex;

use x86::io::outb;

use crate::arch::{cpu, isr};
use crate::logging;

const CH0_DATA: u16 = 0x40;
const CMD: u16 = 0x43;

/// PIT の入力クロック (Hz)。divisor = PIT_BASE_HZ / TICK_HZ。
const PIT_BASE_HZ: u32 = 1_193_182;

/// tick レート (Hz)。100Hz = 10ms ごと。スケジューラのタイムスライスを兼ねる。
pub const TICK_HZ: u32 = 100;

/// channel 0, lo/hi byte, mode 3 (square wave), binary
const CMD_CH0_SQUARE: u8 = 0x36;

pub type TickHandler = fn();

static TICK_HANDLER: Mutex<Option<TickHandler>> = Mutex::new(None);

pub fn init() {
    let divisor = (PIT_BASE_HZ / TICK_HZ) as u16;
    unsafe {
        outb(CMD, CMD_CH0_SQUARE);
        outb(CH0_DATA, (divisor & 0xFF) as u8);
        outb(CH0_DATA, (divisor >> 8) as u8);
    }

    isr::register(isr::VECTOR_TIMER, tick_isr);
    logging::info("timer: PIT programmed");
    logging::info_hex("tick_hz", TICK_HZ);
}

/// tick ごとに呼ぶコールバックを登録する（スケジューラが使う）。
pub fn register_handler(handler: TickHandler) {
    cpu::without_interrupts(|| {
        *TICK_HANDLER.lock() = Some(handler);
    });
}

fn tick_isr(_context: &mut isr::Context) {
    // 割り込み文脈なのでロックは競合しない（シングル CPU + interrupt gate）
    let handler = *TICK_HANDLER.lock();
    if let Some(handler) = handler {
        handler();
    }
}
