// src/panic.rs
//
// no_std カーネル用の panic ハンドラ。
// 挙動は「ログ出力 → CPU 停止」に固定する（fail-stop）。

use core::fmt::Write;
use core::panic::PanicInfo;

use crate::{arch, logging};

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    logging::error("kernel panic");

    // メッセージと発生位置は serial へそのまま流す（VGA 側は 1 行に収まらない）
    let mut serial = logging::SerialWriter;
    let _ = write!(serial, "[PANIC] {}\r\n", info);

    arch::halt_loop()
}
