// src/kernel/mod.rs
//
// カーネルの bootstrap。main.rs から呼ばれるのは start() だけ。
// 初期化順序は依存の向きそのまま:
//   logging -> PMEM -> paging -> GDT/TSS -> timer -> scheduler

pub mod process;
pub mod queue;
pub mod sched;
pub mod thread;

use crate::arch;
use crate::logging;
use crate::mm;
use crate::multiboot;
use crate::timer;

pub fn start(info: &'static multiboot::Info) -> ! {
    logging::info("kernel::start()");

    // 物理フレームの供給源。paging init が最初の利用者になる
    mm::init(info);

    // ページングを立ち上げる（以後 identity 領域の外は map/unmap 経由）
    arch::paging::init();

    // セグメンテーションと ring 遷移用のカーネルスタック
    arch::gdt::init();

    // tick 供給源とラウンドロビン
    timer::init();
    sched::init();

    logging::info("kernel::start: core initialized");

    // スレッドが投入されるまでは tick ごとに idle
    arch::cpu::enable_interrupts();
    arch::halt_loop()
}
