// src/arch/cpu.rs
//
// 役割:
// - CPU 命令ラッパの集約。unsafe をここに局所化する。
// - TLB 無効化 / CR2・CR3 / ページング有効化 / 割り込みフラグの操作。
//
// 設計方針:
// - 命令そのものは x86 crate にあるものを使い、32bit 専用のエンコードが
//   必要なもの（CR アクセス、pushfd）だけ自前の inline asm にする。
// - 自前 asm は #[cfg(target_arch = "x86")] で囲み、ホスト側の単体テストには
//   何もしないスタブを与える（特権命令はテストから実行されない前提）。

#![allow(dead_code)]

use crate::types::{PhysAddr, VirtAddr};

/// CPU を停止させるループ。カーネルに仕事が無いときはここで HLT し続ける。
pub fn halt_loop() -> ! {
    loop {
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}

/// 1 ページ分の TLB エントリを無効化する。
pub fn invlpg(virt: VirtAddr) {
    #[cfg(target_arch = "x86")]
    unsafe {
        x86::tlb::flush(virt as usize);
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = virt;
}

/// #PF を起こした線形アドレスを読む。
pub fn read_cr2() -> VirtAddr {
    #[cfg(target_arch = "x86")]
    unsafe {
        let value: u32;
        core::arch::asm!("mov {}, cr2", out(reg) value, options(nomem, nostack, preserves_flags));
        value
    }
    #[cfg(not(target_arch = "x86"))]
    0
}

/// アドレス空間を切り替える。CR3 書き込みは global でない TLB を flush する。
///
/// # Safety
/// 渡す物理アドレスは有効な PD の先頭で、実行中のカーネル領域が
/// その PD からも見えていること。
pub unsafe fn write_cr3(pd: PhysAddr) {
    #[cfg(target_arch = "x86")]
    core::arch::asm!("mov cr3, {}", in(reg) pd, options(nostack, preserves_flags));
    #[cfg(not(target_arch = "x86"))]
    let _ = pd;
}

/// 現在の PD の物理アドレス。
pub fn read_cr3() -> PhysAddr {
    #[cfg(target_arch = "x86")]
    unsafe {
        let value: u32;
        core::arch::asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
        value
    }
    #[cfg(not(target_arch = "x86"))]
    0
}

/// CR3 を設定し、CR4 の PSE/PGE と CR0 の PG を立ててページングを有効化する。
///
/// # Safety
/// PD に identity map が張られていないと、この関数から戻った瞬間に
/// 命令フェッチで落ちる。
pub unsafe fn setup_paging(pd: PhysAddr) {
    #[cfg(target_arch = "x86")]
    core::arch::asm!(
        "mov cr3, {pd}",
        // PSE (4MiB page) と PGE (global page)
        "mov {tmp}, cr4",
        "or {tmp}, 0x90",
        "mov cr4, {tmp}",
        // PG
        "mov {tmp}, cr0",
        "or {tmp}, 0x80000000",
        "mov cr0, {tmp}",
        pd = in(reg) pd,
        tmp = out(reg) _,
        options(nostack),
    );
    #[cfg(not(target_arch = "x86"))]
    let _ = pd;
}

/// 割り込みを許可する。boot 完了時に一度だけ呼ぶ。
pub fn enable_interrupts() {
    #[cfg(target_arch = "x86")]
    unsafe {
        x86::irq::enable();
    }
}

/// 割り込みフラグを保存して閉じ、クロージャ実行後に元へ戻す。
/// 割り込みハンドラと共有する状態のロックは必ずこの中で取ること。
#[cfg(target_arch = "x86")]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let flags: u32;
    unsafe {
        core::arch::asm!(
            "pushfd",
            "pop {}",
            out(reg) flags,
            options(nomem, preserves_flags),
        );
    }
    let were_enabled = flags & (1 << 9) != 0;

    if were_enabled {
        unsafe { x86::irq::disable() };
    }
    let result = f();
    if were_enabled {
        unsafe { x86::irq::enable() };
    }
    result
}

/// ホスト側テスト用: 割り込みという概念が無いのでそのまま実行する。
#[cfg(not(target_arch = "x86"))]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}
