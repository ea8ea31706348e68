// src/arch/mod.rs
//
// アーキ依存部。unsafe をここに局所化する方針。
// - cpu: 命令ラッパ（TLB / CR / 割り込みフラグ）
// - gdt: セグメンテーションと TSS
// - isr: 割り込みハンドラ登録と Context
// - paging: ページテーブル操作と #PF

pub mod cpu;
pub mod gdt;
pub mod isr;
pub mod paging;

/// CPU を停止させるループ。カーネル終了時はここに来て HLT し続ける。
pub fn halt_loop() -> ! {
    cpu::halt_loop()
}
