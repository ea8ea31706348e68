// src/kernel/process.rs
//
// プロセス = アドレス空間（PD）の所有者。
// プロセスは自分を参照するスレッドが 1 つでも残っている限り生きる。
// 生成・破棄の上位ロジック（ELF ロードや exit 経路）はこの層の外。

use crate::types::PhysAddr;

pub struct Process {
    /// この空間の PD の物理アドレス。CR3 に入る値。
    pub page_directory: PhysAddr,
    /// このプロセスを参照しているスレッド数。
    pub thread_count: usize,
}

impl Process {
    pub fn new(page_directory: PhysAddr) -> Process {
        Process {
            page_directory,
            thread_count: 0,
        }
    }
}
