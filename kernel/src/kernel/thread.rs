// src/kernel/thread.rs
//
// スレッド = 保存された CPU コンテキスト + ready queue 用ノード + 所属プロセス。
// スレッドの生成（カーネルスタックの確保、最初の Context の組み立て）は
// 上位の責務で、ここでは型と終了経路だけを持つ。

use crate::arch::isr::Context;
use crate::kernel::process::Process;
use crate::kernel::queue::QueueNode;
use crate::kernel::sched;
use crate::logging;
use crate::types::VirtAddr;

pub struct Thread {
    /// 保存されたレジスタフレーム。割り込み復帰パスがここから復元する。
    pub context: Context,
    /// ready queue 用の埋め込みノード。
    pub node: QueueNode,
    /// 所属プロセス。カーネルスレッドでは process 0 を指す。
    pub process: *mut Process,
}

impl Thread {
    pub fn new(process: *mut Process) -> Thread {
        Thread {
            context: Context::zeroed(),
            node: QueueNode::new(),
            process,
        }
    }

    /// context の直後のアドレス。
    /// ring3 -> ring0 遷移で CPU がこの位置から Context を積み始めるよう、
    /// コンテキストスイッチごとに TSS.esp0 へ入れる。
    pub fn context_end(&self) -> VirtAddr {
        (&self.context as *const Context).wrapping_add(1) as usize as VirtAddr
    }
}

/// 実行中スレッドの協調的終了。
/// THREAD_DESTROY 番兵への #PF からだけ呼ばれる。dequeue が次のスレッドへの
/// 切替まで済ませるので、ハンドラはそのまま復帰すればよい。
pub fn destroy_current() {
    match sched::dequeue() {
        Some(thread) => {
            unsafe {
                let process = (*thread).process;
                if !process.is_null() {
                    (*process).thread_count -= 1;
                }
            }
            logging::info("thread: destroyed current thread");
        }
        None => {
            logging::error("thread: THREAD_DESTROY with no running thread");
        }
    }
}
