// src/kernel/sched.rs
//
// 役割:
// - timer tick 駆動のラウンドロビンスケジューラ。
// - スレッド間のコンテキストスイッチと、プロセス間のアドレス空間スイッチ。
//
// 設計方針:
// - ready queue の「末尾 = 実行中スレッド」を不変条件にする。
//   こうすると新しいスレッドを『実行中の後ろ』へ入れる操作が特別扱い無しで書ける。
// - 状態は Scheduler 構造体 1 つに閉じ込め、触るときは必ず割り込みを閉じる
//   （tick ハンドラと共有するため）。
// - tick 経路では確保も解放もしない。
//
// 不変条件:
// - スレッドはキューに高々 1 回
// - コンテキストスイッチ後、TSS.esp0 はそのスレッドの Context 直後を指す

#![allow(dead_code)]

use core::ptr;

use spin::Mutex;

use crate::arch::{cpu, gdt, isr};
use crate::kernel::process::Process;
use crate::kernel::queue::ThreadQueue;
use crate::kernel::thread::Thread;
use crate::logging;
use crate::timer;

struct Scheduler {
    ready: ThreadQueue,
    current_process: *mut Process,
}

// シングル CPU。割り込みを閉じた区間からしか触らない
unsafe impl Send for Scheduler {}

impl Scheduler {
    const fn new() -> Scheduler {
        Scheduler {
            ready: ThreadQueue::new(),
            current_process: ptr::null_mut(),
        }
    }
}

static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

pub fn init() {
    cpu::without_interrupts(|| {
        *SCHEDULER.lock() = Scheduler::new();
    });
    timer::register_handler(tick);
    logging::info("sched: tick handler registered");
}

fn tick() {
    schedule();
}

/// 先頭のスレッドを末尾（実行位置）へ回してスイッチする。
/// キューが空なら何もしない（idle）。
pub fn schedule() {
    cpu::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        rotate(&mut sched);
    });
}

fn rotate(sched: &mut Scheduler) {
    let next = unsafe { sched.ready.pop_head() };
    let Some(next) = next else {
        return;
    };
    unsafe {
        sched.ready.push_tail(next);
    }
    switch_to(sched, next);
}

/// スイッチの実体。
/// - プロセスが変わるなら CR3 を書き換える
/// - 復帰先 Context ポインタを差し替える
/// - TSS.esp0 を新スレッドの Context 直後へ向ける
fn switch_to(sched: &mut Scheduler, thread: *mut Thread) {
    unsafe {
        let thread = &mut *thread;
        switch_process(sched, thread.process);
        isr::set_context(&mut thread.context);
        gdt::set_kernel_stack(thread.context_end());
    }
}

fn switch_process(sched: &mut Scheduler, process: *mut Process) {
    if sched.current_process != process {
        sched.current_process = process;
        if !process.is_null() {
            // CR3 書き込みで global でない TLB は flush される
            unsafe { cpu::write_cr3((*process).page_directory) };
        }
    }
}

/// 明示的に指定スレッドへ切り替える（tick を待たない）。
pub fn context_switch(thread: *mut Thread) {
    cpu::without_interrupts(|| {
        switch_to(&mut SCHEDULER.lock(), thread);
    });
}

/// 新しいスレッドを末尾に繋ぎ、即座に実行へ移す。
/// 直前まで実行していたスレッドは末尾の 1 つ手前になる。
pub fn new(thread: *mut Thread) {
    cpu::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        unsafe {
            sched.ready.push_tail(thread);
        }
        switch_to(&mut sched, thread);
    });
}

/// スレッドを実行中スレッドの後ろ（末尾の 1 つ手前）へ繋ぐ。
/// 空のキューでは先頭に入るが、その場合も次の schedule までは
/// 実行には移らない点に注意。
pub fn enqueue(thread: *mut Thread) {
    cpu::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        unsafe {
            sched.ready.insert_before_tail(thread);
        }
    });
}

/// 実行中スレッドをキューから外して返す。
/// 残りがあれば新しい先頭をスケジュールし、tail = running を回復する。
/// 外したスレッドの破棄や待機への繋ぎ直しは呼び出し側の責務。
pub fn dequeue() -> Option<*mut Thread> {
    cpu::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        let thread = unsafe { sched.ready.pop_tail() }?;
        rotate(&mut sched);
        Some(thread)
    })
}

/// スレッドをキューから外す。実行中なら dequeue と同じ経路を通す。
pub fn remove(thread: *mut Thread) {
    cpu::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        if sched.ready.tail_thread() == Some(thread) {
            unsafe {
                sched.ready.pop_tail();
            }
            rotate(&mut sched);
        } else {
            unsafe {
                sched.ready.unlink(thread);
            }
        }
    });
}

/// 実行中スレッド（= 末尾）。
pub fn current() -> Option<*mut Thread> {
    cpu::without_interrupts(|| SCHEDULER.lock().ready.tail_thread())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use core::mem;

    fn thread() -> std::boxed::Box<Thread> {
        std::boxed::Box::new(Thread::new(ptr::null_mut()))
    }

    // A, B, C を new で投入（C が実行中）→ tick 3 回で C→A→B→C と一巡する
    #[test]
    fn round_robin_cycles() {
        let _guard = test_support::lock_globals();
        init();

        let mut a = thread();
        let mut b = thread();
        let mut c = thread();

        new(&mut *a);
        assert_eq!(current(), Some(&mut *a as *mut Thread));
        new(&mut *b);
        new(&mut *c);
        assert_eq!(current(), Some(&mut *c as *mut Thread));

        schedule();
        assert_eq!(current(), Some(&mut *a as *mut Thread));
        schedule();
        assert_eq!(current(), Some(&mut *b as *mut Thread));
        schedule();
        assert_eq!(current(), Some(&mut *c as *mut Thread));
    }

    #[test]
    fn schedule_on_empty_queue_is_idle() {
        let _guard = test_support::lock_globals();
        init();
        assert_eq!(current(), None);
        schedule();
        assert_eq!(current(), None);
    }

    // コンテキストスイッチ後: ISR の復帰先と TSS.esp0 が新スレッドを指す
    #[test]
    fn context_switch_updates_isr_and_tss() {
        let _guard = test_support::lock_globals();
        init();

        let mut t = thread();
        new(&mut *t);

        assert_eq!(isr::context(), &mut t.context as *mut isr::Context);
        assert_eq!(gdt::kernel_stack(), t.context_end());
        assert_eq!(
            t.context_end() as usize,
            (&t.context as *const _ as usize as u32) as usize
                + mem::size_of::<isr::Context>()
        );
    }

    #[test]
    fn dequeue_returns_running_and_rotates() {
        let _guard = test_support::lock_globals();
        init();

        let mut a = thread();
        let mut b = thread();
        new(&mut *a);
        new(&mut *b);

        // 実行中の B が外れ、残った A が実行位置（末尾）へ回る
        assert_eq!(dequeue(), Some(&mut *b as *mut Thread));
        assert_eq!(current(), Some(&mut *a as *mut Thread));

        assert_eq!(dequeue(), Some(&mut *a as *mut Thread));
        assert_eq!(current(), None);
        assert_eq!(dequeue(), None);
    }

    #[test]
    fn enqueue_inserts_behind_running() {
        let _guard = test_support::lock_globals();
        init();

        let mut a = thread();
        let mut b = thread();
        new(&mut *a);
        enqueue(&mut *b);

        // 実行中は A のまま、次の tick で B が実行位置へ来る
        assert_eq!(current(), Some(&mut *a as *mut Thread));
        schedule();
        assert_eq!(current(), Some(&mut *b as *mut Thread));
    }

    #[test]
    fn remove_unlinks_non_running_thread() {
        let _guard = test_support::lock_globals();
        init();

        let mut a = thread();
        let mut b = thread();
        let mut c = thread();
        new(&mut *a);
        new(&mut *b);
        new(&mut *c);

        // A は実行中ではないのでただ外れるだけ
        remove(&mut *a);
        assert_eq!(current(), Some(&mut *c as *mut Thread));
        schedule();
        assert_eq!(current(), Some(&mut *b as *mut Thread));

        // 実行中の B を外すと C が実行位置へ回る
        remove(&mut *b);
        assert_eq!(current(), Some(&mut *c as *mut Thread));
    }
}
