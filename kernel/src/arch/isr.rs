// src/arch/isr.rs
//
// 役割:
// - 割り込みベクタごとのカーネルハンドラ登録と dispatch。
// - 「いま復帰すべきスレッドの Context」を指すプロセス共通ポインタの管理。
//
// 設計方針:
// - IDT / スタブ asm は外部（boot 側）の責務。スタブは割り込みのたびに
//   レジスタ一式を Context として積み、isr_dispatch() を呼び、
//   返ってきたポインタの指す Context を復元して iret する。
// - スケジューラは set_context() で復帰先を差し替える。これが
//   コンテキストスイッチの実体で、dispatch の戻り値に現れる。
// - ハンドラ実行中は割り込み禁止（interrupt gate 前提）なのでロックは素通しで取れる。

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch::cpu;
use crate::logging;

pub const VECTOR_PAGE_FAULT: u8 = 14;
pub const VECTOR_TIMER: u8 = 32;

const VECTOR_COUNT: usize = 256;

/// 割り込みスタブが積むレジスタフレーム。iret の積み順に一致させている。
/// useresp / ss は ring 遷移があったときだけ CPU が積む。
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Context {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    // pusha の順
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    // スタブが積む
    pub int_no: u32,
    pub err_code: u32,
    // CPU が積む
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

impl Context {
    pub const fn zeroed() -> Context {
        Context {
            gs: 0,
            fs: 0,
            es: 0,
            ds: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            int_no: 0,
            err_code: 0,
            eip: 0,
            cs: 0,
            eflags: 0,
            useresp: 0,
            ss: 0,
        }
    }
}

pub type Handler = fn(&mut Context);

static HANDLERS: Mutex<[Option<Handler>; VECTOR_COUNT]> = Mutex::new([None; VECTOR_COUNT]);

/// 復帰先 Context へのポインタ。スケジューラが書き、復帰パスが読む。
static ACTIVE_CONTEXT: AtomicUsize = AtomicUsize::new(0);

pub fn register(vector: u8, handler: Handler) {
    cpu::without_interrupts(|| {
        HANDLERS.lock()[vector as usize] = Some(handler);
    });
    logging::info("isr: handler registered");
    logging::info_hex("vector", vector as u32);
}

/// 復帰先の Context を差し替える。
pub fn set_context(context: *mut Context) {
    ACTIVE_CONTEXT.store(context as usize, Ordering::Relaxed);
}

pub fn context() -> *mut Context {
    ACTIVE_CONTEXT.load(Ordering::Relaxed) as *mut Context
}

/// 割り込みスタブから呼ばれる入口。復元すべき Context を返す。
///
/// ハンドラの中でスケジューラが set_context() を呼べば、戻り値が差し替わり、
/// スタブは別スレッドの Context を復元して iret する。
#[no_mangle]
pub extern "C" fn isr_dispatch(context: *mut Context) -> *mut Context {
    set_context(context);

    let vector = unsafe { (*context).int_no } as usize;
    let handler = HANDLERS.lock()[vector];

    match handler {
        Some(handler) => handler(unsafe { &mut *context }),
        None => {
            logging::error("isr: unexpected interrupt");
            logging::info_hex("vector", vector as u32);
            panic!("unexpected interrupt");
        }
    }

    self::context()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    // スタブの積み順と 1 word もずれてはいけない
    #[test]
    fn context_is_19_words() {
        assert_eq!(mem::size_of::<Context>(), 19 * 4);
    }

    #[test]
    fn context_pointer_round_trips() {
        let _guard = crate::test_support::lock_globals();
        let mut ctx = Context::zeroed();
        set_context(&mut ctx);
        assert_eq!(context(), &mut ctx as *mut Context);
    }
}
