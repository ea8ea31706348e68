// src/main.rs
//
// Multiboot エントリ。boot スタブ（外部 asm）が protected mode で
// EAX = magic, EBX = info を積んで kmain を呼ぶ。

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]

mod arch;
mod kernel;
mod logging;
mod mem;
mod mm;
mod multiboot;
#[cfg(not(test))]
mod panic;
mod timer;
mod types;

#[no_mangle]
pub extern "C" fn kmain(magic: u32, info: *const multiboot::Info) -> ! {
    logging::init();
    logging::info("proto-os: boot");

    assert_eq!(
        magic,
        multiboot::BOOTLOADER_MAGIC,
        "not loaded by a multiboot bootloader"
    );

    // info はブートローダが identity 領域に置いた構造体。boot 以降は読み取り専用
    let info = unsafe { &*info };
    kernel::start(info)
}

#[cfg(test)]
pub mod test_support {
    //! グローバル状態（TSS / ISR context / スケジューラ）に触るテストの直列化。

    use std::sync::{Mutex, MutexGuard};

    static GLOBALS: Mutex<()> = Mutex::new(());

    pub fn lock_globals() -> MutexGuard<'static, ()> {
        GLOBALS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
