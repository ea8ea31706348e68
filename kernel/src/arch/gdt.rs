// src/arch/gdt.rs
//
// 役割:
// - GDT と TSS を構築してロードする。
// - ring3 -> ring0 遷移で CPU が積むカーネルスタック (TSS.esp0) を管理する。
//
// やること:
// - init(): 6 エントリの GDT を公開し、TSS descriptor を実行時に埋めて
//   GDTR / segment register / TR を更新する
// - set_kernel_stack(): コンテキストスイッチごとに TSS.esp0 を書き換える
//
// やらないこと:
// - LDT、I/O bitmap、複数 TSS（ハードウェアタスクスイッチは使わない）
//
// 設計方針:
// - descriptor のレイアウトはハードウェアが直接読むため bit 単位で固定する。
//   エンコード自体は純粋関数にして、ホスト側テストで検証する。
// - GDT/TSS は「ロード後に動かない」静的領域へ固定配置する。
// - TSS descriptor の busy bit が立ったまま ltr し直すと fault するので、
//   init は一度しか通らないことを AtomicBool で保証する。

#![allow(dead_code)]

use core::mem;
use core::ptr::{addr_of, addr_of_mut};
use core::sync::atomic::{AtomicBool, Ordering};

use x86::dtables::{lgdt, DescriptorTablePointer};
use x86::segmentation::{load_cs, load_ds, load_es, load_fs, load_gs, load_ss, SegmentSelector};
use x86::task::load_tr;
use x86::Ring;

use crate::arch::cpu;
use crate::logging;
use crate::types::VirtAddr;

const GDT_ENTRY_COUNT: usize = 6;

// selector index（0x08 / 0x10 / 0x18 / 0x20 / 0x28 に対応）
const KERNEL_CODE_INDEX: u16 = 1;
const KERNEL_DATA_INDEX: u16 = 2;
const USER_CODE_INDEX: u16 = 3;
const USER_DATA_INDEX: u16 = 4;
const TSS_INDEX: u16 = 5;

// access byte: P | DPL | S | type
const ACCESS_KERNEL_CODE: u8 = 0x9A;
const ACCESS_KERNEL_DATA: u8 = 0x92;
const ACCESS_USER_CODE: u8 = 0xFA;
const ACCESS_USER_DATA: u8 = 0xF2;
const ACCESS_TSS: u8 = 0x89;

// flags nibble: G | D/B | L | AVL
const FLAGS_4K_32BIT: u8 = 0xC;
const FLAGS_32BIT: u8 = 0x4;

/// 4GiB 全体をカバーする limit（G=1 なので 4KiB 単位）
const LIMIT_FULL: u32 = 0xFFFFF;

pub fn kernel_code_selector() -> SegmentSelector {
    SegmentSelector::new(KERNEL_CODE_INDEX, Ring::Ring0)
}

pub fn kernel_data_selector() -> SegmentSelector {
    SegmentSelector::new(KERNEL_DATA_INDEX, Ring::Ring0)
}

pub fn user_code_selector() -> SegmentSelector {
    SegmentSelector::new(USER_CODE_INDEX, Ring::Ring3)
}

pub fn user_data_selector() -> SegmentSelector {
    SegmentSelector::new(USER_DATA_INDEX, Ring::Ring3)
}

fn tss_selector() -> SegmentSelector {
    SegmentSelector::new(TSS_INDEX, Ring::Ring0)
}

/// GDT の 1 エントリ（8 byte）。フィールド順はハードウェアのレイアウトそのまま。
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    pub const NULL: GdtEntry = GdtEntry {
        limit_low: 0,
        base_low: 0,
        base_mid: 0,
        access: 0,
        granularity: 0,
        base_high: 0,
    };

    pub const fn new(base: u32, limit: u32, access: u8, flags: u8) -> GdtEntry {
        GdtEntry {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | ((flags & 0x0F) << 4),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    /// 8 byte のエンコード結果をそのまま返す（検証用）。
    pub const fn bits(self) -> u64 {
        (self.limit_low as u64)
            | ((self.base_low as u64) << 16)
            | ((self.base_mid as u64) << 32)
            | ((self.access as u64) << 40)
            | ((self.granularity as u64) << 48)
            | ((self.base_high as u64) << 56)
    }
}

/// TSS（104 byte）。意味を持つのは esp0 / ss0 / iomap_base だけ。
#[repr(C)]
pub struct TaskStateSegment {
    prev_tss: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldt: u32,
    trap: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn zeroed() -> TaskStateSegment {
        // unsafe を避けるため全フィールドを明示する
        TaskStateSegment {
            prev_tss: 0,
            esp0: 0,
            ss0: 0,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldt: 0,
            trap: 0,
            iomap_base: 0,
        }
    }
}

static INIT_DONE: AtomicBool = AtomicBool::new(false);

static mut TSS: TaskStateSegment = TaskStateSegment::zeroed();

static mut GDT: [GdtEntry; GDT_ENTRY_COUNT] = [
    GdtEntry::NULL,
    GdtEntry::new(0, LIMIT_FULL, ACCESS_KERNEL_CODE, FLAGS_4K_32BIT),
    GdtEntry::new(0, LIMIT_FULL, ACCESS_KERNEL_DATA, FLAGS_4K_32BIT),
    GdtEntry::new(0, LIMIT_FULL, ACCESS_USER_CODE, FLAGS_4K_32BIT),
    GdtEntry::new(0, LIMIT_FULL, ACCESS_USER_DATA, FLAGS_4K_32BIT),
    // TSS descriptor は base が実行時にしか決まらないので init() で埋める
    GdtEntry::NULL,
];

pub fn init() {
    cpu::without_interrupts(|| {
        if INIT_DONE.swap(true, Ordering::SeqCst) {
            return;
        }

        unsafe {
            let tss = addr_of_mut!(TSS);
            (*tss).ss0 = kernel_data_selector().bits() as u32;
            (*tss).iomap_base = mem::size_of::<TaskStateSegment>() as u16;

            let gdt = addr_of_mut!(GDT);
            (*gdt)[TSS_INDEX as usize] = GdtEntry::new(
                tss as usize as u32,
                (mem::size_of::<TaskStateSegment>() - 1) as u32,
                ACCESS_TSS,
                FLAGS_32BIT,
            );

            let pointer = DescriptorTablePointer {
                limit: (mem::size_of::<[GdtEntry; GDT_ENTRY_COUNT]>() - 1) as u16,
                base: addr_of!(GDT) as *const GdtEntry,
            };
            lgdt(&pointer);

            load_cs(kernel_code_selector());
            load_ds(kernel_data_selector());
            load_es(kernel_data_selector());
            load_fs(kernel_data_selector());
            load_gs(kernel_data_selector());
            load_ss(kernel_data_selector());

            load_tr(tss_selector());
        }

        logging::info("arch::gdt::init: GDT/TSS loaded");
        logging::info_hex("tss_base", unsafe { addr_of!(TSS) as usize as u32 });
    });
}

/// ring3 -> ring0 遷移時に CPU が ESP へロードする値を更新する。
/// コンテキストスイッチごとにスケジューラから呼ばれる。
pub fn set_kernel_stack(esp0: VirtAddr) {
    unsafe {
        (*addr_of_mut!(TSS)).esp0 = esp0;
    }
}

/// 現在の TSS.esp0。
pub fn kernel_stack() -> VirtAddr {
    unsafe { (*addr_of!(TSS)).esp0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 既知のエンコード値と突き合わせる（base=0, limit=0xFFFFF の平坦セグメント）
    #[test]
    fn flat_segment_encodings() {
        assert_eq!(
            GdtEntry::new(0, LIMIT_FULL, ACCESS_KERNEL_CODE, FLAGS_4K_32BIT).bits(),
            0x00CF_9A00_0000_FFFF
        );
        assert_eq!(
            GdtEntry::new(0, LIMIT_FULL, ACCESS_KERNEL_DATA, FLAGS_4K_32BIT).bits(),
            0x00CF_9200_0000_FFFF
        );
        assert_eq!(
            GdtEntry::new(0, LIMIT_FULL, ACCESS_USER_CODE, FLAGS_4K_32BIT).bits(),
            0x00CF_FA00_0000_FFFF
        );
        assert_eq!(
            GdtEntry::new(0, LIMIT_FULL, ACCESS_USER_DATA, FLAGS_4K_32BIT).bits(),
            0x00CF_F200_0000_FFFF
        );
    }

    #[test]
    fn tss_descriptor_encoding() {
        // base/limit がフィールドへ分解されて入ることを確認する
        let entry = GdtEntry::new(0x0012_3456, 103, ACCESS_TSS, FLAGS_32BIT);
        let bits = entry.bits();
        assert_eq!(bits & 0xFFFF, 103); // limit low
        assert_eq!((bits >> 16) & 0xFFFF, 0x3456); // base low
        assert_eq!((bits >> 32) & 0xFF, 0x12); // base mid
        assert_eq!((bits >> 40) & 0xFF, 0x89); // access
        assert_eq!((bits >> 48) & 0xFF, 0x40); // flags | limit high
        assert_eq!((bits >> 56) & 0xFF, 0x00); // base high
    }

    #[test]
    fn selectors_match_fixed_layout() {
        assert_eq!(kernel_code_selector().bits(), 0x08);
        assert_eq!(kernel_data_selector().bits(), 0x10);
        assert_eq!(user_code_selector().bits(), 0x1B); // RPL=3
        assert_eq!(user_data_selector().bits(), 0x23);
        assert_eq!(tss_selector().bits(), 0x28);
    }

    #[test]
    fn tss_is_104_bytes() {
        assert_eq!(mem::size_of::<TaskStateSegment>(), 104);
    }

    #[test]
    fn kernel_stack_round_trips() {
        let _guard = crate::test_support::lock_globals();
        set_kernel_stack(0x0030_0000);
        assert_eq!(kernel_stack(), 0x0030_0000);
    }
}
