// src/arch/paging.rs
//
// 役割:
// - 2 段ページング（PD + PT）の実体。map/unmap、アドレス変換、
//   アドレス空間の生成/破棄、#PF ハンドラ、ページング有効化。
//
// やること:
// - recursive self-map（PD の最終エントリが PD 自身を指す）を前提に、
//   固定仮想アドレス layout::PD / layout::PTS 経由で全テーブルを編集する
// - 所有権ビット ALLOCATED で「VMM が確保したフレーム」を追跡し、
//   unmap / 再 map で確実に返却する
//
// やらないこと:
// - demand paging、copy-on-write、swap（この段階では全部 fail-stop）
//
// 設計方針:
// - identity map（先頭 8MiB）は paging 層からは不変。これ未満の map/unmap は
//   assert で弾く（壊れていたら早めに panic する fail-stop）。
// - PD エントリには最大権限 (WRITE | USER) を与え、ページ単位の制限は
//   PT エントリ側に置く。
// - 自分のアドレス空間は recursive 窓で編集できるが、他人の PD を初期化する
//   ときだけ layout::TMP に一時マップする。
//
// 重要（ALLOCATED の意味）:
// - PRESENT は「CPU から見えるか」、ALLOCATED は「このエントリがフレームを
//   所有しているか」。明示的な物理アドレス指定の map は所有権を呼び出し側に
//   残すので ALLOCATED を立てない。

#![allow(dead_code)]

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch::{cpu, isr};
use crate::kernel::thread;
use crate::logging;
use crate::mem::layout;
use crate::mm;
use crate::types::{
    page_base, pd_index, pt_index, PhysAddr, VirtAddr, ENTRY_COUNT, PAGE_SIZE, PD_ENTRY_SIZE,
};

bitflags::bitflags! {
    /// PD / PT エントリの属性ビット。
    ///
    /// - PRESENT / WRITE / USER / HUGE / GLOBAL はハードウェア定義
    /// - ALLOCATED (bit 9) はソフトウェア用ビットで、
    ///   「このエントリはフレームを所有しており、unmap 時に返却する」の印
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EntryFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
        const HUGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const ALLOCATED = 1 << 9;
    }
}

/// カーネル PD の物理アドレス（process 0 が使う）。
static KERNEL_PD: AtomicU32 = AtomicU32::new(0);

pub fn kernel_page_directory() -> PhysAddr {
    KERNEL_PD.load(Ordering::Relaxed)
}

// -----------------------------------------------------------------------------
// recursive 窓のアクセサ
// -----------------------------------------------------------------------------

#[inline]
unsafe fn pd_entry(index: usize) -> *mut u32 {
    (layout::PD as usize as *mut u32).add(index)
}

#[inline]
unsafe fn pt_entry(pd: usize, pt: usize) -> *mut u32 {
    (layout::PTS as usize as *mut u32).add(pd * ENTRY_COUNT + pt)
}

/// PT が self-map 窓に現れる仮想アドレス（その PT 全体の先頭）。
#[inline]
fn pt_window_page(pd: usize) -> VirtAddr {
    layout::PTS + (pd as u32) * PAGE_SIZE
}

fn entry_flags(entry: u32) -> EntryFlags {
    EntryFlags::from_bits_truncate(entry)
}

// -----------------------------------------------------------------------------
// 変換
// -----------------------------------------------------------------------------

/// 仮想アドレスに対応する物理フレーム先頭を返す。
/// PD エントリが空なら None。PT エントリの PRESENT は確認しないので、
/// 意味的に必要なら呼び出し側で確認すること。
pub fn virtual_to_physical(virt: VirtAddr) -> Option<PhysAddr> {
    unsafe {
        if *pd_entry(pd_index(virt)) == 0 {
            return None;
        }
        Some(page_base(*pt_entry(pd_index(virt), pt_index(virt))))
    }
}

// -----------------------------------------------------------------------------
// map / unmap
// -----------------------------------------------------------------------------

/// 1 ページをマップする。
///
/// - phys = Some(p): p を指す明示マップ。フレームの所有権は呼び出し側に残る。
/// - phys = None: VMM がフレームを用意する。既存エントリが ALLOCATED なら
///   そのフレームを使い回し（属性変更のための再 map）、無ければ新規に確保する。
pub fn map(virt: VirtAddr, phys: Option<PhysAddr>, flags: EntryFlags) {
    assert!(
        virt >= layout::IDENTITY_END,
        "map: identity-mapped region is immutable"
    );

    let pd = pd_index(virt);
    let pt = pt_index(virt);

    unsafe {
        if *pd_entry(pd) == 0 {
            // PT が無いので 1 枚確保して PD に差す。
            // PD 側は最大権限にしておき、制限は PT エントリで表現する。
            let pt_frame = mm::allocate();
            *pd_entry(pd) = pt_frame
                | (flags | EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::USER).bits();

            // self-map 窓に現れた新 PT 自身の TLB を無効化してから全体をゼロにする
            let window = pt_window_page(pd);
            cpu::invlpg(window);
            core::ptr::write_bytes(window as usize as *mut u8, 0, PAGE_SIZE as usize);
        }

        let entry = pt_entry(pd, pt);
        match phys {
            Some(phys) => {
                if entry_flags(*entry).contains(EntryFlags::ALLOCATED) {
                    // 所有フレームを上書きするので先に返却する
                    mm::free(page_base(*entry));
                }
                *entry = page_base(phys) | (flags | EntryFlags::PRESENT).bits();
            }
            None => {
                if entry_flags(*entry).contains(EntryFlags::ALLOCATED) {
                    // 既に所有しているフレームを属性だけ変えて使い回す
                    *entry = page_base(*entry)
                        | (flags | EntryFlags::PRESENT | EntryFlags::ALLOCATED).bits();
                } else {
                    *entry = mm::allocate()
                        | (flags | EntryFlags::PRESENT | EntryFlags::ALLOCATED).bits();
                }
            }
        }

        cpu::invlpg(virt);
    }
}

/// 1 ページをアンマップする。ALLOCATED なフレームはここで返却する。
/// 空の PT は回収しない（destroyAddressSpace 側で空間ごと畳む）。
pub fn unmap(virt: VirtAddr) {
    assert!(
        virt >= layout::IDENTITY_END,
        "unmap: identity-mapped region is immutable"
    );

    let pd = pd_index(virt);
    let pt = pt_index(virt);

    unsafe {
        if *pd_entry(pd) == 0 {
            return;
        }

        let entry = pt_entry(pd, pt);
        if entry_flags(*entry).contains(EntryFlags::ALLOCATED) {
            mm::free(page_base(*entry));
        }
        *entry = 0;

        cpu::invlpg(virt);
    }
}

/// [virt, virt + size) を PAGE_SIZE 刻みでマップする。
/// phys = Some(p) のときは物理側も同じ歩幅で進める。size = 0 なら何もしない。
pub fn map_zone(virt: VirtAddr, phys: Option<PhysAddr>, size: u32, flags: EntryFlags) {
    let mut offset = 0;
    while offset < size {
        map(virt + offset, phys.map(|p| p + offset), flags);
        offset += PAGE_SIZE;
    }
}

/// [virt, virt + size) を PAGE_SIZE 刻みでアンマップする。
pub fn unmap_zone(virt: VirtAddr, size: u32) {
    let mut offset = 0;
    while offset < size {
        unmap(virt + offset);
        offset += PAGE_SIZE;
    }
}

// -----------------------------------------------------------------------------
// アドレス空間
// -----------------------------------------------------------------------------

/// 新しいアドレス空間（PD）を作り、その物理アドレスを返す。
///
/// - カーネル領域の PD エントリは「作成時点の」アクティブ PD から値コピーする。
///   以後のカーネル側の新規マッピングは伝播しないので、カーネルのマッピングは
///   ユーザ空間が生まれる前に張り終えていること。
/// - エントリ 1023 は新 PD 自身への recursive self-map。CR3 がこの PD を
///   指したときに初めて効く。
pub fn create_address_space() -> PhysAddr {
    let pd_phys = mm::allocate();

    // 他人の PD は recursive 窓から見えないので TMP に張って初期化する
    map(layout::TMP, Some(pd_phys), EntryFlags::WRITE);

    unsafe {
        let new_pd = layout::TMP as usize as *mut u32;
        core::ptr::write_bytes(new_pd as *mut u8, 0, PAGE_SIZE as usize);

        for i in 0..pd_index(layout::USER) {
            *new_pd.add(i) = *pd_entry(i);
        }

        *new_pd.add(ENTRY_COUNT - 1) =
            pd_phys | (EntryFlags::PRESENT | EntryFlags::WRITE).bits();
    }

    logging::info_hex("paging: created address space, pd", pd_phys);
    pd_phys
}

/// 現在アクティブなアドレス空間のユーザ領域を畳む。
///
/// エントリ 1023 (self-map) は残す。アクティブなまま self-map を壊すと
/// 以後のテーブル編集が全部吹き飛ぶ。
// TODO: PD 本体と空になった PT のフレームを返却する（プロセス終了パスの整備とセットで）
pub fn destroy_address_space() {
    for i in pd_index(layout::USER)..(ENTRY_COUNT - 1) {
        if unsafe { *pd_entry(i) } != 0 {
            unmap_zone((i as u32) << crate::types::PD_ENTRY_SHIFT, PD_ENTRY_SIZE);
        }
    }
    logging::info("paging: destroyed address space (user range)");
}

// -----------------------------------------------------------------------------
// #PF
// -----------------------------------------------------------------------------

/// page fault ハンドラ（vector 14）。
///
/// - CR2 が THREAD_DESTROY 番兵なら協調的なスレッド終了として扱う
/// - それ以外はエラーコードを分解してログし、fail-stop
fn page_fault(context: &mut isr::Context) {
    let addr = cpu::read_cr2();

    if addr == layout::THREAD_DESTROY {
        thread::destroy_current();
        return;
    }

    let err = context.err_code;
    logging::error("unhandled page fault");
    logging::info_hex("fault_addr", addr);
    logging::info_hex("error_code", err);
    logging::info(if err & 1 != 0 {
        "cause = protection violation"
    } else {
        "cause = non-present page"
    });
    logging::info(if err & 2 != 0 {
        "access = write"
    } else {
        "access = read"
    });
    logging::info(if err & 4 != 0 {
        "mode = user"
    } else {
        "mode = kernel"
    });
    logging::info_hex("eip", context.eip);

    panic!("unhandled page fault");
}

// -----------------------------------------------------------------------------
// init
// -----------------------------------------------------------------------------

/// カーネル PD を作ってページングを有効化する。
///
/// - 先頭 8MiB を 4MiB global page ×2 で identity map する
/// - エントリ 1023 に recursive self-map を張る
/// - #PF ハンドラを登録する
pub fn init() {
    logging::info("arch::paging::init: start");

    // フレームスタックは identity map の内側に収まっていなければならない
    assert!(
        mm::stack_end() <= layout::IDENTITY_END,
        "frame stack does not fit below the identity-mapped region"
    );

    let pd_phys = mm::allocate();

    unsafe {
        // ページング有効化前は phys == virt なので直接書ける
        let pd = pd_phys as usize as *mut u32;
        core::ptr::write_bytes(pd as *mut u8, 0, PAGE_SIZE as usize);

        let identity =
            EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::HUGE | EntryFlags::GLOBAL;
        *pd.add(0) = 0x0000_0000 | identity.bits();
        *pd.add(1) = PD_ENTRY_SIZE | identity.bits();

        *pd.add(ENTRY_COUNT - 1) = pd_phys | (EntryFlags::PRESENT | EntryFlags::WRITE).bits();
    }

    isr::register(isr::VECTOR_PAGE_FAULT, page_fault);
    KERNEL_PD.store(pd_phys, Ordering::Relaxed);

    unsafe {
        cpu::setup_paging(pd_phys);
    }

    logging::info_hex("kernel_pd", pd_phys);
    logging::info("arch::paging::init: done");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_is_a_software_bit() {
        // bit 9-11 はハードウェアが無視するソフトウェア用ビット
        assert_eq!(EntryFlags::ALLOCATED.bits(), 1 << 9);
        assert!(EntryFlags::ALLOCATED.bits() & 0xE00 != 0);
        // ハードウェアビットとは重ならない
        let hw = EntryFlags::PRESENT
            | EntryFlags::WRITE
            | EntryFlags::USER
            | EntryFlags::HUGE
            | EntryFlags::GLOBAL;
        assert_eq!(hw.bits() & EntryFlags::ALLOCATED.bits(), 0);
    }

    #[test]
    fn frame_and_flags_do_not_overlap() {
        let entry = page_base(0x0123_4000)
            | (EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::ALLOCATED).bits();
        assert_eq!(page_base(entry), 0x0123_4000);
        assert!(entry_flags(entry).contains(EntryFlags::ALLOCATED));
        assert!(entry_flags(entry).contains(EntryFlags::PRESENT));
        assert!(!entry_flags(entry).contains(EntryFlags::USER));
    }

    #[test]
    fn identity_region_is_two_huge_pages() {
        assert_eq!(layout::IDENTITY_END, 2 * PD_ENTRY_SIZE);
        assert_eq!(pd_index(layout::IDENTITY_END), 2);
    }

    #[test]
    fn pt_window_addresses() {
        assert_eq!(pt_window_page(0), layout::PTS);
        assert_eq!(pt_window_page(1023), layout::PD);
    }

    // identity 領域の検査はテーブルに触る前に行われるのでホストでも安全
    #[test]
    #[should_panic(expected = "identity-mapped region is immutable")]
    fn map_below_identity_region_asserts() {
        map(layout::IDENTITY_END - PAGE_SIZE, None, EntryFlags::WRITE);
    }

    #[test]
    #[should_panic(expected = "identity-mapped region is immutable")]
    fn unmap_below_identity_region_asserts() {
        unmap(0);
    }

    #[test]
    fn map_zone_of_zero_size_is_a_no_op() {
        // size = 0 なら 1 ページも触らない
        map_zone(layout::USER, None, 0, EntryFlags::WRITE);
        unmap_zone(layout::USER, 0);
    }
}
