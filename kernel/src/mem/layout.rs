/*
役割:
- 32bit カーネルの仮想アドレスレイアウト（仕様レベル）を固定する。
- ここの定数を変えることで「OS が守るべきアドレス空間の型」を更新できる。

想定レイアウト:

  0x0000_0000 .. 0x0080_0000
    - identity map（カーネル本体・ブートデータ・フレームスタック）
    - 4MiB global page ×2。paging 層からは不変で、map/unmap は拒否する。

  0x4000_0000 .. 0xFFC0_0000
    - user 空間。プロセスごとに異なるマッピングを持つ領域。

  0xFFC0_0000 .. 0xFFFF_FFFF
    - recursive self-map 窓。PD の最終エントリが PD 自身を指すことで、
      全 PT がこの範囲に、PD 自身が最終ページに現れる。

設計方針:
- ここは定数だけに限定し、副作用を持たせない
- recursive 窓のアドレスはハードウェアの walk 規則から一意に決まる値であり、
  変更してよいのは IDENTITY_END / USER / TMP だけ
*/

use crate::types::{PhysAddr, VirtAddr};

/// identity map の終端（先頭 8MiB）。paging 層はこれ未満の map/unmap を拒否する。
pub const IDENTITY_END: VirtAddr = 0x0080_0000;

/// user 空間の開始アドレス。
pub const USER: VirtAddr = 0x4000_0000;

/// 新しい PD を初期化するときに一時的に張るスクラッチページ。
/// recursive 窓の直前の 1 ページを予約しておく。
pub const TMP: VirtAddr = 0xFFBF_F000;

/// recursive self-map により全 PT が見える窓（4MiB）。
pub const PTS: VirtAddr = 0xFFC0_0000;

/// recursive self-map により PD 自身が見えるページ。
pub const PD: VirtAddr = 0xFFFF_F000;

/// スレッド終了の合図に使う番兵アドレス。
/// user スレッドはここへ jump して #PF を起こし、ハンドラが現行スレッドを破棄する。
pub const THREAD_DESTROY: VirtAddr = 0xDEAD_B000;

/// ブートモジュールが 1 つも無いときにフレームスタックを置く下限。
/// カーネルイメージとブートデータは 4MiB 境界の下に収まっている前提。
pub const KERNEL_LOAD_END: PhysAddr = 0x0040_0000;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{pd_index, pt_index, ENTRY_COUNT};

    // recursive self-map の walk 規則との整合を固定しておく。
    #[test]
    fn recursive_window_layout() {
        assert_eq!(pd_index(PD), ENTRY_COUNT - 1);
        assert_eq!(pt_index(PD), ENTRY_COUNT - 1);
        assert_eq!(pd_index(PTS), ENTRY_COUNT - 1);
        assert_eq!(pt_index(PTS), 0);
    }

    #[test]
    fn regions_are_ordered() {
        assert!(IDENTITY_END < USER);
        assert!(USER < TMP);
        assert!(TMP < PTS);
        assert!(THREAD_DESTROY >= USER);
        assert!(THREAD_DESTROY < PTS);
    }
}
