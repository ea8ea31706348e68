// src/logging/mod.rs
//
// 役割:
// - serial(COM1) と VGA の両方へ流す最小ログ基盤。
// - info / error / info_hex の 3 つだけを上位へ公開する。
//
// 設計方針:
// - フォーマット機構には頼らず、16進表示は自前で行う（panic 経路でも確実に出す）。
// - 未初期化のまま呼ばれても落ちない（各シンク側で黙って捨てる）。

mod serial;
mod vga;

pub use serial::SerialWriter;

pub fn init() {
    serial::init();
    vga::init();
}

pub fn info(msg: &str) {
    serial::write_str("[INFO] ");
    serial::write_line(msg);
    vga::write_line(msg);
}

pub fn error(msg: &str) {
    serial::write_str("[ERROR] ");
    serial::write_line(msg);
    vga::write_line(msg);
}

/// `label = 0x????????` 形式の 1 行を出す。アドレスや生エントリの観測用。
pub fn info_hex(label: &str, value: u32) {
    let mut buf = [0u8; 10];
    let hex = format_hex(value, &mut buf);

    serial::write_str("[INFO] ");
    serial::write_str(label);
    serial::write_str(" = ");
    serial::write_line(hex);

    vga::write_str(label);
    vga::write_str(" = ");
    vga::write_line(hex);
}

/// u32 を "0x" 付き 8 桁で buf に書き、&str を返す。
fn format_hex(value: u32, buf: &mut [u8; 10]) -> &str {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    buf[0] = b'0';
    buf[1] = b'x';
    for i in 0..8 {
        let nibble = (value >> ((7 - i) * 4)) & 0xF;
        buf[2 + i] = DIGITS[nibble as usize];
    }
    // buf は ASCII しか入らない
    unsafe { core::str::from_utf8_unchecked(&buf[..]) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formatting() {
        let mut buf = [0u8; 10];
        assert_eq!(format_hex(0, &mut buf), "0x00000000");
        let mut buf = [0u8; 10];
        assert_eq!(format_hex(0xDEAD_B000, &mut buf), "0xdeadb000");
        let mut buf = [0u8; 10];
        assert_eq!(format_hex(0xFFFF_F000, &mut buf), "0xfffff000");
    }
}
