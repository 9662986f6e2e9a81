use std::fmt::Write;

/// Bytes per rendered row.
pub const ROW_LEN: usize = 16;

/// Render `bytes` as classic hexdump rows, numbering from `base`:
/// `00000010  de ad be ef ...  ....`
pub fn hexdump(bytes: &[u8], base: usize) -> String {
    let mut out = String::new();
    for (i, row) in bytes.chunks(ROW_LEN).enumerate() {
        let hex = row
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ");
        let printable: String = row
            .iter()
            .map(|&b| {
                if b == b' ' || b.is_ascii_graphic() {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        let _ = writeln!(
            out,
            "{:08x}  {:<width$}  {}",
            base + i * ROW_LEN,
            hex,
            printable,
            width = ROW_LEN * 3
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_row() {
        let dump = hexdump(b"ABC\x00", 0x20);
        assert!(dump.starts_with("00000020  41 42 43 00"));
        assert!(dump.trim_end().ends_with("ABC."));
    }

    #[test]
    fn test_rows_are_numbered_from_base() {
        let bytes: Vec<u8> = (0u8..40).collect();
        let dump = hexdump(&bytes, 0x1000);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("00001010  10 11"));
        assert!(lines[2].starts_with("00001020  20 21"));
    }

    #[test]
    fn test_short_row_is_padded() {
        let full = hexdump(&[0u8; 16], 0);
        let short = hexdump(&[0u8; 2], 0);
        // The printable column starts at the same position.
        let col = |s: &str| s.rfind("  ").unwrap();
        assert_eq!(col(full.lines().next().unwrap()), col(short.lines().next().unwrap()));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(hexdump(&[], 0), "");
    }
}
