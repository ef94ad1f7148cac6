//! Hex dump lines for `--hexdump` output.

/// Bytes shown per line.
const BYTES_PER_LINE: usize = 16;

/// Dump `data` the way mysqlbinlog does below an event header:
///
/// ```text
/// 00000017 05 00 00 00 00 00 00 00  74 65 73 74 00 |........test.|
/// ```
///
/// `base_offset` is the log position of `data[0]`. Lines carry no comment
/// prefix and no trailing newline.
pub fn hex_dump(data: &[u8], base_offset: u64) -> String {
    data.chunks(BYTES_PER_LINE)
        .enumerate()
        .map(|(i, chunk)| {
            let mut hex = String::with_capacity(3 * BYTES_PER_LINE + 1);
            for (j, byte) in chunk.iter().enumerate() {
                if j == 8 {
                    hex.push(' ');
                }
                hex.push_str(&format!("{:02x} ", byte));
            }
            let ascii: String = chunk
                .iter()
                .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                .collect();
            format!(
                "{:08x} {:<49}|{}|",
                base_offset + (i * BYTES_PER_LINE) as u64,
                hex,
                ascii
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_and_partial_lines() {
        let data: Vec<u8> = (0x41..0x41 + 20).collect();
        let dump = hex_dump(&data, 0x13);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000013 41 42 43 44 45 46 47 48  49 4a"));
        assert!(lines[0].ends_with("|ABCDEFGHIJKLMNOP|"));
        assert!(lines[1].starts_with("00000023 51 52 53 54 "));
        assert!(lines[1].ends_with("|QRST|"));
        // The ASCII column lines up whatever the line length.
        assert_eq!(lines[0].find('|'), lines[1].find('|'));
    }

    #[test]
    fn test_nonprintable_bytes() {
        assert!(hex_dump(&[0x00, 0x7f, 0xff, b' '], 0).ends_with("|... |"));
        assert_eq!(hex_dump(&[], 0), "");
    }
}
