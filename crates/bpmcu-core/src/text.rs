//! Fixed-size ASCII field decoding

/// Trailing bytes stripped from MCU strings
const TRIM_BYTES: &[u8] = b"\t\n\x0b\x0c\r \xff";

/// Decode a fixed-size ASCII field read from the MCU
///
/// The field is cut at the first NUL, trailing whitespace, control bytes and
/// erased-flash `0xFF` bytes are dropped, and any remaining non-printable
/// byte is replaced with `_`.
pub fn decode_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let mut field = &raw[..end];

    while let Some((&last, rest)) = field.split_last() {
        if TRIM_BYTES.contains(&last) || last.is_ascii_control() {
            field = rest;
        } else {
            break;
        }
    }

    let mut replaced = false;
    let text: String = field
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                replaced = true;
                '_'
            }
        })
        .collect();

    if replaced {
        log::info!("String contains non-printable characters: {:?}", text);
    }
    text
}
