//! DeviceSQL string decoding
//!
//! Strings in the database come in three formats, selected by the first
//! byte:
//! - Short ASCII (flag LSB=1): total length packed into the flag byte
//! - Long ASCII (0x40): u16 length header + ASCII data
//! - UTF-16LE (0x90): u16 length header + UTF-16LE data
//!
//! Reference: https://djl-analysis.deepsymmetry.org/rekordbox-export-analysis/exports.html

use crate::bytes::ByteView;

/// Flag byte values
const FLAG_LONG_ASCII: u8 = 0x40;
const FLAG_UTF16LE: u8 = 0x90;

/// Decode the device string at `offset`, reading `""` for anything
/// malformed. Strings are usually the trailing field of a record and a
/// corrupt one must not taint the rest of the row.
pub fn decode_string(view: &ByteView<'_>, offset: usize) -> String {
    try_decode_string(view, offset).unwrap_or_default()
}

fn try_decode_string(view: &ByteView<'_>, offset: usize) -> Option<String> {
    let flag = view.u8_at(offset).ok()?;

    if flag & 0x01 != 0 {
        // Short ASCII: the flag byte holds the total length, itself included.
        let total_len = (flag >> 1) as usize;
        if total_len < 1 {
            return None;
        }
        let data = view.slice(offset + 1, total_len - 1).ok()?;
        return Some(String::from_utf8_lossy(data).into_owned());
    }

    match flag {
        FLAG_LONG_ASCII => {
            let data = long_form_payload(view, offset)?;
            Some(String::from_utf8_lossy(data).into_owned())
        }
        FLAG_UTF16LE => {
            let data = long_form_payload(view, offset)?;
            Some(decode_utf16le(data))
        }
        _ => None,
    }
}

/// Long forms: `[flag, len_lo, len_hi, pad, ...data...]` where the u16
/// length counts the 4 header bytes.
fn long_form_payload<'a>(view: &ByteView<'a>, offset: usize) -> Option<&'a [u8]> {
    let total_len = view.u16le_at(offset + 1).ok()? as usize;
    if total_len < 4 {
        return None;
    }
    view.slice(offset + 4, total_len - 4).ok()
}

/// An odd byte count loses its trailing half code unit.
fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
