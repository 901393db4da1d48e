//! Modified UTF-8 as used by `CONSTANT_Utf8` entries
//!
//! Differs from standard UTF-8 in two ways: NUL is encoded as `C0 80`, and
//! supplementary characters are encoded as a surrogate pair of 3-byte
//! sequences.

use crate::error::ClassError;
use std::borrow::Cow;

/// Decode modified UTF-8 into a Rust string
///
/// # Errors
/// Returns [`ClassError::BadUtf8`] on truncated or overlong sequences and on
/// unpaired surrogates, which have no `String` representation.
pub fn decode(bytes: &[u8]) -> Result<String, ClassError> {
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if b != 0 && b < 0x80 {
            out.push(char::from(b));
            i += 1;
            continue;
        }

        let unit = decode_unit(bytes, i)?;
        i += unit.1;
        let code = unit.0;

        if (0xD800..0xDC00).contains(&code) {
            let low = if i < bytes.len() {
                decode_unit(bytes, i).ok()
            } else {
                None
            };
            match low {
                Some((low, len)) if (0xDC00..0xE000).contains(&low) => {
                    let scalar = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                    out.push(char::from_u32(scalar).ok_or_else(|| bad(i))?);
                    i += len;
                }
                _ => return Err(ClassError::BadUtf8(format!("unpaired surrogate before byte {i}"))),
            }
        } else if (0xDC00..0xE000).contains(&code) {
            return Err(ClassError::BadUtf8(format!("unpaired surrogate before byte {i}")));
        } else {
            out.push(char::from_u32(code).ok_or_else(|| bad(i))?);
        }
    }

    Ok(out)
}

/// Decode one 2- or 3-byte sequence starting at `i`, returning the UTF-16
/// code unit and the sequence length.
fn decode_unit(bytes: &[u8], i: usize) -> Result<(u32, usize), ClassError> {
    let b = bytes[i];
    let cont = |k: usize| -> Result<u32, ClassError> {
        match bytes.get(i + k) {
            Some(&c) if c & 0xC0 == 0x80 => Ok(u32::from(c & 0x3F)),
            _ => Err(bad(i)),
        }
    };

    match b {
        0xC0..=0xDF => {
            let code = (u32::from(b & 0x1F) << 6) | cont(1)?;
            // only C0 80 may encode a code point below 0x80
            if code != 0 && code < 0x80 {
                return Err(bad(i));
            }
            Ok((code, 2))
        }
        0xE0..=0xEF => {
            let code = (u32::from(b & 0x0F) << 12) | (cont(1)? << 6) | cont(2)?;
            if code < 0x800 {
                return Err(bad(i));
            }
            Ok((code, 3))
        }
        _ => Err(bad(i)),
    }
}

fn bad(at: usize) -> ClassError {
    ClassError::BadUtf8(format!("invalid sequence at byte {at}"))
}

/// Encode a string as modified UTF-8
///
/// Plain ASCII without NUL is returned borrowed.
#[must_use]
pub fn encode(s: &str) -> Cow<'_, [u8]> {
    if s.bytes().all(|b| b != 0 && b < 0x80) {
        return Cow::Borrowed(s.as_bytes());
    }

    let mut out = Vec::with_capacity(s.len() + 8);
    for ch in s.chars() {
        let code = u32::from(ch);
        match code {
            0 => out.extend_from_slice(&[0xC0, 0x80]),
            0x01..=0x7F => out.push(code as u8),
            0x80..=0x7FF => push_two(&mut out, code),
            0x800..=0xFFFF => push_three(&mut out, code),
            _ => {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    push_three(&mut out, u32::from(*unit));
                }
            }
        }
    }
    Cow::Owned(out)
}

#[allow(clippy::cast_possible_truncation)]
fn push_two(out: &mut Vec<u8>, code: u32) {
    out.push(0xC0 | (code >> 6) as u8);
    out.push(0x80 | (code & 0x3F) as u8);
}

#[allow(clippy::cast_possible_truncation)]
fn push_three(out: &mut Vec<u8>, code: u32) {
    out.push(0xE0 | (code >> 12) as u8);
    out.push(0x80 | ((code >> 6) & 0x3F) as u8);
    out.push(0x80 | (code & 0x3F) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ascii_is_borrowed() {
        assert!(matches!(encode("java/lang/Object"), Cow::Borrowed(_)));
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b").as_ref(), &[b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xC0, 0x80, b'b']).unwrap(), "a\0b");
    }

    #[test]
    fn supplementary_uses_surrogate_pair() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded.len(), 6);
        assert_eq!(decode(&encoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn raw_nul_rejected() {
        assert!(decode(&[0x00]).is_err());
    }

    #[test]
    fn lone_surrogate_rejected() {
        // ED A0 80 = U+D800
        assert!(decode(&[0xED, 0xA0, 0x80]).is_err());
    }

    proptest! {
        #[test]
        fn any_string_survives(s in "\\PC*") {
            let encoded = encode(&s);
            prop_assert!(!encoded.contains(&0));
            prop_assert_eq!(decode(&encoded).unwrap(), s);
        }
    }
}
