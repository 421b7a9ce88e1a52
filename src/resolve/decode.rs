//! Decoder for the obfuscated `video_url` field returned by the metadata site.
//!
//! The value is base64 over a substituted alphabet (five uppercase letters
//! are their Cyrillic look-alikes, `+/=` become `.,~`), percent-escaped
//! underneath.
//!
//! Two behaviours are fixed here and covered by tests:
//! - Latin `A B C E M` decode exactly like their Cyrillic counterparts, so a
//!   locator passed through a transliterating proxy still decodes.
//! - Percent escapes decode as UTF-8. A `%` without two hex digits after it
//!   is kept as is; escapes that do not form UTF-8 reject the locator.

use crate::error::{Error, Result};

const ALPHABET: &str = "АВСDЕFGHIJKLМNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789.,~";

/// Index of the padding symbol.
const PAD: u32 = 64;

fn symbol_index(c: char) -> Option<u32> {
    // Latin look-alikes map onto the Cyrillic letters of the alphabet.
    let c = match c {
        'A' => 'А',
        'B' => 'В',
        'C' => 'С',
        'E' => 'Е',
        'M' => 'М',
        c => c,
    };
    ALPHABET.chars().position(|a| a == c).map(|p| p as u32)
}

/// Decode an obfuscated locator into a site-relative path.
pub fn decode_video_url(encoded: &str) -> Result<String> {
    let symbols: Vec<u32> = encoded.chars().filter_map(symbol_index).collect();
    if symbols.is_empty() {
        return Err(Error::UnresolvableSource("empty video locator".into()));
    }

    let mut bytes = Vec::with_capacity(symbols.len() / 4 * 3 + 3);
    for group in symbols.chunks(4) {
        // Symbols past the end count as index 0.
        let at = |i: usize| group.get(i).copied().unwrap_or(0);
        let (a, b, c, d) = (at(0), at(1), at(2), at(3));

        bytes.push((((a << 2) | (b >> 4)) & 0xff) as u8);
        if c != PAD {
            bytes.push((((b & 15) << 4) | (c >> 2)) as u8);
        }
        if d != PAD {
            bytes.push((((c & 3) << 6) | d) as u8);
        }
    }

    let escaped = String::from_utf8(bytes)
        .map_err(|_| Error::UnresolvableSource("video locator is not valid text".into()))?;
    let path = urlencoding::decode(&escaped)
        .map_err(|e| Error::UnresolvableSource(format!("bad escape in video locator: {}", e)))?;

    Ok(path.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sample() {
        let encoded = "L2dldF9maWxlLzЕvМGЕxYjJjLzЕyМzАwМС8xМjМ0NTYvМTIzNDU2Lm1wNС8~";
        assert_eq!(
            decode_video_url(encoded).unwrap(),
            "/get_file/1/0a1b2c/123000/123456/123456.mp4/"
        );
    }

    #[test]
    fn test_percent_unescape() {
        assert_eq!(
            decode_video_url("L2dldF9maWxlLzМveСUyМHkubXА0").unwrap(),
            "/get_file/3/x y.mp4"
        );
    }

    #[test]
    fn test_foreign_characters_dropped() {
        let encoded = "L2dl dF9m\naWxl LzМveСUyМHkubXА0!";
        assert_eq!(decode_video_url(encoded).unwrap(), "/get_file/3/x y.mp4");
    }

    #[test]
    fn test_latin_lookalikes() {
        let encoded = "L2dldF9maWxlLzMveCUyMHkubXA0";
        assert_eq!(decode_video_url(encoded).unwrap(), "/get_file/3/x y.mp4");
    }

    #[test]
    fn test_lookalike_mapping_is_exactly_five_letters() {
        for (latin, cyrillic) in [('A', 'А'), ('B', 'В'), ('C', 'С'), ('E', 'Е'), ('M', 'М')] {
            assert_eq!(symbol_index(latin), symbol_index(cyrillic));
            assert!(symbol_index(latin).is_some());
        }
        // Other Cyrillic letters are not part of the alphabet.
        assert_eq!(symbol_index('Д'), None);
        assert_eq!(symbol_index('D'), Some(3));
    }

    #[test]
    fn test_escapes_decode_as_utf8() {
        assert_eq!(decode_video_url("L3YvJUQwJUIwLm1wNA~~").unwrap(), "/v/а.mp4");
    }

    #[test]
    fn test_lone_percent_is_kept() {
        assert_eq!(decode_video_url("L3YvMTAwJS5tcDQ~").unwrap(), "/v/100%.mp4");
    }

    #[test]
    fn test_escape_outside_utf8_is_rejected() {
        let err = decode_video_url("L3YvJUZGLm1wNA~~").unwrap_err();
        assert!(matches!(err, Error::UnresolvableSource(_)));
    }

    #[test]
    fn test_empty() {
        assert!(decode_video_url("!!!").is_err());
    }
}
