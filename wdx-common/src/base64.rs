// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Base64 codec used by the authenticator and as a general utility.
//!
//! Encoding offers the standard alphabet (`+`, `/`, padded with `=`) and the
//! URL-safe alphabet (`-`, `_`, unpadded). Decoding is deliberately tolerant:
//! it accepts either alphabet, even mixed within one input, and stops at the
//! first `=` sign.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use thiserror::Error;

/// Inputs longer than this cannot be encoded without the output length
/// calculation overflowing.
pub const MAX_ENCODE_INPUT_LEN: usize = usize::MAX / 4 * 3;

/// Inputs longer than this cannot be decoded without the padding-rounded
/// length calculation overflowing.
pub const MAX_DECODE_INPUT_LEN: usize = usize::MAX - 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Base64Error {
    #[error("input of {0} bytes exceeds the maximum codec input length")]
    InputTooLong(usize),
    #[error("invalid base64 input: {0}")]
    InvalidInput(String),
}

/// Encodes `data` with the standard alphabet, padded to a multiple of four.
pub fn encode(data: &[u8]) -> Result<String, Base64Error> {
    if data.len() > MAX_ENCODE_INPUT_LEN {
        return Err(Base64Error::InputTooLong(data.len()));
    }
    Ok(STANDARD.encode(data))
}

/// Encodes `data` with the URL-safe alphabet. No padding is emitted.
pub fn encode_url_safe(data: &[u8]) -> Result<String, Base64Error> {
    if data.len() > MAX_ENCODE_INPUT_LEN {
        return Err(Base64Error::InputTooLong(data.len()));
    }
    Ok(URL_SAFE_NO_PAD.encode(data))
}

/// Decodes `input`, accepting both alphabets (even mixed) and treating the
/// first `=` as the end of the payload.
pub fn decode(input: &str) -> Result<Vec<u8>, Base64Error> {
    if input.len() > MAX_DECODE_INPUT_LEN {
        return Err(Base64Error::InputTooLong(input.len()));
    }

    // Normalize to the standard alphabet so a single engine can decode
    // either form. Decoding terminates at the first padding sign.
    let payload = match input.find('=') {
        Some(end) => &input[..end],
        None => input,
    };
    let normalized: String = payload
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    STANDARD_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| Base64Error::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STANDARD_ALPHABET: &str =
        "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    const URL_SAFE_ALPHABET: &str =
        "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

    #[test]
    fn encodes_with_padding() {
        assert_eq!(encode(b"f").unwrap(), "Zg==");
        assert_eq!(encode(b"fo").unwrap(), "Zm8=");
        assert_eq!(encode(b"foo").unwrap(), "Zm9v");
        assert_eq!(encode(b"foobar").unwrap(), "Zm9vYmFy");
    }

    #[test]
    fn url_safe_encoding_is_unpadded() {
        assert_eq!(encode_url_safe(b"f").unwrap(), "Zg");
        assert_eq!(encode_url_safe(b"fo").unwrap(), "Zm8");
        assert_eq!(encode_url_safe(&[0xfb, 0xef, 0xff]).unwrap(), "--__");
    }

    #[test]
    fn decodes_either_alphabet() {
        assert_eq!(decode("Zm9vYmFy").unwrap(), b"foobar");
        assert_eq!(decode(&encode(&[0xfb, 0xef, 0xff]).unwrap()).unwrap(), [0xfb, 0xef, 0xff]);
        assert_eq!(decode("--__").unwrap(), [0xfb, 0xef, 0xff]);
        // Mixed input is tolerated.
        assert_eq!(decode("-+_/").unwrap(), decode("++//").unwrap());
    }

    #[test]
    fn decode_stops_at_first_padding_sign() {
        assert_eq!(decode("Zm8=").unwrap(), b"fo");
        assert_eq!(decode("Zg==").unwrap(), b"f");
        // Everything after the first `=` is ignored, whatever it is.
        assert_eq!(decode("Zg==Zm9v").unwrap(), b"f");
    }

    #[test]
    fn rejects_invalid_symbols() {
        assert!(matches!(decode("Zm9 v"), Err(Base64Error::InvalidInput(_))));
        assert!(matches!(decode("!!"), Err(Base64Error::InvalidInput(_))));
    }

    #[test]
    fn empty_round_trip() {
        assert_eq!(encode(b"").unwrap(), "");
        assert_eq!(decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn alphabet_boundary_bijection() {
        // The 48-byte sequence whose encoding enumerates the full alphabet.
        let bytes = decode(STANDARD_ALPHABET).unwrap();
        assert_eq!(bytes.len(), 48);
        assert_eq!(encode(&bytes).unwrap(), STANDARD_ALPHABET);
        assert_eq!(encode_url_safe(&bytes).unwrap(), URL_SAFE_ALPHABET);
        assert_eq!(decode(URL_SAFE_ALPHABET).unwrap(), bytes);
    }

    #[test]
    fn round_trips_arbitrary_sequences() {
        // Deterministic pseudo-random coverage across lengths 0..=257,
        // exercising every padding remainder.
        let mut state: u32 = 0x2545_f491;
        for len in 0..=257usize {
            let mut data = Vec::with_capacity(len);
            for _ in 0..len {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                data.push((state >> 16) as u8);
            }
            assert_eq!(decode(&encode(&data).unwrap()).unwrap(), data);
            assert_eq!(decode(&encode_url_safe(&data).unwrap()).unwrap(), data);
        }
    }
}
