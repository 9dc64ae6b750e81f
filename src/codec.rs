// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Byte-range text codec.
//!
//! Maps each character to exactly one byte holding its code point, and each
//! byte back to the character with that code point (the Latin-1 range). This
//! is not UTF-8: it is only meant for payloads whose text is known to stay
//! within U+0000..=U+00FF, such as module paths and control strings crossing
//! the module boundary.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("character {ch:?} at index {index} is outside the byte range")]
    OutOfRange { ch: char, index: usize },
}

/// Encode `text` one byte per character.
///
/// Fails on the first character above U+00FF.
pub fn encode(text: &str) -> Result<Vec<u8>, CodecError> {
    text.chars()
        .enumerate()
        .map(|(index, ch)| u8::try_from(u32::from(ch)).map_err(|_| CodecError::OutOfRange { ch, index }))
        .collect()
}

/// Encode `text` keeping only the low eight bits of every code point.
///
/// Never fails; characters above U+00FF are silently mangled.
pub fn encode_truncating(text: &str) -> Vec<u8> {
    text.chars().map(|ch| u32::from(ch) as u8).collect()
}

/// Decode bytes one character per byte. `None` decodes to the empty string.
pub fn decode(bytes: Option<&[u8]>) -> String {
    bytes
        .unwrap_or_default()
        .iter()
        .map(|&b| char::from(b))
        .collect()
}
