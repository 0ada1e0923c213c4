// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Binary portable pixmap (P6) decoding.

use thiserror::Error;

/// Reasons a P6 image is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PpmError {
    /// The data does not start with `P6`.
    #[error("not a binary portable pixmap")]
    BadMagic,
    /// A header field is missing or not a decimal number.
    #[error("malformed header")]
    BadHeader,
    /// Zero width or height.
    #[error("empty image")]
    Empty,
    /// Maximum channel value outside `1..=255`.
    #[error("unsupported maxval {0}")]
    Maxval(u32),
    /// Fewer pixel bytes than the header promises.
    #[error("truncated pixel data")]
    Truncated,
}

/// Parsed header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpmHeader {
    /// Image width.
    pub width: usize,
    /// Image height.
    pub height: usize,
    /// Value representing full channel intensity.
    pub maxval: u32,
    /// Offset of the first pixel byte.
    pub data_offset: usize,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn skip_space(&mut self) {
        while let Some(&byte) = self.data.get(self.pos) {
            match byte {
                b'#' => {
                    while self.data.get(self.pos).is_some_and(|&b| b != b'\n') {
                        self.pos += 1;
                    }
                }
                b' ' | b'\t' | b'\r' | b'\n' => self.pos += 1,
                _ => break,
            }
        }
    }

    fn number(&mut self) -> Result<u32, PpmError> {
        self.skip_space();
        let start = self.pos;
        let mut value: u32 = 0;
        while let Some(digit) = self.data.get(self.pos).filter(|b| b.is_ascii_digit()) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u32::from(digit - b'0')))
                .ok_or(PpmError::BadHeader)?;
            self.pos += 1;
        }
        if self.pos == start {
            return Err(PpmError::BadHeader);
        }
        Ok(value)
    }
}

/// Parses the header and checks that the pixel data is complete.
pub fn parse_header(data: &[u8]) -> Result<PpmHeader, PpmError> {
    if !data.starts_with(b"P6") {
        return Err(PpmError::BadMagic);
    }
    let mut cursor = Cursor { data, pos: 2 };
    let width = cursor.number()? as usize;
    let height = cursor.number()? as usize;
    let maxval = cursor.number()?;
    // Exactly one whitespace byte separates the header from the pixels.
    match data.get(cursor.pos) {
        Some(b) if b.is_ascii_whitespace() => cursor.pos += 1,
        _ => return Err(PpmError::BadHeader),
    }
    if width == 0 || height == 0 {
        return Err(PpmError::Empty);
    }
    if !(1..=255).contains(&maxval) {
        return Err(PpmError::Maxval(maxval));
    }
    let needed = width.checked_mul(height).and_then(|n| n.checked_mul(3)).ok_or(PpmError::Truncated)?;
    if data.len() - cursor.pos < needed {
        return Err(PpmError::Truncated);
    }
    Ok(PpmHeader { width, height, maxval, data_offset: cursor.pos })
}

/// Calls `put(x, y, 0xRRGGBB)` for every pixel inside `max_width` x `max_height`.
pub fn draw(data: &[u8], header: &PpmHeader, max_width: usize, max_height: usize, mut put: impl FnMut(usize, usize, u32)) {
    // Samples above maxval saturate instead of spilling into the next channel.
    let scale = |v: u8| (u32::from(v) * 255 / header.maxval).min(255);
    let pixels = &data[header.data_offset..];
    for y in 0..header.height.min(max_height) {
        for x in 0..header.width.min(max_width) {
            let at = (y * header.width + x) * 3;
            let rgb = (scale(pixels[at]) << 16) | (scale(pixels[at + 1]) << 8) | scale(pixels[at + 2]);
            put(x, y, rgb);
        }
    }
}
