/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::IcapLineParseError;

mod header_line;
pub(crate) use header_line::HeaderLine;

mod status_line;
pub(crate) use status_line::StatusLine;

mod chunked_line;
pub(crate) use chunked_line::ChunkedLine;

mod encapsulated;
pub use encapsulated::{EncapsulatedSection, IcapEncapsulated};

/// Length of the head block at the start of `buf`, including the empty line.
pub(crate) fn head_block_len(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while let Some(p) = memchr::memchr(b'\n', &buf[offset..]) {
        let line = &buf[offset..offset + p];
        offset += p + 1;
        if line.is_empty() || line == b"\r" {
            return Some(offset);
        }
    }
    None
}

/// Non-empty lines of a complete head block, without line endings.
pub(crate) struct HeadLines<'a> {
    buf: &'a [u8],
}

impl<'a> HeadLines<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        HeadLines { buf }
    }
}

impl<'a> Iterator for HeadLines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let p = memchr::memchr(b'\n', self.buf)?;
        let mut line = &self.buf[..p];
        self.buf = &self.buf[p + 1..];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        if line.is_empty() { None } else { Some(line) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_len() {
        assert_eq!(head_block_len(b"A\r\nB: c\r\n\r\nbody"), Some(11));
        assert_eq!(head_block_len(b"A\nB: c\n\nbody"), Some(8));
        assert_eq!(head_block_len(b"A\r\nB: c\r\n"), None);
    }

    #[test]
    fn lines() {
        let lines: Vec<&[u8]> = HeadLines::new(b"A\r\nB: c\n\r\n").collect();
        assert_eq!(lines, vec![b"A".as_slice(), b"B: c".as_slice()]);
    }
}
