/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix16;

use super::IcapLineParseError;

pub(crate) struct ChunkedLine<'a> {
    pub(crate) chunk_size: u64,
    pub(crate) extension: Option<&'a str>,
}

impl<'a> ChunkedLine<'a> {
    /// Parse a chunk size line, with or without its line ending.
    pub(crate) fn parse(buf: &'a [u8]) -> Result<ChunkedLine<'a>, IcapLineParseError> {
        let (chunk_size, offset) = u64::from_radix_16(buf);
        if offset == 0 {
            return Err(IcapLineParseError::InvalidChunkSize);
        }

        let left = &buf[offset..];
        match left.first() {
            None | Some(b'\r' | b'\n') => Ok(ChunkedLine {
                chunk_size,
                extension: None,
            }),
            Some(b';' | b' ' | b'\t') => {
                let extension = std::str::from_utf8(left)?
                    .trim()
                    .trim_start_matches(';')
                    .trim();
                Ok(ChunkedLine {
                    chunk_size,
                    extension: Some(extension),
                })
            }
            _ => Err(IcapLineParseError::InvalidChunkSize),
        }
    }

    pub(crate) fn ieof(&self) -> bool {
        self.extension
            .is_some_and(|e| e.split(';').any(|e| e.trim().eq_ignore_ascii_case("ieof")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        let chunk = ChunkedLine::parse(b"1F\r\n").unwrap();
        assert_eq!(chunk.chunk_size, 0x1f);
        assert!(chunk.extension.is_none());
        assert!(!chunk.ieof());
    }

    #[test]
    fn with_extension() {
        let chunk = ChunkedLine::parse(b"0; ieof\r\n").unwrap();
        assert_eq!(chunk.chunk_size, 0);
        assert_eq!(chunk.extension, Some("ieof"));
        assert!(chunk.ieof());
    }

    #[test]
    fn invalid() {
        assert!(ChunkedLine::parse(b"\r\n").is_err());
        assert!(ChunkedLine::parse(b"1x\r\n").is_err());
    }
}
