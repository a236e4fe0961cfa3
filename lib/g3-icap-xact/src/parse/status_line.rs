/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use atoi::FromRadix10;

use super::IcapLineParseError;

pub(crate) struct StatusLine<'a> {
    pub(crate) code: u16,
    pub(crate) reason: &'a str,
}

impl<'a> StatusLine<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Result<StatusLine<'a>, IcapLineParseError> {
        const MINIMAL_LENGTH: usize = 12; // ICAP/1.0 XYZ

        if buf.len() < MINIMAL_LENGTH {
            return Err(IcapLineParseError::NotLongEnough);
        }

        let p = memchr::memchr(b' ', buf).ok_or(IcapLineParseError::NoDelimiterFound(' '))?;
        if &buf[0..p] != b"ICAP/1.0" {
            return Err(IcapLineParseError::InvalidIcapVersion);
        }

        let left = &buf[p + 1..];
        let (code, len) = u16::from_radix_10(left);
        if len != 3 {
            return Err(IcapLineParseError::InvalidStatusCode);
        }
        let reason = std::str::from_utf8(&left[len..])?.trim();

        Ok(StatusLine { code, reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal() {
        let s = StatusLine::parse(b"ICAP/1.0 204 No Content\r\n").unwrap();
        assert_eq!(s.code, 204);
        assert_eq!(s.reason, "No Content");
    }

    #[test]
    fn no_reason() {
        let s = StatusLine::parse(b"ICAP/1.0 100").unwrap();
        assert_eq!(s.code, 100);
        assert_eq!(s.reason, "");
    }

    #[test]
    fn invalid() {
        assert!(StatusLine::parse(b"ICAP/1.0 20").is_err());
        assert!(StatusLine::parse(b"HTTP/1.1 200 OK").is_err());
        assert!(StatusLine::parse(b"ICAP/1.0 2000 OK").is_err());
    }
}
