/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use super::IcapLineParseError;

pub(crate) struct HeaderLine<'a> {
    pub(crate) name: &'a str,
    pub(crate) value: &'a str,
}

impl<'a> HeaderLine<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Result<HeaderLine<'a>, IcapLineParseError> {
        let line = std::str::from_utf8(buf)?;

        let p = memchr::memchr(b':', line.as_bytes())
            .ok_or(IcapLineParseError::NoDelimiterFound(':'))?;
        let name = line[0..p].trim_end();
        if name.is_empty() {
            return Err(IcapLineParseError::MissingHeaderName);
        }
        let value = line[p + 1..].trim();
        Ok(HeaderLine { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        let header = HeaderLine::parse(b"ISTag: \"W3E4R7U9\"\r\n").unwrap();
        assert_eq!(header.name, "ISTag");
        assert_eq!(header.value, "\"W3E4R7U9\"");
    }

    #[test]
    fn empty_value() {
        let header = HeaderLine::parse(b"X-Empty:").unwrap();
        assert_eq!(header.name, "X-Empty");
        assert_eq!(header.value, "");
    }

    #[test]
    fn invalid() {
        assert!(HeaderLine::parse(b": value").is_err());
        assert!(HeaderLine::parse(b"no delimiter").is_err());
    }
}
