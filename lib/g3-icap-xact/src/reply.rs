/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use crate::http::HttpHeaders;
use crate::parse::{HeadLines, HeaderLine, IcapEncapsulated, IcapLineParseError, StatusLine};

#[derive(Debug, Error)]
pub enum IcapReplyParseError {
    #[error("too large header, should be less than {0}")]
    TooLargeHeader(usize),
    #[error("invalid status line: {0}")]
    InvalidStatusLine(IcapLineParseError),
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(IcapLineParseError),
    #[error("invalid encapsulated header: {0}")]
    InvalidEncapsulated(IcapLineParseError),
}

/// The head of an ICAP reply.
#[derive(Clone, Debug)]
pub struct IcapReplyHead {
    pub code: u16,
    pub reason: String,
    pub headers: HttpHeaders,
    pub encapsulated: IcapEncapsulated,
    keep_alive: bool,
}

impl IcapReplyHead {
    /// Parse a complete reply head from the start of `buf`.
    ///
    /// Returns the head and its wire length, or `None` if more data is needed.
    pub fn parse(
        buf: &[u8],
        max_size: usize,
    ) -> Result<Option<(IcapReplyHead, usize)>, IcapReplyParseError> {
        let Some(len) = crate::parse::head_block_len(buf) else {
            if buf.len() >= max_size {
                return Err(IcapReplyParseError::TooLargeHeader(max_size));
            }
            return Ok(None);
        };
        if len > max_size {
            return Err(IcapReplyParseError::TooLargeHeader(max_size));
        }

        let mut lines = HeadLines::new(&buf[..len]);
        let line = lines.next().ok_or(IcapReplyParseError::InvalidStatusLine(
            IcapLineParseError::NotLongEnough,
        ))?;
        let status = StatusLine::parse(line).map_err(IcapReplyParseError::InvalidStatusLine)?;

        let mut reply = IcapReplyHead {
            code: status.code,
            reason: status.reason.to_string(),
            headers: HttpHeaders::default(),
            encapsulated: IcapEncapsulated::default(),
            keep_alive: true,
        };
        for line in lines {
            let header = HeaderLine::parse(line).map_err(IcapReplyParseError::InvalidHeaderLine)?;
            match header.name.to_lowercase().as_str() {
                "connection" => {
                    if header
                        .value
                        .split(',')
                        .any(|v| v.trim().eq_ignore_ascii_case("close"))
                    {
                        reply.keep_alive = false;
                    }
                }
                "encapsulated" => {
                    reply.encapsulated = IcapEncapsulated::parse(header.value)
                        .map_err(IcapReplyParseError::InvalidEncapsulated)?;
                }
                _ => {}
            }
            reply.headers.append(header.name, header.value);
        }
        Ok(Some((reply, len)))
    }

    #[inline]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::EncapsulatedSection;

    #[test]
    fn ok_200() {
        let data = b"ICAP/1.0 200 OK\r\n\
            ISTag: \"x1\"\r\n\
            Encapsulated: res-hdr=0, res-body=38\r\n\
            \r\n\
            HTTP/1.1";
        let (reply, len) = IcapReplyHead::parse(data, 4096).unwrap().unwrap();
        assert_eq!(len, data.len() - 8);
        assert_eq!(reply.code, 200);
        assert_eq!(reply.reason, "OK");
        assert!(reply.keep_alive());
        assert!(reply.encapsulated.has(EncapsulatedSection::ResHdr));
        assert!(reply.encapsulated.has_body());
        assert_eq!(reply.header("istag"), Some("\"x1\""));
    }

    #[test]
    fn continue_100() {
        let data = b"ICAP/1.0 100 Continue\r\n\r\n";
        let (reply, len) = IcapReplyHead::parse(data, 4096).unwrap().unwrap();
        assert_eq!(len, data.len());
        assert_eq!(reply.code, 100);
        assert!(reply.encapsulated.is_empty());
    }

    #[test]
    fn connection_close() {
        let data = b"ICAP/1.0 204 No Content\r\nConnection: close\r\n\r\n";
        let (reply, _) = IcapReplyHead::parse(data, 4096).unwrap().unwrap();
        assert!(!reply.keep_alive());
    }

    #[test]
    fn partial_and_limits() {
        assert!(
            IcapReplyHead::parse(b"ICAP/1.0 200 OK\r\n", 4096)
                .unwrap()
                .is_none()
        );
        assert!(IcapReplyHead::parse(b"ICAP/1.0 200 OK\r\n", 8).is_err());
        assert!(IcapReplyHead::parse(b"HTTP/1.1 200 OK\r\n\r\n", 4096).is_err());
        assert!(IcapReplyHead::parse(b"ICAP/1.0 200 OK\r\nEncapsulated: x=1\r\n\r\n", 4096).is_err());
    }
}
