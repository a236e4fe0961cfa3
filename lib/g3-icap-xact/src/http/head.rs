/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io::Write;

use atoi::FromRadix10;
use http::{Method, Uri, Version};

use super::{HttpHeadParseError, HttpHeaders};
use crate::parse::{HeadLines, HeaderLine};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpHeadKind {
    Request,
    Reply,
}

#[derive(Clone, Debug)]
pub struct HttpRequestHead {
    pub method: Method,
    pub uri: String,
    pub version: Version,
    pub headers: HttpHeaders,
}

impl HttpRequestHead {
    pub fn new(method: Method, uri: &str) -> Self {
        HttpRequestHead {
            method,
            uri: uri.to_string(),
            version: Version::HTTP_11,
            headers: HttpHeaders::default(),
        }
    }

    /// The path part of the request target, used to select the preview policy.
    pub fn url_path(&self) -> String {
        match self.uri.parse::<Uri>() {
            Ok(uri) => uri.path().to_string(),
            Err(_) => match self.uri.split_once('?') {
                Some((path, _)) => path.to_string(),
                None => self.uri.clone(),
            },
        }
    }

    fn body_estimate(&self) -> Option<Option<u64>> {
        if self.headers.has_token("transfer-encoding", "chunked") {
            return Some(None);
        }
        match content_length(&self.headers) {
            Some(0) | None => None,
            Some(n) => Some(Some(n)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpReplyHead {
    pub version: Version,
    pub status: u16,
    pub reason: String,
    pub headers: HttpHeaders,
}

impl HttpReplyHead {
    pub fn new(status: u16, reason: &str) -> Self {
        HttpReplyHead {
            version: Version::HTTP_11,
            status,
            reason: reason.to_string(),
            headers: HttpHeaders::default(),
        }
    }

    fn body_estimate(&self, request_method: Option<&Method>) -> Option<Option<u64>> {
        let Some(method) = request_method else {
            return None;
        };
        if *method == Method::HEAD
            || (100..200).contains(&self.status)
            || self.status == 204
            || self.status == 304
        {
            return None;
        }
        if self.headers.has_token("transfer-encoding", "chunked") {
            return Some(None);
        }
        match content_length(&self.headers) {
            Some(0) => None,
            Some(n) => Some(Some(n)),
            None => Some(None),
        }
    }
}

fn content_length(headers: &HttpHeaders) -> Option<u64> {
    let v = headers.get("content-length")?;
    let (n, len) = u64::from_radix_10(v.as_bytes());
    if len == v.len() && len > 0 {
        Some(n)
    } else {
        None
    }
}

/// An encapsulated HTTP head, either a request or a reply.
#[derive(Clone, Debug)]
pub enum HttpHead {
    Request(HttpRequestHead),
    Reply(HttpReplyHead),
}

impl HttpHead {
    pub fn kind(&self) -> HttpHeadKind {
        match self {
            HttpHead::Request(_) => HttpHeadKind::Request,
            HttpHead::Reply(_) => HttpHeadKind::Reply,
        }
    }

    pub fn headers(&self) -> &HttpHeaders {
        match self {
            HttpHead::Request(r) => &r.headers,
            HttpHead::Reply(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut HttpHeaders {
        match self {
            HttpHead::Request(r) => &mut r.headers,
            HttpHead::Reply(r) => &mut r.headers,
        }
    }

    pub fn as_request(&self) -> Option<&HttpRequestHead> {
        match self {
            HttpHead::Request(r) => Some(r),
            HttpHead::Reply(_) => None,
        }
    }

    pub fn as_reply(&self) -> Option<&HttpReplyHead> {
        match self {
            HttpHead::Request(_) => None,
            HttpHead::Reply(r) => Some(r),
        }
    }

    /// A copy suitable for encapsulation in an ICAP request.
    ///
    /// The start line is kept, hop-by-hop headers are dropped.
    pub fn clone_for_adaptation(&self) -> HttpHead {
        let mut head = self.clone();
        head.headers_mut().remove_hop_by_hop();
        head
    }

    /// Body framing declared by this head.
    ///
    /// `None` for no body, `Some(None)` for a body of unknown size. A reply
    /// needs the method of the request that caused it.
    pub fn body_estimate(&self, request_method: Option<&Method>) -> Option<Option<u64>> {
        match self {
            HttpHead::Request(r) => r.body_estimate(),
            HttpHead::Reply(r) => r.body_estimate(request_method),
        }
    }

    pub fn pack_into(&self, buf: &mut Vec<u8>) {
        match self {
            HttpHead::Request(r) => {
                let _ = write!(buf, "{} {} {:?}\r\n", r.method, r.uri, r.version);
            }
            HttpHead::Reply(r) => {
                let _ = write!(buf, "{:?} {} {}\r\n", r.version, r.status, r.reason);
            }
        }
        self.headers().write_to(buf);
        buf.extend_from_slice(b"\r\n");
    }

    /// Parse a complete head from the start of `buf`.
    ///
    /// Returns the head and its wire length, or `None` if more data is needed.
    pub fn parse(
        kind: HttpHeadKind,
        buf: &[u8],
        max_size: usize,
    ) -> Result<Option<(HttpHead, usize)>, HttpHeadParseError> {
        let Some(len) = crate::parse::head_block_len(buf) else {
            if buf.len() >= max_size {
                return Err(HttpHeadParseError::TooLargeHeader(max_size));
            }
            return Ok(None);
        };
        if len > max_size {
            return Err(HttpHeadParseError::TooLargeHeader(max_size));
        }

        let mut lines = HeadLines::new(&buf[..len]);
        let mut head = match kind {
            HttpHeadKind::Request => {
                let line = lines.next().ok_or(HttpHeadParseError::InvalidRequestLine)?;
                HttpHead::Request(parse_request_line(line)?)
            }
            HttpHeadKind::Reply => {
                let line = lines.next().ok_or(HttpHeadParseError::InvalidStatusLine)?;
                HttpHead::Reply(parse_status_line(line)?)
            }
        };
        for line in lines {
            let header = HeaderLine::parse(line).map_err(HttpHeadParseError::InvalidHeaderLine)?;
            head.headers_mut().append(header.name, header.value);
        }
        Ok(Some((head, len)))
    }
}

fn parse_version(v: &[u8]) -> Result<Version, HttpHeadParseError> {
    match v {
        b"HTTP/1.0" => Ok(Version::HTTP_10),
        b"HTTP/1.1" => Ok(Version::HTTP_11),
        _ => Err(HttpHeadParseError::UnsupportedVersion),
    }
}

fn parse_request_line(line: &[u8]) -> Result<HttpRequestHead, HttpHeadParseError> {
    let mut parts = line.split(|c| *c == b' ').filter(|p| !p.is_empty());
    let method = parts.next().ok_or(HttpHeadParseError::InvalidRequestLine)?;
    let uri = parts.next().ok_or(HttpHeadParseError::InvalidRequestLine)?;
    let version = parts.next().ok_or(HttpHeadParseError::InvalidRequestLine)?;
    if parts.next().is_some() {
        return Err(HttpHeadParseError::InvalidRequestLine);
    }

    let method = Method::from_bytes(method).map_err(|_| HttpHeadParseError::InvalidMethod)?;
    let uri = std::str::from_utf8(uri).map_err(|_| HttpHeadParseError::InvalidRequestLine)?;
    Ok(HttpRequestHead {
        method,
        uri: uri.to_string(),
        version: parse_version(version)?,
        headers: HttpHeaders::default(),
    })
}

fn parse_status_line(line: &[u8]) -> Result<HttpReplyHead, HttpHeadParseError> {
    let p = memchr::memchr(b' ', line).ok_or(HttpHeadParseError::InvalidStatusLine)?;
    let version = parse_version(&line[..p])?;

    let left = &line[p + 1..];
    let (status, len) = u16::from_radix_10(left);
    if len != 3 {
        return Err(HttpHeadParseError::InvalidStatusLine);
    }
    let reason = std::str::from_utf8(&left[len..])
        .map_err(|_| HttpHeadParseError::InvalidStatusLine)?
        .trim();
    Ok(HttpReplyHead {
        version,
        status,
        reason: reason.to_string(),
        headers: HttpHeaders::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request() {
        let data = b"POST http://example.net/upload/a.txt?x=1 HTTP/1.1\r\n\
            Host: example.net\r\n\
            Content-Length: 4\r\n\
            \r\n\
            body";
        let (head, len) = HttpHead::parse(HttpHeadKind::Request, data, 4096)
            .unwrap()
            .unwrap();
        assert_eq!(len, data.len() - 4);
        let req = head.as_request().unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url_path(), "/upload/a.txt");
        assert_eq!(head.body_estimate(None), Some(Some(4)));
    }

    #[test]
    fn parse_reply_partial() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n";
        assert!(
            HttpHead::parse(HttpHeadKind::Reply, data, 4096)
                .unwrap()
                .is_none()
        );
        assert!(HttpHead::parse(HttpHeadKind::Reply, data, 16).is_err());
    }

    #[test]
    fn reply_body_estimate() {
        let data = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let (head, _) = HttpHead::parse(HttpHeadKind::Reply, data, 4096)
            .unwrap()
            .unwrap();
        assert_eq!(head.body_estimate(Some(&Method::GET)), Some(None));
        assert_eq!(head.body_estimate(Some(&Method::HEAD)), None);
        assert_eq!(head.body_estimate(None), None);

        let mut reply = HttpReplyHead::new(304, "Not Modified");
        reply.headers.append("Content-Length", "10");
        assert_eq!(
            HttpHead::Reply(reply).body_estimate(Some(&Method::GET)),
            None
        );

        let reply = HttpReplyHead::new(200, "OK");
        assert_eq!(
            HttpHead::Reply(reply).body_estimate(Some(&Method::GET)),
            Some(None)
        );
    }

    #[test]
    fn pack_clone() {
        let mut req = HttpRequestHead::new(Method::GET, "/index.html");
        req.headers.append("Host", "example.net");
        req.headers.append("Proxy-Authorization", "Basic dDp0");
        req.headers.append("Connection", "close");
        let head = HttpHead::Request(req);

        let mut buf = Vec::new();
        head.clone_for_adaptation().pack_into(&mut buf);
        assert_eq!(
            buf.as_slice(),
            b"GET /index.html HTTP/1.1\r\nHost: example.net\r\n\r\n"
        );

        let mut buf = Vec::new();
        head.pack_into(&mut buf);
        let (parsed, len) = HttpHead::parse(HttpHeadKind::Request, &buf, 4096)
            .unwrap()
            .unwrap();
        assert_eq!(len, buf.len());
        assert_eq!(parsed.kind(), HttpHeadKind::Request);
        assert_eq!(parsed.headers(), head.headers());
    }

    #[test]
    fn bad_lines() {
        assert!(HttpHead::parse(HttpHeadKind::Request, b"GET /\r\n\r\n", 4096).is_err());
        assert!(HttpHead::parse(HttpHeadKind::Reply, b"HTTP/1.1 20 OK\r\n\r\n", 4096).is_err());
        assert!(
            HttpHead::parse(HttpHeadKind::Reply, b"HTTP/1.1 200 OK\r\nbad\r\n\r\n", 4096).is_err()
        );
    }
}
