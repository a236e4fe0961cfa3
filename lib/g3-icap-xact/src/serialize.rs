/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io::Write;
use std::net::IpAddr;

use base64::prelude::*;
use bytes::BufMut;
use chrono::Utc;

/// Identity of the HTTP client, forwarded to the ICAP service on request.
#[derive(Clone, Debug, Default)]
pub struct IcapClientInfo {
    pub addr: Option<IpAddr>,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub(crate) fn add_date(buf: &mut Vec<u8>) {
    let now = Utc::now();
    let _ = write!(
        buf,
        "Date: {}\r\n",
        now.format("%a, %d %b %Y %H:%M:%S GMT")
    );
}

pub(crate) fn add_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

pub(crate) fn add_proxy_basic_auth(buf: &mut Vec<u8>, user: &str, pass: &str) {
    buf.put_slice(b"Proxy-Authorization: Basic ");
    let v = BASE64_STANDARD.encode(format!("{user}:{pass}"));
    buf.put_slice(v.as_bytes());
    buf.put_slice(b"\r\n");
}

pub(crate) fn add_client_addr(buf: &mut Vec<u8>, ip: IpAddr) {
    let _ = write!(buf, "X-Client-IP: {ip}\r\n");
}

pub(crate) fn add_client_username(buf: &mut Vec<u8>, header: &str, user: &str, encode: bool) {
    buf.put_slice(header.as_bytes());
    buf.put_slice(b": ");
    if encode {
        let v = BASE64_STANDARD.encode(user);
        buf.put_slice(v.as_bytes());
    } else {
        buf.put_slice(user.as_bytes());
    }
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_headers() {
        let mut buf = Vec::new();
        add_client_addr(&mut buf, IpAddr::from([192, 168, 1, 2]));
        add_client_username(&mut buf, "X-Client-Username", "alice", false);
        add_client_username(&mut buf, "X-Authenticated-User", "alice", true);
        add_proxy_basic_auth(&mut buf, "alice", "secret");
        assert_eq!(
            buf.as_slice(),
            b"X-Client-IP: 192.168.1.2\r\n\
              X-Client-Username: alice\r\n\
              X-Authenticated-User: YWxpY2U=\r\n\
              Proxy-Authorization: Basic YWxpY2U6c2VjcmV0\r\n"
                .as_slice()
        );
    }

    #[test]
    fn date() {
        let mut buf = Vec::new();
        add_date(&mut buf);
        let s = std::str::from_utf8(&buf).unwrap();
        assert!(s.starts_with("Date: "));
        assert!(s.ends_with(" GMT\r\n"));
    }
}
