/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use bytes::BufMut;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Header lines of an HTTP head, kept in wire order with the original name case.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HttpHeaders {
    lines: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn append(&mut self, name: &str, value: &str) {
        self.lines.push((name.to_string(), value.to_string()));
    }

    /// Replace all lines with this name by a single one.
    pub fn set(&mut self, name: &str, value: &str) {
        self.remove(name);
        self.append(name, value);
    }

    pub fn remove(&mut self, name: &str) {
        self.lines.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.lines
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any comma separated element of the named headers equals `token`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drop the hop-by-hop headers, including the ones named by `Connection`.
    pub fn remove_hop_by_hop(&mut self) {
        let listed: Vec<String> = self
            .get_all("connection")
            .flat_map(|v| v.split(','))
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self.lines.retain(|(n, _)| {
            let n = n.to_ascii_lowercase();
            !HOP_BY_HOP_HEADERS.contains(&n.as_str()) && !listed.contains(&n)
        });
    }

    pub(crate) fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in &self.lines {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive() {
        let mut h = HttpHeaders::default();
        h.append("Content-Type", "text/plain");
        h.append("X-Multi", "a");
        h.append("x-multi", "b");
        assert_eq!(h.get("content-type"), Some("text/plain"));
        assert_eq!(h.get_all("X-MULTI").collect::<Vec<_>>(), vec!["a", "b"]);
        h.set("X-Multi", "c");
        assert_eq!(h.get_all("x-multi").collect::<Vec<_>>(), vec!["c"]);
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn hop_by_hop() {
        let mut h = HttpHeaders::default();
        h.append("Host", "example.net");
        h.append("Connection", "keep-alive, X-Private");
        h.append("Keep-Alive", "timeout=5");
        h.append("X-Private", "1");
        h.append("Proxy-Authenticate", "Basic");
        h.append("Transfer-Encoding", "chunked");
        h.append("Via", "1.1 proxy");
        h.remove_hop_by_hop();
        let names: Vec<&str> = h.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Host", "Via"]);
    }

    #[test]
    fn token() {
        let mut h = HttpHeaders::default();
        h.append("Transfer-Encoding", "gzip, Chunked");
        assert!(h.has_token("transfer-encoding", "chunked"));
        assert!(!h.has_token("transfer-encoding", "deflate"));
    }
}
