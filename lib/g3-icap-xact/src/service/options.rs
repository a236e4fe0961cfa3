/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use atoi::FromRadix10;
use thiserror::Error;

use super::IcapMethod;
use crate::reply::IcapReplyHead;

#[derive(Debug, Error)]
pub enum IcapOptionsParseError {
    #[error("request failed: {0} {1}")]
    RequestFailed(u16, String),
    #[error("method not match")]
    MethodNotMatch,
    #[error("no ISTag set")]
    NoServiceTagSet,
    #[error("invalid value for header {0}")]
    InvalidHeaderValue(&'static str),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferKind {
    Preview,
    Ignore,
    Complete,
}

#[derive(Clone, Debug, Default)]
struct TransferList {
    extensions: Vec<String>,
    wildcard: bool,
}

impl TransferList {
    fn parse(value: &str) -> Self {
        let mut list = TransferList::default();
        for ext in value.split(',') {
            let ext = ext.trim();
            if ext == "*" {
                list.wildcard = true;
            } else if !ext.is_empty() {
                list.extensions.push(ext.to_lowercase());
            }
        }
        list
    }

    fn matches(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }
}

/// Service capabilities, as announced by an OPTIONS reply or set statically.
#[derive(Clone, Debug)]
pub struct IcapServiceOptions {
    pub(crate) service_tag: Option<String>,
    pub(crate) preview_size: Option<usize>,
    pub(crate) allow_204: bool,
    pub(crate) max_connections: Option<usize>,
    pub(crate) ttl: Duration,
    transfer_preview: TransferList,
    transfer_ignore: TransferList,
    transfer_complete: TransferList,
}

impl Default for IcapServiceOptions {
    fn default() -> Self {
        IcapServiceOptions {
            service_tag: None,
            preview_size: None,
            allow_204: true,
            max_connections: None,
            ttl: Duration::from_secs(60),
            transfer_preview: TransferList::default(),
            transfer_ignore: TransferList::default(),
            transfer_complete: TransferList::default(),
        }
    }
}

impl IcapServiceOptions {
    pub fn set_preview_size(&mut self, size: Option<usize>) {
        self.preview_size = size;
    }

    pub fn set_allow_204(&mut self, allow: bool) {
        self.allow_204 = allow;
    }

    pub fn set_transfer_preview(&mut self, value: &str) {
        self.transfer_preview = TransferList::parse(value);
    }

    pub fn set_transfer_ignore(&mut self, value: &str) {
        self.transfer_ignore = TransferList::parse(value);
    }

    pub fn set_transfer_complete(&mut self, value: &str) {
        self.transfer_complete = TransferList::parse(value);
    }

    #[inline]
    pub fn preview_size(&self) -> Option<usize> {
        self.preview_size
    }

    #[inline]
    pub fn allow_204(&self) -> bool {
        self.allow_204
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[inline]
    pub fn max_connections(&self) -> Option<usize> {
        self.max_connections
    }

    /// Build the options from the head of an OPTIONS reply.
    pub fn parse_reply(
        reply: &IcapReplyHead,
        method: IcapMethod,
    ) -> Result<Self, IcapOptionsParseError> {
        if reply.code != 200 {
            return Err(IcapOptionsParseError::RequestFailed(
                reply.code,
                reply.reason.clone(),
            ));
        }

        let mut options = IcapServiceOptions {
            allow_204: false,
            ..Default::default()
        };
        let mut method_found = false;
        for (name, value) in reply.headers.iter() {
            match name.to_lowercase().as_str() {
                "methods" => {
                    if value
                        .split(',')
                        .any(|m| m.trim().eq_ignore_ascii_case(method.as_str()))
                    {
                        method_found = true;
                    }
                }
                "istag" => options.service_tag = Some(value.to_string()),
                "preview" => {
                    options.preview_size = Some(parse_usize(value, "Preview")?);
                }
                "allow" => {
                    if value.split(',').any(|v| v.trim() == "204") {
                        options.allow_204 = true;
                    }
                }
                "max-connections" => {
                    options.max_connections = Some(parse_usize(value, "Max-Connections")?);
                }
                "options-ttl" => {
                    let ttl = parse_usize(value, "Options-TTL")?;
                    options.ttl = Duration::from_secs(ttl as u64);
                }
                "transfer-preview" => options.set_transfer_preview(value),
                "transfer-ignore" => options.set_transfer_ignore(value),
                "transfer-complete" => options.set_transfer_complete(value),
                _ => {}
            }
        }

        if !method_found {
            return Err(IcapOptionsParseError::MethodNotMatch);
        }
        if options.service_tag.is_none() {
            return Err(IcapOptionsParseError::NoServiceTagSet);
        }
        Ok(options)
    }

    /// How a message with this url path should be sent to the service.
    pub fn transfer_kind(&self, url_path: &str) -> TransferKind {
        let file = url_path.rsplit('/').next().unwrap_or_default();
        if let Some((_, ext)) = file.rsplit_once('.') {
            let ext = ext.to_lowercase();
            if self.transfer_preview.matches(&ext) {
                return TransferKind::Preview;
            }
            if self.transfer_complete.matches(&ext) {
                return TransferKind::Complete;
            }
            if self.transfer_ignore.matches(&ext) {
                return TransferKind::Ignore;
            }
        }

        if self.transfer_ignore.wildcard {
            TransferKind::Ignore
        } else if self.transfer_complete.wildcard {
            TransferKind::Complete
        } else {
            TransferKind::Preview
        }
    }

    /// The preview size wanted for this url path, if any.
    pub fn wants_preview(&self, url_path: &str) -> Option<usize> {
        let size = self.preview_size?;
        if self.transfer_kind(url_path) == TransferKind::Preview {
            Some(size)
        } else {
            None
        }
    }
}

fn parse_usize(value: &str, name: &'static str) -> Result<usize, IcapOptionsParseError> {
    let (v, len) = usize::from_radix_10(value.as_bytes());
    if len == 0 || len != value.len() {
        return Err(IcapOptionsParseError::InvalidHeaderValue(name));
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_head(data: &[u8]) -> IcapReplyHead {
        IcapReplyHead::parse(data, 4096).unwrap().unwrap().0
    }

    #[test]
    fn options_reply() {
        let reply = parse_head(
            b"ICAP/1.0 200 OK\r\n\
              Methods: RESPMOD\r\n\
              ISTag: \"5BDEEEA9-12E4-2\"\r\n\
              Preview: 1024\r\n\
              Allow: 204\r\n\
              Options-TTL: 3600\r\n\
              Transfer-Preview: *\r\n\
              Transfer-Ignore: jpg, gif\r\n\
              Transfer-Complete: asp,bat,exe\r\n\
              Encapsulated: null-body=0\r\n\
              \r\n",
        );
        let options = IcapServiceOptions::parse_reply(&reply, IcapMethod::Respmod).unwrap();
        assert_eq!(options.preview_size(), Some(1024));
        assert!(options.allow_204());
        assert_eq!(options.ttl(), Duration::from_secs(3600));
        assert_eq!(options.transfer_kind("/a/b.exe"), TransferKind::Complete);
        assert_eq!(options.transfer_kind("/a/b.JPG"), TransferKind::Ignore);
        assert_eq!(options.transfer_kind("/a/b.html"), TransferKind::Preview);
        assert_eq!(options.transfer_kind("/"), TransferKind::Preview);
        assert_eq!(options.wants_preview("/index.html"), Some(1024));
        assert_eq!(options.wants_preview("/setup.exe"), None);

        assert!(IcapServiceOptions::parse_reply(&reply, IcapMethod::Reqmod).is_err());
    }

    #[test]
    fn options_failed() {
        let reply = parse_head(b"ICAP/1.0 404 Not Found\r\n\r\n");
        assert!(IcapServiceOptions::parse_reply(&reply, IcapMethod::Respmod).is_err());

        let reply = parse_head(b"ICAP/1.0 200 OK\r\nMethods: REQMOD\r\nPreview: x\r\n\r\n");
        assert!(IcapServiceOptions::parse_reply(&reply, IcapMethod::Reqmod).is_err());
    }

    #[test]
    fn wildcard_ignore() {
        let mut options = IcapServiceOptions::default();
        options.set_preview_size(Some(0));
        options.set_transfer_ignore("*");
        options.set_transfer_preview("html");
        assert_eq!(options.wants_preview("/index.html"), Some(0));
        assert_eq!(options.wants_preview("/index.php"), None);

        let options = IcapServiceOptions::default();
        assert_eq!(options.wants_preview("/index.html"), None);
    }
}
