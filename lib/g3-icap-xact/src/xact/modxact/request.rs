/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;

use super::{IcapModXact, must};
use crate::parse::{EncapsulatedSection, IcapEncapsulated};
use crate::serialize;
use crate::service::IcapMethod;
use crate::xact::IcapXactError;

impl IcapModXact {
    /// Build the ICAP request head followed by the encapsulated HTTP heads.
    pub(super) fn make_request_headers(&mut self) -> Result<Bytes, IcapXactError> {
        let mut buf = Vec::with_capacity(1024);
        let service_cfg = self.service.cfg();

        service_cfg.write_request_line(&mut buf);
        serialize::add_date(&mut buf);
        if !self.config.reuse_connections {
            buf.extend_from_slice(b"Connection: close\r\n");
        }

        let virgin_headers = self.virgin.head.headers();
        if let Some(v) = virgin_headers.get("proxy-authenticate") {
            serialize::add_header(&mut buf, "Proxy-Authenticate", v);
        }
        if let Some(v) = virgin_headers.get("proxy-authorization") {
            serialize::add_header(&mut buf, "Proxy-Authorization", v);
        } else if let (Some(user), Some(pass)) = (&self.client.username, &self.client.password) {
            if !user.is_empty() && !pass.is_empty() {
                serialize::add_proxy_basic_auth(&mut buf, user, pass);
            }
        }

        if let (Some(name), Some(history)) = (&self.config.shared_header_name, &self.history) {
            if let Some((_, value)) = history.shared_record() {
                serialize::add_header(&mut buf, name, &value);
            }
        }

        let mut http_buf = Vec::with_capacity(512);
        let mut encapsulated = IcapEncapsulated::default();
        let invalid = |_| IcapXactError::InvalidState("bad encapsulated layout");
        match service_cfg.method() {
            IcapMethod::Reqmod => {
                encapsulated
                    .push(EncapsulatedSection::ReqHdr, 0)
                    .map_err(invalid)?;
                self.virgin
                    .head
                    .clone_for_adaptation()
                    .pack_into(&mut http_buf);
            }
            IcapMethod::Respmod => {
                if let Some(cause) = &self.cause {
                    encapsulated
                        .push(EncapsulatedSection::ReqHdr, 0)
                        .map_err(invalid)?;
                    crate::http::HttpHead::Request(cause.clone())
                        .clone_for_adaptation()
                        .pack_into(&mut http_buf);
                }
                encapsulated
                    .push(EncapsulatedSection::ResHdr, http_buf.len())
                    .map_err(invalid)?;
                self.virgin
                    .head
                    .clone_for_adaptation()
                    .pack_into(&mut http_buf);
            }
            IcapMethod::Options => {
                return Err(IcapXactError::InvalidState(
                    "OPTIONS is not a modification method",
                ));
            }
        }
        let body_section = if !self.virgin_body.expected() {
            EncapsulatedSection::NullBody
        } else if service_cfg.method() == IcapMethod::Reqmod {
            EncapsulatedSection::ReqBody
        } else {
            EncapsulatedSection::ResBody
        };
        encapsulated
            .push(body_section, http_buf.len())
            .map_err(invalid)?;
        serialize::add_header(&mut buf, "Encapsulated", &encapsulated.to_string());

        if self.preview.enabled() {
            let ad = self.preview.ad();
            serialize::add_header(&mut buf, "Preview", itoa::Buffer::new().format(ad));
            if !self.virgin_body.expected() {
                self.finish_null_body_preview()?;
            }
        }

        self.make_allow_header(&mut buf)?;

        if self.config.send_client_ip {
            if let Some(ip) = self.client.addr {
                serialize::add_client_addr(&mut buf, ip);
            }
        }
        if self.config.send_client_username {
            if let Some(user) = &self.client.username {
                serialize::add_client_username(
                    &mut buf,
                    &self.config.client_username_header,
                    user,
                    self.config.client_username_encode,
                );
            }
        }

        buf.extend_from_slice(b"\r\n");
        self.icap_request = Some(Bytes::copy_from_slice(&buf));

        buf.extend_from_slice(&http_buf);
        Ok(Bytes::from(buf))
    }

    /// A zero-size preview of an absent body is complete right away.
    fn finish_null_body_preview(&mut self) -> Result<(), IcapXactError> {
        must(
            !self.virgin_body_writing.active(),
            "null body preview with an active writer",
        )?;
        must(
            self.virgin.body_pipe.is_none(),
            "null body preview with a virgin body pipe",
        )?;
        must(self.preview.ad() == 0, "non-zero preview of a null body")?;
        self.preview.wrote(0, true)
    }

    fn make_allow_header(&mut self, buf: &mut Vec<u8>) -> Result<(), IcapXactError> {
        self.state.allowed_preview_204 = self.preview.enabled();
        self.state.allowed_postview_204 = self.should_allow_204();

        if (self.state.allowed_preview_204 || self.state.allowed_postview_204)
            && self.virgin_body.expected()
        {
            // a 204 means echoing the virgin body back, so keep it around
            self.virgin_body_sending.plan()?;
        }

        if self.state.allowed_postview_204 {
            buf.extend_from_slice(b"Allow: 204\r\n");
        }
        Ok(())
    }
}
