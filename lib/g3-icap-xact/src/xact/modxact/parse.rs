/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use bytes::{Buf, Bytes};
use log::{debug, trace};

use super::{IcapModXact, must};
use crate::chunk::ChunkedBodyDecoder;
use crate::http::{HttpHead, HttpHeadKind};
use crate::parse::EncapsulatedSection;
use crate::reply::IcapReplyHead;
use crate::service::IcapMethod;
use crate::xact::{
    IcapErrorReason, IcapXactError, ParsingState, SendingState, WritingState, XactAction,
    XactOutcome,
};

const X_NEXT_SERVICES: &str = "X-Next-Services";

impl IcapModXact {
    pub(super) fn read_more(&mut self) {
        if self.reader_busy || self.done_reading() {
            return;
        }

        // do not fill the read buffer if there is no room for the result
        if let Some(pipe) = &self.adapted_pipe {
            if !pipe.has_potential_space() {
                trace!("icap xact {}: postponing read, no adapted space", self.id);
                return;
            }
        }

        // a partial head or chunk line may grow until the parser rejects it
        let limit = self
            .config
            .read_buffer_limit
            .max(self.service.cfg().max_header_size + 1);
        if self.read_buf.len() < limit {
            self.reader_busy = true;
            self.actions.push_back(XactAction::Read);
        }
    }

    fn may_read_more(&self) -> bool {
        !self.done_reading() && self.stop_reason.is_none()
    }

    pub(super) fn handle_comm_read(&mut self, data: Bytes) -> Result<(), IcapXactError> {
        if !self.reader_busy {
            trace!("icap xact {}: spurious read of {} bytes", self.id, data.len());
            return Ok(());
        }
        self.reader_busy = false;

        self.bytes_read += data.len() as u64;
        self.read_buf.extend_from_slice(&data);
        // the connection did not fail on us
        self.disable_retries();

        self.parse_read_data()
    }

    pub(super) fn handle_comm_eof(&mut self) -> Result<(), IcapXactError> {
        if !self.reader_busy {
            trace!("icap xact {}: spurious read eof", self.id);
            return Ok(());
        }
        self.reader_busy = false;
        self.comm_eof = true;
        self.reuse_connection = false;

        // eof on the first read of a persistent connection
        if self.bytes_read == 0 && self.is_retriable {
            debug!("icap xact {}: persistent connection race", self.id);
            self.set_outcome(XactOutcome::Race);
            self.error_reason = Some(IcapErrorReason::RemoteClosed);
            self.must_stop("pconn race");
            return Ok(());
        }

        self.parse_read_data()
    }

    pub(super) fn handle_read_failed(&mut self, e: io::Error) {
        self.reader_busy = false;
        debug!("icap xact {}: read failed: {e}", self.id);
        self.reuse_connection = false;
        self.error_reason = Some(IcapErrorReason::IoFailed);
        self.must_stop("failed to read ICAP reply");
    }

    fn parse_read_data(&mut self) -> Result<(), IcapXactError> {
        must(!self.state.done_parsing(), "read after parsing is done")?;
        self.parse_more()?;
        self.read_more();
        Ok(())
    }

    pub(super) fn parse_more(&mut self) -> Result<(), IcapXactError> {
        trace!(
            "icap xact {}: have {} bytes to parse",
            self.id,
            self.read_buf.len()
        );

        if self.state.parsing_headers() {
            self.parse_headers()?;
        }
        if self.state.parsing == ParsingState::Body {
            self.parse_body()?;
        }
        Ok(())
    }

    fn parse_headers(&mut self) -> Result<(), IcapXactError> {
        must(self.state.parsing_headers(), "not parsing headers")?;

        // more than one ICAP head may arrive after a 100 Continue
        while self.state.parsing == ParsingState::IcapHeader {
            if !self.parse_icap_head()? {
                break;
            }
        }
        if self.state.parsing == ParsingState::HttpHeader {
            self.parse_http_head()?;
        }

        if self.state.parsing_headers() {
            if !self.may_read_more() {
                return Err(IcapXactError::TruncatedReply);
            }
            return Ok(());
        }

        self.start_sending()
    }

    /// Returns `false` if more data is needed.
    fn parse_icap_head(&mut self) -> Result<bool, IcapXactError> {
        must(
            self.state.sending == SendingState::Undecided,
            "ICAP head after sending decided",
        )?;

        let max_size = self.service.cfg().max_header_size;
        let Some((reply, len)) = IcapReplyHead::parse(&self.read_buf, max_size)? else {
            if self.comm_eof {
                return Err(IcapXactError::TruncatedReply);
            }
            return Ok(false);
        };
        self.read_buf.advance(len);
        debug!(
            "icap xact {}: got reply {} {} with encapsulated {}",
            self.id, reply.code, reply.reason, reply.encapsulated
        );

        if !reply.keep_alive() {
            self.reuse_connection = false;
        }
        let code = reply.code;
        let shared_value = self
            .config
            .shared_header_name
            .as_ref()
            .and_then(|name| reply.header(name).map(|v| (name.clone(), v.to_string())));
        let next_services = if self.service.cfg().routing() {
            reply.header(X_NEXT_SERVICES).map(|v| v.to_string())
        } else {
            None
        };
        self.icap_reply = Some(reply);

        match code {
            100 => return self.handle_100_continue().map(|_| true),
            200 | 201 => {
                self.validate_200_ok(code)?;
                self.handle_200_ok()?;
            }
            204 => self.handle_204_no_content()?,
            _ => {
                debug!("icap xact {}: unsupported status {code}", self.id);
                // the reply layout is unknown, so is the connection state
                self.reuse_connection = false;
                self.stop_parsing();
                self.stop_backup()?;
                return Err(IcapXactError::UnsupportedStatus(code));
            }
        }

        if let Some(history) = &self.history {
            if let Some((name, value)) = shared_value {
                history.update_shared_record(&name, &value);
            }
            if let Some(services) = next_services {
                history.update_next_services(&services);
            }
        }

        // a final reply means the rest of the body is not needed
        if self.state.writing == WritingState::Paused {
            self.stop_writing(true)?;
        }
        Ok(true)
    }

    fn handle_100_continue(&mut self) -> Result<(), IcapXactError> {
        if self.state.writing != WritingState::Paused {
            return Err(IcapXactError::UnexpectedContinue);
        }
        // the server must not reply before the end of preview
        if !self.preview.enabled() || !self.preview.done() {
            return Err(IcapXactError::UnexpectedContinue);
        }
        if self.preview.ieof() {
            return Err(IcapXactError::ContinueAfterPreviewEof);
        }

        // the preview commitment is gone, but 204 may still be allowed
        if !self.state.allowed_postview_204 {
            self.stop_backup()?;
        }

        self.state.parsing = ParsingState::IcapHeader;
        self.icap_reply = None;
        self.state.writing = WritingState::Prime;
        self.write_more()
    }

    fn validate_200_ok(&self, code: u16) -> Result<(), IcapXactError> {
        let encapsulated = self
            .icap_reply
            .as_ref()
            .map(|r| &r.encapsulated)
            .ok_or(IcapXactError::InvalidState("no ICAP reply"))?;
        let valid = match self.service.cfg().method() {
            IcapMethod::Respmod => encapsulated.has(EncapsulatedSection::ResHdr),
            _ => {
                encapsulated.has(EncapsulatedSection::ResHdr)
                    || encapsulated.has(EncapsulatedSection::ReqHdr)
            }
        };
        if valid {
            Ok(())
        } else {
            Err(IcapXactError::MissingEncapsulatedHeader(code))
        }
    }

    fn handle_200_ok(&mut self) -> Result<(), IcapXactError> {
        self.state.parsing = ParsingState::HttpHeader;
        self.decide_on_sending(SendingState::Adapted)?;
        self.stop_backup()?;
        self.check_consuming();

        let encapsulated = self
            .icap_reply
            .as_ref()
            .map(|r| &r.encapsulated)
            .ok_or(IcapXactError::InvalidState("no ICAP reply"))?;
        self.http_head_skip = encapsulated
            .offset(EncapsulatedSection::ResHdr)
            .or_else(|| encapsulated.offset(EncapsulatedSection::ReqHdr))
            .unwrap_or_default();
        Ok(())
    }

    fn handle_204_no_content(&mut self) -> Result<(), IcapXactError> {
        self.stop_parsing();
        self.prep_echoing()
    }

    fn decide_on_sending(&mut self, sending: SendingState) -> Result<(), IcapXactError> {
        must(
            self.state.sending == SendingState::Undecided,
            "sending already decided",
        )?;
        self.state.sending = sending;
        Ok(())
    }

    fn parse_http_head(&mut self) -> Result<(), IcapXactError> {
        let Some(reply) = &self.icap_reply else {
            return Err(IcapXactError::InvalidState("no ICAP reply"));
        };
        let code = reply.code;
        let has_res_hdr = reply.encapsulated.has(EncapsulatedSection::ResHdr);
        let has_req_hdr = reply.encapsulated.has(EncapsulatedSection::ReqHdr);
        let kind = if has_res_hdr {
            if self.service.cfg().method() == IcapMethod::Reqmod {
                self.set_outcome(XactOutcome::Satisfied);
            } else {
                self.set_outcome(XactOutcome::Modified);
            }
            HttpHeadKind::Reply
        } else if has_req_hdr {
            self.set_outcome(XactOutcome::Modified);
            HttpHeadKind::Request
        } else {
            return Err(IcapXactError::MissingEncapsulatedHeader(code));
        };

        // skip the sections we are not interested in
        if self.http_head_skip > 0 {
            let skip = self.http_head_skip.min(self.read_buf.len());
            self.read_buf.advance(skip);
            self.http_head_skip -= skip;
            if self.http_head_skip > 0 {
                if self.comm_eof {
                    return Err(IcapXactError::TruncatedReply);
                }
                return Ok(());
            }
        }

        let max_size = self.service.cfg().max_header_size;
        let Some((head, len)) = HttpHead::parse(kind, &self.read_buf, max_size)? else {
            if self.comm_eof {
                return Err(IcapXactError::TruncatedReply);
            }
            return Ok(());
        };
        self.read_buf.advance(len);
        debug!(
            "icap xact {}: parsed adapted {:?} head of {len} bytes",
            self.id,
            head.kind()
        );
        self.adapted_head = Some(head);
        self.reply_http_header_size = Some(len);

        self.decide_on_parsing_body()
    }

    fn decide_on_parsing_body(&mut self) -> Result<(), IcapXactError> {
        let has_body = self
            .icap_reply
            .as_ref()
            .is_some_and(|r| r.encapsulated.has_body());
        if has_body {
            debug!("icap xact {}: expecting a body", self.id);
            self.state.parsing = ParsingState::Body;
            self.reply_http_body_size = Some(0);
            self.body_decoder = Some(ChunkedBodyDecoder::new(
                self.service.cfg().max_header_size,
            ));
            self.make_adapted_body_pipe()?;
            must(
                self.state.sending == SendingState::Adapted,
                "parsing body while not sending adapted",
            )
        } else {
            debug!("icap xact {}: not expecting a body", self.id);
            self.stop_parsing();
            self.stop_sending(true)
        }
    }

    fn parse_body(&mut self) -> Result<(), IcapXactError> {
        must(
            self.state.parsing == ParsingState::Body,
            "not parsing body",
        )?;
        let Some(decoder) = self.body_decoder.as_mut() else {
            return Err(IcapXactError::InvalidState("no body decoder"));
        };
        let Some(pipe) = self.adapted_pipe.as_ref() else {
            return Err(IcapXactError::InvalidState("no adapted body pipe"));
        };

        decoder.decode(&mut self.read_buf, |data| pipe.put_more_data(data))?;
        let decoded = decoder.decoded_size();
        let done = decoder.is_done();
        let needs_more_data = decoder.needs_more_data();
        let needs_more_space = decoder.needs_more_space();

        self.reply_http_body_size = Some(decoded);
        if decoded > 0 {
            self.disable_repeats("sent adapted content");
            self.disable_bypass("sent adapted content", true);
        }

        if done {
            debug!("icap xact {}: parsed body of {decoded} bytes", self.id);
            self.stop_parsing();
            return self.stop_sending(true);
        }

        if needs_more_data {
            if !self.may_read_more() {
                return Err(IcapXactError::TruncatedReply);
            }
            self.read_more();
        }
        if needs_more_space {
            must(!self.state.done_sending(), "waiting for space after sending")?;
        }
        Ok(())
    }

    pub(super) fn stop_parsing(&mut self) {
        if self.state.parsing == ParsingState::Done {
            return;
        }
        debug!("icap xact {}: will no longer parse", self.id);
        self.body_decoder = None;
        self.state.parsing = ParsingState::Done;

        if !self.read_buf.is_empty() {
            // leftover bytes leave the connection in an unknown state
            self.reuse_connection = false;
        }
    }
}
