/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use bytes::Bytes;
use log::{debug, trace};

use super::{IcapModXact, must};
use crate::body_act::VirginBodyAct;
use crate::chunk;
use crate::xact::{IcapXactError, ParsingState, WritingState, XactAction};

impl IcapModXact {
    pub(super) fn schedule_write(&mut self, data: Bytes) -> Result<(), IcapXactError> {
        must(!self.writer_busy, "writer already busy")?;
        self.writer_busy = true;
        self.actions.push_back(XactAction::Write(data));
        Ok(())
    }

    pub(super) fn handle_comm_wrote(&mut self, size: usize) -> Result<(), IcapXactError> {
        if !self.writer_busy {
            trace!("icap xact {}: spurious write done of {size} bytes", self.id);
            return Ok(());
        }
        self.writer_busy = false;
        if self.ignore_last_write {
            self.ignore_last_write = false;
            return Ok(());
        }

        self.bytes_sent += size as u64;
        if self.state.writing == WritingState::Headers {
            self.handle_comm_wrote_headers()
        } else {
            self.write_more()
        }
    }

    pub(super) fn handle_write_failed(&mut self, e: io::Error) -> Result<(), IcapXactError> {
        self.writer_busy = false;
        if self.ignore_last_write {
            self.ignore_last_write = false;
            return Ok(());
        }
        Err(IcapXactError::WriteFailed(e))
    }

    fn handle_comm_wrote_headers(&mut self) -> Result<(), IcapXactError> {
        must(
            self.state.writing == WritingState::Headers,
            "not writing headers",
        )?;

        if self.preview.enabled() {
            if self.preview.done() {
                self.decide_writing_after_preview("zero-size")?;
            } else {
                self.state.writing = WritingState::Preview;
            }
        } else if self.virgin_body.expected() {
            self.state.writing = WritingState::Prime;
        } else {
            return self.stop_writing(true);
        }

        self.write_more()
    }

    pub(super) fn write_more(&mut self) -> Result<(), IcapXactError> {
        if self.writer_busy {
            return Ok(());
        }

        match self.state.writing {
            // waiting for the service to be up
            WritingState::Init => must(self.service_waiting, "write before start"),
            WritingState::Connect
            | WritingState::Headers
            | WritingState::Paused
            | WritingState::ReallyDone => Ok(()),
            WritingState::AlmostDone => self.stop_writing(false),
            WritingState::Preview => self.write_preview_body(),
            WritingState::Prime => self.write_prime_body(),
        }
    }

    fn write_preview_body(&mut self) -> Result<(), IcapXactError> {
        let available = self
            .virgin
            .body_pipe
            .as_ref()
            .map(|pipe| pipe.content_size())
            .unwrap_or_default();
        let size = self.preview.debt().min(available);
        self.write_some_body("preview body", size)?;

        if self.preview.done() {
            self.decide_writing_after_preview("body")?;
        }
        Ok(())
    }

    fn decide_writing_after_preview(&mut self, kind: &str) -> Result<(), IcapXactError> {
        if self.preview.ieof() {
            debug!("icap xact {}: wrote entire body as {kind} preview", self.id);
            self.stop_writing(true)
        } else if self.state.parsing == ParsingState::IcapHeader {
            debug!(
                "icap xact {}: wrote {kind} preview, waiting for reply",
                self.id
            );
            self.state.writing = WritingState::Paused;
            Ok(())
        } else {
            // a final reply arrived already, no need to write the rest
            self.stop_writing(true)
        }
    }

    fn write_prime_body(&mut self) -> Result<(), IcapXactError> {
        must(
            self.state.writing == WritingState::Prime,
            "not writing prime body",
        )?;
        must(
            self.virgin_body_writing.active(),
            "virgin body writing is not active",
        )?;

        let size = self
            .virgin
            .body_pipe
            .as_ref()
            .map(|pipe| pipe.content_size())
            .unwrap_or_default();
        self.write_some_body("prime virgin body", size)?;

        if self.virgin_body_end_reached(&self.virgin_body_writing) {
            debug!("icap xact {}: wrote entire body", self.id);
            self.stop_writing(true)?;
        }
        Ok(())
    }

    fn write_some_body(&mut self, label: &str, size: usize) -> Result<(), IcapXactError> {
        must(!self.writer_busy, "writer already busy")?;
        must(
            self.virgin_body_writing.active(),
            "virgin body writing is not active",
        )?;
        trace!("icap xact {}: will write up to {size} bytes of {label}", self.id);

        let mut buf = Vec::new();
        let chunk_size = self.virgin_content_size(&self.virgin_body_writing)?.min(size);
        if chunk_size > 0 {
            let data = self.virgin_content_data(&self.virgin_body_writing, chunk_size)?;
            chunk::open_chunk(&mut buf, chunk_size, false);
            buf.extend_from_slice(&data);
            chunk::close_chunk(&mut buf);

            self.virgin_body_writing.progress(chunk_size)?;
            self.virgin_consume()?;
        }

        let wrote_eof = self.virgin_body_end_reached(&self.virgin_body_writing);
        let mut last_chunk = wrote_eof;
        let in_preview = self.state.writing == WritingState::Preview;
        if in_preview {
            self.preview.wrote(chunk_size, wrote_eof)?;
            last_chunk |= self.preview.done();
        }

        if last_chunk {
            debug!("icap xact {}: will write last-chunk of {label}", self.id);
            chunk::last_chunk(&mut buf, in_preview && self.preview.ieof());
        }

        if buf.is_empty() {
            return Ok(());
        }
        self.schedule_write(Bytes::from(buf))
    }

    /// Stop writing to the ICAP server.
    ///
    /// A pending write is waited for if `nicely` is set, or ignored otherwise.
    pub(super) fn stop_writing(&mut self, nicely: bool) -> Result<(), IcapXactError> {
        if self.state.writing == WritingState::ReallyDone {
            return Ok(());
        }

        if self.writer_busy {
            if nicely {
                debug!("icap xact {}: will wait for the last write", self.id);
                self.state.writing = WritingState::AlmostDone;
                self.check_consuming();
                return Ok(());
            }
            debug!("icap xact {}: will ignore the last write", self.id);
            // the connection is in an unknown state after that
            self.reuse_connection = false;
            self.ignore_last_write = true;
        }

        debug!("icap xact {}: will no longer write", self.id);
        if self.virgin_body_writing.active() {
            self.virgin_body_writing.disable();
            self.virgin_consume()?;
        }
        self.state.writing = WritingState::ReallyDone;
        self.check_consuming();
        Ok(())
    }

    /// Drop the commitment to echo the virgin body.
    pub(super) fn stop_backup(&mut self) -> Result<(), IcapXactError> {
        if !self.virgin_body_sending.active() {
            return Ok(());
        }
        debug!("icap xact {}: will no longer backup", self.id);
        self.virgin_body_sending.disable();
        self.virgin_consume()
    }

    pub(super) fn virgin_body_end_reached(&self, act: &VirginBodyAct) -> bool {
        let Some(pipe) = &self.virgin.body_pipe else {
            return true;
        };
        !act.active() || !pipe.expect_more_after(act.offset())
    }

    /// Buffered virgin body bytes not yet processed by this activity.
    pub(super) fn virgin_content_size(&self, act: &VirginBodyAct) -> Result<usize, IcapXactError> {
        must(act.active(), "virgin body activity is not active")?;
        let Some(pipe) = &self.virgin.body_pipe else {
            return Err(IcapXactError::InvalidState("no virgin body pipe"));
        };
        let end = self.virgin_consumed + pipe.content_size() as u64;
        must(
            self.virgin_consumed <= act.offset() && act.offset() <= end,
            "virgin body activity out of the buffered range",
        )?;
        Ok((end - act.offset()) as usize)
    }

    pub(super) fn virgin_content_data(
        &self,
        act: &VirginBodyAct,
        size: usize,
    ) -> Result<Bytes, IcapXactError> {
        let Some(pipe) = &self.virgin.body_pipe else {
            return Err(IcapXactError::InvalidState("no virgin body pipe"));
        };
        let offset = (act.offset() - self.virgin_consumed) as usize;
        Ok(pipe.peek(offset, size))
    }

    /// Consume the virgin body up to the slowest active activity.
    pub(super) fn virgin_consume(&mut self) -> Result<(), IcapXactError> {
        let Some(pipe) = &self.virgin.body_pipe else {
            return Ok(());
        };
        if self.is_retriable {
            // keep everything for a retry
            return Ok(());
        }

        let want_to_postpone =
            self.is_repeatable || self.can_start_bypass || self.protect_group_bypass;
        if want_to_postpone && pipe.space_size() > 0 {
            trace!(
                "icap xact {}: postponing consumption of {} bytes",
                self.id,
                pipe.content_size()
            );
            return Ok(());
        }

        let end = self.virgin_consumed + pipe.content_size() as u64;
        let mut offset = end;
        if self.virgin_body_writing.active() {
            offset = offset.min(self.virgin_body_writing.offset());
        }
        if self.virgin_body_sending.active() {
            offset = offset.min(self.virgin_body_sending.offset());
        }
        must(
            self.virgin_consumed <= offset && offset <= end,
            "virgin consumption out of the buffered range",
        )?;

        let size = (offset - self.virgin_consumed) as usize;
        if size > 0 {
            trace!("icap xact {}: consuming {size} virgin bytes", self.id);
            pipe.consume(size);
            self.virgin_consumed += size as u64;
            self.disable_repeats("consumed content");
            self.disable_bypass("consumed content", true);
        }
        Ok(())
    }

    /// Let go of the virgin body once neither writing nor echoing needs it.
    pub(super) fn check_consuming(&mut self) {
        if self.virgin.body_pipe.is_none() || !self.state.done_consuming_virgin() {
            return;
        }
        if self.is_retriable || self.is_repeatable {
            // keep it for a relaunch
            return;
        }
        debug!("icap xact {}: will stop consuming virgin body", self.id);
        self.release_virgin_pipe();
    }

    pub(super) fn release_virgin_pipe(&mut self) {
        if let Some(pipe) = self.virgin.body_pipe.take() {
            // the producer only cares if it is still producing
            if pipe.production_ended() {
                pipe.detach();
            } else {
                pipe.abort();
            }
        }
    }
}
