/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use log::debug;

use super::{IcapModXact, must};
use crate::answer::AdaptationAnswer;
use crate::message::MessageFacade;
use crate::pipe;
use crate::xact::{IcapXactError, SendingState, XactNotice, XactOutcome};

impl IcapModXact {
    /// Prepare to send the virgin message back unchanged.
    pub(super) fn prep_echoing(&mut self) -> Result<(), IcapXactError> {
        self.disable_repeats("preparing to echo content");
        self.disable_bypass("preparing to echo content", true);
        self.set_outcome(XactOutcome::Echo);

        must(self.adapted_head.is_none(), "adapted head already set")?;
        must(
            self.state.sending == SendingState::Undecided,
            "sending already decided",
        )?;
        self.adapted_head = Some(self.virgin.head.clone());

        let Some(virgin_body_size) = self.virgin.body_pipe.as_ref().map(|p| p.body_size()) else {
            debug!("icap xact {}: no virgin body to echo", self.id);
            return self.stop_sending(true);
        };

        if !self.virgin_body_sending.active() {
            // fails if the backup has been dropped already
            self.virgin_body_sending.plan()?;
        }
        self.state.sending = SendingState::Virgin;
        self.check_consuming();

        self.make_adapted_body_pipe()?;
        if let (Some(size), Some(pipe)) = (virgin_body_size, &self.adapted_pipe) {
            pipe.set_body_size(size)?;
        }
        debug!("icap xact {}: will echo virgin body", self.id);
        Ok(())
    }

    pub(super) fn make_adapted_body_pipe(&mut self) -> Result<(), IcapXactError> {
        must(self.adapted_pipe.is_none(), "adapted body pipe already made")?;
        must(
            self.adapted_consumer.is_none(),
            "adapted body consumer already made",
        )?;
        let (producer, consumer) = pipe::body_pipe(self.config.backup_limit);
        self.adapted_pipe = Some(producer);
        self.adapted_consumer = Some(consumer);
        Ok(())
    }

    /// Hand the adapted head to the initiator, the body follows through the pipe.
    pub(super) fn start_sending(&mut self) -> Result<(), IcapXactError> {
        self.disable_repeats("sent headers");
        self.disable_bypass("sent headers", true);
        must(!self.answered, "answer already sent")?;

        let Some(head) = self.adapted_head.take() else {
            return Err(IcapXactError::InvalidState("no adapted head to send"));
        };
        let message = MessageFacade::new(head, self.adapted_consumer.take());
        debug!(
            "icap xact {}: sending {} answer",
            self.id,
            if self.state.sending == SendingState::Virgin {
                "echoed"
            } else {
                "adapted"
            }
        );
        self.notice = Some(XactNotice::Answer(AdaptationAnswer::Forward(message)));
        self.answered = true;

        if self.state.sending == SendingState::Virgin {
            self.echo_more()?;
        }
        self.check_consuming();
        Ok(())
    }

    pub(super) fn echo_more(&mut self) -> Result<(), IcapXactError> {
        must(
            self.state.sending == SendingState::Virgin,
            "not echoing virgin body",
        )?;
        must(
            self.virgin_body_sending.active(),
            "virgin body sending is not active",
        )?;
        let Some(adapted_pipe) = &self.adapted_pipe else {
            return Err(IcapXactError::InvalidState("no adapted body pipe"));
        };

        let size_max = self.virgin_content_size(&self.virgin_body_sending)?;
        if size_max > 0 {
            let data = self.virgin_content_data(&self.virgin_body_sending, size_max)?;
            let size = adapted_pipe.put_more_data(&data);
            debug!(
                "icap xact {}: echoed {size} out of {size_max} bytes",
                self.id
            );
            self.virgin_body_sending.progress(size)?;
            self.disable_repeats("echoed content");
            self.disable_bypass("echoed content", true);
            self.virgin_consume()?;
        }

        if self.virgin_body_end_reached(&self.virgin_body_sending) {
            debug!("icap xact {}: echoed all", self.id);
            self.stop_sending(true)?;
        }
        Ok(())
    }

    /// Stop producing the adapted body. It ends normally only if `nicely` is set
    /// and no announced bytes are missing.
    pub(super) fn stop_sending(&mut self, nicely: bool) -> Result<(), IcapXactError> {
        if self.state.sending == SendingState::Done {
            return Ok(());
        }

        if self.state.sending != SendingState::Undecided {
            if let Some(pipe) = self.adapted_pipe.take() {
                debug!(
                    "icap xact {}: will no longer send {}",
                    self.id,
                    if nicely { "nicely" } else { "abruptly" }
                );
                if self.virgin_body_sending.active() {
                    self.virgin_body_sending.disable();
                }
                let at_eof = nicely && !pipe.needs_more_data();
                pipe.release(at_eof);
            }
        } else {
            must(
                self.adapted_pipe.is_none(),
                "adapted body pipe while sending is undecided",
            )?;
        }

        self.state.sending = SendingState::Done;
        self.check_consuming();
        Ok(())
    }
}
