/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum WritingState {
    Init,
    Connect,
    Headers,
    Preview,
    Paused,
    Prime,
    AlmostDone,
    ReallyDone,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsingState {
    IcapHeader,
    HttpHeader,
    Body,
    Done,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendingState {
    Undecided,
    Virgin,
    Adapted,
    Done,
}

pub(crate) struct XactState {
    pub(crate) writing: WritingState,
    pub(crate) parsing: ParsingState,
    pub(crate) sending: SendingState,
    pub(crate) allowed_preview_204: bool,
    pub(crate) allowed_postview_204: bool,
}

impl Default for XactState {
    fn default() -> Self {
        XactState {
            writing: WritingState::Init,
            parsing: ParsingState::IcapHeader,
            sending: SendingState::Undecided,
            allowed_preview_204: false,
            allowed_postview_204: false,
        }
    }
}

impl XactState {
    pub(crate) fn done_writing(&self) -> bool {
        self.writing == WritingState::ReallyDone
    }

    pub(crate) fn done_sending(&self) -> bool {
        self.sending == SendingState::Done
    }

    pub(crate) fn done_parsing(&self) -> bool {
        self.parsing == ParsingState::Done
    }

    pub(crate) fn parsing_headers(&self) -> bool {
        matches!(
            self.parsing,
            ParsingState::IcapHeader | ParsingState::HttpHeader
        )
    }

    /// No more virgin body bytes will be needed by this transaction.
    pub(crate) fn done_consuming_virgin(&self) -> bool {
        self.writing >= WritingState::AlmostDone
            && matches!(self.sending, SendingState::Adapted | SendingState::Done)
    }
}
