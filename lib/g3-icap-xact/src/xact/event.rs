/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io;

use bytes::Bytes;

use super::XactAbortInfo;
use crate::answer::AdaptationAnswer;

/// Everything that can happen to a transaction.
#[derive(Debug)]
pub enum XactEvent {
    Start,
    ServiceReady,
    Connected { reused: bool },
    ConnectFailed(io::Error),
    WriteDone(usize),
    WriteFailed(io::Error),
    ReadDone(Bytes),
    ReadEof,
    ReadFailed(io::Error),
    Timeout,
    ConnectionClosed,
    BodyDataAvailable,
    BodyProductionEnded,
    BodyProducerAborted,
    BodySpaceAvailable,
    BodyConsumerAborted,
    InitiatorAborted,
}

/// I/O the transaction wants its driver to perform.
#[derive(Debug, Eq, PartialEq)]
pub enum XactAction {
    WaitForService,
    /// Open a connection. An idle one may only be taken if `reuse` is set.
    Connect { reuse: bool },
    Write(Bytes),
    Read,
    CancelRead,
    Close { reuse: bool },
}

/// What the transaction has to tell its launcher.
#[derive(Debug)]
pub enum XactNotice {
    Answer(AdaptationAnswer),
    Abort(XactAbortInfo),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum XactOutcome {
    #[default]
    None,
    Echo,
    Modified,
    Satisfied,
    Error,
    Gone,
    Race,
}

impl XactOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            XactOutcome::None => "none",
            XactOutcome::Echo => "echo",
            XactOutcome::Modified => "modified",
            XactOutcome::Satisfied => "satisfied",
            XactOutcome::Error => "error",
            XactOutcome::Gone => "gone",
            XactOutcome::Race => "race",
        }
    }
}

impl fmt::Display for XactOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
