/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use super::IcapErrorReason;
use crate::chunk::ChunkedDecodeError;
use crate::http::HttpHeadParseError;
use crate::pipe::BodyPipeError;
use crate::reply::IcapReplyParseError;

#[derive(Debug, Error)]
pub enum IcapXactError {
    #[error("invalid transaction state: {0}")]
    InvalidState(&'static str),
    #[error("ICAP service is not usable")]
    ServiceUnusable,
    #[error("connect failed: {0:?}")]
    ConnectFailed(io::Error),
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("ICAP connection timed out")]
    Timeout,
    #[error("ICAP connection closed")]
    ConnectionClosed,
    #[error("truncated ICAP reply")]
    TruncatedReply,
    #[error("invalid ICAP reply head: {0}")]
    InvalidReplyHead(#[from] IcapReplyParseError),
    #[error("invalid encapsulated HTTP head: {0}")]
    InvalidHttpHead(#[from] HttpHeadParseError),
    #[error("invalid ICAP body: {0}")]
    InvalidChunkedBody(#[from] ChunkedDecodeError),
    #[error("no encapsulated HTTP header in {0} reply")]
    MissingEncapsulatedHeader(u16),
    #[error("unsupported ICAP status code {0}")]
    UnsupportedStatus(u16),
    #[error("unexpected 100-continue")]
    UnexpectedContinue,
    #[error("100-continue after preview eof")]
    ContinueAfterPreviewEof,
    #[error("virgin body does not match its head")]
    VirginBodyMismatch,
    #[error("no cause request for the virgin reply")]
    MissingCause,
    #[error("body pipe error: {0}")]
    BodyPipe(#[from] BodyPipeError),
}

impl IcapXactError {
    pub fn reason(&self) -> IcapErrorReason {
        match self {
            IcapXactError::InvalidState(_)
            | IcapXactError::VirginBodyMismatch
            | IcapXactError::MissingCause
            | IcapXactError::BodyPipe(_) => IcapErrorReason::InternalError,
            IcapXactError::ServiceUnusable => IcapErrorReason::ServiceUnavailable,
            IcapXactError::ConnectFailed(_) => IcapErrorReason::ConnectFailed,
            IcapXactError::WriteFailed(_) | IcapXactError::ReadFailed(_) => {
                IcapErrorReason::IoFailed
            }
            IcapXactError::Timeout => IcapErrorReason::Timeout,
            IcapXactError::ConnectionClosed | IcapXactError::TruncatedReply => {
                IcapErrorReason::RemoteClosed
            }
            IcapXactError::InvalidReplyHead(_) | IcapXactError::InvalidHttpHead(_) => {
                IcapErrorReason::InvalidResponse
            }
            IcapXactError::InvalidChunkedBody(_) => IcapErrorReason::InvalidBody,
            IcapXactError::MissingEncapsulatedHeader(_) => IcapErrorReason::NoHttpHeaderFound,
            IcapXactError::UnsupportedStatus(_) => IcapErrorReason::UnknownResponse,
            IcapXactError::UnexpectedContinue => IcapErrorReason::InvalidResponseAfterContinue,
            IcapXactError::ContinueAfterPreviewEof => IcapErrorReason::ContinueAfterPreviewEof,
        }
    }
}
