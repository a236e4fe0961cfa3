/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IcapErrorReason {
    InternalError,
    ServiceUnavailable,
    ConnectFailed,
    IoFailed,
    Timeout,
    RemoteClosed,
    InvalidResponse,
    UnknownResponse,
    InvalidResponseAfterContinue,
    ContinueAfterPreviewEof,
    NoHttpHeaderFound,
    InvalidBody,
    ClientAborted,
}

impl IcapErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IcapErrorReason::InternalError => "internal error",
            IcapErrorReason::ServiceUnavailable => "ICAP service unavailable",
            IcapErrorReason::ConnectFailed => "failed to connect to ICAP service",
            IcapErrorReason::IoFailed => "ICAP connection io failed",
            IcapErrorReason::Timeout => "ICAP connection timed out",
            IcapErrorReason::RemoteClosed => "ICAP connection closed by remote",
            IcapErrorReason::InvalidResponse => "invalid ICAP response",
            IcapErrorReason::UnknownResponse => "unknown ICAP response code",
            IcapErrorReason::InvalidResponseAfterContinue => {
                "invalid ICAP response code after 100-continue"
            }
            IcapErrorReason::ContinueAfterPreviewEof => {
                "invalid 100-continue response as preview is eof"
            }
            IcapErrorReason::NoHttpHeaderFound => "no encapsulated HTTP header found",
            IcapErrorReason::InvalidBody => "invalid ICAP body",
            IcapErrorReason::ClientAborted => "adaptation client aborted",
        }
    }
}

impl fmt::Display for IcapErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
