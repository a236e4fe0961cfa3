/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use thiserror::Error;

use crate::parse::IcapLineParseError;

#[derive(Debug, Error)]
pub enum HttpHeadParseError {
    #[error("too large header, should be less than {0}")]
    TooLargeHeader(usize),
    #[error("invalid request line")]
    InvalidRequestLine,
    #[error("invalid status line")]
    InvalidStatusLine,
    #[error("unsupported http version")]
    UnsupportedVersion,
    #[error("invalid method")]
    InvalidMethod,
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(IcapLineParseError),
}
