/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod error;
pub use error::HttpHeadParseError;

mod header;
pub use header::HttpHeaders;

mod head;
pub use head::{HttpHead, HttpHeadKind, HttpReplyHead, HttpRequestHead};
