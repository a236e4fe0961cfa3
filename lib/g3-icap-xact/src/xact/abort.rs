/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use bytes::Bytes;

use crate::reply::IcapReplyHead;

/// Snapshot of an aborted transaction, used to decide whether to try again.
#[derive(Clone, Debug)]
pub struct XactAbortInfo {
    pub icap_request: Option<Bytes>,
    pub icap_reply: Option<IcapReplyHead>,
    pub retriable: bool,
    pub repeatable: bool,
}

impl XactAbortInfo {
    /// The status of the reply, if one has been parsed.
    pub fn reply_status(&self) -> Option<u16> {
        self.icap_reply.as_ref().map(|r| r.code)
    }
}
