/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use crate::history::AdaptationHistory;
use crate::http::HttpRequestHead;
use crate::message::MessageFacade;
use crate::serialize::IcapClientInfo;

/// Everything needed to run one adaptation, kept across attempts.
pub struct IcapXactRequest {
    pub virgin: MessageFacade,
    /// The request that caused a virgin reply, if the virgin message is a reply.
    pub cause: Option<HttpRequestHead>,
    pub history: Option<Arc<AdaptationHistory>>,
    pub client: IcapClientInfo,
}

impl IcapXactRequest {
    pub fn new(virgin: MessageFacade) -> Self {
        IcapXactRequest {
            virgin,
            cause: None,
            history: None,
            client: IcapClientInfo::default(),
        }
    }

    pub fn set_cause(&mut self, cause: HttpRequestHead) {
        self.cause = Some(cause);
    }

    pub fn set_history(&mut self, history: Arc<AdaptationHistory>) {
        self.history = Some(history);
    }

    pub fn set_client(&mut self, client: IcapClientInfo) {
        self.client = client;
    }
}
