/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use crate::http::HttpHead;
use crate::pipe::BodyPipeConsumer;

/// An HTTP head together with the stream of its body, if it has one.
pub struct MessageFacade {
    pub head: HttpHead,
    pub body_pipe: Option<BodyPipeConsumer>,
}

impl MessageFacade {
    pub fn new(head: HttpHead, body_pipe: Option<BodyPipeConsumer>) -> Self {
        MessageFacade { head, body_pipe }
    }

    pub fn without_body(head: HttpHead) -> Self {
        MessageFacade {
            head,
            body_pipe: None,
        }
    }
}
