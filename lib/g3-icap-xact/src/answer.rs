/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;

use crate::message::MessageFacade;

/// The final word of an adaptation, sent to the initiator at most once.
pub enum AdaptationAnswer {
    /// Continue with this message, adapted or echoed.
    Forward(MessageFacade),
    /// Deny the HTTP transaction because of the named rule.
    Block(String),
    /// The adaptation failed. `is_final` tells that no other service may be tried.
    Error { is_final: bool },
}

impl AdaptationAnswer {
    pub fn kind(&self) -> &'static str {
        match self {
            AdaptationAnswer::Forward(_) => "forward",
            AdaptationAnswer::Block(_) => "block",
            AdaptationAnswer::Error { .. } => "error",
        }
    }
}

impl fmt::Debug for AdaptationAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdaptationAnswer::Forward(msg) => f
                .debug_struct("Forward")
                .field("head", &msg.head)
                .field("body", &msg.body_pipe.is_some())
                .finish(),
            AdaptationAnswer::Block(rule) => f.debug_tuple("Block").field(rule).finish(),
            AdaptationAnswer::Error { is_final } => f
                .debug_struct("Error")
                .field("is_final", is_final)
                .finish(),
        }
    }
}
