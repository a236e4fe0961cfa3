/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

pub mod body_act;
pub mod chunk;
pub mod estimate;
pub mod http;
pub mod parse;
pub mod pipe;
pub mod preview;

mod answer;
pub use answer::AdaptationAnswer;

mod message;
pub use message::MessageFacade;

mod reply;
pub use reply::{IcapReplyHead, IcapReplyParseError};

mod serialize;
pub use serialize::IcapClientInfo;

mod history;
pub use history::{AdaptationHistory, HistoryEntry};

pub mod service;
pub use service::{
    IcapMethod, IcapMethodParseError, IcapService, IcapServiceConfig, IcapServiceOptions,
    IcapServiceRep,
};

mod config;
#[cfg(feature = "yaml")]
pub use config::{load_service_config, load_xact_config};
pub use config::IcapXactConfig;

pub mod xact;
pub use xact::{IcapModXact, IcapXactRequest, XactAbortInfo};

mod launcher;
pub use launcher::{
    AbortDecision, AdaptationInitiator, IcapLauncher, IcapRepeatStatusList, LaunchKind,
    RepeatCheck,
};

pub mod driver;
pub use driver::run_adaptation;
