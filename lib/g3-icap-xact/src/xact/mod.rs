/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

mod reason;
pub use reason::IcapErrorReason;

mod error;
pub use error::IcapXactError;

mod abort;
pub use abort::XactAbortInfo;

mod state;
use state::XactState;
pub use state::{ParsingState, SendingState, WritingState};

mod event;
pub use event::{XactAction, XactEvent, XactNotice, XactOutcome};

mod request;
pub use request::IcapXactRequest;

mod log;

mod modxact;
pub use modxact::IcapModXact;
