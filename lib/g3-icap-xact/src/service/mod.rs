/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

mod config;
pub use config::IcapServiceConfig;

mod options;
pub use options::{IcapOptionsParseError, IcapServiceOptions, TransferKind};

mod rep;
pub use rep::{IcapService, IcapServiceRep};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IcapMethod {
    Options,
    Reqmod,
    Respmod,
}

impl IcapMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IcapMethod::Options => "OPTIONS",
            IcapMethod::Reqmod => "REQMOD",
            IcapMethod::Respmod => "RESPMOD",
        }
    }
}

impl fmt::Display for IcapMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown ICAP method {0}")]
pub struct IcapMethodParseError(String);

impl FromStr for IcapMethod {
    type Err = IcapMethodParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPTIONS" => Ok(IcapMethod::Options),
            "REQMOD" => Ok(IcapMethod::Reqmod),
            "RESPMOD" => Ok(IcapMethod::Respmod),
            _ => Err(IcapMethodParseError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_method() {
        assert_eq!(IcapMethod::from_str("reqmod").unwrap(), IcapMethod::Reqmod);
        assert_eq!(IcapMethod::from_str("RESPMOD").unwrap(), IcapMethod::Respmod);
        assert_eq!(IcapMethod::from_str("Options").unwrap(), IcapMethod::Options);

        let e = IcapMethod::from_str("GET").unwrap_err();
        assert_eq!(e.to_string(), "unknown ICAP method GET");
    }
}
