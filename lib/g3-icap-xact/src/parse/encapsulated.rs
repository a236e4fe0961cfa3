/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;

use atoi::FromRadix10;

use super::IcapLineParseError;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EncapsulatedSection {
    ReqHdr,
    ResHdr,
    ReqBody,
    ResBody,
    NullBody,
    OptBody,
}

impl EncapsulatedSection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncapsulatedSection::ReqHdr => "req-hdr",
            EncapsulatedSection::ResHdr => "res-hdr",
            EncapsulatedSection::ReqBody => "req-body",
            EncapsulatedSection::ResBody => "res-body",
            EncapsulatedSection::NullBody => "null-body",
            EncapsulatedSection::OptBody => "opt-body",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "req-hdr" => Some(EncapsulatedSection::ReqHdr),
            "res-hdr" => Some(EncapsulatedSection::ResHdr),
            "req-body" => Some(EncapsulatedSection::ReqBody),
            "res-body" => Some(EncapsulatedSection::ResBody),
            "null-body" => Some(EncapsulatedSection::NullBody),
            "opt-body" => Some(EncapsulatedSection::OptBody),
            _ => None,
        }
    }

    fn is_body(&self) -> bool {
        !matches!(self, EncapsulatedSection::ReqHdr | EncapsulatedSection::ResHdr)
    }
}

/// Value of the `Encapsulated` header: ordered sections with their byte offsets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IcapEncapsulated {
    sections: Vec<(EncapsulatedSection, usize)>,
}

impl IcapEncapsulated {
    pub fn parse(value: &str) -> Result<Self, IcapLineParseError> {
        let mut encapsulated = IcapEncapsulated::default();
        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, offset) = part
                .split_once('=')
                .ok_or(IcapLineParseError::NoDelimiterFound('='))?;
            let section = EncapsulatedSection::from_name(name.trim())
                .ok_or_else(|| IcapLineParseError::InvalidEncapsulatedSection(name.to_string()))?;
            let offset = offset.trim();
            let (value, len) = usize::from_radix_10(offset.as_bytes());
            if len == 0 || len != offset.len() {
                return Err(IcapLineParseError::InvalidEncapsulatedOffset);
            }
            encapsulated.push(section, value)?;
        }
        Ok(encapsulated)
    }

    /// Append a section, keeping the ordering rules.
    pub fn push(
        &mut self,
        section: EncapsulatedSection,
        offset: usize,
    ) -> Result<(), IcapLineParseError> {
        if let Some((last, last_offset)) = self.sections.last() {
            if last.is_body() {
                return Err(IcapLineParseError::MisplacedEncapsulatedBody);
            }
            if offset < *last_offset {
                return Err(IcapLineParseError::InvalidEncapsulatedOffset);
            }
        }
        self.sections.push((section, offset));
        Ok(())
    }

    pub fn has(&self, section: EncapsulatedSection) -> bool {
        self.sections.iter().any(|(s, _)| *s == section)
    }

    pub fn offset(&self, section: EncapsulatedSection) -> Option<usize> {
        self.sections
            .iter()
            .find(|(s, _)| *s == section)
            .map(|(_, offset)| *offset)
    }

    /// Whether an encapsulated HTTP body follows the heads.
    pub fn has_body(&self) -> bool {
        self.has(EncapsulatedSection::ReqBody) || self.has(EncapsulatedSection::ResBody)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl fmt::Display for IcapEncapsulated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (section, offset)) in self.sections.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={offset}", section.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respmod_reply() {
        let e = IcapEncapsulated::parse("res-hdr=0, res-body=137").unwrap();
        assert!(e.has(EncapsulatedSection::ResHdr));
        assert!(!e.has(EncapsulatedSection::ReqHdr));
        assert!(e.has_body());
        assert_eq!(e.offset(EncapsulatedSection::ResBody), Some(137));
        assert_eq!(e.to_string(), "res-hdr=0, res-body=137");
    }

    #[test]
    fn null_body() {
        let e = IcapEncapsulated::parse("null-body=0").unwrap();
        assert!(!e.has_body());
        assert!(e.has(EncapsulatedSection::NullBody));

        let e = IcapEncapsulated::parse("REQ-HDR=0,NULL-BODY=75").unwrap();
        assert!(e.has(EncapsulatedSection::ReqHdr));
        assert!(!e.has_body());
    }

    #[test]
    fn invalid() {
        assert!(IcapEncapsulated::parse("res-hdr").is_err());
        assert!(IcapEncapsulated::parse("res-hdr=x").is_err());
        assert!(IcapEncapsulated::parse("res-hdr=10x").is_err());
        assert!(IcapEncapsulated::parse("foo-hdr=0").is_err());
        assert!(IcapEncapsulated::parse("res-hdr=100, res-body=10").is_err());
        assert!(IcapEncapsulated::parse("res-body=0, res-hdr=10").is_err());
    }
}
