/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use crate::xact::IcapXactError;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum PreviewState {
    #[default]
    Disabled,
    Writing,
    Done,
    Ieof,
}

/// ICAP preview negotiation of one transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct Preview {
    state: PreviewState,
    ad: usize,
    written: usize,
}

impl Preview {
    pub fn enable(&mut self, ad: usize) -> Result<(), IcapXactError> {
        if self.state != PreviewState::Disabled {
            return Err(IcapXactError::InvalidState("preview already enabled"));
        }
        self.ad = ad;
        self.state = PreviewState::Writing;
        Ok(())
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.state != PreviewState::Disabled
    }

    /// The negotiated preview size.
    #[inline]
    pub fn ad(&self) -> usize {
        self.ad
    }

    #[inline]
    pub fn done(&self) -> bool {
        matches!(self.state, PreviewState::Done | PreviewState::Ieof)
    }

    #[inline]
    pub fn ieof(&self) -> bool {
        self.state == PreviewState::Ieof
    }

    /// Bytes still allowed to be written as preview.
    pub fn debt(&self) -> usize {
        if self.state == PreviewState::Writing {
            self.ad - self.written
        } else {
            0
        }
    }

    pub fn wrote(&mut self, size: usize, wrote_eof: bool) -> Result<(), IcapXactError> {
        if self.state != PreviewState::Writing {
            return Err(IcapXactError::InvalidState("preview is not being written"));
        }
        if size > self.debt() {
            return Err(IcapXactError::InvalidState("preview write exceeds its size"));
        }
        self.written += size;
        if wrote_eof {
            self.state = PreviewState::Ieof;
        } else if self.written >= self.ad {
            self.state = PreviewState::Done;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_reached() {
        let mut p = Preview::default();
        assert!(!p.enabled());
        assert!(p.wrote(0, false).is_err());

        p.enable(10).unwrap();
        assert!(p.enabled());
        assert_eq!(p.debt(), 10);
        p.wrote(4, false).unwrap();
        assert_eq!(p.debt(), 6);
        assert!(!p.done());
        p.wrote(6, false).unwrap();
        assert!(p.done());
        assert!(!p.ieof());
        assert_eq!(p.debt(), 0);
        assert!(p.wrote(0, false).is_err());
    }

    #[test]
    fn eof_inside_preview() {
        let mut p = Preview::default();
        p.enable(10).unwrap();
        p.wrote(4, true).unwrap();
        assert!(p.done());
        assert!(p.ieof());
    }

    #[test]
    fn never_exceeds_ad() {
        let mut p = Preview::default();
        p.enable(3).unwrap();
        assert!(p.wrote(4, false).is_err());
        p.wrote(3, false).unwrap();
        assert!(p.done());
    }

    #[test]
    fn zero_size() {
        let mut p = Preview::default();
        p.enable(0).unwrap();
        assert!(!p.done());
        p.wrote(0, true).unwrap();
        assert!(p.ieof());
        assert!(p.enable(1).is_err());
    }
}
