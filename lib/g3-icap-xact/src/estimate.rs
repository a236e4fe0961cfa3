/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

/// Body presence and size of a virgin message, as seen at transaction start.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SizedEstimate {
    #[default]
    Unexpected,
    UnknownSize,
    KnownSize(u64),
}

impl SizedEstimate {
    /// `None` means no body is expected, `Some(None)` means a body of unknown size.
    pub fn new(body: Option<Option<u64>>) -> Self {
        match body {
            None => SizedEstimate::Unexpected,
            Some(None) => SizedEstimate::UnknownSize,
            Some(Some(size)) => SizedEstimate::KnownSize(size),
        }
    }

    #[inline]
    pub fn expected(&self) -> bool {
        !matches!(self, SizedEstimate::Unexpected)
    }

    #[inline]
    pub fn known_size(&self) -> bool {
        matches!(self, SizedEstimate::KnownSize(_))
    }

    pub fn size(&self) -> Option<u64> {
        match self {
            SizedEstimate::KnownSize(size) => Some(*size),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states() {
        let e = SizedEstimate::default();
        assert!(!e.expected());
        assert!(!e.known_size());

        let e = SizedEstimate::new(Some(None));
        assert!(e.expected());
        assert!(!e.known_size());
        assert_eq!(e.size(), None);

        let e = SizedEstimate::new(Some(Some(1000)));
        assert!(e.expected());
        assert!(e.known_size());
        assert_eq!(e.size(), Some(1000));
    }
}
