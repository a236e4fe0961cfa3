/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use crate::xact::IcapXactError;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum ActState {
    #[default]
    Undecided,
    Active,
    Disabled,
}

/// A cursor into the virgin body for one consuming activity.
///
/// One instance tracks what has been written to the ICAP server, another one
/// tracks what has been echoed back to the initiator. The virgin pipe may only
/// be consumed up to the smallest offset of the active instances.
#[derive(Clone, Copy, Debug, Default)]
pub struct VirginBodyAct {
    state: ActState,
    offset: u64,
}

impl VirginBodyAct {
    pub fn plan(&mut self) -> Result<(), IcapXactError> {
        match self.state {
            ActState::Disabled => Err(IcapXactError::InvalidState(
                "can not plan a disabled virgin body activity",
            )),
            ActState::Active => Err(IcapXactError::InvalidState(
                "virgin body activity already planned",
            )),
            ActState::Undecided => {
                self.state = ActState::Active;
                Ok(())
            }
        }
    }

    pub fn disable(&mut self) {
        self.state = ActState::Disabled;
    }

    pub fn progress(&mut self, size: usize) -> Result<(), IcapXactError> {
        if self.state != ActState::Active {
            return Err(IcapXactError::InvalidState(
                "progress on an inactive virgin body activity",
            ));
        }
        self.offset += size as u64;
        Ok(())
    }

    #[inline]
    pub fn active(&self) -> bool {
        self.state == ActState::Active
    }

    #[inline]
    pub fn disabled(&self) -> bool {
        self.state == ActState::Disabled
    }

    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_progress() {
        let mut act = VirginBodyAct::default();
        assert!(!act.active());
        assert!(act.progress(1).is_err());

        act.plan().unwrap();
        assert!(act.active());
        assert!(act.plan().is_err());
        act.progress(10).unwrap();
        act.progress(0).unwrap();
        act.progress(5).unwrap();
        assert_eq!(act.offset(), 15);
    }

    #[test]
    fn disabled_is_terminal() {
        let mut act = VirginBodyAct::default();
        act.disable();
        act.disable();
        assert!(act.disabled());
        assert!(act.plan().is_err());
        assert!(act.progress(1).is_err());

        let mut act = VirginBodyAct::default();
        act.plan().unwrap();
        act.progress(3).unwrap();
        act.disable();
        assert!(!act.active());
        assert!(act.progress(1).is_err());
        assert_eq!(act.offset(), 3);
    }
}
