/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{IcapServiceConfig, IcapServiceOptions};

/// What a modification transaction needs from the ICAP service it talks to.
#[async_trait]
pub trait IcapService: Send + Sync {
    fn cfg(&self) -> &IcapServiceConfig;

    /// Whether the service has usable options and is not suspended.
    fn up(&self) -> bool;

    /// Resolve once the service readiness may have changed.
    ///
    /// The caller should check `up()` again afterwards.
    async fn wait_ready(&self);

    fn wants_preview(&self, url_path: &str) -> Option<usize>;

    fn allows_204(&self) -> bool;

    /// Record a failed transaction against this service.
    fn note_failure(&self);
}

#[derive(Default)]
struct ServiceState {
    options: Option<Arc<IcapServiceOptions>>,
    options_failed: bool,
    failures: VecDeque<Instant>,
    suspended_until: Option<Instant>,
}

/// An ICAP service with failure tracking and readiness notification.
pub struct IcapServiceRep {
    config: Arc<IcapServiceConfig>,
    state: Mutex<ServiceState>,
    ready_event: Notify,
}

impl IcapServiceRep {
    pub fn new(config: Arc<IcapServiceConfig>) -> Self {
        let state = ServiceState {
            options: config.static_options.clone().map(Arc::new),
            ..Default::default()
        };
        IcapServiceRep {
            config,
            state: Mutex::new(state),
            ready_event: Notify::new(),
        }
    }

    pub fn config(&self) -> &Arc<IcapServiceConfig> {
        &self.config
    }

    pub fn options(&self) -> Option<Arc<IcapServiceOptions>> {
        self.state.lock().unwrap().options.clone()
    }

    /// Install the options learnt from the service and wake up waiters.
    pub fn set_options(&self, options: IcapServiceOptions) {
        let mut state = self.state.lock().unwrap();
        state.options = Some(Arc::new(options));
        state.options_failed = false;
        drop(state);
        self.ready_event.notify_waiters();
    }

    /// Tell waiters that no options could be fetched.
    pub fn set_options_failed(&self) {
        let mut state = self.state.lock().unwrap();
        state.options = None;
        state.options_failed = true;
        drop(state);
        self.ready_event.notify_waiters();
    }

    pub fn suspended(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .suspended_until
            .is_some_and(|until| Instant::now() < until)
    }

    fn suspend(&self, state: &mut ServiceState, now: Instant) {
        warn!(
            "icap service {} suspended for {:?} after {} failures",
            self.config.key(),
            self.config.revival_delay,
            state.failures.len()
        );
        state.suspended_until = Some(now + self.config.revival_delay);
        state.failures.clear();
    }
}

#[async_trait]
impl IcapService for IcapServiceRep {
    fn cfg(&self) -> &IcapServiceConfig {
        &self.config
    }

    fn up(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state
            .suspended_until
            .is_some_and(|until| Instant::now() < until)
        {
            return false;
        }
        state.options.is_some()
    }

    async fn wait_ready(&self) {
        let notified = self.ready_event.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        let (suspended_until, options_failed) = {
            let state = self.state.lock().unwrap();
            if state.options.is_some() && state.suspended_until.is_none() {
                return;
            }
            (state.suspended_until, state.options_failed)
        };
        if options_failed {
            return;
        }
        match suspended_until {
            Some(until) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(until) => {}
                    _ = notified => {}
                }
            }
            None => notified.await,
        }
    }

    fn wants_preview(&self, url_path: &str) -> Option<usize> {
        let state = self.state.lock().unwrap();
        state.options.as_ref()?.wants_preview(url_path)
    }

    fn allows_204(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.options.as_ref().is_some_and(|o| o.allow_204())
    }

    fn note_failure(&self) {
        let Some(limit) = self.config.failure_limit else {
            return;
        };

        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.failures.push_back(now);
        let window = self.config.failure_window;
        while let Some(first) = state.failures.front() {
            if now.saturating_duration_since(*first) > window {
                state.failures.pop_front();
            } else {
                break;
            }
        }
        debug!(
            "icap service {} failure count {} in {window:?}",
            self.config.key(),
            state.failures.len()
        );
        if state.failures.len() > limit {
            self.suspend(&mut state, now);
        }
    }
}

impl IcapServiceRep {
    #[cfg(test)]
    pub(crate) fn for_test(config: IcapServiceConfig, options: IcapServiceOptions) -> Arc<Self> {
        let rep = IcapServiceRep::new(Arc::new(config));
        rep.set_options(options);
        Arc::new(rep)
    }
}
