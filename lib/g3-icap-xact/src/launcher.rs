/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use slog::Logger;
use tokio::sync::oneshot;

use crate::answer::AdaptationAnswer;
use crate::config::IcapXactConfig;
use crate::reply::IcapReplyHead;
use crate::service::IcapService;
use crate::xact::{IcapModXact, IcapXactRequest, XactAbortInfo};

/// The party waiting for the result of an adaptation.
pub trait AdaptationInitiator: Send {
    fn note_adaptation_answer(self: Box<Self>, answer: AdaptationAnswer);

    /// Whether the initiator no longer waits for an answer.
    fn gone(&self) -> bool {
        false
    }
}

impl AdaptationInitiator for oneshot::Sender<AdaptationAnswer> {
    fn note_adaptation_answer(self: Box<Self>, answer: AdaptationAnswer) {
        let _ = (*self).send(answer);
    }

    fn gone(&self) -> bool {
        self.is_closed()
    }
}

/// Decides whether a failed transaction may be sent again after this reply.
pub trait RepeatCheck: Send + Sync {
    fn allow_repeat(&self, reply: &IcapReplyHead) -> bool;
}

/// Allow repeating only after replies with one of the listed status codes.
pub struct IcapRepeatStatusList {
    codes: Vec<u16>,
}

impl IcapRepeatStatusList {
    pub fn new(codes: Vec<u16>) -> Self {
        IcapRepeatStatusList { codes }
    }
}

impl RepeatCheck for IcapRepeatStatusList {
    fn allow_repeat(&self, reply: &IcapReplyHead) -> bool {
        self.codes.contains(&reply.code)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LaunchKind {
    Initial,
    Retry,
    Repeat,
}

impl LaunchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchKind::Initial => "initial",
            LaunchKind::Retry => "retry",
            LaunchKind::Repeat => "repeat",
        }
    }
}

/// What to do after a transaction aborted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortDecision {
    Relaunch(LaunchKind),
    /// The initiator has been told about the failure.
    GiveUp,
}

/// Launches ICAP transactions for one adaptation and relaunches them on failure.
///
/// The initiator is answered exactly once. If the launcher goes away before
/// that happens, a final error answer is sent on drop.
pub struct IcapLauncher {
    service: Arc<dyn IcapService>,
    config: Arc<IcapXactConfig>,
    repeat_check: Option<Arc<dyn RepeatCheck>>,
    shutdown: Arc<AtomicBool>,
    initiator: Option<Box<dyn AdaptationInitiator>>,
    logger: Option<Logger>,
    launches: u32,
    next_kind: LaunchKind,
}

impl IcapLauncher {
    pub fn new(
        service: Arc<dyn IcapService>,
        config: Arc<IcapXactConfig>,
        initiator: Box<dyn AdaptationInitiator>,
    ) -> Self {
        let repeat_check = config.repeat_check();
        IcapLauncher {
            service,
            config,
            repeat_check,
            shutdown: Arc::new(AtomicBool::new(false)),
            initiator: Some(initiator),
            logger: None,
            launches: 0,
            next_kind: LaunchKind::Initial,
        }
    }

    /// Share a process wide shutdown flag. No relaunch happens once it is set.
    pub fn set_shutdown_flag(&mut self, flag: Arc<AtomicBool>) {
        self.shutdown = flag;
    }

    pub fn set_repeat_check(&mut self, check: Arc<dyn RepeatCheck>) {
        self.repeat_check = Some(check);
    }

    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    #[inline]
    pub fn service(&self) -> &Arc<dyn IcapService> {
        &self.service
    }

    #[inline]
    pub fn config(&self) -> &Arc<IcapXactConfig> {
        &self.config
    }

    #[inline]
    pub fn launches(&self) -> u32 {
        self.launches
    }

    #[inline]
    pub fn answered(&self) -> bool {
        self.initiator.is_none()
    }

    pub fn initiator_gone(&self) -> bool {
        self.initiator.as_ref().is_some_and(|i| i.gone())
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Create the next transaction for this adaptation.
    pub fn launch(&mut self, request: IcapXactRequest) -> IcapModXact {
        self.launches += 1;
        debug!(
            "icap launcher: launching {} xact #{} to {}",
            self.next_kind.as_str(),
            self.launches,
            self.service.cfg().key()
        );

        let mut xact = IcapModXact::new(
            Arc::clone(&self.service),
            Arc::clone(&self.config),
            request,
            self.launches,
        );
        if let Some(logger) = &self.logger {
            xact.set_logger(logger.clone());
        }
        if self.launches > 1 {
            xact.disable_retries();
        }
        if self.launches >= self.config.repeat_limit {
            xact.disable_repeats("over repeat limit");
        }
        xact
    }

    /// Forward the answer of the running transaction to the initiator.
    pub fn note_adaptation_answer(&mut self, answer: AdaptationAnswer) {
        if let Some(initiator) = self.initiator.take() {
            debug!(
                "icap launcher: answer {} after {} launches",
                answer.kind(),
                self.launches
            );
            initiator.note_adaptation_answer(answer);
        }
    }

    /// The initiator went away, nobody needs to be answered any more.
    pub fn note_initiator_aborted(&mut self) {
        debug!("icap launcher: initiator aborted");
        self.initiator = None;
    }

    pub fn note_xact_abort(&mut self, info: &XactAbortInfo) -> AbortDecision {
        debug!(
            "icap launcher: xact #{} aborted, retriable: {}, repeatable: {}",
            self.launches, info.retriable, info.repeatable
        );

        let kind = if self.can_retry(info) {
            LaunchKind::Retry
        } else if self.can_repeat(info) {
            LaunchKind::Repeat
        } else {
            debug!("icap launcher: can not retry or repeat a failed xact");
            // not final, the caller may still bypass
            self.tell_query_aborted(false);
            return AbortDecision::GiveUp;
        };
        self.next_kind = kind;
        AbortDecision::Relaunch(kind)
    }

    /// Give up after deciding to relaunch, e.g. because the request could not be recovered.
    pub fn give_up(&mut self) {
        self.tell_query_aborted(false);
    }

    fn can_retry(&self, info: &XactAbortInfo) -> bool {
        !self.shutting_down() && info.retriable
    }

    fn can_repeat(&self, info: &XactAbortInfo) -> bool {
        if self.launches >= self.config.repeat_limit || self.shutting_down() {
            return false;
        }
        if !info.repeatable {
            return false;
        }
        let Some(reply) = &info.icap_reply else {
            // no reply at all, may be a timeout
            return true;
        };
        match &self.repeat_check {
            Some(check) => check.allow_repeat(reply),
            None => false,
        }
    }

    fn tell_query_aborted(&mut self, is_final: bool) {
        if let Some(initiator) = self.initiator.take() {
            debug!(
                "icap launcher: tell initiator about the failure, final: {is_final}"
            );
            initiator.note_adaptation_answer(AdaptationAnswer::Error { is_final });
        }
    }
}

impl Drop for IcapLauncher {
    fn drop(&mut self) {
        self.tell_query_aborted(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{IcapMethod, IcapServiceConfig, IcapServiceOptions, IcapServiceRep};
    use url::Url;

    fn service() -> Arc<dyn IcapService> {
        let url = Url::parse("icap://127.0.0.1:1344/respmod").unwrap();
        let config = IcapServiceConfig::new(IcapMethod::Respmod, url).unwrap();
        IcapServiceRep::for_test(config, IcapServiceOptions::default())
    }

    fn launcher(repeat_limit: u32) -> (IcapLauncher, oneshot::Receiver<AdaptationAnswer>) {
        let mut config = IcapXactConfig::default();
        config.set_repeat_limit(repeat_limit);
        config.set_repeat_status(vec![503]);
        let (tx, rx) = oneshot::channel();
        let launcher = IcapLauncher::new(service(), Arc::new(config), Box::new(tx));
        (launcher, rx)
    }

    fn reply(code: u16) -> IcapReplyHead {
        let data = format!("ICAP/1.0 {code} Whatever\r\n\r\n");
        IcapReplyHead::parse(data.as_bytes(), 4096)
            .unwrap()
            .unwrap()
            .0
    }

    fn info(retriable: bool, repeatable: bool, code: Option<u16>) -> XactAbortInfo {
        XactAbortInfo {
            icap_request: None,
            icap_reply: code.map(reply),
            retriable,
            repeatable,
        }
    }

    #[test]
    fn retry_first() {
        let (mut launcher, _rx) = launcher(3);
        launcher.launches = 1;
        assert_eq!(
            launcher.note_xact_abort(&info(true, true, None)),
            AbortDecision::Relaunch(LaunchKind::Retry)
        );
        assert!(!launcher.answered());
    }

    #[test]
    fn repeat_by_status() {
        let (mut launcher, _rx) = launcher(3);
        launcher.launches = 1;
        assert_eq!(
            launcher.note_xact_abort(&info(false, true, None)),
            AbortDecision::Relaunch(LaunchKind::Repeat)
        );
        assert_eq!(
            launcher.note_xact_abort(&info(false, true, Some(503))),
            AbortDecision::Relaunch(LaunchKind::Repeat)
        );
    }

    #[tokio::test]
    async fn status_not_listed() {
        let (mut launcher, rx) = launcher(3);
        launcher.launches = 1;
        assert_eq!(
            launcher.note_xact_abort(&info(false, true, Some(500))),
            AbortDecision::GiveUp
        );
        assert!(launcher.answered());
        match rx.await.unwrap() {
            AdaptationAnswer::Error { is_final } => assert!(!is_final),
            a => panic!("unexpected answer {a:?}"),
        }
    }

    #[test]
    fn repeat_limit() {
        let (mut launcher, _rx) = launcher(2);
        launcher.launches = 2;
        assert_eq!(
            launcher.note_xact_abort(&info(false, true, None)),
            AbortDecision::GiveUp
        );
    }

    #[test]
    fn shutting_down() {
        let (mut launcher, _rx) = launcher(3);
        let flag = Arc::new(AtomicBool::new(true));
        launcher.set_shutdown_flag(flag);
        launcher.launches = 1;
        assert_eq!(
            launcher.note_xact_abort(&info(true, true, None)),
            AbortDecision::GiveUp
        );
    }

    #[test]
    fn launch_flags() {
        let (mut launcher, _rx) = launcher(2);
        let request = || {
            let head = crate::http::HttpRequestHead::new(http::Method::GET, "/");
            IcapXactRequest::new(crate::message::MessageFacade::without_body(
                crate::http::HttpHead::Request(head),
            ))
        };
        let xact = launcher.launch(request());
        assert_eq!(xact.attempts(), 1);
        assert!(xact.is_retriable());
        assert!(xact.is_repeatable());

        let xact = launcher.launch(request());
        assert_eq!(xact.attempts(), 2);
        assert!(!xact.is_retriable());
        assert!(!xact.is_repeatable());
    }

    #[tokio::test]
    async fn answer_once() {
        let (mut launcher, rx) = launcher(1);
        launcher.note_adaptation_answer(AdaptationAnswer::Block("deny".to_string()));
        launcher.note_adaptation_answer(AdaptationAnswer::Error { is_final: true });
        drop(launcher);
        match rx.await.unwrap() {
            AdaptationAnswer::Block(rule) => assert_eq!(rule, "deny"),
            a => panic!("unexpected answer {a:?}"),
        }
    }

    #[tokio::test]
    async fn final_error_on_drop() {
        let (launcher, rx) = launcher(1);
        drop(launcher);
        match rx.await.unwrap() {
            AdaptationAnswer::Error { is_final } => assert!(is_final),
            a => panic!("unexpected answer {a:?}"),
        }
    }

    #[test]
    fn initiator_gone() {
        let (launcher, rx) = launcher(1);
        assert!(!launcher.initiator_gone());
        drop(rx);
        assert!(launcher.initiator_gone());
    }
}
