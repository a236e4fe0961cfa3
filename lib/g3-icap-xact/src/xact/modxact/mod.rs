/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use slog::Logger;
use tokio::time::Instant;

use super::log::XactLog;
use super::{
    IcapErrorReason, IcapXactError, IcapXactRequest, ParsingState, SendingState, WritingState,
    XactAbortInfo, XactAction, XactEvent, XactNotice, XactOutcome, XactState,
};
use crate::body_act::VirginBodyAct;
use crate::chunk::ChunkedBodyDecoder;
use crate::config::IcapXactConfig;
use crate::estimate::SizedEstimate;
use crate::history::AdaptationHistory;
use crate::http::{HttpHead, HttpRequestHead};
use crate::message::MessageFacade;
use crate::pipe::{BodyPipeConsumer, BodyPipeProducer};
use crate::preview::Preview;
use crate::reply::IcapReplyHead;
use crate::serialize::IcapClientInfo;
use crate::service::{IcapMethod, IcapService};

mod parse;
mod request;
mod send;
mod write;


static NEXT_XACT_ID: AtomicU64 = AtomicU64::new(1);

fn must(cond: bool, what: &'static str) -> Result<(), IcapXactError> {
    if cond {
        Ok(())
    } else {
        Err(IcapXactError::InvalidState(what))
    }
}

/// One REQMOD or RESPMOD exchange with an ICAP service.
///
/// The transaction does no I/O itself. Events are fed in through
/// [`handle_event`](Self::handle_event), and the I/O it wants done is queued
/// as [`XactAction`]s for a driver to execute. The answer for the initiator,
/// or the abort report for the launcher, is left as an [`XactNotice`].
pub struct IcapModXact {
    id: u64,
    attempts: u32,
    config: Arc<IcapXactConfig>,
    service: Arc<dyn IcapService>,
    logger: Option<Logger>,

    virgin: MessageFacade,
    cause: Option<HttpRequestHead>,
    history: Option<Arc<AdaptationHistory>>,
    history_id: Option<usize>,
    client: IcapClientInfo,

    adapted_head: Option<HttpHead>,
    adapted_pipe: Option<BodyPipeProducer>,
    adapted_consumer: Option<BodyPipeConsumer>,

    virgin_body: SizedEstimate,
    virgin_body_writing: VirginBodyAct,
    virgin_body_sending: VirginBodyAct,
    virgin_consumed: u64,
    preview: Preview,
    body_decoder: Option<ChunkedBodyDecoder>,
    state: XactState,

    is_retriable: bool,
    is_repeatable: bool,
    can_start_bypass: bool,
    protect_group_bypass: bool,
    reuse_connection: bool,
    ignore_last_write: bool,

    started: bool,
    service_waiting: bool,
    connecting: bool,
    have_connection: bool,
    writer_busy: bool,
    reader_busy: bool,
    comm_eof: bool,

    read_buf: BytesMut,
    icap_request: Option<Bytes>,
    icap_reply: Option<IcapReplyHead>,
    http_head_skip: usize,
    reply_http_header_size: Option<usize>,
    reply_http_body_size: Option<u64>,
    bytes_sent: u64,
    bytes_read: u64,

    outcome: XactOutcome,
    error_reason: Option<IcapErrorReason>,
    stop_reason: Option<String>,
    answered: bool,
    initiator_gone: bool,
    finished: bool,
    create_time: Instant,

    actions: VecDeque<XactAction>,
    notice: Option<XactNotice>,
}

impl IcapModXact {
    pub fn new(
        service: Arc<dyn IcapService>,
        config: Arc<IcapXactConfig>,
        request: IcapXactRequest,
        attempts: u32,
    ) -> Self {
        let IcapXactRequest {
            virgin,
            cause,
            history,
            client,
        } = request;
        let reuse_connection = config.reuse_connections;
        IcapModXact {
            id: NEXT_XACT_ID.fetch_add(1, Ordering::Relaxed),
            attempts,
            config,
            service,
            logger: None,
            virgin,
            cause,
            history,
            history_id: None,
            client,
            adapted_head: None,
            adapted_pipe: None,
            adapted_consumer: None,
            virgin_body: SizedEstimate::default(),
            virgin_body_writing: VirginBodyAct::default(),
            virgin_body_sending: VirginBodyAct::default(),
            virgin_consumed: 0,
            preview: Preview::default(),
            body_decoder: None,
            state: XactState::default(),
            is_retriable: true,
            is_repeatable: true,
            can_start_bypass: false,
            protect_group_bypass: true,
            reuse_connection,
            ignore_last_write: false,
            started: false,
            service_waiting: false,
            connecting: false,
            have_connection: false,
            writer_busy: false,
            reader_busy: false,
            comm_eof: false,
            read_buf: BytesMut::new(),
            icap_request: None,
            icap_reply: None,
            http_head_skip: 0,
            reply_http_header_size: None,
            reply_http_body_size: None,
            bytes_sent: 0,
            bytes_read: 0,
            outcome: XactOutcome::None,
            error_reason: None,
            stop_reason: None,
            answered: false,
            initiator_gone: false,
            finished: false,
            create_time: Instant::now(),
            actions: VecDeque::new(),
            notice: None,
        }
    }

    /// Emit a structured record through this logger once the transaction ends.
    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    pub fn outcome(&self) -> XactOutcome {
        self.outcome
    }

    #[inline]
    pub fn error_reason(&self) -> Option<IcapErrorReason> {
        self.error_reason
    }

    #[inline]
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    #[inline]
    pub fn writing_state(&self) -> WritingState {
        self.state.writing
    }

    #[inline]
    pub fn parsing_state(&self) -> ParsingState {
        self.state.parsing
    }

    #[inline]
    pub fn sending_state(&self) -> SendingState {
        self.state.sending
    }

    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.is_retriable
    }

    #[inline]
    pub fn is_repeatable(&self) -> bool {
        self.is_repeatable
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn service(&self) -> &Arc<dyn IcapService> {
        &self.service
    }

    /// The next I/O request for the driver.
    pub fn next_action(&mut self) -> Option<XactAction> {
        self.actions.pop_front()
    }

    pub fn take_notice(&mut self) -> Option<XactNotice> {
        self.notice.take()
    }

    /// The virgin body pipe, while this transaction still consumes from it.
    pub fn virgin_pipe(&self) -> Option<&BodyPipeConsumer> {
        self.virgin.body_pipe.as_ref()
    }

    /// The adapted body pipe, while this transaction still produces into it.
    pub fn adapted_pipe(&self) -> Option<&BodyPipeProducer> {
        self.adapted_pipe.as_ref()
    }

    /// The event matching the current state of the virgin body pipe.
    pub fn virgin_pipe_event(&self) -> Option<XactEvent> {
        let pipe = self.virgin.body_pipe.as_ref()?;
        let event = if pipe.producer_aborted() {
            XactEvent::BodyProducerAborted
        } else if pipe.production_ended() {
            XactEvent::BodyProductionEnded
        } else {
            XactEvent::BodyDataAvailable
        };
        Some(event)
    }

    /// The event matching the current state of the adapted body pipe.
    pub fn adapted_pipe_event(&self) -> Option<XactEvent> {
        let pipe = self.adapted_pipe.as_ref()?;
        let event = if pipe.consumer_aborted() {
            XactEvent::BodyConsumerAborted
        } else {
            XactEvent::BodySpaceAvailable
        };
        Some(event)
    }

    /// Give back the adaptation request so that it can be tried again.
    ///
    /// Returns `None` once the virgin body has been partly consumed or released.
    pub fn into_request(mut self) -> Option<IcapXactRequest> {
        if self.answered || self.virgin_consumed > 0 {
            return None;
        }
        if self.virgin_body.expected() && self.virgin.body_pipe.is_none() {
            return None;
        }
        let body_pipe = self.virgin.body_pipe.take();
        let head = self.virgin.head.clone();
        Some(IcapXactRequest {
            virgin: MessageFacade::new(head, body_pipe),
            cause: self.cause.take(),
            history: self.history.take(),
            client: std::mem::take(&mut self.client),
        })
    }

    pub fn disable_retries(&mut self) {
        if self.is_retriable {
            debug!("icap xact {}: can not be retried from now on", self.id);
            self.is_retriable = false;
        }
    }

    pub fn disable_repeats(&mut self, reason: &str) {
        if self.is_repeatable {
            debug!(
                "icap xact {}: can not be repeated because {reason}",
                self.id
            );
            self.is_repeatable = false;
        }
    }

    fn disable_bypass(&mut self, reason: &str, including_group_bypass: bool) {
        if self.can_start_bypass {
            debug!(
                "icap xact {}: will never start bypass because {reason}",
                self.id
            );
            self.can_start_bypass = false;
        }
        if self.protect_group_bypass && including_group_bypass {
            debug!(
                "icap xact {}: not protecting group bypass because {reason}",
                self.id
            );
            self.protect_group_bypass = false;
        }
    }

    fn set_outcome(&mut self, outcome: XactOutcome) {
        if self.outcome != XactOutcome::None {
            debug!(
                "icap xact {}: resetting outcome from {} to {outcome}",
                self.id, self.outcome
            );
        }
        self.outcome = outcome;
    }

    fn must_stop(&mut self, reason: &str) {
        if self.stop_reason.is_none() {
            debug!("icap xact {}: must stop: {reason}", self.id);
            self.stop_reason = Some(reason.to_string());
        }
    }

    /// Feed one event into the transaction.
    pub fn handle_event(&mut self, event: XactEvent) {
        if self.finished {
            trace!("icap xact {}: ignoring {event:?} after finish", self.id);
            return;
        }
        trace!("icap xact {}: handle {event:?}", self.id);

        if let Err(e) = self.dispatch(event) {
            self.call_exception(e);
        }
        self.call_end();
    }

    fn dispatch(&mut self, event: XactEvent) -> Result<(), IcapXactError> {
        match event {
            XactEvent::Start => self.start(),
            XactEvent::ServiceReady => self.note_service_ready(),
            XactEvent::Connected { reused } => self.handle_comm_connected(reused),
            XactEvent::ConnectFailed(e) => self.handle_connect_failed(e),
            XactEvent::WriteDone(size) => self.handle_comm_wrote(size),
            XactEvent::WriteFailed(e) => self.handle_write_failed(e),
            XactEvent::ReadDone(data) => self.handle_comm_read(data),
            XactEvent::ReadEof => self.handle_comm_eof(),
            XactEvent::ReadFailed(e) => {
                self.handle_read_failed(e);
                Ok(())
            }
            XactEvent::Timeout => self.handle_comm_timedout(),
            XactEvent::ConnectionClosed => self.handle_comm_closed(),
            XactEvent::BodyDataAvailable | XactEvent::BodyProductionEnded => {
                self.note_virgin_body_change()
            }
            XactEvent::BodyProducerAborted => {
                self.note_virgin_body_aborted();
                Ok(())
            }
            XactEvent::BodySpaceAvailable => self.note_adapted_body_space(),
            XactEvent::BodyConsumerAborted => {
                self.must_stop("adapted body consumer aborted");
                Ok(())
            }
            XactEvent::InitiatorAborted => {
                self.note_initiator_aborted();
                Ok(())
            }
        }
    }

    fn start(&mut self) -> Result<(), IcapXactError> {
        must(!self.started, "transaction already started")?;
        self.started = true;
        must(
            self.service.cfg().method() != IcapMethod::Options,
            "OPTIONS is not a modification method",
        )?;

        if let Some(history) = &self.history {
            self.history_id =
                Some(history.record_xact_start(self.service.cfg().key(), self.attempts > 1));
        }

        if self.virgin.head.as_reply().is_some() && self.cause.is_none() {
            // body framing of a reply depends on the request method
            self.disable_retries();
            self.disable_repeats("no cause request");
            return Err(IcapXactError::MissingCause);
        }
        self.estimate_virgin_body()?;

        self.can_start_bypass = self.service.cfg().bypass();

        if self.service.up() {
            self.start_writing()
        } else {
            self.wait_for_service()
        }
    }

    fn estimate_virgin_body(&mut self) -> Result<(), IcapXactError> {
        let method = self.virgin_request().map(|r| r.method.clone());
        self.virgin_body = SizedEstimate::new(self.virgin.head.body_estimate(method.as_ref()));

        if self.virgin_body.expected() {
            let Some(pipe) = &self.virgin.body_pipe else {
                return Err(IcapXactError::VirginBodyMismatch);
            };
            // too late to join if somebody consumed from it already
            if pipe.consumed_size() > 0 {
                return Err(IcapXactError::VirginBodyMismatch);
            }
            must(
                self.config.backup_limit <= pipe.capacity(),
                "backup limit exceeds the virgin body pipe capacity",
            )?;
            debug!(
                "icap xact {}: expects virgin body of size {:?}",
                self.id,
                self.virgin_body.size()
            );
            self.virgin_body_writing.plan()?;
        } else {
            debug!("icap xact {}: does not expect virgin body", self.id);
            self.release_virgin_pipe();
        }
        Ok(())
    }

    fn virgin_request(&self) -> Option<&HttpRequestHead> {
        self.cause.as_ref().or_else(|| self.virgin.head.as_request())
    }

    fn wait_for_service(&mut self) -> Result<(), IcapXactError> {
        must(!self.service_waiting, "already waiting for the service")?;
        debug!(
            "icap xact {}: will wait for service {} to be up",
            self.id,
            self.service.cfg().key()
        );
        self.service_waiting = true;
        self.actions.push_back(XactAction::WaitForService);
        Ok(())
    }

    fn note_service_ready(&mut self) -> Result<(), IcapXactError> {
        must(self.service_waiting, "not waiting for the service")?;
        self.service_waiting = false;

        if !self.service.up() {
            self.disable_retries();
            self.disable_repeats("ICAP service is unusable");
            return Err(IcapXactError::ServiceUnusable);
        }
        self.start_writing()
    }

    fn start_writing(&mut self) -> Result<(), IcapXactError> {
        self.state.writing = WritingState::Connect;

        // preview must be decided before retries
        self.decide_on_preview()?;
        self.decide_on_retries();

        self.open_connection()
    }

    /// Whether the whole virgin body fits into the backup buffer.
    fn can_backup_everything(&self) -> bool {
        if !self.virgin_body.expected() {
            return true;
        }
        match self.virgin_body.size() {
            Some(size) => size < self.config.backup_limit as u64,
            None => false,
        }
    }

    fn decide_on_preview(&mut self) -> Result<(), IcapXactError> {
        if !self.config.preview_enable {
            debug!("icap xact {}: preview disabled by config", self.id);
            return Ok(());
        }

        let Some(url_path) = self.virgin_request().map(|r| r.url_path()) else {
            return Ok(());
        };
        let Some(wanted) = self.service.wants_preview(&url_path) else {
            debug!(
                "icap xact {}: should not offer preview for {url_path}",
                self.id
            );
            return Ok(());
        };

        // can not preview more than we can backup
        let mut ad = wanted.min(self.config.backup_limit);
        if !self.virgin_body.expected() {
            ad = 0;
        } else if let Some(size) = self.virgin_body.size() {
            ad = ad.min(usize::try_from(size).unwrap_or(usize::MAX));
        }
        debug!(
            "icap xact {}: should offer {ad}-byte preview (service wanted {wanted})",
            self.id
        );
        self.preview.enable(ad)
    }

    fn decide_on_retries(&mut self) {
        if !self.is_retriable {
            return;
        }
        if self.preview.enabled() {
            return;
        }
        if self.can_backup_everything() {
            return;
        }
        self.disable_retries();
    }

    fn should_allow_204(&self) -> bool {
        self.service.allows_204() && self.can_backup_everything()
    }

    fn open_connection(&mut self) -> Result<(), IcapXactError> {
        must(!self.have_connection, "already have a connection")?;
        must(!self.connecting, "already connecting")?;

        if !self.config.reuse_connections {
            self.disable_retries();
        }
        self.connecting = true;
        self.actions.push_back(XactAction::Connect {
            reuse: self.is_retriable,
        });
        Ok(())
    }

    fn handle_comm_connected(&mut self, reused: bool) -> Result<(), IcapXactError> {
        must(self.connecting, "not connecting")?;
        self.connecting = false;
        self.have_connection = true;

        if !reused {
            // we only retry failures on persistent connections
            self.disable_retries();
        }

        if self.state.writing != WritingState::Connect {
            debug!(
                "icap xact {}: connected after writing stopped at {:?}",
                self.id, self.state.writing
            );
            return Ok(());
        }

        // wait for early errors from the ICAP server
        must(!self.reader_busy, "reader already busy")?;
        self.read_more();

        let request = self.make_request_headers()?;
        trace!(
            "icap xact {}: will write request head:\n{}",
            self.id,
            String::from_utf8_lossy(&request)
        );
        self.state.writing = WritingState::Headers;
        self.schedule_write(request)
    }

    fn handle_connect_failed(&mut self, e: io::Error) -> Result<(), IcapXactError> {
        must(self.connecting, "not connecting")?;
        self.connecting = false;
        debug!(
            "icap xact {}: failed to connect to {}: {e}",
            self.id,
            self.service.cfg().uri()
        );
        Err(IcapXactError::ConnectFailed(e))
    }

    fn handle_comm_timedout(&mut self) -> Result<(), IcapXactError> {
        debug!(
            "icap xact {}: timeout with {} {}",
            self.id,
            self.service.cfg().method(),
            self.service.cfg().uri()
        );
        self.reuse_connection = false;
        if self.connecting {
            self.connecting = false;
        } else {
            // so that late I/O results do not disturb bypass
            self.close_connection();
        }
        Err(IcapXactError::Timeout)
    }

    fn handle_comm_closed(&mut self) -> Result<(), IcapXactError> {
        if !self.have_connection {
            trace!("icap xact {}: spurious connection close", self.id);
            return Ok(());
        }
        debug!("icap xact {}: connection externally closed", self.id);
        // the driver has dropped the stream already
        self.have_connection = false;
        self.writer_busy = false;
        self.reader_busy = false;
        self.ignore_last_write = false;
        self.reuse_connection = false;
        Err(IcapXactError::ConnectionClosed)
    }

    fn note_initiator_aborted(&mut self) {
        if self.answered || self.initiator_gone {
            return;
        }
        debug!(
            "icap xact {}: initiator gone before transaction ended",
            self.id
        );
        self.initiator_gone = true;
        self.error_reason = Some(IcapErrorReason::ClientAborted);
        self.set_outcome(XactOutcome::Gone);
        self.must_stop("initiator aborted");
    }

    fn note_virgin_body_change(&mut self) -> Result<(), IcapXactError> {
        self.write_more()?;
        if self.state.sending == SendingState::Virgin {
            self.echo_more()?;
        }
        Ok(())
    }

    fn note_adapted_body_space(&mut self) -> Result<(), IcapXactError> {
        match self.state.sending {
            SendingState::Virgin => self.echo_more(),
            SendingState::Adapted => self.parse_more(),
            SendingState::Undecided | SendingState::Done => Ok(()),
        }
    }

    fn note_virgin_body_aborted(&mut self) {
        // a truncated virgin body can not be sent again
        self.disable_retries();
        self.disable_repeats("virgin body producer aborted");
        self.disable_bypass("virgin body producer aborted", true);
        self.error_reason = Some(IcapErrorReason::ClientAborted);
        self.must_stop("virgin body producer aborted");
    }

    fn cancel_read(&mut self) {
        if self.reader_busy {
            self.reader_busy = false;
            self.actions.push_back(XactAction::CancelRead);
        }
    }

    fn close_connection(&mut self) {
        if !self.have_connection {
            return;
        }

        if self.reuse_connection && !self.done_with_io() {
            debug!(
                "icap xact {}: not reusing connection due to pending I/O",
                self.id
            );
            self.reuse_connection = false;
        }
        if self.reuse_connection {
            self.disable_retries();
        }

        self.actions.push_back(XactAction::Close {
            reuse: self.reuse_connection,
        });
        self.have_connection = false;
        self.writer_busy = false;
        self.reader_busy = false;
        self.ignore_last_write = false;
    }

    fn done_reading(&self) -> bool {
        self.comm_eof || self.state.done_parsing()
    }

    fn done_with_io(&self) -> bool {
        self.have_connection
            && !self.connecting
            && !self.reader_busy
            && !self.writer_busy
            && self.done_reading()
            && self.state.done_writing()
    }

    fn done_all(&self) -> bool {
        !self.connecting
            && !self.reader_busy
            && !self.writer_busy
            && !self.service_waiting
            && self.state.done_sending()
            && self.done_reading()
            && self.state.done_writing()
    }

    fn call_exception(&mut self, e: IcapXactError) {
        if !self.can_start_bypass || self.is_retriable {
            self.note_error(e);
            return;
        }

        debug!("icap xact {}: bypassing error: {e}", self.id);
        if let Err(e) = self.bypass_failure() {
            self.note_error(e);
        }
    }

    fn note_error(&mut self, e: IcapXactError) {
        debug!("icap xact {}: failed: {e}", self.id);
        self.error_reason = Some(e.reason());
        self.set_outcome(XactOutcome::Error);
        self.service.note_failure();
        self.must_stop(&e.to_string());
    }

    fn bypass_failure(&mut self) -> Result<(), IcapXactError> {
        self.disable_bypass("already started to bypass", false);

        must(!self.is_retriable, "bypassing a retriable transaction")?;

        self.prep_echoing()?;
        self.start_sending()?;

        // end all activities associated with the ICAP server
        self.stop_parsing();
        self.stop_writing(true)?;
        if self.have_connection {
            self.reuse_connection = false;
            self.cancel_read();
        }

        // still a failure even if the client does not see it
        self.service.note_failure();
        Ok(())
    }

    fn call_end(&mut self) {
        if self.finished {
            return;
        }
        if self.stop_reason.is_none() {
            if self.done_with_io() {
                debug!("icap xact {}: done with I/O", self.id);
                self.close_connection();
            }
            if !self.done_all() {
                return;
            }
        }
        self.swan_song();
    }

    fn swan_song(&mut self) {
        debug!("icap xact {}: swan sings", self.id);

        if let Err(e) = self.stop_writing(false) {
            warn!("icap xact {}: error while stop writing: {e}", self.id);
        }
        if let Err(e) = self.stop_sending(false) {
            warn!("icap xact {}: error while stop sending: {e}", self.id);
        }
        self.stop_parsing();

        if self.connecting {
            // the driver drops the pending connect
            self.connecting = false;
        }
        self.service_waiting = false;
        self.close_connection();
        self.read_buf.clear();

        if let (Some(history), Some(id)) = (&self.history, self.history_id) {
            history.record_xact_finish(id);
        }

        self.tell_query_aborted();

        if !self.relaunchable() {
            self.release_virgin_pipe();
        }
        self.adapted_consumer = None;
        self.finished = true;

        self.maybe_log();
    }

    fn relaunchable(&self) -> bool {
        !self.answered && (self.is_retriable || self.is_repeatable) && self.virgin_consumed == 0
    }

    fn tell_query_aborted(&mut self) {
        if self.answered || self.initiator_gone {
            return;
        }
        self.notice = Some(XactNotice::Abort(XactAbortInfo {
            icap_request: self.icap_request.clone(),
            icap_reply: self.icap_reply.clone(),
            retriable: self.is_retriable,
            repeatable: self.is_repeatable,
        }));
    }

    fn maybe_log(&self) {
        let Some(logger) = &self.logger else {
            return;
        };
        let log = XactLog {
            logger,
            xact_id: self.id,
            service: self.service.cfg(),
            attempt: self.attempts,
            outcome: self.outcome,
            icap_status: self.icap_reply.as_ref().map(|r| r.code),
            bytes_sent: self.bytes_sent,
            bytes_read: self.bytes_read,
            http_header_size: self.reply_http_header_size,
            http_body_size: self.reply_http_body_size,
            total_time: self.create_time.elapsed(),
        };
        log.log(self.stop_reason.as_deref());
    }
}
