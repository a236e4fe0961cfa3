/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::VecDeque;
use std::future;
use std::io;

use bytes::{Bytes, BytesMut};
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::Instant;

use crate::launcher::{AbortDecision, IcapLauncher};
use crate::pipe::{BodyPipeConsumer, BodyPipeProducer};
use crate::xact::{IcapModXact, IcapXactRequest, XactAbortInfo, XactAction, XactEvent, XactNotice};

mod connection;
pub use connection::{IcapConnectionProvider, IdleConnectionPool, TcpConnectionProvider};

#[cfg(test)]
mod tests;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Run one adaptation to its end, relaunching failed transactions when allowed.
///
/// The initiator held by the launcher is answered exactly once.
pub async fn run_adaptation<P>(
    launcher: &mut IcapLauncher,
    provider: &P,
    mut request: IcapXactRequest,
) where
    P: IcapConnectionProvider,
{
    loop {
        let mut xact = launcher.launch(request);
        let Some(info) = drive_xact(&mut xact, provider, launcher).await else {
            return;
        };

        match launcher.note_xact_abort(&info) {
            AbortDecision::Relaunch(kind) => match xact.into_request() {
                Some(r) => {
                    debug!("icap: will {} the adaptation", kind.as_str());
                    request = r;
                }
                None => {
                    debug!("icap: the virgin message is no longer usable");
                    launcher.give_up();
                    return;
                }
            },
            AbortDecision::GiveUp => return,
        }
    }
}

struct XactConnection<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
}

enum Wake {
    ServiceReady,
    Wrote(io::Result<usize>),
    Read(io::Result<usize>),
    VirginBody,
    AdaptedSpace,
    Timeout,
}

async fn read_some<S>(reader: Option<&mut ReadHalf<S>>, buf: &mut BytesMut) -> io::Result<usize>
where
    S: AsyncRead + AsyncWrite,
{
    match reader {
        Some(reader) => {
            buf.reserve(READ_BUFFER_SIZE);
            reader.read_buf(buf).await
        }
        None => future::pending().await,
    }
}

async fn write_some<S>(writer: Option<&mut WriteHalf<S>>, data: &[u8]) -> io::Result<usize>
where
    S: AsyncRead + AsyncWrite,
{
    match writer {
        Some(writer) => {
            let n = writer.write(data).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "ICAP connection closed while writing",
                ));
            }
            Ok(n)
        }
        None => future::pending().await,
    }
}

fn closed_by_peer(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

async fn virgin_data(pipe: Option<&BodyPipeConsumer>) {
    match pipe {
        Some(pipe) => pipe.data_available().await,
        None => future::pending().await,
    }
}

async fn adapted_space(pipe: Option<&BodyPipeProducer>) {
    match pipe {
        Some(pipe) => pipe.space_available().await,
        None => future::pending().await,
    }
}

/// Execute the I/O of one transaction until it finishes.
///
/// The answer is forwarded to the launcher as soon as there is one. The abort
/// report is returned if the transaction failed before answering.
async fn drive_xact<P>(
    xact: &mut IcapModXact,
    provider: &P,
    launcher: &mut IcapLauncher,
) -> Option<XactAbortInfo>
where
    P: IcapConnectionProvider,
{
    let service = xact.service().clone();
    let io_timeout = launcher.config().io_timeout();

    let mut conn: Option<XactConnection<P::Stream>> = None;
    let mut pending_write: Option<(Bytes, usize)> = None;
    let mut read_wanted = false;
    let mut wait_service = false;
    let mut initiator_abort_sent = false;
    let mut abort_info: Option<XactAbortInfo> = None;
    let mut read_buf = BytesMut::new();
    let mut io_deadline = Instant::now() + io_timeout;

    let mut events = VecDeque::new();
    events.push_back(XactEvent::Start);

    loop {
        while let Some(event) = events.pop_front() {
            xact.handle_event(event);

            match xact.take_notice() {
                Some(XactNotice::Answer(answer)) => launcher.note_adaptation_answer(answer),
                Some(XactNotice::Abort(info)) => abort_info = Some(info),
                None => {}
            }

            while let Some(action) = xact.next_action() {
                trace!("icap xact {}: action {action:?}", xact.id());
                match action {
                    XactAction::WaitForService => wait_service = true,
                    XactAction::Connect { reuse } => {
                        let event = match tokio::time::timeout(
                            io_timeout,
                            provider.connect(service.cfg(), reuse),
                        )
                        .await
                        {
                            Ok(Ok((stream, reused))) => {
                                let (reader, writer) = tokio::io::split(stream);
                                conn = Some(XactConnection { reader, writer });
                                io_deadline = Instant::now() + io_timeout;
                                XactEvent::Connected { reused }
                            }
                            Ok(Err(e)) => XactEvent::ConnectFailed(e),
                            Err(_) => XactEvent::Timeout,
                        };
                        events.push_back(event);
                    }
                    XactAction::Write(data) => {
                        pending_write = Some((data, 0));
                        io_deadline = Instant::now() + io_timeout;
                    }
                    XactAction::Read => {
                        read_wanted = true;
                        io_deadline = Instant::now() + io_timeout;
                    }
                    XactAction::CancelRead => read_wanted = false,
                    XactAction::Close { reuse } => {
                        pending_write = None;
                        read_wanted = false;
                        if let Some(c) = conn.take() {
                            if reuse {
                                provider.save_idle(service.cfg(), c.reader.unsplit(c.writer));
                            }
                        }
                    }
                }
            }
        }

        if xact.is_finished() {
            return abort_info;
        }

        if !initiator_abort_sent && launcher.initiator_gone() {
            initiator_abort_sent = true;
            launcher.note_initiator_aborted();
            events.push_back(XactEvent::InitiatorAborted);
            continue;
        }

        let io_pending = conn.is_some() && (read_wanted || pending_write.is_some());
        let write_data = pending_write
            .as_ref()
            .map(|(data, offset)| &data[*offset..])
            .unwrap_or_default();
        let (read_half, write_half) = match conn.as_mut() {
            Some(c) => (
                read_wanted.then_some(&mut c.reader),
                pending_write.is_some().then_some(&mut c.writer),
            ),
            None => (None, None),
        };

        let wake = tokio::select! {
            biased;

            _ = service.wait_ready(), if wait_service => Wake::ServiceReady,
            r = write_some(write_half, write_data) => Wake::Wrote(r),
            r = read_some(read_half, &mut read_buf) => Wake::Read(r),
            _ = adapted_space(xact.adapted_pipe()) => Wake::AdaptedSpace,
            _ = virgin_data(xact.virgin_pipe()) => Wake::VirginBody,
            _ = tokio::time::sleep_until(io_deadline), if io_pending => Wake::Timeout,
        };

        match wake {
            Wake::ServiceReady => {
                wait_service = false;
                events.push_back(XactEvent::ServiceReady);
            }
            Wake::Wrote(Ok(n)) => {
                io_deadline = Instant::now() + io_timeout;
                if let Some((data, mut offset)) = pending_write.take() {
                    offset += n;
                    if offset < data.len() {
                        pending_write = Some((data, offset));
                    } else {
                        events.push_back(XactEvent::WriteDone(data.len()));
                    }
                }
            }
            Wake::Wrote(Err(e)) => {
                pending_write = None;
                if closed_by_peer(&e) {
                    debug!("icap xact {}: connection closed while writing: {e}", xact.id());
                    read_wanted = false;
                    conn = None;
                    events.push_back(XactEvent::ConnectionClosed);
                } else {
                    events.push_back(XactEvent::WriteFailed(e));
                }
            }
            Wake::Read(Ok(0)) => {
                read_wanted = false;
                events.push_back(XactEvent::ReadEof);
            }
            Wake::Read(Ok(_)) => {
                io_deadline = Instant::now() + io_timeout;
                read_wanted = false;
                events.push_back(XactEvent::ReadDone(read_buf.split().freeze()));
            }
            Wake::Read(Err(e)) => {
                read_wanted = false;
                if closed_by_peer(&e) {
                    debug!("icap xact {}: connection closed while reading: {e}", xact.id());
                    pending_write = None;
                    conn = None;
                    events.push_back(XactEvent::ConnectionClosed);
                } else {
                    events.push_back(XactEvent::ReadFailed(e));
                }
            }
            Wake::AdaptedSpace => {
                if let Some(event) = xact.adapted_pipe_event() {
                    events.push_back(event);
                }
            }
            Wake::VirginBody => {
                if let Some(event) = xact.virgin_pipe_event() {
                    events.push_back(event);
                }
            }
            Wake::Timeout => {
                pending_write = None;
                read_wanted = false;
                events.push_back(XactEvent::Timeout);
            }
        }
    }
}
