/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
pub enum BodyPipeError {
    #[error("body size already set to {0}")]
    BodySizeAlreadySet(u64),
    #[error("body size {0} is less than the produced size {1}")]
    BodySizeTooSmall(u64, u64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ProducerState {
    Producing,
    Ended,
    Aborted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConsumerState {
    Consuming,
    Detached,
    Aborted,
}

struct PipeState {
    buf: BytesMut,
    capacity: usize,
    body_size: Option<u64>,
    produced: u64,
    consumed: u64,
    producer: ProducerState,
    consumer: ConsumerState,
}

impl PipeState {
    fn space_size(&self) -> usize {
        if self.consumer != ConsumerState::Consuming {
            return 0;
        }
        self.capacity.saturating_sub(self.buf.len())
    }

    fn end_production(&mut self, at_eof: bool) {
        if self.producer != ProducerState::Producing {
            return;
        }
        if self.body_size.is_none() {
            self.body_size = Some(self.produced);
        }
        self.producer = if at_eof {
            ProducerState::Ended
        } else {
            ProducerState::Aborted
        };
    }
}

struct PipeShared {
    state: Mutex<PipeState>,
    data_event: Notify,
    space_event: Notify,
}

impl PipeShared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap()
    }
}

/// Create a single producer / single consumer body pipe with bounded capacity.
pub fn body_pipe(capacity: usize) -> (BodyPipeProducer, BodyPipeConsumer) {
    let shared = Arc::new(PipeShared {
        state: Mutex::new(PipeState {
            buf: BytesMut::with_capacity(capacity.min(64 * 1024)),
            capacity,
            body_size: None,
            produced: 0,
            consumed: 0,
            producer: ProducerState::Producing,
            consumer: ConsumerState::Consuming,
        }),
        data_event: Notify::new(),
        space_event: Notify::new(),
    });
    (
        BodyPipeProducer {
            shared: Arc::clone(&shared),
            released: false,
        },
        BodyPipeConsumer {
            shared,
            detached: false,
        },
    )
}

/// The producing end. It must be released explicitly, dropping it counts as an abort.
pub struct BodyPipeProducer {
    shared: Arc<PipeShared>,
    released: bool,
}

impl BodyPipeProducer {
    /// Append as much of `data` as fits, returning the accepted length.
    pub fn put_more_data(&self, data: &[u8]) -> usize {
        let mut state = self.shared.lock();
        if state.producer != ProducerState::Producing {
            return 0;
        }
        let mut size = data.len().min(state.space_size());
        if let Some(body_size) = state.body_size {
            let left = body_size.saturating_sub(state.produced);
            size = size.min(usize::try_from(left).unwrap_or(usize::MAX));
        }
        if size == 0 {
            return 0;
        }
        state.buf.extend_from_slice(&data[..size]);
        state.produced += size as u64;
        if state.body_size == Some(state.produced) {
            state.end_production(true);
        }
        drop(state);
        self.shared.data_event.notify_one();
        size
    }

    pub fn set_body_size(&self, size: u64) -> Result<(), BodyPipeError> {
        let mut state = self.shared.lock();
        if let Some(old) = state.body_size {
            return if old == size {
                Ok(())
            } else {
                Err(BodyPipeError::BodySizeAlreadySet(old))
            };
        }
        if size < state.produced {
            return Err(BodyPipeError::BodySizeTooSmall(size, state.produced));
        }
        state.body_size = Some(size);
        if size == state.produced {
            state.end_production(true);
            drop(state);
            self.shared.data_event.notify_one();
        }
        Ok(())
    }

    pub fn body_size_known(&self) -> bool {
        self.shared.lock().body_size.is_some()
    }

    pub fn space_size(&self) -> usize {
        self.shared.lock().space_size()
    }

    pub fn has_potential_space(&self) -> bool {
        self.space_size() > 0
    }

    pub fn produced_size(&self) -> u64 {
        self.shared.lock().produced
    }

    /// Whether the declared body size has not been reached yet.
    pub fn needs_more_data(&self) -> bool {
        let state = self.shared.lock();
        state.body_size.is_some_and(|size| state.produced < size)
    }

    pub fn production_ended(&self) -> bool {
        self.shared.lock().producer != ProducerState::Producing
    }

    pub fn consumer_aborted(&self) -> bool {
        self.shared.lock().consumer == ConsumerState::Aborted
    }

    /// Wait until the consumer frees some space or goes away.
    pub async fn space_available(&self) {
        self.shared.space_event.notified().await
    }

    /// Stop producing. `at_eof` marks a complete body, otherwise the body is truncated.
    pub fn release(mut self, at_eof: bool) {
        self.stop_producing(at_eof);
    }

    fn stop_producing(&mut self, at_eof: bool) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.lock().end_production(at_eof);
        self.shared.data_event.notify_one();
    }
}

impl Drop for BodyPipeProducer {
    fn drop(&mut self) {
        self.stop_producing(false);
    }
}

/// The consuming end. It must be detached explicitly, dropping it counts as an abort.
pub struct BodyPipeConsumer {
    shared: Arc<PipeShared>,
    detached: bool,
}

impl BodyPipeConsumer {
    /// Bytes buffered and not consumed yet.
    pub fn content_size(&self) -> usize {
        self.shared.lock().buf.len()
    }

    pub fn space_size(&self) -> usize {
        self.shared.lock().space_size()
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    pub fn consumed_size(&self) -> u64 {
        self.shared.lock().consumed
    }

    /// Copy `len` buffered bytes starting `offset` bytes after the consumed position.
    pub fn peek(&self, offset: usize, len: usize) -> Bytes {
        let state = self.shared.lock();
        let start = offset.min(state.buf.len());
        let end = offset.saturating_add(len).min(state.buf.len());
        Bytes::copy_from_slice(&state.buf[start..end])
    }

    pub fn consume(&self, size: usize) {
        let mut state = self.shared.lock();
        let size = size.min(state.buf.len());
        if size == 0 {
            return;
        }
        state.buf.advance(size);
        state.consumed += size as u64;
        drop(state);
        self.shared.space_event.notify_one();
    }

    /// Take out everything buffered.
    pub fn take_all(&self) -> Bytes {
        let mut state = self.shared.lock();
        let size = state.buf.len();
        state.consumed += size as u64;
        let data = state.buf.split_to(size).freeze();
        drop(state);
        if size > 0 {
            self.shared.space_event.notify_one();
        }
        data
    }

    /// Whether more bytes may follow the absolute body `offset`.
    pub fn expect_more_after(&self, offset: u64) -> bool {
        self.shared.lock().body_size.is_none_or(|size| offset < size)
    }

    pub fn body_size_known(&self) -> bool {
        self.shared.lock().body_size.is_some()
    }

    pub fn body_size(&self) -> Option<u64> {
        self.shared.lock().body_size
    }

    pub fn production_ended(&self) -> bool {
        self.shared.lock().producer != ProducerState::Producing
    }

    pub fn producer_aborted(&self) -> bool {
        self.shared.lock().producer == ProducerState::Aborted
    }

    /// Whether all body bytes have been produced and consumed.
    pub fn exhausted(&self) -> bool {
        let state = self.shared.lock();
        state.producer != ProducerState::Producing && state.buf.is_empty()
    }

    /// Wait until the producer appends data or stops producing.
    pub async fn data_available(&self) {
        self.shared.data_event.notified().await
    }

    /// Stop consuming after a normal finish.
    pub fn detach(mut self) {
        self.stop_consuming(ConsumerState::Detached);
    }

    /// Stop consuming and tell the producer that nobody wants the rest.
    pub fn abort(mut self) {
        self.stop_consuming(ConsumerState::Aborted);
    }

    fn stop_consuming(&mut self, next: ConsumerState) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.shared.lock().consumer = next;
        self.shared.space_event.notify_one();
    }
}

impl Drop for BodyPipeConsumer {
    fn drop(&mut self) {
        self.stop_consuming(ConsumerState::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_put() {
        let (p, c) = body_pipe(8);
        assert_eq!(p.put_more_data(b"0123456789"), 8);
        assert_eq!(p.space_size(), 0);
        assert_eq!(c.content_size(), 8);
        assert_eq!(c.peek(2, 3).as_ref(), b"234");
        c.consume(5);
        assert_eq!(c.consumed_size(), 5);
        assert_eq!(p.space_size(), 5);
        assert_eq!(c.take_all().as_ref(), b"567");
        assert_eq!(c.consumed_size(), 8);
        p.release(true);
        assert!(c.production_ended());
        assert!(!c.producer_aborted());
        assert_eq!(c.body_size(), Some(8));
        assert!(c.exhausted());
        c.detach();
    }

    #[test]
    fn known_size_ends_production() {
        let (p, c) = body_pipe(64);
        p.set_body_size(4).unwrap();
        assert!(p.needs_more_data());
        assert!(c.expect_more_after(0));
        assert_eq!(p.put_more_data(b"abcdef"), 4);
        assert!(!p.needs_more_data());
        assert!(c.production_ended());
        assert!(!c.expect_more_after(4));
        assert!(p.set_body_size(5).is_err());
        p.set_body_size(4).unwrap();
    }

    #[test]
    fn zero_body_size() {
        let (p, c) = body_pipe(64);
        p.set_body_size(0).unwrap();
        assert!(c.production_ended());
        assert!(!c.expect_more_after(0));
    }

    #[test]
    fn drop_aborts() {
        let (p, c) = body_pipe(64);
        p.put_more_data(b"ab");
        drop(p);
        assert!(c.producer_aborted());
        assert_eq!(c.body_size(), Some(2));

        let (p, c) = body_pipe(64);
        c.abort();
        assert!(p.consumer_aborted());
        assert!(!p.has_potential_space());
        assert_eq!(p.put_more_data(b"ab"), 0);
    }

    #[tokio::test]
    async fn wake_consumer() {
        let (p, c) = body_pipe(64);
        let task = tokio::spawn(async move {
            c.data_available().await;
            c.take_all()
        });
        p.put_more_data(b"hello");
        let data = task.await.unwrap();
        assert_eq!(data.as_ref(), b"hello");
    }
}
