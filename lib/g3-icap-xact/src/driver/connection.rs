/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, trace};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::service::IcapServiceConfig;

/// Hands out connections to ICAP services and keeps idle ones for reuse.
///
/// Streams are written without flushing, so they must not buffer writes.
#[async_trait]
pub trait IcapConnectionProvider: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Get a connection to the service. An idle connection may be returned only
    /// if `reuse` is set. The returned flag tells whether it is a reused one.
    async fn connect(
        &self,
        service: &IcapServiceConfig,
        reuse: bool,
    ) -> io::Result<(Self::Stream, bool)>;

    /// Keep a connection that is clean to be used again.
    fn save_idle(&self, service: &IcapServiceConfig, stream: Self::Stream);
}

/// Bounded per service lists of idle connections.
pub struct IdleConnectionPool<S> {
    max_idle: usize,
    idle: Mutex<HashMap<String, VecDeque<S>>>,
}

impl<S> IdleConnectionPool<S> {
    pub fn new(max_idle: usize) -> Self {
        IdleConnectionPool {
            max_idle,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Take the most recently saved connection.
    pub fn take(&self, key: &str) -> Option<S> {
        let mut idle = self.idle.lock().unwrap();
        let list = idle.get_mut(key)?;
        let stream = list.pop_back();
        if list.is_empty() {
            idle.remove(key);
        }
        stream
    }

    /// Save the connection. The oldest one is dropped if the list is full.
    pub fn save(&self, key: &str, stream: S) {
        if self.max_idle == 0 {
            return;
        }
        let mut idle = self.idle.lock().unwrap();
        let list = idle.entry(key.to_string()).or_default();
        if list.len() >= self.max_idle {
            trace!("icap idle pool for {key} is full, dropping the oldest");
            list.pop_front();
        }
        list.push_back(stream);
    }

    pub fn idle_count(&self, key: &str) -> usize {
        let idle = self.idle.lock().unwrap();
        idle.get(key).map(|list| list.len()).unwrap_or_default()
    }
}

/// Plain TCP connections with an idle pool.
pub struct TcpConnectionProvider {
    pool: IdleConnectionPool<TcpStream>,
}

impl TcpConnectionProvider {
    pub fn new(max_idle: usize) -> Self {
        TcpConnectionProvider {
            pool: IdleConnectionPool::new(max_idle),
        }
    }
}

#[async_trait]
impl IcapConnectionProvider for TcpConnectionProvider {
    type Stream = TcpStream;

    async fn connect(
        &self,
        service: &IcapServiceConfig,
        reuse: bool,
    ) -> io::Result<(TcpStream, bool)> {
        if reuse {
            if let Some(stream) = self.pool.take(service.key()) {
                debug!("icap: reusing idle connection to {}", service.key());
                return Ok((stream, true));
            }
        }

        let stream = TcpStream::connect((service.host(), service.port())).await?;
        stream.set_nodelay(true)?;
        debug!(
            "icap: new connection to {} from {}",
            service.key(),
            stream.local_addr()?
        );
        Ok((stream, false))
    }

    fn save_idle(&self, service: &IcapServiceConfig, stream: TcpStream) {
        self.pool.save(service.key(), stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn idle_pool() {
        let pool = IdleConnectionPool::new(2);
        assert!(pool.take("a").is_none());

        // dropped once the list is full, so it must not expect any I/O
        pool.save("a", tokio_test::io::Builder::new().build());
        pool.save("a", tokio_test::io::Builder::new().read(b"2").build());
        pool.save("a", tokio_test::io::Builder::new().read(b"3").build());
        assert_eq!(pool.idle_count("a"), 2);
        assert_eq!(pool.idle_count("b"), 0);

        let mut buf = [0u8; 1];
        let mut stream = pool.take("a").unwrap();
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"3");

        let mut stream = pool.take("a").unwrap();
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"2");

        assert!(pool.take("a").is_none());
    }

    #[test]
    fn pool_disabled() {
        let pool = IdleConnectionPool::new(0);
        pool.save("a", tokio_test::io::Builder::new().build());
        assert_eq!(pool.idle_count("a"), 0);
    }
}
