/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;
use std::time::Duration;

use crate::launcher::{IcapRepeatStatusList, RepeatCheck};

#[cfg(feature = "yaml")]
mod yaml;
#[cfg(feature = "yaml")]
pub use yaml::{load_service_config, load_xact_config};

const DEFAULT_BACKUP_LIMIT: usize = 64 * 1024;
const DEFAULT_READ_BUFFER_LIMIT: usize = 64 * 1024;
const DEFAULT_CLIENT_USERNAME_HEADER: &str = "X-Client-Username";

/// Settings shared by all modification transactions.
#[derive(Clone, Debug)]
pub struct IcapXactConfig {
    pub(crate) preview_enable: bool,
    pub(crate) reuse_connections: bool,
    pub(crate) send_client_ip: bool,
    pub(crate) send_client_username: bool,
    pub(crate) client_username_header: String,
    pub(crate) client_username_encode: bool,
    pub(crate) shared_header_name: Option<String>,
    pub(crate) backup_limit: usize,
    pub(crate) read_buffer_limit: usize,
    pub(crate) repeat_limit: u32,
    pub(crate) repeat_status: Option<Vec<u16>>,
    pub(crate) io_timeout: Duration,
}

impl Default for IcapXactConfig {
    fn default() -> Self {
        IcapXactConfig {
            preview_enable: true,
            reuse_connections: true,
            send_client_ip: false,
            send_client_username: false,
            client_username_header: DEFAULT_CLIENT_USERNAME_HEADER.to_string(),
            client_username_encode: false,
            shared_header_name: None,
            backup_limit: DEFAULT_BACKUP_LIMIT,
            read_buffer_limit: DEFAULT_READ_BUFFER_LIMIT,
            repeat_limit: 0,
            repeat_status: None,
            io_timeout: Duration::from_secs(60),
        }
    }
}

impl IcapXactConfig {
    pub fn set_preview_enable(&mut self, enable: bool) {
        self.preview_enable = enable;
    }

    pub fn set_reuse_connections(&mut self, reuse: bool) {
        self.reuse_connections = reuse;
    }

    pub fn set_send_client_ip(&mut self, send: bool) {
        self.send_client_ip = send;
    }

    pub fn set_send_client_username(&mut self, send: bool) {
        self.send_client_username = send;
    }

    pub fn set_client_username_header(&mut self, name: &str) {
        self.client_username_header = name.to_string();
    }

    pub fn set_client_username_encode(&mut self, encode: bool) {
        self.client_username_encode = encode;
    }

    pub fn set_shared_header_name(&mut self, name: &str) {
        self.shared_header_name = Some(name.to_string());
    }

    /// The largest virgin body that may be kept for echo or retry.
    ///
    /// It is also the capacity of the body pipes created for adaptation, and
    /// it must not exceed the capacity of the virgin body pipe.
    pub fn set_backup_limit(&mut self, limit: usize) {
        self.backup_limit = limit;
    }

    /// The read buffer size above which no more reply bytes are read.
    ///
    /// An incomplete head or chunk line is still read up to the service
    /// `max_header_size`.
    pub fn set_read_buffer_limit(&mut self, limit: usize) {
        self.read_buffer_limit = limit;
    }

    pub fn set_repeat_limit(&mut self, limit: u32) {
        self.repeat_limit = limit;
    }

    pub fn set_repeat_status(&mut self, codes: Vec<u16>) {
        self.repeat_status = Some(codes);
    }

    pub fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    #[inline]
    pub fn backup_limit(&self) -> usize {
        self.backup_limit
    }

    #[inline]
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    #[inline]
    pub fn repeat_limit(&self) -> u32 {
        self.repeat_limit
    }

    pub fn repeat_check(&self) -> Option<Arc<dyn RepeatCheck>> {
        self.repeat_status
            .as_ref()
            .map(|codes| Arc::new(IcapRepeatStatusList::new(codes.clone())) as Arc<dyn RepeatCheck>)
    }
}
