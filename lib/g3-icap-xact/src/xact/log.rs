/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::time::Duration;

use slog::{Logger, Record, Serializer, Value, slog_info};

use super::XactOutcome;
use crate::service::IcapServiceConfig;

struct LtDuration(Duration);

impl Value for LtDuration {
    fn serialize(
        &self,
        _record: &Record,
        key: slog::Key,
        serializer: &mut dyn Serializer,
    ) -> slog::Result {
        if self.0.is_zero() {
            serializer.emit_none(key)
        } else {
            serializer.emit_arguments(key, &format_args!("{:.3?}", self.0))
        }
    }
}

pub(crate) struct XactLog<'a> {
    pub(crate) logger: &'a Logger,
    pub(crate) xact_id: u64,
    pub(crate) service: &'a IcapServiceConfig,
    pub(crate) attempt: u32,
    pub(crate) outcome: XactOutcome,
    pub(crate) icap_status: Option<u16>,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_read: u64,
    pub(crate) http_header_size: Option<usize>,
    pub(crate) http_body_size: Option<u64>,
    pub(crate) total_time: Duration,
}

impl XactLog<'_> {
    pub(crate) fn log(&self, stop_reason: Option<&str>) {
        slog_info!(self.logger, "";
            "xact_id" => self.xact_id,
            "icap_method" => self.service.method().as_str(),
            "icap_service" => self.service.key(),
            "icap_uri" => self.service.uri(),
            "attempt" => self.attempt,
            "outcome" => self.outcome.as_str(),
            "icap_status" => self.icap_status,
            "bytes_sent" => self.bytes_sent,
            "bytes_read" => self.bytes_read,
            "http_header_size" => self.http_header_size,
            "http_body_size" => self.http_body_size,
            "stop_reason" => stop_reason,
            "total_time" => LtDuration(self.total_time),
        )
    }
}
