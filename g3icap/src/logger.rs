/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::io::{self, Write};

use chrono::Local;
use log::{Level as LogLevel, SetLoggerError};
use slog::{Drain, Key, Level, Logger, OwnedKVList, Record, Serializer, KV, slog_o};
use slog_scope::GlobalLoggerGuard;

/// Plain text logging to stderr, one line per record.
pub(crate) struct SyncLogger {
    level: Level,
}

impl SyncLogger {
    pub(crate) fn new(verbose_level: u8) -> Self {
        let level = match verbose_level {
            0 => Level::Warning,
            1 => Level::Info,
            2 => Level::Debug,
            _ => Level::Trace,
        };
        SyncLogger { level }
    }

    fn log_level(&self) -> LogLevel {
        match self.level {
            Level::Critical | Level::Error => LogLevel::Error,
            Level::Warning => LogLevel::Warn,
            Level::Info => LogLevel::Info,
            Level::Debug => LogLevel::Debug,
            Level::Trace => LogLevel::Trace,
        }
    }

    /// Install as the global logger, and route the `log` macros to it.
    ///
    /// The guard must be kept alive until the process exits.
    pub(crate) fn into_global_logger(self) -> Result<GlobalLoggerGuard, SetLoggerError> {
        let log_level = self.log_level();
        let logger = Logger::root(self.fuse(), slog_o!());
        let guard = slog_scope::set_global_logger(logger);
        slog_stdlog::init_with_level(log_level)?;
        Ok(guard)
    }
}

struct KvFormatter<'a> {
    buf: &'a mut Vec<u8>,
}

impl Serializer for KvFormatter<'_> {
    fn emit_arguments(&mut self, key: Key, val: &fmt::Arguments<'_>) -> slog::Result {
        write!(self.buf, " {key}: {val},")?;
        Ok(())
    }
}

impl Drain for SyncLogger {
    type Ok = ();
    type Err = io::Error;

    fn log(&self, record: &Record<'_>, values: &OwnedKVList) -> io::Result<()> {
        if !record.level().is_at_least(self.level) {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(256);
        write!(
            buf,
            "{} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            record.level().as_short_str()
        )?;

        let mut formatter = KvFormatter { buf: &mut buf };
        record
            .kv()
            .serialize(record, &mut formatter)
            .and_then(|_| values.serialize(record, &mut formatter))
            .map_err(|e| io::Error::other(e.to_string()))?;

        let msg = record.msg().to_string();
        if msg.is_empty() {
            buf.extend_from_slice(b" ()\n");
        } else {
            writeln!(buf, " {msg}")?;
        }
        io::stderr().lock().write_all(&buf)
    }
}
