// Heaptrace
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Trace session configuration

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{TraceError, TraceResult};
use crate::persistence::LogFormat;

/// Where queued events are turned into graph updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Producers drain opportunistically after recording, when the builder
    /// is free.
    Inline,
    /// A dedicated drain thread pulls on an interval.
    Background,
}

impl FromStr for DrainMode {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(DrainMode::Inline),
            "background" => Ok(DrainMode::Background),
            other => Err(TraceError::InvalidConfig(format!("unknown drain mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub queue_capacity: usize,
    /// Highest sequence number the session will hand out
    pub sequence_limit: u64,
    pub reorder_window: usize,
    pub drain_mode: DrainMode,
    pub drain_interval: Duration,
    /// Event log written on close
    pub persist_path: Option<PathBuf>,
    /// Overrides the format implied by `persist_path`'s extension
    pub log_format: Option<LogFormat>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 65_536,
            sequence_limit: u64::MAX,
            reorder_window: 16_384,
            drain_mode: DrainMode::Background,
            drain_interval: Duration::from_millis(5),
            persist_path: None,
            log_format: None,
        }
    }
}

impl TraceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `HEAPTRACE_*` keys. Unparseable values are ignored with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(value) = parse_var(&lookup, "HEAPTRACE_QUEUE_CAPACITY") {
            config.queue_capacity = value;
        }
        if let Some(value) = parse_var(&lookup, "HEAPTRACE_SEQUENCE_LIMIT") {
            config.sequence_limit = value;
        }
        if let Some(value) = parse_var(&lookup, "HEAPTRACE_REORDER_WINDOW") {
            config.reorder_window = value;
        }
        if let Some(value) = parse_var(&lookup, "HEAPTRACE_DRAIN_MODE") {
            config.drain_mode = value;
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "HEAPTRACE_DRAIN_INTERVAL_MS") {
            config.drain_interval = Duration::from_millis(millis);
        }
        if let Some(path) = lookup("HEAPTRACE_LOG_PATH").filter(|p| !p.is_empty()) {
            config.persist_path = Some(PathBuf::from(path));
        }
        if let Some(format) = parse_var(&lookup, "HEAPTRACE_LOG_FORMAT") {
            config.log_format = Some(format);
        }

        config
    }

    pub fn validate(&self) -> TraceResult<()> {
        if self.queue_capacity == 0 {
            return Err(TraceError::InvalidConfig("queue_capacity must be greater than zero".to_string()));
        }
        if self.reorder_window == 0 {
            return Err(TraceError::InvalidConfig("reorder_window must be greater than zero".to_string()));
        }
        if self.sequence_limit == 0 {
            return Err(TraceError::InvalidConfig("sequence_limit must be greater than zero".to_string()));
        }
        if self.drain_mode == DrainMode::Background && self.drain_interval.is_zero() {
            return Err(TraceError::InvalidConfig("drain_interval must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Format the close-time log is written in, if one is configured.
    pub fn effective_log_format(&self) -> Option<LogFormat> {
        let path = self.persist_path.as_deref()?;
        Some(self.log_format.unwrap_or_else(|| LogFormat::from_path(path)))
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_sequence_limit(mut self, limit: u64) -> Self {
        self.sequence_limit = limit;
        self
    }

    pub fn with_reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = window;
        self
    }

    pub fn with_drain_mode(mut self, mode: DrainMode) -> Self {
        self.drain_mode = mode;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_persist_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}
