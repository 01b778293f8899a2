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

//! Event log files.
//!
//! A log is the ordered event sequence of one session, written once at close.
//! Replaying it through a fresh builder rebuilds the same graph.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{TraceError, TraceResult};
use crate::event::TraceEvent;
use crate::graph::{CausalGraph, replay};

/// On-disk encoding of an event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// One JSON object per line
    JsonLines,
    /// bincode, standard config, a single `Vec<TraceEvent>`
    Binary,
}

impl LogFormat {
    /// `.jsonl` and `.json` are JSON Lines; anything else is binary.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("json") => LogFormat::JsonLines,
            _ => LogFormat::Binary,
        }
    }
}

impl FromStr for LogFormat {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" | "json" | "json-lines" | "jsonlines" => Ok(LogFormat::JsonLines),
            "binary" | "bin" | "bincode" => Ok(LogFormat::Binary),
            other => Err(TraceError::InvalidConfig(format!("unknown log format '{other}'"))),
        }
    }
}

/// Writes `events` to `path`, creating parent directories as needed.
pub fn save_log(path: &Path, events: &[TraceEvent], format: LogFormat) -> TraceResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    match format {
        LogFormat::JsonLines => {
            let mut writer = BufWriter::new(File::create(path)?);
            for event in events {
                serde_json::to_writer(&mut writer, event).map_err(|e| TraceError::Serialization(e.to_string()))?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        LogFormat::Binary => {
            let bytes = bincode::serde::encode_to_vec(events, bincode::config::standard()).map_err(|e| TraceError::Serialization(e.to_string()))?;
            fs::write(path, bytes)?;
        }
    }

    info!("Saved {} events to {} ({:?})", events.len(), path.display(), format);
    Ok(())
}

/// Reads a log written by [`save_log`]. Blank lines in JSON Lines logs are
/// skipped.
pub fn load_log(path: &Path, format: LogFormat) -> TraceResult<Vec<TraceEvent>> {
    let events = match format {
        LogFormat::JsonLines => {
            let reader = BufReader::new(File::open(path)?);
            let mut events = Vec::new();
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event = serde_json::from_str(&line).map_err(|e| TraceError::Serialization(format!("line {}: {}", line_no + 1, e)))?;
                events.push(event);
            }
            events
        }
        LogFormat::Binary => {
            let bytes = fs::read(path)?;
            let (events, _): (Vec<TraceEvent>, usize) =
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).map_err(|e| TraceError::Serialization(e.to_string()))?;
            events
        }
    };

    debug!("Loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

/// Loads a log, picking the format from the file extension, and replays it.
pub fn load_graph(path: &Path) -> TraceResult<CausalGraph> {
    let events = load_log(path, LogFormat::from_path(path))?;
    Ok(replay(events))
}
