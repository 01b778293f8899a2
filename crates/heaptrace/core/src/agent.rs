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

//! Process-wide access point for the installed trace session.
//!
//! Instrumented host code and the C entry points find the session here
//! instead of threading it through every call.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{TraceError, TraceResult};
use crate::graph::GraphStats;
use crate::hooks::TraceHooks;
use crate::session::TraceSession;

pub type AgentHooks = TraceHooks<Arc<TraceSession>>;

static AGENT: RwLock<Option<Arc<AgentHooks>>> = parking_lot::const_rwlock(None);

/// Keeps a session installed. Dropping it closes and uninstalls the session,
/// unless it was already replaced.
#[must_use = "dropping the guard uninstalls the session"]
#[derive(Debug)]
pub struct AgentGuard {
    session: Arc<TraceSession>,
}

impl AgentGuard {
    pub fn session(&self) -> &Arc<TraceSession> {
        &self.session
    }
}

impl Drop for AgentGuard {
    fn drop(&mut self) {
        let installed = {
            let mut agent = AGENT.write();
            match agent.as_ref() {
                Some(hooks) if Arc::ptr_eq(hooks.recorder(), &self.session) => agent.take(),
                _ => None,
            }
        };
        if installed.is_some() {
            info!("Trace agent uninstalled");
            if let Err(err) = self.session.close() {
                warn!("Closing trace session on uninstall failed: {}", err);
            }
        }
    }
}

pub fn install(session: Arc<TraceSession>) -> TraceResult<AgentGuard> {
    let mut agent = AGENT.write();
    if agent.is_some() {
        return Err(TraceError::AgentAlreadyInstalled);
    }
    *agent = Some(Arc::new(TraceHooks::new(Arc::clone(&session))));
    info!("Trace agent installed");
    Ok(AgentGuard { session })
}

pub fn current() -> Option<Arc<TraceSession>> {
    AGENT.read().as_ref().map(|hooks| Arc::clone(hooks.recorder()))
}

/// Hooks of the installed session.
pub fn hooks() -> Option<Arc<AgentHooks>> {
    AGENT.read().clone()
}

/// Uninstalls and closes the current session. Returns its final stats, or
/// `None` when nothing was installed.
pub fn dispose() -> TraceResult<Option<GraphStats>> {
    let Some(hooks) = AGENT.write().take() else {
        return Ok(None);
    };
    info!("Trace agent disposed");
    hooks.recorder().close().map(Some)
}
