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

//! Identity newtypes for traced entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a heap object, derived from object identity and never from content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// Identity of a class (type whose initializer can run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u64);

/// Identity of a host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

/// Identity of a declared field, static or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u64);

/// Global order key assigned at record time. The first assigned value is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNo(pub u64);

impl SequenceNo {
    pub const FIRST: SequenceNo = SequenceNo(1);

    pub fn next(self) -> Option<SequenceNo> {
        self.0.checked_add(1).map(SequenceNo)
    }
}

impl fmt::Display for SequenceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The three kinds of traced entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Object,
    Class,
    Thread,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Object => "object",
            NodeKind::Class => "class",
            NodeKind::Thread => "thread",
        }
    }
}

/// Typed identity of a node in the causality graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Object(ObjectId),
    Class(ClassId),
    Thread(ThreadId),
}

impl NodeId {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeId::Object(_) => NodeKind::Object,
            NodeId::Class(_) => NodeKind::Class,
            NodeId::Thread(_) => NodeKind::Thread,
        }
    }

    pub fn raw(&self) -> u64 {
        match self {
            NodeId::Object(id) => id.0,
            NodeId::Class(id) => id.0,
            NodeId::Thread(id) => id.0,
        }
    }

    pub fn as_class(&self) -> Option<ClassId> {
        match self {
            NodeId::Class(id) => Some(*id),
            _ => None,
        }
    }
}

/// Owner of a written field: the instance for an instance field, the
/// declaring class for a static one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldHolder {
    Object(ObjectId),
    Class(ClassId),
}

impl FieldHolder {
    pub fn is_static(&self) -> bool {
        matches!(self, FieldHolder::Class(_))
    }
}

impl From<FieldHolder> for NodeId {
    fn from(holder: FieldHolder) -> Self {
        match holder {
            FieldHolder::Object(id) => NodeId::Object(id),
            FieldHolder::Class(id) => NodeId::Class(id),
        }
    }
}

impl fmt::Display for FieldHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&NodeId::from(*self), f)
    }
}

impl From<ObjectId> for NodeId {
    fn from(id: ObjectId) -> Self {
        NodeId::Object(id)
    }
}

impl From<ClassId> for NodeId {
    fn from(id: ClassId) -> Self {
        NodeId::Class(id)
    }
}

impl From<ThreadId> for NodeId {
    fn from(id: ThreadId) -> Self {
        NodeId::Thread(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.raw())
    }
}

/// Parses the `kind:id` form produced by `Display`, e.g. `object:42`.
impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, raw) = s.split_once(':').ok_or_else(|| format!("expected <kind>:<id>, got '{s}'"))?;
        let raw: u64 = raw.trim().parse().map_err(|e| format!("invalid id '{raw}': {e}"))?;

        match kind.trim().to_ascii_lowercase().as_str() {
            "object" | "o" => Ok(NodeId::Object(ObjectId(raw))),
            "class" | "c" => Ok(NodeId::Class(ClassId(raw))),
            "thread" | "t" => Ok(NodeId::Thread(ThreadId(raw))),
            other => Err(format!("unknown node kind '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_parse() {
        let id = NodeId::Class(ClassId(7));
        assert_eq!(id.to_string(), "class:7");
        assert_eq!("class:7".parse::<NodeId>().unwrap(), id);
        assert_eq!("t:3".parse::<NodeId>().unwrap(), NodeId::Thread(ThreadId(3)));
        assert!("widget:1".parse::<NodeId>().is_err());
        assert!("object".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_field_holder_maps_to_node() {
        assert_eq!(NodeId::from(FieldHolder::Class(ClassId(4))), NodeId::Class(ClassId(4)));
        assert_eq!(FieldHolder::Object(ObjectId(9)).to_string(), "object:9");
        assert!(FieldHolder::Class(ClassId(4)).is_static());
    }

    #[test]
    fn test_sequence_next_saturates() {
        assert_eq!(SequenceNo::FIRST.next(), Some(SequenceNo(2)));
        assert_eq!(SequenceNo(u64::MAX).next(), None);
    }
}
