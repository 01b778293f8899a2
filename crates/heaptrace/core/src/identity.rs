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

//! Stable identities for host objects, classes and threads.
//!
//! Producers on arbitrary threads ask for identities concurrently; the same
//! host handle always maps to the same id until it is released.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::event::{ClassId, FieldId, ObjectId, ThreadId};

/// Concurrent, idempotent handle-to-id map.
#[derive(Debug)]
pub struct IdentityRegistry<K: Eq + Hash> {
    ids: DashMap<K, u64>,
    next: AtomicU64,
}

impl<K: Eq + Hash> Default for IdentityRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> IdentityRegistry<K> {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            ids: DashMap::new(),
            next: AtomicU64::new(first),
        }
    }

    /// Returns the id for `key`, assigning a fresh one on first sight.
    pub fn identify(&self, key: K) -> u64 {
        // The entry guard holds the shard lock, so two racing callers cannot
        // both assign.
        *self.ids.entry(key).or_insert_with(|| self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn lookup(&self, key: &K) -> Option<u64> {
        self.ids.get(key).map(|id| *id)
    }

    /// Forgets `key`. A later `identify` of an equal key gets a new id.
    pub fn release(&self, key: &K) -> Option<u64> {
        self.ids.remove(key).map(|(_, id)| id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Identity registries for the traced entities of one process.
///
/// Ids start at 1; 0 is left free as the "no identity" value for foreign
/// callers.
#[derive(Debug)]
pub struct HostIdentities {
    objects: IdentityRegistry<usize>,
    classes: IdentityRegistry<String>,
    fields: IdentityRegistry<(ClassId, String)>,
    threads: IdentityRegistry<std::thread::ThreadId>,
}

impl Default for HostIdentities {
    fn default() -> Self {
        Self::new()
    }
}

impl HostIdentities {
    pub fn new() -> Self {
        Self {
            objects: IdentityRegistry::starting_at(1),
            classes: IdentityRegistry::starting_at(1),
            fields: IdentityRegistry::starting_at(1),
            threads: IdentityRegistry::starting_at(1),
        }
    }

    /// Identity of a live object, keyed by its address.
    pub fn object<T: ?Sized>(&self, object: &T) -> ObjectId {
        ObjectId(self.objects.identify(address_of(object)))
    }

    /// Identity of an object known only by its raw address (foreign handles).
    pub fn object_at(&self, address: usize) -> ObjectId {
        ObjectId(self.objects.identify(address))
    }

    /// Called when the host frees `object`; its address may be reused later.
    pub fn release_object<T: ?Sized>(&self, object: &T) -> Option<ObjectId> {
        self.objects.release(&address_of(object)).map(ObjectId)
    }

    pub fn release_object_at(&self, address: usize) -> Option<ObjectId> {
        self.objects.release(&address).map(ObjectId)
    }

    /// Identity of a class, keyed by its fully qualified name.
    pub fn class(&self, name: &str) -> ClassId {
        ClassId(self.classes.identify(name.to_string()))
    }

    /// Identity of a field, keyed by its declaring class and name.
    pub fn field(&self, class_id: ClassId, name: &str) -> FieldId {
        FieldId(self.fields.identify((class_id, name.to_string())))
    }

    pub fn thread(&self, thread: std::thread::ThreadId) -> ThreadId {
        ThreadId(self.threads.identify(thread))
    }

    pub fn current_thread(&self) -> ThreadId {
        self.thread(std::thread::current().id())
    }
}

fn address_of<T: ?Sized>(object: &T) -> usize {
    (object as *const T).cast::<()>() as usize
}
