//! The process-wide link registry (spec §3, §4.2).
//!
//! The registry holds a strong reference to every link that currently
//! participates in it, partitioned into three cheap membership sets: all
//! non-finished links ("active"), the subset of those that are
//! `LISTENING`, and links that have finished (closed or errored) but not
//! yet been unregistered. This is the idiomatic replacement for the
//! C original's three `smartlist_t`s (spec §9): a strong [`Link`] clone is
//! what keeps a registered link alive, so "unregister, then drop the last
//! ref" is ordinary `Arc` teardown rather than a manual free.
//!
//! Accessed only from the main thread (spec §5).

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::id::LinkId;
use crate::link::Link;
use crate::state::LinkState;

/// Process-wide storage for all currently-registered links.
static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::new()));

/// The registry of all registered links, and the accessors the link state
/// machine uses to keep membership in sync with `state` (spec §3
/// invariants).
#[derive(Default)]
pub struct Registry {
    /// All non-finished registered links, keyed by id.
    active: HashMap<LinkId, Link>,
    /// The subset of `active` that is currently `LISTENING`.
    listening: HashMap<LinkId, Link>,
    /// Registered links that have reached `CLOSED`/`ERROR` but have not
    /// yet been unregistered.
    finished: HashMap<LinkId, Link>,
}

impl Registry {
    /// Construct an empty registry.
    fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the process-wide registry.
    pub fn with_global<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut guard = REGISTRY.lock().expect("link registry poisoned");
        f(&mut guard)
    }

    /// Add `link` to the registry, in the partition appropriate for its
    /// current state. Idempotent: re-registering an already-registered
    /// link updates its partition rather than duplicating it.
    pub(crate) fn insert(&mut self, link: &Link) {
        let id = link.id();
        self.finished.remove(&id);
        self.listening.remove(&id);
        self.active.remove(&id);
        match link.state() {
            LinkState::Closed | LinkState::Error => {
                self.finished.insert(id, link.clone());
            }
            state => {
                self.active.insert(id, link.clone());
                if state == LinkState::Listening {
                    self.listening.insert(id, link.clone());
                }
            }
        }
    }

    /// Move `id` into whichever partition matches `new_state`. Called by
    /// the state machine on every successful transition of a registered
    /// link.
    pub(crate) fn reclassify(&mut self, id: LinkId, new_state: LinkState) {
        let link = self
            .active
            .remove(&id)
            .or_else(|| self.listening.remove(&id))
            .or_else(|| self.finished.remove(&id));
        let Some(link) = link else { return };
        match new_state {
            LinkState::Closed | LinkState::Error => {
                self.finished.insert(id, link);
            }
            state => {
                self.active.insert(id, link.clone());
                if state == LinkState::Listening {
                    self.listening.insert(id, link);
                }
            }
        }
    }

    /// Remove `id` from every partition. Returns true if it was present.
    pub(crate) fn remove(&mut self, id: LinkId) -> bool {
        let was_active = self.active.remove(&id).is_some();
        let was_listening = self.listening.remove(&id).is_some();
        let was_finished = self.finished.remove(&id).is_some();
        was_active || was_listening || was_finished
    }

    /// Return true if `id` is present in any partition.
    pub fn contains(&self, id: LinkId) -> bool {
        self.active.contains_key(&id) || self.listening.contains_key(&id) || self.finished.contains_key(&id)
    }

    /// Number of active (non-finished) links, for diagnostics and tests.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of listening links, for diagnostics and tests.
    pub fn listening_count(&self) -> usize {
        self.listening.len()
    }

    /// Number of finished-but-not-yet-unregistered links, for diagnostics
    /// and tests.
    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }
}
