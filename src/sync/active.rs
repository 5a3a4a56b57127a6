//! Registry of remotes currently being reconciled.
//!
//! Being registered is the permission to keep going: removing a name fires
//! its cancellation token, and the running sync stops at its next
//! checkpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct ActiveEntry {
    registration_id: u64,
    token: CancellationToken,
}

#[derive(Clone, Default)]
pub struct ActiveSyncs {
    entries: Arc<Mutex<HashMap<String, ActiveEntry>>>,
    next_id: Arc<AtomicU64>,
}

impl ActiveSyncs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` unless it is already active. Check and insert happen
    /// under one lock.
    pub fn try_begin(&self, name: &str) -> Option<SyncRegistration> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(name) {
            return None;
        }

        let registration_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        entries.insert(
            name.to_string(),
            ActiveEntry {
                registration_id,
                token: token.clone(),
            },
        );

        Some(SyncRegistration {
            name: name.to_string(),
            registration_id,
            token,
            registry: self.clone(),
        })
    }

    /// Unregisters `name` and signals its sync to stop. Returns false if it
    /// was not active.
    pub fn cancel(&self, name: &str) -> bool {
        let removed = self.entries.lock().unwrap().remove(name);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let drained: Vec<ActiveEntry> = self
            .entries
            .lock()
            .unwrap()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in drained {
            entry.token.cancel();
        }
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.entries.lock().unwrap().contains_key(name)
    }

    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Held by a running sync. Dropping it unregisters the name, unless the
/// name was cancelled and registered again in the meantime.
pub struct SyncRegistration {
    name: String,
    registration_id: u64,
    token: CancellationToken,
    registry: ActiveSyncs,
}

impl SyncRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SyncRegistration {
    fn drop(&mut self) {
        let mut entries = self.registry.entries.lock().unwrap();
        if entries
            .get(&self.name)
            .map(|entry| entry.registration_id == self.registration_id)
            .unwrap_or(false)
        {
            entries.remove(&self.name);
        }
    }
}
