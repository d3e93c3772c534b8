//! Persisted identity of the current user.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::storage::{Storage, StorageKey};

/// Identity that flag requests are evaluated for.
pub trait IdentitySource: Send + Sync {
    fn distinct_id(&self) -> String;
    fn anonymous_id(&self) -> String;
    fn groups(&self) -> HashMap<String, String>;
}

/// Result of [`IdentityManager::identify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identified {
    /// Anonymous id before the call.
    pub anonymous_id: String,
    /// Id events were attributed to before the call.
    pub previous: String,
    pub changed: bool,
}

struct IdentityState {
    distinct_id: Option<String>,
    anonymous_id: String,
    groups: HashMap<String, String>,
}

/// Distinct id, anonymous id and groups, persisted across restarts.
///
/// Until [`identify`](Self::identify) is called the distinct id is the
/// anonymous id, which is generated on first use.
pub struct IdentityManager {
    storage: Arc<Storage>,
    state: RwLock<IdentityState>,
}

impl IdentityManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        let anonymous_id = match storage.get_json::<String>(StorageKey::AnonymousId) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                storage.set_json(StorageKey::AnonymousId, &id);
                id
            }
        };

        let state = IdentityState {
            distinct_id: storage.get_json(StorageKey::DistinctId),
            anonymous_id,
            groups: storage
                .get_json(StorageKey::Groups)
                .unwrap_or_default(),
        };

        Self {
            storage,
            state: RwLock::new(state),
        }
    }

    /// Switch to `distinct_id`.
    ///
    /// When the id changes, the id events were attributed to before becomes
    /// the anonymous id, so the next `$identify` links the two users.
    pub fn identify(&self, distinct_id: impl Into<String>) -> Identified {
        let distinct_id = distinct_id.into();
        let (outcome, distinct_ticket, anonymous_ticket) = {
            let mut state = self.state.write();
            let anonymous_id = state.anonymous_id.clone();
            let previous = state
                .distinct_id
                .replace(distinct_id.clone())
                .unwrap_or_else(|| anonymous_id.clone());
            let changed = previous != distinct_id;

            let anonymous_ticket = if changed && previous != anonymous_id {
                state.anonymous_id = previous.clone();
                Some(self.storage.ticket(StorageKey::AnonymousId))
            } else {
                None
            };

            let outcome = Identified {
                anonymous_id,
                previous,
                changed,
            };
            (
                outcome,
                self.storage.ticket(StorageKey::DistinctId),
                anonymous_ticket,
            )
        };

        self.storage.write_json(distinct_ticket, &distinct_id);
        if let Some(ticket) = anonymous_ticket {
            self.storage.write_json(ticket, &outcome.previous);
        }
        tracing::debug!("Identified as {}", distinct_id);
        outcome
    }

    /// Associate the user with `group_key` in `group_type`.
    pub fn group(&self, group_type: impl Into<String>, group_key: impl Into<String>) {
        let (groups, ticket) = {
            let mut state = self.state.write();
            state.groups.insert(group_type.into(), group_key.into());
            (state.groups.clone(), self.storage.ticket(StorageKey::Groups))
        };
        self.storage.write_json(ticket, &groups);
    }

    /// Forget the identified user and start over with a fresh anonymous id.
    pub fn reset(&self) {
        let anonymous_id = Uuid::new_v4().to_string();
        let tickets = {
            let mut state = self.state.write();
            state.distinct_id = None;
            state.groups.clear();
            state.anonymous_id = anonymous_id.clone();
            [
                self.storage.ticket(StorageKey::DistinctId),
                self.storage.ticket(StorageKey::Groups),
                self.storage.ticket(StorageKey::AnonymousId),
            ]
        };

        let [distinct, groups, anonymous] = tickets;
        self.storage.write_remove(distinct);
        self.storage.write_remove(groups);
        self.storage.write_json(anonymous, &anonymous_id);
        tracing::debug!("Identity reset to anonymous");
    }

    pub fn is_identified(&self) -> bool {
        self.state.read().distinct_id.is_some()
    }
}

impl IdentitySource for IdentityManager {
    fn distinct_id(&self) -> String {
        let state = self.state.read();
        state
            .distinct_id
            .clone()
            .unwrap_or_else(|| state.anonymous_id.clone())
    }

    fn anonymous_id(&self) -> String {
        self.state.read().anonymous_id.clone()
    }

    fn groups(&self) -> HashMap<String, String> {
        self.state.read().groups.clone()
    }
}
