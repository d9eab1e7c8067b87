use crate::{
    core::{
        cancel::CallCancelMode,
        hash::HashMap,
        id::Id,
    },
    message::message::RequestKey,
};

/// Where a reply was delivered in the [`Registry`].
#[derive(Debug)]
pub enum Delivery<'a, T> {
    /// A progressive result for a multi-shot entry, which stays pending.
    Progress(&'a mut T),
    /// A terminal reply. The entry is no longer pending.
    Final(T),
}

/// The result of canceling a request in the [`Registry`].
#[derive(Debug)]
pub enum CancelOutcome<T> {
    /// Nothing is pending under the key.
    NotPending,
    /// The request is pending.
    Pending {
        /// CANCEL should be sent to the router.
        send_cancel: bool,
        /// The entry removed by the cancellation, which should be completed as canceled.
        completed: Option<T>,
    },
}

/// Outstanding requests, keyed by the kind and ID of the request.
///
/// One-shot entries are completed by the first reply. Multi-shot entries stay pending through
/// progressive results and are completed by the first terminal reply.
#[derive(Debug)]
pub struct Registry<T> {
    one_shot: HashMap<RequestKey, T>,
    multi_shot: HashMap<RequestKey, T>,
    /// Number of pending entries per request ID, across every kind.
    request_ids: HashMap<Id, usize>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            one_shot: HashMap::default(),
            multi_shot: HashMap::default(),
            request_ids: HashMap::default(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pending request.
    ///
    /// Returns the entry previously pending under the same key, which must be completed as
    /// canceled by the caller.
    pub fn insert(&mut self, key: RequestKey, entry: T, multi_shot: bool) -> Option<T> {
        let displaced = self.remove(&key);
        *self.request_ids.entry(key.request_id).or_default() += 1;
        if multi_shot {
            self.multi_shot.insert(key, entry);
        } else {
            self.one_shot.insert(key, entry);
        }
        displaced
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.one_shot.contains_key(key) || self.multi_shot.contains_key(key)
    }

    /// Checks if any request of any kind is pending under the ID.
    pub fn has_request_id(&self, request_id: Id) -> bool {
        self.request_ids.contains_key(&request_id)
    }

    pub fn get_mut(&mut self, key: &RequestKey) -> Option<&mut T> {
        match self.one_shot.get_mut(key) {
            Some(entry) => Some(entry),
            None => self.multi_shot.get_mut(key),
        }
    }

    /// Routes a reply to its pending entry.
    ///
    /// A progressive reply only reaches multi-shot entries, and leaves them pending.
    pub fn route(&mut self, key: &RequestKey, progressive: bool) -> Option<Delivery<'_, T>> {
        if progressive {
            return self.multi_shot.get_mut(key).map(Delivery::Progress);
        }
        self.remove(key).map(Delivery::Final)
    }

    pub fn remove(&mut self, key: &RequestKey) -> Option<T> {
        let entry = match self.one_shot.remove(key) {
            Some(entry) => entry,
            None => self.multi_shot.remove(key)?,
        };
        if let Some(count) = self.request_ids.get_mut(&key.request_id) {
            *count -= 1;
            if *count == 0 {
                self.request_ids.remove(&key.request_id);
            }
        }
        Some(entry)
    }

    /// Cancels a pending request.
    ///
    /// In [`CallCancelMode::Kill`] mode, the entry stays pending until the router answers.
    pub fn cancel(&mut self, key: &RequestKey, mode: CallCancelMode) -> CancelOutcome<T> {
        if !self.contains(key) {
            return CancelOutcome::NotPending;
        }
        let completed = if mode.completes_locally() {
            self.remove(key)
        } else {
            None
        };
        CancelOutcome::Pending {
            send_cancel: mode.sends_cancel(),
            completed,
        }
    }

    /// Removes every pending entry.
    pub fn drain(&mut self) -> Vec<T> {
        self.request_ids.clear();
        self.one_shot
            .drain()
            .chain(self.multi_shot.drain())
            .map(|(_, entry)| entry)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.one_shot.len() + self.multi_shot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
