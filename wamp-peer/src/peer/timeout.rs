use std::{
    collections::BTreeSet,
    time::Duration,
};

use tokio::time::Instant;

use crate::core::{
    hash::HashMap,
    id::Id,
};

/// The instant `timeout` from now, or [`None`] if it lies beyond what [`Instant`] can represent.
pub fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Caller-side deadlines for outstanding calls.
///
/// Deadlines are kept in order so that a single timer, armed for [`Self::next_deadline`], covers
/// every call.
#[derive(Debug, Default)]
pub struct TimeoutScheduler {
    deadlines: BTreeSet<(Instant, Id)>,
    by_request: HashMap<Id, Instant>,
}

impl TimeoutScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a deadline for the request, replacing any earlier one.
    ///
    /// Returns false, scheduling nothing, if the timeout is too large to ever expire.
    pub fn add(&mut self, request_id: Id, timeout: Duration) -> bool {
        match deadline_after(timeout) {
            Some(deadline) => {
                self.add_deadline(request_id, deadline);
                true
            }
            None => {
                self.remove(request_id);
                false
            }
        }
    }

    pub fn add_deadline(&mut self, request_id: Id, deadline: Instant) {
        self.remove(request_id);
        self.deadlines.insert((deadline, request_id));
        self.by_request.insert(request_id, deadline);
    }

    /// Removes the deadline for the request.
    ///
    /// Returns true if a deadline was scheduled.
    pub fn remove(&mut self, request_id: Id) -> bool {
        match self.by_request.remove(&request_id) {
            Some(deadline) => self.deadlines.remove(&(deadline, request_id)),
            None => false,
        }
    }

    /// The earliest scheduled deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns every request whose deadline is at or before `now`, earliest first.
    pub fn expire(&mut self, now: Instant) -> Vec<Id> {
        let mut expired = Vec::new();
        while let Some((deadline, request_id)) = self.deadlines.first().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            self.by_request.remove(&request_id);
            expired.push(request_id);
        }
        expired
    }

    /// Drops every deadline without firing.
    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.by_request.clear();
    }

    pub fn len(&self) -> usize {
        self.by_request.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_request.is_empty()
    }
}

#[cfg(test)]
mod timeout_test {
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::{
        core::id::Id,
        peer::timeout::TimeoutScheduler,
    };

    fn id(value: u64) -> Id {
        Id::try_from(value).unwrap()
    }

    #[test]
    fn earliest_deadline_is_armed() {
        let now = Instant::now();
        let mut scheduler = TimeoutScheduler::new();
        scheduler.add_deadline(id(1), now + Duration::from_millis(300));
        assert_eq!(
            scheduler.next_deadline(),
            Some(now + Duration::from_millis(300))
        );
        scheduler.add_deadline(id(2), now + Duration::from_millis(100));
        assert_eq!(
            scheduler.next_deadline(),
            Some(now + Duration::from_millis(100))
        );
        assert!(scheduler.remove(id(2)));
        assert_eq!(
            scheduler.next_deadline(),
            Some(now + Duration::from_millis(300))
        );
        assert!(!scheduler.remove(id(2)));
    }

    #[test]
    fn expires_due_requests_in_order() {
        let now = Instant::now();
        let mut scheduler = TimeoutScheduler::new();
        scheduler.add_deadline(id(3), now + Duration::from_millis(30));
        scheduler.add_deadline(id(1), now + Duration::from_millis(10));
        scheduler.add_deadline(id(2), now + Duration::from_millis(20));
        assert_eq!(
            scheduler.expire(now + Duration::from_millis(25)),
            vec![id(1), id(2)]
        );
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.expire(now + Duration::from_millis(25)), Vec::<Id>::new());
    }

    #[test]
    fn rescheduling_replaces_deadline() {
        let now = Instant::now();
        let mut scheduler = TimeoutScheduler::new();
        scheduler.add_deadline(id(1), now + Duration::from_millis(10));
        scheduler.add_deadline(id(1), now + Duration::from_millis(50));
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.expire(now + Duration::from_millis(20)), Vec::<Id>::new());
        assert_eq!(
            scheduler.expire(now + Duration::from_millis(50)),
            vec![id(1)]
        );
    }

    #[test]
    fn clear_drops_everything() {
        let mut scheduler = TimeoutScheduler::new();
        assert!(scheduler.add(id(1), Duration::from_secs(1)));
        scheduler.clear();
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }

    #[test]
    fn unrepresentable_timeout_never_expires() {
        let mut scheduler = TimeoutScheduler::new();
        assert!(scheduler.add(id(1), Duration::from_millis(10)));
        assert!(!scheduler.add(id(1), Duration::MAX));
        assert!(scheduler.is_empty());
        assert_eq!(scheduler.next_deadline(), None);
    }
}
