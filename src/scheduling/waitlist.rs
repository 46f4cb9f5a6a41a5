use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{info, instrument};
use uuid::Uuid;

use super::clock::Clock;
use super::error::{SchedulingError, SchedulingResult};
use super::model::{ProcedureType, Slot};

pub const MIN_PRIORITY: i16 = 0;
pub const MAX_PRIORITY: i16 = 10;

/// Stored as smallint: 0 active, 1 notified, 2 expired, 3 fulfilled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum WaitingStatus {
    Active = 0,
    Notified = 1,
    Expired = 2,
    Fulfilled = 3,
}

impl WaitingStatus {
    /// Statuses still waiting for a slot.
    pub const OPEN: [WaitingStatus; 2] = [WaitingStatus::Active, WaitingStatus::Notified];

    pub fn as_str(self) -> &'static str {
        match self {
            WaitingStatus::Active => "ACTIVE",
            WaitingStatus::Notified => "NOTIFIED",
            WaitingStatus::Expired => "EXPIRED",
            WaitingStatus::Fulfilled => "FULFILLED",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WaitingEntry {
    pub entry_id: Uuid,
    pub patient_id: Uuid,
    pub preferred_dentist_id: Option<Uuid>,
    pub preferred_date: Option<NaiveDate>,
    pub preferred_start: Option<NaiveTime>,
    pub preferred_end: Option<NaiveTime>,
    pub procedure_type: ProcedureType,
    pub priority: i16,
    pub flexible_dentist: bool,
    pub flexible_time: bool,
    pub status: WaitingStatus,
    pub notes: Option<String>,
    pub appointment_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl WaitingEntry {
    /// Whether a freed slot satisfies this entry's constraints.
    pub fn accepts(&self, slot: &Slot) -> bool {
        if let Some(dentist) = self.preferred_dentist_id {
            if !self.flexible_dentist && dentist != slot.dentist_id {
                return false;
            }
        }

        if !self.flexible_time {
            if let Some(date) = self.preferred_date {
                if date != slot.date {
                    return false;
                }
            }
            if let Some(start) = self.preferred_start {
                if slot.start < start {
                    return false;
                }
            }
            if let Some(end) = self.preferred_end {
                if slot.end > end {
                    return false;
                }
            }
        }

        true
    }
}

/// Queue order: priority desc, then submission time asc, then id.
pub fn queue_order(a: &WaitingEntry, b: &WaitingEntry) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.entry_id.cmp(&b.entry_id))
}

/// An entry taken off the queue, already FULFILLED, with the status it held
/// before the claim.
#[derive(Debug, Clone)]
pub struct Claim {
    pub entry: WaitingEntry,
    pub previous: WaitingStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWaitingEntry {
    pub patient_id: Uuid,
    pub preferred_dentist_id: Option<Uuid>,
    pub preferred_date: Option<NaiveDate>,
    pub preferred_start: Option<NaiveTime>,
    pub preferred_end: Option<NaiveTime>,
    pub procedure_type: ProcedureType,
    pub priority: i16,
    #[serde(default)]
    pub flexible_dentist: bool,
    #[serde(default)]
    pub flexible_time: bool,
    pub notes: Option<String>,
}

impl NewWaitingEntry {
    pub fn validate(&self) -> SchedulingResult<()> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(SchedulingError::Validation(format!(
                "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
            )));
        }
        if let (Some(start), Some(end)) = (self.preferred_start, self.preferred_end) {
            if start >= end {
                return Err(SchedulingError::Validation(
                    "preferred_start must be before preferred_end".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Persistence for waiting entries.
#[async_trait]
pub trait WaitlistStore: Send + Sync {
    async fn insert(&self, new: NewWaitingEntry, at: NaiveDateTime) -> SchedulingResult<WaitingEntry>;

    async fn get(&self, entry_id: Uuid) -> SchedulingResult<Option<WaitingEntry>>;

    /// In queue order.
    async fn list(&self, status: Option<WaitingStatus>) -> SchedulingResult<Vec<WaitingEntry>>;

    /// Picks the first open entry in queue order that accepts `slot` and
    /// marks it FULFILLED in the same atomic step. Entries held by a
    /// concurrent claim are passed over, never returned twice.
    async fn claim_first_match(&self, slot: &Slot, at: NaiveDateTime)
    -> SchedulingResult<Option<Claim>>;

    async fn transition(
        &self,
        entry_id: Uuid,
        from: &[WaitingStatus],
        to: WaitingStatus,
        at: NaiveDateTime,
    ) -> SchedulingResult<WaitingEntry>;

    async fn link_appointment(
        &self,
        entry_id: Uuid,
        appointment_id: Uuid,
        at: NaiveDateTime,
    ) -> SchedulingResult<()>;

    /// Open entries created before `cutoff` become EXPIRED. Returns how many
    /// changed.
    async fn expire_created_before(
        &self,
        cutoff: NaiveDateTime,
        at: NaiveDateTime,
    ) -> SchedulingResult<u64>;
}

pub(crate) fn describe_transition_failure(
    current: WaitingStatus,
    to: WaitingStatus,
) -> SchedulingError {
    SchedulingError::State(format!(
        "waiting entry is {}, cannot become {}",
        current.as_str(),
        to.as_str()
    ))
}

/// Waiting-list queue: owns the [`WaitingEntry`] lifecycle.
pub struct WaitingList {
    store: Arc<dyn WaitlistStore>,
    clock: Arc<dyn Clock>,
}

impl WaitingList {
    pub fn new(store: Arc<dyn WaitlistStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(skip(self, new), fields(patient_id = %new.patient_id, priority = new.priority))]
    pub async fn enqueue(&self, new: NewWaitingEntry) -> SchedulingResult<WaitingEntry> {
        new.validate()?;
        let entry = self.store.insert(new, self.clock.now()).await?;
        info!(entry_id = %entry.entry_id, "waiting entry added");
        Ok(entry)
    }

    /// Claims the best entry for `slot`, already marked FULFILLED.
    pub async fn dequeue_match(&self, slot: &Slot) -> SchedulingResult<Option<Claim>> {
        self.store.claim_first_match(slot, self.clock.now()).await
    }

    /// Undo a claim whose booking failed: the entry goes back to the status
    /// it held before it was claimed.
    pub async fn release(&self, claim: &Claim) -> SchedulingResult<WaitingEntry> {
        if !WaitingStatus::OPEN.contains(&claim.previous) {
            return Err(SchedulingError::State(format!(
                "cannot release a claim back to {}",
                claim.previous.as_str()
            )));
        }
        self.store
            .transition(
                claim.entry.entry_id,
                &[WaitingStatus::Fulfilled],
                claim.previous,
                self.clock.now(),
            )
            .await
    }

    pub async fn link_appointment(&self, entry_id: Uuid, appointment_id: Uuid) -> SchedulingResult<()> {
        self.store
            .link_appointment(entry_id, appointment_id, self.clock.now())
            .await
    }

    /// Idempotent: entries already EXPIRED are not touched again.
    #[instrument(skip(self))]
    pub async fn expire_older_than(&self, days: i64) -> SchedulingResult<u64> {
        if days < 0 {
            return Err(SchedulingError::Validation("days must be >= 0".into()));
        }
        let now = self.clock.now();
        let expired = self
            .store
            .expire_created_before(now - Duration::days(days), now)
            .await?;
        if expired > 0 {
            info!(expired, days, "waiting entries expired");
        }
        Ok(expired)
    }

    pub async fn mark_notified(&self, entry_id: Uuid) -> SchedulingResult<WaitingEntry> {
        self.store
            .transition(
                entry_id,
                &[WaitingStatus::Active],
                WaitingStatus::Notified,
                self.clock.now(),
            )
            .await
    }

    /// The patient no longer wants a slot.
    pub async fn withdraw(&self, entry_id: Uuid) -> SchedulingResult<WaitingEntry> {
        self.store
            .transition(
                entry_id,
                &WaitingStatus::OPEN,
                WaitingStatus::Expired,
                self.clock.now(),
            )
            .await
    }

    pub async fn get(&self, entry_id: Uuid) -> SchedulingResult<WaitingEntry> {
        self.store
            .get(entry_id)
            .await?
            .ok_or_else(|| SchedulingError::NotFound("waiting entry".into()))
    }

    pub async fn list(&self, status: Option<WaitingStatus>) -> SchedulingResult<Vec<WaitingEntry>> {
        self.store.list(status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::memory::{FixedClock, MemoryWaitlistStore};
    use assert_matches::assert_matches;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn new_entry(priority: i16) -> NewWaitingEntry {
        NewWaitingEntry {
            patient_id: Uuid::new_v4(),
            preferred_dentist_id: None,
            preferred_date: None,
            preferred_start: None,
            preferred_end: None,
            procedure_type: ProcedureType::Cleaning,
            priority,
            flexible_dentist: false,
            flexible_time: false,
            notes: None,
        }
    }

    fn entry(new: NewWaitingEntry) -> WaitingEntry {
        let at = d(1).and_hms_opt(8, 0, 0).unwrap();
        WaitingEntry {
            entry_id: Uuid::new_v4(),
            patient_id: new.patient_id,
            preferred_dentist_id: new.preferred_dentist_id,
            preferred_date: new.preferred_date,
            preferred_start: new.preferred_start,
            preferred_end: new.preferred_end,
            procedure_type: new.procedure_type,
            priority: new.priority,
            flexible_dentist: new.flexible_dentist,
            flexible_time: new.flexible_time,
            status: WaitingStatus::Active,
            notes: None,
            appointment_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn setup() -> (Arc<FixedClock>, WaitingList) {
        let clock = Arc::new(FixedClock::at(d(1).and_hms_opt(8, 0, 0).unwrap()));
        let list = WaitingList::new(Arc::new(MemoryWaitlistStore::default()), clock.clone());
        (clock, list)
    }

    #[test]
    fn test_dentist_preference() {
        let wanted = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut e = entry(NewWaitingEntry {
            preferred_dentist_id: Some(wanted),
            ..new_entry(5)
        });

        assert!(e.accepts(&Slot::new(wanted, d(3), t(9, 0), t(10, 0))));
        assert!(!e.accepts(&Slot::new(other, d(3), t(9, 0), t(10, 0))));

        e.flexible_dentist = true;
        assert!(e.accepts(&Slot::new(other, d(3), t(9, 0), t(10, 0))));
    }

    #[test]
    fn test_time_preference() {
        let dentist = Uuid::new_v4();
        let mut e = entry(NewWaitingEntry {
            preferred_date: Some(d(3)),
            preferred_start: Some(t(8, 0)),
            preferred_end: Some(t(12, 0)),
            ..new_entry(5)
        });

        assert!(e.accepts(&Slot::new(dentist, d(3), t(9, 0), t(10, 0))));
        assert!(!e.accepts(&Slot::new(dentist, d(4), t(9, 0), t(10, 0))));
        assert!(!e.accepts(&Slot::new(dentist, d(3), t(11, 30), t(12, 30))));

        e.flexible_time = true;
        assert!(e.accepts(&Slot::new(dentist, d(4), t(14, 0), t(15, 0))));
    }

    #[test]
    fn test_queue_order_priority_then_age() {
        let mut high = entry(new_entry(8));
        let mut old = entry(new_entry(5));
        let mut young = entry(new_entry(5));
        high.created_at = d(2).and_hms_opt(9, 0, 0).unwrap();
        old.created_at = d(1).and_hms_opt(9, 0, 0).unwrap();
        young.created_at = d(1).and_hms_opt(10, 0, 0).unwrap();

        let mut all = vec![young.clone(), old.clone(), high.clone()];
        all.sort_by(queue_order);

        let ids: Vec<Uuid> = all.iter().map(|e| e.entry_id).collect();
        assert_eq!(ids, vec![high.entry_id, old.entry_id, young.entry_id]);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_priority_out_of_range() {
        let (_, list) = setup();

        assert_matches!(list.enqueue(new_entry(11)).await, Err(SchedulingError::Validation(_)));
        assert_matches!(list.enqueue(new_entry(-1)).await, Err(SchedulingError::Validation(_)));
        assert!(list.enqueue(new_entry(0)).await.is_ok());
        assert!(list.enqueue(new_entry(10)).await.is_ok());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_inverted_window() {
        let (_, list) = setup();
        let bad = NewWaitingEntry {
            preferred_start: Some(t(12, 0)),
            preferred_end: Some(t(9, 0)),
            ..new_entry(3)
        };
        assert_matches!(list.enqueue(bad).await, Err(SchedulingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_dequeue_match_takes_earliest_of_equal_priority() {
        let (clock, list) = setup();
        let dentist = Uuid::new_v4();

        let first = list.enqueue(new_entry(5)).await.unwrap();
        clock.advance(Duration::minutes(5));
        let second = list.enqueue(new_entry(5)).await.unwrap();

        let slot = Slot::new(dentist, d(3), t(9, 0), t(10, 0));
        let claimed = list.dequeue_match(&slot).await.unwrap().unwrap();
        assert_eq!(claimed.entry.entry_id, first.entry_id);
        assert_eq!(claimed.entry.status, WaitingStatus::Fulfilled);
        assert_eq!(claimed.previous, WaitingStatus::Active);

        let next = list.dequeue_match(&slot).await.unwrap().unwrap();
        assert_eq!(next.entry.entry_id, second.entry_id);

        assert!(list.dequeue_match(&slot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_skips_non_matching_entries() {
        let (_, list) = setup();
        let dentist = Uuid::new_v4();

        let picky = list
            .enqueue(NewWaitingEntry {
                preferred_dentist_id: Some(Uuid::new_v4()),
                ..new_entry(9)
            })
            .await
            .unwrap();
        let easy = list.enqueue(new_entry(1)).await.unwrap();

        let slot = Slot::new(dentist, d(3), t(9, 0), t(10, 0));
        let claimed = list.dequeue_match(&slot).await.unwrap().unwrap();
        assert_eq!(claimed.entry.entry_id, easy.entry_id);

        let still_waiting = list.get(picky.entry_id).await.unwrap();
        assert_eq!(still_waiting.status, WaitingStatus::Active);
    }

    #[tokio::test]
    async fn test_release_puts_entry_back() {
        let (_, list) = setup();
        let e = list.enqueue(new_entry(5)).await.unwrap();
        let slot = Slot::new(Uuid::new_v4(), d(3), t(9, 0), t(10, 0));

        let claim = list.dequeue_match(&slot).await.unwrap().unwrap();
        assert_eq!(claim.entry.entry_id, e.entry_id);
        let released = list.release(&claim).await.unwrap();
        assert_eq!(released.status, WaitingStatus::Active);
    }

    #[tokio::test]
    async fn test_release_keeps_notified_status() {
        let (_, list) = setup();
        let e = list.enqueue(new_entry(5)).await.unwrap();
        list.mark_notified(e.entry_id).await.unwrap();
        let slot = Slot::new(Uuid::new_v4(), d(3), t(9, 0), t(10, 0));

        let claim = list.dequeue_match(&slot).await.unwrap().unwrap();
        assert_eq!(claim.previous, WaitingStatus::Notified);

        let released = list.release(&claim).await.unwrap();
        assert_eq!(released.status, WaitingStatus::Notified);
        assert_matches!(list.release(&claim).await, Err(SchedulingError::State(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dequeues_never_share_an_entry() {
        let (_, list) = setup();
        let list = Arc::new(list);
        for p in 0..5 {
            list.enqueue(new_entry(p)).await.unwrap();
        }
        let slot = Slot::new(Uuid::new_v4(), d(3), t(9, 0), t(10, 0));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let list = list.clone();
                tokio::spawn(async move { list.dequeue_match(&slot).await })
            })
            .collect();

        let mut claimed = Vec::new();
        for a in attempts {
            if let Some(c) = a.await.unwrap().unwrap() {
                claimed.push(c.entry.entry_id);
            }
        }
        let before = claimed.len();
        claimed.sort();
        claimed.dedup();
        assert_eq!(before, 5);
        assert_eq!(claimed.len(), 5);
    }

    #[tokio::test]
    async fn test_expire_older_than_is_idempotent() {
        let (clock, list) = setup();
        let old = list.enqueue(new_entry(5)).await.unwrap();
        clock.advance(Duration::days(20));
        let fresh = list.enqueue(new_entry(5)).await.unwrap();
        clock.advance(Duration::days(15));

        assert_eq!(list.expire_older_than(30).await.unwrap(), 1);
        let expired_once: Vec<Uuid> = list
            .list(Some(WaitingStatus::Expired))
            .await
            .unwrap()
            .iter()
            .map(|e| e.entry_id)
            .collect();

        assert_eq!(list.expire_older_than(30).await.unwrap(), 0);
        let expired_twice: Vec<Uuid> = list
            .list(Some(WaitingStatus::Expired))
            .await
            .unwrap()
            .iter()
            .map(|e| e.entry_id)
            .collect();

        assert_eq!(expired_once, vec![old.entry_id]);
        assert_eq!(expired_once, expired_twice);
        assert_eq!(list.get(fresh.entry_id).await.unwrap().status, WaitingStatus::Active);
    }

    #[tokio::test]
    async fn test_notify_then_withdraw() {
        let (_, list) = setup();
        let e = list.enqueue(new_entry(5)).await.unwrap();

        let notified = list.mark_notified(e.entry_id).await.unwrap();
        assert_eq!(notified.status, WaitingStatus::Notified);
        assert_matches!(list.mark_notified(e.entry_id).await, Err(SchedulingError::State(_)));

        let withdrawn = list.withdraw(e.entry_id).await.unwrap();
        assert_eq!(withdrawn.status, WaitingStatus::Expired);

        let slot = Slot::new(Uuid::new_v4(), d(3), t(9, 0), t(10, 0));
        assert!(list.dequeue_match(&slot).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_entry_is_not_found() {
        let (_, list) = setup();
        assert_matches!(list.get(Uuid::new_v4()).await, Err(SchedulingError::NotFound(_)));
        assert_matches!(list.withdraw(Uuid::new_v4()).await, Err(SchedulingError::NotFound(_)));
    }
}
