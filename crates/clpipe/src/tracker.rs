//! src/tracker.rs
//!
//! Create/release ledger for runtime objects. A [`Tracked<T>`] records its
//! creation when wrapped and its release when dropped; the ledger can then be
//! checked for leaked handles or releases of unknown ids.

use once_cell::sync::Lazy;
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Write},
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::ClError;

/// Art der verwalteten Ressource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
}

impl ResourceKind {
    fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Context => "Context",
            ResourceKind::Queue => "Queue",
            ResourceKind::Program => "Program",
            ResourceKind::Kernel => "Kernel",
            ResourceKind::Buffer => "Buffer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Create,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackEvent {
    pub id: u64,
    pub kind: ResourceKind,
    pub op: Op,
    /// Microseconds since the first tracked event of the process.
    pub at_us: u128,
}

/// global zero point, set on the first recorded event
static T0: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Default)]
struct Ledger {
    next_id: u64,
    live: BTreeMap<u64, ResourceKind>,
    events: Vec<TrackEvent>,
    unknown_releases: Vec<(u64, ResourceKind)>,
}

/// Shared handle onto one ledger. Cloning shares the ledger.
#[derive(Clone, Default)]
pub struct ResourceTracker {
    ledger: Arc<Mutex<Ledger>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerReport {
    pub created: usize,
    pub released: usize,
    pub leaked: Vec<(u64, ResourceKind)>,
    pub double_released: Vec<(u64, ResourceKind)>,
}

impl TrackerReport {
    pub fn is_balanced(&self) -> bool {
        self.leaked.is_empty() && self.double_released.is_empty()
    }
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_create(&self, kind: ResourceKind) -> u64 {
        let at_us = T0.elapsed().as_micros();
        let mut ledger = self.ledger();
        ledger.next_id += 1;
        let id = ledger.next_id;
        ledger.live.insert(id, kind);
        ledger.events.push(TrackEvent { id, kind, op: Op::Create, at_us });
        id
    }

    pub fn record_release(&self, id: u64, kind: ResourceKind) {
        let at_us = T0.elapsed().as_micros();
        let mut ledger = self.ledger();
        if ledger.live.remove(&id).is_none() {
            tracing::warn!(id, %kind, "release of a handle that is not live");
            ledger.unknown_releases.push((id, kind));
        }
        ledger.events.push(TrackEvent { id, kind, op: Op::Release, at_us });
    }

    pub fn live(&self) -> usize {
        self.ledger().live.len()
    }

    pub fn events(&self) -> Vec<TrackEvent> {
        self.ledger().events.clone()
    }

    pub fn report(&self) -> TrackerReport {
        let ledger = self.ledger();
        let count = |op| ledger.events.iter().filter(|e| e.op == op).count();
        TrackerReport {
            created: count(Op::Create),
            released: count(Op::Release),
            leaked: ledger.live.iter().map(|(id, kind)| (*id, *kind)).collect(),
            double_released: ledger.unknown_releases.clone(),
        }
    }

    /// Fails when any handle is still live or was released twice.
    pub fn assert_balanced(&self) -> Result<(), ClError> {
        let report = self.report();
        if report.is_balanced() {
            return Ok(());
        }
        let list = |v: &[(u64, ResourceKind)]| {
            v.iter()
                .map(|(id, kind)| format!("{kind}#{id}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        Err(ClError::Tracker(format!(
            "leaked [{}], double released [{}]",
            list(&report.leaked),
            list(&report.double_released)
        )))
    }

    /// CSV dump of the event log: `t_us,id,kind,op`.
    pub fn write_csv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "t_us,id,kind,op")?;
        for e in self.ledger().events.iter() {
            let op = match e.op {
                Op::Create => "create",
                Op::Release => "release",
            };
            writeln!(out, "{},{},{},{}", e.at_us, e.id, e.kind, op)?;
        }
        Ok(())
    }
}

// ─── Scoped wrapper ──────────────────────────────────────────────────

/// Owns a runtime object and releases it exactly once, on drop.
///
/// The inner value is dropped first (which is where opencl3 calls the
/// matching `clRelease*`), then the release is written to the tracker.
pub struct Tracked<T> {
    inner: ManuallyDrop<T>,
    kind: ResourceKind,
    slot: Option<(ResourceTracker, u64)>,
}

impl<T> Tracked<T> {
    pub fn new(value: T, kind: ResourceKind, tracker: Option<&ResourceTracker>) -> Self {
        let slot = tracker.map(|t| (t.clone(), t.record_create(kind)));
        Self { inner: ManuallyDrop::new(value), kind, slot }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Ledger id, if a tracker is attached.
    pub fn id(&self) -> Option<u64> {
        self.slot.as_ref().map(|(_, id)| *id)
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Tracked<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        // Safety: `inner` is never touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.inner) };
        if let Some((tracker, id)) = self.slot.take() {
            tracker.record_release(id, self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Probe<'a>(&'a AtomicUsize);

    impl Drop for Probe<'_> {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drop_releases_inner_once_and_records_it() {
        let drops = AtomicUsize::new(0);
        let tracker = ResourceTracker::new();
        {
            let t = Tracked::new(Probe(&drops), ResourceKind::Buffer, Some(&tracker));
            assert_eq!(t.id(), Some(1));
            assert_eq!(tracker.live(), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        let report = tracker.report();
        assert_eq!(report.created, 1);
        assert_eq!(report.released, 1);
        assert!(report.is_balanced());
    }

    #[test]
    fn leaked_handles_are_reported() {
        let tracker = ResourceTracker::new();
        let kept = Tracked::new((), ResourceKind::Context, Some(&tracker));
        let err = tracker.assert_balanced().unwrap_err();
        assert!(err.to_string().contains("Context#1"));
        drop(kept);
        tracker.assert_balanced().unwrap();
    }

    #[test]
    fn unknown_release_counts_as_double_release() {
        let tracker = ResourceTracker::new();
        let id = tracker.record_create(ResourceKind::Kernel);
        tracker.record_release(id, ResourceKind::Kernel);
        tracker.record_release(id, ResourceKind::Kernel);
        let report = tracker.report();
        assert_eq!(report.double_released, vec![(id, ResourceKind::Kernel)]);
        assert!(tracker.assert_balanced().is_err());
    }

    #[test]
    fn untracked_wrapper_still_drops() {
        let drops = AtomicUsize::new(0);
        let t = Tracked::new(Probe(&drops), ResourceKind::Queue, None);
        assert_eq!(t.id(), None);
        drop(t);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn csv_lists_every_event() {
        let tracker = ResourceTracker::new();
        drop(Tracked::new(0u8, ResourceKind::Program, Some(&tracker)));
        let mut out = Vec::new();
        tracker.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "t_us,id,kind,op");
        assert!(lines[1].ends_with(",1,Program,create"));
        assert!(lines[2].ends_with(",1,Program,release"));
    }
}
