//! Stage latencies and live buffer counters, compiled in with `metrics`.

use once_cell::sync::Lazy;
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
    time::Instant,
};

/* ───────────── Roh‑Latenzen ─────────────────────────── */

static TIMES: Lazy<Mutex<Vec<(&'static str, u128)>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Call from a stage: `record("build_program", t0);`
pub fn record(name: &'static str, start: Instant) {
    let dur = start.elapsed().as_micros();
    TIMES.lock().unwrap_or_else(PoisonError::into_inner).push((name, dur));
}

/* ───────────── Buffer‑Allokationen ───────────────────── */

pub static ALLOCS: AtomicUsize = AtomicUsize::new(0);
pub static ALLOC_BYTES: AtomicUsize = AtomicUsize::new(0);

/* ───────────── Zusammenfassung ─────────────────────── */

/// Drains the recorded latencies into a printable table.
pub fn summary() -> String {
    let mut map: BTreeMap<&str, Vec<u128>> = BTreeMap::new();
    {
        let mut times = TIMES.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, us) in times.drain(..) {
            map.entry(name).or_default().push(us);
        }
    }

    let mut out = String::from("── metrics summary ──\n");
    for (name, mut v) in map {
        v.sort_unstable();
        let mean = v.iter().sum::<u128>() / v.len() as u128;
        let p95 = v[((v.len() * 95) / 100).saturating_sub(1)];
        let _ = writeln!(out, "{name:<18} n={:<4} mean={mean:>6} µs   p95={p95:>6} µs", v.len());
    }

    let allocs = ALLOCS.load(Ordering::Relaxed);
    let bytes = ALLOC_BYTES.load(Ordering::Relaxed);
    let _ = writeln!(out, "live device buffers: {allocs}   ({bytes} bytes)");
    out
}
