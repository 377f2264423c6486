use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One presence observation: a student on a calendar date (ISO `YYYY-MM-DD`).
/// The (record_key, date) pair is authoritative; a later event for the same
/// pair supersedes the earlier one.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub record_key: String,
    pub date: String,
    pub present: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub days_recorded: usize,
    pub days_present: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibleEntry {
    pub record_key: String,
    pub percentage: f64,
}

/// Collapses the raw event sequence to one event per (record_key, date),
/// keeping the last write for each pair. Position in the output follows the
/// pair's first appearance in the input.
pub fn collapse_events(events: &[AttendanceEvent]) -> Vec<AttendanceEvent> {
    let mut slot_by_pair: HashMap<(String, String), usize> = HashMap::new();
    let mut out: Vec<AttendanceEvent> = Vec::new();
    for ev in events {
        let pair = (ev.record_key.clone(), ev.date.clone());
        match slot_by_pair.get(&pair) {
            Some(&i) => out[i] = ev.clone(),
            None => {
                slot_by_pair.insert(pair, out.len());
                out.push(ev.clone());
            }
        }
    }
    out
}

/// Per-student presence counts and percentage over the collapsed log.
/// Students with no surviving events are omitted rather than reported at
/// zero, so the percentage never divides by zero.
pub fn aggregate_attendance(events: &[AttendanceEvent]) -> HashMap<String, AttendanceStats> {
    let mut stats: HashMap<String, AttendanceStats> = HashMap::new();
    for ev in collapse_events(events) {
        let entry = stats.entry(ev.record_key).or_insert(AttendanceStats {
            days_recorded: 0,
            days_present: 0,
            percentage: 0.0,
        });
        entry.days_recorded += 1;
        if ev.present {
            entry.days_present += 1;
        }
    }
    for s in stats.values_mut() {
        s.percentage = 100.0 * (s.days_present as f64) / (s.days_recorded as f64);
    }
    stats
}

/// Every key at or above the threshold, ordered by percentage descending
/// with ties broken by key ascending. HashMap iteration order is arbitrary,
/// so the ordering is imposed here rather than inherited.
pub fn eligible(stats: &HashMap<String, AttendanceStats>, threshold: f64) -> Vec<EligibleEntry> {
    let mut out: Vec<EligibleEntry> = stats
        .iter()
        .filter(|(_, s)| s.percentage >= threshold)
        .map(|(k, s)| EligibleEntry {
            record_key: k.clone(),
            percentage: s.percentage,
        })
        .collect();
    out.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.record_key.cmp(&b.record_key))
    });
    out
}

/// VB6-style 1-decimal rounding used for display values in handler output.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}
