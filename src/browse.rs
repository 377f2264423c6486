use serde::Serialize;
use serde_json::{Map, Value};

/// One row of the register. `fields` carries whatever columns the source
/// sheet had; the set of columns varies between uploads, so access goes
/// through [`Record::field_text`] rather than a fixed struct.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub key: String,
    pub name: String,
    pub fields: Map<String, Value>,
}

impl Record {
    /// Tolerant accessor: missing or null fields read as "", numbers and
    /// booleans coerce to their display text.
    pub fn field_text(&self, field: &str) -> String {
        match self.fields.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
        }
    }
}

/// Selects the searchable columns for a record set: every field name whose
/// casefold contains one of the configured markers, in first-seen order
/// across the set. An empty result is legal; it means any non-empty query
/// matches nothing.
pub fn searchable_fields(records: &[Record], markers: &[String]) -> Vec<String> {
    let markers_folded: Vec<String> = markers.iter().map(|m| m.to_lowercase()).collect();
    let mut selected: Vec<String> = Vec::new();
    for r in records {
        for name in r.fields.keys() {
            if selected.iter().any(|s| s == name) {
                continue;
            }
            let folded = name.to_lowercase();
            if markers_folded.iter().any(|m| !m.is_empty() && folded.contains(m)) {
                selected.push(name.clone());
            }
        }
    }
    selected
}

/// Case-insensitive substring filter over the searchable columns. An empty
/// or whitespace-only query is the identity: same rows, same order.
pub fn filter_records(records: &[Record], query: &str, searchable: &[String]) -> Vec<Record> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return records.to_vec();
    }
    let needle = trimmed.to_lowercase();
    records
        .iter()
        .filter(|r| {
            searchable
                .iter()
                .any(|f| r.field_text(f).to_lowercase().contains(&needle))
        })
        .cloned()
        .collect()
}

/// Drops later rows whose key repeats an earlier one. Run after any append
/// so a record set never carries duplicate keys.
pub fn dedupe_by_key(records: Vec<Record>) -> Vec<Record> {
    let mut seen: Vec<String> = Vec::new();
    let mut out: Vec<Record> = Vec::new();
    for r in records {
        if seen.iter().any(|k| *k == r.key) {
            continue;
        }
        seen.push(r.key.clone());
        out.push(r);
    }
    out
}

/// Pagination cursor. Page numbers are 1-based; the caller owns this value
/// and passes it explicitly on every call, there is no ambient session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

impl PageState {
    #[allow(dead_code)]
    pub fn new(page_size: usize) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            total: 0,
        }
    }

    pub fn total_pages(&self) -> usize {
        let pages = self.total.div_ceil(self.page_size);
        pages.max(1)
    }

    /// Pulls an out-of-range page back to the nearest bound.
    pub fn clamp(&mut self) {
        let max = self.total_pages();
        if self.page < 1 {
            self.page = 1;
        } else if self.page > max {
            self.page = max;
        }
    }

    /// No-op on the last page.
    #[allow(dead_code)]
    pub fn next(&mut self) {
        if self.page < self.total_pages() {
            self.page += 1;
        }
    }

    /// No-op on page 1.
    #[allow(dead_code)]
    pub fn previous(&mut self) {
        if self.page > 1 {
            self.page -= 1;
        }
    }

    /// Any change to the query or the underlying record set invalidates the
    /// cursor: back to page 1 with the new total.
    #[allow(dead_code)]
    pub fn reset(&mut self, total: usize) {
        self.page = 1;
        self.total = total;
    }
}

/// Slices out the current page. The state is clamped first, so a stale page
/// number past the end yields the last page rather than an empty slice.
pub fn paginate(records: &[Record], state: &PageState) -> (Vec<Record>, usize) {
    let mut st = *state;
    st.total = records.len();
    st.clamp();
    let start = (st.page - 1) * st.page_size;
    let end = (start + st.page_size).min(records.len());
    let slice = if start < records.len() {
        records[start..end].to_vec()
    } else {
        Vec::new()
    };
    (slice, st.total_pages())
}
