//! # History Retrieval Modes
//!
//! Five ways to slice the stored event sequence, always applied after the
//! per-component filter:
//!
//! - latest-N / earliest-N
//! - inclusive id range
//! - inclusive date range
//! - page(number, size) - zero-based; a page starting beyond the filtered
//!   result length is an empty sequence, never an error

use chrono::{DateTime, Utc};

use tether_core::EventRecord;

// =============================================================================
// Filter
// =============================================================================

/// Per-component filter applied before any retrieval mode.
#[derive(Debug, Clone, Default)]
pub struct ComponentFilter {
    /// Exact component path to match; `None` matches every component.
    pub path: Option<String>,
}

impl ComponentFilter {
    /// Filter matching every component.
    pub fn any() -> Self {
        ComponentFilter { path: None }
    }

    /// Filter matching one component path exactly.
    pub fn path(path: &str) -> Self {
        ComponentFilter {
            path: Some(path.to_string()),
        }
    }

    fn matches(&self, event: &EventRecord) -> bool {
        match &self.path {
            Some(path) => &event.component_path == path,
            None => true,
        }
    }
}

// =============================================================================
// Query
// =============================================================================

/// A retrieval mode over the filtered, id-ordered event sequence.
#[derive(Debug, Clone)]
pub enum HistoryQuery {
    /// The newest `n` entries, in ascending id order.
    Latest(usize),
    /// The oldest `n` entries, in ascending id order.
    Earliest(usize),
    /// Entries with `from <= id <= to`.
    IdRange { from: i64, to: i64 },
    /// Entries with `from <= timestamp <= to`.
    DateRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    /// Zero-based page of the filtered result.
    Page { number: usize, size: usize },
}

impl HistoryQuery {
    /// Applies the filter and this retrieval mode to an id-ordered
    /// sequence of stored entries.
    pub fn apply(&self, entries: &[EventRecord], filter: &ComponentFilter) -> Vec<EventRecord> {
        let filtered: Vec<&EventRecord> = entries.iter().filter(|e| filter.matches(e)).collect();

        let selected: Vec<&EventRecord> = match self {
            HistoryQuery::Latest(n) => {
                let start = filtered.len().saturating_sub(*n);
                filtered[start..].to_vec()
            }
            HistoryQuery::Earliest(n) => filtered.iter().take(*n).copied().collect(),
            HistoryQuery::IdRange { from, to } => filtered
                .iter()
                .filter(|e| e.id >= *from && e.id <= *to)
                .copied()
                .collect(),
            HistoryQuery::DateRange { from, to } => filtered
                .iter()
                .filter(|e| e.timestamp >= *from && e.timestamp <= *to)
                .copied()
                .collect(),
            HistoryQuery::Page { number, size } => {
                let start = number.saturating_mul(*size);
                if start >= filtered.len() || *size == 0 {
                    Vec::new()
                } else {
                    filtered[start..filtered.len().min(start + size)].to_vec()
                }
            }
        };

        selected.into_iter().cloned().collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tether_core::{ComponentKind, EventPayload};

    fn event(id: i64, path: &str, minute: u32) -> EventRecord {
        EventRecord {
            id,
            component_path: path.to_string(),
            component_kind: ComponentKind::RangeState,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            payload: EventPayload::Range {
                new: id as f64,
                old: 0.0,
            },
        }
    }

    fn entries() -> Vec<EventRecord> {
        vec![
            event(0, "lamp/power", 0),
            event(1, "lamp/brightness", 1),
            event(2, "lamp/power", 2),
            event(3, "lamp/brightness", 3),
            event(4, "lamp/power", 4),
        ]
    }

    fn ids(result: &[EventRecord]) -> Vec<i64> {
        result.iter().map(|e| e.id).collect()
    }

    #[test]
    fn test_latest_n() {
        let result = HistoryQuery::Latest(2).apply(&entries(), &ComponentFilter::any());
        assert_eq!(ids(&result), vec![3, 4]);
    }

    #[test]
    fn test_earliest_n() {
        let result = HistoryQuery::Earliest(2).apply(&entries(), &ComponentFilter::any());
        assert_eq!(ids(&result), vec![0, 1]);
    }

    #[test]
    fn test_latest_with_component_filter() {
        let result =
            HistoryQuery::Latest(2).apply(&entries(), &ComponentFilter::path("lamp/power"));
        assert_eq!(ids(&result), vec![2, 4]);
    }

    #[test]
    fn test_id_range_is_inclusive() {
        let result =
            HistoryQuery::IdRange { from: 1, to: 3 }.apply(&entries(), &ComponentFilter::any());
        assert_eq!(ids(&result), vec![1, 2, 3]);
    }

    #[test]
    fn test_date_range() {
        let query = HistoryQuery::DateRange {
            from: Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap(),
            to: Utc.with_ymd_and_hms(2024, 5, 1, 12, 3, 0).unwrap(),
        };
        let result = query.apply(&entries(), &ComponentFilter::any());
        assert_eq!(ids(&result), vec![1, 2, 3]);
    }

    #[test]
    fn test_page_slices_filtered_result() {
        let query = HistoryQuery::Page { number: 1, size: 2 };
        let result = query.apply(&entries(), &ComponentFilter::any());
        assert_eq!(ids(&result), vec![2, 3]);
    }

    // Boundary: a page starting beyond the result length is empty, not an error.
    #[test]
    fn test_page_past_end_is_empty() {
        let query = HistoryQuery::Page { number: 7, size: 2 };
        let result = query.apply(&entries(), &ComponentFilter::any());
        assert!(result.is_empty());

        let query = HistoryQuery::Page { number: 2, size: 3 };
        let result = query.apply(&entries(), &ComponentFilter::path("lamp/power"));
        assert!(result.is_empty());
    }

    #[test]
    fn test_oversized_requests_are_clamped() {
        let result = HistoryQuery::Latest(99).apply(&entries(), &ComponentFilter::any());
        assert_eq!(ids(&result), vec![0, 1, 2, 3, 4]);

        let result = HistoryQuery::Earliest(99).apply(&entries(), &ComponentFilter::any());
        assert_eq!(result.len(), 5);
    }
}
