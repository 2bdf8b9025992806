// waymark-core/src/core/trace.rs
// ============================================================================
// Module: Waymark Decision Trace
// Description: Budgeted trace entries explaining interpreter decisions.
// Purpose: Record why a step was selected without unbounded event growth.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The interpreter explains its step selection through trace entries. Traces
//! are budgeted deterministically before they are appended: entry count
//! first, then per-summary bytes, then total bytes, trimming from the tail.
//! Truncation always cuts on a UTF-8 boundary and appends the canonical
//! marker so consumers can tell a trimmed summary from a short one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of entries in a decision trace.
pub const MAX_DECISION_TRACE_ENTRIES: usize = 25;
/// Maximum UTF-8 bytes per trace summary.
pub const MAX_TRACE_SUMMARY_BYTES: usize = 512;
/// Maximum total UTF-8 bytes across all summaries in one trace.
pub const MAX_TRACE_TOTAL_BYTES: usize = 8192;
/// Canonical marker appended to truncated summaries.
pub const TRACE_TRUNCATION_MARKER: &str = "[truncated]";

// ============================================================================
// SECTION: Trace Entries
// ============================================================================

/// Closed set of interpreter decisions worth tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEntryKind {
    /// A runnable step was selected as the next pending step.
    SelectedNextStep,
    /// A run condition was evaluated (and possibly skipped a step).
    EvaluatedCondition,
    /// A loop body was entered or re-entered.
    EnteredLoop,
    /// A loop was exited.
    ExitedLoop,
    /// The advance source was not the preferred tip.
    DetectedNonTipAdvance,
}

/// One interpreter decision with a short summary and stable references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Decision kind.
    pub kind: TraceEntryKind,
    /// Human-readable summary, budgeted by [`budget_trace`].
    pub summary: String,
    /// Identifiers the decision refers to (step ids, loop ids).
    #[serde(default)]
    pub refs: Vec<String>,
}

// ============================================================================
// SECTION: Budgeting
// ============================================================================

/// Applies the deterministic trace budget: entry cap, per-summary cap, total cap.
#[must_use]
pub fn budget_trace(entries: Vec<TraceEntry>) -> Vec<TraceEntry> {
    let mut budgeted: Vec<TraceEntry> = entries
        .into_iter()
        .take(MAX_DECISION_TRACE_ENTRIES)
        .map(|mut entry| {
            entry.summary = truncate_summary(&entry.summary, MAX_TRACE_SUMMARY_BYTES);
            entry
        })
        .collect();

    let mut total: usize = budgeted.iter().map(|entry| entry.summary.len()).sum();
    while total > MAX_TRACE_TOTAL_BYTES {
        match budgeted.pop() {
            Some(dropped) => total -= dropped.summary.len(),
            None => break,
        }
    }
    budgeted
}

/// Truncates a summary to a byte budget on a UTF-8 boundary with the marker.
fn truncate_summary(summary: &str, max_bytes: usize) -> String {
    if summary.len() <= max_bytes {
        return summary.to_string();
    }
    let keep = max_bytes.saturating_sub(TRACE_TRUNCATION_MARKER.len());
    let mut cut = keep;
    while cut > 0 && !summary.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRACE_TRUNCATION_MARKER}", &summary[..cut])
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::MAX_DECISION_TRACE_ENTRIES;
    use super::MAX_TRACE_SUMMARY_BYTES;
    use super::MAX_TRACE_TOTAL_BYTES;
    use super::TRACE_TRUNCATION_MARKER;
    use super::TraceEntry;
    use super::TraceEntryKind;
    use super::budget_trace;

    /// Builds a trace entry with the given summary.
    fn entry(summary: &str) -> TraceEntry {
        TraceEntry {
            kind: TraceEntryKind::SelectedNextStep,
            summary: summary.to_string(),
            refs: Vec::new(),
        }
    }

    /// Tests the entry cap trims from the tail.
    #[test]
    fn test_entry_cap() {
        let entries: Vec<TraceEntry> = (0..40).map(|i| entry(&format!("e{i}"))).collect();
        let budgeted = budget_trace(entries);
        assert_eq!(budgeted.len(), MAX_DECISION_TRACE_ENTRIES);
        assert_eq!(budgeted[0].summary, "e0");
    }

    /// Tests oversized summaries end with the canonical marker.
    #[test]
    fn test_summary_truncation_marker() {
        let long = "x".repeat(MAX_TRACE_SUMMARY_BYTES + 100);
        let budgeted = budget_trace(vec![entry(&long)]);
        assert_eq!(budgeted[0].summary.len(), MAX_TRACE_SUMMARY_BYTES);
        assert!(budgeted[0].summary.ends_with(TRACE_TRUNCATION_MARKER));
    }

    /// Tests truncation respects multi-byte character boundaries.
    #[test]
    fn test_truncation_utf8_boundary() {
        let long = "é".repeat(MAX_TRACE_SUMMARY_BYTES);
        let budgeted = budget_trace(vec![entry(&long)]);
        assert!(budgeted[0].summary.len() <= MAX_TRACE_SUMMARY_BYTES);
        assert!(budgeted[0].summary.ends_with(TRACE_TRUNCATION_MARKER));
    }

    /// Tests the total budget drops tail entries.
    #[test]
    fn test_total_budget() {
        let big = "y".repeat(MAX_TRACE_SUMMARY_BYTES);
        let entries: Vec<TraceEntry> =
            (0..MAX_DECISION_TRACE_ENTRIES).map(|_| entry(&big)).collect();
        let budgeted = budget_trace(entries);
        let total: usize = budgeted.iter().map(|e| e.summary.len()).sum();
        assert!(total <= MAX_TRACE_TOTAL_BYTES);
        assert_eq!(budgeted.len(), MAX_TRACE_TOTAL_BYTES / MAX_TRACE_SUMMARY_BYTES);
    }
}
