//! Status projection: tracker snapshots to render-ready rows.
//!
//! Pure translation consumed by whatever paints the screen. Called on
//! every redraw tick, so it must stay O(number of units) with no I/O and
//! no locking of its own -- callers hand in an already-taken snapshot.

use crate::track::{WorkSnapshot, WorkStatus};

/// Maximum characters of the activity preview.
const PREVIEW_WIDTH: usize = 48;

/// One render-ready status line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusRow {
    pub label: String,
    pub glyph: &'static str,
    pub elapsed_secs: u64,
    pub preview: String,
}

/// Glyph for one unit status.
fn status_glyph(status: WorkStatus) -> &'static str {
    match status {
        WorkStatus::Idle => "\u{25cb}",    // ○
        WorkStatus::Running => "\u{25d0}", // ◐
        WorkStatus::Done => "\u{2713}",    // ✓
        WorkStatus::Error => "\u{2717}",   // ✗
    }
}

/// Project role units (dispatcher mode). Labels are the role names,
/// in registration order.
pub fn project(units: &[WorkSnapshot]) -> Vec<StatusRow> {
    units.iter().map(|unit| row(unit, unit.id.clone())).collect()
}

/// Project pipeline step units in declared order, with arrow connectors
/// pointing at the next step.
pub fn project_pipeline(units: &[WorkSnapshot]) -> Vec<StatusRow> {
    let last = units.len().saturating_sub(1);
    units
        .iter()
        .enumerate()
        .map(|(index, unit)| {
            let role = step_role(&unit.id);
            let label = if index < last {
                format!("{role} \u{2192}") // →
            } else {
                role.to_string()
            };
            row(unit, label)
        })
        .collect()
}

fn row(unit: &WorkSnapshot, label: String) -> StatusRow {
    StatusRow {
        label,
        glyph: status_glyph(unit.status),
        elapsed_secs: unit.elapsed_ms / 1000,
        preview: truncate(unit.last_activity.as_deref().unwrap_or(""), PREVIEW_WIDTH),
    }
}

/// Extract the role name from a `step-<i>-<role>` unit id. Ids that don't
/// match the pattern pass through unchanged.
fn step_role(id: &str) -> &str {
    id.strip_prefix("step-")
        .and_then(|rest| rest.split_once('-'))
        .map(|(_, role)| role)
        .unwrap_or(id)
}

/// Truncate to `max_len` characters, appending "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    } else {
        s.to_string()
    }
}
