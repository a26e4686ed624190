// Event coalescing and partial-vs-full frame selection.

use std::collections::HashSet;

use super::events::DashboardEvent;
use super::metrics_frame::{MetricsFrame, PARTITIONS};

/// Maps a named `details.action` to the partitions it affects. Unknown or
/// absent actions (including the generic `cache_invalidate`) fall back to a
/// full refresh — the conservative, always-correct default.
fn partitions_for_action(action: &str) -> Option<&'static [&'static str]> {
    match action {
        "focus_session_started" | "focus_session_stopped" => Some(&["focus"]),
        "todo_completed" | "todo_created" | "todo_updated" => Some(&["todos", "daily_timeline"]),
        "habit_logged" => Some(&["habits", "habit_heatmap"]),
        "mood_logged" => Some(&["mood"]),
        "note_saved" => Some(&["notes"]),
        "journal_saved" => Some(&["journals"]),
        "calendar_event_changed" => Some(&["calendar", "daily_timeline"]),
        "ai_usage_recorded" => Some(&["ai_usage"]),
        _ => None,
    }
}

/// Accumulates pending partition names across however many events arrive
/// during one debounce window, merging last-write-wins per partition when
/// the same partition is named twice.
#[derive(Debug, Default)]
pub struct PendingUpdate {
    partitions: HashSet<String>,
    full_refresh: bool,
}

impl PendingUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &DashboardEvent) {
        if self.full_refresh {
            return;
        }
        match event.action().and_then(partitions_for_action) {
            Some(names) => {
                self.partitions.extend(names.iter().map(|s| s.to_string()));
            }
            None => self.full_refresh = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.full_refresh && self.partitions.is_empty()
    }

    pub fn take(&mut self) -> PendingUpdate {
        std::mem::take(self)
    }

    /// The partitions a full frame recompute should be narrowed to before
    /// sending, or `None` meaning "send every partition" (full refresh).
    pub fn affected_partitions(&self) -> Option<Vec<&'static str>> {
        if self.full_refresh {
            None
        } else {
            Some(
                PARTITIONS
                    .iter()
                    .filter(|p| self.partitions.contains(**p))
                    .copied()
                    .collect(),
            )
        }
    }
}

/// Narrows a freshly computed full frame down to the partitions a pending
/// coalesced update named, or returns it untouched for a full refresh.
pub fn narrow_frame(frame: MetricsFrame, pending: &PendingUpdate) -> MetricsFrame {
    match pending.affected_partitions() {
        Some(names) => frame.only(&names),
        None => frame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn named_action_narrows_to_its_partitions() {
        let mut pending = PendingUpdate::new();
        let event = DashboardEvent::new("dashboard_update", Uuid::new_v4())
            .with_detail("action", "todo_completed");
        pending.record(&event);
        assert_eq!(
            pending.affected_partitions(),
            Some(vec!["todos", "daily_timeline"])
        );
    }

    #[test]
    fn generic_invalidate_forces_full_refresh() {
        let mut pending = PendingUpdate::new();
        pending.record(
            &DashboardEvent::new("cache_invalidate", Uuid::new_v4())
                .with_detail("action", "cache_invalidate"),
        );
        assert_eq!(pending.affected_partitions(), None);
    }

    #[test]
    fn multiple_events_merge_partitions() {
        let mut pending = PendingUpdate::new();
        pending.record(
            &DashboardEvent::new("dashboard_update", Uuid::new_v4())
                .with_detail("action", "todo_completed"),
        );
        pending.record(
            &DashboardEvent::new("dashboard_update", Uuid::new_v4())
                .with_detail("action", "mood_logged"),
        );
        let mut names = pending.affected_partitions().unwrap();
        names.sort();
        assert_eq!(names, vec!["daily_timeline", "mood", "todos"]);
    }
}
