//! Core domain types for actilyze
//!
//! These types hold what the core reconstructs from an analysis run's output
//! directory.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Snapshot** | One analysis run's sleep/activity records plus metadata |
//! | **Exported** | A snapshot recovered from a report document rather than raw CSV files |
//! | **Tag** | A named, colored label attached to a snapshot |
//!
//! ### Text-preserving records
//!
//! [`SleepRecord`] and [`ActivityRecord`] keep every field as the exact text
//! the analysis wrote. Nothing is parsed into numbers here, so a value like
//! `"77.9"` survives any number of encode/decode cycles unchanged.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================
// Tags
// ============================================

/// A named, colored label attached to a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    /// Display color as `#RRGGBB`
    pub color: String,
}

impl Tag {
    pub const SLEEP: &'static str = "Sleep";
    pub const ACTIVITY: &'static str = "Activity";

    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }

    /// Tag applied to snapshots that carry sleep records.
    pub fn sleep() -> Self {
        Self::new(Self::SLEEP, "#5B8DEF")
    }

    /// Tag applied to snapshots that carry activity records.
    pub fn activity() -> Self {
        Self::new(Self::ACTIVITY, "#F2A541")
    }
}

// ============================================
// Records
// ============================================

/// One night of sleep summary output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepRecord {
    /// Calendar date on which the night starts
    pub night_starting: String,
    pub sleep_onset: String,
    pub rise_time: String,
    pub total_elapsed_bed_time: String,
    pub total_sleep_time: String,
    pub total_wake_time: String,
    pub sleep_efficiency: String,
    /// Number of active periods during the night
    pub active_periods: String,
    pub median_activity_length: String,
}

/// One day of activity summary output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Day identifier as written by the analysis
    pub day: String,
    pub steps: String,
    pub non_wear: String,
    pub sleep: String,
    pub sedentary: String,
    pub light: String,
    pub moderate: String,
    pub vigorous: String,
}

// ============================================
// Snapshot
// ============================================

/// In-memory reconstruction of one analysis run.
///
/// Created empty by whichever ingestion path discovers it, populated once per
/// source file, tagged once, then left alone by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub file_name: String,
    pub file_path: PathBuf,
    /// True iff reconstructed from a report document
    pub exported: bool,
    pub tags: Vec<Tag>,
    pub sleep_records: Vec<SleepRecord>,
    pub activity_records: Vec<ActivityRecord>,
}

impl AnalysisSnapshot {
    pub fn new(file_name: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            file_path: file_path.into(),
            ..Default::default()
        }
    }

    /// Replace the sleep records with those read from one source file.
    pub fn set_sleep_records(&mut self, records: Vec<SleepRecord>) {
        if !self.sleep_records.is_empty() {
            tracing::warn!(
                snapshot = %self.file_name,
                previous = self.sleep_records.len(),
                "Replacing existing sleep records"
            );
        }
        self.sleep_records = records;
    }

    /// Replace the activity records with those read from one source file.
    pub fn set_activity_records(&mut self, records: Vec<ActivityRecord>) {
        if !self.activity_records.is_empty() {
            tracing::warn!(
                snapshot = %self.file_name,
                previous = self.activity_records.len(),
                "Replacing existing activity records"
            );
        }
        self.activity_records = records;
    }

    /// Append a tag. Tags are never removed or reordered.
    pub fn add_tag(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    /// Append the descriptive content tags for whichever record lists are
    /// populated. A tag already present (e.g. carried in a decoded report)
    /// is not added twice.
    pub fn apply_content_tags(&mut self) {
        if !self.sleep_records.is_empty() && !self.has_tag(Tag::SLEEP) {
            self.add_tag(Tag::sleep());
        }
        if !self.activity_records.is_empty() && !self.has_tag(Tag::ACTIVITY) {
            self.add_tag(Tag::activity());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleep_row(date: &str) -> SleepRecord {
        SleepRecord {
            night_starting: date.to_string(),
            sleep_efficiency: "91.2".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_content_tags_follow_populated_lists() {
        let mut snapshot = AnalysisSnapshot::new("Bob", "/out/Bob");
        snapshot.set_sleep_records(vec![sleep_row("2024-03-01")]);
        snapshot.apply_content_tags();

        assert_eq!(snapshot.tags, vec![Tag::sleep()]);
        assert!(!snapshot.has_tag(Tag::ACTIVITY));
    }

    #[test]
    fn test_content_tags_not_duplicated() {
        let mut snapshot = AnalysisSnapshot::new("Alice", "/out/Alice.pdf");
        snapshot.add_tag(Tag::new("Pilot", "#000000"));
        snapshot.add_tag(Tag::sleep());
        snapshot.set_sleep_records(vec![sleep_row("2024-03-01")]);
        snapshot.set_activity_records(vec![ActivityRecord::default()]);

        snapshot.apply_content_tags();

        let names: Vec<_> = snapshot.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Pilot", "Sleep", "Activity"]);
    }

    #[test]
    fn test_set_records_replaces() {
        let mut snapshot = AnalysisSnapshot::new("Bob", "/out/Bob");
        snapshot.set_sleep_records(vec![sleep_row("a"), sleep_row("b")]);
        snapshot.set_sleep_records(vec![sleep_row("c")]);

        assert_eq!(snapshot.sleep_records.len(), 1);
        assert_eq!(snapshot.sleep_records[0].night_starting, "c");
    }
}
