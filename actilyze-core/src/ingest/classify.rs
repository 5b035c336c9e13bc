//! Header-based classification of tabular artifacts
//!
//! The analysis writes several CSV files per run. Only two schemas matter:
//! daily activity summaries and nightly sleep summaries. A file is recognised
//! by how many of its header names (case-insensitive, trimmed) appear in the
//! canonical vocabulary for each schema.

use crate::error::{Error, Result};
use crate::types::{ActivityRecord, SleepRecord};
use std::collections::HashMap;
use std::path::Path;

/// Minimum overlap with a vocabulary for a header row to match it.
const MATCH_THRESHOLD: usize = 3;

pub const ACTIVITY_HEADERS: &[&str] = &[
    "Day",
    "Steps",
    "Non-Wear",
    "Sleep",
    "Sedentary",
    "Light",
    "Moderate",
    "Vigorous",
];

pub const SLEEP_HEADERS: &[&str] = &[
    "Night Starting",
    "Sleep Onset",
    "Rise Time",
    "Total Elapsed Bed Time",
    "Total Sleep Time",
    "Total Wake Time",
    "Sleep Efficiency",
    "No. Active Periods",
    "Median Activity Length",
];

/// What kind of records a CSV file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Activity,
    Sleep,
    /// Not a schema we reconstruct; the file is ignored
    Unknown,
}

fn normalize(header: &str) -> String {
    header.trim().trim_start_matches('\u{feff}').trim().to_lowercase()
}

fn overlap(normalized: &[String], vocabulary: &[&str]) -> usize {
    vocabulary
        .iter()
        .filter(|canonical| {
            let canonical = canonical.to_lowercase();
            normalized.iter().any(|h| *h == canonical)
        })
        .count()
}

/// Classify a header row. Activity is checked before sleep.
pub fn classify<I, S>(headers: I) -> Classification
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let normalized: Vec<String> = headers
        .into_iter()
        .map(|h| normalize(h.as_ref()))
        .filter(|h| !h.is_empty())
        .collect();

    if overlap(&normalized, ACTIVITY_HEADERS) >= MATCH_THRESHOLD {
        Classification::Activity
    } else if overlap(&normalized, SLEEP_HEADERS) >= MATCH_THRESHOLD {
        Classification::Sleep
    } else {
        Classification::Unknown
    }
}

/// Records parsed from one classified file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedArtifact {
    Activity(Vec<ActivityRecord>),
    Sleep(Vec<SleepRecord>),
    Unknown,
}

/// Column lookup by canonical header name.
struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn new(headers: &csv::StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (normalize(h), i))
            .collect();
        Self { index }
    }

    /// Text of the named column in `row`; empty if the column is absent.
    fn get(&self, row: &csv::StringRecord, canonical: &str) -> String {
        self.index
            .get(&canonical.to_lowercase())
            .and_then(|&i| row.get(i))
            .unwrap_or_default()
            .to_string()
    }
}

fn sleep_record(columns: &Columns, row: &csv::StringRecord) -> SleepRecord {
    SleepRecord {
        night_starting: columns.get(row, "Night Starting"),
        sleep_onset: columns.get(row, "Sleep Onset"),
        rise_time: columns.get(row, "Rise Time"),
        total_elapsed_bed_time: columns.get(row, "Total Elapsed Bed Time"),
        total_sleep_time: columns.get(row, "Total Sleep Time"),
        total_wake_time: columns.get(row, "Total Wake Time"),
        sleep_efficiency: columns.get(row, "Sleep Efficiency"),
        active_periods: columns.get(row, "No. Active Periods"),
        median_activity_length: columns.get(row, "Median Activity Length"),
    }
}

fn activity_record(columns: &Columns, row: &csv::StringRecord) -> ActivityRecord {
    ActivityRecord {
        day: columns.get(row, "Day"),
        steps: columns.get(row, "Steps"),
        non_wear: columns.get(row, "Non-Wear"),
        sleep: columns.get(row, "Sleep"),
        sedentary: columns.get(row, "Sedentary"),
        light: columns.get(row, "Light"),
        moderate: columns.get(row, "Moderate"),
        vigorous: columns.get(row, "Vigorous"),
    }
}

/// Classify CSV `content` by its header row and parse every data row.
///
/// `path` is only used for error messages. Once the file is classified, a
/// row that cannot be decoded or whose field count differs from the header
/// row is an error. An unrecognised or undecodable header is not.
pub fn parse_artifact(path: &Path, content: &[u8]) -> Result<ParsedArtifact> {
    let csv_error = |e: csv::Error| Error::CsvParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(content);

    // Header bytes are decoded lossily: a header that is not UTF-8 simply
    // fails to match either vocabulary.
    let headers: csv::StringRecord = match reader.byte_headers() {
        Ok(raw) => raw.iter().map(|h| String::from_utf8_lossy(h)).collect(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Unreadable header row");
            return Ok(ParsedArtifact::Unknown);
        }
    };
    let classification = classify(headers.iter());
    tracing::debug!(
        path = %path.display(),
        classification = ?classification,
        columns = headers.len(),
        "Classified artifact"
    );

    let columns = Columns::new(&headers);
    match classification {
        Classification::Unknown => Ok(ParsedArtifact::Unknown),
        Classification::Sleep => {
            let mut records = Vec::new();
            for row in reader.records() {
                records.push(sleep_record(&columns, &row.map_err(csv_error)?));
            }
            Ok(ParsedArtifact::Sleep(records))
        }
        Classification::Activity => {
            let mut records = Vec::new();
            for row in reader.records() {
                records.push(activity_record(&columns, &row.map_err(csv_error)?));
            }
            Ok(ParsedArtifact::Activity(records))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_vocabularies() {
        assert_eq!(classify(ACTIVITY_HEADERS), Classification::Activity);
        assert_eq!(classify(SLEEP_HEADERS), Classification::Sleep);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            classify(["steps", "STEPS", "Steps"]),
            classify(["Steps", "steps", "sTePs"])
        );
        assert_eq!(
            classify(["  DAY ", "steps", "VIGOROUS"]),
            Classification::Activity
        );
        assert_eq!(
            classify(["night starting", "SLEEP ONSET", "Rise time"]),
            Classification::Sleep
        );
    }

    #[test]
    fn test_duplicate_headers_count_once() {
        assert_eq!(classify(["steps", "STEPS", "Steps"]), Classification::Unknown);
    }

    #[test]
    fn test_unknown_inputs() {
        assert_eq!(classify(["Foo", "Bar"]), Classification::Unknown);
        assert_eq!(classify(Vec::<String>::new()), Classification::Unknown);
        assert_eq!(classify(["", " ", ""]), Classification::Unknown);
        assert_eq!(classify(["Day", "Steps"]), Classification::Unknown);
    }

    #[test]
    fn test_activity_wins_ties() {
        let headers = [
            "Day",
            "Steps",
            "Sleep",
            "Night Starting",
            "Sleep Onset",
            "Rise Time",
        ];
        assert_eq!(classify(headers), Classification::Activity);
    }

    #[test]
    fn test_parse_sleep_keeps_text() {
        let csv = "Night Starting,Sleep Onset,Rise Time,Sleep Efficiency,Comment\n\
                   2024-03-01,23:14,07:02,77.9,first night\n\
                   2024-03-02,\"00:01\",06:45,081.50,\n";
        let parsed = parse_artifact(Path::new("sleep.csv"), csv.as_bytes()).unwrap();

        let ParsedArtifact::Sleep(records) = parsed else {
            panic!("expected sleep records, got {:?}", parsed);
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].sleep_efficiency, "77.9");
        assert_eq!(records[1].sleep_onset, "00:01");
        assert_eq!(records[1].sleep_efficiency, "081.50");
        assert_eq!(records[0].total_sleep_time, "");
    }

    #[test]
    fn test_parse_activity_by_column_name() {
        let csv = "vigorous,DAY,Steps,Light\n3,Mon,10432,200\n";
        let parsed = parse_artifact(Path::new("activity.csv"), csv.as_bytes()).unwrap();

        assert_eq!(
            parsed,
            ParsedArtifact::Activity(vec![ActivityRecord {
                day: "Mon".to_string(),
                steps: "10432".to_string(),
                light: "200".to_string(),
                vigorous: "3".to_string(),
                ..Default::default()
            }])
        );
    }

    #[test]
    fn test_unknown_file_is_not_an_error() {
        let csv = "Foo,Bar\n1,2\n";
        let parsed = parse_artifact(Path::new("other.csv"), csv.as_bytes()).unwrap();
        assert_eq!(parsed, ParsedArtifact::Unknown);
    }

    #[test]
    fn test_ragged_row_is_an_error() {
        let csv = "Day,Steps,Sedentary\n1,200,30\n2,300\n";
        let err = parse_artifact(Path::new("bad.csv"), csv.as_bytes()).unwrap_err();
        match err {
            Error::CsvParse { path, .. } => assert_eq!(path, Path::new("bad.csv")),
            other => panic!("expected CsvParse, got {:?}", other),
        }
    }

    #[test]
    fn test_byte_order_mark_ignored() {
        let csv = "\u{feff}Day,Steps,Moderate\n1,2,3\n";
        let parsed = parse_artifact(Path::new("bom.csv"), csv.as_bytes()).unwrap();
        assert!(matches!(parsed, ParsedArtifact::Activity(ref r) if r[0].day == "1"));
    }

    #[test]
    fn test_undecodable_header_is_unknown() {
        let csv = b"file,Gr\xf6\xdfe\nraw.bin,12\n";
        let parsed = parse_artifact(Path::new("qc.csv"), csv).unwrap();
        assert_eq!(parsed, ParsedArtifact::Unknown);
    }

    #[test]
    fn test_latin1_extra_column_still_classifies() {
        let csv = b"Day,Steps,Sedentary,Notiz \xfcber\n1,200,30,x\n";
        let parsed = parse_artifact(Path::new("activity.csv"), csv).unwrap();
        assert!(matches!(parsed, ParsedArtifact::Activity(ref r) if r[0].steps == "200"));
    }

    #[test]
    fn test_undecodable_row_in_classified_file_is_an_error() {
        let csv = b"Day,Steps,Sedentary\n1,2\xff00,30\n";
        let err = parse_artifact(Path::new("activity.csv"), csv).unwrap_err();
        assert!(matches!(err, Error::CsvParse { .. }));
    }
}
