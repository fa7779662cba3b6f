// src/export.rs
//
// Buffer export: txt, csv and json renderings of a channel's entries with
// optional inclusive timestamp bounds and a text filter. The filter is
// attempted as a case-insensitive regex; if it does not compile it falls
// back to a plain case-sensitive substring match.

use chrono::{SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::channel::buffer::{Direction, LineEntry, SendMode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Txt,
    Csv,
    Json,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    #[serde(default)]
    pub start_time: Option<u64>,
    #[serde(default)]
    pub end_time: Option<u64>,
    #[serde(default)]
    pub filter: Option<String>,
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn iso_time(timestamp_ms: u64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms as i64)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

enum TextFilter {
    Regex(Regex),
    Substring(String),
}

impl TextFilter {
    fn new(pattern: &str) -> Self {
        match Regex::new(&format!("(?i){}", pattern)) {
            Ok(re) => TextFilter::Regex(re),
            Err(_) => TextFilter::Substring(pattern.to_string()),
        }
    }

    fn matches(&self, data: &str) -> bool {
        match self {
            TextFilter::Regex(re) => re.is_match(data),
            TextFilter::Substring(needle) => data.contains(needle.as_str()),
        }
    }
}

/// Apply the time window and text filter.
fn select<'a>(entries: &'a [LineEntry], options: &ExportOptions) -> Vec<&'a LineEntry> {
    let filter = options.filter.as_deref().filter(|f| !f.is_empty()).map(TextFilter::new);
    entries
        .iter()
        .filter(|e| options.start_time.map_or(true, |start| e.timestamp >= start))
        .filter(|e| options.end_time.map_or(true, |end| e.timestamp <= end))
        .filter(|e| filter.as_ref().map_or(true, |f| f.matches(&e.data)))
        .collect()
}

fn mode_label(mode: Option<SendMode>) -> &'static str {
    match mode {
        Some(SendMode::Hex) => "hex",
        Some(SendMode::Binary) => "binary",
        // rx entries and plain ascii sends both render as ascii
        _ => "ascii",
    }
}

/// Render the selected entries in the requested format.
pub fn export_entries(entries: &[LineEntry], format: ExportFormat, options: &ExportOptions) -> String {
    let selected = select(entries, options);

    match format {
        ExportFormat::Txt => {
            let mut out = String::new();
            for entry in selected {
                let marker = match entry.direction {
                    Direction::Rx => "RX <",
                    Direction::Tx => "TX >",
                };
                out.push_str(&format!(
                    "[{}] {} {}\n",
                    iso_time(entry.timestamp),
                    marker,
                    entry.data
                ));
            }
            out
        }
        ExportFormat::Csv => {
            let mut out = String::from("Timestamp,ISO_Time,Direction,Data,Mode\n");
            for entry in selected {
                let direction = match entry.direction {
                    Direction::Rx => "rx",
                    Direction::Tx => "tx",
                };
                let data = entry.data.replace('"', "\"\"");
                out.push_str(&format!(
                    "{},{},{},\"{}\",{}\n",
                    entry.timestamp,
                    iso_time(entry.timestamp),
                    direction,
                    data,
                    mode_label(entry.mode)
                ));
            }
            out
        }
        ExportFormat::Json => {
            let items: Vec<serde_json::Value> = selected
                .iter()
                .map(|entry| {
                    json!({
                        "timestamp": entry.timestamp,
                        "isoTime": iso_time(entry.timestamp),
                        "direction": entry.direction,
                        "data": entry.data,
                        "mode": entry.mode,
                        "index": entry.index,
                    })
                })
                .collect();
            serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: u64, direction: Direction, data: &str, index: u64) -> LineEntry {
        LineEntry {
            timestamp: ts,
            direction,
            data: data.to_string(),
            mode: match direction {
                Direction::Tx => Some(SendMode::Ascii),
                Direction::Rx => None,
            },
            index,
            channel_id: "a".to_string(),
        }
    }

    fn sample() -> Vec<LineEntry> {
        vec![
            entry(1700000000000, Direction::Rx, "hello", 0),
            entry(1700000001000, Direction::Tx, "SET 42", 1),
            entry(1700000002000, Direction::Rx, "OK: done", 2),
        ]
    }

    #[test]
    fn test_txt_format() {
        let out = export_entries(&sample(), ExportFormat::Txt, &ExportOptions::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("RX < hello"));
        assert!(lines[1].contains("TX > SET 42"));
        assert!(lines[0].starts_with("[2023-"));
    }

    #[test]
    fn test_csv_format_escapes_quotes() {
        let entries = vec![entry(1700000000000, Direction::Rx, "say \"hi\"", 0)];
        let out = export_entries(&entries, ExportFormat::Csv, &ExportOptions::default());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Timestamp,ISO_Time,Direction,Data,Mode");
        assert!(lines[1].contains("\"say \"\"hi\"\"\""));
        assert!(lines[1].ends_with(",ascii"));
    }

    #[test]
    fn test_json_round_trip() {
        let entries = sample();
        let out = export_entries(&entries, ExportFormat::Json, &ExportOptions::default());
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        let items = parsed.as_array().unwrap();
        assert_eq!(items.len(), entries.len());
        for (original, reparsed) in entries.iter().zip(items.iter()) {
            assert_eq!(reparsed["timestamp"], original.timestamp);
            assert_eq!(reparsed["direction"], serde_json::to_value(original.direction).unwrap());
            assert_eq!(reparsed["data"], original.data.as_str());
            assert_eq!(reparsed["mode"], serde_json::to_value(original.mode).unwrap());
            assert_eq!(reparsed["index"], original.index);
        }
    }

    #[test]
    fn test_time_window_inclusive() {
        let options = ExportOptions {
            start_time: Some(1700000001000),
            end_time: Some(1700000002000),
            filter: None,
        };
        let out = export_entries(&sample(), ExportFormat::Txt, &options);
        assert_eq!(out.lines().count(), 2);
        assert!(out.contains("SET 42"));
        assert!(out.contains("OK: done"));
        assert!(!out.contains("hello"));
    }

    #[test]
    fn test_filter_regex_case_insensitive() {
        let options = ExportOptions {
            filter: Some("^ok:".to_string()),
            ..ExportOptions::default()
        };
        let out = export_entries(&sample(), ExportFormat::Txt, &options);
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains("OK: done"));
    }

    #[test]
    fn test_filter_falls_back_to_substring() {
        // Unbalanced bracket fails to compile as a regex; the literal
        // substring match still applies, case sensitively
        let entries = vec![
            entry(1, Direction::Rx, "value [3", 0),
            entry(2, Direction::Rx, "VALUE [3", 1),
        ];
        let options = ExportOptions {
            filter: Some("[3".to_string()),
            ..ExportOptions::default()
        };
        let out = export_entries(&entries, ExportFormat::Txt, &options);
        assert_eq!(out.lines().count(), 2);

        let options = ExportOptions {
            filter: Some("value [3".to_string()),
            ..ExportOptions::default()
        };
        let out = export_entries(&entries, ExportFormat::Txt, &options);
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn test_json_rx_mode_is_null() {
        let entries = vec![entry(1, Direction::Rx, "x", 0)];
        let out = export_entries(&entries, ExportFormat::Json, &ExportOptions::default());
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(parsed[0]["mode"].is_null());
    }
}
