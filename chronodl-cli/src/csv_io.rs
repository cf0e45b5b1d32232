//! Input table and `index.csv` I/O (§6 "EXTERNAL INTERFACES", §4.7 C15,
//! §5 "Index CSV | C15 | Single mutex around read-modify-write").
//!
//! Grounded on the original Python `main/unified_csv.py`: entry_id/
//! short_title/main_author/retrievable/link columns, a process-wide lock
//! around read-modify-write updates, and a `true`/`1`/`yes` boolean-ish
//! parse for `retrievable`. Rewritten around `csv::StringRecord` so
//! unrecognised columns in the input table survive round-tripping
//! untouched, and around the teacher's atomic temp-then-rename write
//! discipline instead of the original's timestamped `.backup_*` copies.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chronodl_core::{IndexRecord, IndexSink, WorkStatus};
use thiserror::Error;

const ENTRY_ID_COL: &str = "entry_id";
const TITLE_COL: &str = "short_title";
const CREATOR_COL: &str = "main_author";
const DIRECT_LINK_COL: &str = "direct_link";
const STATUS_COL: &str = "retrievable";
const LINK_COL: &str = "link";
const PROVIDER_COL: &str = "download_provider";
const TIMESTAMP_COL: &str = "download_timestamp";

#[derive(Debug, Error)]
pub enum CsvIoError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("input CSV {path} is missing the required column {column:?}")]
    MissingColumn { path: PathBuf, column: &'static str },
}

/// Row-level pending/completed/failed classification per §6: `true`/`1`/
/// `yes` → completed, `false`/`0`/`no` → failed, blank → pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Completed,
    Failed,
    Pending,
}

fn parse_retrievable(raw: &str) -> RowStatus {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => RowStatus::Completed,
        "false" | "0" | "no" => RowStatus::Failed,
        _ => RowStatus::Pending,
    }
}

/// One input row, resolved to ChronoDL's canonical fields. `entry_id` is
/// always populated: blank input entries are synthesised as `E{row:04d}`.
#[derive(Debug, Clone)]
pub struct InputRow {
    pub entry_id: String,
    pub title: String,
    pub creator: Option<String>,
    pub direct_link: Option<String>,
    pub status: RowStatus,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Thread-safe owner of the input CSV, preserving unrecognised columns and
/// rewriting the whole file atomically on every update (§4.7: "update the
/// input CSV atomically").
pub struct InputTable {
    path: PathBuf,
    header: Vec<String>,
    records: Mutex<Vec<csv::StringRecord>>,
    entry_id_idx: usize,
    status_idx: usize,
    link_idx: usize,
    provider_idx: usize,
    timestamp_idx: usize,
}

impl InputTable {
    /// Loads the input CSV, synthesising missing `entry_id` values and
    /// appending `link`/`download_provider`/`download_timestamp` columns
    /// if absent, matching the original's `mark_success` behaviour of
    /// creating those columns lazily.
    pub fn load(path: impl Into<PathBuf>) -> Result<(Self, Vec<InputRow>), CsvIoError> {
        let path = path.into();
        let mut reader = csv::Reader::from_path(&path).map_err(|source| CsvIoError::Csv {
            path: path.clone(),
            source,
        })?;

        let mut header: Vec<String> = reader
            .headers()
            .map_err(|source| CsvIoError::Csv {
                path: path.clone(),
                source,
            })?
            .iter()
            .map(str::to_string)
            .collect();

        let entry_id_idx = header.iter().position(|c| c == ENTRY_ID_COL).ok_or(CsvIoError::MissingColumn {
            path: path.clone(),
            column: ENTRY_ID_COL,
        })?;
        let title_idx = header.iter().position(|c| c == TITLE_COL).ok_or(CsvIoError::MissingColumn {
            path: path.clone(),
            column: TITLE_COL,
        })?;
        let creator_idx = header.iter().position(|c| c == CREATOR_COL);
        let direct_link_idx = header.iter().position(|c| c == DIRECT_LINK_COL);

        let mut records: Vec<csv::StringRecord> = reader
            .records()
            .collect::<Result<_, _>>()
            .map_err(|source| CsvIoError::Csv {
                path: path.clone(),
                source,
            })?;

        let mut ensure_column = |header: &mut Vec<String>, records: &mut [csv::StringRecord], name: &str| -> usize {
            if let Some(idx) = header.iter().position(|c| c == name) {
                return idx;
            }
            header.push(name.to_string());
            for record in records.iter_mut() {
                let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
                fields.push(String::new());
                *record = csv::StringRecord::from(fields);
            }
            header.len() - 1
        };

        let status_idx = ensure_column(&mut header, &mut records, STATUS_COL);
        let link_idx = ensure_column(&mut header, &mut records, LINK_COL);
        let provider_idx = ensure_column(&mut header, &mut records, PROVIDER_COL);
        let timestamp_idx = ensure_column(&mut header, &mut records, TIMESTAMP_COL);

        let mut rows = Vec::with_capacity(records.len());
        for (row_index, record) in records.iter().enumerate() {
            let raw_entry_id = record.get(entry_id_idx).unwrap_or_default();
            let entry_id = non_empty(raw_entry_id).unwrap_or_else(|| format!("E{row_index:04}"));
            let title = record.get(title_idx).unwrap_or_default().trim().to_string();
            let creator = creator_idx.and_then(|idx| record.get(idx)).and_then(non_empty);
            let direct_link = direct_link_idx.and_then(|idx| record.get(idx)).and_then(non_empty);
            let status = parse_retrievable(record.get(status_idx).unwrap_or_default());
            rows.push(InputRow {
                entry_id,
                title,
                creator,
                direct_link,
                status,
            });
        }

        let table = InputTable {
            path,
            header,
            records: Mutex::new(records),
            entry_id_idx,
            status_idx,
            link_idx,
            provider_idx,
            timestamp_idx,
        };
        Ok((table, rows))
    }

    fn effective_entry_id(&self, record: &csv::StringRecord, row_index: usize) -> String {
        non_empty(record.get(self.entry_id_idx).unwrap_or_default()).unwrap_or_else(|| format!("E{row_index:04}"))
    }

    fn update(&self, entry_id: &str, mutate: impl FnOnce(&mut Vec<String>)) -> Result<bool, CsvIoError> {
        let mut records = self.records.lock().unwrap_or_else(|poison| poison.into_inner());
        let Some((row_index, record)) = records
            .iter()
            .enumerate()
            .find(|(row_index, record)| self.effective_entry_id(record, *row_index) == entry_id)
            .map(|(idx, record)| (idx, record.clone()))
        else {
            return Ok(false);
        };
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        mutate(&mut fields);
        records[row_index] = csv::StringRecord::from(fields);
        self.write_locked(&records)?;
        Ok(true)
    }

    /// §6: "On success the row is updated with `retrievable=true`, `link`,
    /// `download_provider`, and `download_timestamp`."
    pub fn mark_success(&self, entry_id: &str, item_url: &str, provider: &str, timestamp: chrono::DateTime<chrono::Utc>) -> Result<bool, CsvIoError> {
        self.update(entry_id, |fields| {
            fields[self.status_idx] = "true".to_string();
            fields[self.link_idx] = item_url.to_string();
            fields[self.provider_idx] = provider.to_string();
            fields[self.timestamp_idx] = timestamp.to_rfc3339();
        })
    }

    pub fn mark_failed(&self, entry_id: &str) -> Result<bool, CsvIoError> {
        self.update(entry_id, |fields| {
            fields[self.status_idx] = "false".to_string();
        })
    }

    /// §4.7: "deferral leaves the row blank for retry."
    pub fn mark_deferred(&self, entry_id: &str) -> Result<bool, CsvIoError> {
        self.update(entry_id, |fields| {
            fields[self.status_idx].clear();
        })
    }

    fn write_locked(&self, records: &[csv::StringRecord]) -> Result<(), CsvIoError> {
        let tmp_path = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp_path).map_err(|source| CsvIoError::Csv {
                path: tmp_path.clone(),
                source,
            })?;
            writer.write_record(&self.header).map_err(|source| CsvIoError::Csv {
                path: tmp_path.clone(),
                source,
            })?;
            for record in records {
                writer.write_record(record).map_err(|source| CsvIoError::Csv {
                    path: tmp_path.clone(),
                    source,
                })?;
            }
            writer.flush().map_err(|source| CsvIoError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|source| CsvIoError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// `index.csv` columns (§6): work_id, entry_id, work_dir, title, creator,
/// selected_provider, selected_provider_key, selected_source_id,
/// selected_dir, work_json, status, item_url.
pub struct CsvIndexSink {
    writer: Mutex<csv::Writer<File>>,
    input_table: Option<std::sync::Arc<InputTable>>,
}

impl CsvIndexSink {
    /// `input_table`, when given, is kept in sync on every record per §4.7
    /// ("on task completion, update the input CSV atomically").
    pub fn create(path: &Path, input_table: Option<std::sync::Arc<InputTable>>) -> Result<Self, CsvIoError> {
        let is_new = !path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| CsvIoError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer
                .write_record([
                    "work_id",
                    "entry_id",
                    "work_dir",
                    "title",
                    "creator",
                    "selected_provider",
                    "selected_provider_key",
                    "selected_source_id",
                    "selected_dir",
                    "work_json",
                    "status",
                    "item_url",
                ])
                .map_err(|source| CsvIoError::Csv {
                    path: path.to_path_buf(),
                    source,
                })?;
            writer.flush().map_err(|source| CsvIoError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(CsvIndexSink {
            writer: Mutex::new(writer),
            input_table,
        })
    }
}

fn status_label(status: WorkStatus) -> &'static str {
    match status {
        WorkStatus::Pending => "pending",
        WorkStatus::Completed => "completed",
        WorkStatus::Partial => "partial",
        WorkStatus::Failed => "failed",
        WorkStatus::Deferred => "deferred",
        WorkStatus::NoMatch => "no_match",
    }
}

impl IndexSink for CsvIndexSink {
    fn record(&self, record: IndexRecord) {
        if let Some(table) = &self.input_table {
            if let Some(entry_id) = record.entry_id.clone() {
                let outcome = match record.status {
                    WorkStatus::Completed | WorkStatus::Partial => table.mark_success(
                        &entry_id,
                        record.item_url.as_deref().unwrap_or_default(),
                        record.provider.as_deref().unwrap_or_default(),
                        chrono::Utc::now(),
                    ),
                    WorkStatus::Deferred => table.mark_deferred(&entry_id),
                    WorkStatus::Failed | WorkStatus::NoMatch => table.mark_failed(&entry_id),
                    WorkStatus::Pending => Ok(true),
                };
                if let Err(error) = outcome {
                    tracing::warn!(entry_id = %entry_id, %error, "failed to update input CSV row");
                }
            }
        }

        let mut writer = self.writer.lock().unwrap_or_else(|poison| poison.into_inner());
        let row = [
            record.work_id,
            record.entry_id.unwrap_or_default(),
            record.work_dir.display().to_string(),
            record.title,
            record.creator.unwrap_or_default(),
            record.provider.unwrap_or_default(),
            record.provider_key.unwrap_or_default(),
            record.source_id.unwrap_or_default(),
            record.work_dir.join("objects").display().to_string(),
            record.work_dir.join("work.json").display().to_string(),
            status_label(record.status).to_string(),
            record.item_url.or(record.detail).unwrap_or_default(),
        ];
        if writer.write_record(row).is_ok() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    // ==== retrievable parsing ====

    #[test]
    fn parses_boolean_ish_retrievable_values() {
        assert_eq!(parse_retrievable("true"), RowStatus::Completed);
        assert_eq!(parse_retrievable("1"), RowStatus::Completed);
        assert_eq!(parse_retrievable("YES"), RowStatus::Completed);
        assert_eq!(parse_retrievable("false"), RowStatus::Failed);
        assert_eq!(parse_retrievable("0"), RowStatus::Failed);
        assert_eq!(parse_retrievable(""), RowStatus::Pending);
        assert_eq!(parse_retrievable("   "), RowStatus::Pending);
    }

    // ==== loading ====

    #[test]
    fn synthesises_entry_id_when_blank() {
        let file = write_csv("entry_id,short_title,main_author,retrievable\n,The Art of Cooking,,\n");
        let (_table, rows) = InputTable::load(file.path()).unwrap();
        assert_eq!(rows[0].entry_id, "E0000");
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let file = write_csv("title,author\nfoo,bar\n");
        let result = InputTable::load(file.path());
        assert!(matches!(result, Err(CsvIoError::MissingColumn { .. })));
    }

    #[test]
    fn direct_link_present_row_parses() {
        let file = write_csv(
            "entry_id,short_title,main_author,direct_link,retrievable\nE0001,The Art of Cooking,Jane Doe,https://example.org/manifest.json,\n",
        );
        let (_table, rows) = InputTable::load(file.path()).unwrap();
        assert_eq!(rows[0].direct_link.as_deref(), Some("https://example.org/manifest.json"));
        assert_eq!(rows[0].creator.as_deref(), Some("Jane Doe"));
        assert_eq!(rows[0].status, RowStatus::Pending);
    }

    // ==== updates ====

    #[test]
    fn mark_success_updates_status_link_provider_and_timestamp() {
        let file = write_csv("entry_id,short_title,main_author,retrievable\nE0001,The Art of Cooking,,\n");
        let (table, _rows) = InputTable::load(file.path()).unwrap();
        let now = chrono::Utc::now();
        assert!(table.mark_success("E0001", "https://archive.org/details/x", "internet_archive", now).unwrap());

        let (_table2, reloaded) = InputTable::load(file.path()).unwrap();
        assert_eq!(reloaded[0].status, RowStatus::Completed);
    }

    #[test]
    fn mark_failed_then_mark_deferred_clears_status() {
        let file = write_csv("entry_id,short_title,main_author,retrievable\nE0001,The Art of Cooking,,\n");
        let (table, _rows) = InputTable::load(file.path()).unwrap();
        table.mark_failed("E0001").unwrap();
        let (_t, after_fail) = InputTable::load(file.path()).unwrap();
        assert_eq!(after_fail[0].status, RowStatus::Failed);

        table.mark_deferred("E0001").unwrap();
        let (_t2, after_defer) = InputTable::load(file.path()).unwrap();
        assert_eq!(after_defer[0].status, RowStatus::Pending);
    }

    #[test]
    fn update_of_unknown_entry_id_returns_false() {
        let file = write_csv("entry_id,short_title,main_author,retrievable\nE0001,The Art of Cooking,,\n");
        let (table, _rows) = InputTable::load(file.path()).unwrap();
        assert!(!table.mark_failed("E9999").unwrap());
    }

    #[test]
    fn write_leaves_no_temp_file_behind() {
        let file = write_csv("entry_id,short_title,main_author,retrievable\nE0001,The Art of Cooking,,\n");
        let (table, _rows) = InputTable::load(file.path()).unwrap();
        table.mark_failed("E0001").unwrap();
        assert!(!file.path().with_extension("csv.tmp").exists());
    }

    // ==== index sink ====

    #[test]
    fn index_sink_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.csv");
        let sink = CsvIndexSink::create(&path, None).unwrap();
        sink.record(IndexRecord {
            work_id: "abc1234567".to_string(),
            entry_id: Some("E0001".to_string()),
            work_dir: dir.path().join("e_0001_the_art_of_cooking"),
            title: "The Art of Cooking".to_string(),
            creator: None,
            status: WorkStatus::Completed,
            provider: Some("Internet Archive".to_string()),
            provider_key: Some("internet_archive".to_string()),
            source_id: Some("abc123".to_string()),
            item_url: Some("https://archive.org/details/abc123".to_string()),
            detail: None,
        });
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with("work_id,entry_id,work_dir"));
    }

    #[test]
    fn index_sink_syncs_input_table_on_completion() {
        let csv_file = write_csv("entry_id,short_title,main_author,retrievable\nE0001,The Art of Cooking,,\n");
        let (table, _rows) = InputTable::load(csv_file.path()).unwrap();
        let table = std::sync::Arc::new(table);

        let dir = tempfile::tempdir().unwrap();
        let sink = CsvIndexSink::create(&dir.path().join("index.csv"), Some(std::sync::Arc::clone(&table))).unwrap();
        sink.record(IndexRecord {
            work_id: "abc1234567".to_string(),
            entry_id: Some("E0001".to_string()),
            work_dir: dir.path().join("e_0001_the_art_of_cooking"),
            title: "The Art of Cooking".to_string(),
            creator: None,
            status: WorkStatus::Completed,
            provider: Some("Internet Archive".to_string()),
            provider_key: Some("internet_archive".to_string()),
            source_id: Some("abc123".to_string()),
            item_url: Some("https://archive.org/details/abc123".to_string()),
            detail: None,
        });

        let (_t, reloaded) = InputTable::load(csv_file.path()).unwrap();
        assert_eq!(reloaded[0].status, RowStatus::Completed);
    }
}
