//! Append-only CSV ledger of every evaluation outcome.
//!
//! One decision is one CSV row. Every append is flushed and synced before
//! returning, so a crash loses at most the row being written. The header is
//! written on the first append iff the file was empty when opened.
//!
//! A file that does not end in a newline holds a torn final row. Opening
//! for append truncates it back to the last complete line, and reading skips
//! it, so the torn row never merges with the rows appended after it.
//!
//! The ledger never rewrites or deletes rows. Re-running a date appends new
//! rows for keys that already exist; replay consumers collapse those with
//! [`dedup_first_occurrence`].

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Action, Decision, DecisionKey, Provenance};

/// Column order of the ledger file.
pub const LEDGER_HEADER: [&str; 9] = [
    "Date",
    "Ticker",
    "CompanyName",
    "Action",
    "Confidence",
    "Reasoning",
    "Financials",
    "Technicals",
    "PromptID",
];

/// Replacement for embedded line breaks; one record must stay one row.
pub const LINE_BREAK_SEPARATOR: &str = " | ";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One parsed ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub company_name: Option<String>,
    pub action: Action,
    pub confidence: f64,
    pub reasoning: String,
    pub financials: Option<String>,
    pub technicals: Option<String>,
    pub prompt_id: Option<String>,
}

impl LedgerRow {
    pub fn key(&self) -> DecisionKey {
        DecisionKey {
            date: self.date,
            ticker: self.ticker.clone(),
        }
    }

    /// Display name, falling back to the ticker.
    pub fn display_name(&self) -> &str {
        self.company_name.as_deref().unwrap_or(&self.ticker)
    }

    pub fn into_decision(self) -> Decision {
        Decision {
            ticker: self.ticker,
            date: self.date,
            action: self.action,
            confidence: self.confidence,
            reasoning: self.reasoning,
            provenance: Provenance {
                company_name: self.company_name,
                financial_summary: self.financials,
                technical_summary: self.technicals,
                prompt_id: self.prompt_id,
            },
        }
    }
}

/// Raw row as written on disk. Columns are matched by header name, so legacy
/// ledgers without the provenance columns still load.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Ticker")]
    ticker: String,
    #[serde(rename = "CompanyName", default)]
    company_name: Option<String>,
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Confidence")]
    confidence: String,
    #[serde(rename = "Reasoning", default)]
    reasoning: String,
    #[serde(rename = "Financials", default)]
    financials: Option<String>,
    #[serde(rename = "Technicals", default)]
    technicals: Option<String>,
    #[serde(rename = "PromptID", default)]
    prompt_id: Option<String>,
}

impl RawRow {
    fn parse(self) -> Result<LedgerRow, String> {
        let date = NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d")
            .map_err(|e| format!("bad date '{}': {e}", self.date))?;
        let ticker = self.ticker.trim().to_string();
        if ticker.is_empty() {
            return Err("empty ticker".into());
        }
        let action = self.action.parse::<Action>().map_err(|e| e.to_string())?;
        let confidence = self
            .confidence
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("bad confidence '{}': {e}", self.confidence))?;

        Ok(LedgerRow {
            date,
            ticker,
            company_name: non_empty(self.company_name),
            action,
            confidence,
            reasoning: self.reasoning,
            financials: non_empty(self.financials),
            technicals: non_empty(self.technicals),
            prompt_id: non_empty(self.prompt_id),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Collapse embedded line breaks into [`LINE_BREAK_SEPARATOR`].
pub fn flatten_line_breaks(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', LINE_BREAK_SEPARATOR)
}

/// Everything read back from a ledger file.
#[derive(Debug, Clone, Default)]
pub struct LedgerContents {
    /// Parsed rows in file order (duplicates included).
    pub rows: Vec<LedgerRow>,
    /// Rows that could not be parsed and were skipped.
    pub malformed: usize,
}

/// Append-only writer over a ledger file.
pub struct DecisionLedger {
    path: PathBuf,
    writer: csv::Writer<File>,
    needs_header: bool,
    appended: usize,
}

impl DecisionLedger {
    /// Open (or create) a ledger for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| LedgerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();
        let complete_len = complete_prefix_len(&file, len).map_err(io_err)?;
        if complete_len < len {
            tracing::warn!(
                path = %path.display(),
                torn_bytes = len - complete_len,
                "truncating torn final ledger row"
            );
            file.set_len(complete_len).map_err(io_err)?;
            file.sync_data().map_err(io_err)?;
        }
        let needs_header = complete_len == 0;

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        Ok(Self {
            path,
            writer,
            needs_header,
            appended: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended through this handle.
    pub fn appended(&self) -> usize {
        self.appended
    }

    /// Append one decision and sync it to disk before returning.
    pub fn append(&mut self, decision: &Decision) -> Result<(), LedgerError> {
        if self.needs_header {
            self.writer
                .write_record(LEDGER_HEADER)
                .map_err(|source| self.csv_err(source))?;
            self.needs_header = false;
        }

        let p = &decision.provenance;
        let record = [
            decision.date.format("%Y-%m-%d").to_string(),
            flatten_line_breaks(&decision.ticker),
            flatten_line_breaks(p.company_name.as_deref().unwrap_or("")),
            decision.action.to_string(),
            format!("{:.2}", decision.confidence),
            flatten_line_breaks(&decision.reasoning),
            flatten_line_breaks(p.financial_summary.as_deref().unwrap_or("")),
            flatten_line_breaks(p.technical_summary.as_deref().unwrap_or("")),
            flatten_line_breaks(p.prompt_id.as_deref().unwrap_or("")),
        ];

        self.writer
            .write_record(&record)
            .map_err(|source| self.csv_err(source))?;
        self.writer.flush().map_err(|source| self.io_err(source))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|source| self.io_err(source))?;

        self.appended += 1;
        Ok(())
    }

    /// Read every row of a ledger file in file order.
    ///
    /// A missing file is an empty ledger. Unparseable rows (for example a
    /// torn final row) are skipped with a warning and counted.
    pub fn read_all(path: impl AsRef<Path>) -> Result<LedgerContents, LedgerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(LedgerContents::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|source| LedgerError::Csv {
                path: path.to_path_buf(),
                source,
            })?;

        let mut contents = LedgerContents::default();
        let mut last_parsed = false;
        for (idx, result) in reader.deserialize::<RawRow>().enumerate() {
            // +2: header line and 1-based numbering.
            let line = idx + 2;
            last_parsed = false;
            match result {
                Ok(raw) => match raw.parse() {
                    Ok(row) => {
                        contents.rows.push(row);
                        last_parsed = true;
                    }
                    Err(reason) => {
                        tracing::warn!(line, %reason, "skipping malformed ledger row");
                        contents.malformed += 1;
                    }
                },
                Err(err) if err.is_io_error() => {
                    return Err(LedgerError::Csv {
                        path: path.to_path_buf(),
                        source: err,
                    });
                }
                Err(err) => {
                    tracing::warn!(line, error = %err, "skipping unreadable ledger row");
                    contents.malformed += 1;
                }
            }
        }

        if last_parsed && !ends_with_newline(path)? {
            if let Some(row) = contents.rows.pop() {
                tracing::warn!(ticker = %row.ticker, date = %row.date, "skipping torn final ledger row");
                contents.malformed += 1;
            }
        }

        Ok(contents)
    }

    fn io_err(&self, source: io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

const TAIL_CHUNK: u64 = 4096;

/// Length of the prefix of `file` that ends on a newline (0 if none).
fn complete_prefix_len(mut file: &File, len: u64) -> io::Result<u64> {
    let mut end = len;
    let mut buf = vec![0u8; TAIL_CHUNK as usize];
    while end > 0 {
        let start = end.saturating_sub(TAIL_CHUNK);
        let chunk = &mut buf[..(end - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(chunk)?;
        if let Some(pos) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(start + pos as u64 + 1);
        }
        end = start;
    }
    Ok(0)
}

fn ends_with_newline(path: &Path) -> Result<bool, LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();
    Ok(complete_prefix_len(&file, len).map_err(io_err)? == len)
}

/// Keep the first row per (date, ticker), in file order.
///
/// Returns the unique rows and the number of duplicates dropped.
pub fn dedup_first_occurrence(rows: Vec<LedgerRow>) -> (Vec<LedgerRow>, usize) {
    let mut seen: HashSet<DecisionKey> = HashSet::with_capacity(rows.len());
    let mut unique = Vec::with_capacity(rows.len());
    let mut dropped = 0;

    for row in rows {
        if seen.insert(row.key()) {
            unique.push(row);
        } else {
            tracing::debug!(date = %row.date, ticker = %row.ticker, "dropping duplicate ledger row");
            dropped += 1;
        }
    }

    (unique, dropped)
}
