//! The vote store seam.
//!
//! A store only appends rows and hands back every row recorded so far.
//! Implementations are blocking; async callers should run them on a
//! blocking thread.

use std::error::Error;
use std::fmt::Display;
use std::sync::Mutex;

use log::debug;

use crate::config::{Timestamp, VoteRecord};

/// A failure talking to the store. The caller may retry the same action.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum StoreError {
    /// The store could not be reached, or the request did not complete.
    Transport(String),
    /// The store answered with an error.
    Rejected { status: u16, message: String },
    /// The store answered something that could not be understood.
    Malformed(String),
    /// Credentials could not be turned into an access token.
    Unauthorized(String),
}

impl Error for StoreError {}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Transport(msg) => write!(f, "vote store unreachable: {}", msg),
            StoreError::Rejected { status, message } => {
                write!(f, "vote store rejected the request ({}): {}", status, message)
            }
            StoreError::Malformed(msg) => write!(f, "unexpected vote store response: {}", msg),
            StoreError::Unauthorized(msg) => write!(f, "vote store authorization failed: {}", msg),
        }
    }
}

pub trait VoteStore: Send + Sync {
    fn append(&self, record: &VoteRecord) -> Result<(), StoreError>;

    /// All rows recorded so far, header excluded. An empty store is not an error.
    fn read_all(&self) -> Result<Vec<VoteRecord>, StoreError>;
}

/// A store kept in process memory. Votes are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<VoteRecord>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn with_rows(rows: Vec<VoteRecord>) -> MemoryStore {
        MemoryStore {
            rows: Mutex::new(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VoteStore for MemoryStore {
    fn append(&self, record: &VoteRecord) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Transport("memory store lock poisoned".to_string()))?;
        rows.push(record.clone());
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<VoteRecord>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Transport("memory store lock poisoned".to_string()))?;
        Ok(rows.clone())
    }
}

/// Converts raw spreadsheet rows (`timestamp`, `option`) into records.
///
/// The first row is dropped when its first cell is not a timestamp: it is
/// the column header. Rows with fewer than two cells are dropped.
pub fn rows_to_records(rows: &[Vec<String>]) -> Vec<VoteRecord> {
    let skip_header = match rows.first().and_then(|r| r.first()) {
        Some(cell) => Timestamp::parse_iso8601(cell).is_none(),
        None => false,
    };
    let mut res: Vec<VoteRecord> = Vec::new();
    for (idx, row) in rows.iter().enumerate() {
        if idx == 0 && skip_header {
            debug!("rows_to_records: skipping header {:?}", row);
            continue;
        }
        match row.as_slice() {
            [timestamp, option, ..] => res.push(VoteRecord {
                timestamp: timestamp.clone(),
                option: option.clone(),
            }),
            _ => debug!("rows_to_records: skipping short row {}: {:?}", idx, row),
        }
    }
    res
}
