mod config;
use log::debug;

use std::collections::HashMap;

pub use crate::config::*;

pub mod builder;
pub mod cooldown;
pub mod flow;
pub mod manual;
pub mod store;

/// Vote counts per option, in the poll's declaration order.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Tally {
    pub counts: Vec<(String, u64)>,
    /// Rows read from the store, counted or not.
    pub rows: usize,
}

impl Tally {
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|(_, c)| *c).sum()
    }

    pub fn count(&self, option: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|(name, _)| name == option)
            .map(|(_, c)| *c)
    }

    /// The store had no rows at all. Rows for unknown options still make
    /// the tally non-empty, with zero counts.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Counts the rows for each known option.
///
/// Every option of `known_options` appears in the result, with a zero count
/// if no row names it. Rows naming anything else are ignored.
pub fn compute_tally(rows: &[VoteRecord], known_options: &[PollOption]) -> Tally {
    let mut by_name: HashMap<&str, u64> = known_options
        .iter()
        .map(|o| (o.name.as_str(), 0))
        .collect();
    let mut ignored: usize = 0;
    for row in rows {
        match by_name.get_mut(row.option.as_str()) {
            Some(c) => *c += 1,
            None => ignored += 1,
        }
    }
    if ignored > 0 {
        debug!("compute_tally: ignored {} rows with unknown options", ignored);
    }
    Tally {
        counts: known_options
            .iter()
            .map(|o| (o.name.clone(), by_name.get(o.name.as_str()).cloned().unwrap_or(0)))
            .collect(),
        rows: rows.len(),
    }
}
