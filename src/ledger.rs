//! Position ledger
//!
//! Read-only view of current holdings per account/symbol. The engine never
//! applies trades to the ledger; it is refreshed by the external position feed.

use std::collections::HashMap;

use tracing::debug;

use crate::{AccountId, Position, PositionKey, Symbol};

/// Keyed lookup of the latest known position.
///
/// A missing entry is not an error: it means "no existing position" and is
/// treated as quantity zero with an undefined average cost.
pub trait PositionLedger: Sync {
    fn lookup(&self, account_id: &AccountId, symbol: &Symbol) -> Option<&Position>;
}

/// In-memory snapshot of the position feed at enrichment time
#[derive(Debug, Clone, Default)]
pub struct PositionSnapshot {
    positions: HashMap<PositionKey, Position>,
}

impl PositionSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot keeping, for every account/symbol, the row with the
    /// latest `as_of_date`. Ties keep the row seen last.
    pub fn from_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        let mut snapshot = Self::new();
        for position in positions {
            snapshot.insert(position);
        }
        debug!("Position snapshot built with {} entries", snapshot.len());
        snapshot
    }

    /// Insert a position unless a newer one is already held for its key
    pub fn insert(&mut self, position: Position) {
        let key = position.key();
        match self.positions.get(&key) {
            Some(existing) if existing.as_of_date > position.as_of_date => {}
            _ => {
                self.positions.insert(key, position);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }
}

impl PositionLedger for PositionSnapshot {
    fn lookup(&self, account_id: &AccountId, symbol: &Symbol) -> Option<&Position> {
        self.positions
            .get(&PositionKey::new(account_id.clone(), symbol.clone()))
    }
}

impl FromIterator<Position> for PositionSnapshot {
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        Self::from_positions(iter)
    }
}
