//! What to do with a destination table that may already exist.

use super::SchemaPlan;
use crate::config::TableMode;
use crate::error::{LoadError, Result};
use crate::target::TargetDb;
use tracing::{info, warn};

/// Decision for one destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    /// Table is absent; create it.
    Create,
    /// Table existed and is dropped before being created again.
    Recreate,
    /// Table existed and is loaded into as is.
    Reuse,
}

impl TableAction {
    pub fn needs_create(&self) -> bool {
        !matches!(self, TableAction::Reuse)
    }
}

/// Existing-table handling for a configured [`TableMode`].
#[derive(Debug, Clone, Copy)]
pub struct TablePolicy {
    mode: TableMode,
}

impl TablePolicy {
    pub fn new(mode: TableMode) -> Self {
        Self { mode }
    }

    /// Pure decision from table presence.
    pub fn decide(&self, table: &str, exists: bool) -> Result<TableAction> {
        match (self.mode, exists) {
            (_, false) => Ok(TableAction::Create),
            (TableMode::DropRecreate, true) => Ok(TableAction::Recreate),
            (TableMode::Append, true) => Ok(TableAction::Reuse),
            (TableMode::Fail, true) => Err(LoadError::TableConflict(table.to_string())),
        }
    }

    /// Check existence, drop and create as decided.
    ///
    /// Each step commits on its own, before any load transaction begins.
    pub async fn prepare(&self, target: &dyn TargetDb, plan: &SchemaPlan) -> Result<TableAction> {
        let table = plan.table_name.as_str();
        let exists = target.table_exists(table).await?;
        let action = self.decide(table, exists)?;

        match action {
            TableAction::Recreate => {
                warn!("Table {} exists, dropping it (table_mode: drop_recreate)", table);
                target.drop_table(table).await?;
            }
            TableAction::Reuse => {
                info!("Table {} exists, appending (table_mode: append)", table);
            }
            TableAction::Create => {}
        }

        if action.needs_create() {
            target.create_table(plan).await?;
            info!("Created table {}", table);
        }

        Ok(action)
    }
}
