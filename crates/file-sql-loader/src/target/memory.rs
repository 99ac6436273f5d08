//! In-memory destination for tests.
//!
//! Tables keep their declared columns and enforce them the way SQL Server
//! would (see [`rejection_reason`]). Loads buffer rows until commit.

use crate::core::Row;
use crate::error::{LoadError, Result};
use crate::schema::{ColumnDecision, SchemaPlan};
use crate::target::{
    rejection_reason, BatchInsert, HealthCheckResult, LoadTransaction, RowInsert, TargetDb,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<ColumnDecision>,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct MemState {
    tables: HashMap<String, MemTable>,
    /// Remaining simulated connection failures per table.
    begin_failures: HashMap<String, usize>,
    /// Remaining simulated insert errors per table.
    insert_failures: HashMap<String, usize>,
    /// Abort the transaction on the first rejected row.
    doom_on_rejection: bool,
    drops: usize,
    creates: usize,
}

#[derive(Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<MemState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` loads into `table` fail before any row is written.
    pub fn fail_begin(&self, table: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .begin_failures
            .insert(table.to_string(), times);
    }

    /// Make the next `times` inserts into `table` raise an error.
    pub fn fail_insert(&self, table: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .insert_failures
            .insert(table.to_string(), times);
    }

    pub fn doom_on_rejection(&self) {
        self.state.lock().unwrap().doom_on_rejection = true;
    }

    pub fn insert_existing(&self, table: &str, columns: Vec<ColumnDecision>, rows: Vec<Row>) {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(table.to_string(), MemTable { columns, rows });
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().unwrap().tables.contains_key(table)
    }

    pub fn drops(&self) -> usize {
        self.state.lock().unwrap().drops
    }

    pub fn creates(&self) -> usize {
        self.state.lock().unwrap().creates
    }
}

#[async_trait]
impl TargetDb for MemoryTarget {
    fn schema(&self) -> &str {
        "dbo"
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.has_table(table))
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.tables.remove(table).is_some() {
            state.drops += 1;
        }
        Ok(())
    }

    async fn create_table(&self, plan: &SchemaPlan) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.tables.contains_key(&plan.table_name) {
            return Err(LoadError::transient(format!(
                "There is already an object named '{}' in the database",
                plan.table_name
            )));
        }
        state.tables.insert(
            plan.table_name.clone(),
            MemTable {
                columns: plan.columns.clone(),
                rows: Vec::new(),
            },
        );
        state.creates += 1;
        Ok(())
    }

    async fn begin_load(&self, plan: &SchemaPlan) -> Result<Box<dyn LoadTransaction>> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.begin_failures.get_mut(&plan.table_name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LoadError::transient("simulated connection loss"));
            }
        }
        let columns = match state.tables.get(&plan.table_name) {
            Some(table) => table.columns.clone(),
            None => {
                return Err(LoadError::transient(format!(
                    "Invalid object name '{}'",
                    plan.table_name
                )))
            }
        };
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            table: plan.table_name.clone(),
            columns,
            pending: Vec::new(),
            doomed: false,
            doom_on_rejection: state.doom_on_rejection,
        }))
    }

    async fn health_check(&self) -> HealthCheckResult {
        HealthCheckResult {
            connected: true,
            latency_ms: 0,
            error: None,
        }
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemState>>,
    table: String,
    columns: Vec<ColumnDecision>,
    pending: Vec<Row>,
    doomed: bool,
    doom_on_rejection: bool,
}

impl MemoryTransaction {
    fn take_insert_failure(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.insert_failures.get_mut(&self.table) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(LoadError::transient("simulated insert failure"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LoadTransaction for MemoryTransaction {
    async fn insert_batch(&mut self, rows: &[Row]) -> Result<BatchInsert> {
        self.take_insert_failure()?;
        for (i, row) in rows.iter().enumerate() {
            if let Some(reason) = rejection_reason(&self.columns, row) {
                return Ok(BatchInsert::Rejected(format!("Row {}: {}", i + 1, reason)));
            }
        }
        self.pending.extend_from_slice(rows);
        Ok(BatchInsert::Inserted(rows.len() as u64))
    }

    async fn insert_row(&mut self, row: &Row) -> Result<RowInsert> {
        self.take_insert_failure()?;
        if self.doomed {
            return Ok(RowInsert::Aborted("transaction is doomed".into()));
        }
        match rejection_reason(&self.columns, row) {
            None => {
                self.pending.push(row.clone());
                Ok(RowInsert::Inserted)
            }
            Some(reason) if self.doom_on_rejection => {
                self.doomed = true;
                Ok(RowInsert::Aborted(reason))
            }
            Some(reason) => Ok(RowInsert::Rejected(reason)),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        if this.doomed {
            return Err(LoadError::transient(
                "The current transaction cannot be committed",
            ));
        }
        let mut state = this.state.lock().unwrap();
        if let Some(table) = state.tables.get_mut(&this.table) {
            table.rows.extend(this.pending);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
