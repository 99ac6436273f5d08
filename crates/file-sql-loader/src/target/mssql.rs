//! SQL Server destination (tiberius over a bb8 pool).

use crate::config::DatabaseConfig;
use crate::core::{Row, SqlNullType, SqlValue};
use crate::error::{LoadError, Result};
use crate::schema::{qualify, quote_ident, ColumnDecision, SchemaPlan};
use crate::target::{
    rejection_reason, BatchInsert, HealthCheckResult, LoadTransaction, RowInsert, TargetDb,
};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::time::Instant;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

/// Parameters per statement, kept under SQL Server's 2100 limit.
const MAX_PARAMS_PER_STATEMENT: usize = 2000;

/// Row constructors allowed in one `VALUES` clause.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

type MssqlClient = Client<Compat<TcpStream>>;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub(crate) struct TiberiusConnectionManager {
    config: DatabaseConfig,
}

impl TiberiusConnectionManager {
    fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.trust_server_cert {
            config.trust_cert();
        }
        if self.config.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        // A load that never reached commit/rollback must not leak its transaction.
        conn.simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; SELECT 1")
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server destination.
pub struct MssqlTarget {
    pool: Pool<TiberiusConnectionManager>,
    schema: String,
}

impl MssqlTarget {
    /// Create the pool and test one connection.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)
            .await
            .map_err(|e| LoadError::pool(e, "creating MSSQL pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| LoadError::pool(e, "testing MSSQL connection"))?;
            conn.simple_query("SELECT 1").await?.into_results().await?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    /// Get a connection from the pool.
    pub(crate) async fn get_conn(
        &self,
    ) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| LoadError::pool(e, "getting MSSQL connection"))
    }
}

#[async_trait]
impl TargetDb for MssqlTarget {
    fn schema(&self) -> &str {
        &self.schema
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;
        let query = "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2";

        let result = conn.query(query, &[&self.schema.as_str(), &table]).await?;
        if let Some(row) = result.into_first_result().await?.into_iter().next() {
            let count: i32 = row.get(0).unwrap_or(0);
            return Ok(count > 0);
        }
        Ok(false)
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let qualified = qualify(&self.schema, table);
        let query = format!(
            "IF OBJECT_ID(N'{}', 'U') IS NOT NULL DROP TABLE {}",
            qualified.replace('\'', "''"),
            qualified
        );
        conn.execute(query, &[]).await?;
        debug!("Dropped table: {}", qualified);
        Ok(())
    }

    async fn create_table(&self, plan: &SchemaPlan) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let ddl = plan.create_table_sql(&self.schema);
        info!("DDL Statement:\n{}", ddl);
        conn.execute(ddl, &[]).await?;
        debug!("Created table: {}.{}", self.schema, plan.table_name);
        Ok(())
    }

    async fn begin_load(&self, plan: &SchemaPlan) -> Result<Box<dyn LoadTransaction>> {
        let mut conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| LoadError::pool(e, "getting MSSQL load connection"))?;

        // Plain batches keep the transaction open across statements; BEGIN inside
        // sp_executesql would trip the transaction count check (error 266).
        conn.simple_query("SET XACT_ABORT OFF; BEGIN TRANSACTION")
            .await?
            .into_results()
            .await?;

        Ok(Box::new(MssqlLoadTransaction {
            conn,
            table: qualify(&self.schema, &plan.table_name),
            columns: plan.columns.clone(),
        }))
    }

    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let outcome = async {
            let mut conn = self.get_conn().await?;
            conn.simple_query("SELECT 1").await?.into_results().await?;
            Ok::<(), LoadError>(())
        }
        .await;

        HealthCheckResult {
            connected: outcome.is_ok(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
        }
    }
}

/// One open transaction on a dedicated pooled connection.
struct MssqlLoadTransaction {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
    table: String,
    columns: Vec<ColumnDecision>,
}

/// Multi-row INSERT: `VALUES (@P1, @P2), (@P3, @P4), ...`
fn insert_sql(table: &str, columns: &[ColumnDecision], row_count: usize) -> String {
    let col_str = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let cols_per_row = columns.len();
    let value_groups: Vec<String> = (0..row_count)
        .map(|r| {
            let placeholders: Vec<String> = (1..=cols_per_row)
                .map(|c| format!("@P{}", r * cols_per_row + c))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        table,
        col_str,
        value_groups.join(", ")
    )
}

fn rows_per_statement(column_count: usize) -> usize {
    match column_count {
        0 => MAX_ROWS_PER_STATEMENT,
        n => (MAX_PARAMS_PER_STATEMENT / n).clamp(1, MAX_ROWS_PER_STATEMENT),
    }
}

impl MssqlLoadTransaction {
    async fn execute_rows(&mut self, rows: &[Row]) -> std::result::Result<u64, tiberius::error::Error> {
        let sql = insert_sql(&self.table, &self.columns, rows.len());
        let params: Vec<Box<dyn ToSql>> = rows
            .iter()
            .flat_map(|row| row.iter().map(sql_value_to_sql_param))
            .collect();
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let result = self.conn.execute(sql.as_str(), &param_refs).await?;
        Ok(result.total())
    }

    /// `XACT_STATE()`: 1 committable, -1 doomed, 0 no transaction left.
    async fn xact_state(&mut self) -> Result<i16> {
        let row = self
            .conn
            .simple_query("SELECT XACT_STATE()")
            .await?
            .into_row()
            .await?;
        Ok(row
            .and_then(|r| r.try_get::<i16, _>(0).ok().flatten())
            .unwrap_or(0))
    }
}

#[async_trait]
impl LoadTransaction for MssqlLoadTransaction {
    async fn insert_batch(&mut self, rows: &[Row]) -> Result<BatchInsert> {
        for (i, row) in rows.iter().enumerate() {
            if let Some(reason) = rejection_reason(&self.columns, row) {
                return Ok(BatchInsert::Rejected(format!("Row {}: {}", i + 1, reason)));
            }
        }

        let chunk_size = rows_per_statement(self.columns.len());
        let mut total_inserted = 0u64;
        for chunk in rows.chunks(chunk_size) {
            match self.execute_rows(chunk).await {
                Ok(n) => total_inserted += n,
                Err(tiberius::error::Error::Server(e)) => {
                    warn!("Batched INSERT into {} refused: {}", self.table, e);
                    return Ok(BatchInsert::Rejected(e.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(
            "Inserted {} rows into {} (batch size: {})",
            total_inserted, self.table, chunk_size
        );
        Ok(BatchInsert::Inserted(total_inserted))
    }

    async fn insert_row(&mut self, row: &Row) -> Result<RowInsert> {
        if let Some(reason) = rejection_reason(&self.columns, row) {
            return Ok(RowInsert::Rejected(reason));
        }

        match self.execute_rows(std::slice::from_ref(row)).await {
            Ok(_) => Ok(RowInsert::Inserted),
            Err(tiberius::error::Error::Server(e)) => {
                let message = e.to_string();
                if self.xact_state().await? == 1 {
                    Ok(RowInsert::Rejected(message))
                } else {
                    Ok(RowInsert::Aborted(message))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.conn
            .simple_query("COMMIT TRANSACTION")
            .await?
            .into_results()
            .await?;
        debug!("Committed load into {}", tx.table);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        tx.conn
            .simple_query("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION")
            .await?
            .into_results()
            .await?;
        debug!("Rolled back load into {}", tx.table);
        Ok(())
    }
}

/// Convert SqlValue to a boxed ToSql trait object for parameterized queries.
fn sql_value_to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::I64 => Box::new(Option::<i64>::None),
            SqlNullType::Decimal => Box::new(Option::<Decimal>::None),
            SqlNullType::DateTime => Box::new(Option::<NaiveDateTime>::None),
            SqlNullType::String => Box::new(Option::<String>::None),
        },
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::DateTime(dt) => Box::new(*dt),
        SqlValue::Text(s) => Box::new(s.clone()),
    }
}
