use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{error, info};

use crate::config::{DbSecret, SecretsProvider};
use crate::model::{OrderEntry, OrderTextEntry};

const SCHEMA: &str = "ny";
const ORDERS_TABLE: &str = "executive_orders";
const TEXTS_TABLE: &str = "order_texts";

const UPSERT_ATTEMPTS: u32 = 3;

const ORDER_COLUMNS: [&str; 10] = [
    "order_id",
    "title",
    "signed_date",
    "description",
    "src",
    "row_ct_dt",
    "row_ct_user",
    "row_updt_dt",
    "row_updt_user",
    "order_num",
];

const TEXT_COLUMNS: [&str; 7] = [
    "order_id",
    "text",
    "src",
    "row_ct_dt",
    "row_ct_user",
    "row_updt_dt",
    "row_updt_user",
];

/// Relational store adapter. One pool per invocation, handed in by the entry
/// point.
pub struct Db {
    pool: PgPool,
}

/// Fetch the named secret, build a pool, and smoke-test the connection.
pub async fn connect(secrets: &dyn SecretsProvider, secret_name: &str) -> Result<Db> {
    let raw = secrets.fetch(secret_name)?;
    let secret: DbSecret =
        serde_json::from_str(&raw).context("database secret is not the expected JSON shape")?;

    let options = PgConnectOptions::new()
        .host(&secret.host)
        .port(secret.port)
        .username(&secret.username)
        .password(&secret.password)
        .database(&secret.dbname);
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .context("failed to connect to database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("database connection test failed")?;
    info!("Database connection established successfully");
    Ok(Db { pool })
}

impl Db {
    /// Atomic upsert of the order-metadata row, keyed by order_id. Wrapped
    /// in bounded retry; transient contention errors are expected and
    /// self-correcting.
    pub async fn upsert_order(&self, entry: &OrderEntry) -> Result<()> {
        let table = format!("{}.{}", SCHEMA, ORDERS_TABLE);
        let mut last_err = None;
        for attempt in 0..UPSERT_ATTEMPTS {
            match self.upsert_order_once(&table, entry).await {
                Ok(()) => {
                    info!("Successfully upserted data into {}", table);
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        "Failed to upsert into {} (attempt {}/{}): {:#}",
                        table,
                        attempt + 1,
                        UPSERT_ATTEMPTS,
                        e
                    );
                    last_err = Some(e);
                    if attempt + 1 < UPSERT_ATTEMPTS {
                        tokio::time::sleep(upsert_backoff(attempt)).await;
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
    }

    async fn upsert_order_once(&self, table: &str, entry: &OrderEntry) -> Result<()> {
        let sql = upsert_sql(table, &ORDER_COLUMNS, &["order_id"]);
        let mut tx = self.pool.begin().await?;
        sqlx::query(&sql)
            .bind(&entry.order_id)
            .bind(&entry.title)
            .bind(&entry.signed_date)
            .bind(&entry.description)
            .bind(&entry.src)
            .bind(&entry.row_ct_dt)
            .bind(&entry.row_ct_user)
            .bind(&entry.row_updt_dt)
            .bind(&entry.row_updt_user)
            .bind(entry.order_num)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Insert-or-update for the order-text table, which has no usable
    /// uniqueness constraint: existence check and write happen inside one
    /// transaction. No retry here — the processor owns the outer loop.
    pub async fn write_order_text(&self, entry: &OrderTextEntry) -> Result<()> {
        let table = format!("{}.{}", SCHEMA, TEXTS_TABLE);
        let mut tx = self.pool.begin().await?;

        let exists: Option<i32> =
            sqlx::query_scalar(&format!("SELECT 1 FROM {} WHERE order_id = $1", table))
                .bind(&entry.order_id)
                .fetch_optional(&mut *tx)
                .await?;

        if exists.is_some() {
            let sql = format!(
                "UPDATE {} SET text = $2, src = $3, row_updt_dt = $4, row_updt_user = $5 \
                 WHERE order_id = $1",
                table
            );
            sqlx::query(&sql)
                .bind(&entry.order_id)
                .bind(&entry.text)
                .bind(&entry.src)
                .bind(&entry.row_updt_dt)
                .bind(&entry.row_updt_user)
                .execute(&mut *tx)
                .await?;
        } else {
            let sql = insert_sql(&table, &TEXT_COLUMNS);
            sqlx::query(&sql)
                .bind(&entry.order_id)
                .bind(&entry.text)
                .bind(&entry.src)
                .bind(&entry.row_ct_dt)
                .bind(&entry.row_ct_user)
                .bind(&entry.row_updt_dt)
                .bind(&entry.row_updt_user)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// Exponential, clamped to 4..10s.
fn upsert_backoff(attempt: u32) -> Duration {
    Duration::from_secs((1u64 << (attempt + 2)).clamp(4, 10))
}

fn insert_sql(table: &str, columns: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// Single-statement upsert: insert with conflict resolution on the key
/// columns, overwriting every non-key column with the new values.
fn upsert_sql(table: &str, columns: &[&str], conflict_keys: &[&str]) -> String {
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !conflict_keys.contains(*c))
        .map(|c| format!("{} = EXCLUDED.{}", c, c))
        .collect();
    format!(
        "{} ON CONFLICT ({}) DO UPDATE SET {}",
        insert_sql(table, columns),
        conflict_keys.join(", "),
        updates.join(", ")
    )
}

// ── Tests ──
