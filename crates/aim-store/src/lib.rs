//! Local mirror persistence for the Asset Inventory Mirror.
//!
//! The [`MirrorStore`] trait is the seam between the reconciliation engine
//! and storage. The Postgres backend serves production; the in-memory
//! backend backs tests and fixture-first development.

use std::collections::BTreeMap;

use aim_core::{Asset, SyncCounts, SyncKind, SyncOutcome, SyncRun, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "aim-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("unrecognized {field} value {value:?} in sync_runs")]
    Unrecognized { field: &'static str, value: String },
}

impl StoreError {
    /// Whether the backing connection itself is gone, as opposed to a
    /// single-statement failure. A fatal error aborts the whole batch.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Database(err) => matches!(
                err,
                sqlx::Error::PoolClosed
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
            ),
            Self::Unrecognized { .. } => false,
        }
    }
}

/// Storage contract for the mirrored tables and the append-only run history.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get_asset(&self, id: i64) -> Result<Option<Asset>, StoreError>;
    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError>;
    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError>;
    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn record_run_start(&self, run: &SyncRun) -> Result<(), StoreError>;
    async fn record_run_finish(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        outcome: SyncOutcome,
        counts: SyncCounts,
    ) -> Result<(), StoreError>;
    async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncRun>, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the mirror tables when missing. The mirror owns its schema the
    /// same way the upstream dashboard did: created at startup, no migration
    /// tooling in between.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                id                 BIGINT PRIMARY KEY,
                name               TEXT NOT NULL,
                tag                TEXT NOT NULL UNIQUE,
                serial             TEXT,
                model              TEXT,
                model_no           TEXT,
                category           TEXT,
                manufacturer       TEXT,
                company            TEXT,
                location           TEXT,
                department         TEXT,
                assigned_user_name TEXT,
                status             TEXT,
                status_type        TEXT,
                warranty_months    BIGINT,
                warranty_expires   DATE,
                created_at         TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id              BIGINT PRIMARY KEY,
                first_name      TEXT,
                last_name       TEXT,
                display_name    TEXT NOT NULL,
                username        TEXT,
                email           TEXT,
                department_id   BIGINT,
                department_name TEXT,
                location_id     BIGINT,
                assets_count    BIGINT NOT NULL DEFAULT 0,
                license_count   BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id          UUID PRIMARY KEY,
                kind        TEXT NOT NULL,
                started_at  TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ,
                outcome     TEXT,
                fetched     BIGINT NOT NULL DEFAULT 0,
                created     BIGINT NOT NULL DEFAULT 0,
                updated     BIGINT NOT NULL DEFAULT 0,
                unchanged   BIGINT NOT NULL DEFAULT 0,
                errored     BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("mirror schema ensured");
        Ok(())
    }
}

fn asset_from_row(row: &sqlx::postgres::PgRow) -> Result<Asset, StoreError> {
    Ok(Asset {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        tag: row.try_get("tag")?,
        serial: row.try_get("serial")?,
        model: row.try_get("model")?,
        model_no: row.try_get("model_no")?,
        category: row.try_get("category")?,
        manufacturer: row.try_get("manufacturer")?,
        company: row.try_get("company")?,
        location: row.try_get("location")?,
        department: row.try_get("department")?,
        assigned_user_name: row.try_get("assigned_user_name")?,
        status: row.try_get("status")?,
        status_type: row.try_get("status_type")?,
        warranty_months: row.try_get("warranty_months")?,
        warranty_expires: row.try_get("warranty_expires")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        display_name: row.try_get("display_name")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        department_id: row.try_get("department_id")?,
        department_name: row.try_get("department_name")?,
        location_id: row.try_get("location_id")?,
        assets_count: row.try_get("assets_count")?,
        license_count: row.try_get("license_count")?,
    })
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<SyncRun, StoreError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = SyncKind::parse(&kind_raw).ok_or(StoreError::Unrecognized {
        field: "kind",
        value: kind_raw,
    })?;
    let outcome_raw: Option<String> = row.try_get("outcome")?;
    let outcome = match outcome_raw {
        Some(raw) => Some(SyncOutcome::parse(&raw).ok_or(StoreError::Unrecognized {
            field: "outcome",
            value: raw,
        })?),
        None => None,
    };
    Ok(SyncRun {
        id: row.try_get("id")?,
        kind,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        outcome,
        counts: SyncCounts {
            fetched: row.try_get::<i64, _>("fetched")? as u64,
            created: row.try_get::<i64, _>("created")? as u64,
            updated: row.try_get::<i64, _>("updated")? as u64,
            unchanged: row.try_get::<i64, _>("unchanged")? as u64,
            errored: row.try_get::<i64, _>("errored")? as u64,
        },
    })
}

#[async_trait]
impl MirrorStore for PgStore {
    async fn get_asset(&self, id: i64) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query("SELECT * FROM assets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| asset_from_row(&r)).transpose()
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO assets
                (id, name, tag, serial, model, model_no, category, manufacturer,
                 company, location, department, assigned_user_name, status,
                 status_type, warranty_months, warranty_expires, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(asset.id)
        .bind(&asset.name)
        .bind(&asset.tag)
        .bind(&asset.serial)
        .bind(&asset.model)
        .bind(&asset.model_no)
        .bind(&asset.category)
        .bind(&asset.manufacturer)
        .bind(&asset.company)
        .bind(&asset.location)
        .bind(&asset.department)
        .bind(&asset.assigned_user_name)
        .bind(&asset.status)
        .bind(&asset.status_type)
        .bind(asset.warranty_months)
        .bind(asset.warranty_expires)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE assets SET
                name = $2, tag = $3, serial = $4, model = $5, model_no = $6,
                category = $7, manufacturer = $8, company = $9, location = $10,
                department = $11, assigned_user_name = $12, status = $13,
                status_type = $14, warranty_months = $15, warranty_expires = $16,
                created_at = $17
            WHERE id = $1
            "#,
        )
        .bind(asset.id)
        .bind(&asset.name)
        .bind(&asset.tag)
        .bind(&asset.serial)
        .bind(&asset.model)
        .bind(&asset.model_no)
        .bind(&asset.category)
        .bind(&asset.manufacturer)
        .bind(&asset.company)
        .bind(&asset.location)
        .bind(&asset.department)
        .bind(&asset.assigned_user_name)
        .bind(&asset.status)
        .bind(&asset.status_type)
        .bind(asset.warranty_months)
        .bind(asset.warranty_expires)
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query("SELECT * FROM assets ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(asset_from_row).collect()
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, first_name, last_name, display_name, username, email,
                 department_id, department_name, location_id, assets_count, license_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.display_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.department_id)
        .bind(&user.department_name)
        .bind(user.location_id)
        .bind(user.assets_count)
        .bind(user.license_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE users SET
                first_name = $2, last_name = $3, display_name = $4, username = $5,
                email = $6, department_id = $7, department_name = $8,
                location_id = $9, assets_count = $10, license_count = $11
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.display_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.department_id)
        .bind(&user.department_name)
        .bind(user.location_id)
        .bind(user.assets_count)
        .bind(user.license_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn record_run_start(&self, run: &SyncRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (id, kind, started_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(run.id)
        .bind(run.kind.as_str())
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_run_finish(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        outcome: SyncOutcome,
        counts: SyncCounts,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE sync_runs SET
                finished_at = $2, outcome = $3, fetched = $4, created = $5,
                updated = $6, unchanged = $7, errored = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(finished_at)
        .bind(outcome.as_str())
        .bind(counts.fetched as i64)
        .bind(counts.created as i64)
        .bind(counts.updated as i64)
        .bind(counts.unchanged as i64)
        .bind(counts.errored as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncRun>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC LIMIT $1")
            .bind(limit.max(1))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    assets: BTreeMap<i64, Asset>,
    users: BTreeMap<i64, User>,
    runs: Vec<SyncRun>,
}

/// Mirror store held entirely in memory. Same contract as [`PgStore`];
/// used by tests and fixture-driven runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: tokio::sync::Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn get_asset(&self, id: i64) -> Result<Option<Asset>, StoreError> {
        Ok(self.inner.lock().await.assets.get(&id).cloned())
    }

    async fn insert_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        self.inner.lock().await.assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn update_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        self.inner.lock().await.assets.insert(asset.id, asset.clone());
        Ok(())
    }

    async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        Ok(self.inner.lock().await.assets.values().cloned().collect())
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.lock().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.inner.lock().await.users.values().cloned().collect())
    }

    async fn record_run_start(&self, run: &SyncRun) -> Result<(), StoreError> {
        self.inner.lock().await.runs.push(run.clone());
        Ok(())
    }

    async fn record_run_finish(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
        outcome: SyncOutcome,
        counts: SyncCounts,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(run) = inner.runs.iter_mut().find(|r| r.id == id) {
            run.finished_at = Some(finished_at);
            run.outcome = Some(outcome);
            run.counts = counts;
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncRun>, StoreError> {
        let inner = self.inner.lock().await;
        let mut runs: Vec<SyncRun> = inner.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(1) as usize);
        Ok(runs)
    }
}
