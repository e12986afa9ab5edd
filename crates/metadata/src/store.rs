//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::filters::SqlParam;
use crate::repos::{StoreTopology, TemplateCatalog, TemplateStoreRepo};
use async_trait::async_trait;
use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: TemplateStoreRepo + TemplateCatalog + StoreTopology + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store and apply the schema.
    ///
    /// `query_timeout_secs` bounds how long a call waits for the pool connection,
    /// which a held [`crate::repos::RecordClaim`] keeps busy.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600); // 10 minutes default

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits a single writer; one connection serializes every
            // statement and keeps in-memory databases shared.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "Opened SQLite metadata store"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;
type SqliteQueryAs<'q, O> = QueryAs<'q, Sqlite, O, SqliteArguments<'q>>;

fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &[SqlParam]) -> SqliteQuery<'q> {
    for param in params {
        query = match *param {
            SqlParam::Int(value) => query.bind(value),
            SqlParam::Text(value) => query.bind(value),
        };
    }
    query
}

fn bind_params_as<'q, O>(mut query: SqliteQueryAs<'q, O>, params: &[SqlParam]) -> SqliteQueryAs<'q, O> {
    for param in params {
        query = match *param {
            SqlParam::Int(value) => query.bind(value),
            SqlParam::Text(value) => query.bind(value),
        };
    }
    query
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::filters::AssociationFilter;
    use crate::models::*;
    use crate::repos::{RecordClaim, RowPick};
    use depot_core::{DataStoreRole, StoreId, TemplateId, ZoneId, ZoneScope};
    use sqlx::Transaction;
    use time::OffsetDateTime;
    use uuid::Uuid;

    const STATE_UPDATE_SQL: &str = r#"
        UPDATE template_store_ref
        SET state = ?, updated_count = ?, updated_at = ?, destroyed = (destroyed OR ?)
        WHERE id = ? AND state = ? AND updated_count = ?
    "#;

    fn state_update_query(transition: &StateTransition) -> SqliteQuery<'static> {
        sqlx::query(STATE_UPDATE_SQL)
            .bind(transition.next_state.as_str())
            .bind(transition.next_version)
            .bind(transition.updated_at)
            .bind(transition.mark_destroyed)
            .bind(transition.id)
            .bind(transition.expected_state.as_str())
            .bind(transition.expected_version)
    }

    fn insert_record_query(record: &TemplateStoreRow) -> SqliteQuery<'_> {
        sqlx::query(
            r#"
            INSERT INTO template_store_ref (
                id, template_id, store_id, store_role, state,
                download_state, download_percent, download_url, error_string, install_path,
                size, physical_size, ref_cnt, destroyed, updated_count,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(record.template_id)
        .bind(record.store_id)
        .bind(&record.store_role)
        .bind(&record.state)
        .bind(&record.download_state)
        .bind(record.download_percent)
        .bind(&record.download_url)
        .bind(&record.error_string)
        .bind(&record.install_path)
        .bind(record.size)
        .bind(record.physical_size)
        .bind(record.ref_cnt)
        .bind(record.destroyed)
        .bind(record.updated_count)
        .bind(record.created_at)
        .bind(record.updated_at)
    }

    #[async_trait]
    impl TemplateStoreRepo for SqliteStore {
        async fn create_record(&self, record: &TemplateStoreRow) -> MetadataResult<()> {
            insert_record_query(record).execute(&self.pool).await?;
            Ok(())
        }

        async fn create_records(&self, records: &[TemplateStoreRow]) -> MetadataResult<()> {
            if records.is_empty() {
                return Ok(());
            }

            // Single transaction for all inserts - all succeed or all fail
            let mut tx = self.pool.begin().await?;
            for record in records {
                insert_record_query(record).execute(&mut *tx).await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn get_record(
            &self,
            id: Uuid,
            include_destroyed: bool,
        ) -> MetadataResult<Option<TemplateStoreRow>> {
            let sql = if include_destroyed {
                "SELECT * FROM template_store_ref WHERE id = ?"
            } else {
                "SELECT * FROM template_store_ref WHERE id = ? AND destroyed = 0"
            };
            let row = sqlx::query_as::<_, TemplateStoreRow>(sql)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_records(
            &self,
            filter: &AssociationFilter<'_>,
        ) -> MetadataResult<Vec<TemplateStoreRow>> {
            let predicate = filter.predicate();
            let sql = format!(
                "SELECT * FROM template_store_ref WHERE {} ORDER BY created_at, id",
                predicate.sql
            );
            let rows = bind_params_as(
                sqlx::query_as::<_, TemplateStoreRow>(&sql),
                &predicate.params,
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn find_record(
            &self,
            filter: &AssociationFilter<'_>,
            pick: RowPick,
        ) -> MetadataResult<Option<TemplateStoreRow>> {
            let predicate = filter.predicate();
            let order = match pick {
                RowPick::First => "created_at, id",
                RowPick::Random => "RANDOM()",
            };
            let sql = format!(
                "SELECT * FROM template_store_ref WHERE {} ORDER BY {} LIMIT 1",
                predicate.sql, order
            );
            let row = bind_params_as(
                sqlx::query_as::<_, TemplateStoreRow>(&sql),
                &predicate.params,
            )
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn claim_record(
            &self,
            filter: &AssociationFilter<'_>,
        ) -> MetadataResult<Option<Box<dyn RecordClaim>>> {
            let predicate = filter.predicate();
            let sql = format!(
                "SELECT * FROM template_store_ref WHERE {} ORDER BY RANDOM() LIMIT 1",
                predicate.sql
            );

            let mut tx = self.pool.begin().await?;

            let row = bind_params_as(
                sqlx::query_as::<_, TemplateStoreRow>(&sql),
                &predicate.params,
            )
            .fetch_optional(&mut *tx)
            .await?;

            let Some(record) = row else {
                tx.rollback().await?;
                return Ok(None);
            };

            // A no-op write on the chosen row takes SQLite's write lock, held until
            // the claim's transaction ends.
            sqlx::query("UPDATE template_store_ref SET updated_count = updated_count WHERE id = ?")
                .bind(record.id)
                .execute(&mut *tx)
                .await?;

            Ok(Some(Box::new(SqliteRecordClaim {
                tx: Some(tx),
                record,
            })))
        }

        async fn compare_and_set_state(&self, transition: &StateTransition) -> MetadataResult<u64> {
            let result = state_update_query(transition).execute(&self.pool).await?;
            Ok(result.rows_affected())
        }

        async fn delete_records(&self, filter: &AssociationFilter<'_>) -> MetadataResult<u64> {
            let predicate = filter.predicate();
            let sql = format!("DELETE FROM template_store_ref WHERE {}", predicate.sql);

            let mut tx = self.pool.begin().await?;
            let result = bind_params(sqlx::query(&sql), &predicate.params)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            Ok(result.rows_affected())
        }

        async fn update_role(
            &self,
            filter: &AssociationFilter<'_>,
            role: DataStoreRole,
        ) -> MetadataResult<u64> {
            let predicate = filter.predicate();
            let sql = format!(
                "UPDATE template_store_ref SET store_role = ?, updated_at = ? WHERE {}",
                predicate.sql
            );

            let mut tx = self.pool.begin().await?;
            let query = sqlx::query(&sql)
                .bind(role.as_str())
                .bind(OffsetDateTime::now_utc());
            let result = bind_params(query, &predicate.params)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;

            Ok(result.rows_affected())
        }

        async fn increment_ref_cnt(&self, id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE template_store_ref SET ref_cnt = ref_cnt + 1 WHERE id = ? AND destroyed = 0",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }

        async fn decrement_ref_cnt(&self, id: Uuid) -> MetadataResult<bool> {
            let result = sqlx::query(
                "UPDATE template_store_ref SET ref_cnt = MAX(0, ref_cnt - 1) WHERE id = ? AND destroyed = 0",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }

    /// Claimed row inside an open SQLite transaction.
    struct SqliteRecordClaim {
        tx: Option<Transaction<'static, Sqlite>>,
        record: TemplateStoreRow,
    }

    impl SqliteRecordClaim {
        fn tx(&mut self) -> MetadataResult<&mut Transaction<'static, Sqlite>> {
            self.tx
                .as_mut()
                .ok_or_else(|| MetadataError::Internal("record claim already committed".to_string()))
        }
    }

    #[async_trait]
    impl RecordClaim for SqliteRecordClaim {
        fn record(&self) -> &TemplateStoreRow {
            &self.record
        }

        fn record_mut(&mut self) -> &mut TemplateStoreRow {
            &mut self.record
        }

        async fn compare_and_set_state(&mut self, transition: &StateTransition) -> MetadataResult<u64> {
            let tx = self.tx()?;
            let result = state_update_query(transition).execute(&mut **tx).await?;
            Ok(result.rows_affected())
        }

        async fn reload(&mut self) -> MetadataResult<Option<TemplateStoreRow>> {
            let id = self.record.id;
            let tx = self.tx()?;
            let row = sqlx::query_as::<_, TemplateStoreRow>(
                "SELECT * FROM template_store_ref WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
            Ok(row)
        }

        async fn commit(&mut self) -> MetadataResult<()> {
            if let Some(tx) = self.tx.take() {
                tx.commit().await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TemplateCatalog for SqliteStore {
        async fn create_template(&self, template: &TemplateRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO templates (template_id, name, cross_zones, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(template.template_id)
            .bind(&template.name)
            .bind(template.cross_zones)
            .bind(template.created_at)
            .bind(template.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn find_template(
            &self,
            template_id: TemplateId,
        ) -> MetadataResult<Option<TemplateRow>> {
            let row = sqlx::query_as::<_, TemplateRow>("SELECT * FROM templates WHERE template_id = ?")
                .bind(template_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn mark_cross_zone(&self, template_id: TemplateId) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE templates SET cross_zones = 1, updated_at = ? WHERE template_id = ?",
            )
            .bind(OffsetDateTime::now_utc())
            .bind(template_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "template_id {} not found",
                    template_id
                )));
            }
            Ok(())
        }

        async fn associate_to_zone(
            &self,
            template_id: TemplateId,
            zone_id: Option<ZoneId>,
        ) -> MetadataResult<()> {
            sqlx::query(
                "INSERT OR IGNORE INTO template_zones (template_id, zone_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(template_id)
            .bind(zone_id)
            .bind(OffsetDateTime::now_utc())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn list_template_zones(
            &self,
            template_id: TemplateId,
        ) -> MetadataResult<Vec<TemplateZoneRow>> {
            let rows = sqlx::query_as::<_, TemplateZoneRow>(
                "SELECT * FROM template_zones WHERE template_id = ? ORDER BY zone_id",
            )
            .bind(template_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl StoreTopology for SqliteStore {
        async fn create_image_store(&self, store: &ImageStoreRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO image_stores (store_id, name, role, zone_id, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(store.store_id)
            .bind(&store.name)
            .bind(&store.role)
            .bind(store.zone_id)
            .bind(store.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn resolve_image_stores(&self, scope: ZoneScope) -> MetadataResult<Vec<StoreId>> {
            let role = DataStoreRole::Image.as_str();
            let ids = match scope.zone_id() {
                // Zone-local stores plus region-wide ones
                Some(zone_id) => {
                    sqlx::query_scalar::<_, StoreId>(
                        "SELECT store_id FROM image_stores WHERE role = ? AND (zone_id = ? OR zone_id IS NULL) ORDER BY store_id",
                    )
                    .bind(role)
                    .bind(zone_id)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_scalar::<_, StoreId>(
                        "SELECT store_id FROM image_stores WHERE role = ? ORDER BY store_id",
                    )
                    .bind(role)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(ids)
        }

        async fn resolve_image_cache_stores(
            &self,
            scope: ZoneScope,
        ) -> MetadataResult<Vec<StoreId>> {
            let role = DataStoreRole::ImageCache.as_str();
            let ids = match scope.zone_id() {
                Some(zone_id) => {
                    sqlx::query_scalar::<_, StoreId>(
                        "SELECT store_id FROM image_stores WHERE role = ? AND zone_id = ? ORDER BY store_id",
                    )
                    .bind(role)
                    .bind(zone_id)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_scalar::<_, StoreId>(
                        "SELECT store_id FROM image_stores WHERE role = ? ORDER BY store_id",
                    )
                    .bind(role)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(ids)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Template <-> data store associations
CREATE TABLE IF NOT EXISTS template_store_ref (
    id BLOB PRIMARY KEY,
    template_id INTEGER NOT NULL,
    store_id INTEGER NOT NULL,
    store_role TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'Allocated',
    download_state TEXT NOT NULL DEFAULT 'NOT_DOWNLOADED',
    download_percent INTEGER NOT NULL DEFAULT 0,
    download_url TEXT,
    error_string TEXT,
    install_path TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    physical_size INTEGER NOT NULL DEFAULT 0,
    ref_cnt INTEGER NOT NULL DEFAULT 0 CHECK (ref_cnt >= 0),
    destroyed INTEGER NOT NULL DEFAULT 0,
    -- Version token for compare-and-swap state transitions
    updated_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
-- No unique constraint on (template_id, store_id, store_role): uniqueness among live
-- rows is kept by callers, and destroyed rows accumulate until purged.
CREATE INDEX IF NOT EXISTS idx_template_store_ref_store ON template_store_ref(store_id, destroyed);
CREATE INDEX IF NOT EXISTS idx_template_store_ref_template ON template_store_ref(template_id, store_id, destroyed);
CREATE INDEX IF NOT EXISTS idx_template_store_ref_role ON template_store_ref(store_role, destroyed);

-- Template catalog
CREATE TABLE IF NOT EXISTS templates (
    template_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    cross_zones INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Template zone associations (zone_id NULL = all zones)
CREATE TABLE IF NOT EXISTS template_zones (
    template_id INTEGER NOT NULL,
    zone_id INTEGER,
    created_at TEXT NOT NULL
);
-- COALESCE maps the all-zones marker to a sentinel so it is unique per template too.
CREATE UNIQUE INDEX IF NOT EXISTS idx_template_zones_unique ON template_zones(
    template_id, COALESCE(zone_id, -1)
);

-- Image and image cache stores (zone_id NULL = region-wide)
CREATE TABLE IF NOT EXISTS image_stores (
    store_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    zone_id INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_image_stores_role_zone ON image_stores(role, zone_id);
"#;
