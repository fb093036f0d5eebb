//! Postgres-backed document store.
//!
//! One table per collection:
//!
//! ```sql
//! CREATE TABLE "doc_<collection>" (
//!     id      TEXT PRIMARY KEY,
//!     doc     JSONB NOT NULL,
//!     version BIGINT NOT NULL
//!     -- plus one "meta_<field>" column per metadata-field index
//! );
//! ```
//!
//! Filters compile to SQL over `doc` (see `sql.rs`). Partial projections are
//! applied in Rust after fetching, exactly like the in-memory backend.
//!
//! ## Error Mapping
//!
//! | Postgres error | `DocumentStoreError` |
//! |---|---|
//! | `42P01` undefined table | `UnknownCollection` |
//! | `23505` on the primary key | `AlreadyExists` |
//! | `23505` on any other index | `UniqueViolation` |
//! | anything else | `Database` (original error) |
//!
//! The write helpers take a `&mut PgConnection` so the unit of work can run
//! them inside its own transaction.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde_json::{Value as JsonValue, json};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};

use super::r#trait::{require_object, validate_name};
use super::sql::{Sql, path_literal, push_filter, push_order_by};
use super::{
    Document, DocumentStore, DocumentStoreError, DocumentStream, Filter, FindOptions, Index,
    IndexKind, OrderBy, SortDirection, WriteOptions,
};

const PAGE_SIZE: u64 = 256;

/// Postgres-backed document store.
///
/// Uses the SQLx connection pool (thread-safe). Single-document writes are one
/// statement each; bulk writes are one `UPDATE`/`DELETE` each, so they are
/// all-or-nothing.
#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// `"doc_<collection>"`, after validating the name.
pub(crate) fn table(collection: &str) -> Result<String, DocumentStoreError> {
    validate_name("collection", collection)?;
    Ok(format!("\"doc_{collection}\""))
}

fn index_ident(collection: &str, index: &str) -> String {
    format!("\"{collection}__{index}\"")
}

fn map_sqlx_error(collection: &str, id: Option<&str>, err: sqlx::Error) -> DocumentStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("42P01") => return DocumentStoreError::UnknownCollection(collection.to_string()),
            Some("23505") => {
                let constraint = db_err.constraint().unwrap_or_default();
                return match id {
                    Some(id) if constraint.ends_with("_pkey") => DocumentStoreError::AlreadyExists {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    },
                    _ => DocumentStoreError::UniqueViolation {
                        collection: collection.to_string(),
                        index: constraint
                            .strip_prefix(&format!("{collection}__"))
                            .unwrap_or(constraint)
                            .to_string(),
                    },
                };
            }
            _ => {}
        }
    }
    DocumentStoreError::Database(err)
}

/// Metadata values that have a column in this collection.
async fn declared_metadata(
    conn: &mut PgConnection,
    collection: &str,
    options: &WriteOptions,
) -> Result<Vec<(String, JsonValue)>, DocumentStoreError> {
    let Some(metadata) = options.metadata.as_ref().filter(|m| !m.is_empty()) else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT column_name::text
        FROM information_schema.columns
        WHERE table_schema = current_schema()
            AND table_name = $1
            AND column_name LIKE 'meta\_%'
        "#,
    )
    .bind(format!("doc_{collection}"))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error(collection, None, e))?;

    Ok(columns
        .iter()
        .filter_map(|c| c.strip_prefix("meta_"))
        .filter_map(|field| metadata.get(field).map(|v| (field.to_string(), v.clone())))
        .collect())
}

/// `(jsonb_populate_record(NULL::"doc_c", {"meta_f": v}))."meta_f"` casts the
/// JSON value to the column's declared type.
fn push_metadata_value(qb: &mut Sql<'_>, table: &str, field: &str, value: &JsonValue) {
    let column = format!("meta_{field}");
    qb.push(format!("(jsonb_populate_record(NULL::{table}, "));
    qb.push_bind(Json(json!({ column.clone(): value })));
    qb.push(format!("::jsonb)).\"{column}\""));
}

fn version_param(version: Option<u64>) -> Option<i64> {
    version.map(|v| v as i64)
}

fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<Document, sqlx::Error> {
    let version: i64 = row.try_get("version")?;
    Ok(Document {
        id: row.try_get("id")?,
        body: row.try_get("doc")?,
        version: version as u64,
    })
}

#[instrument(skip(conn, body, options), fields(collection = %collection, id = %id), err)]
pub(crate) async fn add_doc(
    conn: &mut PgConnection,
    collection: &str,
    id: &str,
    body: JsonValue,
    options: WriteOptions,
) -> Result<(), DocumentStoreError> {
    let table = table(collection)?;
    let metadata = declared_metadata(conn, collection, &options).await?;

    let mut qb = Sql::new(format!("INSERT INTO {table} (id, doc, version"));
    for (field, _) in &metadata {
        qb.push(format!(", \"meta_{field}\""));
    }
    qb.push(") VALUES (");
    qb.push_bind(id.to_string());
    qb.push(", ");
    qb.push_bind(Json(body));
    qb.push(", ");
    qb.push_bind(options.version.unwrap_or(1) as i64);
    for (field, value) in &metadata {
        qb.push(", ");
        push_metadata_value(&mut qb, &table, field, value);
    }
    qb.push(")");

    qb.build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, Some(id), e))?;
    Ok(())
}

fn push_metadata_assignments(qb: &mut Sql<'_>, table: &str, metadata: &[(String, JsonValue)]) {
    for (field, value) in metadata {
        qb.push(format!(", \"meta_{field}\" = "));
        push_metadata_value(qb, table, field, value);
    }
}

#[instrument(skip(conn, partial, options), fields(collection = %collection, id = %id), err)]
pub(crate) async fn update_doc(
    conn: &mut PgConnection,
    collection: &str,
    id: &str,
    partial: JsonValue,
    options: WriteOptions,
) -> Result<(), DocumentStoreError> {
    require_object(&partial, "partial document")?;
    let table = table(collection)?;
    let metadata = declared_metadata(conn, collection, &options).await?;

    let mut qb = Sql::new(format!("UPDATE {table} SET doc = doc || "));
    qb.push_bind(Json(partial));
    qb.push("::jsonb, version = COALESCE(");
    qb.push_bind(version_param(options.version));
    qb.push("::bigint, version + 1)");
    push_metadata_assignments(&mut qb, &table, &metadata);
    qb.push(" WHERE id = ");
    qb.push_bind(id.to_string());

    let result = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, Some(id), e))?;
    if result.rows_affected() == 0 {
        return Err(DocumentStoreError::NotFound { collection: collection.to_string(), id: id.to_string() });
    }
    Ok(())
}

#[instrument(skip(conn, body, options), fields(collection = %collection, id = %id), err)]
pub(crate) async fn upsert_doc(
    conn: &mut PgConnection,
    collection: &str,
    id: &str,
    body: JsonValue,
    options: WriteOptions,
) -> Result<(), DocumentStoreError> {
    require_object(&body, "upserted document")?;
    let table = table(collection)?;
    let metadata = declared_metadata(conn, collection, &options).await?;

    let mut qb = Sql::new(format!("INSERT INTO {table} AS t (id, doc, version"));
    for (field, _) in &metadata {
        qb.push(format!(", \"meta_{field}\""));
    }
    qb.push(") VALUES (");
    qb.push_bind(id.to_string());
    qb.push(", ");
    qb.push_bind(Json(body));
    qb.push("::jsonb, COALESCE(");
    qb.push_bind(version_param(options.version));
    qb.push("::bigint, 1)");
    for (field, value) in &metadata {
        qb.push(", ");
        push_metadata_value(&mut qb, &table, field, value);
    }
    qb.push(") ON CONFLICT (id) DO UPDATE SET doc = t.doc || EXCLUDED.doc, version = COALESCE(");
    qb.push_bind(version_param(options.version));
    qb.push("::bigint, t.version + 1)");
    for (field, _) in &metadata {
        qb.push(format!(", \"meta_{field}\" = EXCLUDED.\"meta_{field}\""));
    }

    qb.build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?;
    Ok(())
}

#[instrument(skip(conn, body, options), fields(collection = %collection, id = %id), err)]
pub(crate) async fn replace_doc(
    conn: &mut PgConnection,
    collection: &str,
    id: &str,
    body: JsonValue,
    options: WriteOptions,
) -> Result<(), DocumentStoreError> {
    let table = table(collection)?;
    let metadata = declared_metadata(conn, collection, &options).await?;

    let mut qb = Sql::new(format!("UPDATE {table} SET doc = "));
    qb.push_bind(Json(body));
    qb.push("::jsonb, version = COALESCE(");
    qb.push_bind(version_param(options.version));
    qb.push("::bigint, version + 1)");
    push_metadata_assignments(&mut qb, &table, &metadata);
    qb.push(" WHERE id = ");
    qb.push_bind(id.to_string());

    let result = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, Some(id), e))?;
    if result.rows_affected() == 0 {
        return Err(DocumentStoreError::NotFound { collection: collection.to_string(), id: id.to_string() });
    }
    Ok(())
}

/// Replace-or-create with an explicit version (aggregate snapshots).
#[instrument(skip(conn, body), fields(collection = %collection, id = %id), err)]
pub(crate) async fn set_doc(
    conn: &mut PgConnection,
    collection: &str,
    id: &str,
    body: JsonValue,
    version: u64,
) -> Result<(), DocumentStoreError> {
    let table = table(collection)?;
    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (id, doc, version)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc, version = EXCLUDED.version
        "#
    ))
    .bind(id)
    .bind(Json(body))
    .bind(version as i64)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error(collection, None, e))?;
    Ok(())
}

#[instrument(skip(conn), fields(collection = %collection, id = %id), err)]
pub(crate) async fn delete_doc(conn: &mut PgConnection, collection: &str, id: &str) -> Result<bool, DocumentStoreError> {
    let table = table(collection)?;
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?;
    Ok(result.rows_affected() > 0)
}

#[instrument(skip(conn, filter, partial, options), fields(collection = %collection, updated), err)]
pub(crate) async fn update_many(
    conn: &mut PgConnection,
    collection: &str,
    filter: &Filter,
    partial: JsonValue,
    options: WriteOptions,
) -> Result<u64, DocumentStoreError> {
    require_object(&partial, "partial document")?;
    let table = table(collection)?;
    let metadata = declared_metadata(conn, collection, &options).await?;

    let mut qb = Sql::new(format!("UPDATE {table} SET doc = doc || "));
    qb.push_bind(Json(partial));
    qb.push("::jsonb, version = COALESCE(");
    qb.push_bind(version_param(options.version));
    qb.push("::bigint, version + 1)");
    push_metadata_assignments(&mut qb, &table, &metadata);
    qb.push(" WHERE ");
    push_filter(&mut qb, filter);

    let updated = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?
        .rows_affected();
    Span::current().record("updated", updated);
    Ok(updated)
}

#[instrument(skip(conn, filter, body, options), fields(collection = %collection, replaced), err)]
pub(crate) async fn replace_many(
    conn: &mut PgConnection,
    collection: &str,
    filter: &Filter,
    body: JsonValue,
    options: WriteOptions,
) -> Result<u64, DocumentStoreError> {
    let table = table(collection)?;
    let metadata = declared_metadata(conn, collection, &options).await?;

    let mut qb = Sql::new(format!("UPDATE {table} SET doc = "));
    qb.push_bind(Json(body));
    qb.push("::jsonb, version = COALESCE(");
    qb.push_bind(version_param(options.version));
    qb.push("::bigint, version + 1)");
    push_metadata_assignments(&mut qb, &table, &metadata);
    qb.push(" WHERE ");
    push_filter(&mut qb, filter);

    let replaced = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?
        .rows_affected();
    Span::current().record("replaced", replaced);
    Ok(replaced)
}

#[instrument(skip(conn, filter), fields(collection = %collection, deleted), err)]
pub(crate) async fn delete_many(conn: &mut PgConnection, collection: &str, filter: &Filter) -> Result<u64, DocumentStoreError> {
    let table = table(collection)?;
    let mut qb = Sql::new(format!("DELETE FROM {table} WHERE "));
    push_filter(&mut qb, filter);

    let deleted = qb
        .build()
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?
        .rows_affected();
    Span::current().record("deleted", deleted);
    Ok(deleted)
}

/// Read-only transaction whose snapshot every page of one `find_docs` shares.
async fn begin_snapshot(pool: &PgPool) -> Result<Transaction<'static, Postgres>, DocumentStoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

async fn fetch_page(
    conn: &mut PgConnection,
    collection: &str,
    filter: &Filter,
    order_by: &[OrderBy],
    offset: u64,
    limit: u64,
) -> Result<Vec<Document>, DocumentStoreError> {
    let table = table(collection)?;
    let mut qb = Sql::new(format!("SELECT id, doc, version FROM {table} WHERE "));
    push_filter(&mut qb, filter);
    push_order_by(&mut qb, order_by);
    qb.push(" LIMIT ");
    qb.push_bind(limit as i64);
    qb.push(" OFFSET ");
    qb.push_bind(offset as i64);

    let rows = qb
        .build()
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?;
    rows.iter()
        .map(|row| row_to_document(row).map_err(DocumentStoreError::Database))
        .collect()
}

struct Page {
    /// Opened with the first page, committed after the last one.
    tx: Option<Transaction<'static, Postgres>>,
    offset: u64,
    remaining: Option<u64>,
    exhausted: bool,
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self, index), fields(collection = %collection), err)]
    async fn add_collection(&self, collection: &str, index: Option<Index>) -> Result<(), DocumentStoreError> {
        let table = table(collection)?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                doc JSONB NOT NULL,
                version BIGINT NOT NULL
            )
            "#
        ))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?;

        match index {
            Some(index) => self.add_collection_index(collection, index).await,
            None => Ok(()),
        }
    }

    #[instrument(skip(self), fields(collection = %collection), err)]
    async fn drop_collection(&self, collection: &str) -> Result<(), DocumentStoreError> {
        let table = table(collection)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(collection, None, e))?;
        Ok(())
    }

    async fn has_collection(&self, collection: &str) -> Result<bool, DocumentStoreError> {
        validate_name("collection", collection)?;
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(format!("doc_{collection}"))
        .fetch_one(&*self.pool)
        .await?;
        Ok(exists)
    }

    #[instrument(skip(self, index), fields(collection = %collection, index = %index.name), err)]
    async fn add_collection_index(&self, collection: &str, index: Index) -> Result<(), DocumentStoreError> {
        let table = table(collection)?;
        validate_name("index", &index.name)?;
        if !self.has_collection(collection).await? {
            return Err(DocumentStoreError::UnknownCollection(collection.to_string()));
        }

        let direction = |d: SortDirection| match d {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        let columns = match &index.kind {
            IndexKind::Field { path, direction: d } => {
                format!("(doc #>> {}) {}", path_literal(path), direction(*d))
            }
            IndexKind::MultiField(fields) => fields
                .iter()
                .map(|(path, d)| format!("(doc #>> {}) {}", path_literal(path), direction(*d)))
                .collect::<Vec<_>>()
                .join(", "),
            IndexKind::MetadataField { field, column_type } => {
                validate_name("metadata field", field)?;
                sqlx::query(&format!(
                    "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS \"meta_{field}\" {}",
                    column_type.sql()
                ))
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error(collection, None, e))?;
                format!("\"meta_{field}\"")
            }
        };

        let unique = if index.unique { "UNIQUE " } else { "" };
        sqlx::query(&format!(
            "CREATE {unique}INDEX IF NOT EXISTS {} ON {table} ({columns})",
            index_ident(collection, &index.name)
        ))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(collection, None, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(collection = %collection), err)]
    async fn drop_collection_index(&self, collection: &str, index_name: &str) -> Result<(), DocumentStoreError> {
        validate_name("collection", collection)?;
        validate_name("index", index_name)?;
        sqlx::query(&format!("DROP INDEX IF EXISTS {}", index_ident(collection, index_name)))
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn has_collection_index(&self, collection: &str, index_name: &str) -> Result<bool, DocumentStoreError> {
        validate_name("collection", collection)?;
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_indexes
                WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2
            )
            "#,
        )
        .bind(format!("doc_{collection}"))
        .bind(format!("{collection}__{index_name}"))
        .fetch_one(&*self.pool)
        .await?;
        Ok(exists)
    }

    async fn add_doc(&self, collection: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        add_doc(&mut conn, collection, id, body, options).await
    }

    async fn update_doc(&self, collection: &str, id: &str, partial: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        update_doc(&mut conn, collection, id, partial, options).await
    }

    async fn upsert_doc(&self, collection: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        upsert_doc(&mut conn, collection, id, body, options).await
    }

    async fn replace_doc(&self, collection: &str, id: &str, body: JsonValue, options: WriteOptions) -> Result<(), DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        replace_doc(&mut conn, collection, id, body, options).await
    }

    async fn delete_doc(&self, collection: &str, id: &str) -> Result<bool, DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        delete_doc(&mut conn, collection, id).await
    }

    async fn get_doc_and_version(&self, collection: &str, id: &str) -> Result<Option<Document>, DocumentStoreError> {
        let table = table(collection)?;
        let row = sqlx::query(&format!("SELECT id, doc, version FROM {table} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(collection, None, e))?;
        row.as_ref()
            .map(row_to_document)
            .transpose()
            .map_err(DocumentStoreError::Database)
    }

    async fn update_many(&self, collection: &str, filter: &Filter, partial: JsonValue, options: WriteOptions) -> Result<u64, DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        update_many(&mut conn, collection, filter, partial, options).await
    }

    async fn replace_many(&self, collection: &str, filter: &Filter, body: JsonValue, options: WriteOptions) -> Result<u64, DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        replace_many(&mut conn, collection, filter, body, options).await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, DocumentStoreError> {
        let mut conn = self.pool.acquire().await?;
        delete_many(&mut conn, collection, filter).await
    }

    /// Pages through the result `PAGE_SIZE` rows at a time; nothing is queried
    /// until the stream is polled.
    ///
    /// All pages are read inside one `REPEATABLE READ` read-only transaction,
    /// so concurrent writes never make the stream skip or repeat a document.
    /// The stream holds a pool connection until it is exhausted or dropped.
    fn find_docs(&self, collection: &str, filter: &Filter, options: FindOptions) -> DocumentStream {
        let pool = Arc::clone(&self.pool);
        let collection = collection.to_string();
        let filter = filter.clone();
        let order_by = options.order_by;
        let start = Page { tx: None, offset: options.skip.unwrap_or(0), remaining: options.limit, exhausted: false };

        let pages = futures::stream::try_unfold(start, move |page| {
            let pool = Arc::clone(&pool);
            let collection = collection.clone();
            let filter = filter.clone();
            let order_by = order_by.clone();
            async move {
                if page.exhausted || page.remaining == Some(0) {
                    return Ok(None);
                }
                let take = page.remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));
                let mut tx = match page.tx {
                    Some(tx) => tx,
                    None => begin_snapshot(&pool).await?,
                };
                let docs = fetch_page(&mut tx, &collection, &filter, &order_by, page.offset, take).await?;
                let fetched = docs.len() as u64;
                let remaining = page.remaining.map(|r| r - fetched);
                let exhausted = fetched < take || remaining == Some(0);
                let tx = if exhausted {
                    tx.commit().await?;
                    None
                } else {
                    Some(tx)
                };
                let next = Page { tx, offset: page.offset + fetched, remaining, exhausted };
                Ok::<_, DocumentStoreError>(Some((docs, next)))
            }
        });

        pages
            .map_ok(|docs| futures::stream::iter(docs.into_iter().map(Ok::<_, DocumentStoreError>)))
            .try_flatten()
            .boxed()
    }

    async fn count_docs(&self, collection: &str, filter: &Filter) -> Result<u64, DocumentStoreError> {
        let table = table(collection)?;
        let mut qb = Sql::new(format!("SELECT COUNT(*) FROM {table} WHERE "));
        push_filter(&mut qb, filter);
        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(collection, None, e))?;
        Ok(count as u64)
    }
}
