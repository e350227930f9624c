//! Postgres-backed document driver.
//!
//! Every entity is stored as one JSONB document in a shared table:
//!
//! ```sql
//! CREATE TABLE stratum_documents (
//!     collection TEXT   NOT NULL,
//!     id         TEXT   NOT NULL,
//!     seq        BIGSERIAL,
//!     doc        JSONB  NOT NULL,
//!     PRIMARY KEY (collection, id)
//! );
//! ```
//!
//! Query descriptors are translated into parameterized JSONB expressions that keep
//! the comparison rules of `QueryDescriptor::matches`: ordering comparisons only
//! hold between values of the same JSON type, and a missing field reads as `null`.
//! Unordered queries return records in insertion (`seq`) order.
//!
//! Cursors page with a keyset over the sort keys and `seq`: each page resumes
//! strictly after the last row returned, so rows deleted behind the cursor never
//! shift the window. Rows inserted or updated during a scan may or may not be
//! seen; there is no snapshot across pages.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | DriverError |
//! |------------|-----------------------|-------------|
//! | Database (unique / foreign key / check violation) | `23505` / `23503` / `23514` | `Constraint` |
//! | Database (other) | Any other | `Backend` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | PoolClosed, Io, Tls | N/A | `Connection` |
//! | ColumnDecode, Decode | N/A | `Decode` |
//! | Other | N/A | `Backend` |

use std::collections::VecDeque;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row};

use stratum_core::{DriverError, Entity, Identity};
use stratum_model::{BoxCursor, Comparison, Cursor, Direction, Driver, QueryDescriptor, RawTarget};

/// Rows fetched per round-trip while a cursor is consumed.
pub const DEFAULT_PAGE_SIZE: i64 = 256;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS stratum_documents (
    collection TEXT   NOT NULL,
    id         TEXT   NOT NULL,
    seq        BIGSERIAL,
    doc        JSONB  NOT NULL,
    PRIMARY KEY (collection, id)
)
"#;

/// Highest stored identity value in a collection, by JSONB ordering.
const HIGHEST_ID_SQL: &str = "SELECT doc -> $2 AS last_id FROM stratum_documents \
     WHERE collection = $1 AND doc -> $2 IS NOT NULL AND doc -> $2 <> 'null'::jsonb \
     ORDER BY doc -> $2 DESC LIMIT 1";

const KEY_TAKEN_SQL: &str = "SELECT 1 FROM stratum_documents WHERE collection = $1 AND id = $2";

const INSERT_SQL: &str = "INSERT INTO stratum_documents (collection, id, doc) VALUES ($1, $2, $3)";

const UPSERT_SQL: &str = "INSERT INTO stratum_documents (collection, id, doc) VALUES ($1, $2, $3) \
     ON CONFLICT (collection, id) DO UPDATE SET doc = EXCLUDED.doc";

/// Postgres JSONB document driver.
///
/// ## Thread Safety
///
/// Uses the SQLx connection pool, which is `Send + Sync`. Cursors hold a pool
/// handle, not a connection: each page is a separate query, so dropping a cursor
/// mid-way never pins a connection.
#[derive(Debug, Clone)]
pub struct PostgresDriver<T> {
    pool: PgPool,
    page_size: i64,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> PostgresDriver<T> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
            _entity: PhantomData,
        }
    }

    pub fn with_page_size(mut self, page_size: i64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Creates the document table if it does not exist.
    pub async fn migrate(&self) -> Result<(), DriverError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn load_documents(&self, query: &QueryDescriptor) -> Result<Vec<Value>, DriverError> {
        let select = Select::build(T::COLLECTION, query);
        let (sql, binds) = select.page(
            None,
            query.offset_value().unwrap_or(0) as i64,
            query.limit_value().map(|l| l as i64),
        );
        let rows = bind_all(sqlx::query(&sql), binds)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("raw", e))?;
        rows.iter().map(document).collect()
    }
}

/// One bound parameter.
#[derive(Debug, Clone)]
enum Bind {
    Text(String),
    Json(Value),
    Int(i64),
}

fn bind_all(mut query: Query<'_, Postgres, PgArguments>, binds: Vec<Bind>) -> Query<'_, Postgres, PgArguments> {
    for bind in binds {
        query = match bind {
            Bind::Text(s) => query.bind(s),
            Bind::Json(v) => query.bind(v),
            Bind::Int(n) => query.bind(n),
        };
    }
    query
}

/// Where the previous page ended: its sort-key values and `seq`.
#[derive(Debug, Clone, PartialEq)]
struct Position {
    keys: Vec<Value>,
    seq: i64,
}

/// `SELECT doc, seq, <sort keys> ... WHERE ...`, windowed by [`Select::page`].
#[derive(Debug, Clone)]
struct Select {
    sql: String,
    binds: Vec<Bind>,
    /// Sort-key expressions (over already bound field names), in priority order.
    keys: Vec<(String, Direction)>,
}

impl Select {
    fn build(collection: &str, query: &QueryDescriptor) -> Self {
        let mut binds = vec![Bind::Text(collection.to_string())];
        let mut filter = String::new();

        for predicate in query.predicates() {
            binds.push(Bind::Text(predicate.field.clone()));
            let field = format!("COALESCE(doc -> ${}, 'null'::jsonb)", binds.len());
            binds.push(Bind::Json(predicate.value.clone()));
            let value = format!("${}::jsonb", binds.len());

            let clause = match predicate.op {
                Comparison::Eq => format!("{field} = {value}"),
                Comparison::Ne => format!("{field} <> {value}"),
                Comparison::In => format!(
                    "EXISTS (SELECT 1 FROM jsonb_array_elements({value}) AS e(v) WHERE e.v = {field})"
                ),
                op => {
                    let symbol = match op {
                        Comparison::Lt => "<",
                        Comparison::Lte => "<=",
                        Comparison::Gt => ">",
                        _ => ">=",
                    };
                    format!(
                        "(jsonb_typeof({field}) = jsonb_typeof({value}) \
                         AND jsonb_typeof({value}) IN ('number', 'string', 'boolean') \
                         AND {field} {symbol} {value})"
                    )
                }
            };
            filter.push_str(" AND ");
            filter.push_str(&clause);
        }

        let mut keys = Vec::new();
        for o in query.ordering() {
            binds.push(Bind::Text(o.field.clone()));
            keys.push((format!("COALESCE(doc -> ${}, 'null'::jsonb)", binds.len()), o.direction));
        }

        let mut columns = String::from("doc, seq");
        for (i, (expr, _)) in keys.iter().enumerate() {
            columns.push_str(&format!(", {expr} AS k{i}"));
        }
        let sql = format!("SELECT {columns} FROM stratum_documents WHERE collection = $1{filter}");

        Self { sql, binds, keys }
    }

    /// One page: rows strictly after `after` in sort order, then the window.
    fn page(&self, after: Option<&Position>, offset: i64, limit: Option<i64>) -> (String, Vec<Bind>) {
        let mut binds = self.binds.clone();
        let mut sql = self.sql.clone();

        if let Some(after) = after {
            // (k0, .., kn, seq) > (v0, .., vn, last_seq), one direction per key.
            let mut alternatives = Vec::new();
            let mut equal_prefix: Vec<String> = Vec::new();
            for ((expr, direction), value) in self.keys.iter().zip(&after.keys) {
                binds.push(Bind::Json(value.clone()));
                let bound = format!("${}::jsonb", binds.len());
                let symbol = match direction {
                    Direction::Asc => ">",
                    Direction::Desc => "<",
                };
                let mut terms = equal_prefix.clone();
                terms.push(format!("{expr} {symbol} {bound}"));
                alternatives.push(format!("({})", terms.join(" AND ")));
                equal_prefix.push(format!("{expr} = {bound}"));
            }
            binds.push(Bind::Int(after.seq));
            let mut terms = equal_prefix;
            terms.push(format!("seq > ${}", binds.len()));
            alternatives.push(format!("({})", terms.join(" AND ")));

            sql.push_str(&format!(" AND ({})", alternatives.join(" OR ")));
        }

        let mut order: Vec<String> = self
            .keys
            .iter()
            .map(|(expr, direction)| match direction {
                Direction::Asc => format!("{expr} ASC"),
                Direction::Desc => format!("{expr} DESC"),
            })
            .collect();
        order.push("seq ASC".to_string());
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        if let Some(limit) = limit {
            binds.push(Bind::Int(limit));
            sql.push_str(&format!(" LIMIT ${}", binds.len()));
        }
        if offset > 0 {
            binds.push(Bind::Int(offset));
            sql.push_str(&format!(" OFFSET ${}", binds.len()));
        }
        (sql, binds)
    }

    fn position(&self, row: &PgRow) -> Result<Position, DriverError> {
        let seq = row
            .try_get::<i64, _>("seq")
            .map_err(|e| map_sqlx_error("decode row", e))?;
        let keys = (0..self.keys.len())
            .map(|i| {
                row.try_get::<Value, _>(format!("k{i}").as_str())
                    .map_err(|e| map_sqlx_error("decode row", e))
            })
            .collect::<Result<_, _>>()?;
        Ok(Position { keys, seq })
    }
}

fn document(row: &PgRow) -> Result<Value, DriverError> {
    row.try_get::<Value, _>("doc")
        .map_err(|e| map_sqlx_error("decode row", e))
}

fn decode<T: Entity>(document: Value) -> Result<T, DriverError> {
    serde_json::from_value(document)
        .map_err(|e| DriverError::decode(format!("{}: {e}", T::COLLECTION)))
}

/// Pages through a query; holds no connection between pages.
struct PgCursor<T> {
    pool: PgPool,
    select: Select,
    page_size: i64,
    /// Leading rows to skip; applied to the first page only.
    offset: i64,
    last: Option<Position>,
    remaining: Option<i64>,
    buffer: VecDeque<Value>,
    done: bool,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> PgCursor<T> {
    async fn fill(&mut self) -> Result<(), DriverError> {
        let want = match self.remaining {
            Some(0) => {
                self.done = true;
                return Ok(());
            }
            Some(n) => n.min(self.page_size),
            None => self.page_size,
        };

        let offset = if self.last.is_none() { self.offset } else { 0 };
        let (sql, binds) = self.select.page(self.last.as_ref(), offset, Some(want));
        let rows = bind_all(sqlx::query(&sql), binds)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("open", e))?;

        let fetched = rows.len() as i64;
        for row in &rows {
            self.buffer.push_back(document(row)?);
        }
        if let Some(row) = rows.last() {
            self.last = Some(self.select.position(row)?);
        }
        if let Some(n) = self.remaining.as_mut() {
            *n -= fetched;
        }
        if fetched < want {
            self.done = true;
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Entity> Cursor<T> for PgCursor<T> {
    async fn next(&mut self) -> Result<Option<T>, DriverError> {
        if self.buffer.is_empty() && !self.done {
            self.fill().await?;
        }
        self.buffer.pop_front().map(decode::<T>).transpose()
    }
}

impl<T> Drop for PgCursor<T> {
    fn drop(&mut self) {
        tracing::trace!(done = self.done, "postgres cursor released");
    }
}

#[async_trait]
impl<T: Entity> Driver<T> for PostgresDriver<T> {
    type Raw = Value;

    async fn open(&self, query: &QueryDescriptor) -> Result<BoxCursor<T>, DriverError> {
        tracing::debug!(collection = T::COLLECTION, predicates = query.predicates().len(), "postgres cursor opened");
        Ok(Box::new(PgCursor::<T> {
            pool: self.pool.clone(),
            select: Select::build(T::COLLECTION, query),
            page_size: self.page_size,
            offset: query.offset_value().unwrap_or(0) as i64,
            last: None,
            remaining: query.limit_value().map(|l| l as i64),
            buffer: VecDeque::new(),
            done: false,
            _entity: PhantomData,
        }))
    }

    async fn fetch(&self, id: &T::Id) -> Result<Option<T>, DriverError> {
        let row = sqlx::query("SELECT doc FROM stratum_documents WHERE collection = $1 AND id = $2")
            .bind(T::COLLECTION)
            .bind(id.key())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch", e))?;

        row.as_ref().map(document).transpose()?.map(decode::<T>).transpose()
    }

    async fn raw(&self, target: &RawTarget<T::Id>) -> Result<Value, DriverError> {
        match target {
            RawTarget::Id(id) => {
                let row = sqlx::query("SELECT doc FROM stratum_documents WHERE collection = $1 AND id = $2")
                    .bind(T::COLLECTION)
                    .bind(id.key())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("raw", e))?;
                Ok(row.as_ref().map(document).transpose()?.unwrap_or(Value::Null))
            }
            RawTarget::Query(query) => Ok(Value::Array(self.load_documents(query).await?)),
        }
    }

    async fn persist(&self, mut entity: T) -> Result<T, DriverError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("persist", e))?;

        let generated = entity.id().is_none();
        if generated {
            // Serialize identity generation per collection.
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(T::COLLECTION)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("persist", e))?;

            let highest: Option<Value> = sqlx::query(HIGHEST_ID_SQL)
                .bind(T::COLLECTION)
                .bind(T::IDENTITY)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("persist", e))?
                .map(|row| row.try_get::<Option<Value>, _>("last_id"))
                .transpose()
                .map_err(|e| map_sqlx_error("persist", e))?
                .flatten();

            let exhausted = || DriverError::identity_exhausted(T::COLLECTION);
            let highest: Option<T::Id> = highest.and_then(|v| serde_json::from_value(v).ok());
            let mut candidate = T::Id::generate(highest.as_ref()).ok_or_else(exhausted)?;
            // Skip keys already in use.
            while key_taken(&mut *tx, T::COLLECTION, &candidate.key()).await? {
                candidate = T::Id::generate(Some(&candidate)).ok_or_else(exhausted)?;
            }
            entity.set_id(candidate);
        }

        let key = match entity.id() {
            Some(id) => id.key(),
            None => return Err(DriverError::backend("entity has no identity after generation")),
        };
        let doc = serde_json::to_value(&entity)
            .map_err(|e| DriverError::backend(format!("encode {} failed: {e}", T::COLLECTION)))?;

        // A generated identity never overwrites; a clash surfaces as a constraint error.
        let sql = if generated { INSERT_SQL } else { UPSERT_SQL };
        sqlx::query(sql)
            .bind(T::COLLECTION)
            .bind(&key)
            .bind(&doc)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("persist", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("persist", e))?;
        Ok(entity)
    }

    async fn remove(&self, id: &T::Id) -> Result<bool, DriverError> {
        let result = sqlx::query("DELETE FROM stratum_documents WHERE collection = $1 AND id = $2")
            .bind(T::COLLECTION)
            .bind(id.key())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove", e))?;
        Ok(result.rows_affected() > 0)
    }
}

async fn key_taken(conn: &mut PgConnection, collection: &str, key: &str) -> Result<bool, DriverError> {
    let row = sqlx::query(KEY_TAKEN_SQL)
        .bind(collection)
        .bind(key)
        .fetch_optional(conn)
        .await
        .map_err(|e| map_sqlx_error("persist", e))?;
    Ok(row.is_some())
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("{operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505" | "23503" | "23514") => DriverError::Constraint(msg),
                _ => DriverError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => DriverError::timeout(format!("{operation}: pool timed out")),
        sqlx::Error::PoolClosed => DriverError::connection(format!("{operation}: pool closed")),
        sqlx::Error::Io(e) => DriverError::connection(format!("{operation}: {e}")),
        sqlx::Error::Tls(e) => DriverError::connection(format!("{operation}: {e}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DriverError::decode(format!("{operation}: {err}"))
        }
        other => DriverError::backend(format!("{operation}: {other}")),
    }
}
