//! PostgreSQL document store: one JSONB table per collection inside the schema from
//! `CLASSROOM_SCHEMA`. Membership writes run in a transaction that locks the student row.

use super::{
    membership_set, membership_update, merge_memberships, require_classes, sanitize_body, without_membership, Collection,
    Condition, Document, DocumentStore, MembershipChange, MembershipStore, Query, Update, CLASS_IDS, STUDENT_COUNT,
};
use crate::error::AppError;
use crate::settings::Settings;
use crate::sql::{
    bind_params, count_where, delete_doc, increment_field, insert_doc, qualified_table, quoted, select_active_for_share,
    select_by_id, select_for_update, select_where, update_doc, QueryBuf,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow, Postgres};
use sqlx::{ConnectOptions, PgConnection, PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            schema: schema.into(),
        }
    }

    /// Create the database if needed, open a pool, and make sure every collection table exists.
    pub async fn connect(settings: &Settings) -> Result<Self, AppError> {
        ensure_database_exists(&settings.database_url).await?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await?;
        ensure_collections(&pool, &settings.schema).await?;
        Ok(PgStore::new(pool, settings.schema.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self, collection: Collection) -> String {
        qualified_table(&self.schema, collection.name())
    }
}

fn unique_index_name(collection: Collection, field: &str) -> String {
    format!("{}_{}_key", collection.name(), field)
}

/// Create the schema, one table per collection, and their indexes. Idempotent.
pub async fn ensure_collections(pool: &PgPool, schema: &str) -> Result<(), AppError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)))
        .execute(pool)
        .await?;

    for collection in Collection::ALL {
        let name = collection.name();
        let table = qualified_table(schema, name);
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                doc JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table
        );
        sqlx::query(&ddl).execute(pool).await?;

        let created_idx = quoted(&format!("{}_created_at_idx", name));
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (created_at DESC)",
            created_idx, table
        ))
        .execute(pool)
        .await?;

        for field in collection.unique_fields() {
            let sql = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ((doc ->> '{}'))",
                quoted(&unique_index_name(collection, field)),
                table,
                field
            );
            sqlx::query(&sql).execute(pool).await?;
        }
        for field in collection.lookup_fields() {
            let sql = format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ((doc ->> '{}'))",
                quoted(&format!("{}_{}_idx", name, field)),
                table,
                field
            );
            sqlx::query(&sql).execute(pool).await?;
        }
    }

    // Membership lookups use `doc -> 'class_ids' @> '["<id>"]'`.
    let students = qualified_table(schema, Collection::Students.name());
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN ((doc -> '{}'))",
        quoted("students_class_ids_gin"),
        students,
        CLASS_IDS
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| AppError::BadRequest(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), AppError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| AppError::BadRequest("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

/// Unique-index violations become `Conflict` naming the field.
fn db_error(collection: Collection, err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let field = db
                .constraint()
                .and_then(|name| {
                    collection
                        .unique_fields()
                        .iter()
                        .find(|f| unique_index_name(collection, f) == name)
                })
                .copied()
                .unwrap_or("value");
            return AppError::Conflict(format!("{} already in use", field));
        }
    }
    AppError::Db(err)
}

fn row_to_document(row: &PgRow) -> Result<Document, AppError> {
    let id: Uuid = row.try_get("id")?;
    let body = match row.try_get::<Value, _>("doc")? {
        Value::Object(map) => map,
        other => {
            return Err(AppError::Decode(format!(
                "document {}: body is not an object: {}",
                id, other
            )))
        }
    };
    Ok(Document {
        id,
        body,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn fetch_docs<'e, E>(exec: E, collection: Collection, q: &QueryBuf) -> Result<Vec<Document>, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bind_params(sqlx::query(&q.sql), &q.params)
        .fetch_all(exec)
        .await
        .map_err(|e| db_error(collection, e))?;
    rows.iter().map(row_to_document).collect()
}

async fn fetch_doc<'e, E>(exec: E, collection: Collection, q: &QueryBuf) -> Result<Option<Document>, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = bind_params(sqlx::query(&q.sql), &q.params)
        .fetch_optional(exec)
        .await
        .map_err(|e| db_error(collection, e))?;
    row.as_ref().map(row_to_document).transpose()
}

async fn execute<'e, E>(exec: E, collection: Collection, q: &QueryBuf) -> Result<u64, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
    let done = bind_params(sqlx::query(&q.sql), &q.params)
        .execute(exec)
        .await
        .map_err(|e| db_error(collection, e))?;
    Ok(done.rows_affected())
}

/// Share-lock the classes being joined; `InvalidReference` unless all exist and are active.
async fn lock_active_classes(conn: &mut PgConnection, table: &str, ids: &[Uuid]) -> Result<(), AppError> {
    let q = select_active_for_share(table, ids);
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bind_params(sqlx::query(&q.sql), &q.params)
        .fetch_all(&mut *conn)
        .await?;
    let usable = rows
        .iter()
        .map(|row| row.try_get::<Uuid, _>("id"))
        .collect::<Result<Vec<_>, _>>()?;
    require_classes(ids, &usable)
}

/// Every joined class must have had its counter bumped.
fn require_counted(touched: u64, ids: &[Uuid]) -> Result<(), AppError> {
    if touched == ids.len() as u64 {
        Ok(())
    } else {
        Err(AppError::invalid_classes(ids))
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }

    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> Result<Document, AppError> {
        let body = sanitize_body(body);
        let q = insert_doc(&self.table(collection), Uuid::new_v4(), &body);
        fetch_doc(&self.pool, collection, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))
    }

    async fn get(&self, collection: Collection, id: Uuid) -> Result<Option<Document>, AppError> {
        let q = select_by_id(&self.table(collection), id);
        fetch_doc(&self.pool, collection, &q).await
    }

    async fn find(&self, collection: Collection, query: &Query) -> Result<Vec<Document>, AppError> {
        let q = select_where(&self.table(collection), query);
        fetch_docs(&self.pool, collection, &q).await
    }

    async fn count(&self, collection: Collection, conditions: &[Condition]) -> Result<u64, AppError> {
        let q = count_where(&self.table(collection), conditions);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn update(
        &self,
        collection: Collection,
        id: Uuid,
        guard: &[Condition],
        update: &Update,
    ) -> Result<Option<Document>, AppError> {
        let q = update_doc(&self.table(collection), id, guard, update);
        fetch_doc(&self.pool, collection, &q).await
    }

    async fn delete(&self, collection: Collection, id: Uuid, guard: &[Condition]) -> Result<Option<Document>, AppError> {
        let q = delete_doc(&self.table(collection), id, guard);
        fetch_doc(&self.pool, collection, &q).await
    }

    async fn increment(&self, collection: Collection, ids: &[Uuid], field: &'static str, by: i64) -> Result<u64, AppError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let q = increment_field(&self.table(collection), ids, field, by);
        execute(&self.pool, collection, &q).await
    }
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn create_enrollment(&self, body: Map<String, Value>, class_ids: &[Uuid]) -> Result<Document, AppError> {
        let mut body = sanitize_body(body);
        membership_update(class_ids).apply(&mut body);

        let students = self.table(Collection::Students);
        let classes = self.table(Collection::Classes);
        let mut tx = self.pool.begin().await?;
        lock_active_classes(&mut *tx, &classes, class_ids).await?;
        let q = insert_doc(&students, Uuid::new_v4(), &body);
        let student = fetch_doc(&mut *tx, Collection::Students, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        let q = increment_field(&classes, class_ids, STUDENT_COUNT, 1);
        require_counted(execute(&mut *tx, Collection::Classes, &q).await?, class_ids)?;
        tx.commit().await?;
        Ok(student)
    }

    async fn add_memberships(&self, student_id: Uuid, class_ids: &[Uuid]) -> Result<Option<MembershipChange>, AppError> {
        let students = self.table(Collection::Students);
        let mut tx = self.pool.begin().await?;
        let q = select_for_update(&students, student_id);
        let Some(current) = fetch_doc(&mut *tx, Collection::Students, &q).await? else {
            return Ok(None);
        };
        let (merged, added) = merge_memberships(&membership_set(&current.body), class_ids);
        if added.is_empty() {
            return Ok(Some(MembershipChange {
                student: current,
                changed: added,
            }));
        }

        let classes = self.table(Collection::Classes);
        lock_active_classes(&mut *tx, &classes, &added).await?;

        let q = update_doc(&students, student_id, &[], &membership_update(&merged));
        let student = fetch_doc(&mut *tx, Collection::Students, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        let q = increment_field(&classes, &added, STUDENT_COUNT, 1);
        require_counted(execute(&mut *tx, Collection::Classes, &q).await?, &added)?;
        tx.commit().await?;
        Ok(Some(MembershipChange { student, changed: added }))
    }

    async fn remove_membership(&self, student_id: Uuid, class_id: Uuid) -> Result<Option<MembershipChange>, AppError> {
        let students = self.table(Collection::Students);
        let mut tx = self.pool.begin().await?;
        let q = select_for_update(&students, student_id);
        let Some(current) = fetch_doc(&mut *tx, Collection::Students, &q).await? else {
            return Ok(None);
        };
        let Some(remaining) = without_membership(&membership_set(&current.body), class_id)? else {
            return Ok(Some(MembershipChange {
                student: current,
                changed: Vec::new(),
            }));
        };

        let q = update_doc(&students, student_id, &[], &membership_update(&remaining));
        let student = fetch_doc(&mut *tx, Collection::Students, &q)
            .await?
            .ok_or(AppError::Db(sqlx::Error::RowNotFound))?;
        let q = increment_field(&self.table(Collection::Classes), &[class_id], STUDENT_COUNT, -1);
        execute(&mut *tx, Collection::Classes, &q).await?;
        tx.commit().await?;
        Ok(Some(MembershipChange {
            student,
            changed: vec![class_id],
        }))
    }

    async fn delete_student(&self, student_id: Uuid) -> Result<Option<Document>, AppError> {
        let mut tx = self.pool.begin().await?;
        let q = delete_doc(&self.table(Collection::Students), student_id, &[]);
        let Some(student) = fetch_doc(&mut *tx, Collection::Students, &q).await? else {
            return Ok(None);
        };
        let held = membership_set(&student.body);
        if !held.is_empty() {
            let q = increment_field(&self.table(Collection::Classes), &held, STUDENT_COUNT, -1);
            execute(&mut *tx, Collection::Classes, &q).await?;
        }
        tx.commit().await?;
        Ok(Some(student))
    }
}
