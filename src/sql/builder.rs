//! Builds parameterized statements over document tables `(id, doc, created_at, updated_at)`.
//! Field names come from code only and are inlined as literals; values are always parameters.

use crate::sql::params::Param;
use crate::store::{Condition, Query, Update};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Columns returned for every document row.
pub const DOC_COLUMNS: &str = "id, doc, created_at, updated_at";

/// Hard cap on listing size.
pub const MAX_LIMIT: u32 = 1000;

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// String literal for a JSON key.
fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Param>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, p: Param) -> usize {
        self.params.push(p);
        self.params.len()
    }
}

fn condition_sql(q: &mut QueryBuf, condition: &Condition) -> String {
    match condition {
        Condition::Eq(field, value) => {
            let n = q.push_param(Param::Json(value.clone()));
            format!("doc -> {} = ${}", literal(field), n)
        }
        Condition::Contains(field, value) => {
            let n = q.push_param(Param::Json(Value::Array(vec![value.clone()])));
            format!("doc -> {} @> ${}", literal(field), n)
        }
        Condition::Exists(field) => format!("doc ? {}", literal(field)),
        Condition::Missing(field) => format!("NOT (doc ? {})", literal(field)),
        Condition::Len(field, len) => {
            let n = q.push_param(Param::BigInt(*len as i64));
            let f = literal(field);
            format!(
                "(CASE WHEN jsonb_typeof(doc -> {f}) = 'array' THEN jsonb_array_length(doc -> {f}) ELSE -1 END) = ${n}",
                f = f,
                n = n
            )
        }
        Condition::IdIn(ids) => {
            let n = q.push_param(Param::UuidList(ids.clone()));
            format!("id = ANY(${})", n)
        }
    }
}

/// Conditions joined with AND; `TRUE` when empty.
fn where_clause(q: &mut QueryBuf, conditions: &[Condition]) -> String {
    if conditions.is_empty() {
        return "TRUE".into();
    }
    conditions
        .iter()
        .map(|c| condition_sql(q, c))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// SELECT by id. Caller adds nothing; id is $1.
pub fn select_by_id(table: &str, id: Uuid) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Param::Uuid(id));
    q.sql = format!("SELECT {} FROM {} WHERE id = ${}", DOC_COLUMNS, table, n);
    q
}

/// SELECT by id with a row lock held until the transaction ends.
pub fn select_for_update(table: &str, id: Uuid) -> QueryBuf {
    let mut q = select_by_id(table, id);
    q.sql.push_str(" FOR UPDATE");
    q
}

/// SELECT matching rows, newest first, limit capped at [`MAX_LIMIT`].
pub fn select_where(table: &str, query: &Query) -> QueryBuf {
    let mut q = QueryBuf::new();
    let clause = where_clause(&mut q, &query.conditions);
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY created_at DESC, id",
        DOC_COLUMNS, table, clause
    );
    if let Some(limit) = query.limit {
        let n = q.push_param(Param::BigInt(i64::from(limit.min(MAX_LIMIT))));
        q.sql.push_str(&format!(" LIMIT ${}", n));
    }
    if let Some(offset) = query.offset {
        let n = q.push_param(Param::BigInt(i64::from(offset)));
        q.sql.push_str(&format!(" OFFSET ${}", n));
    }
    q
}

pub fn count_where(table: &str, conditions: &[Condition]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let clause = where_clause(&mut q, conditions);
    q.sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, clause);
    q
}

pub fn insert_doc(table: &str, id: Uuid, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_n = q.push_param(Param::Uuid(id));
    let doc_n = q.push_param(Param::Json(Value::Object(body.clone())));
    q.sql = format!(
        "INSERT INTO {} (id, doc) VALUES (${}, ${}) RETURNING {}",
        table, id_n, doc_n, DOC_COLUMNS
    );
    q
}

/// UPDATE one row: drop `unset` keys, merge `set`, bump `updated_at`; guarded by `guard`.
pub fn update_doc(table: &str, id: Uuid, guard: &[Condition], update: &Update) -> QueryBuf {
    let mut q = QueryBuf::new();
    let id_n = q.push_param(Param::Uuid(id));
    let unset_n = q.push_param(Param::TextList(update.unset.clone()));
    let set_n = q.push_param(Param::Json(Value::Object(update.set.clone())));
    let mut clause = format!("id = ${}", id_n);
    if !guard.is_empty() {
        clause.push_str(" AND ");
        clause.push_str(&where_clause(&mut q, guard));
    }
    q.sql = format!(
        "UPDATE {} SET doc = (doc - ${}::text[]) || ${}::jsonb, updated_at = NOW() WHERE {} RETURNING {}",
        table, unset_n, set_n, clause, DOC_COLUMNS
    );
    q
}

/// DELETE one row, guarded by `guard`.
pub fn delete_doc(table: &str, id: Uuid, guard: &[Condition]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Param::Uuid(id));
    let mut clause = format!("id = ${}", n);
    if !guard.is_empty() {
        clause.push_str(" AND ");
        clause.push_str(&where_clause(&mut q, guard));
    }
    q.sql = format!("DELETE FROM {} WHERE {} RETURNING {}", table, clause, DOC_COLUMNS);
    q
}

/// Ids of the listed rows whose `active` flag is not `false`, share-locked until the
/// transaction ends.
pub fn select_active_for_share(table: &str, ids: &[Uuid]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Param::UuidList(ids.to_vec()));
    q.sql = format!(
        "SELECT id FROM {} WHERE id = ANY(${}) AND COALESCE(doc -> 'active', 'true'::jsonb) <> 'false'::jsonb FOR SHARE",
        table, n
    );
    q
}

/// Add `by` to a numeric field on every listed row, floored at zero.
pub fn increment_field(table: &str, ids: &[Uuid], field: &str, by: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ids_n = q.push_param(Param::UuidList(ids.to_vec()));
    let by_n = q.push_param(Param::BigInt(by));
    let f = literal(field);
    q.sql = format!(
        "UPDATE {table} SET doc = jsonb_set(doc, ARRAY[{f}], to_jsonb(GREATEST(COALESCE((doc ->> {f})::bigint, 0) + ${by_n}, 0))), \
         updated_at = NOW() WHERE id = ANY(${ids_n})",
        table = table,
        f = f,
        by_n = by_n,
        ids_n = ids_n
    );
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CLASS_IDS, LEGACY_CLASS_ID};
    use serde_json::json;

    #[test]
    fn select_numbers_params_in_order() {
        let query = Query::new()
            .filter(Condition::eq("active", true))
            .filter(Condition::Contains(CLASS_IDS, json!("x")))
            .limit(5000)
            .offset(10);
        let q = select_where("\"classroom\".\"students\"", &query);
        assert_eq!(
            q.sql,
            "SELECT id, doc, created_at, updated_at FROM \"classroom\".\"students\" \
             WHERE doc -> 'active' = $1 AND doc -> 'class_ids' @> $2 ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        );
        assert_eq!(q.params[1], Param::Json(json!(["x"])));
        assert_eq!(q.params[2], Param::BigInt(1000));
    }

    #[test]
    fn guarded_update_places_guard_after_id() {
        let update = Update::new().set(CLASS_IDS, json!(["a"])).unset(LEGACY_CLASS_ID);
        let id = Uuid::new_v4();
        let q = update_doc("t", id, &[Condition::Exists(LEGACY_CLASS_ID), Condition::Missing(CLASS_IDS)], &update);
        assert!(q.sql.contains("WHERE id = $1 AND doc ? 'class_id' AND NOT (doc ? 'class_ids')"));
        assert_eq!(q.params[0], Param::Uuid(id));
        assert_eq!(q.params[1], Param::TextList(vec!["class_id".into()]));
    }

    #[test]
    fn active_classes_are_share_locked() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let q = select_active_for_share("t", &ids);
        assert_eq!(
            q.sql,
            "SELECT id FROM t WHERE id = ANY($1) AND COALESCE(doc -> 'active', 'true'::jsonb) <> 'false'::jsonb FOR SHARE"
        );
        assert_eq!(q.params, vec![Param::UuidList(ids)]);
    }

    #[test]
    fn guarded_delete_checks_the_counter() {
        let q = delete_doc("t", Uuid::new_v4(), &[Condition::eq("student_count", 0)]);
        assert_eq!(
            q.sql,
            "DELETE FROM t WHERE id = $1 AND doc -> 'student_count' = $2 RETURNING id, doc, created_at, updated_at"
        );
        assert_eq!(q.params[1], Param::Json(json!(0)));
    }

    #[test]
    fn field_literals_are_escaped() {
        let q = count_where("t", &[Condition::Exists("it's")]);
        assert_eq!(q.sql, "SELECT COUNT(*) FROM t WHERE doc ? 'it''s'");
        assert_eq!(quoted("a\"b"), "\"a\"\"b\"");
    }
}
