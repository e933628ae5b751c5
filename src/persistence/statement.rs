/// Named statements
///
/// A `Statement` describes a select over one entity kind as a list of predicates on
/// JSON fields. The same description renders to SQLite SQL and evaluates in memory,
/// which is how the session overlays entities created or changed in the current
/// command on top of what the database returns.

use crate::error::{EngineError, EngineResult};
use crate::persistence::EntityKind;
use serde_json::Value;
use std::cmp::Ordering;

/// A single filter on a JSON field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// field = ?
    Eq(&'static str),
    /// field IS NULL
    IsNull(&'static str),
    /// field IS NOT NULL
    NotNull(&'static str),
    /// field > ?
    Gt(&'static str),
    /// field IS NULL OR field < ?
    NullOrLt(&'static str),
    /// field IS NULL OR field <= ?
    NullOrLte(&'static str),
}

impl Predicate {
    fn field(&self) -> &'static str {
        match *self {
            Predicate::Eq(f)
            | Predicate::IsNull(f)
            | Predicate::NotNull(f)
            | Predicate::Gt(f)
            | Predicate::NullOrLt(f)
            | Predicate::NullOrLte(f) => f,
        }
    }

    fn takes_param(&self) -> bool {
        !matches!(self, Predicate::IsNull(_) | Predicate::NotNull(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Static description of a named select
#[derive(Debug, Clone, Copy)]
pub struct Statement {
    pub name: &'static str,
    pub kind: EntityKind,
    pub predicates: &'static [Predicate],
    pub order_by: Option<(&'static str, Order)>,
}

impl Statement {
    pub const fn new(name: &'static str, kind: EntityKind, predicates: &'static [Predicate]) -> Self {
        Self { name, kind, predicates, order_by: None }
    }

    pub const fn ordered(mut self, field: &'static str, order: Order) -> Self {
        self.order_by = Some((field, order));
        self
    }

    pub fn param_count(&self) -> usize {
        self.predicates.iter().filter(|p| p.takes_param()).count()
    }

    pub(crate) fn check_params(&self, params: &[Value]) -> EngineResult<()> {
        if params.len() != self.param_count() {
            return Err(EngineError::IllegalArgument(format!(
                "statement '{}' expects {} parameters, got {}",
                self.name,
                self.param_count(),
                params.len()
            )));
        }
        Ok(())
    }

    /// Render the statement as SQLite SQL selecting `id, rev, data`
    pub fn sql(&self) -> String {
        let conditions: Vec<String> = self
            .predicates
            .iter()
            .map(|predicate| {
                let column = json_column(predicate.field());
                match predicate {
                    Predicate::Eq(_) => format!("{column} = ?"),
                    Predicate::IsNull(_) => format!("{column} IS NULL"),
                    Predicate::NotNull(_) => format!("{column} IS NOT NULL"),
                    Predicate::Gt(_) => format!("{column} > ?"),
                    Predicate::NullOrLt(_) => format!("({column} IS NULL OR {column} < ?)"),
                    Predicate::NullOrLte(_) => format!("({column} IS NULL OR {column} <= ?)"),
                }
            })
            .collect();

        let mut sql = format!("SELECT id, rev, data FROM {}", self.kind.table());
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if let Some((field, order)) = self.order_by {
            let direction = match order {
                Order::Asc => "ASC",
                Order::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {} {}", json_column(field), direction));
        }
        sql
    }

    /// Evaluate the predicates against an in-memory JSON document
    pub fn matches(&self, data: &Value, params: &[Value]) -> bool {
        let mut params = params.iter();
        self.predicates.iter().all(|predicate| {
            let field = data.get(predicate.field()).unwrap_or(&Value::Null);
            match predicate {
                Predicate::IsNull(_) => field.is_null(),
                Predicate::NotNull(_) => !field.is_null(),
                Predicate::Eq(_) => params.next().is_some_and(|param| values_equal(field, param)),
                Predicate::Gt(_) => params
                    .next()
                    .is_some_and(|param| compare_values(field, param) == Some(Ordering::Greater)),
                Predicate::NullOrLt(_) => params.next().is_some_and(|param| {
                    field.is_null() || compare_values(field, param) == Some(Ordering::Less)
                }),
                Predicate::NullOrLte(_) => params.next().is_some_and(|param| {
                    field.is_null()
                        || matches!(compare_values(field, param), Some(Ordering::Less | Ordering::Equal))
                }),
            }
        })
    }

    /// Sort documents by the statement ordering (stable; null first ascending, like SQLite)
    pub(crate) fn sort<T>(&self, rows: &mut [(Value, T)]) {
        if let Some((field, order)) = self.order_by {
            rows.sort_by(|(a, _), (b, _)| {
                let a = a.get(field).unwrap_or(&Value::Null);
                let b = b.get(field).unwrap_or(&Value::Null);
                let ordering = sort_key_cmp(a, b);
                match order {
                    Order::Asc => ordering,
                    Order::Desc => ordering.reverse(),
                }
            });
        }
    }
}

fn json_column(field: &str) -> String {
    format!("json_extract(data, '$.{field}')")
}

/// Numeric view of a JSON scalar; booleans behave like SQLite's 0/1
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn values_equal(field: &Value, param: &Value) -> bool {
    if field.is_null() || param.is_null() {
        // SQL `= NULL` never matches
        return false;
    }
    match (as_number(field), as_number(param)) {
        (Some(a), Some(b)) => a == b,
        _ => field == param,
    }
}

fn compare_values(field: &Value, param: &Value) -> Option<Ordering> {
    match (field, param) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => match (as_number(field), as_number(param)) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BY_PARENT: Statement = Statement::new(
        "selectExecutionsByParentId",
        EntityKind::Execution,
        &[Predicate::Eq("parent_id"), Predicate::IsNull("activity_id")],
    )
    .ordered("start_time", Order::Asc);

    const DUE_JOBS: Statement = Statement::new(
        "selectDueJobs",
        EntityKind::Job,
        &[
            Predicate::Gt("retries"),
            Predicate::NullOrLt("lock_expiration_time"),
            Predicate::NullOrLte("duedate"),
        ],
    );

    #[test]
    fn renders_sql_with_predicates_and_order() {
        assert_eq!(
            BY_PARENT.sql(),
            "SELECT id, rev, data FROM ru_execution WHERE json_extract(data, '$.parent_id') = ? \
             AND json_extract(data, '$.activity_id') IS NULL \
             ORDER BY json_extract(data, '$.start_time') ASC"
        );
        assert_eq!(BY_PARENT.param_count(), 1);
        assert!(DUE_JOBS.sql().contains("(json_extract(data, '$.duedate') IS NULL OR json_extract(data, '$.duedate') <= ?)"));
    }

    #[test]
    fn in_memory_evaluation_matches_sql_semantics() {
        let params = [json!(0), json!(1_000), json!(1_000)];
        let due = json!({ "retries": 3, "lock_expiration_time": null, "duedate": 1_000 });
        let locked = json!({ "retries": 3, "lock_expiration_time": 5_000, "duedate": 500 });
        let exhausted = json!({ "retries": 0, "duedate": null });
        let future = json!({ "retries": 1, "duedate": 1_001 });

        assert!(DUE_JOBS.matches(&due, &params));
        assert!(!DUE_JOBS.matches(&locked, &params));
        assert!(!DUE_JOBS.matches(&exhausted, &params));
        assert!(!DUE_JOBS.matches(&future, &params));
    }

    #[test]
    fn booleans_compare_like_integers_and_null_never_equals() {
        const ACTIVE: Statement =
            Statement::new("active", EntityKind::Execution, &[Predicate::Eq("is_active")]);
        assert!(ACTIVE.matches(&json!({ "is_active": true }), &[json!(true)]));
        assert!(ACTIVE.matches(&json!({ "is_active": true }), &[json!(1)]));
        assert!(!ACTIVE.matches(&json!({ "is_active": null }), &[Value::Null]));
    }

    #[test]
    fn sorts_nulls_first_and_is_stable() {
        let mut rows = vec![
            (json!({ "start_time": 3 }), "c"),
            (json!({ "start_time": null }), "n"),
            (json!({ "start_time": 1 }), "a"),
            (json!({ "start_time": 1 }), "b"),
        ];
        BY_PARENT.sort(&mut rows);
        let order: Vec<&str> = rows.iter().map(|(_, tag)| *tag).collect();
        assert_eq!(order, vec!["n", "a", "b", "c"]);
    }

    #[test]
    fn rejects_wrong_parameter_count() {
        assert!(BY_PARENT.check_params(&[]).is_err());
        assert!(BY_PARENT.check_params(&[json!("p")]).is_ok());
    }
}
