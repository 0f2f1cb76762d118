//! SQL generation for [`QueryBuilder`](super::QueryBuilder).
//!
//! The trait's default methods produce ANSI-style SQL with `?` placeholders
//! and double-quoted identifiers; a dialect overrides only what differs.
use super::{QueryBuilder, WhereClause};
use crate::support::Record;

pub trait Grammar: Send + Sync {
    /// Quote a single identifier segment.
    fn wrap_segment(&self, segment: &str) -> String {
        format!("\"{}\"", segment.replace('"', "\"\""))
    }

    /// Quote a possibly qualified identifier, keeping `*` and `x as y` aliases intact.
    fn wrap(&self, value: &str) -> String {
        if let Some(idx) = value.find(" as ").or_else(|| value.find(" AS ")) {
            let (column, alias) = (&value[..idx], &value[idx + 4..]);
            return format!("{} as {}", self.wrap(column.trim()), self.wrap_segment(alias.trim()));
        }
        value
            .split('.')
            .map(|segment| {
                if segment == "*" {
                    segment.to_string()
                } else {
                    self.wrap_segment(segment)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    fn columnize(&self, columns: &[String]) -> String {
        if columns.is_empty() {
            return "*".to_string();
        }
        columns
            .iter()
            .map(|c| self.wrap(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn compile_from(&self, query: &QueryBuilder) -> String {
        query.table().map(|t| self.wrap(t)).unwrap_or_default()
    }

    fn compile_wheres(&self, query: &QueryBuilder) -> String {
        let mut sql = String::new();
        for (i, clause) in query.wheres().iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(clause.boolean().as_sql());
                sql.push(' ');
            }
            sql.push_str(&self.compile_where(clause));
        }
        if sql.is_empty() {
            sql
        } else {
            format!(" where {}", sql)
        }
    }

    fn compile_where(&self, clause: &WhereClause) -> String {
        match clause {
            WhereClause::Basic {
                column, operator, ..
            } => format!("{} {} ?", self.wrap(column), operator),
            // An empty IN list can never match; an empty NOT IN always does.
            WhereClause::In { values, not, .. } if values.is_empty() => {
                let sql = if *not { "1 = 1" } else { "0 = 1" };
                sql.to_string()
            }
            WhereClause::In {
                column,
                values,
                not,
                ..
            } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                let keyword = if *not { "not in" } else { "in" };
                format!("{} {} ({})", self.wrap(column), keyword, placeholders)
            }
            WhereClause::Null { column, not, .. } => {
                let keyword = if *not { "is not null" } else { "is null" };
                format!("{} {}", self.wrap(column), keyword)
            }
        }
    }

    fn compile_orders(&self, query: &QueryBuilder) -> String {
        if query.orders().is_empty() {
            return String::new();
        }
        let orders: Vec<String> = query
            .orders()
            .iter()
            .map(|(column, direction)| format!("{} {}", self.wrap(column), direction.as_sql()))
            .collect();
        format!(" order by {}", orders.join(", "))
    }

    fn compile_limits(&self, query: &QueryBuilder) -> String {
        let mut sql = String::new();
        if let Some(limit) = query.limit_value() {
            sql.push_str(&format!(" limit {}", limit));
        }
        if let Some(offset) = query.offset_value() {
            sql.push_str(&format!(" offset {}", offset));
        }
        sql
    }

    fn compile_select(&self, query: &QueryBuilder) -> String {
        format!(
            "select {} from {}{}{}{}",
            self.columnize(query.columns()),
            self.compile_from(query),
            self.compile_wheres(query),
            self.compile_orders(query),
            self.compile_limits(query)
        )
    }

    /// `select count(*) as aggregate` over the query's filters.
    fn compile_count(&self, query: &QueryBuilder) -> String {
        format!(
            "select count(*) as aggregate from {}{}",
            self.compile_from(query),
            self.compile_wheres(query)
        )
    }

    fn compile_insert(&self, query: &QueryBuilder, values: &Record) -> String {
        let columns: Vec<String> = values.keys().map(|c| self.wrap(c)).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        format!(
            "insert into {} ({}) values ({})",
            self.compile_from(query),
            columns.join(", "),
            placeholders
        )
    }

    fn compile_update(&self, query: &QueryBuilder, values: &Record) -> String {
        let sets: Vec<String> = values
            .keys()
            .map(|c| format!("{} = ?", self.wrap(c)))
            .collect();
        format!(
            "update {} set {}{}",
            self.compile_from(query),
            sets.join(", "),
            self.compile_wheres(query)
        )
    }

    fn compile_delete(&self, query: &QueryBuilder) -> String {
        format!(
            "delete from {}{}",
            self.compile_from(query),
            self.compile_wheres(query)
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGrammar;

impl Grammar for SqliteGrammar {
    fn compile_insert(&self, query: &QueryBuilder, values: &Record) -> String {
        if values.is_empty() {
            return format!("insert into {} default values", self.compile_from(query));
        }
        let columns: Vec<String> = values.keys().map(|c| self.wrap(c)).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        format!(
            "insert into {} ({}) values ({})",
            self.compile_from(query),
            columns.join(", "),
            placeholders
        )
    }

    /// SQLite needs a `limit` whenever an `offset` is present.
    fn compile_limits(&self, query: &QueryBuilder) -> String {
        match (query.limit_value(), query.offset_value()) {
            (Some(limit), Some(offset)) => format!(" limit {} offset {}", limit, offset),
            (Some(limit), None) => format!(" limit {}", limit),
            (None, Some(offset)) => format!(" limit -1 offset {}", offset),
            (None, None) => String::new(),
        }
    }
}
