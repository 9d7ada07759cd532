//! Row query descriptions rendered as PostgREST query parameters.
//!
//! A [`Query`] names a table, the columns to return (including foreign-key
//! expansions), filters, ordering and paging. The REST backend sends it as
//! URL parameters; test backends inspect it directly.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    Neq(String, String),
    Gt(String, String),
    In(String, Vec<String>),
    Ilike(String, String),
    /// Disjunction of raw PostgREST conditions, e.g.
    /// `sender_id.eq.a,receiver_id.eq.a`.
    Or(Vec<String>),
}

impl Filter {
    /// `(name, value)` query parameter for this filter.
    fn to_param(&self) -> (String, String) {
        match self {
            Filter::Eq(col, v) => (col.clone(), format!("eq.{v}")),
            Filter::Neq(col, v) => (col.clone(), format!("neq.{v}")),
            Filter::Gt(col, v) => (col.clone(), format!("gt.{v}")),
            Filter::In(col, vs) => (col.clone(), format!("in.({})", vs.join(","))),
            Filter::Ilike(col, v) => (col.clone(), format!("ilike.{v}")),
            Filter::Or(conds) => ("or".to_string(), format!("({})", conds.join(","))),
        }
    }
}

/// Condition string for use inside [`Filter::Or`].
pub fn cond_eq(column: &str, value: &str) -> String {
    format!("{column}.eq.{value}")
}

/// Conjunction string for use inside [`Filter::Or`].
pub fn cond_and(conds: &[String]) -> String {
    format!("and({})", conds.join(","))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
            offset: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = columns
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("");
        self
    }

    pub fn eq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.filters
            .push(Filter::Eq(column.to_string(), value.to_string()));
        self
    }

    pub fn neq(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.filters
            .push(Filter::Neq(column.to_string(), value.to_string()));
        self
    }

    pub fn gt(mut self, column: &str, value: impl fmt::Display) -> Self {
        self.filters
            .push(Filter::Gt(column.to_string(), value.to_string()));
        self
    }

    pub fn is_in(mut self, column: &str, values: &[String]) -> Self {
        self.filters
            .push(Filter::In(column.to_string(), values.to_vec()));
        self
    }

    pub fn ilike(mut self, column: &str, pattern: &str) -> Self {
        self.filters
            .push(Filter::Ilike(column.to_string(), pattern.to_string()));
        self
    }

    pub fn or(mut self, conds: Vec<String>) -> Self {
        self.filters.push(Filter::Or(conds));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Inclusive row range, as in `range(offset, offset + limit - 1)`.
    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.offset = Some(from);
        self.limit = Some(to.saturating_sub(from) + 1);
        self
    }

    /// Value of the first equality filter on `column`, if any.
    pub fn eq_value(&self, column: &str) -> Option<&str> {
        self.filters.iter().find_map(|f| match f {
            Filter::Eq(col, v) if col == column => Some(v.as_str()),
            _ => None,
        })
    }

    /// Query parameters in PostgREST form. Values are not percent-encoded.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select.clone())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some(order) = &self.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{dir}", order.column)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        params
    }
}
