//! Typed builder for PostgREST table queries.
//!
//! A [`Query`] is assembled at the call site and rendered into URL query
//! pairs by the HTTP backend. The in-memory test backend reads the same
//! structure back through its accessors, so both agree on semantics.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Projects,
    Tasks,
    TimeEntries,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Projects => "projects",
            Table::Tasks => "tasks",
            Table::TimeEntries => "time_entries",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            SortDirection::Ascending => "↑",
            SortDirection::Descending => "↓",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq { column: String, value: String },
    /// Case-insensitive substring match OR'd across the columns.
    AnyIlike { columns: Vec<String>, needle: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: Table,
    select: String,
    filters: Vec<Filter>,
    order: Option<Order>,
    range: Option<(usize, usize)>,
    count_exact: bool,
}

impl Query {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            select: "*".to_string(),
            filters: Vec::new(),
            order: None,
            range: None,
            count_exact: false,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = columns.split_whitespace().collect::<Vec<_>>().join("");
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn any_ilike(mut self, columns: &[&str], needle: impl Into<String>) -> Self {
        self.filters.push(Filter::AnyIlike {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            needle: needle.into(),
        });
        self
    }

    pub fn order(mut self, column: &str, direction: SortDirection) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            direction,
        });
        self
    }

    /// Rows `offset..offset + limit`.
    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.range = Some((offset, limit));
        self
    }

    pub fn count_exact(mut self) -> Self {
        self.count_exact = true;
        self
    }

    pub fn table(&self) -> Table {
        self.table
    }

    #[cfg(test)]
    pub fn columns(&self) -> &str {
        &self.select
    }

    #[cfg(test)]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    #[cfg(test)]
    pub fn ordering(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    #[cfg(test)]
    pub fn window(&self) -> Option<(usize, usize)> {
        self.range
    }

    pub fn wants_count(&self) -> bool {
        self.count_exact
    }

    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select.clone())];

        for filter in &self.filters {
            match filter {
                Filter::Eq { column, value } => {
                    params.push((column.clone(), format!("eq.{}", quote_value(value))));
                }
                Filter::AnyIlike { columns, needle } => {
                    let pattern = quote_value(&format!("*{}*", like_literal(needle)));
                    let clauses = columns
                        .iter()
                        .map(|column| format!("{column}.ilike.{pattern}"))
                        .collect::<Vec<_>>()
                        .join(",");
                    params.push(("or".to_string(), format!("({clauses})")));
                }
            }
        }

        if let Some(order) = &self.order {
            let direction = match order.direction {
                SortDirection::Ascending => "asc",
                SortDirection::Descending => "desc",
            };
            params.push(("order".to_string(), format!("{}.{direction}", order.column)));
        }

        if let Some((offset, limit)) = self.range {
            params.push(("offset".to_string(), offset.to_string()));
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }
}

/// Escapes LIKE wildcards in a search needle. PostgREST rewrites every `*`
/// to `%`, so a literal `*` goes out as the single-character wildcard `_`.
fn like_literal(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for ch in needle.chars() {
        match ch {
            '%' | '_' | '\\' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            '*' => escaped.push('_'),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Quotes a filter value when it carries PostgREST reserved characters.
fn quote_value(value: &str) -> String {
    let reserved = value
        .chars()
        .any(|ch| matches!(ch, ',' | '(' | ')' | '.' | ':' | '"' | '\\') || ch.is_whitespace());
    if !reserved {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Total row count from a `Content-Range` header such as `0-9/42` or `*/0`.
pub fn parse_content_range(value: &str) -> Option<usize> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.parse().ok()
}
