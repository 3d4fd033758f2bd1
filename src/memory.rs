//! In-memory stand-in for the hosted backend, used by unit tests.
//!
//! Rows live as JSON objects per table. Selects honor the same filters,
//! ordering, paging and `alias:table(columns)` embeds the app sends over
//! HTTP, and every table call is recorded for assertions.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value, json};

use crate::backend::{Backend, BackendError, Selection};
use crate::models::{Session, User};
use crate::query::{Filter, Query, SortDirection, Table};

pub const USER_ID: &str = "user-1";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Select(Table),
    Insert(Table, Value),
    Update { table: Table, id: String, patch: Value },
    Delete(Table, String),
}

#[derive(Default)]
struct State {
    tables: HashMap<Table, Vec<Value>>,
    calls: Vec<Call>,
    next_id: u64,
    next_token: u64,
    fail_next: Option<String>,
}

impl State {
    fn take_failure(&mut self) -> Result<(), BackendError> {
        match self.fail_next.take() {
            Some(message) => Err(BackendError::Api(message)),
            None => Ok(()),
        }
    }

    fn session(&mut self) -> Session {
        self.next_token += 1;
        Session {
            access_token: format!("access-{}", self.next_token),
            refresh_token: format!("refresh-{}", self.next_token),
            expires_at: (Utc::now() + Duration::hours(1)).timestamp(),
            user: User {
                id: USER_ID.to_string(),
                email: Some("me@example.com".to_string()),
            },
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    state: RefCell<State>,
    access_token: Option<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.clone()
    }

    /// Makes the next table call, token refresh or user lookup fail with
    /// `message`.
    pub fn fail_next(&self, message: &str) {
        self.state.borrow_mut().fail_next = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn select_count(&self, table: Table) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Select(t) if *t == table))
            .count()
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.state
            .borrow()
            .tables
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }
}

impl Backend for MemoryBackend {
    fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    fn select(&self, query: &Query) -> Result<Selection, BackendError> {
        let mut state = self.state.borrow_mut();
        state.take_failure()?;
        state.calls.push(Call::Select(query.table()));

        let mut rows: Vec<Value> = state
            .tables
            .get(&query.table())
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters().iter().all(|filter| matches(row, filter)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let total = rows.len();

        if let Some(order) = query.ordering() {
            rows.sort_by(|a, b| {
                let ordering = compare(&a[order.column.as_str()], &b[order.column.as_str()]);
                match order.direction {
                    SortDirection::Ascending => ordering,
                    SortDirection::Descending => ordering.reverse(),
                }
            });
        }

        if let Some((offset, limit)) = query.window() {
            rows = rows.into_iter().skip(offset).take(limit).collect();
        }

        let embeds = parse_embeds(query.columns());
        for row in &mut rows {
            for embed in &embeds {
                let target = row
                    .get(format!("{}_id", embed.alias))
                    .and_then(Value::as_str)
                    .and_then(|id| find(&state.tables, embed.table, id))
                    .map(|found| pick(found, &embed.columns))
                    .unwrap_or(Value::Null);
                if let Value::Object(object) = row {
                    object.insert(embed.alias.clone(), target);
                }
            }
        }

        Ok(Selection {
            rows,
            total: query.wants_count().then_some(total),
        })
    }

    fn insert(&self, table: Table, row: &Value) -> Result<Value, BackendError> {
        let mut state = self.state.borrow_mut();
        state.take_failure()?;
        state.calls.push(Call::Insert(table, row.clone()));

        let Value::Object(fields) = row else {
            return Err(BackendError::Api("insert expects an object".to_string()));
        };
        state.next_id += 1;
        let mut object = Map::new();
        object.insert(
            "id".to_string(),
            json!(format!("{}-{}", table, state.next_id)),
        );
        object.extend(fields.clone());
        let mut created = Value::Object(object);
        if table == Table::TimeEntries {
            derive_duration(&mut created);
        }
        state
            .tables
            .entry(table)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    fn update(&self, table: Table, id: &str, patch: &Value) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.take_failure()?;
        state.calls.push(Call::Update {
            table,
            id: id.to_string(),
            patch: patch.clone(),
        });

        let Some(rows) = state.tables.get_mut(&table) else {
            return Ok(());
        };
        for row in rows.iter_mut().filter(|row| row["id"] == id) {
            if let (Value::Object(object), Value::Object(changes)) = (&mut *row, patch) {
                object.extend(changes.clone());
            }
            if table == Table::TimeEntries {
                derive_duration(row);
            }
        }
        Ok(())
    }

    fn delete(&self, table: Table, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        state.take_failure()?;
        state.calls.push(Call::Delete(table, id.to_string()));
        if let Some(rows) = state.tables.get_mut(&table) {
            rows.retain(|row| row["id"] != id);
        }
        Ok(())
    }

    fn sign_in_with_password(&self, _email: &str, _password: &str) -> Result<Session, BackendError> {
        Ok(self.state.borrow_mut().session())
    }

    fn sign_up(&self, _email: &str, _password: &str) -> Result<Option<Session>, BackendError> {
        Ok(Some(self.state.borrow_mut().session()))
    }

    fn refresh_session(&self, _refresh_token: &str) -> Result<Session, BackendError> {
        let mut state = self.state.borrow_mut();
        state.take_failure()?;
        Ok(state.session())
    }

    fn sign_out(&self, _access_token: &str) -> Result<(), BackendError> {
        Ok(())
    }

    fn get_user(&self, _access_token: &str) -> Result<User, BackendError> {
        self.state.borrow_mut().take_failure()?;
        Ok(User {
            id: USER_ID.to_string(),
            email: Some("me@example.com".to_string()),
        })
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { column, value } => as_text(&row[column.as_str()]).as_deref() == Some(value),
        Filter::AnyIlike { columns, needle } => {
            let needle = needle.to_lowercase();
            columns.iter().any(|column| {
                as_text(&row[column.as_str()])
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
            })
        }
    }
}

// Nulls sort as the largest value.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        _ => as_text(a).cmp(&as_text(b)),
    }
}

struct Embed {
    alias: String,
    table: Table,
    columns: Vec<String>,
}

fn parse_embeds(select: &str) -> Vec<Embed> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in select.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    parts.push(current);

    parts
        .iter()
        .filter_map(|part| {
            let (alias, rest) = part.split_once(':')?;
            let (table, columns) = rest.strip_suffix(')')?.split_once('(')?;
            let table = [Table::Projects, Table::Tasks, Table::TimeEntries]
                .into_iter()
                .find(|candidate| candidate.as_str() == table)?;
            Some(Embed {
                alias: alias.to_string(),
                table,
                columns: columns.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

fn find<'a>(tables: &'a HashMap<Table, Vec<Value>>, table: Table, id: &str) -> Option<&'a Value> {
    tables.get(&table)?.iter().find(|row| row["id"] == id)
}

fn pick(row: &Value, columns: &[String]) -> Value {
    let mut object = Map::new();
    for column in columns {
        object.insert(column.clone(), row[column.as_str()].clone());
    }
    Value::Object(object)
}

fn derive_duration(row: &mut Value) {
    let timestamp = |key: &str| {
        row[key]
            .as_str()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
    };
    let duration = match (timestamp("start_time"), timestamp("end_time")) {
        (Some(start), Some(end)) => json!((end - start).num_seconds()),
        _ => Value::Null,
    };
    if let Value::Object(object) = row {
        object.insert("duration".to_string(), duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let project = backend
            .insert(Table::Projects, &json!({ "name": "Acme" }))
            .unwrap();
        for (description, start) in [
            ("Alpha", "2024-01-01T09:00:00Z"),
            ("beta", "2024-01-02T09:00:00Z"),
            ("Gamma", "2024-01-03T09:00:00Z"),
        ] {
            backend
                .insert(
                    Table::TimeEntries,
                    &json!({
                        "user_id": USER_ID,
                        "project_id": project["id"],
                        "description": description,
                        "start_time": start,
                        "end_time": null,
                    }),
                )
                .unwrap();
        }
        backend
    }

    #[test]
    fn select_filters_orders_and_pages() {
        let backend = seeded();
        let query = Query::new(Table::TimeEntries)
            .any_ilike(&["description"], "A")
            .order("start_time", SortDirection::Descending)
            .range(0, 2)
            .count_exact();
        let selection = backend.select(&query).unwrap();

        assert_eq!(selection.total, Some(3));
        let descriptions: Vec<_> = selection
            .rows
            .iter()
            .map(|row| row["description"].as_str().unwrap())
            .collect();
        assert_eq!(descriptions, ["Gamma", "beta"]);
    }

    #[test]
    fn select_expands_embeds() {
        let backend = seeded();
        let query = Query::new(Table::TimeEntries).select("*, project:projects(name), task:tasks(name)");
        let selection = backend.select(&query).unwrap();
        assert_eq!(selection.rows[0]["project"], json!({ "name": "Acme" }));
        assert_eq!(selection.rows[0]["task"], Value::Null);
        assert_eq!(selection.total, None);
    }

    #[test]
    fn update_recomputes_duration() {
        let backend = seeded();
        let id = backend.rows(Table::TimeEntries)[0]["id"]
            .as_str()
            .unwrap()
            .to_string();
        backend
            .update(
                Table::TimeEntries,
                &id,
                &json!({ "end_time": "2024-01-01T10:30:00Z" }),
            )
            .unwrap();
        assert_eq!(backend.rows(Table::TimeEntries)[0]["duration"], json!(5400));
    }
}
