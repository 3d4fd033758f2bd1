use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::dates::parse_interval;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub project_id: String,
}

/// A task as listed in the task dialog, with its project's name expanded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskRow {
    #[serde(flatten)]
    pub task: Task,
    #[serde(default)]
    pub project: Option<NameRef>,
}

/// An expanded foreign-key reference carrying only the display name.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NameRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimeEntry {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub duration: Option<i64>,
    #[serde(default)]
    pub invoice_number: Option<String>,
}

/// A time entry joined with the names of its project and task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeEntryRow {
    #[serde(flatten)]
    pub entry: TimeEntry,
    #[serde(default)]
    pub project: Option<NameRef>,
    #[serde(default)]
    pub task: Option<NameRef>,
}

impl TimeEntryRow {
    pub fn project_name(&self) -> &str {
        self.project.as_ref().map(|p| p.name.as_str()).unwrap_or("")
    }

    pub fn task_name(&self) -> &str {
        self.task.as_ref().map(|t| t.name.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectDraft {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskDraft {
    pub name: String,
    pub description: Option<String>,
    pub project_id: String,
}

/// Column values written by the time entry form. `None` is sent as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeEntryPayload {
    pub project_id: String,
    pub task_id: Option<String>,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub invoice_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTimeEntry {
    pub user_id: String,
    #[serde(flatten)]
    pub fields: TimeEntryPayload,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) after which the access token is rejected.
    pub expires_at: i64,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.expires_at
    }
}

// Generated duration columns come back as seconds or as a Postgres interval.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|secs| secs.round() as i64)),
        Some(serde_json::Value::String(text)) => parse_interval(&text),
        _ => None,
    })
}
