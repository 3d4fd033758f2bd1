use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE};
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::models::{Session, User};
use crate::query::{Query, Table, parse_content_range};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("Too many requests. Try again in a moment.")]
    RateLimited,
    #[error("{0}")]
    Server(String),
    #[error("{0}")]
    Api(String),
    #[error("{0}")]
    Network(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

/// Rows returned by a select, with the total when the query asked for one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub rows: Vec<Value>,
    pub total: Option<usize>,
}

/// The hosted table and auth API the app runs against.
pub trait Backend {
    /// Token sent with table requests; `None` falls back to the anon key.
    fn set_access_token(&mut self, token: Option<String>);

    fn select(&self, query: &Query) -> Result<Selection, BackendError>;
    fn insert(&self, table: Table, row: &Value) -> Result<Value, BackendError>;
    fn update(&self, table: Table, id: &str, patch: &Value) -> Result<(), BackendError>;
    fn delete(&self, table: Table, id: &str) -> Result<(), BackendError>;

    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError>;
    /// Returns `None` when the account still has to confirm its email.
    fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, BackendError>;
    fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError>;
    fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;
    fn get_user(&self, access_token: &str) -> Result<User, BackendError>;
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|err| BackendError::Decode(err.to_string())))
        .collect()
}

pub fn encode_row<T: Serialize>(value: &T) -> Result<Value, BackendError> {
    serde_json::to_value(value).map_err(|err| BackendError::Decode(err.to_string()))
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent("timesheet-tui")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| BackendError::Network(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: None,
        })
    }

    fn url(&self, path: &str, params: &[(String, String)]) -> Result<Url, BackendError> {
        let base = format!("{}{}", self.base_url, path);
        let url = if params.is_empty() {
            Url::parse(&base)
        } else {
            Url::parse_with_params(&base, params)
        };
        url.map_err(|err| BackendError::Network(err.to_string()))
    }

    fn table_url(&self, table: Table, params: &[(String, String)]) -> Result<Url, BackendError> {
        self.url(&format!("/rest/v1/{table}"), params)
    }

    fn by_id(id: &str) -> Vec<(String, String)> {
        vec![("id".to_string(), format!("eq.{id}"))]
    }

    fn send(&self, request: RequestBuilder, bearer: Option<&str>) -> Result<Response, BackendError> {
        let token = bearer
            .or(self.access_token.as_deref())
            .unwrap_or(&self.anon_key);
        let response = request
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .map_err(|err| BackendError::Network(err.to_string()))?;
        check_status(response)
    }

    fn token_grant(&self, grant_type: &str, body: &Value) -> Result<Session, BackendError> {
        let url = self.url(
            "/auth/v1/token",
            &[("grant_type".to_string(), grant_type.to_string())],
        )?;
        let response = self.send(self.client.post(url).json(body), Some(self.anon_key.as_str()))?;
        let token = response
            .json::<TokenResponse>()
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        Ok(token.into_session(Utc::now().timestamp()))
    }
}

impl Backend for HttpBackend {
    fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    fn select(&self, query: &Query) -> Result<Selection, BackendError> {
        let params = query.to_params();
        debug!(table = %query.table(), ?params, "select");
        let url = self.table_url(query.table(), &params)?;
        let mut request = self.client.get(url);
        if query.wants_count() {
            request = request.header("Prefer", "count=exact");
        }
        let response = self.send(request, None)?;
        let total = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range);
        let rows = response
            .json::<Vec<Value>>()
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        Ok(Selection { rows, total })
    }

    fn insert(&self, table: Table, row: &Value) -> Result<Value, BackendError> {
        debug!(%table, "insert");
        let url = self.table_url(table, &[])?;
        let request = self
            .client
            .post(url)
            .header("Prefer", "return=representation")
            .json(row);
        let response = self.send(request, None)?;
        let mut rows = response
            .json::<Vec<Value>>()
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        if rows.is_empty() {
            return Err(BackendError::Decode(format!("insert into {table} returned no row")));
        }
        Ok(rows.swap_remove(0))
    }

    fn update(&self, table: Table, id: &str, patch: &Value) -> Result<(), BackendError> {
        debug!(%table, id, "update");
        let url = self.table_url(table, &Self::by_id(id))?;
        let request = self
            .client
            .patch(url)
            .header("Prefer", "return=minimal")
            .json(patch);
        self.send(request, None)?;
        Ok(())
    }

    fn delete(&self, table: Table, id: &str) -> Result<(), BackendError> {
        debug!(%table, id, "delete");
        let url = self.table_url(table, &Self::by_id(id))?;
        self.send(self.client.delete(url), None)?;
        Ok(())
    }

    fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        self.token_grant("password", &json!({ "email": email, "password": password }))
    }

    fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>, BackendError> {
        let url = self.url("/auth/v1/signup", &[])?;
        let body = json!({ "email": email, "password": password });
        let response = self.send(self.client.post(url).json(&body), Some(self.anon_key.as_str()))?;
        let value = response
            .json::<Value>()
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        if value.get("access_token").is_none() {
            return Ok(None);
        }
        let token: TokenResponse =
            serde_json::from_value(value).map_err(|err| BackendError::Decode(err.to_string()))?;
        Ok(Some(token.into_session(Utc::now().timestamp())))
    }

    fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError> {
        self.token_grant("refresh_token", &json!({ "refresh_token": refresh_token }))
    }

    fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let url = self.url("/auth/v1/logout", &[])?;
        self.send(self.client.post(url), Some(access_token))?;
        Ok(())
    }

    fn get_user(&self, access_token: &str) -> Result<User, BackendError> {
        let url = self.url("/auth/v1/user", &[])?;
        let response = self.send(self.client.get(url), Some(access_token))?;
        response
            .json::<User>()
            .map_err(|err| BackendError::Decode(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| now + self.expires_in.unwrap_or(3600));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

fn check_status(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| format!("Backend error: {status}"));
    warn!(%status, %message, "request failed");

    Err(match status.as_u16() {
        401 | 403 => BackendError::Unauthorized(message),
        429 => BackendError::RateLimited,
        _ if status.is_server_error() => BackendError::Server(message),
        _ => BackendError::Api(message),
    })
}

/// The human-readable message in a PostgREST or GoTrue error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
