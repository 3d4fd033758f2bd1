use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::models::Session;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    Terminal,
    Light,
    Dark,
}

impl ThemePreference {
    pub fn next(self) -> Self {
        match self {
            ThemePreference::Terminal => ThemePreference::Dark,
            ThemePreference::Dark => ThemePreference::Light,
            ThemePreference::Light => ThemePreference::Terminal,
        }
    }
}

/// Where the hosted backend lives and the public key used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    anon_key: Option<String>,
    theme: Option<ThemePreference>,
}

const URL_ENV: &str = "TIMESHEET_URL";
const ANON_KEY_ENV: &str = "TIMESHEET_ANON_KEY";

/// Resolves the backend from, in order: explicit values, environment,
/// config file.
pub fn resolve_backend_config(
    url: Option<String>,
    anon_key: Option<String>,
) -> Result<BackendConfig, String> {
    let config = read_config().unwrap_or_default();
    let url = url
        .or_else(|| env_value(URL_ENV))
        .or(config.url)
        .ok_or_else(|| format!("Backend URL not configured. Pass --url or set {URL_ENV}."))?;
    let anon_key = anon_key
        .or_else(|| env_value(ANON_KEY_ENV))
        .or(config.anon_key)
        .ok_or_else(|| {
            format!("Backend anon key not configured. Pass --anon-key or set {ANON_KEY_ENV}.")
        })?;
    Ok(BackendConfig { url, anon_key })
}

pub fn write_backend_config(value: &BackendConfig) -> Result<(), io::Error> {
    let mut config = read_config().unwrap_or_default();
    config.url = Some(value.url.clone());
    config.anon_key = Some(value.anon_key.clone());
    write_config(&config)
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn read_theme() -> Option<ThemePreference> {
    read_config().and_then(|config| config.theme)
}

pub fn write_theme(theme: ThemePreference) -> Result<(), io::Error> {
    let mut config = read_config().unwrap_or_default();
    config.theme = Some(theme);
    write_config(&config)
}

fn config_path() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.push(".timesheet.json");
    Some(path)
}

fn read_config() -> Option<Config> {
    let path = config_path()?;
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn write_config(config: &Config) -> Result<(), io::Error> {
    let path = config_path()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Home directory not found"))?;
    let json = serde_json::to_string_pretty(config).map_err(io::Error::other)?;
    fs::write(path, json)
}

pub fn read_session() -> Option<Session> {
    let path = session_path()?;
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

pub fn write_session(session: &Session) -> Result<(), io::Error> {
    let path = session_path()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Home directory not found"))?;
    let json = serde_json::to_string_pretty(session).map_err(io::Error::other)?;
    fs::write(path, json)
}

pub fn clear_session() -> Result<(), io::Error> {
    let Some(path) = session_path() else {
        return Ok(());
    };
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn session_path() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.push(".timesheet-session.json");
    Some(path)
}

pub fn default_log_path() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.push(".timesheet.log");
    Some(path)
}
