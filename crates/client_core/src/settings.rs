use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::Context;
use thiserror::Error;
use url::Url;

use crate::refresh::DEFAULT_REFRESH_COOLDOWN;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub app_id: String,
    pub base_url: String,
    pub auth_anon_url: String,
    pub auth_refresh_url: String,
    pub refresh_cooldown: Duration,
    pub session_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{field} is not a valid url: {value}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("{field} must not be empty")]
    Missing { field: &'static str },
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            app_id: "restaurant-reviews".into(),
            base_url: "http://127.0.0.1:8080".into(),
            auth_anon_url: "http://127.0.0.1:8080/auth/anon".into(),
            auth_refresh_url: "http://127.0.0.1:8080/auth/refresh".into(),
            refresh_cooldown: DEFAULT_REFRESH_COOLDOWN,
            session_path: None,
        }
    }
}

impl ClientSettings {
    /// Settings for a backend rooted at `base_url`, with auth endpoints
    /// underneath it.
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        let base_url = normalize_base_url(&base_url.into());
        Self {
            auth_anon_url: format!("{base_url}/auth/anon"),
            auth_refresh_url: format!("{base_url}/auth/refresh"),
            base_url,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.app_id.trim().is_empty() {
            return Err(SettingsError::Missing { field: "app_id" });
        }
        for (field, value) in [
            ("base_url", &self.base_url),
            ("auth_anon_url", &self.auth_anon_url),
            ("auth_refresh_url", &self.auth_refresh_url),
        ] {
            if value.trim().is_empty() {
                return Err(SettingsError::Missing { field });
            }
            Url::parse(value).map_err(|_| SettingsError::InvalidUrl {
                field,
                value: value.clone(),
            })?;
        }
        Ok(())
    }
}

/// Defaults, then `client.toml` (or `path`), then the environment.
pub fn load_settings(path: Option<PathBuf>) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    let explicit = path.is_some();
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    match fs::read_to_string(&path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("failed to parse settings file '{}'", path.display()))?,
        Err(err) if explicit => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
        Err(_) => {}
    }

    apply_env(&mut settings, |name| std::env::var(name).ok());
    settings.base_url = normalize_base_url(&settings.base_url);
    settings.validate()?;
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, raw: &str) -> anyhow::Result<()> {
    let file_cfg = toml::from_str::<HashMap<String, String>>(raw)?;
    if let Some(v) = file_cfg.get("app_id") {
        settings.app_id = v.clone();
    }
    if let Some(v) = file_cfg.get("base_url") {
        settings.base_url = v.clone();
    }
    if let Some(v) = file_cfg.get("auth_anon_url") {
        settings.auth_anon_url = v.clone();
    }
    if let Some(v) = file_cfg.get("auth_refresh_url") {
        settings.auth_refresh_url = v.clone();
    }
    if let Some(v) = file_cfg.get("refresh_cooldown_secs") {
        let secs = v
            .parse::<u64>()
            .with_context(|| format!("refresh_cooldown_secs is not a number: {v}"))?;
        settings.refresh_cooldown = Duration::from_secs(secs);
    }
    if let Some(v) = file_cfg.get("session_path") {
        settings.session_path = Some(PathBuf::from(v));
    }
    Ok(())
}

fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    // APP__-prefixed names take precedence over the bare ones
    let var = |name: &str| lookup(&format!("APP__{name}")).or_else(|| lookup(name));

    if let Some(v) = var("APP_ID") {
        settings.app_id = v;
    }
    if let Some(v) = var("BASE_URL") {
        settings.base_url = v;
    }
    if let Some(v) = var("AUTH_ANON_URL") {
        settings.auth_anon_url = v;
    }
    if let Some(v) = var("AUTH_REFRESH_URL") {
        settings.auth_refresh_url = v;
    }
    if let Some(v) = var("REFRESH_COOLDOWN_SECS") {
        if let Ok(secs) = v.parse::<u64>() {
            settings.refresh_cooldown = Duration::from_secs(secs);
        }
    }
    if let Some(v) = var("SESSION_PATH") {
        settings.session_path = Some(PathBuf::from(v));
    }
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
