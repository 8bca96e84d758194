use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

use crate::{ControllerConfig, ReentryPolicy, DEFAULT_BUSY_CLASS};

pub const DEFAULT_SETTINGS_FILE: &str = "form_submit.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: Option<String>,
    pub busy_class: String,
    pub reentry: ReentryPolicy,
    pub emit_error_event: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: None,
            busy_class: DEFAULT_BUSY_CLASS.into(),
            reentry: ReentryPolicy::Allow,
            emit_error_event: false,
            timeout_ms: None,
        }
    }
}

impl Settings {
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let base_url = self
            .base_url
            .as_deref()
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid base_url {raw:?}")))
            .transpose()?;
        Ok(ControllerConfig {
            base_url,
            busy_class: self.busy_class.clone(),
            reentry: self.reentry,
            emit_error_event: self.emit_error_event,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Defaults, then `form_submit.toml` in the working directory when present,
/// then `FORM_SUBMIT__*` environment variables.
pub fn load_settings() -> Result<Settings> {
    load_settings_from(None)
}

/// Like [`load_settings`], but an explicit `path` must exist.
pub fn load_settings_from(path: Option<&Path>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => read_settings_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_SETTINGS_FILE);
            if default_path.exists() {
                read_settings_file(default_path)?
            } else {
                Settings::default()
            }
        }
    };
    apply_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<Settings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("invalid settings file {}", path.display()))
}

pub fn apply_overrides(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = lookup("FORM_SUBMIT__BASE_URL") {
        settings.base_url = Some(v);
    }
    if let Some(v) = lookup("FORM_SUBMIT__BUSY_CLASS") {
        settings.busy_class = v;
    }
    if let Some(v) = lookup("FORM_SUBMIT__REENTRY") {
        settings.reentry = v
            .parse()
            .map_err(anyhow::Error::msg)
            .context("FORM_SUBMIT__REENTRY")?;
    }
    if let Some(v) = lookup("FORM_SUBMIT__EMIT_ERROR_EVENT") {
        settings.emit_error_event = v
            .trim()
            .parse()
            .with_context(|| format!("FORM_SUBMIT__EMIT_ERROR_EVENT must be true or false, got {v:?}"))?;
    }
    if let Some(v) = lookup("FORM_SUBMIT__TIMEOUT_MS") {
        settings.timeout_ms = Some(
            v.trim()
                .parse()
                .with_context(|| format!("FORM_SUBMIT__TIMEOUT_MS must be a number, got {v:?}"))?,
        );
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
