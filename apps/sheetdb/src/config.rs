use std::{fs, io::ErrorKind, path::Path};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "sheetdb.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database_url: String,
    pub user_id: String,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/sheetdb.db".into(),
            user_id: "local".into(),
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    database_url: Option<String>,
    user_id: Option<String>,
    log_filter: Option<String>,
}

/// Defaults, then the TOML file at `path` (if present), then the environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

fn load_settings_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid config file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read '{}'", path.display()))
        }
    }

    apply_env(&mut settings, lookup);
    settings.database_url = normalize_database_url(&settings.database_url);
    Ok(settings)
}

fn apply_file(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.user_id {
        settings.user_id = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
}

/// `APP__*` variables win over the short names.
fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SHEETDB_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = lookup("SHEETDB_USER") {
        settings.user_id = v;
    }
    if let Some(v) = lookup("APP__USER_ID") {
        settings.user_id = v;
    }

    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/test.db"),
            "sqlite://./data/test.db"
        );
        assert_eq!(normalize_database_url("sqlite:data\\x.db"), "sqlite://data/x.db");
        assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(normalize_database_url("  "), Settings::default().database_url);
    }

    #[test]
    fn prefixed_env_wins_over_short_names() {
        let mut settings = Settings::default();
        apply_env(
            &mut settings,
            env(&[
                ("SHEETDB_DATABASE_URL", "sqlite://short.db"),
                ("APP__DATABASE_URL", "sqlite://prefixed.db"),
                ("SHEETDB_USER", "bob"),
            ]),
        );
        assert_eq!(settings.database_url, "sqlite://prefixed.db");
        assert_eq!(settings.user_id, "bob");
        assert_eq!(settings.log_filter, "info");
    }

    #[test]
    fn reads_the_config_file_when_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_PATH);
        fs::write(&path, "database_url = \"./sheets.db\"\nuser_id = \"carol\"\n").expect("write");

        let settings = load_settings_with(&path, env(&[])).expect("settings");
        assert_eq!(settings.database_url, "sqlite://./sheets.db");
        assert_eq!(settings.user_id, "carol");
        assert_eq!(settings.log_filter, "info");
    }

    #[test]
    fn environment_overrides_the_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(DEFAULT_CONFIG_PATH);
        fs::write(
            &path,
            "database_url = \"./sheets.db\"\nuser_id = \"carol\"\nlog_filter = \"debug\"\n",
        )
        .expect("write");

        let settings = load_settings_with(
            &path,
            env(&[("APP__USER_ID", "dave"), ("SHEETDB_DATABASE_URL", "other.db")]),
        )
        .expect("settings");
        assert_eq!(
            settings,
            Settings {
                database_url: "sqlite://other.db".into(),
                user_id: "dave".into(),
                log_filter: "debug".into(),
            }
        );
    }

    #[test]
    fn missing_file_means_defaults_and_bad_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings_with(&dir.path().join("absent.toml"), env(&[]))
            .expect("defaults");
        assert_eq!(settings, Settings::default());

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "colour = \"blue\"\n").expect("write");
        assert!(load_settings_with(&bad, env(&[])).is_err());
    }
}
