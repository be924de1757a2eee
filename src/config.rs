#![forbid(unsafe_code)]

use crate::error::CatalogError;
use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_SAMPLER_PORT: u16 = 8501;
pub const DEFAULT_SAMPLER_HOST: &str = "127.0.0.1";
pub const DEFAULT_YT_DLP: &str = "yt-dlp";

const SHEET_ID: &str = "SHEET_ID";
const SHEET_NAME: &str = "SHEET_NAME";
const SERVICE_ACCOUNT_FILE: &str = "SERVICE_ACCOUNT_FILE";
const YOUTUBE_API_KEY: &str = "YOUTUBE_API_KEY";

/// Everything both binaries read from `.env` and the process environment.
///
/// Catalog credentials stay optional here; the `require_*` accessors turn a
/// missing value into a [`CatalogError::Config`] at the point it is needed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub sheet_id: Option<String>,
    pub sheet_name: Option<String>,
    pub service_account_file: Option<PathBuf>,
    pub youtube_api_key: Option<String>,
    pub download_dir: PathBuf,
    pub sampler_host: String,
    pub sampler_port: u16,
    pub yt_dlp_path: PathBuf,
}

/// The three values needed to reach the catalog worksheet.
#[derive(Debug, Clone, Copy)]
pub struct SheetTarget<'a> {
    pub sheet_id: &'a str,
    pub sheet_name: &'a str,
    pub service_account_file: &'a Path,
}

impl Settings {
    pub fn require_sheet_id(&self) -> Result<&str, CatalogError> {
        required(self.sheet_id.as_deref(), SHEET_ID)
    }

    pub fn require_sheet_name(&self) -> Result<&str, CatalogError> {
        required(self.sheet_name.as_deref(), SHEET_NAME)
    }

    pub fn require_service_account_file(&self) -> Result<&Path, CatalogError> {
        self.service_account_file
            .as_deref()
            .ok_or_else(|| CatalogError::config(format!("{SERVICE_ACCOUNT_FILE} not set")))
    }

    pub fn require_youtube_api_key(&self) -> Result<&str, CatalogError> {
        required(self.youtube_api_key.as_deref(), YOUTUBE_API_KEY)
    }

    pub fn sheet_target(&self) -> Result<SheetTarget<'_>, CatalogError> {
        Ok(SheetTarget {
            sheet_id: self.require_sheet_id()?,
            sheet_name: self.require_sheet_name()?,
            service_account_file: self.require_service_account_file()?,
        })
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str, CatalogError> {
    value.ok_or_else(|| CatalogError::config(format!("{key} not set")))
}

/// CLI-level overrides. Anything set here beats both the environment and the
/// `.env` file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub env_path: Option<PathBuf>,
    pub download_dir: Option<PathBuf>,
    pub sampler_host: Option<String>,
    pub sampler_port: Option<u16>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_settings(&file_vars, env_var_string, overrides))
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Settings {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let download_dir = overrides
        .download_dir
        .or_else(|| lookup("DOWNLOAD_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));
    let sampler_host = overrides
        .sampler_host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("SAMPLER_HOST"))
        .unwrap_or_else(|| DEFAULT_SAMPLER_HOST.to_string());
    let sampler_port = overrides
        .sampler_port
        .or_else(|| lookup("SAMPLER_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_SAMPLER_PORT);
    let yt_dlp_path = lookup("YT_DLP_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YT_DLP));

    Settings {
        sheet_id: lookup(SHEET_ID),
        sheet_name: lookup(SHEET_NAME),
        service_account_file: lookup(SERVICE_ACCOUNT_FILE).map(PathBuf::from),
        youtube_api_key: lookup(YOUTUBE_API_KEY),
        download_dir,
        sampler_host,
        sampler_port,
        yt_dlp_path,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Parses a dotenv-style file. A missing file is not an error: every value
/// may come from the process environment instead.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value_raw.trim()).to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> Settings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None, SettingsOverrides::default())
    }

    #[test]
    fn reads_catalog_credentials() {
        let settings = settings_from(
            "SHEET_ID=\"abc\"\nSHEET_NAME=\"Videos\"\nSERVICE_ACCOUNT_FILE=\"/keys/sa.json\"\nYOUTUBE_API_KEY=\"key\"\n",
        );
        let target = settings.sheet_target().unwrap();
        assert_eq!(target.sheet_id, "abc");
        assert_eq!(target.sheet_name, "Videos");
        assert_eq!(target.service_account_file, Path::new("/keys/sa.json"));
        assert_eq!(settings.require_youtube_api_key().unwrap(), "key");
    }

    #[test]
    fn defaults_optional_values() {
        let settings = settings_from("");
        assert_eq!(settings.download_dir, PathBuf::from(DEFAULT_DOWNLOAD_DIR));
        assert_eq!(settings.sampler_host, DEFAULT_SAMPLER_HOST);
        assert_eq!(settings.sampler_port, DEFAULT_SAMPLER_PORT);
        assert_eq!(settings.yt_dlp_path, PathBuf::from(DEFAULT_YT_DLP));
    }

    #[test]
    fn missing_required_value_names_the_key() {
        let settings = settings_from("SHEET_ID=\"abc\"\n");
        let err = settings.sheet_target().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("SHEET_NAME not set"));
        let err = settings.require_youtube_api_key().unwrap_err();
        assert!(err.to_string().contains("YOUTUBE_API_KEY"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let settings = settings_from("SHEET_ID=\"   \"\n");
        assert!(settings.require_sheet_id().is_err());
    }

    #[test]
    fn environment_beats_file() {
        let vars = read_env_file(make_config("SHEET_NAME=\"file\"\n").path()).unwrap();
        let settings = build_settings(
            &vars,
            |key| (key == "SHEET_NAME").then(|| "env".to_string()),
            SettingsOverrides::default(),
        );
        assert_eq!(settings.require_sheet_name().unwrap(), "env");
    }

    #[test]
    fn overrides_beat_environment() {
        let vars = read_env_file(
            make_config("SAMPLER_PORT=\"7000\"\nDOWNLOAD_DIR=\"/file\"\n").path(),
        )
        .unwrap();
        let settings = build_settings(
            &vars,
            |key| (key == "SAMPLER_HOST").then(|| "0.0.0.0".to_string()),
            SettingsOverrides {
                sampler_port: Some(9000),
                download_dir: Some(PathBuf::from("/override")),
                sampler_host: Some("  ".into()),
                env_path: None,
            },
        );
        assert_eq!(settings.sampler_port, 9000);
        assert_eq!(settings.download_dir, PathBuf::from("/override"));
        assert_eq!(settings.sampler_host, "0.0.0.0");
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let settings = settings_from("SAMPLER_PORT=\"nope\"\n");
        assert_eq!(settings.sampler_port, DEFAULT_SAMPLER_PORT);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export SHEET_ID="sheet"
            SHEET_NAME='Catalog'
            YOUTUBE_API_KEY =  "k"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("SHEET_ID").unwrap(), "sheet");
        assert_eq!(vars.get("SHEET_NAME").unwrap(), "Catalog");
        assert_eq!(vars.get("YOUTUBE_API_KEY").unwrap(), "k");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
