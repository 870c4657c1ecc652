//! Load a settings object from the config locations.

use std::{env, error::Error, fmt::Debug, path::PathBuf};

use config::{Config, Environment, File};
use eyre::{bail, Context, Result};
use serde::de::DeserializeOwned;
use tracing::debug;

const ENV_PREFIX: &str = "BRIDGE";
const DEFAULT_CONFIG_DIR: &str = "./config";

/// Deserialize a settings object from the configs.
pub fn load_settings_object<T>(agent_name: &str) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    load_settings_from(agent_name, PathBuf::from(DEFAULT_CONFIG_DIR), config_files()?)
}

/// Paths listed in `CONFIG_FILES`
fn config_files() -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = env::var("CONFIG_FILES")
        .map(|s| {
            s.split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| PathBuf::from(s.trim()))
                .collect()
        })
        .unwrap_or_default();

    for p in &paths {
        if !p.exists() {
            bail!("Provided config path via CONFIG_FILES does not exist ({p:?})");
        }
        if !p.is_file() {
            bail!("Provided config path via CONFIG_FILES is not a file ({p:?})");
        }
        if p.extension() != Some("json".as_ref()) {
            bail!("Provided config path via CONFIG_FILES is of an unsupported type ({p:?})");
        }
    }
    Ok(paths)
}

/// Every json file directly under `dir`, sorted by name. A missing directory
/// contributes nothing.
fn default_config_files(dir: &PathBuf) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(vec![]);
    }
    let mut files = vec![];
    for entry in dir.read_dir().context("Failed to open config directory")? {
        let entry_path = entry?.path();
        if entry_path.is_file() && entry_path.extension() == Some("json".as_ref()) {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn load_settings_from<T>(
    agent_name: &str,
    config_dir: PathBuf,
    extra_files: Vec<PathBuf>,
) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    let base_config_sources = default_config_files(&config_dir)?;

    let mut builder = Config::builder();
    for path in base_config_sources.iter().chain(extra_files.iter()) {
        builder = builder.add_source(File::from(path.clone()));
    }

    let config_deserializer = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to load config sources")?;

    let formatted_config = format!("{config_deserializer:#?}");

    let settings = Config::try_deserialize::<T>(config_deserializer).or_else(|err| {
        let mut err = if let Some(source_err) = err.source() {
            let source = format!("Config error source: {source_err}");
            Err(err).context(source)
        } else {
            Err(err.into())
        };

        for cfg_path in base_config_sources.iter().chain(extra_files.iter()) {
            err = err.with_context(|| format!("Config loaded: {cfg_path:?}"));
        }
        eprintln!("Loaded config for debugging: {formatted_config}");
        err.context(format!("Config deserialization error for {agent_name}"))
    })?;

    debug!(agent = agent_name, ?settings, "Loaded settings");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Nested {
        poll_interval: u64,
        url: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    struct TestSettings {
        name: String,
        nested: Nested,
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("config");
        fs::create_dir(&config_dir).unwrap();
        fs::write(
            config_dir.join("base.json"),
            r#"{"name": "base", "nested": {"poll_interval": 5}}"#,
        )
        .unwrap();
        fs::write(config_dir.join("ignored.toml"), "name = 'toml'").unwrap();
        let extra = dir.path().join("extra.json");
        fs::write(&extra, r#"{"nested": {"url": "http://localhost:8000"}}"#).unwrap();

        let settings: TestSettings =
            load_settings_from("test", config_dir, vec![extra]).unwrap();
        assert_eq!(settings.name, "base");
        assert_eq!(settings.nested.poll_interval, 5);
        assert_eq!(settings.nested.url.as_deref(), Some("http://localhost:8000"));
    }

    #[test]
    fn missing_config_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("only.json");
        fs::write(&extra, r#"{"name": "only", "nested": {"poll_interval": 1}}"#).unwrap();

        let settings: TestSettings =
            load_settings_from("test", dir.path().join("absent"), vec![extra]).unwrap();
        assert_eq!(settings.name, "only");
    }

    #[test]
    fn missing_required_key_names_the_agent() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_settings_from::<TestSettings>("bridge", dir.path().to_path_buf(), vec![])
            .unwrap_err();
        assert!(format!("{err:?}").contains("bridge"));
    }
}
