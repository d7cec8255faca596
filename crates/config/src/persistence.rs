//! Reading and writing the config file
//!
//! A missing file means defaults. Saving validates first, keeps the previous
//! file as `<name>.toml.backup` and replaces the file through a temporary
//! file in the same directory, so readers never see a half-written config.

use crate::{Config, ConfigError, ConfigResult, CONFIG_VERSION};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// The config file at one path
#[derive(Debug, Clone)]
pub struct ConfigPersistence {
    path: PathBuf,
}

impl ConfigPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where [`ConfigPersistence::save`] keeps the previous file
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("toml.backup")
    }

    /// Reads the file as written
    ///
    /// Out-of-range values are logged, not rejected, so that a hand-edited
    /// file can still be loaded and fixed. Use
    /// [`ConfigPersistence::load_effective`] to get a config ready for use.
    pub fn load(&self) -> ConfigResult<Config> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(path = self.path.display().to_string().as_str(); "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if contents.trim().is_empty() {
            return Err(ConfigError::Empty {
                path: self.path.clone(),
            });
        }

        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if config.version != CONFIG_VERSION {
            log::warn!(found = config.version, expected = CONFIG_VERSION; "unexpected config version");
        }
        if let Err(errors) = config.validate() {
            for error in &errors {
                log::warn!(field = error.field.as_str(); "{}", error);
            }
        }

        Ok(config)
    }

    /// The file, then environment overrides, then validation
    pub fn load_effective(&self) -> ConfigResult<Config> {
        self.load_effective_from(|name| std::env::var(name).ok())
    }

    /// [`ConfigPersistence::load_effective`] with an arbitrary variable lookup
    pub fn load_effective_from<F>(&self, lookup: F) -> ConfigResult<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = self.load()?;
        config.apply_env_from(lookup)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validates and atomically replaces the file
    pub fn save(&self, config: &Config) -> ConfigResult<()> {
        config.validate().map_err(ConfigError::Invalid)?;
        let contents = toml::to_string_pretty(config)?;

        self.replace(&contents).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;

        log::info!(path = self.path.display().to_string().as_str(); "config saved");
        Ok(())
    }

    fn replace(&self, contents: &str) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        if self.path.exists() {
            fs::copy(&self.path, self.backup_path())?;
        }

        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
