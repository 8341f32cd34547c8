use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::record::DEFAULT_COUNTRY;
use crate::search::{PageResetPolicy, DEFAULT_PAGE_SIZE};
use crate::storage::records::DEFAULT_RECORDS_KEY;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "UserRegistry";
const APP_NAME: &str = "user-registry";

pub const CONFIG_ENV: &str = "USER_REGISTRY_CONFIG";
pub const DATA_ENV: &str = "USER_REGISTRY_DATA";

const DATABASE_FILE: &str = "registry.db";
const DEFAULT_COUNTRIES_URL: &str = "https://restcountries.com/v3.1/all?fields=name";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn with_paths(paths: ConfigPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths);
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths);
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        tracing::info!(path = %self.paths.config_file.display(), "wrote default config");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let override_data = env::var(DATA_ENV).ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        Ok(Self::from_roots(config_dir, config_file, data_root, project_dirs.state_dir()))
    }

    /// Lays out every path under one directory. Used for portable installs
    /// and tests.
    pub fn rooted(root: &Path) -> Self {
        let config_dir = root.join("config");
        let config_file = config_dir.join("config.toml");
        Self::from_roots(config_dir, config_file, root.join("data"), None)
    }

    fn from_roots(
        config_dir: PathBuf,
        config_file: PathBuf,
        data_root: PathBuf,
        state_dir: Option<&Path>,
    ) -> Self {
        let database_path = data_root.join(DATABASE_FILE);
        let state_dir = state_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));
        let log_dir = state_dir.join("logs");
        Self {
            config_dir,
            config_file,
            data_dir: data_root,
            database_path,
            log_dir,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.log_dir, &self.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub table: TableOptions,
    pub form: FormOptions,
    pub edit: EditOptions,
    pub countries: CountrySourceOptions,
    pub storage: StorageOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) {
        self.storage.resolve(paths);
        if self.table.page_size == 0 {
            tracing::warn!(default = DEFAULT_PAGE_SIZE, "table.page_size must be positive, using default");
            self.table.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.form.default_country.trim().is_empty() {
            tracing::warn!(default = DEFAULT_COUNTRY, "form.default_country is empty, using default");
            self.form.default_country = DEFAULT_COUNTRY.to_string();
        }
        if self.storage.records_key.trim().is_empty() {
            tracing::warn!(default = DEFAULT_RECORDS_KEY, "storage.records_key is empty, using default");
            self.storage.records_key = DEFAULT_RECORDS_KEY.to_string();
        }
        if self.countries.enabled && self.countries.url.trim().is_empty() {
            tracing::warn!("countries.url is empty, disabling country lookup");
            self.countries.enabled = false;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableOptions {
    pub page_size: usize,
    pub page_reset: PageResetPolicy,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_reset: PageResetPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub default_country: String,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            default_country: DEFAULT_COUNTRY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditOptions {
    /// Delay between a successful save and the write reaching the store.
    pub save_delay_ms: u64,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self { save_delay_ms: 500 }
    }
}

impl EditOptions {
    pub fn save_delay(&self) -> Duration {
        Duration::from_millis(self.save_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountrySourceOptions {
    pub enabled: bool,
    pub url: String,
    pub timeout_ms: u64,
}

impl Default for CountrySourceOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_COUNTRIES_URL.to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub records_key: String,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            records_key: DEFAULT_RECORDS_KEY.to_string(),
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
    }
}
