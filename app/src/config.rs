use std::path::PathBuf;
use serde::{Serialize, Deserialize};

pub const DEFAULT_API_BASE_URL: &str = "https://api.flickr.com";

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".photogallery")
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AppConfig {
    pub log_level: String,
    pub flickr_api_key: String,
    pub api_base_url: String,
    pub poll_interval_minutes: u64,
    pub require_network: bool,
    pub debug_console: bool,
    pub trace_spans: bool,
    pub data_path: PathBuf,
}

#[derive(Default)]
pub struct AppConfigOverrides {
    pub log_level: Option<String>,
    pub flickr_api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub poll_interval_minutes: Option<u64>,
    pub data_path: Option<PathBuf>,
    pub debug_console: bool,
    pub trace_spans: bool,
}

impl AppConfig {
    pub fn load_from(path: Option<PathBuf>) -> Self {
        let path = path.unwrap_or_else(default_config_path);
        let cfg = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .build()
            .unwrap_or_default();

        let log_level = cfg
            .get_string("log_level")
            .unwrap_or_else(|_| "info".to_string());
        // The environment wins over the file so keys stay out of dotfiles.
        let flickr_api_key = std::env::var("FLICKR_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| cfg.get_string("flickr_api_key").ok())
            .unwrap_or_default();
        let api_base_url = cfg
            .get_string("api_base_url")
            .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        let poll_interval_minutes = cfg.get_int("poll_interval_minutes").unwrap_or(15).max(1) as u64;
        let require_network = cfg.get_bool("require_network").unwrap_or(true);
        let debug_console = cfg.get_bool("debug_console").unwrap_or(false);
        let trace_spans = cfg.get_bool("trace_spans").unwrap_or(false);
        let data_path = cfg
            .get_string("data_path")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        Self {
            log_level,
            flickr_api_key,
            api_base_url,
            poll_interval_minutes,
            require_network,
            debug_console,
            trace_spans,
            data_path,
        }
    }

    pub fn apply_overrides(mut self, ov: &AppConfigOverrides) -> Self {
        if let Some(l) = &ov.log_level {
            self.log_level = l.clone();
        }
        if let Some(k) = &ov.flickr_api_key {
            self.flickr_api_key = k.clone();
        }
        if let Some(u) = &ov.api_base_url {
            self.api_base_url = u.clone();
        }
        if let Some(m) = ov.poll_interval_minutes {
            self.poll_interval_minutes = m.max(1);
        }
        if let Some(p) = &ov.data_path {
            self.data_path = p.clone();
        }
        if ov.debug_console {
            self.debug_console = true;
        }
        if ov.trace_spans {
            self.trace_spans = true;
        }
        self
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.data_path.join("prefs.sqlite")
    }

    pub fn save_to(&self, path: Option<PathBuf>) -> std::io::Result<()> {
        let path = path.unwrap_or_else(default_config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, data)
    }
}
