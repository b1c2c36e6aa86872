// src/config.rs
use crate::data::{self, Context};
use crate::error::DataError;
use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_ADDR: &str = "localhost:9654";
const DEFAULT_PATH: &str = "template.html";
const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Command-line arguments for the application.
#[derive(Parser, Debug, Deserialize, Default)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Listen address (e.g., "localhost:9654"); the PORT variable wins over it
    #[clap(short, long, value_parser)]
    pub addr: Option<String>,

    /// Template file to render; every file in its directory may be included
    #[clap(short, long, value_parser)]
    pub path: Option<PathBuf>,

    /// Initial data as a JSON object, or @file to read it from a file
    #[clap(short, long, value_parser)]
    pub data: Option<String>,

    /// Path to a configuration file (e.g., tplive.toml)
    #[clap(short, long, value_parser)]
    pub config: Option<PathBuf>,

    /// Leave the data editor out of the previewed page
    #[clap(long)]
    pub no_editor: bool,

    /// Milliseconds to wait for a burst of file changes to settle
    #[clap(long, value_parser)]
    pub debounce_ms: Option<u64>,

    /// Log level (e.g., trace, debug, info, warn, error)
    #[clap(long, value_parser)]
    pub log_level: Option<String>,
}

/// Configuration loaded from file, environment, or defaults.
#[derive(Deserialize, Serialize, Debug, Default)]
pub struct FileConfig {
    pub addr: Option<String>,
    pub path: Option<PathBuf>,
    pub data: Option<String>,
    pub editor: Option<bool>,
    pub debounce_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl FileConfig {
    fn defaults() -> Self {
        FileConfig {
            addr: Some(DEFAULT_ADDR.to_string()),
            path: Some(PathBuf::from(DEFAULT_PATH)),
            data: Some(String::new()),
            editor: Some(true),
            debounce_ms: Some(DEFAULT_DEBOUNCE_MS),
            log_level: Some("info".to_string()),
        }
    }
}

/// Final application configuration after merging all sources.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address the HTTP server binds to
    pub addr: String,
    /// Entry template
    pub template_path: PathBuf,
    /// Initial data: JSON literal, `@file`, or empty for `{}`
    pub data: String,
    /// Whether patched pages carry the data editor
    pub editor: bool,
    /// Debounce window for file change bursts
    pub debounce: Duration,
    /// Log level
    pub log_level: String,
}

impl AppConfig {
    /// Loads the application configuration by merging CLI, file, environment, and defaults.
    pub fn load() -> Result<Self, figment::Error> {
        let cli_args = CliArgs::parse();
        let port = std::env::var("PORT").ok();
        Self::from_sources(cli_args, port)
    }

    /// Merges `cli_args` over `tplive.toml` (or `--config`), `TPLIVE_*`
    /// variables and defaults. `port`, the value of `PORT`, overrides
    /// every other source for the listen address.
    pub fn from_sources(cli_args: CliArgs, port: Option<String>) -> Result<Self, figment::Error> {
        let config_file_path = cli_args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("tplive.toml"));

        let fig = Figment::new()
            .merge(Serialized::defaults(FileConfig::defaults()))
            .merge(Toml::file(config_file_path).nested())
            .merge(Env::prefixed("TPLIVE_").map(|key| key.as_str().replace("__", ".").into()));

        let mut merged_config: FileConfig = fig.select("tplive").extract()?;

        // CLI values win over file and environment.
        if let Some(addr) = cli_args.addr {
            merged_config.addr = Some(addr);
        }
        if let Some(path) = cli_args.path {
            merged_config.path = Some(path);
        }
        if let Some(data) = cli_args.data {
            merged_config.data = Some(data);
        }
        if let Some(ms) = cli_args.debounce_ms {
            merged_config.debounce_ms = Some(ms);
        }
        if let Some(level) = cli_args.log_level {
            merged_config.log_level = Some(level);
        }
        if let Some(port) = port.filter(|p| !p.is_empty()) {
            merged_config.addr = Some(addr_from_port(port));
        }

        Ok(AppConfig {
            addr: merged_config
                .addr
                .unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            template_path: merged_config
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PATH)),
            data: merged_config.data.unwrap_or_default(),
            editor: !cli_args.no_editor && merged_config.editor.unwrap_or(true),
            debounce: Duration::from_millis(
                merged_config.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS),
            ),
            log_level: merged_config
                .log_level
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Resolves the configured initial data into a render context.
    ///
    /// A value starting with `@` names a file holding the JSON. An empty
    /// value yields an empty object.
    pub fn load_initial_data(&self) -> Result<Context, DataError> {
        let raw = match self.data.strip_prefix('@') {
            Some(file) => {
                let path = PathBuf::from(file);
                std::fs::read_to_string(&path)
                    .map_err(|source| DataError::ReadFile { path, source })?
            }
            None => self.data.clone(),
        };

        if raw.trim().is_empty() {
            return Ok(Context::new());
        }
        data::parse_context(raw.as_bytes())
    }
}

/// A bare port number binds on all interfaces; anything else is used as is.
fn addr_from_port(port: String) -> String {
    if port.bytes().all(|b| b.is_ascii_digit()) {
        format!("0.0.0.0:{}", port)
    } else {
        port
    }
}
