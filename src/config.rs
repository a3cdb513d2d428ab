//! Platform credential discovery.
//!
//! Credentials come from a key=value properties file: the path named by the
//! `WSK_CONFIG_FILE` environment variable, or `~/.wskprops`. A missing or
//! unreadable file is not an error; explicit values set through the builder
//! methods override whatever the file provided.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Environment variable naming the properties file.
pub const CONFIG_FILE_ENV: &str = "WSK_CONFIG_FILE";

/// Default properties file name, resolved against the home directory.
pub const DEFAULT_CONFIG_FILE: &str = ".wskprops";

/// Platform credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// API endpoint (`APIHOST`).
    pub api_host: Option<String>,
    /// Authorization key (`AUTH`).
    pub auth: Option<String>,
}

impl Credentials {
    /// Discover credentials from the environment: `WSK_CONFIG_FILE` if set,
    /// otherwise `~/.wskprops`.
    pub fn discover() -> Self {
        let path = std::env::var_os(CONFIG_FILE_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|home| Path::new(&home).join(DEFAULT_CONFIG_FILE))
            });
        match path {
            Some(path) => Self::from_file(&path),
            None => Self::default(),
        }
    }

    /// Read credentials from a specific properties file. Missing files yield
    /// empty credentials.
    pub fn from_file(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "no credentials file");
                Self::default()
            }
        }
    }

    fn parse(contents: &str) -> Self {
        let mut credentials = Self::default();
        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "APIHOST" => credentials.api_host = Some(value.to_string()),
                "AUTH" => credentials.auth = Some(value.to_string()),
                _ => {}
            }
        }
        credentials
    }

    /// Override the API endpoint.
    pub fn api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = Some(api_host.into());
        self
    }

    /// Override the authorization key.
    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }
}
