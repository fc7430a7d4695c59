use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clouddrive_core::{ClientConfig, TokenRefresher};

const APP_DIR_NAME: &str = "clouddrive";
const CACHE_FILE_NAME: &str = "nodes.cache";
const TOKEN_FILE_NAME: &str = "token.json";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub cache_file: PathBuf,
    pub token_file: PathBuf,
    pub endpoint_url: String,
    /// Token refresh service; the public one when unset.
    pub refresh_url: Option<String>,
    /// `None` disables the request timeout.
    pub request_timeout: Option<Duration>,
    pub log_level: String,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        Ok(Self::from_lookup(&home, |name| std::env::var(name).ok()))
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(home: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let cache_file = read("CLOUDDRIVE_CACHE_FILE")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_cache_root().join(CACHE_FILE_NAME));
        let token_file = read("CLOUDDRIVE_TOKEN_FILE")
            .map(|value| expand_with_home(&value, home))
            .unwrap_or_else(|| default_config_root(home).join(TOKEN_FILE_NAME));
        let endpoint_url =
            read("CLOUDDRIVE_ENDPOINT_URL").unwrap_or_else(|| ClientConfig::default().endpoint_url);
        let request_timeout = match read_u64(&read, "CLOUDDRIVE_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Self {
            cache_file,
            token_file,
            endpoint_url,
            refresh_url: read("CLOUDDRIVE_REFRESH_URL"),
            request_timeout,
            log_level: read("CLOUDDRIVE_LOG").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint_url: self.endpoint_url.clone(),
            timeout: self.request_timeout,
        }
    }

    pub fn token_refresher(&self) -> anyhow::Result<TokenRefresher> {
        match &self.refresh_url {
            Some(url) => TokenRefresher::new(url)
                .with_context(|| format!("invalid token refresh url {url:?}")),
            None => TokenRefresher::default_service().context("invalid default refresh url"),
        }
    }
}

fn read_u64<F>(read: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    read(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn default_config_root(home: &Path) -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home.join(".config"))
        .join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> SyncConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(Path::new("/home/user"), |name| vars.get(name).cloned())
    }

    #[test]
    fn expand_with_home_handles_tilde() {
        let home = Path::new("/home/user");
        assert_eq!(expand_with_home("~", home), PathBuf::from("/home/user"));
        assert_eq!(
            expand_with_home("~/cache/nodes.cache", home),
            PathBuf::from("/home/user/cache/nodes.cache")
        );
        assert_eq!(
            expand_with_home("/var/tmp/a", home),
            PathBuf::from("/var/tmp/a")
        );
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = config_from(&[]);

        assert!(config.cache_file.ends_with("clouddrive/nodes.cache"));
        assert!(config.token_file.ends_with("clouddrive/token.json"));
        assert_eq!(config.endpoint_url, ClientConfig::default().endpoint_url);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.log_level, "info");
        assert!(config.refresh_url.is_none());
        assert!(config.token_refresher().is_ok());
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("CLOUDDRIVE_CACHE_FILE", "~/drive/tree.cache"),
            ("CLOUDDRIVE_TOKEN_FILE", "/etc/clouddrive/token.json"),
            ("CLOUDDRIVE_ENDPOINT_URL", "http://localhost:8080/endpoint"),
            ("CLOUDDRIVE_TIMEOUT_SECS", "0"),
            ("CLOUDDRIVE_LOG", "clouddrive_sync=debug"),
            ("CLOUDDRIVE_REFRESH_URL", "http://localhost:8080/refresh"),
        ]);

        assert_eq!(
            config.cache_file,
            PathBuf::from("/home/user/drive/tree.cache")
        );
        assert_eq!(
            config.token_file,
            PathBuf::from("/etc/clouddrive/token.json")
        );
        assert_eq!(config.endpoint_url, "http://localhost:8080/endpoint");
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.log_level, "clouddrive_sync=debug");
        assert_eq!(config.refresh_url.as_deref(), Some("http://localhost:8080/refresh"));
        assert!(config.token_refresher().is_ok());
        assert_eq!(config.client_config().timeout, None);
    }

    #[test]
    fn malformed_refresh_url_is_reported() {
        let config = config_from(&[("CLOUDDRIVE_REFRESH_URL", "not a url")]);
        assert!(config.token_refresher().is_err());
    }

    #[test]
    fn unparsable_timeout_falls_back_to_default() {
        let config = config_from(&[("CLOUDDRIVE_TIMEOUT_SECS", "soon")]);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = config_from(&[("CLOUDDRIVE_LOG", "  "), ("CLOUDDRIVE_REFRESH_URL", "")]);
        assert_eq!(config.log_level, "info");
        assert!(config.refresh_url.is_none());
    }
}
