use std::env;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9200;

/// Connection parameters of the search service.
///
/// Owned by the host application and handed to the backend at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    host: String,
    port: u16,
    scheme: String,
    timeout: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            scheme: "http".to_string(),
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl BackendConfig {
    pub fn new() -> Self {
        BackendConfig::default()
    }

    /// Reads `ELASTIC_HOST` and `ELASTIC_PORT`, keeping defaults for anything unset or invalid.
    pub fn from_env() -> Self {
        BackendConfig::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = BackendConfig::default();

        if let Some(host) = var("ELASTIC_HOST") {
            if !host.trim().is_empty() {
                config.host = host.trim().to_string();
            }
        }

        if let Some(port) = var("ELASTIC_PORT") {
            match port.trim().parse() {
                Ok(port) => config.port = port,
                Err(_) => log::warn!("Ignoring invalid ELASTIC_PORT `{}`", port),
            }
        }

        config
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Base URL of the service, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(BackendConfig::new().base_url(), "http://127.0.0.1:9200");

        let config = BackendConfig::new()
            .host("search.internal")
            .port(9243)
            .scheme("https");
        assert_eq!(config.base_url(), "https://search.internal:9243");
    }

    fn vars<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_env_overrides_defaults() {
        let config = BackendConfig::from_vars(vars(&[
            ("ELASTIC_HOST", " search.internal "),
            ("ELASTIC_PORT", "9243"),
        ]));
        assert_eq!(config.base_url(), "http://search.internal:9243");

        assert_eq!(BackendConfig::from_vars(vars(&[])), BackendConfig::default());
    }

    #[test]
    fn test_invalid_env_values_fall_back() {
        let config = BackendConfig::from_vars(vars(&[
            ("ELASTIC_HOST", "  "),
            ("ELASTIC_PORT", "ninety-two hundred"),
        ]));
        assert_eq!(config.base_url(), "http://127.0.0.1:9200");

        let config = BackendConfig::from_vars(vars(&[("ELASTIC_PORT", "70000")]));
        assert_eq!(config.base_url(), "http://127.0.0.1:9200");
    }
}
