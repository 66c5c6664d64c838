use std::time::Duration;

/// Process-level configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: String,
    pub bind: String,
    pub trakt_client_id: Option<String>,
    pub trakt_client_secret: Option<String>,
    pub tmdb_key: Option<String>,
    pub fanart_key: Option<String>,
    /// Worker pool size; derived from the core count when unset.
    pub concurrency: Option<usize>,
    /// How long a dialog request waits for the host shell to answer.
    pub reply_timeout: Duration,
    pub trakt_base: String,
    pub imdb_base: String,
    pub tmdb_base: String,
    pub fanart_base: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "cinemeld.db".into(),
            bind: "127.0.0.1:8097".into(),
            trakt_client_id: None,
            trakt_client_secret: None,
            tmdb_key: None,
            fanart_key: None,
            concurrency: None,
            reply_timeout: Duration::from_secs(120),
            trakt_base: "https://api.trakt.tv".into(),
            imdb_base: "https://www.imdb.com".into(),
            tmdb_base: "https://api.themoviedb.org/3".into(),
            fanart_base: "https://webservice.fanart.tv/v3".into(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            db_path: get("CINEMELD_DB").unwrap_or(defaults.db_path),
            bind: get("CINEMELD_BIND").unwrap_or(defaults.bind),
            trakt_client_id: get("CINEMELD_TRAKT_CLIENT_ID"),
            trakt_client_secret: get("CINEMELD_TRAKT_CLIENT_SECRET"),
            tmdb_key: get("CINEMELD_TMDB_KEY"),
            fanart_key: get("CINEMELD_FANART_KEY"),
            concurrency: get("CINEMELD_CONCURRENCY").and_then(|v| v.parse().ok()),
            reply_timeout: get("CINEMELD_REPLY_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.reply_timeout),
            ..defaults
        }
    }

    /// Trakt needs both halves of the application credentials.
    pub fn trakt_credentials(&self) -> Option<(&str, &str)> {
        match (&self.trakt_client_id, &self.trakt_client_secret) {
            (Some(id), Some(secret)) => Some((id, secret)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CINEMELD_DB", "/var/lib/cinemeld/state.db"),
            ("CINEMELD_TMDB_KEY", "  "),
            ("CINEMELD_CONCURRENCY", "8"),
            ("CINEMELD_TRAKT_CLIENT_ID", "abc"),
        ]);
        let config = ServerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.db_path, "/var/lib/cinemeld/state.db");
        assert_eq!(config.bind, "127.0.0.1:8097");
        assert_eq!(config.tmdb_key, None);
        assert_eq!(config.concurrency, Some(8));
        assert!(config.trakt_credentials().is_none());
    }
}
