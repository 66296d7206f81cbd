// Configuration
//
// Defaults plus environment overrides. Hosts that keep settings in a file
// can deserialize `Config` themselves; reading files is not done here.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Per-call id/title limit of the remote query APIs.
pub const DEFAULT_MAX_IDS_PER_CALL: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Encyclopedia API endpoint (api.php)
    pub wikipedia_endpoint: String,

    /// Knowledge-graph API endpoint (api.php)
    pub wikidata_endpoint: String,

    /// Label language; the encyclopedia site is `{language}wiki`
    pub language: String,

    pub user_agent: String,

    pub timeout_secs: u64,

    pub max_ids_per_call: usize,

    /// Label cache directory; `None` disables the on-disk cache
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wikipedia_endpoint: "https://en.wikipedia.org/w/api.php".to_string(),
            wikidata_endpoint: "https://www.wikidata.org/w/api.php".to_string(),
            language: "en".to_string(),
            user_agent: format!("reality/{}", crate::VERSION),
            timeout_secs: 30,
            max_ids_per_call: DEFAULT_MAX_IDS_PER_CALL,
            cache_dir: dirs::cache_dir().map(|dir| dir.join("reality")),
        }
    }
}

impl Config {
    /// Defaults overridden by `REALITY_CACHE_DIR`, `REALITY_LANGUAGE`,
    /// `REALITY_USER_AGENT`. An empty `REALITY_CACHE_DIR` disables caching.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(dir) = env::var("REALITY_CACHE_DIR") {
            config.cache_dir = if dir.is_empty() { None } else { Some(PathBuf::from(dir)) };
        }
        if let Ok(language) = env::var("REALITY_LANGUAGE") {
            if !language.is_empty() {
                config = config.with_language(language);
            }
        }
        if let Ok(agent) = env::var("REALITY_USER_AGENT") {
            if !agent.is_empty() {
                config.user_agent = agent;
            }
        }

        config
    }

    /// Builder: language, also switching the encyclopedia endpoint
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self.wikipedia_endpoint = format!("https://{}.wikipedia.org/w/api.php", self.language);
        self
    }

    /// Builder: cache directory (`None` disables caching)
    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.cache_dir = dir;
        self
    }

    /// Builder: user agent sent with every request
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Builder: per-call id limit
    pub fn with_max_ids_per_call(mut self, max: usize) -> Self {
        self.max_ids_per_call = max.max(1);
        self
    }

    /// Site id of the encyclopedia, e.g. `enwiki`.
    pub fn site(&self) -> String {
        format!("{}wiki", self.language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_ids_per_call, 50);
        assert_eq!(config.site(), "enwiki");
        assert!(config.user_agent.starts_with("reality/"));
    }

    #[test]
    fn test_with_language_switches_endpoint() {
        let config = Config::default().with_language("uk");
        assert_eq!(config.site(), "ukwiki");
        assert_eq!(config.wikipedia_endpoint, "https://uk.wikipedia.org/w/api.php");
        assert_eq!(config.wikidata_endpoint, "https://www.wikidata.org/w/api.php");
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: Config = serde_json::from_str(r#"{"language": "de", "cache_dir": null}"#).unwrap();
        assert_eq!(config.language, "de");
        assert_eq!(config.cache_dir, None);
        assert_eq!(config.max_ids_per_call, DEFAULT_MAX_IDS_PER_CALL);
    }

    // The only test touching REALITY_* variables; the process environment is
    // shared across test threads.
    #[test]
    fn test_from_env_overrides() {
        let vars = ["REALITY_CACHE_DIR", "REALITY_LANGUAGE", "REALITY_USER_AGENT"];
        for var in vars {
            env::remove_var(var);
        }
        assert_eq!(Config::from_env(), Config::default());

        env::set_var("REALITY_CACHE_DIR", "/tmp/reality-labels");
        env::set_var("REALITY_LANGUAGE", "uk");
        env::set_var("REALITY_USER_AGENT", "atlas-bot/1.0 (ops@example.org)");
        let config = Config::from_env();
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/reality-labels")));
        assert_eq!(config.language, "uk");
        assert_eq!(config.site(), "ukwiki");
        assert_eq!(config.wikipedia_endpoint, "https://uk.wikipedia.org/w/api.php");
        assert_eq!(config.user_agent, "atlas-bot/1.0 (ops@example.org)");

        // Empty cache dir disables caching; empty language and agent are ignored
        env::set_var("REALITY_CACHE_DIR", "");
        env::set_var("REALITY_LANGUAGE", "");
        env::set_var("REALITY_USER_AGENT", "");
        let config = Config::from_env();
        assert_eq!(config.cache_dir, None);
        assert_eq!(config.language, "en");
        assert!(config.user_agent.starts_with("reality/"));

        for var in vars {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_max_ids_never_zero() {
        assert_eq!(Config::default().with_max_ids_per_call(0).max_ids_per_call, 1);
    }
}
