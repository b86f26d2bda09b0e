use std::net::SocketAddr;
use std::time::Duration;

use crate::session::TRANSITION_DELAY;

pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v18.0";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    /// JSON snapshot file; `None` keeps everything in memory only.
    pub local_state_path: Option<String>,
    pub transition_delay: Duration,
    pub facebook_graph_url: String,
    pub cors_origins: Vec<String>,
    /// Hosted sessions older than this are evicted by the sweeper.
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database_url: None,
            local_state_path: None,
            transition_delay: TRANSITION_DELAY,
            facebook_graph_url: DEFAULT_GRAPH_URL.to_string(),
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            session_ttl: Duration::from_secs(2 * 60 * 60),
            session_sweep_interval: Duration::from_secs(60),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn secs(key: &str) -> Option<Duration> {
    non_empty(key)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let local_state_path = non_empty("LOCAL_STATE_PATH")
            .or_else(|| Some(format!("{}/local_state.json", env!("CARGO_MANIFEST_DIR"))));
        let transition_delay = non_empty("TRANSITION_DELAY_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.transition_delay);
        let cors_origins = non_empty("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        Self {
            host: non_empty("BACKEND_HOST").unwrap_or(defaults.host),
            port: non_empty("BACKEND_PORT")
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(defaults.port),
            database_url: non_empty("DATABASE_URL"),
            local_state_path,
            transition_delay,
            facebook_graph_url: non_empty("FACEBOOK_GRAPH_URL").unwrap_or(defaults.facebook_graph_url),
            cors_origins,
            session_ttl: secs("SESSION_TTL_SECS").unwrap_or(defaults.session_ttl),
            session_sweep_interval: secs("SESSION_SWEEP_SECS")
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.session_sweep_interval),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.transition_delay, Duration::from_millis(300));
        assert!(cfg.local_state_path.is_none());
        assert_eq!(cfg.bind_addr().unwrap().port(), 8080);
        assert_eq!(cfg.session_ttl, Duration::from_secs(7200));
    }

    #[test]
    fn bad_host_is_an_error() {
        let cfg = AppConfig {
            host: "not a host".into(),
            ..AppConfig::default()
        };
        assert!(cfg.bind_addr().is_err());
    }
}
