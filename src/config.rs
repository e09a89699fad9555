use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub solana_rpc_url: String,

    /// Share-holder endpoints, in index order (index = position + 1).
    pub share_endpoints: Vec<String>,
    /// Minimum number of shares required for reconstruction (K of N).
    pub share_threshold: usize,
    /// Per-endpoint fetch timeout in milliseconds.
    pub share_fetch_timeout_ms: u64,

    /// Minimum pending balance (in credits) required to lock a withdrawal.
    pub min_withdrawal_credits: i64,
    /// Fixed conversion factor: lamports paid per internal credit.
    pub lamports_per_credit: u64,

    /// Queue poll interval when no job is claimable, in milliseconds.
    pub queue_poll_interval_ms: u64,
    /// Running jobs older than this are considered abandoned and redelivered.
    pub queue_visibility_timeout_secs: u64,
    /// Concurrent settlement pipelines per process (distinct workers only).
    pub max_concurrent_jobs: usize,

    /// Upper bound on the confirmation wait; expiry is an unknown outcome.
    pub confirmation_timeout_secs: u64,

    /// Custodial public key (base58), used only for balance reads. The
    /// private half never exists outside a settlement attempt.
    pub custodial_address: Option<String>,
}

impl Config {
    /// Reject settings that would undermine settlement safety.
    ///
    /// The visibility timeout must exceed the pipeline's bounded duration;
    /// otherwise a healthy attempt could be redelivered while still running
    /// and race its own replay.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.share_threshold < 2 {
            return Err(config::ConfigError::Message(
                "SHARE_THRESHOLD must be at least 2".to_string(),
            ));
        }
        if !self.share_endpoints.is_empty() && self.share_endpoints.len() < self.share_threshold {
            return Err(config::ConfigError::Message(format!(
                "SHARE_ENDPOINTS lists {} endpoints, below SHARE_THRESHOLD {}",
                self.share_endpoints.len(),
                self.share_threshold
            )));
        }
        let pipeline_bound_ms =
            self.confirmation_timeout_secs * 1_000 + self.share_fetch_timeout_ms;
        if self.queue_visibility_timeout_secs * 1_000 <= pipeline_bound_ms {
            return Err(config::ConfigError::Message(format!(
                "QUEUE_VISIBILITY_TIMEOUT_SECS ({}s) must exceed the bounded pipeline \
                 duration ({}s confirmation wait + {}ms share fetch)",
                self.queue_visibility_timeout_secs,
                self.confirmation_timeout_secs,
                self.share_fetch_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self, config::ConfigError> {
        let share_endpoints: Vec<String> = std::env::var("SHARE_ENDPOINTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/taskpay".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            solana_rpc_url: std::env::var("SOLANA_RPC_URL")
                .unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".to_string()),
            share_endpoints,
            share_threshold: parse_env("SHARE_THRESHOLD", 3)?,
            share_fetch_timeout_ms: parse_env("SHARE_FETCH_TIMEOUT_MS", 5_000)?,
            min_withdrawal_credits: parse_env("MIN_WITHDRAWAL_CREDITS", 3_000)?,
            lamports_per_credit: parse_env("LAMPORTS_PER_CREDIT", 1_000)?,
            queue_poll_interval_ms: parse_env("QUEUE_POLL_INTERVAL_MS", 1_000)?,
            queue_visibility_timeout_secs: parse_env("QUEUE_VISIBILITY_TIMEOUT_SECS", 300)?,
            max_concurrent_jobs: parse_env("MAX_CONCURRENT_JOBS", 4)?,
            confirmation_timeout_secs: parse_env("CONFIRMATION_TIMEOUT_SECS", 60)?,
            custodial_address: std::env::var("CUSTODIAL_ADDRESS").ok(),
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, config::ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| config::ConfigError::Message(format!("invalid value for {}", name))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            database_url: "postgresql://localhost/taskpay".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            solana_rpc_url: "http://localhost:8899".to_string(),
            share_endpoints: vec![
                "http://a/".to_string(),
                "http://b/".to_string(),
                "http://c/".to_string(),
            ],
            share_threshold: 3,
            share_fetch_timeout_ms: 5_000,
            min_withdrawal_credits: 3_000,
            lamports_per_credit: 1_000,
            queue_poll_interval_ms: 1_000,
            queue_visibility_timeout_secs: 300,
            max_concurrent_jobs: 4,
            confirmation_timeout_secs: 60,
            custodial_address: None,
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_degenerate_share_threshold() {
        let mut config = base();
        config.share_threshold = 0;
        assert!(config.validate().is_err());
        config.share_threshold = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_fewer_endpoints_than_threshold() {
        let mut config = base();
        config.share_endpoints.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_visibility_timeout_inside_the_pipeline_bound() {
        let mut config = base();
        // visible again while a slow confirmation is still legitimately waiting
        config.queue_visibility_timeout_secs = 60;
        assert!(config.validate().is_err());
        config.queue_visibility_timeout_secs = 66;
        assert!(config.validate().is_ok());
    }
}
