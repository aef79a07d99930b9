use std::{env, str::FromStr, time::Duration};

use crate::{
    error::{bad, AppResult},
    sync::{Heartbeat, SyncConfig},
};

pub struct Config {
    pub bind_addr:    String,
    pub database_url: String,
    pub static_dir:   String,
    pub sync:         SyncConfig,
}

impl Config {
    /// Read settings from the environment (`.env` already loaded).
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let num = |k: &str, dflt: u64| -> AppResult<u64> {
            match get(k) {
                Some(v) => u64::from_str(v.trim()).map_err(|e| bad(format!("{k}: {e}"))),
                None    => Ok(dflt),
            }
        };

        let heartbeat = Heartbeat {
            ping_period: Duration::from_secs(num("PING_PERIOD_SECS", 25)?),
            pong_wait:   Duration::from_secs(num("PONG_WAIT_SECS", 30)?),
            write_wait:  Duration::from_secs(num("WRITE_WAIT_SECS", 10)?),
        };
        if heartbeat.ping_period.is_zero() || heartbeat.ping_period >= heartbeat.pong_wait {
            return Err(bad("PING_PERIOD_SECS must be non-zero and below PONG_WAIT_SECS"));
        }

        Ok(Self {
            bind_addr:    get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://watch_party.db?mode=rwc".into()),
            static_dir:   get("STATIC_DIR").unwrap_or_else(|| "static".into()),
            sync: SyncConfig {
                heartbeat,
                client_queue: num("CLIENT_QUEUE", 10)? as usize,
                room_queue:   num("ROOM_QUEUE", 64)? as usize,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> AppResult<Config> {
        let m: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| m.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = load(&[]).unwrap();
        assert_eq!(c.bind_addr, "0.0.0.0:8080");
        assert_eq!(c.sync.heartbeat.ping_period, Duration::from_secs(25));
        assert_eq!(c.sync.heartbeat.pong_wait, Duration::from_secs(30));
        assert_eq!(c.sync.client_queue, 10);
    }

    #[test]
    fn overrides_and_validation() {
        let c = load(&[("PING_PERIOD_SECS", "5"), ("PONG_WAIT_SECS", "8"), ("CLIENT_QUEUE", "32")]).unwrap();
        assert_eq!(c.sync.heartbeat.ping_period, Duration::from_secs(5));
        assert_eq!(c.sync.client_queue, 32);

        assert!(load(&[("PING_PERIOD_SECS", "30")]).is_err());
        assert!(load(&[("ROOM_QUEUE", "lots")]).is_err());
    }
}
