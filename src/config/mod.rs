use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::utils::error::{PoolError, Result};

const PROMOTED_FLOOR: Duration = Duration::from_secs(30);
const PROMOTION_THRESHOLD: Duration = Duration::from_secs(5);

/// Effective, normalized configuration for one `PoolManager` instance.
///
/// This is the product of merging the three external layers described in
/// [`merge_pool_config`]; the manager itself only ever sees this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub idle_session_check_interval: Duration,
    pub idle_session_timeout: Duration,
    pub min_idle_session: usize,
    pub ensure_idle_session: usize,
    pub ensure_idle_session_create_rate: usize,
    pub min_idle_session_for_age: usize,
    pub max_connection_lifetime: Duration,
    pub connection_lifetime_jitter: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_session_check_interval: PROMOTED_FLOOR,
            idle_session_timeout: PROMOTED_FLOOR,
            min_idle_session: 0,
            ensure_idle_session: 0,
            ensure_idle_session_create_rate: 0,
            min_idle_session_for_age: 0,
            max_connection_lifetime: Duration::ZERO,
            connection_lifetime_jitter: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Same as `Default::default()`, named for readability at call sites
    /// that build a config from this baseline in tests.
    pub fn normalized_defaults() -> Self {
        Self::default()
    }

    /// Apply the floor/validation rules from the design: check interval and
    /// idle timeout are promoted to 30s if set at or below 5s; jitter must
    /// not exceed the lifetime it jitters around.
    pub fn normalize(mut self) -> Result<Self> {
        if self.idle_session_check_interval <= PROMOTION_THRESHOLD {
            self.idle_session_check_interval = PROMOTED_FLOOR;
        }
        if self.idle_session_timeout <= PROMOTION_THRESHOLD {
            self.idle_session_timeout = PROMOTED_FLOOR;
        }
        if self.connection_lifetime_jitter > self.max_connection_lifetime {
            return Err(PoolError::Config(format!(
                "connection_lifetime_jitter ({:?}) must be <= max_connection_lifetime ({:?})",
                self.connection_lifetime_jitter, self.max_connection_lifetime
            )));
        }
        Ok(self)
    }
}

/// Global, process-wide config layer (structured block, native duration
/// syntax, e.g. `"30s"` or a bare integer number of seconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalPoolConfig {
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub idle_session_check_interval: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub idle_session_timeout: Option<Duration>,
    pub min_idle_session: Option<usize>,
    pub ensure_idle_session: Option<usize>,
    pub ensure_idle_session_create_rate: Option<usize>,
    pub min_idle_session_for_age: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub max_connection_lifetime: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_opt_duration")]
    pub connection_lifetime_jitter: Option<Duration>,
}

/// Per-proxy override block. Durations are expressed in seconds (integers),
/// per the design's §6.3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyPoolOverride {
    pub idle_session_check_interval_secs: Option<u64>,
    pub idle_session_timeout_secs: Option<u64>,
    pub min_idle_session: Option<usize>,
    pub ensure_idle_session: Option<usize>,
    pub ensure_idle_session_create_rate: Option<usize>,
    pub min_idle_session_for_age: Option<usize>,
    pub max_connection_lifetime_secs: Option<u64>,
    pub connection_lifetime_jitter_secs: Option<u64>,
}

/// Legacy per-proxy fields, only applied when set to a value greater than
/// zero. Durations in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyProxyFields {
    pub idle_session_check_interval: u64,
    pub idle_session_timeout: u64,
    pub min_idle_session: usize,
}

fn secs(v: u64) -> Duration {
    Duration::from_secs(v)
}

/// Merge the three config layers into one effective `PoolConfig`, applying
/// defaults from `PoolConfig::default()` for anything left unset, then
/// normalizing the floors. Precedence: override > legacy (only fields > 0)
/// > global > defaults.
pub fn merge_pool_config(
    global: Option<&GlobalPoolConfig>,
    legacy: Option<&LegacyProxyFields>,
    override_: Option<&ProxyPoolOverride>,
) -> Result<PoolConfig> {
    let mut cfg = PoolConfig::default();

    if let Some(g) = global {
        if let Some(v) = g.idle_session_check_interval {
            cfg.idle_session_check_interval = v;
        }
        if let Some(v) = g.idle_session_timeout {
            cfg.idle_session_timeout = v;
        }
        if let Some(v) = g.min_idle_session {
            cfg.min_idle_session = v;
        }
        if let Some(v) = g.ensure_idle_session {
            cfg.ensure_idle_session = v;
        }
        if let Some(v) = g.ensure_idle_session_create_rate {
            cfg.ensure_idle_session_create_rate = v;
        }
        if let Some(v) = g.min_idle_session_for_age {
            cfg.min_idle_session_for_age = v;
        }
        if let Some(v) = g.max_connection_lifetime {
            cfg.max_connection_lifetime = v;
        }
        if let Some(v) = g.connection_lifetime_jitter {
            cfg.connection_lifetime_jitter = v;
        }
    }

    if let Some(l) = legacy {
        if l.idle_session_check_interval > 0 {
            cfg.idle_session_check_interval = secs(l.idle_session_check_interval);
        }
        if l.idle_session_timeout > 0 {
            cfg.idle_session_timeout = secs(l.idle_session_timeout);
        }
        if l.min_idle_session > 0 {
            cfg.min_idle_session = l.min_idle_session;
        }
    }

    if let Some(o) = override_ {
        if let Some(v) = o.idle_session_check_interval_secs {
            cfg.idle_session_check_interval = secs(v);
        }
        if let Some(v) = o.idle_session_timeout_secs {
            cfg.idle_session_timeout = secs(v);
        }
        if let Some(v) = o.min_idle_session {
            cfg.min_idle_session = v;
        }
        if let Some(v) = o.ensure_idle_session {
            cfg.ensure_idle_session = v;
        }
        if let Some(v) = o.ensure_idle_session_create_rate {
            cfg.ensure_idle_session_create_rate = v;
        }
        if let Some(v) = o.min_idle_session_for_age {
            cfg.min_idle_session_for_age = v;
        }
        if let Some(v) = o.max_connection_lifetime_secs {
            cfg.max_connection_lifetime = secs(v);
        }
        if let Some(v) = o.connection_lifetime_jitter_secs {
            cfg.connection_lifetime_jitter = secs(v);
        }
    }

    cfg.normalize()
}

/// Accepts either a bare integer (seconds) or a human string like `"30s"`
/// or `"5m"` for the global layer's "native duration syntax" fields.
fn deserialize_opt_duration<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    let raw: Option<Raw> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(Raw::Seconds(s)) => Ok(Some(Duration::from_secs(s))),
        Some(Raw::Text(text)) => parse_duration_text(&text)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn parse_duration_text(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    let (digits, unit) = text.split_at(
        text.find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len()),
    );
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {text:?}"))?;
    let multiplier = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => return Err(format!("unknown duration unit {other:?} in {text:?}")),
    };
    Ok(Duration::from_secs(value * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_promote_low_values() {
        let cfg = PoolConfig {
            idle_session_check_interval: Duration::from_secs(1),
            idle_session_timeout: Duration::from_secs(5),
            ..PoolConfig::default()
        }
        .normalize()
        .unwrap();

        assert_eq!(cfg.idle_session_check_interval, PROMOTED_FLOOR);
        assert_eq!(cfg.idle_session_timeout, PROMOTED_FLOOR);
    }

    #[test]
    fn jitter_exceeding_lifetime_is_rejected() {
        let cfg = PoolConfig {
            max_connection_lifetime: Duration::from_secs(10),
            connection_lifetime_jitter: Duration::from_secs(20),
            ..PoolConfig::default()
        };
        assert!(cfg.normalize().is_err());
    }

    #[test]
    fn override_wins_over_legacy_and_global() {
        let global = GlobalPoolConfig {
            min_idle_session: Some(1),
            ..Default::default()
        };
        let legacy = LegacyProxyFields {
            min_idle_session: 2,
            ..Default::default()
        };
        let override_ = ProxyPoolOverride {
            min_idle_session: Some(3),
            ..Default::default()
        };

        let cfg = merge_pool_config(Some(&global), Some(&legacy), Some(&override_)).unwrap();
        assert_eq!(cfg.min_idle_session, 3);
    }

    #[test]
    fn legacy_only_applies_when_positive() {
        let legacy = LegacyProxyFields {
            min_idle_session: 0,
            idle_session_timeout: 0,
            idle_session_check_interval: 0,
        };
        let cfg = merge_pool_config(None, Some(&legacy), None).unwrap();
        assert_eq!(cfg, PoolConfig::default());
    }

    #[test]
    fn global_native_duration_syntax_parses() {
        let toml_src = r#"
            idle_session_timeout = "45s"
            max_connection_lifetime = 3600
        "#;
        let global: GlobalPoolConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(global.idle_session_timeout, Some(Duration::from_secs(45)));
        assert_eq!(global.max_connection_lifetime, Some(Duration::from_secs(3600)));
    }
}
