use std::{collections::HashSet, env, fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    auth::GateConfig, dispatch::DispatcherConfig, errors::Error, rate_limit::RateLimitConfig,
    Result,
};

/// Typed configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Identity
    pub bot_nick: String,
    pub command_prefix: char,
    pub talk_channels: Vec<String>,

    // Privileged commands
    pub admin_nicks: Vec<String>,
    pub bypass_auth: bool,
    pub authority_nick: String,
    pub auth_logged_in_level: String,
    pub auth_ttl: Duration,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_max_interactions: usize,
    pub rate_limit_check_period: Duration,
    pub rate_limit_penalty: Duration,
    pub rate_limit_sweep_interval: Duration,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

impl Config {
    /// Load from the process environment, after applying `.env` if present.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let str_or = |key: &str, default: &str| {
            get(key)
                .and_then(non_empty)
                .unwrap_or_else(|| default.to_string())
        };
        let bool_or =
            |key: &str, default: bool| get(key).map(|s| parse_bool(&s)).unwrap_or(default);
        let millis_or = |key: &str, default: u64| -> Result<Duration> {
            match get(key).and_then(non_empty) {
                None => Ok(Duration::from_millis(default)),
                Some(raw) => raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| {
                    Error::Config(format!(
                        "{key} must be a number of milliseconds, got {raw:?}"
                    ))
                }),
            }
        };

        let bot_nick = str_or("BOT_NICK", "chanbot");

        let prefix_raw = str_or("COMMAND_PREFIX", "!");
        let mut prefix_chars = prefix_raw.trim().chars();
        let command_prefix = match (prefix_chars.next(), prefix_chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(Error::Config(format!(
                    "COMMAND_PREFIX must be a single character, got {prefix_raw:?}"
                )))
            }
        };

        let talk_channels = parse_csv(get("TALK_CHANNELS"));
        let admin_nicks = parse_csv(get("ADMIN_NICKS"));
        let bypass_auth = bool_or("BYPASS_AUTH", false);
        let authority_nick = str_or("AUTHORITY_NICK", "NickServ");
        let auth_logged_in_level = str_or("AUTH_LOGGED_IN_LEVEL", "3");
        let auth_ttl = millis_or("AUTH_TTL_MS", 600_000)?;

        let rate_limit_enabled = bool_or("RATE_LIMIT_ENABLED", true);
        let rate_limit_max_interactions =
            match get("RATE_LIMIT_MAX_INTERACTIONS").and_then(non_empty) {
                None => 4,
                Some(raw) => match raw.trim().parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => {
                        return Err(Error::Config(format!(
                            "RATE_LIMIT_MAX_INTERACTIONS must be a positive integer, got {raw:?}"
                        )))
                    }
                },
            };
        let rate_limit_check_period = millis_or("RATE_LIMIT_CHECK_PERIOD_MS", 10_000)?;
        let rate_limit_penalty = millis_or("RATE_LIMIT_PENALTY_MS", 60_000)?;
        let rate_limit_sweep_interval = millis_or("RATE_LIMIT_SWEEP_INTERVAL_MS", 60_000)?;
        if rate_limit_sweep_interval.is_zero() {
            return Err(Error::Config(
                "RATE_LIMIT_SWEEP_INTERVAL_MS must be greater than zero".to_string(),
            ));
        }

        let audit_log_path = get("AUDIT_LOG_PATH").and_then(non_empty).map(PathBuf::from);
        let audit_log_json = bool_or("AUDIT_LOG_JSON", false);

        Ok(Self {
            bot_nick,
            command_prefix,
            talk_channels,
            admin_nicks,
            bypass_auth,
            authority_nick,
            auth_logged_in_level,
            auth_ttl,
            rate_limit_enabled,
            rate_limit_max_interactions,
            rate_limit_check_period,
            rate_limit_penalty,
            rate_limit_sweep_interval,
            audit_log_path,
            audit_log_json,
        })
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.rate_limit_enabled,
            max_interactions: self.rate_limit_max_interactions,
            check_period: self.rate_limit_check_period,
            penalty: self.rate_limit_penalty,
            sweep_interval: self.rate_limit_sweep_interval,
        }
    }

    pub fn gate(&self) -> GateConfig {
        GateConfig {
            bypass: self.bypass_auth,
            admins: self.admin_nicks.iter().cloned().collect::<HashSet<_>>(),
            authority: self.authority_nick.clone(),
            logged_in_level: self.auth_logged_in_level.clone(),
            ttl: self.auth_ttl,
        }
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig::new(
            self.bot_nick.clone(),
            self.command_prefix,
            self.talk_channels.iter().cloned(),
        )
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
