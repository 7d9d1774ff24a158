//! Application-level configuration loading: timers, stake bounds and settlement knobs.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::Currency;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WAGER_ROOMS_CONFIG_PATH";
/// Environment variable that overrides the admin token found in the file.
const ADMIN_TOKEN_ENV: &str = "ADMIN_TOKEN";

const DEFAULT_PRESENCE_GRACE_MS: u64 = 15_000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_CODE_RESERVE_ATTEMPTS: u32 = 8;
const DEFAULT_TRANSACTION_RETRIES: u32 = 5;
const DEFAULT_PLATFORM_WALLET: &str = "platform";
const DEFAULT_COINS_MIN: i64 = 10;
const DEFAULT_COINS_MAX: i64 = 10_000;
const DEFAULT_FIRES_UNIT: i64 = 1;

/// Accepted stake amounts per currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeLimits {
    /// Smallest coins stake.
    pub coins_min: Decimal,
    /// Largest coins stake.
    pub coins_max: Decimal,
    /// The only fires stake accepted.
    pub fires_unit: Decimal,
}

impl StakeLimits {
    /// Whether `amount` is an acceptable stake in `currency`.
    ///
    /// Coins stakes must be whole and within `[coins_min, coins_max]`; fires stakes must
    /// equal the fixed unit.
    pub fn accepts(&self, currency: Currency, amount: Decimal) -> bool {
        match currency {
            Currency::Coins => {
                amount.fract().is_zero() && amount >= self.coins_min && amount <= self.coins_max
            }
            Currency::Fires => amount == self.fires_unit,
        }
    }
}

impl Default for StakeLimits {
    fn default() -> Self {
        Self {
            coins_min: Decimal::from(DEFAULT_COINS_MIN),
            coins_max: Decimal::from(DEFAULT_COINS_MAX),
            fires_unit: Decimal::from(DEFAULT_FIRES_UNIT),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// How long a room may stay without any live connection before it is abandoned.
    pub presence_grace: Duration,
    /// Period of the durable inactivity sweep.
    pub sweep_interval: Duration,
    /// Idle time after which the sweep force-cancels an open room.
    pub inactivity_timeout: Duration,
    /// Random candidates tried before a reservation fails with code space exhaustion.
    pub code_reserve_attempts: u32,
    /// Retries of a unit of work that lost a storage conflict.
    pub transaction_retries: u32,
    /// Wallet receiving platform fees and split remainders.
    pub platform_wallet: String,
    /// Shared secret expected in `x-admin-token`; admin routes are disabled when absent.
    pub admin_token: Option<String>,
    /// Accepted stakes.
    pub stakes: StakeLimits,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration file");
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(token) = env::var(ADMIN_TOKEN_ENV).ok().filter(|t| !t.is_empty()) {
            self.admin_token = Some(token);
        }
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    presence_grace_ms: Option<u64>,
    sweep_interval_secs: Option<u64>,
    inactivity_timeout_secs: Option<u64>,
    code_reserve_attempts: Option<u32>,
    transaction_retries: Option<u32>,
    platform_wallet: Option<String>,
    admin_token: Option<String>,
    stakes: RawStakes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStakes {
    coins: RawCoinStakes,
    fires: RawFireStakes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCoinStakes {
    min: Option<Decimal>,
    max: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFireStakes {
    unit: Option<Decimal>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = StakeLimits::default();
        Self {
            presence_grace: Duration::from_millis(
                value.presence_grace_ms.unwrap_or(DEFAULT_PRESENCE_GRACE_MS),
            ),
            sweep_interval: Duration::from_secs(
                value
                    .sweep_interval_secs
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
                    .max(1),
            ),
            inactivity_timeout: Duration::from_secs(
                value
                    .inactivity_timeout_secs
                    .unwrap_or(DEFAULT_INACTIVITY_TIMEOUT_SECS),
            ),
            code_reserve_attempts: value
                .code_reserve_attempts
                .unwrap_or(DEFAULT_CODE_RESERVE_ATTEMPTS)
                .max(1),
            transaction_retries: value
                .transaction_retries
                .unwrap_or(DEFAULT_TRANSACTION_RETRIES),
            platform_wallet: value
                .platform_wallet
                .filter(|wallet| !wallet.is_empty())
                .unwrap_or_else(|| DEFAULT_PLATFORM_WALLET.to_owned()),
            admin_token: value.admin_token.filter(|token| !token.is_empty()),
            stakes: StakeLimits {
                coins_min: value.stakes.coins.min.unwrap_or(defaults.coins_min),
                coins_max: value.stakes.coins.max.unwrap_or(defaults.coins_max),
                fires_unit: value.stakes.fires.unit.unwrap_or(defaults.fires_unit),
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let raw: RawConfig = serde_json::from_str("{}").unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.presence_grace, Duration::from_secs(15));
        assert_eq!(config.code_reserve_attempts, 8);
        assert_eq!(config.transaction_retries, 5);
        assert_eq!(config.platform_wallet, "platform");
        assert_eq!(config.admin_token, None);
        assert_eq!(config.stakes, StakeLimits::default());
    }

    #[test]
    fn partial_stakes_keep_remaining_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{ "presence_grace_ms": 500, "stakes": { "coins": { "max": "250" } } }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.presence_grace, Duration::from_millis(500));
        assert_eq!(config.stakes.coins_min, dec!(10));
        assert_eq!(config.stakes.coins_max, dec!(250));
        assert_eq!(config.stakes.fires_unit, dec!(1));
    }

    #[test]
    fn coin_stakes_must_be_whole_and_bounded() {
        let limits = StakeLimits::default();
        assert!(limits.accepts(Currency::Coins, dec!(10)));
        assert!(limits.accepts(Currency::Coins, dec!(10000)));
        assert!(!limits.accepts(Currency::Coins, dec!(9)));
        assert!(!limits.accepts(Currency::Coins, dec!(10001)));
        assert!(!limits.accepts(Currency::Coins, dec!(10.5)));
    }

    #[test]
    fn fire_stakes_must_match_unit() {
        let limits = StakeLimits::default();
        assert!(limits.accepts(Currency::Fires, dec!(1)));
        assert!(!limits.accepts(Currency::Fires, dec!(2)));
        assert!(!limits.accepts(Currency::Fires, dec!(0)));
    }
}
