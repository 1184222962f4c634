use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by layering defaults, the TOML file, and
    /// `STRADDLE_`-prefixed environment variables (`__` separates sections,
    /// e.g. `STRADDLE_KITE__API_KEY`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or a value
    /// has the wrong type.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig> {
        Ok(Self::figment(path).extract()?)
    }

    /// The merged provider stack, exposed so callers can layer CLI overrides.
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("STRADDLE_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_file_yields_defaults() {
        let config = ConfigLoader::load("does/not/exist.toml").unwrap();
        assert_eq!(config.strategy.lots, 1);
        assert_eq!(config.strategy.stop_loss_pct, dec!(10));
        assert_eq!(config.cache.ttl_secs, 43_200);
        assert!(!config.strategy.add_targets);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Straddle.toml");
        std::fs::write(
            &path,
            r#"
            [strategy]
            name = "banknifty-straddle"
            option_root = "BANKNIFTY"
            lots = 3
            entry_time = "09:30:00"
            add_targets = true
            target_pct = "40"

            [kite]
            api_key = "abc"
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load(&path).unwrap();
        assert_eq!(config.strategy.name, "banknifty-straddle");
        assert_eq!(config.strategy.lots, 3);
        assert_eq!(config.strategy.entry_time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(config.strategy.target_pct, dec!(40));
        assert!(config.strategy.add_targets);
        assert_eq!(config.kite.api_key, "abc");
        assert_eq!(config.kite.base_url, "https://api.kite.trade");
    }
}
