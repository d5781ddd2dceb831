// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::time::Duration;

use anyhow::ensure;
use crowdle_common::{EventSource, GameRules, expand_env_vars};
use serde::de::DeserializeOwned;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{consumer::ConsumerSettings, retry::RetryPolicy, supervisor::SupervisorConfig};

/// Process-level knobs shared by every worker binary.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub instance_type: String,
    pub instance_id: String,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    pub startup_timeout: Duration,
    pub max_restarts: u32,
    pub restart_backoff: Duration,
    pub retry_attempts: u32,
    /// How often open rounds past their deadline are closed without waiting
    /// for a recheck.
    pub recheck_sweep_interval: Duration,
}

impl WorkerSettings {
    pub fn from_env(default_instance_type: &str) -> anyhow::Result<Self> {
        let settings = Self {
            instance_type: std::env::var("CROWDLE_INSTANCE_TYPE")
                .ok()
                .unwrap_or_else(|| default_instance_type.to_string()),
            instance_id: std::env::var("CROWDLE_INSTANCE_ID")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            poll_interval: env_millis("POLL_INTERVAL_MS", 500),
            shutdown_grace: env_millis("SHUTDOWN_GRACE_MS", 10_000),
            startup_timeout: env_millis("STARTUP_TIMEOUT_MS", 30_000),
            max_restarts: std::env::var("MAX_RESTARTS")
                .ok()
                .and_then(|value| value.parse::<u32>().ok())
                .unwrap_or(5),
            restart_backoff: env_millis("RESTART_BACKOFF_MS", 1_000),
            retry_attempts: std::env::var("RETRY_ATTEMPTS")
                .ok()
                .and_then(|value| value.parse::<u32>().ok())
                .unwrap_or(5)
                .max(1),
            recheck_sweep_interval: env_millis("RECHECK_SWEEP_INTERVAL_MS", 30_000),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.poll_interval < self.shutdown_grace,
            "POLL_INTERVAL_MS ({:?}) must be smaller than SHUTDOWN_GRACE_MS ({:?})",
            self.poll_interval,
            self.shutdown_grace
        );
        ensure!(
            !self.instance_type.trim().is_empty(),
            "CROWDLE_INSTANCE_TYPE must not be empty"
        );
        Ok(())
    }

    /// Identity stamped on every event this process publishes.
    pub fn source(&self) -> EventSource {
        EventSource::new(&self.instance_type, &self.instance_id)
    }

    /// Competing consumers of one instance type share a group.
    pub fn consumer_group(&self) -> String {
        format!("{}-v1", self.instance_type)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(200),
            Duration::from_secs(5),
        )
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            poll_interval: self.poll_interval,
            retry: self.retry_policy(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            startup_timeout: self.startup_timeout,
            shutdown_grace: self.shutdown_grace,
            max_restarts: self.max_restarts,
            restart_backoff: self.restart_backoff,
        }
    }
}

fn env_millis(var_name: &str, default: u64) -> Duration {
    let millis = std::env::var(var_name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
        .max(1);
    Duration::from_millis(millis)
}

/// Reads the YAML file named by `var_name`, env-expanded.
///
/// `None` when the variable is unset or blank, or when the file cannot be read
/// or parsed; the latter two are logged.
pub fn load_yaml_config<T: DeserializeOwned>(var_name: &str) -> Option<T> {
    let path = std::env::var(var_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(path = %path, env = var_name, error = %error, "failed to read config file");
            return None;
        }
    };

    if raw.trim().is_empty() {
        warn!(path = %path, env = var_name, "config file is empty");
        return None;
    }

    match serde_yaml::from_str::<T>(&expand_env_vars(&raw)) {
        Ok(parsed) => Some(parsed),
        Err(error) => {
            warn!(path = %path, env = var_name, error = %error, "failed to parse config yaml");
            None
        }
    }
}

/// Rules for tenants that have never stored their own options.
pub fn load_default_rules() -> GameRules {
    let Some(rules) = load_yaml_config::<GameRules>("DEFAULT_OPTIONS_CONFIG_PATH") else {
        return GameRules::default();
    };
    if let Err(error) = rules.validate() {
        warn!(error = %error, "ignoring invalid default options config");
        return GameRules::default();
    }
    info!(
        rounds = rules.number_of_rounds,
        word_length = rules.word_length,
        dictionary = %rules.dictionary_name,
        "loaded default options config"
    );
    rules
}
