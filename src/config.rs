use crate::secret_string::SecretString;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub webserver: Webserver,
    #[serde(default)]
    pub rollout: Rollout,
    /// Namespace used for notifications that do not carry `pod_namespace`.
    /// Falls back to the kube client's default namespace when unset.
    pub default_namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webserver {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_shutdown_grace_period_seconds")]
    pub shutdown_grace_period_seconds: u64,
    pub webhook_token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    #[serde(default = "default_true")]
    pub enable_kubectl_annotation: bool,
}

impl Default for Webserver {
    fn default() -> Self {
        Self {
            port: default_port(),
            shutdown_grace_period_seconds: default_shutdown_grace_period_seconds(),
            webhook_token: None,
        }
    }
}

impl Default for Rollout {
    fn default() -> Self {
        Self {
            enable_kubectl_annotation: default_true(),
        }
    }
}

impl Config {
    /// Namespace for notifications without `pod_namespace`. A blank
    /// `defaultNamespace` counts as unset and yields `fallback`.
    pub fn default_namespace_or(&self, fallback: &str) -> String {
        self.default_namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

impl Webserver {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_seconds)
    }
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_grace_period_seconds() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// Loads the config from the file named by `CONFIG_PATH`, or returns the
/// built-in defaults when the variable is not set.
pub fn load_from_env() -> Result<Config> {
    match env::var("CONFIG_PATH") {
        Ok(path) => load_config(path),
        Err(_) => {
            info!("CONFIG_PATH is not set, using default configuration");
            Ok(Config::default())
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Fails listing every referenced variable that is not set.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}
