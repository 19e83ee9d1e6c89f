use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use babel_sync::oracle::WatsonxConfig;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub watsonx: WatsonxConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port: u16 = var("BABEL_PORT", "3000")
            .parse()
            .context("BABEL_PORT must be a port number")?;

        let (Some(api_key), Some(project_id)) = (lookup("WATSONX_API_KEY"), lookup("WATSONX_PROJECT_ID")) else {
            bail!("WATSONX_API_KEY and WATSONX_PROJECT_ID must be set");
        };

        let mut watsonx = WatsonxConfig::new(
            var("WATSONX_URL", "https://us-south.ml.cloud.ibm.com"),
            api_key,
            project_id,
        );
        if let Some(model_id) = lookup("WATSONX_MODEL_ID") {
            watsonx.model_id = model_id;
        }
        if let Some(secs) = lookup("WATSONX_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().context("WATSONX_TIMEOUT_SECS must be a number of seconds")?;
            watsonx.timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            host: var("BABEL_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var("BABEL_DB_PATH", "babel.db")),
            watsonx,
        })
    }
}
