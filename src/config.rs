use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Server configuration. CLI flags win over environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Model-serving control plane API")]
pub struct Args {
    /// Host to bind to (overrides MODEL_ENGINE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MODEL_ENGINE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides MODEL_ENGINE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Apply the schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |key| env::var(key))?, migrate))
    }

    /// Lay `args` over whatever `var` reports for each environment key.
    fn merge<F>(args: Args, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let env_host = var("MODEL_ENGINE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match var("MODEL_ENGINE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing MODEL_ENGINE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 5000,
            Err(err) => return Err(err).context("reading MODEL_ENGINE_PORT"),
        };
        let env_db = var("MODEL_ENGINE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/model_engine.db".into());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
