use clap::{Args, Parser, Subcommand};
use config::{Configuration, ParallelReplicasSettings};
use log::info;
use model::QueryId;
use std::path::Path;

#[derive(Debug, Parser, Clone)]
#[command(author, about, version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Args)]
pub struct StartArgs {
    /// Path to the configuration file in YAML format.
    ///
    /// Defaults apply when the file does not exist.
    #[arg(long, env = "INITIATOR_CONFIG")]
    config: Option<String>,

    /// Path to the log4rs configuration file in YAML format.
    #[arg(long, env = "INITIATOR_LOG_CONFIG")]
    log: Option<String>,

    /// Number of rows of the in-memory table to read.
    #[arg(long, default_value_t = 1000)]
    pub rows: u64,

    /// Rows per granule of the in-memory table.
    #[arg(long, default_value_t = 1)]
    pub index_granularity: u64,

    /// Value stored in every row.
    #[arg(long, default_value_t = 42, allow_negative_numbers = true)]
    pub value: i64,

    /// Number of replicas holding the table.
    #[arg(long, default_value_t = 3)]
    pub replicas: u32,

    /// Identifier of the query. A random one is generated if absent.
    #[arg(long)]
    query_id: Option<String>,

    /// Query setting in form of `key=value`, e.g. `max_parallel_replicas=2`. May be repeated.
    #[arg(long = "setting", value_name = "KEY=VALUE")]
    settings: Vec<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    Start(StartArgs),
}

impl StartArgs {
    pub fn init_log(&self) -> anyhow::Result<()> {
        let config = self
            .log
            .as_deref()
            .unwrap_or("/etc/initiator/initiator-log.yaml");
        let config_path = Path::new(config);

        if !config_path.exists() {
            eprintln!("Log configuration file {} does not exist", config);
            // Exit with errno set
            std::process::exit(2);
        };

        if !config_path.is_file() {
            eprintln!("{} is not a file", config);
            // Exit with errno set
            std::process::exit(22);
        }

        log4rs::init_file(config_path, Default::default())?;
        info!("Log initialized");
        Ok(())
    }

    pub fn create_config(&self) -> anyhow::Result<Configuration> {
        let path = self
            .config
            .as_deref()
            .unwrap_or("/etc/initiator/coordinator.yaml");
        Ok(Configuration::load(path)?)
    }

    pub fn create_settings(&self) -> anyhow::Result<ParallelReplicasSettings> {
        let mut settings = ParallelReplicasSettings::default();
        for assignment in &self.settings {
            settings.apply_assignment(assignment)?;
        }
        Ok(settings)
    }

    pub fn query_id(&self) -> QueryId {
        match &self.query_id {
            Some(query_id) => QueryId::from(query_id.as_str()),
            None => QueryId::new(uuid::Uuid::new_v4().to_string()),
        }
    }
}
