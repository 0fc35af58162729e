use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use dataset_query::config::{AppConfig, DatasetSourceConfig, load_app_config};
use dataset_query::server;
use dataset_query::service::{QueryInput, QueryService};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "dataset-query",
    about = "Answer natural-language or SQL questions over tabular datasets"
)]
pub struct Cli {
    /// Path to a JSON config file. Defaults to the platform config directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Read datasets from `<dir>/<id>.json|csv|parquet` instead of the Apify API.
    #[arg(long, global = true, env = "DATASET_QUERY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answer one query and print the JSON answer
    Query(QueryArgs),
    /// Print the schema extracted from a dataset
    Schema {
        /// Dataset identifier
        #[arg(short, long, env = "DATASET_ID")]
        dataset: String,

        /// Reload the dataset even if cached
        #[arg(long)]
        refresh: bool,
    },
    /// Start the HTTP server
    Serve {
        /// Listen port. Defaults to `ACTOR_STANDBY_PORT`, then the config file.
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Args)]
pub struct QueryArgs {
    /// Natural-language question or SQL query
    pub query: String,

    /// Dataset identifier
    #[arg(short, long, env = "DATASET_ID")]
    pub dataset: String,

    /// Model name, e.g. gpt-4o-mini
    #[arg(short, long)]
    pub model: Option<String>,

    /// API key for the model provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub offset: Option<usize>,

    /// Reload the dataset before answering
    #[arg(long)]
    pub refresh: bool,

    /// Use the autonomous agent instead of the fixed workflow
    #[arg(long)]
    pub agent: bool,

    /// Return raw rows without a synthesized answer
    #[arg(long)]
    pub no_synthesize: bool,
}

impl QueryArgs {
    fn into_input(self) -> QueryInput {
        let mut input = QueryInput::new(self.query, self.dataset);
        input.model_name = self.model;
        input.llm_provider_api_key = self
            .api_key
            .filter(|key| !key.is_empty())
            .map(|key| SecretString::new(key.into()));
        input.limit = self.limit;
        input.offset = self.offset;
        input.refresh_dataset = self.refresh;
        input.use_agent = self.agent;
        input.synthesize = !self.no_synthesize;
        input
    }
}

fn load_config(path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<AppConfig> {
    let mut config = load_app_config(path.as_deref())?;
    if let Some(dir) = data_dir {
        config.dataset.source = DatasetSourceConfig::Directory { path: dir };
    }
    Ok(config)
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config, cli.data_dir)?;
    let service = QueryService::from_config(config);

    match cli.command {
        Commands::Query(args) => handle_query(&service, args).await,
        Commands::Schema { dataset, refresh } => handle_schema(&service, &dataset, refresh).await,
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| server::resolve_port(service.config().server.port));
            server::serve(Arc::new(service), port).await
        }
    }
}

async fn handle_query(service: &QueryService, args: QueryArgs) -> Result<()> {
    match service.answer(args.into_input()).await {
        Ok(answer) => {
            println!("{}", serde_json::to_string_pretty(&answer)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.to_body())?);
            Err(err).context("Query failed")
        }
    }
}

async fn handle_schema(service: &QueryService, dataset_id: &str, refresh: bool) -> Result<()> {
    let handle = service.registry().load(dataset_id, refresh).await?;
    println!(
        "Dataset {dataset_id} as `{}` ({} rows):",
        service.config().dataset.table_name,
        handle.row_count()
    );
    println!("{}", handle.schema().render_for_prompt());
    Ok(())
}
