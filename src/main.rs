//! # nl-query CLI (`nlq`)
//!
//! Command-line surface over the nl-query pipeline. Results are printed as
//! pretty JSON on stdout; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! nlq --config ./config/nlq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nlq ask <source> "<question>"` | Route a question and answer it |
//! | `nlq query <source> "<question>"` | Generate and run SQL for a question |
//! | `nlq route "<question>"` | Show the routing decision only |
//! | `nlq entities "<text>"` | Extract entities from text |
//! | `nlq schema <source>` | Print resolved schema context |
//! | `nlq index <source>` | Write schema knowledge for a source |
//! | `nlq relevant <source> "<question>"` | Rank indexed tables against a question |
//! | `nlq exec <source> "<sql>"` | Run a statement directly |
//! | `nlq sources` | List data sources and their health |
//! | `nlq completions <shell>` | Print a shell completion script |
//!
//! Data sources are addressed by numeric id or by name.

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use nl_query::config::{self, Config};
use nl_query::indexer::IndexOptions;
use nl_query::llm::CompletionOptions;
use nl_query::pipeline::PipelineOptions;
use nl_query::router::RouteOptions;
use nl_query::schema::ResolveOptions;
use nl_query::service::QueryService;
use nl_query::sources;
use nl_query_core::entities;
use nl_query_core::models::{DataSourceId, ProcessingPath};
use nl_query_core::routing::RoutingHints;

/// nl-query CLI: answer natural-language questions over tabular data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/nlq.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "nlq",
    about = "Answer natural-language questions over tabular data sources",
    version,
    long_about = "nl-query routes a question to catalog retrieval, generated SQL, or both. \
    SQL generation is grounded on schema context read from an indexed knowledge store, \
    falling back to live introspection of the source."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nlq.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PathArg {
    Rag,
    Code,
    Hybrid,
}

impl From<PathArg> for ProcessingPath {
    fn from(p: PathArg) -> Self {
        match p {
            PathArg::Rag => ProcessingPath::Rag,
            PathArg::Code => ProcessingPath::CodeExecution,
            PathArg::Hybrid => ProcessingPath::Hybrid,
        }
    }
}

/// Flags shared by commands that generate SQL.
#[derive(clap::Args)]
struct GenerationArgs {
    /// Restrict schema context to these tables (`database.schema.table`).
    #[arg(long = "table")]
    tables: Vec<String>,

    /// Skip the knowledge store and introspect the source directly.
    #[arg(long)]
    live: bool,

    /// Explain the result in prose.
    #[arg(long)]
    reasoning: bool,

    /// Override the generation model.
    #[arg(long)]
    model: Option<String>,

    /// Override the generation temperature.
    #[arg(long)]
    temperature: Option<f32>,
}

impl GenerationArgs {
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            resolve: resolve_options(&self.tables, self.live),
            include_reasoning: self.reasoning.then_some(true),
            completion: CompletionOptions {
                model: self.model.clone(),
                temperature: self.temperature,
                max_tokens: None,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Route a question and answer it through the chosen path.
    Ask {
        /// Data source id or name.
        source: String,
        question: String,
        /// Force a processing path instead of classifying.
        #[arg(long, value_enum)]
        path: Option<PathArg>,
        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Generate SQL for a question, run it, and print the result.
    Query {
        /// Data source id or name.
        source: String,
        question: String,
        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Show how a question would be routed.
    Route {
        question: String,
        /// Treat schema context as unavailable.
        #[arg(long)]
        no_schema: bool,
    },

    /// Extract entities from text.
    Entities { text: String },

    /// Print the schema context resolved for a source.
    Schema {
        /// Data source id or name.
        source: String,
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Skip the knowledge store and introspect the source directly.
        #[arg(long)]
        live: bool,
    },

    /// Introspect a source and write its schema to the knowledge store.
    Index {
        /// Data source id or name.
        source: String,
        #[arg(long = "table")]
        tables: Vec<String>,
        /// Drop existing knowledge for the source first.
        #[arg(long)]
        rebuild: bool,
    },

    /// Rank a source's indexed tables against a question.
    Relevant {
        /// Data source id or name.
        source: String,
        question: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// Run a statement against a source.
    Exec {
        /// Data source id or name.
        source: String,
        sql: String,
    },

    /// List configured data sources and their health.
    Sources,

    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn table_filter(tables: &[String]) -> Option<HashSet<String>> {
    (!tables.is_empty()).then(|| tables.iter().cloned().collect())
}

fn resolve_options(tables: &[String], live: bool) -> ResolveOptions {
    ResolveOptions {
        filter_tables: table_filter(tables),
        use_knowledge: !live,
    }
}

fn source_id(cfg: &Config, key: &str) -> Result<DataSourceId> {
    cfg.find_source(key)
        .map(|s| s.data_source_id())
        .ok_or_else(|| anyhow!("Unknown data source '{}'. Run `nlq sources` to list them.", key))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Commands that don't require config
    match &cli.command {
        Commands::Entities { text } => {
            return print_json(&entities::extract(text));
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "nlq", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Route { question, no_schema } => {
            // Heuristic routing works without a config file.
            let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
            let service = QueryService::from_config(cfg).await?;
            let hints = RoutingHints {
                entities: None,
                schema_available: no_schema.then_some(false),
            };
            return print_json(&service.router.route(question, &hints).await);
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Sources => {
            let service = QueryService::from_config(cfg).await?;
            let statuses = sources::list_sources(&service.config, service.connector.as_ref()).await;
            print_json(&statuses)?;
        }
        Commands::Ask {
            source,
            question,
            path,
            generation,
        } => {
            let id = source_id(&cfg, &source)?;
            let service = QueryService::from_config(cfg).await?;
            let options = RouteOptions {
                force_path: path.map(Into::into),
                schema_available: None,
                pipeline: generation.pipeline_options(),
            };
            print_json(&service.router.answer(id, &question, &options).await?)?;
        }
        Commands::Query {
            source,
            question,
            generation,
        } => {
            let id = source_id(&cfg, &source)?;
            let service = QueryService::from_config(cfg).await?;
            let result = service
                .pipeline
                .run(id, &question, &generation.pipeline_options())
                .await?;
            print_json(&result)?;
        }
        Commands::Schema {
            source,
            tables,
            live,
        } => {
            let id = source_id(&cfg, &source)?;
            let service = QueryService::from_config(cfg).await?;
            let schemas = service
                .resolver
                .resolve_with(id, &resolve_options(&tables, live))
                .await;
            print_json(&schemas)?;
        }
        Commands::Index {
            source,
            tables,
            rebuild,
        } => {
            let id = source_id(&cfg, &source)?;
            if cfg.knowledge.path.is_none() {
                tracing::warn!("knowledge.path is not set; the index will not outlive this process");
            }
            let service = QueryService::from_config(cfg).await?;
            let options = IndexOptions {
                filter_tables: table_filter(&tables),
                rebuild,
            };
            print_json(&service.indexer.index(id, &options).await?)?;
        }
        Commands::Relevant {
            source,
            question,
            limit,
        } => {
            let id = source_id(&cfg, &source)?;
            let service = QueryService::from_config(cfg).await?;
            print_json(&service.indexer.find_relevant_tables(id, &question, limit).await?)?;
        }
        Commands::Exec { source, sql } => {
            let id = source_id(&cfg, &source)?;
            let service = QueryService::from_config(cfg).await?;
            print_json(&service.executor.execute(id, &sql).await?)?;
        }
        Commands::Entities { .. } | Commands::Completions { .. } | Commands::Route { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
