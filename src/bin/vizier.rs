#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use vizier::chartgen::ConfigGenerator;
use vizier::gateway::{ChatModel, NoopUsageSink, ProviderGateway};
use vizier::render::{register_builtin_kinds, Processed, RenderKindRegistry};
use vizier::store::{DataStore, StaticTableStore};
use vizier::{
    IntentClassifier, Pipeline, PipelineBuilder, PipelineObserver, ProcessRequest, RenderConfig,
    SourceDispatchRegistry, SqlSourceHandler,
};

#[derive(Parser)]
#[command(name = "vizier", version, about = "Query-to-chart pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query through the pipeline against a JSON table
    Ask {
        /// The free-text query
        query: String,
        /// JSON file with an array of row objects; the file stem names the table
        #[arg(long)]
        table: PathBuf,
        /// Data source identity used for cache scoping
        #[arg(long, default_value = "default")]
        source: String,
        /// Output format hint recorded on the config
        #[arg(long, default_value = "chart")]
        format: String,
        /// OpenRouter model id (env: VIZIER_MODEL)
        #[arg(long, env = "VIZIER_MODEL", default_value = "openai/gpt-4o-mini")]
        model: String,
        /// Write the render config JSON here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the builtin render kinds
    Kinds,
    /// Explain cache administration (the cache is per-process)
    CacheClear,
}

/// Prints stage snapshots as the pipeline progresses.
struct ProgressObserver;

impl PipelineObserver for ProgressObserver {
    fn on_snapshot(&self, config: &RenderConfig) {
        if config.is_loading {
            eprintln!("[vizier] processing: {}", config.query);
        } else if config.is_error {
            eprintln!(
                "[vizier] failed: {}",
                config.error_message.as_deref().unwrap_or("unknown error")
            );
        } else {
            eprintln!(
                "[vizier] done: {} rows in {}ms",
                config.metadata.row_count, config.metadata.elapsed_ms
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            query,
            table,
            source,
            format,
            model,
            out,
        } => {
            let store = Arc::new(StaticTableStore::from_json_file(&table)?);
            let schema = store.schema();
            eprintln!(
                "[vizier] loaded table '{}' ({} columns)",
                schema.table,
                schema.columns.len()
            );

            let gateway = Arc::new(ProviderGateway::from_env(Arc::new(NoopUsageSink))?);
            let model = ChatModel::openrouter(model);

            let mut dispatch = SourceDispatchRegistry::new();
            dispatch.register(
                "sql",
                Arc::new(SqlSourceHandler::new(
                    gateway.clone(),
                    model.clone(),
                    store,
                )),
            );

            let pipeline: Pipeline = PipelineBuilder::new(
                IntentClassifier::new(gateway.clone(), model.clone()),
                Arc::new(dispatch),
                ConfigGenerator::new(gateway, model),
            )
            .observer(Arc::new(ProgressObserver))
            .build();

            let req = ProcessRequest::new(query, source).format_hint(format);
            let outcome = pipeline.process(req).await;

            if let Some(chart) = &outcome.config.chart {
                let mut registry = RenderKindRegistry::new();
                register_builtin_kinds(&mut registry);
                match registry.resolve(&chart.kind) {
                    vizier::RenderResolution::Found(entry) => {
                        match entry.processor.process(&outcome.config.rows, chart) {
                            Processed::Ready(data) => {
                                eprintln!("{}", entry.renderer.render(&data, chart))
                            }
                            Processed::Invalid { error } => {
                                eprintln!("[vizier] rows do not fit the chart spec: {error}")
                            }
                        }
                    }
                    vizier::RenderResolution::Unregistered { kind } => {
                        eprintln!("[vizier] no renderer registered for kind '{kind}'")
                    }
                }
            }

            match out {
                Some(path) => {
                    write_json(&path, &outcome.config)?;
                    eprintln!("[vizier] config written to {}", path.display());
                }
                None => println!("{}", serde_json::to_string_pretty(&outcome.config)?),
            }
            if outcome.config.is_error {
                std::process::exit(1);
            }
        }
        Commands::Kinds => {
            let mut registry = RenderKindRegistry::new();
            register_builtin_kinds(&mut registry);
            for kind in registry.kinds() {
                println!("{kind}");
            }
        }
        Commands::CacheClear => {
            println!(
                "The result cache is in-memory and per-process; it is empty at startup \
                 and discarded at exit. Long-running hosts clear it through \
                 Pipeline::clear_cache, scoped to one source or all entries."
            );
        }
    }

    Ok(())
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
