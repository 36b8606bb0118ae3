//! `corpusq-server`: the HTTP/SSE surface and CLI front door for the
//! hybrid RAG core, grounded in the teacher's own `main.rs` CLI-dispatch
//! shape (subcommand enum, `#[tokio::main]`, construct-then-dispatch) and
//! `whatsapp_http_server.rs`'s axum bind/serve sequence.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use corpusq_core::config::RagConfig;
use corpusq_core::embeddings::HttpEmbeddingModel;
use corpusq_core::indexer::Indexer;
use corpusq_core::llm::HttpLlmClient;
use corpusq_core::manifest::Manifest;
use corpusq_core::retrieval::HybridRetriever;
use corpusq_core::search::lexical::LexicalIndex;
use corpusq_core::state::StateStore;
use corpusq_core::storage::LanceStore;
use corpusq_core::tenant::TenantManager;

use corpusq_server::http;
use corpusq_server::state::AppState;

#[derive(Parser)]
#[command(name = "corpusq-server", about = "Hybrid RAG chat server over a local document corpus")]
struct Cli {
    /// Directory holding one `<tenant>.yaml` file per tenant (§6).
    #[arg(long, default_value = "./tenants", env = "TENANTS_DIR")]
    tenants_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve {
        /// Address to bind the HTTP listener to.
        #[arg(long, default_value = "0.0.0.0:8787", env = "BIND_ADDR")]
        bind: String,
    },
    /// Run the indexer once over one or all configured tenants and exit.
    Index {
        /// Restrict the run to a single tenant's short name.
        #[arg(long)]
        tenant: Option<String>,
        /// Also delete manifest/backend rows for files no longer on disk.
        #[arg(long)]
        sweep_orphans: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = RagConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration, refusing to start");
        std::process::exit(1);
    }

    let tenants = match TenantManager::load_from_dir(&cli.tenants_dir) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!(error = %e, dir = %cli.tenants_dir.display(), "failed to load tenant configuration");
            std::process::exit(1);
        }
    };

    let manifest = Arc::new(Manifest::open(&config.paths.manifest_path)?);
    let lexical: Arc<dyn corpusq_core::storage::LexicalBackend> =
        Arc::new(LexicalIndex::open(&config.paths.data_dir.join("lexical"))?);
    let embeddings: Arc<dyn corpusq_core::embeddings::EmbeddingModel> = Arc::new(HttpEmbeddingModel::new(
        config.models.embedding_base_url.clone(),
        config.models.embedding_model.clone(),
        768,
    ));
    let vector = Arc::new(
        LanceStore::new(
            config.paths.vector_dir.to_str().unwrap_or("./data/vectors"),
            embeddings.dimension(),
        )
        .await?,
    );
    let llm: Arc<dyn corpusq_core::llm::LlmClient> =
        Arc::new(HttpLlmClient::new(config.models.llm_base_url.clone(), config.models.llm_api_key.clone()));

    match cli.command {
        Commands::Serve { bind } => {
            let retriever = Arc::new(HybridRetriever::new(
                lexical.clone(),
                vector.clone(),
                embeddings.clone(),
                Duration::from_millis(config.search.backend_timeout_ms),
            ));
            let conversations = Arc::new(StateStore::new(config.paths.state_path.clone())?);

            let app_state = AppState {
                config: Arc::new(config),
                tenants,
                retriever,
                llm,
                conversations,
                lexical,
                bind_host: bind.clone(),
            };

            let router = http::router(app_state);
            let listener = tokio::net::TcpListener::bind(&bind).await?;
            tracing::info!(addr = %bind, "corpusq-server listening");
            axum::serve(listener, router).await?;
        }
        Commands::Index { tenant, sweep_orphans } => {
            let indexer = Indexer::new(
                manifest.clone(),
                lexical.clone(),
                vector.clone(),
                embeddings.clone(),
                config.indexer.clone(),
                config.chunking.clone(),
            );

            let targets: Vec<_> = match &tenant {
                Some(name) => tenants.get(name).into_iter().cloned().collect(),
                None => tenants.all().to_vec(),
            };

            for t in &targets {
                let stats = indexer.index_tenant(t, None).await?;
                tracing::info!(
                    tenant = %t.short_name,
                    files_seen = stats.files_seen,
                    files_indexed = stats.files_indexed,
                    files_skipped = stats.files_skipped,
                    files_failed = stats.files_failed,
                    chunks_upserted = stats.chunks_upserted,
                    "index run complete"
                );
                if sweep_orphans {
                    let removed = indexer.sweep_orphans(t).await?;
                    tracing::info!(tenant = %t.short_name, removed, "orphan sweep complete");
                }
            }
        }
    }

    Ok(())
}
