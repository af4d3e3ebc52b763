//! Interactive turn-based CLI for the orchestration engine.
//!
//! Reads configuration from environment variables:
//! - `CLOUDPILOT_API_BASE_URL`, `CLOUDPILOT_API_KEY`: primary provider
//! - `CLOUDPILOT_MODEL`, `CLOUDPILOT_FAST_MODEL`: model pair
//! - `CLOUDPILOT_FALLBACK_BASE_URL`, `CLOUDPILOT_FALLBACK_API_KEY`,
//!   `CLOUDPILOT_FALLBACK_MODEL`: optional second provider
//! - `CLOUDPILOT_EMBEDDING_MODEL`: embedding model (default
//!   text-embedding-3-small)
//! - `OCI_TENANCY`, `OCI_USER`, `OCI_FINGERPRINT`, `OCI_KEY_FILE`,
//!   `OCI_REGION`: tenancy credentials
//!
//! The cloud-SDK surface is an external collaborator; the `--fixtures`
//! flag serves list operations from a JSON file of canned resources so
//! turns can be driven end to end without a live tenancy.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use cloudpilot_core::presentation::{OutputFormat, Presentation};
use cloudpilot_core::results::AttrMap;
use cloudpilot_engine::capabilities::{
    CloudCallError, CloudClientFactory, CloudConfig, CredentialBlob, ServiceClient,
};
use cloudpilot_engine::{
    CancelToken, EmbeddingClient, Engine, EngineConfig, EngineError, LmGateway, MemoryVectorStore,
    ProviderConfig, TurnOutcome, TurnRequest,
};

/// Tenancy copilot: natural-language cloud operations.
#[derive(Parser)]
#[command(name = "cloudpilot", about = "Tenancy copilot: natural-language cloud operations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session.
    Chat {
        /// Directory for persisted memory files.
        #[arg(long, default_value = "memory")]
        memory_dir: PathBuf,

        /// Directory of prompt templates.
        #[arg(long, default_value = "prompts")]
        prompts_dir: PathBuf,

        /// Answer from indexed tenancy documents when possible.
        #[arg(long)]
        retrieval: bool,

        /// JSON file of canned resources served to list operations.
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloudpilot=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat {
            memory_dir,
            prompts_dir,
            retrieval,
            fixtures,
        } => {
            let exit_code = run_chat(memory_dir, prompts_dir, retrieval, fixtures).await;
            process::exit(exit_code);
        }
    }
}

async fn run_chat(
    memory_dir: PathBuf,
    prompts_dir: PathBuf,
    retrieval: bool,
    fixtures: Option<PathBuf>,
) -> i32 {
    let providers = providers_from_env();
    if providers.is_empty() {
        eprintln!(
            "Error: no provider configured. Set CLOUDPILOT_API_BASE_URL, \
             CLOUDPILOT_API_KEY and CLOUDPILOT_MODEL."
        );
        return 2;
    }

    let credentials = credentials_from_env();
    let embedder = Arc::new(EmbeddingClient::new(
        providers[0].base_url.clone(),
        providers[0].api_key.clone(),
        std::env::var("CLOUDPILOT_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
    ));
    let vector_store = Arc::new(MemoryVectorStore::new());
    let factory: Arc<dyn CloudClientFactory> = match fixtures {
        Some(path) => match FixtureClientFactory::load(&path) {
            Ok(factory) => Arc::new(factory),
            Err(err) => {
                eprintln!("Error: failed to load fixtures '{}': {err}", path.display());
                return 3;
            }
        },
        None => Arc::new(FixtureClientFactory::empty()),
    };

    let engine = match Engine::new(
        EngineConfig {
            memory_dir,
            prompts_dir,
        },
        &credentials,
        Arc::new(LmGateway::new(providers)),
        embedder,
        vector_store,
        factory,
    ) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("Error: engine initialization failed: {err}");
            return 2;
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancelToken::new();
    let stdin = std::io::stdin();
    let mut pending: Option<TurnOutcome> = None;

    println!("cloudpilot ready. Type a request, or 'exit' to quit.");
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let outcome = match pending.take() {
            Some(TurnOutcome::AwaitingInput(state)) => {
                engine.resume_turn(*state, input, &cancel, None).await
            }
            _ => {
                engine
                    .run_turn(
                        TurnRequest {
                            user_input: input.to_string(),
                            session_id: session_id.clone(),
                            use_retrieval: retrieval,
                            chat_history: Vec::new(),
                        },
                        &cancel,
                        None,
                    )
                    .await
            }
        };

        if let Some(presentation) = outcome.presentation() {
            render(presentation);
        }
        if matches!(outcome, TurnOutcome::AwaitingInput(_)) {
            pending = Some(outcome);
        }
    }
    0
}

fn render(presentation: &Presentation) {
    println!("\n{}\n", presentation.summary);
    if presentation.format == OutputFormat::Table && !presentation.data.is_empty() {
        println!("{}", presentation.columns.join(" | "));
        for row in &presentation.data {
            let cells: Vec<String> = presentation
                .columns
                .iter()
                .map(|column| {
                    row.get(column)
                        .map(render_cell)
                        .unwrap_or_else(|| "-".to_string())
                })
                .collect();
            println!("{}", cells.join(" | "));
        }
        println!();
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn providers_from_env() -> Vec<ProviderConfig> {
    let mut providers = Vec::new();
    if let (Ok(base_url), Ok(api_key)) = (
        std::env::var("CLOUDPILOT_API_BASE_URL"),
        std::env::var("CLOUDPILOT_API_KEY"),
    ) {
        let powerful = std::env::var("CLOUDPILOT_MODEL").unwrap_or_default();
        let fast = std::env::var("CLOUDPILOT_FAST_MODEL").unwrap_or_else(|_| powerful.clone());
        if !powerful.is_empty() {
            providers.push(ProviderConfig {
                name: "primary".to_string(),
                base_url,
                api_key,
                fast_model: fast,
                powerful_model: powerful,
            });
        }
    }
    if let (Ok(base_url), Ok(api_key), Ok(model)) = (
        std::env::var("CLOUDPILOT_FALLBACK_BASE_URL"),
        std::env::var("CLOUDPILOT_FALLBACK_API_KEY"),
        std::env::var("CLOUDPILOT_FALLBACK_MODEL"),
    ) {
        providers.push(ProviderConfig {
            name: "fallback".to_string(),
            base_url,
            api_key,
            fast_model: model.clone(),
            powerful_model: model,
        });
    }
    providers
}

fn credentials_from_env() -> CredentialBlob {
    CredentialBlob {
        tenancy: std::env::var("OCI_TENANCY").unwrap_or_default(),
        user: std::env::var("OCI_USER").unwrap_or_default(),
        fingerprint: std::env::var("OCI_FINGERPRINT").unwrap_or_default(),
        region: std::env::var("OCI_REGION").unwrap_or_else(|_| "us-ashburn-1".to_string()),
        key_file: std::env::var("OCI_KEY_FILE").ok(),
        key_content: None,
        namespace: std::env::var("OCI_NAMESPACE").ok(),
    }
}

/// Serves list operations from a JSON fixture file:
/// `{"service.operation": [{...attr maps...}]}`.
struct FixtureClientFactory {
    fixtures: Arc<HashMap<String, Vec<AttrMap>>>,
}

impl FixtureClientFactory {
    fn empty() -> Self {
        FixtureClientFactory {
            fixtures: Arc::new(HashMap::new()),
        }
    }

    fn load(path: &PathBuf) -> Result<Self, String> {
        let text = std::fs::read_to_string(path).map_err(|err| err.to_string())?;
        let fixtures: HashMap<String, Vec<AttrMap>> =
            serde_json::from_str(&text).map_err(|err| err.to_string())?;
        Ok(FixtureClientFactory {
            fixtures: Arc::new(fixtures),
        })
    }
}

impl CloudClientFactory for FixtureClientFactory {
    fn client(
        &self,
        service: &str,
        _config: &CloudConfig,
    ) -> Result<Arc<dyn ServiceClient>, EngineError> {
        Ok(Arc::new(FixtureClient {
            service: service.to_string(),
            fixtures: Arc::clone(&self.fixtures),
        }))
    }
}

struct FixtureClient {
    service: String,
    fixtures: Arc<HashMap<String, Vec<AttrMap>>>,
}

#[async_trait]
impl ServiceClient for FixtureClient {
    async fn invoke(
        &self,
        operation: &str,
        params: &AttrMap,
    ) -> Result<Vec<AttrMap>, CloudCallError> {
        let key = format!("{}.{operation}", self.service);
        match self.fixtures.get(&key) {
            Some(rows) => {
                // Compartment-scoped listings filter on compartment_id when
                // the fixture rows carry one.
                let scoped = params.get("compartment_id").and_then(|v| v.as_str());
                Ok(rows
                    .iter()
                    .filter(|row| match (scoped, row.get("compartment_id")) {
                        (Some(want), Some(have)) => have.as_str() == Some(want),
                        _ => true,
                    })
                    .cloned()
                    .collect())
            }
            None => Err(CloudCallError::new(
                Some(404),
                format!("no fixture for {key}"),
            )),
        }
    }
}
