use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use agent::config;
use agent::pump::{PumpConsumer, WsPump};
use agent::router::MessageRouter;
use agent::stubs::{
    LoggingDispatcher, NullCommentaryRepository, NullConversationRepository,
    NullMemoryUsageRepository, NullMessageRepository, NullReasoningStepRepository,
    NullSentenceRepository, NullToolUseRepository,
};
use transport_core::{GenerationRegistry, ProtocolHandler, ProtocolHandlerDeps};
use transport_proto::ResponseGenerationRequest;

/// Bridges `ResponseGenerationRequest`s off the upstream pump's read loop to
/// the business dispatcher. `GenerateResponse` itself is out of scope here;
/// this only logs the request so the wiring is observable.
struct GenerationRequestConsumer;

#[async_trait]
impl PumpConsumer for GenerationRequestConsumer {
    async fn on_response_generation_request(&self, request: ResponseGenerationRequest) {
        info!(
            conversation_id = %request.conversation_id,
            message_id = %request.message_id,
            "response generation requested (no GenerateResponse use case wired)"
        );
    }

    async fn on_connected(&self) {
        info!("upstream pump connected");
    }

    async fn on_disconnected(&self) {
        info!("upstream pump disconnected");
    }
}

/// Periodically reaps generation/TTS entries that have outlived
/// `stale_threshold` — a generation whose owning task died without
/// unregistering itself otherwise pins its cancel handle forever.
fn spawn_stale_generation_reaper(registry: Arc<GenerationRegistry>, stale_threshold: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stale_threshold);
        loop {
            ticker.tick().await;
            let generations = registry.cleanup_stale_generations(stale_threshold).await;
            let tts = registry.cleanup_stale_tts(stale_threshold).await;
            if generations > 0 || tts > 0 {
                info!(generations, tts, "reaped stale generation/TTS entries");
            }
        }
    });
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "agent starting");

    let cfg = match config::load_config() {
        Ok(cfg) => {
            info!(upstream_url = %cfg.upstream.url, "config loaded");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let handler = Arc::new(ProtocolHandler::new(
        "default",
        ProtocolHandlerDeps {
            conversation_repo: Arc::new(NullConversationRepository),
            message_repo: Arc::new(NullMessageRepository),
            sentence_repo: Arc::new(NullSentenceRepository),
            reasoning_repo: Arc::new(NullReasoningStepRepository),
            tool_use_repo: Arc::new(NullToolUseRepository),
            memory_usage_repo: Arc::new(NullMemoryUsageRepository),
            commentary_repo: Arc::new(NullCommentaryRepository),
        },
    ));

    let registry = Arc::new(GenerationRegistry::new());
    spawn_stale_generation_reaper(registry.clone(), cfg.generation.stale_threshold);

    let _router = Arc::new(MessageRouter::new(
        handler.clone(),
        registry.clone(),
        Arc::new(LoggingDispatcher),
        None,
        None,
        16_000,
        1,
    ));

    let pump = WsPump::new(cfg.upstream.clone(), Arc::new(GenerationRequestConsumer));
    pump.connect();

    info!("agent running; waiting for shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }

    info!("agent shutting down");
    pump.disconnect().await;
}
