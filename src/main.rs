//! Patent Cascade - Server Entry Point

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use patent_cascade::api::{build_router, AppState};
use patent_cascade::config::Config;
use patent_cascade::services::llm::{AnthropicProvider, LlmGateway};
use patent_cascade::services::prompts::{PromptEngine, PromptStore, UserPromptStore};
use patent_cascade::services::tasks::JobManager;
use patent_cascade::services::templates::TemplateRegistry;
use patent_cascade::services::workflow::WorkflowEngine;
use patent_cascade::storage::ConversationStore;
use patent_cascade::AppResult;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patent_cascade=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "服务器启动失败");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    let config = Arc::new(Config::from_env()?);
    config.ensure_directories()?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        workers = config.tasks.max_workers,
        model = %config.llm.model,
        "启动专利生成服务器"
    );

    // Storage and the two explicitly-lifecycled singletons.
    let store = ConversationStore::open(&config.storage.conversations_db_path)?;
    let user_prompts = Arc::new(UserPromptStore::new(config.storage.user_prompts_path.clone()));
    let prompt_store = Arc::new(PromptStore::new(config.storage.prompts_dir.clone()));
    let templates = Arc::new(TemplateRegistry::new(config.storage.templates_dir.clone()));

    // Gateway and engines.
    let provider = Arc::new(AnthropicProvider::new(config.llm.clone()));
    let gateway = Arc::new(LlmGateway::new(provider, &config.llm));
    let prompt_engine = Arc::new(PromptEngine::new(
        user_prompts.clone(),
        prompt_store,
        templates.clone(),
        config.llm.max_input_length,
    ));
    let engine = Arc::new(WorkflowEngine::new(
        gateway,
        prompt_engine,
        store.clone(),
        templates.clone(),
        config.analysis.clone(),
        config.storage.output_dir.clone(),
    ));

    let manager = JobManager::start(config.tasks.clone(), engine.clone());

    let state = AppState {
        config: config.clone(),
        manager,
        engine,
        store,
        user_prompts,
        templates,
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "服务器已就绪");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已关闭");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，开始关闭");
}
