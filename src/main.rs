//! Local LLM web server using WGPU
//!
//! (c) Softlandia 2025

use tokio_llm_gate::api;
use tokio_llm_gate::config::ServerConfig;
use tokio_llm_gate::core::services::{ModelGate, ModelSlot};
use tokio_llm_gate::infrastructure::llama::serve_model;

use anyhow::anyhow;
use axum::http::{HeaderValue, Method};
use di::{Injectable, Ref, ServiceCollection, singleton_factory};
use di_axum::RouterServiceProviderExtensions;
use log::info;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    // Empty until the model worker has loaded the model.
    let slot: Ref<ModelSlot> = Arc::new(ModelSlot::empty());

    let model_join_handle = runtime.spawn(serve_model(config.model.clone(), slot.clone()));
    let web_task_handle = runtime.spawn(web_server_task(config, slot));

    runtime.block_on(async {
        let served = web_task_handle.await;
        model_join_handle.abort();
        served??;
        Ok::<(), anyhow::Error>(())
    })
}

async fn web_server_task(config: ServerConfig, slot: Ref<ModelSlot>) -> anyhow::Result<()> {
    let provider = ServiceCollection::new()
        .add(singleton_factory(move |_| slot.clone()))
        .add(ModelGate::transient())
        .build_provider()
        .map_err(|e| anyhow!("invalid service registrations: {e:?}"))?;

    let origins = config
        .cors_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    let app = api::router()
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_origin(AllowOrigin::list(origins)),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");

    Ok(())
}
