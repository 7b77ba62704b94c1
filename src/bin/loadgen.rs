//! Load generator for the chat completion server.
//!
//! (c) Softlandia 2025

use clap::Parser;
use log::info;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_llm_gate::loadtest::{LoadClient, LoadStats, run_user};

#[derive(Parser, Debug)]
#[command(about = "Drive health checks and chat completions against a running server")]
struct Args {
    /// Base URL of the server
    #[arg(long, default_value = "http://localhost:3000")]
    host: String,

    /// Number of concurrent simulated users
    #[arg(long, default_value_t = 10)]
    users: usize,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let client = LoadClient::new(args.host.clone());
    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);

    info!(
        "starting {} users against {} for {}s",
        args.users, args.host, args.duration_secs
    );

    let mut users = JoinSet::new();
    for user in 0..args.users {
        users.spawn(run_user(user, client.clone(), deadline));
    }

    let mut stats = LoadStats::default();
    while let Some(result) = users.join_next().await {
        stats.merge(result?);
    }

    info!("{} requests sent", stats.total_requests());
    println!("{stats}");

    Ok(())
}
