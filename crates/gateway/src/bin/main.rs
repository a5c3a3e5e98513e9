// Nodegate - Ledger node RPC gateway
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Nodegate Server
//!
//! An RPC gateway that sits between wallet clients and a ledger node. Every flag can also be
//! given through a `NODEGATE_*` environment variable or a `.env` file.

use clap::Parser;
use eyre::Result;
use nodegate_common::{env, init_logging};
use nodegate_gateway::{
    dpow::DEFAULT_DPOW_URL, proxy::DEFAULT_NODE_URL, reps::DEFAULT_REPS_URL, CacheBackendKind,
    GatewayServerBuilder,
};
use std::{net::IpAddr, net::SocketAddr, path::PathBuf, str::FromStr};
use tracing::info;

/// Nodegate ledger node RPC gateway
#[derive(Parser, Debug)]
#[command(name = "nodegate")]
#[command(about = "Caching RPC gateway in front of a ledger node")]
#[command(version)]
struct Args {
    // ========== General Configuration ==========
    /// Address to bind to
    /// Example: --host 0.0.0.0
    #[arg(long, env = env::NODEGATE_HOST, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = env::NODEGATE_PORT, default_value = "9950")]
    port: u16,

    /// Primary node RPC URL
    #[arg(long, env = env::NODEGATE_NODE_URL, default_value = DEFAULT_NODE_URL)]
    node_url: String,

    /// Node RPC URL for work_generate and representatives_online (default: --node-url)
    #[arg(long, env = env::NODEGATE_WORK_URL)]
    work_url: Option<String>,

    // ========== Cache Configuration ==========
    /// Cache backend
    #[arg(
        long,
        env = env::NODEGATE_CACHE_BACKEND,
        value_enum,
        default_value_t = CacheBackendKind::Memory
    )]
    cache_backend: CacheBackendKind,

    /// Maximum number of entries kept by the memory backend
    #[arg(long, env = env::NODEGATE_CACHE_CAPACITY, default_value = "10000")]
    cache_capacity: usize,

    /// Cache file of the disk backend (default: ~/.nodegate/cache/gateway.json)
    #[arg(long, env = env::NODEGATE_CACHE_FILE)]
    cache_file: Option<PathBuf>,

    /// Cache save interval in minutes (0 = save only on shutdown)
    #[arg(long, env = env::NODEGATE_CACHE_SAVE_INTERVAL, default_value = "5")]
    cache_save_interval: u64,

    // ========== Proof-of-work Delegate Configuration ==========
    /// Send work_generate to the proof-of-work service instead of the node
    #[arg(long, env = env::NODEGATE_DPOW)]
    dpow: bool,

    /// Proof-of-work service URL
    #[arg(long, env = env::NODEGATE_DPOW_URL, default_value = DEFAULT_DPOW_URL)]
    dpow_url: String,

    /// Proof-of-work service user
    #[arg(long, env = env::NODEGATE_DPOW_USER)]
    dpow_user: Option<String>,

    /// Proof-of-work service API key
    #[arg(long, env = env::NODEGATE_DPOW_KEY, hide_env_values = true)]
    dpow_key: Option<String>,

    // ========== External Sources ==========
    /// Directory of recommended representatives
    #[arg(long, env = env::NODEGATE_REPS_URL, default_value = DEFAULT_REPS_URL)]
    reps_url: String,

    /// Timestamp service used to enrich history, pending and block responses
    #[arg(long, env = env::NODEGATE_TIMESTAMPS_URL)]
    timestamps_url: Option<String>,

    // ========== Logging ==========
    /// Also write logs to a daily rolling file
    #[arg(long)]
    file_logging: bool,

    /// Verbosity level (repeat for more: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let args = Args::parse();

    // Set RUST_LOG based on verbosity
    if std::env::var("RUST_LOG").is_err() {
        let level = match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }

    init_logging("nodegate", args.file_logging)?;

    let mut builder = GatewayServerBuilder::new()
        .node_url(args.node_url)
        .cache_backend(args.cache_backend)
        .cache_capacity(args.cache_capacity)
        .cache_save_interval(args.cache_save_interval)
        .dpow(args.dpow)
        .dpow_url(args.dpow_url)
        .reps_url(args.reps_url);

    if let Some(work_url) = args.work_url {
        builder = builder.work_url(work_url);
    }

    if let Some(cache_file) = args.cache_file {
        builder = builder.cache_file(cache_file);
    }

    if let (Some(user), Some(key)) = (args.dpow_user, args.dpow_key) {
        builder = builder.dpow_credentials(user, key);
    }

    if let Some(url) = args.timestamps_url {
        builder = builder.timestamps_url(url);
    }

    let gateway = builder.build().await?;

    let ip = IpAddr::from_str(&args.host)?;
    let addr = SocketAddr::from((ip, args.port));

    // Set up shutdown signal handling
    let server = gateway.clone();
    tokio::select! {
        result = server.serve(addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    // Stop background tasks and save the cache before exiting
    gateway.stop().await;
    gateway.flush().await;

    Ok(())
}
