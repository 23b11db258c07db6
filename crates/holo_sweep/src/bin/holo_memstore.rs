//! Standalone in-memory RESP store, useful as a local target for holo-sweep.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use holo_sweep::mem_server::{MemServer, MemStore};
use holo_sweep::store::Credentials;

#[derive(Parser, Debug)]
#[command(name = "holo-memstore")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:16379")]
    listen: SocketAddr,

    /// Require AUTH with this user (needs --password).
    #[arg(long, requires = "password")]
    user: Option<String>,

    #[arg(long, requires = "user")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let store = match (args.user, args.password) {
        (Some(user), Some(password)) => MemStore::with_credentials(Credentials { user, password }),
        _ => MemStore::new(),
    };
    let server = MemServer::start(args.listen, Arc::new(store)).await?;
    tracing::info!(addr = %server.addr, "mem store listening");

    tokio::signal::ctrl_c().await?;
    server.shutdown();
    tracing::info!(keys = server.store.len(), "mem store stopped");
    Ok(())
}
