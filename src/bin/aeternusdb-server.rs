//! Stand-alone TCP server binary wrapping an embedded [`Database`].
//!
//! ```text
//! aeternusdb-server --data-dir ./data --host 127.0.0.1 --port 7878
//! aeternusdb-server --data-dir ./data --join 127.0.0.1:7878
//! ```
//!
//! `--join` is a one-shot handshake (send one `IDENTIFY` frame to an
//! existing node), not a membership protocol — consensus and replication
//! are out of scope (see [`aeternusdb::net`]).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aeternusdb::engine::{DbConfig, Database};
use aeternusdb::net::Server;

#[derive(Debug, Parser)]
#[command(name = "aeternusdb-server", about = "Embedded LSM key-value store, served over TCP")]
struct Args {
    /// Directory the database's manifest, WALs, and SSTables live under.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Address to bind the TCP listener to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the TCP listener to.
    #[arg(long, default_value_t = 7878)]
    port: u16,

    /// Address of an existing node to send a one-shot IDENTIFY handshake to
    /// before starting this node's own listener.
    #[arg(long)]
    join: Option<String>,

    /// Node id announced in IDENTIFY frames. Defaults to the low 32 bits of
    /// the process id, which is unique enough for a single-host demo.
    #[arg(long)]
    node_id: Option<u32>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let node_id = args.node_id.unwrap_or_else(std::process::id);

    let db = Database::open(&args.data_dir, DbConfig::default())?;
    info!(data_dir = %args.data_dir.display(), node_id, "database opened");

    let addr = format!("{}:{}", args.host, args.port);
    let server = Server::start(&addr, db.clone())?;
    info!(addr = %server.local_addr(), "server started");

    if let Some(peer_addr) = &args.join {
        Server::join_peer(peer_addr, node_id)?;
    }

    wait_for_stdin_close();

    info!("shutting down");
    server.shutdown();
    db.close()?;
    Ok(())
}

/// Blocks until stdin closes (ctrl-d, or the terminal closing on ctrl-c).
fn wait_for_stdin_close() {
    use std::io::Read;
    let mut buf = [0u8; 1];
    while std::io::stdin().read(&mut buf).unwrap_or(0) > 0 {}
}
