use async_trait::async_trait;
use clap::{Parser, Subcommand};
use rangecore::data_store::Namespace;
use rangecore::error::CoreError;
use rangecore::error::Result as CoreResult;
use rangecore::replication::{CancelSignal, ReplicationTransport, TcpTransport};
use rangecore::storage_core::{Instruction, Role};
use rangecore::{CoreConfig, CoreIdentity, ReplicationTimeouts, StorageCore};
use std::error::Error;
use std::net::SocketAddr;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "rangecore")]
#[command(about = "Replicated per-core storage engine", long_about = None)]
struct Cli {
    /// Core directory root.
    #[arg(long, default_value = "./rangecore-data")]
    db_path: PathBuf,

    /// mpu/core identity used to tag this process's RPCs.
    #[arg(long, default_value = "local")]
    mpu_id: String,
    #[arg(long, default_value = "0")]
    core_id: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Put one key/value at a given clock, as the primary.
    Put {
        clock: u64,
        key: String,
        value: String,
    },
    /// Read a key from the data store.
    Get { key: String },
    /// List every key/value pair in the data namespace.
    Scan,
    /// Create a local checkpoint and prune to the configured retention.
    Backup,
    /// Ship the latest local checkpoint to a remote core and swap it in.
    TransferTo {
        /// Address of the remote core's `serve` listener.
        addr: SocketAddr,
        mpu_id: String,
        core_id: String,
    },
    /// Run a TCP listener so another process can `transfer-to` this core.
    Serve {
        #[arg(long, default_value = "127.0.0.1:4795")]
        listen: SocketAddr,
    },
}

/// Fails fast on every call. Commands that never initiate a transfer still
/// need a `ReplicationTransport` to open a `StorageCore`, but have no peer to talk to.
struct NoTransport;

#[async_trait]
impl ReplicationTransport for NoTransport {
    async fn receive_backup(&self, _target: &CoreIdentity) -> CoreResult<PathBuf> {
        Err(CoreError::Transfer("no transport configured".to_string()))
    }

    async fn apply_backup(&self, _target: &CoreIdentity) -> CoreResult<()> {
        Err(CoreError::Transfer("no transport configured".to_string()))
    }

    async fn stream_file(
        &self,
        _target: &CoreIdentity,
        _local_path: &Path,
        _remote_relative_path: &Path,
        _cancel: CancelSignal,
    ) -> CoreResult<()> {
        Err(CoreError::Transfer("no transport configured".to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let identity = CoreIdentity::new(
        cli.mpu_id.clone(),
        cli.core_id.clone(),
        "rangecore-cli",
        "local",
    );
    let config = CoreConfig::new(cli.db_path.clone());

    let transport: Arc<dyn ReplicationTransport> = match &cli.command {
        Commands::TransferTo { addr, .. } => {
            Arc::new(TcpTransport::new(*addr, ReplicationTimeouts::default()))
        }
        _ => Arc::new(NoTransport),
    };

    let core = StorageCore::open(identity, config, transport).await?;

    match cli.command {
        Commands::Put { clock, key, value } => {
            core.set_role(Role::Primary).await?;
            let mut writer = core.writer(Instruction {
                clock,
                payload: Vec::new(),
            });
            writer.put(key.into_bytes(), value.into_bytes());
            core.flush(writer).await?;
            core.tick(clock)?;
            println!("ok");
        }
        Commands::Get { key } => match core.get(key.as_bytes()).await? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
        Commands::Scan => {
            let store = core.reader().await;
            for entry in store.scan(Namespace::Data, Bound::Unbounded, Bound::Unbounded)? {
                let (key, value) = entry?;
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Backup => {
            core.backup().await?;
            println!("backup created");
        }
        Commands::TransferTo {
            addr,
            mpu_id,
            core_id,
        } => {
            let follower = CoreIdentity::new(mpu_id, core_id, "remote", addr.to_string());
            let (_tx, cancel) = watch::channel(false);
            core.transfer_to(&follower, cancel).await?;
            println!("transfer complete");
        }
        Commands::Serve { listen } => {
            let listener = tokio::net::TcpListener::bind(listen).await?;
            println!("serving on {listen}");
            rangecore::replication::serve(listener, core).await?;
        }
    }

    Ok(())
}
