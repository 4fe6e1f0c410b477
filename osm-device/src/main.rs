//! Entry point: parses CLI args, opens the persistent store, and hands the
//! core off to the chosen transport.

use clap::{Parser, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Transport {
    Tcp,
    BleStub,
}

/// Offline Secure Messenger core, simulated over a host TCP transport.
#[derive(Parser, Debug)]
#[command(name = "osm-device")]
struct Args {
    /// TCP port the companion-app simulator listens on.
    #[arg(long, default_value_t = 7878)]
    port: u16,

    /// Directory holding this instance's journaled store. Defaults to the
    /// current directory so multiple instances can be run from separate
    /// working directories with fully independent state.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Which transport adapter to run.
    #[arg(long, value_enum, default_value_t = Transport::Tcp)]
    transport: Transport,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let args = Args::parse();

    let core = match osm_core::OsmCore::open(&args.data_dir) {
        Ok(core) => core,
        Err(e) => {
            tracing::error!(error = %e, "failed to open persistent store");
            return ExitCode::FAILURE;
        }
    };

    match args.transport {
        Transport::Tcp => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
            if let Err(e) = osm_transport::tcp::serve(addr, core).await {
                tracing::error!(error = %e, "transport exited");
                return ExitCode::FAILURE;
            }
        }
        Transport::BleStub => {
            tracing::warn!("ble-stub transport has no physical radio backend in this build; idling");
        }
    }

    ExitCode::SUCCESS
}
