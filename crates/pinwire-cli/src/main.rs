use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use pinwire_transport::DirectDialer;

mod commands;

#[derive(Parser)]
#[command(
    name = "pinwire",
    about = "pinwire: pinned-certificate server connectivity",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Connect and socket I/O timeout in seconds (0 disables)
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a server's leaf certificate for pinning.
    ///
    /// The certificate is accepted without any verification. Compare the
    /// printed fingerprint with one obtained out of band before trusting it.
    DownloadCert {
        /// Server address (host:port)
        address: String,
        /// Write the PEM to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Check that servers are reachable and answer server.version.
    ///
    /// Probes ADDRESS if given, otherwise every server in the config file.
    Check {
        /// Server address (host:port)
        address: Option<String>,
        /// Connect with TLS (requires --cert)
        #[arg(long, requires = "cert")]
        tls: bool,
        /// Pinned certificate PEM file
        #[arg(long)]
        cert: Option<PathBuf>,
        /// Config file listing servers
        #[arg(short, long, default_value = "pinwire.toml")]
        config: PathBuf,
    },
}

fn dialer(timeout_secs: u64) -> DirectDialer {
    let dialer = DirectDialer::new();
    if timeout_secs == 0 {
        return dialer;
    }
    let timeout = Duration::from_secs(timeout_secs);
    dialer.with_connect_timeout(timeout).with_io_timeout(timeout)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pinwire=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dialer = dialer(cli.timeout);

    match cli.command {
        Commands::DownloadCert { address, out } => {
            commands::cert::download(&address, out.as_deref(), dialer)
        }
        Commands::Check {
            address,
            tls,
            cert,
            config,
        } => {
            let target = match address {
                Some(address) => commands::check::Target::Single {
                    address,
                    tls,
                    cert,
                },
                None => commands::check::Target::Config(config),
            };
            commands::check::check(target, dialer)
        }
    }
}
