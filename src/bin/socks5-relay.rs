use anyhow::{Result, bail};
use clap::Parser;
use socks5_relay::{Socks5Server, UserPass};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "A small SOCKS5 proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "127.0.0.1:1080")]
    listen: String,

    /// Username for SOCKS5 proxy
    #[arg(short, long)]
    username: Option<String>,

    /// Password for SOCKS5 proxy
    #[arg(short, long)]
    password: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    // A lone username or password is almost certainly a typo
    if args.username.is_some() != args.password.is_some() {
        bail!("must provide both username and password (or neither)");
    }

    let auth = UserPass::from_parts(args.username, args.password);
    if auth.is_some() {
        info!("Authentication enabled");
    }

    // Instantiate server
    let server = Socks5Server::new(args.listen).with_auth(auth);

    // Run it
    info!("Starting SOCKS5 proxy: {}", server.listen_addr);
    server.run().await
}
