use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use harvest_wallet::config::{AppConfig, CONFIG_PATH};
use harvest_wallet::notify::StdoutNotifier;
use harvest_wallet::provider::ProviderRegistry;
use harvest_wallet::rpc::SolanaRpc;
use harvest_wallet::session::{SessionHandle, WalletSession};
use harvest_wallet::sim::SimProvider;
use harvest_wallet::store::SessionStore;
use harvest_wallet::types::{ProviderKind, SessionEvent};
use harvest_wallet::ui;

#[derive(Parser)]
#[command(name = "wallet-shell", about = "Interactive wallet session shell")]
struct Args {
    /// Config file path
    #[arg(long, default_value = CONFIG_PATH)]
    config: String,

    /// Override the session file path from the config
    #[arg(long)]
    session_file: Option<String>,

    /// Pretend the Phantom extension is not installed
    #[arg(long)]
    no_phantom: bool,

    /// Pretend the MetaMask extension is not installed
    #[arg(long)]
    no_metamask: bool,

    /// The simulated user already trusts this site (silent reconnect
    /// succeeds)
    #[arg(long)]
    trusted: bool,

    /// The simulated user rejects authorization popups
    #[arg(long)]
    reject: bool,

    /// Answer Solana balance queries from a real public RPC endpoint
    #[arg(long)]
    live_rpc: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load_or_default(Path::new(&args.config))?;
    let session_file = args
        .session_file
        .unwrap_or_else(|| config.settings.session_file.clone());

    let phantom = SimProvider::solana();
    let metamask = SimProvider::ethereum();
    if args.trusted {
        phantom.set_trusted(true);
        metamask.set_trusted(true);
    }
    if args.reject {
        phantom.set_approve(false);
        metamask.set_approve(false);
    }
    let phantom = if args.live_rpc {
        info!("Probing Solana RPC endpoints...");
        let rpc = SolanaRpc::connect(&config.rpc.endpoints).await?;
        info!("Using RPC endpoint {}", rpc.endpoint());
        phantom.with_rpc(rpc)
    } else {
        phantom
    };

    let mut registry = ProviderRegistry::new();
    if !args.no_phantom {
        registry.register(Arc::new(phantom.clone()));
    }
    if !args.no_metamask {
        registry.register(Arc::new(metamask.clone()));
    }

    let store = SessionStore::new(&session_file);
    info!(
        "Starting wallet shell — session file: {session_file}, poll: {}s",
        config.settings.poll_interval_secs
    );
    let handle = WalletSession::spawn(
        registry,
        SessionStore::new(&session_file),
        Box::new(StdoutNotifier::new()),
        Duration::from_secs(config.settings.poll_interval_secs),
    );

    // Returning users get one silent reconnect attempt; everyone else
    // sees the connect overlay (here: the help text).
    handle.auto_reconnect().await;
    if store.skipped() {
        info!("User previously chose to continue without a wallet");
    }

    print_help();
    let mut events = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    match event {
                        SessionEvent::Connected { address } => {
                            println!("event: wallet connected ({address})");
                        }
                        SessionEvent::Disconnected => println!("event: wallet disconnected"),
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !dispatch(&line, &handle, &phantom, &metamask, &store).await {
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn dispatch(
    line: &str,
    handle: &SessionHandle,
    phantom: &SimProvider,
    metamask: &SimProvider,
    store: &SessionStore,
) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => {}
        Some("connect") => match parts.next() {
            Some("phantom") | Some("solana") => handle.connect(ProviderKind::Solana).await,
            Some("metamask") | Some("ethereum") => handle.connect(ProviderKind::Ethereum).await,
            _ => println!("usage: connect <phantom|metamask>"),
        },
        Some("disconnect") => handle.disconnect().await,
        Some("skip") => {
            if let Err(e) = store.set_skipped(true) {
                println!("failed to save preference: {e}");
            } else {
                println!("Continuing without wallet connection");
            }
        }
        Some("status") => {
            let snapshot = handle.snapshot();
            println!("button: {}", ui::button_label(&snapshot));
            println!("status: {:?}", snapshot.status);
            if let Some(address) = &snapshot.address {
                println!("address: {address}");
            }
            if let (Some(kind), Some(raw)) = (snapshot.provider, snapshot.balance) {
                println!("balance: {} ({raw})", ui::format_native_balance(kind, raw));
            }
        }
        // The two commands below poke the simulated extensions, standing
        // in for actions taken inside the real wallet popup.
        Some("revoke") => match handle.snapshot().provider {
            Some(ProviderKind::Solana) => phantom.emit_disconnected(),
            Some(ProviderKind::Ethereum) => metamask.emit_disconnected(),
            None => println!("no active session to revoke"),
        },
        Some("switch-account") => match (handle.snapshot().provider, parts.next()) {
            (None, _) => println!("no active session"),
            (_, None) => println!("usage: switch-account <address>"),
            (Some(ProviderKind::Solana), Some(address)) => {
                phantom.emit_accounts_changed(vec![address.to_string()]);
            }
            (Some(ProviderKind::Ethereum), Some(address)) => {
                metamask.emit_accounts_changed(vec![address.to_string()]);
            }
        },
        Some("help") => print_help(),
        Some("quit") | Some("exit") => return false,
        Some(other) => println!("unknown command: {other} (try `help`)"),
    }
    true
}

fn print_help() {
    println!("commands:");
    println!("  connect <phantom|metamask>   request wallet authorization");
    println!("  disconnect                   end the session");
    println!("  status                       show button text and session state");
    println!("  skip                         continue without a wallet");
    println!("  revoke                       provider-side disconnect");
    println!("  switch-account <address>     provider-side account change");
    println!("  quit");
}
