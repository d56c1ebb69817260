//! Scripted end-to-end probe of the wallet session lifecycle.
//!
//! Drives the full state machine against simulated providers without
//! user interaction: silent reconnect miss, explicit connect, balance
//! poll, provider switch, account change, provider-side revoke.
//! Lifecycle events are collected and summarized at the end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use harvest_wallet::notify::StdoutNotifier;
use harvest_wallet::provider::ProviderRegistry;
use harvest_wallet::session::{SessionHandle, WalletSession};
use harvest_wallet::sim::SimProvider;
use harvest_wallet::store::SessionStore;
use harvest_wallet::types::{ProviderKind, SessionSnapshot, SessionStatus};
use harvest_wallet::ui;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let session_file = std::env::temp_dir().join("harvest-wallet-probe.json");
    let _ = std::fs::remove_file(&session_file);

    let phantom = SimProvider::solana();
    let metamask = SimProvider::ethereum();
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(phantom.clone()));
    registry.register(Arc::new(metamask.clone()));

    let handle = WalletSession::spawn(
        registry,
        SessionStore::new(&session_file),
        Box::new(StdoutNotifier::new()),
        Duration::from_secs(1),
    );
    let mut events = handle.subscribe();

    println!("=== Wallet Session Lifecycle Probe ===");
    println!();

    println!("--- Silent reconnect with no saved session ---");
    handle.auto_reconnect().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    report(&handle.snapshot());

    println!("--- Connect Phantom ---");
    handle.connect(ProviderKind::Solana).await;
    wait_for(&handle, |s| s.status == SessionStatus::Connected).await?;
    report(&handle.snapshot());

    println!("--- First balance poll ---");
    wait_for(&handle, |s| s.balance.is_some()).await?;
    report(&handle.snapshot());

    println!("--- Switch to MetaMask ---");
    handle.connect(ProviderKind::Ethereum).await;
    wait_for(&handle, |s| {
        s.status == SessionStatus::Connected && s.provider == Some(ProviderKind::Ethereum)
    })
    .await?;
    wait_for(&handle, |s| s.balance.is_some()).await?;
    report(&handle.snapshot());
    println!("phantom release calls: {}", phantom.release_calls());

    println!("--- Provider-side account change ---");
    metamask.emit_accounts_changed(vec![
        "0x1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c".to_string(),
    ]);
    wait_for(&handle, |s| {
        s.address.as_deref() == Some("0x1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c")
    })
    .await?;
    report(&handle.snapshot());

    println!("--- Provider-side revoke ---");
    metamask.emit_disconnected();
    wait_for(&handle, |s| s.status == SessionStatus::Disconnected).await?;
    report(&handle.snapshot());

    println!();
    println!("=== Summary ===");
    let mut connected = 0u32;
    let mut disconnected = 0u32;
    while let Ok(event) = events.try_recv() {
        match event {
            harvest_wallet::types::SessionEvent::Connected { address } => {
                connected += 1;
                println!("connected event: {address}");
            }
            harvest_wallet::types::SessionEvent::Disconnected => {
                disconnected += 1;
                println!("disconnected event");
            }
        }
    }
    println!("total: {connected} connected, {disconnected} disconnected");
    println!("balance queries: phantom={} metamask={}", phantom.balance_calls(), metamask.balance_calls());

    let _ = std::fs::remove_file(&session_file);
    handle.shutdown().await;
    println!("=== Probe Complete ===");
    Ok(())
}

fn report(snapshot: &SessionSnapshot) {
    println!(
        "  status={:?} button=\"{}\"",
        snapshot.status,
        ui::button_label(snapshot)
    );
    println!();
}

async fn wait_for(
    handle: &SessionHandle,
    pred: impl Fn(&SessionSnapshot) -> bool,
) -> Result<SessionSnapshot> {
    let mut rx = handle.watch();
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.expect("session task died");
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for session state"))
}
