use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::provider::WalletProvider;
use crate::rpc::SolanaRpc;
use crate::types::{AuthorizeError, ProviderEvent, ProviderKind};

/// Scriptable stand-in for a browser wallet extension.
///
/// Used by the demo binaries and the session tests. Approval, standing
/// trust, release failures and provider-side events are all injectable,
/// and call counts are observable. Balance queries answer from a local
/// value unless a real RPC client is attached.
#[derive(Clone)]
pub struct SimProvider {
    inner: Arc<Inner>,
}

struct Inner {
    kind: ProviderKind,
    name: &'static str,
    address: Mutex<String>,
    available: AtomicBool,
    trusted: AtomicBool,
    approve: AtomicBool,
    hold_authorization: AtomicBool,
    authorization_gate: Notify,
    fail_release: AtomicBool,
    fail_balance: AtomicBool,
    balance: AtomicU64,
    balance_calls: AtomicU64,
    release_calls: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ProviderEvent>>>,
    rpc: Mutex<Option<Arc<SolanaRpc>>>,
}

impl SimProvider {
    fn new(kind: ProviderKind, name: &'static str, address: &str, balance: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                name,
                address: Mutex::new(address.to_string()),
                available: AtomicBool::new(true),
                trusted: AtomicBool::new(false),
                approve: AtomicBool::new(true),
                hold_authorization: AtomicBool::new(false),
                authorization_gate: Notify::new(),
                fail_release: AtomicBool::new(false),
                fail_balance: AtomicBool::new(false),
                balance: AtomicU64::new(balance),
                balance_calls: AtomicU64::new(0),
                release_calls: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
                rpc: Mutex::new(None),
            }),
        }
    }

    /// Solana-family provider ("Phantom"), 2.5 SOL.
    pub fn solana() -> Self {
        Self::new(
            ProviderKind::Solana,
            "Phantom",
            "6Yw2QvUjkzA8rC4tBqFhPnXmG5eKDdL3sHpNvT1gWZa9",
            2_500_000_000,
        )
    }

    /// Ethereum-family provider ("MetaMask"), 0.75 ETH.
    pub fn ethereum() -> Self {
        Self::new(
            ProviderKind::Ethereum,
            "MetaMask",
            "0x5c3f1a9e2b8d4c7f6e0a1b2c3d4e5f6a7b8c9d0e",
            750_000_000_000_000_000,
        )
    }

    /// Answer balance queries from a real RPC endpoint instead of the
    /// local value.
    pub fn with_rpc(self, rpc: SolanaRpc) -> Self {
        *self.inner.rpc.lock().unwrap() = Some(Arc::new(rpc));
        self
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Whether the site holds standing trust for silent authorization.
    pub fn set_trusted(&self, trusted: bool) {
        self.inner.trusted.store(trusted, Ordering::SeqCst);
    }

    /// Whether the user approves the next authorization popup.
    pub fn set_approve(&self, approve: bool) {
        self.inner.approve.store(approve, Ordering::SeqCst);
    }

    pub fn set_address(&self, address: &str) {
        *self.inner.address.lock().unwrap() = address.to_string();
    }

    pub fn set_balance(&self, balance: u64) {
        self.inner.balance.store(balance, Ordering::SeqCst);
    }

    pub fn set_fail_balance(&self, fail: bool) {
        self.inner.fail_balance.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_release(&self, fail: bool) {
        self.inner.fail_release.store(fail, Ordering::SeqCst);
    }

    /// Park the next authorization until [`release_authorization`] is
    /// called, emulating a popup waiting for the user.
    ///
    /// [`release_authorization`]: SimProvider::release_authorization
    pub fn hold_authorization(&self) {
        self.inner.hold_authorization.store(true, Ordering::SeqCst);
    }

    pub fn release_authorization(&self) {
        self.inner.hold_authorization.store(false, Ordering::SeqCst);
        self.inner.authorization_gate.notify_one();
    }

    pub fn balance_calls(&self) -> u64 {
        self.inner.balance_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> u64 {
        self.inner.release_calls.load(Ordering::SeqCst)
    }

    /// Inject an `accountsChanged` notification.
    pub fn emit_accounts_changed(&self, accounts: Vec<String>) {
        self.emit(ProviderEvent::AccountsChanged(accounts));
    }

    /// Inject a provider-side disconnect.
    pub fn emit_disconnected(&self) {
        self.emit(ProviderEvent::Disconnected);
    }

    fn emit(&self, event: ProviderEvent) {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[async_trait]
impl WalletProvider for SimProvider {
    fn kind(&self) -> ProviderKind {
        self.inner.kind
    }

    fn name(&self) -> &str {
        self.inner.name
    }

    fn available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    async fn authorize(&self) -> Result<String, AuthorizeError> {
        if self.inner.hold_authorization.load(Ordering::SeqCst) {
            self.inner.authorization_gate.notified().await;
        }
        if !self.inner.approve.load(Ordering::SeqCst) {
            return Err(AuthorizeError::Rejected);
        }
        Ok(self.inner.address.lock().unwrap().clone())
    }

    async fn authorize_if_trusted(&self) -> Result<String, AuthorizeError> {
        if !self.inner.trusted.load(Ordering::SeqCst) {
            return Err(AuthorizeError::NotTrusted);
        }
        Ok(self.inner.address.lock().unwrap().clone())
    }

    async fn release(&self) -> Result<()> {
        self.inner.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_release.load(Ordering::SeqCst) {
            anyhow::bail!("simulated provider-side disconnect failure");
        }
        Ok(())
    }

    async fn balance(&self, address: &str) -> Result<u128> {
        self.inner.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_balance.load(Ordering::SeqCst) {
            anyhow::bail!("simulated balance failure");
        }
        let rpc = self.inner.rpc.lock().unwrap().clone();
        if let Some(rpc) = rpc {
            return Ok(u128::from(rpc.get_balance(address).await?));
        }
        Ok(u128::from(self.inner.balance.load(Ordering::SeqCst)))
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().unwrap().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authorize_respects_approval() {
        let sim = SimProvider::solana();
        assert!(sim.authorize().await.is_ok());
        sim.set_approve(false);
        assert!(matches!(sim.authorize().await, Err(AuthorizeError::Rejected)));
    }

    #[tokio::test]
    async fn silent_authorization_requires_trust() {
        let sim = SimProvider::ethereum();
        assert!(matches!(
            sim.authorize_if_trusted().await,
            Err(AuthorizeError::NotTrusted)
        ));
        sim.set_trusted(true);
        let address = sim.authorize_if_trusted().await.unwrap();
        assert!(address.starts_with("0x"));
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let sim = SimProvider::solana();
        let mut rx = sim.subscribe();
        sim.emit_disconnected();
        assert_eq!(rx.recv().await, Some(ProviderEvent::Disconnected));
    }

    #[tokio::test]
    async fn held_authorization_resolves_after_release() {
        let sim = SimProvider::solana();
        sim.hold_authorization();
        let task = {
            let sim = sim.clone();
            tokio::spawn(async move { sim.authorize().await })
        };
        sim.release_authorization();
        assert!(task.await.unwrap().is_ok());
    }
}
