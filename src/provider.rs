use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{AuthorizeError, ProviderEvent, ProviderKind};

/// Contract over a browser-injected wallet provider.
///
/// Isolates the provider-specific method names (`connect` /
/// `eth_requestAccounts` / `accountsChanged` / ...) behind one surface
/// the session can drive without knowing which family it is talking to.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Family this provider belongs to.
    fn kind(&self) -> ProviderKind;

    /// Human name used in notices ("Phantom", "MetaMask").
    fn name(&self) -> &str;

    /// Capability marker. A registered but unavailable provider is
    /// treated the same as one that is not installed.
    fn available(&self) -> bool {
        true
    }

    /// Request account authorization. May wait indefinitely for the
    /// user to act on the wallet popup.
    async fn authorize(&self) -> Result<String, AuthorizeError>;

    /// Request authorization only if the site already holds standing
    /// trust. Never prompts.
    async fn authorize_if_trusted(&self) -> Result<String, AuthorizeError>;

    /// Ask the provider to release its session. Providers without a
    /// disconnect capability just return Ok.
    async fn release(&self) -> Result<()>;

    /// Native balance for the given address, in lamports or wei.
    async fn balance(&self, address: &str) -> Result<u128>;

    /// Subscribe to provider notifications. The subscription lives as
    /// long as the returned receiver; dropping it ends it.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProviderEvent>;
}

/// Capability probe over the providers injected into the environment.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn WalletProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn WalletProvider>) {
        self.providers.push(provider);
    }

    /// First available provider of the requested family, if any.
    pub fn probe(&self, kind: ProviderKind) -> Option<Arc<dyn WalletProvider>> {
        self.providers
            .iter()
            .find(|p| p.kind() == kind && p.available())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProvider;

    #[test]
    fn probe_empty_registry() {
        let registry = ProviderRegistry::new();
        assert!(registry.probe(ProviderKind::Solana).is_none());
        assert!(registry.probe(ProviderKind::Ethereum).is_none());
    }

    #[test]
    fn probe_matches_family() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(SimProvider::solana()));
        assert!(registry.probe(ProviderKind::Solana).is_some());
        assert!(registry.probe(ProviderKind::Ethereum).is_none());
    }

    #[test]
    fn probe_skips_unavailable() {
        let sim = SimProvider::solana();
        sim.set_available(false);
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(sim));
        assert!(registry.probe(ProviderKind::Solana).is_none());
    }
}
