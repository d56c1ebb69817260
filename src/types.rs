use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{METAMASK_INSTALL_URL, PHANTOM_INSTALL_URL};

/// Which injected wallet family a session is bound to.
///
/// Exactly one may be active at a time; the kind decides address format
/// (base58 public key vs hex account) and the native balance unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Solana,
    Ethereum,
}

impl ProviderKind {
    /// Install page offered to the user when the provider is absent.
    pub fn install_url(&self) -> &'static str {
        match self {
            ProviderKind::Solana => PHANTOM_INSTALL_URL,
            ProviderKind::Ethereum => METAMASK_INSTALL_URL,
        }
    }

    /// Ticker for the native unit the balance is denominated in.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            ProviderKind::Solana => "SOL",
            ProviderKind::Ethereum => "ETH",
        }
    }

    /// Flagship extension name for this family, used when no provider
    /// object is present to ask.
    pub fn extension_name(&self) -> &'static str {
        match self {
            ProviderKind::Solana => "Phantom",
            ProviderKind::Ethereum => "MetaMask",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Solana => write!(f, "solana"),
            ProviderKind::Ethereum => write!(f, "ethereum"),
        }
    }
}

/// Session lifecycle state.
///
/// `Reconnecting` is the silent startup authorization in flight; the UI
/// renders it exactly like `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Notification out of an injected provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The authorized account set changed. Empty means the user
    /// disconnected the site from the wallet side.
    AccountsChanged(Vec<String>),
    /// The provider revoked the session entirely.
    Disconnected,
}

/// Lifecycle event broadcast to UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { address: String },
    Disconnected,
}

/// Point-in-time view of the session, published on every change.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub provider: Option<ProviderKind>,
    /// Present iff `status == Connected`.
    pub address: Option<String>,
    /// Last successfully polled balance in lamports or wei.
    pub balance: Option<u128>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Disconnected,
            provider: None,
            address: None,
            balance: None,
        }
    }
}

/// Persisted session record, written after every grant so returning
/// users can be reconnected silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSession {
    pub provider: ProviderKind,
    pub address: String,
}

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Error,
    Warning,
    Info,
}

/// A single user-facing notice, emitted as one JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub timestamp: String,
    pub level: Level,
    pub message: String,
}

/// Failures surfaced to the notification sink.
///
/// None of these are fatal to the embedding page; each is caught at the
/// boundary of the async operation that produced it.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{} wallet is not installed", .0.extension_name())]
    ProviderNotInstalled(ProviderKind),
    #[error("wallet connection was rejected")]
    UserRejected,
    #[error("wallet connection lost")]
    ConnectionLost,
    #[error("balance fetch failed: {0}")]
    BalanceFetchFailed(String),
}

/// How an authorization request resolved.
#[derive(Debug, Error)]
pub enum AuthorizeError {
    /// The user declined the request in the wallet popup.
    #[error("authorization rejected by user")]
    Rejected,
    /// Silent authorization found no standing trust. Never surfaced to
    /// the user.
    #[error("no standing trust for silent authorization")]
    NotTrusted,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
