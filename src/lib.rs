pub mod config;
pub mod notify;
pub mod provider;
pub mod rpc;
pub mod session;
pub mod sim;
pub mod store;
pub mod types;
pub mod ui;

/// Phantom install page, offered when the Solana-family provider is absent.
pub const PHANTOM_INSTALL_URL: &str = "https://phantom.app/";

/// MetaMask install page, offered when the Ethereum-family provider is absent.
pub const METAMASK_INSTALL_URL: &str = "https://metamask.io/";

/// Public Solana RPC endpoints, tried in order until one answers.
pub const SOLANA_RPC_ENDPOINTS: &[&str] = &[
    "https://api.devnet.solana.com",
    "https://solana-api.projectserum.com",
    "https://rpc.ankr.com/solana",
];
