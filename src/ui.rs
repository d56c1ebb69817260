use crate::types::{ProviderKind, SessionSnapshot, SessionStatus};

/// Shorten an address to its first and last four characters for the
/// wallet button.
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 8 {
        return address.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Render a raw lamport/wei amount in the family's native unit, four
/// decimal places, truncated.
pub fn format_native_balance(kind: ProviderKind, raw: u128) -> String {
    let unit: u128 = match kind {
        ProviderKind::Solana => 1_000_000_000,
        ProviderKind::Ethereum => 1_000_000_000_000_000_000,
    };
    let whole = raw / unit;
    let frac = (raw % unit) * 10_000 / unit;
    format!("{whole}.{frac:04} {}", kind.native_symbol())
}

/// Text for the wallet button's three visual states.
///
/// A silent reconnect in flight renders like the disconnected state so
/// returning users see no connecting flicker.
pub fn button_label(snapshot: &SessionSnapshot) -> String {
    match snapshot.status {
        SessionStatus::Disconnected | SessionStatus::Reconnecting => {
            "Connect Wallet".to_string()
        }
        SessionStatus::Connecting => "Connecting...".to_string(),
        SessionStatus::Connected => {
            let short = snapshot
                .address
                .as_deref()
                .map(short_address)
                .unwrap_or_else(|| "Connected".to_string());
            match (snapshot.provider, snapshot.balance) {
                (Some(kind), Some(raw)) => {
                    format!("{short} ({})", format_native_balance(kind, raw))
                }
                _ => short,
            }
        }
    }
}
