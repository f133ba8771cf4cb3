// Universe filtering: which configured symbols may be traded against USDT

use crate::models::QUOTE_ASSET;

/// Suffixes of exchange leveraged tokens (BTCUP, ETHBEAR, ...)
const LEVERAGED_SUFFIXES: [&str; 4] = ["UP", "DOWN", "BULL", "BEAR"];

const STABLECOINS: [&str; 4] = ["USDC", "BUSD", "TUSD", QUOTE_ASSET];

/// Shortest base a leveraged token is built on; keeps JUP or SUP tradable
const MIN_LEVERAGED_BASE: usize = 3;

/// Decide whether a symbol belongs in the universe
///
/// Returns (is_tradable, reason)
pub fn check_symbol(symbol: &str) -> (bool, String) {
    if symbol.is_empty() || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return (false, format!("InvalidSymbol: '{}'", symbol));
    }

    if STABLECOINS.contains(&symbol) {
        return (false, format!("Stablecoin: {}", symbol));
    }

    for suffix in LEVERAGED_SUFFIXES {
        if let Some(base) = symbol.strip_suffix(suffix) {
            if base.len() >= MIN_LEVERAGED_BASE {
                return (false, format!("LeveragedToken: {} ({}+{})", symbol, base, suffix));
            }
        }
    }

    (true, "Tradable".to_string())
}

pub fn is_tradable(symbol: &str) -> bool {
    check_symbol(symbol).0
}

/// Drop excluded symbols, preserving the input order
pub fn filter_universe(symbols: Vec<String>) -> Vec<String> {
    symbols
        .into_iter()
        .filter(|symbol| {
            let (ok, reason) = check_symbol(symbol);
            if !ok {
                tracing::debug!("Excluding {} from universe: {}", symbol, reason);
            }
            ok
        })
        .collect()
}
