use std::cmp::Ordering;
use std::collections::BTreeMap;

/// A scored, non-held symbol eligible for a buy
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub symbol: String,
    pub probability: f64,
    /// Reference price for sizing (today's close)
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub symbol: String,
    pub quote_amount: f64,
    pub price: f64,
}

/// Rank candidates for today's buys.
///
/// Keeps symbols at or above `buy_threshold` that are not held, orders them by
/// `(probability desc, symbol asc)` and keeps at most
/// `min(top_k, max_positions - held_count)`.
pub fn select_candidates<F>(
    scored: &[Candidate],
    is_held: F,
    buy_threshold: f64,
    top_k: usize,
    max_positions: usize,
    held_count: usize,
) -> Vec<Candidate>
where
    F: Fn(&str) -> bool,
{
    let slots = top_k.min(max_positions.saturating_sub(held_count));
    if slots == 0 {
        return Vec::new();
    }

    // One entry per symbol, its best score
    let mut best: BTreeMap<&str, &Candidate> = BTreeMap::new();
    for candidate in scored
        .iter()
        .filter(|c| c.probability.is_finite() && c.price > 0.0)
        .filter(|c| c.probability >= buy_threshold)
        .filter(|c| !is_held(&c.symbol))
    {
        best.entry(candidate.symbol.as_str())
            .and_modify(|kept| {
                if candidate.probability > kept.probability {
                    *kept = candidate;
                }
            })
            .or_insert(candidate);
    }

    let mut eligible: Vec<Candidate> = best.into_values().cloned().collect();
    eligible.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    eligible.truncate(slots);
    eligible
}

/// Split `cash` equally across `candidates`.
///
/// Nothing is allocated when cash is below `min_notional`; a candidate whose
/// share falls below `min_notional` is skipped.
pub fn allocate_equal(cash: f64, candidates: &[Candidate], min_notional: f64) -> Vec<Allocation> {
    if candidates.is_empty() || cash < min_notional || cash <= 0.0 {
        return Vec::new();
    }

    let share = cash / candidates.len() as f64;
    candidates
        .iter()
        .filter(|_| share >= min_notional)
        .map(|c| Allocation {
            symbol: c.symbol.clone(),
            quote_amount: share,
            price: c.price,
        })
        .collect()
}
