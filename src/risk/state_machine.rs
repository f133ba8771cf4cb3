use serde::{Deserialize, Serialize};

use crate::models::{PositionMeta, TradeReason};

/// Slack applied to ratio thresholds so a value printed as the threshold
/// (e.g. 145 / 100 against 1 + 0.45) counts as reaching it.
const RATIO_EPSILON: f64 = 1e-9;

/// Exit discipline constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    /// Stop-loss drawdown: exit when `ratio <= 1 - stop_loss`
    pub stop_loss: f64,
    /// Partial take-profit trigger as a delta: `ratio >= 1 + partial_take_profit`
    pub partial_take_profit: f64,
    /// Fraction of the position sold on the partial
    pub partial_ratio: f64,
    /// Trailing arm threshold as a ratio
    pub trailing_trigger: f64,
    /// Giveback from the running maximum that fires the trailing stop
    pub trailing_giveback: f64,
    /// Ratio at which one model sell may be skipped
    pub big_gain: f64,
    pub sell_threshold: f64,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            stop_loss: 0.25,
            partial_take_profit: 0.45,
            partial_ratio: 0.40,
            trailing_trigger: 1.8,
            trailing_giveback: 0.25,
            big_gain: 2.0,
            sell_threshold: 0.25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RiskAction {
    StopLoss,
    PartialSell { qty: f64 },
    TrailingStop,
    ModelSell,
    BigGainSkip,
    NoOp,
}

impl RiskAction {
    /// Whether the action sells the whole remaining position
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RiskAction::StopLoss | RiskAction::TrailingStop | RiskAction::ModelSell
        )
    }

    /// Reason recorded in trade logs for a sale, `None` for non-selling actions
    pub fn trade_reason(&self) -> Option<TradeReason> {
        match self {
            RiskAction::StopLoss => Some(TradeReason::StopLoss),
            RiskAction::PartialSell { .. } => Some(TradeReason::PartialSell),
            RiskAction::TrailingStop => Some(TradeReason::TrailingStop),
            RiskAction::ModelSell => Some(TradeReason::SellLogic),
            RiskAction::BigGainSkip | RiskAction::NoOp => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskAction::StopLoss => "STOP_LOSS",
            RiskAction::PartialSell { .. } => "PARTIAL_SELL",
            RiskAction::TrailingStop => "TRAILING_STOP",
            RiskAction::ModelSell => "MODEL_SELL",
            RiskAction::BigGainSkip => "BIG_GAIN_SKIP",
            RiskAction::NoOp => "NO_OP",
        }
    }
}

/// Outcome of one (asset, day) evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Ordered; at most one partial followed by at most one terminal or skip
    pub actions: Vec<RiskAction>,
    /// Metadata to store if the position stays open
    pub meta: PositionMeta,
    pub ratio: f64,
}

impl Evaluation {
    pub fn closes_position(&self) -> bool {
        self.actions.iter().any(RiskAction::is_terminal)
    }

    pub fn terminal(&self) -> Option<RiskAction> {
        self.actions.iter().copied().find(RiskAction::is_terminal)
    }

    pub fn partial_qty(&self) -> Option<f64> {
        self.actions.iter().find_map(|a| match a {
            RiskAction::PartialSell { qty } => Some(*qty),
            _ => None,
        })
    }
}

/// Run the exit rules for one held asset.
///
/// Pure: the caller applies the returned actions and stores `meta`.
/// `probability` is `None` when no fresh feature row exists, which disables
/// the model-sell rule for the day.
pub fn evaluate(
    meta: &PositionMeta,
    qty: f64,
    price: f64,
    probability: Option<f64>,
    params: &RiskParams,
) -> Evaluation {
    let mut next = meta.clone();
    let ratio = price / meta.entry_px;
    let mut actions = Vec::new();

    // 1. Stop-loss
    if ratio <= 1.0 - params.stop_loss + RATIO_EPSILON {
        return Evaluation {
            actions: vec![RiskAction::StopLoss],
            meta: next,
            ratio,
        };
    }

    // 2. Partial take-profit, does not end the evaluation
    if ratio >= 1.0 + params.partial_take_profit - RATIO_EPSILON && !next.partial_sold {
        next.partial_sold = true;
        actions.push(RiskAction::PartialSell {
            qty: qty * params.partial_ratio,
        });
    }

    // 3. Trailing stop; stays armed once the running max crossed the trigger
    let arm_price = meta.entry_px * params.trailing_trigger;
    let armed = ratio >= params.trailing_trigger - RATIO_EPSILON
        || next.max_price >= arm_price * (1.0 - RATIO_EPSILON);
    if armed {
        next.max_price = next.max_price.max(price);
        if price <= next.max_price * (1.0 - params.trailing_giveback) {
            actions.push(RiskAction::TrailingStop);
            return Evaluation { actions, meta: next, ratio };
        }
    }

    // 4. Model sell with a one-shot big-gain reprieve
    if let Some(p) = probability {
        if p < params.sell_threshold {
            if ratio >= params.big_gain - RATIO_EPSILON && !next.did_skip_sell_once {
                next.did_skip_sell_once = true;
                actions.push(RiskAction::BigGainSkip);
            } else {
                actions.push(RiskAction::ModelSell);
            }
            return Evaluation { actions, meta: next, ratio };
        }
    }

    if actions.is_empty() {
        actions.push(RiskAction::NoOp);
    }
    Evaluation { actions, meta: next, ratio }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn meta(entry: f64) -> PositionMeta {
        PositionMeta::new(entry, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
    }

    fn params() -> RiskParams {
        RiskParams::default()
    }

    #[test]
    fn test_stop_loss_at_exact_boundary() {
        let eval = evaluate(&meta(100.0), 10.0, 75.0, Some(0.9), &params());
        assert_eq!(eval.actions, vec![RiskAction::StopLoss]);
        assert!(eval.closes_position());
    }

    #[test]
    fn test_stop_loss_wins_over_model_sell() {
        let eval = evaluate(&meta(100.0), 10.0, 74.0, Some(0.01), &params());
        assert_eq!(eval.actions, vec![RiskAction::StopLoss]);
    }

    #[test]
    fn test_partial_at_exact_boundary_keeps_position() {
        let eval = evaluate(&meta(100.0), 10.0, 145.0, Some(0.9), &params());

        assert_eq!(eval.actions, vec![RiskAction::PartialSell { qty: 4.0 }]);
        assert!(eval.meta.partial_sold);
        assert!(!eval.closes_position());
    }

    #[test]
    fn test_partial_fires_once() {
        let mut m = meta(100.0);
        m.partial_sold = true;

        let eval = evaluate(&m, 6.0, 150.0, Some(0.9), &params());
        assert_eq!(eval.actions, vec![RiskAction::NoOp]);
        assert!(eval.meta.partial_sold);
    }

    #[test]
    fn test_partial_then_model_sell_same_day() {
        let eval = evaluate(&meta(100.0), 10.0, 150.0, Some(0.1), &params());
        assert_eq!(
            eval.actions,
            vec![RiskAction::PartialSell { qty: 4.0 }, RiskAction::ModelSell]
        );
        assert_eq!(eval.terminal(), Some(RiskAction::ModelSell));
    }

    #[test]
    fn test_trailing_no_exit_at_new_high() {
        let mut m = meta(100.0);
        m.partial_sold = true;

        let eval = evaluate(&m, 6.0, 200.0, Some(0.9), &params());
        assert_eq!(eval.actions, vec![RiskAction::NoOp]);
        assert_eq!(eval.meta.max_price, 200.0);
    }

    #[test]
    fn test_trailing_stays_armed_below_trigger() {
        let mut m = meta(100.0);
        m.partial_sold = true;
        m.max_price = 200.0;

        // ratio 1.49 < 1.8, but 149 <= 200 * 0.75
        let eval = evaluate(&m, 6.0, 149.0, Some(0.9), &params());
        assert_eq!(eval.actions, vec![RiskAction::TrailingStop]);

        let eval = evaluate(&m, 6.0, 151.0, Some(0.9), &params());
        assert_eq!(eval.actions, vec![RiskAction::NoOp]);
        assert_eq!(eval.meta.max_price, 200.0);
    }

    #[test]
    fn test_big_gain_skip_is_one_shot() {
        let mut m = meta(100.0);
        m.partial_sold = true;

        let first = evaluate(&m, 6.0, 210.0, Some(0.1), &params());
        assert_eq!(first.actions, vec![RiskAction::BigGainSkip]);
        assert!(first.meta.did_skip_sell_once);
        assert!(!first.closes_position());

        let second = evaluate(&first.meta, 6.0, 215.0, Some(0.1), &params());
        assert_eq!(second.actions, vec![RiskAction::ModelSell]);
    }

    #[test]
    fn test_probability_equal_to_threshold_holds() {
        let eval = evaluate(&meta(100.0), 10.0, 100.0, Some(0.25), &params());
        assert_eq!(eval.actions, vec![RiskAction::NoOp]);
    }

    #[test]
    fn test_missing_probability_skips_model_rule() {
        let eval = evaluate(&meta(100.0), 10.0, 90.0, None, &params());
        assert_eq!(eval.actions, vec![RiskAction::NoOp]);
    }

    #[test]
    fn test_model_sell_below_big_gain() {
        let eval = evaluate(&meta(100.0), 10.0, 120.0, Some(0.2), &params());
        assert_eq!(eval.actions, vec![RiskAction::ModelSell]);
        assert_eq!(eval.terminal().and_then(|a| a.trade_reason()), Some(TradeReason::SellLogic));
    }

    #[test]
    fn test_max_price_untouched_before_arming() {
        let eval = evaluate(&meta(100.0), 10.0, 170.0, Some(0.9), &params());
        assert_eq!(eval.meta.max_price, 100.0);
    }
}
