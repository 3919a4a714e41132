//! Pre-trade risk manager: duplicate-position guard, daily-loss
//! circuit breaker, edge floor, fractional-Kelly sizing, and exposure
//! caps. Single-writer; callers serialize access (see the supervisor's
//! signal callback, which runs one signal at a time).

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Decision, Direction, Signal};

pub struct RiskManager {
    bankroll: Decimal,
    kelly_fraction: Decimal,
    max_position_fraction: Decimal,
    max_total_exposure: Decimal,
    min_edge_threshold: Decimal,
    max_daily_loss_usd: Decimal,

    open_positions: HashMap<String, Decimal>,
    daily_pnl: Decimal,
    pnl_date: NaiveDate,
}

impl RiskManager {
    pub fn new(
        bankroll_usd: Decimal,
        kelly_fraction: Decimal,
        max_position_fraction: Decimal,
        max_total_exposure: Decimal,
        min_edge_threshold: Decimal,
        max_daily_loss_usd: Decimal,
    ) -> Self {
        Self {
            bankroll: bankroll_usd,
            kelly_fraction,
            max_position_fraction,
            max_total_exposure,
            min_edge_threshold,
            max_daily_loss_usd,
            open_positions: HashMap::new(),
            daily_pnl: Decimal::ZERO,
            pnl_date: Utc::now().date_naive(),
        }
    }

    pub fn bankroll(&self) -> Decimal {
        self.bankroll
    }

    pub fn total_exposure_usd(&self) -> Decimal {
        self.open_positions.values().sum()
    }

    pub fn open_position_count(&self) -> usize {
        self.open_positions.len()
    }

    pub fn daily_pnl(&mut self) -> Decimal {
        self.maybe_reset_daily_pnl();
        self.daily_pnl
    }

    /// Run every pre-trade check in order and either reject with a
    /// reason or approve a sized position.
    pub fn check(&mut self, signal: &Signal) -> Decision {
        self.maybe_reset_daily_pnl();
        let mut check_log = Vec::new();

        if self.open_positions.contains_key(&signal.market_id) {
            check_log.push("FAIL:duplicate_position".to_string());
            return Decision::reject(format!("Already in position for {}", signal.market_id), check_log);
        }
        check_log.push("PASS:duplicate_position".to_string());

        if self.max_daily_loss_usd > Decimal::ZERO && self.daily_pnl <= -self.max_daily_loss_usd {
            check_log.push("FAIL:daily_loss_limit".to_string());
            return Decision::reject(
                format!(
                    "Daily loss limit hit: ${:.2} >= ${:.2}",
                    -self.daily_pnl, self.max_daily_loss_usd
                ),
                check_log,
            );
        }
        check_log.push("PASS:daily_loss_limit".to_string());

        if signal.edge_estimate < self.min_edge_threshold {
            check_log.push("FAIL:edge_below_min".to_string());
            return Decision::reject(
                format!(
                    "Edge {:.2}% below threshold {:.2}%",
                    signal.edge_estimate * dec!(100),
                    self.min_edge_threshold * dec!(100)
                ),
                check_log,
            );
        }
        check_log.push("PASS:edge_below_min".to_string());

        let kelly_frac = self.kelly(signal);
        let fractional = kelly_frac * self.kelly_fraction;

        let max_pos_usd = self.bankroll * self.max_position_fraction;
        let mut pos_usd = (fractional * self.bankroll).min(max_pos_usd);

        if pos_usd <= Decimal::ZERO {
            check_log.push("FAIL:zero_size".to_string());
            return Decision::reject("Kelly sizing produced $0 position", check_log);
        }
        check_log.push("PASS:zero_size".to_string());

        let max_total_usd = self.bankroll * self.max_total_exposure;
        let remaining = max_total_usd - self.total_exposure_usd();
        if remaining <= Decimal::ZERO {
            check_log.push("FAIL:exposure_ceiling".to_string());
            return Decision::reject(
                format!(
                    "Total exposure ceiling reached (${:.0} / ${:.0})",
                    self.total_exposure_usd(),
                    max_total_usd
                ),
                check_log,
            );
        }
        pos_usd = pos_usd.min(remaining);
        check_log.push("PASS:exposure_ceiling".to_string());

        Decision::approve(pos_usd, kelly_frac, check_log)
    }

    fn kelly(&self, signal: &Signal) -> Decimal {
        let edge = signal.edge_estimate;
        let mid = signal.metadata_best_bid();

        let mut entry = match signal.direction {
            Direction::BuyNo => Decimal::ONE - mid.unwrap_or(dec!(0.55)),
            _ => mid.unwrap_or(dec!(0.45)),
        };
        entry = entry.clamp(dec!(0.01), dec!(0.99));

        let b = (Decimal::ONE - entry) / entry;
        let p = (entry + edge).min(dec!(0.99));
        let q = Decimal::ONE - p;

        let kelly = if b > Decimal::ZERO { (b * p - q) / b } else { Decimal::ZERO };
        kelly.max(Decimal::ZERO)
    }

    pub fn record_open(&mut self, market_id: impl Into<String>, size_usd: Decimal) {
        self.open_positions.insert(market_id.into(), size_usd);
    }

    pub fn record_close(&mut self, market_id: &str, pnl_usd: Decimal) {
        self.open_positions.remove(market_id);
        self.daily_pnl += pnl_usd;
        self.bankroll += pnl_usd;
    }

    pub fn update_bankroll(&mut self, new_bankroll: Decimal) {
        self.bankroll = new_bankroll;
    }

    fn maybe_reset_daily_pnl(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.pnl_date {
            self.daily_pnl = Decimal::ZERO;
            self.pnl_date = today;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, SignalType};

    fn signal(edge: Decimal, best_bid: &str, direction: Direction) -> Signal {
        Signal {
            signal_type: SignalType::BookImbalance,
            direction,
            platform: Platform::Kalshi,
            market_id: "M".to_string(),
            edge_estimate: edge,
            strength: dec!(0.5),
            metadata: serde_json::json!({ "best_bid": best_bid }),
            created_at: Utc::now(),
            fired: false,
        }
    }

    fn default_manager() -> RiskManager {
        RiskManager::new(dec!(1000), dec!(0.25), dec!(0.08), dec!(0.25), dec!(0.015), Decimal::ZERO)
    }

    #[test]
    fn scenario_s6_sizes_within_single_position_cap() {
        // bankroll=1000, kelly_fraction=0.25, max_pos_frac=0.08, edge=0.06,
        // best_bid=0.45 -> entry=0.45, b=11/9, p=0.51, kelly~0.109,
        // fractional~0.027, raw_pos~$27, cap=$80 -> approved at ~$27.
        let mut manager = default_manager();
        let sig = signal(dec!(0.06), "0.45", Direction::BuyYes);

        let decision = manager.check(&sig);
        assert!(decision.approved);
        assert!(decision.position_size_usd > dec!(20) && decision.position_size_usd < dec!(30));
    }

    #[test]
    fn duplicate_position_is_rejected() {
        let mut manager = default_manager();
        manager.record_open("M", dec!(50));
        let sig = signal(dec!(0.06), "0.45", Direction::BuyYes);

        let decision = manager.check(&sig);
        assert!(!decision.approved);
        assert_eq!(decision.check_log.last().unwrap(), "FAIL:duplicate_position");
    }

    #[test]
    fn edge_below_threshold_is_rejected() {
        let mut manager = default_manager();
        let sig = signal(dec!(0.01), "0.45", Direction::BuyYes);
        let decision = manager.check(&sig);
        assert!(!decision.approved);
        assert_eq!(decision.check_log.last().unwrap(), "FAIL:edge_below_min");
    }

    #[test]
    fn daily_loss_limit_blocks_new_positions() {
        let mut manager = RiskManager::new(dec!(1000), dec!(0.25), dec!(0.08), dec!(0.25), dec!(0.015), dec!(50));
        manager.record_open("other", dec!(10));
        manager.record_close("other", dec!(-60));

        let sig = signal(dec!(0.06), "0.45", Direction::BuyYes);
        let decision = manager.check(&sig);
        assert!(!decision.approved);
        assert_eq!(decision.check_log.last().unwrap(), "FAIL:daily_loss_limit");
    }

    #[test]
    fn exposure_ceiling_caps_remaining_capacity() {
        let mut manager = default_manager();
        manager.record_open("A", dec!(980));

        let sig = signal(dec!(0.06), "0.45", Direction::BuyYes);
        let decision = manager.check(&sig);
        assert!(!decision.approved);
        assert_eq!(decision.check_log.last().unwrap(), "FAIL:exposure_ceiling");
    }

    #[test]
    fn buy_no_derives_entry_from_complement_of_mid() {
        let mut manager = default_manager();
        let sig = signal(dec!(0.06), "0.45", Direction::BuyNo);
        let decision = manager.check(&sig);
        assert!(decision.approved);
    }
}
