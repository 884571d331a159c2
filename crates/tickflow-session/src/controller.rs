//! Trading session controller.
//!
//! Single-owner state machine driven by the dispatch loop:
//!
//! ```text
//! start() -> Waiting --first contract opened--> Trading
//!              |                                  |
//!              +--- threshold crossed ----------> Completed
//!              +--- unknown settlement / lost --> Error
//!              +--- unconfirmed placement ------> Error
//!              +--- overdue settlement ---------> Error
//! ```
//!
//! Completed and Error are terminal until the next `start()`. Thresholds are
//! evaluated inside [`SessionController::on_settlement`], in the same call
//! that changes the profit.

use crate::error::{SessionError, SessionResult};
use crate::progression::{FlatStake, ProgressionConfig, StakeProgression};
use crate::trade_log::{TradeLog, TradeLogEntry};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tickflow_core::{
    BuyReceipt, ContractId, ContractRequest, DurationUnit, Settlement, Signal, TradeOutcome,
};
use tracing::{debug, error, info, warn};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Trading,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Trading => write!(f, "trading"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Why a session reached Completed or Error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    TargetProfitReached,
    StopLossReached,
    UnknownSettlement { contract_id: ContractId },
    ConnectionLost { reason: String },
    /// A buy went out and the connection dropped before its receipt.
    PlacementUnconfirmed { req_id: u64 },
    SettlementOverdue { contract_id: ContractId },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetProfitReached => write!(f, "target profit reached"),
            Self::StopLossReached => write!(f, "stop loss reached"),
            Self::UnknownSettlement { contract_id } => {
                write!(f, "settlement for unknown contract {contract_id}")
            }
            Self::ConnectionLost { reason } => write!(f, "connection lost: {reason}"),
            Self::PlacementUnconfirmed { req_id } => {
                write!(f, "placement {req_id} unconfirmed after reconnect")
            }
            Self::SettlementOverdue { contract_id } => {
                write!(f, "no settlement for contract {contract_id}")
            }
        }
    }
}

/// Session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub initial_stake: Decimal,
    pub target_profit: Decimal,
    /// Positive amount; the session stops at `-stop_loss`.
    pub stop_loss: Decimal,
    #[serde(default)]
    pub progression: ProgressionConfig,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default)]
    pub duration_unit: DurationUnit,
    /// Seconds an open contract may wait for its settlement before the
    /// session halts. 0 disables the check.
    #[serde(default = "default_settlement_timeout")]
    pub settlement_timeout_secs: u64,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_duration() -> u32 {
    1
}

fn default_settlement_timeout() -> u64 {
    300
}

impl SessionConfig {
    pub fn validate(&self) -> SessionResult<()> {
        let positive = [
            ("initial_stake", self.initial_stake),
            ("target_profit", self.target_profit),
            ("stop_loss", self.stop_loss),
        ];
        for (name, value) in positive {
            if value <= Decimal::ZERO {
                return Err(SessionError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.duration == 0 {
            return Err(SessionError::InvalidConfig("duration must be > 0".into()));
        }
        if self.currency.is_empty() {
            return Err(SessionError::InvalidConfig("currency is empty".into()));
        }
        self.progression.validate(self.initial_stake)
    }
}

/// Session state, handed out as a value snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradingSession {
    pub status: SessionStatus,
    pub stake: Decimal,
    pub initial_stake: Decimal,
    pub target_profit: Decimal,
    pub stop_loss: Decimal,
    pub current_profit: Decimal,
    pub wins: u32,
    pub losses: u32,
    pub last_result: Option<TradeOutcome>,
    pub stop_reason: Option<StopReason>,
    pub started_at: DateTime<Utc>,
}

impl TradingSession {
    fn new(config: &SessionConfig) -> Self {
        Self {
            status: SessionStatus::Waiting,
            stake: config.initial_stake,
            initial_stake: config.initial_stake,
            target_profit: config.target_profit,
            stop_loss: config.stop_loss,
            current_profit: Decimal::ZERO,
            wins: 0,
            losses: 0,
            last_result: None,
            stop_reason: None,
            started_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Waiting | SessionStatus::Trading)
    }

    fn terminate(&mut self, status: SessionStatus, reason: StopReason) {
        self.status = status;
        self.stop_reason = Some(reason);
    }
}

/// What `on_settlement` did with a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementDisposition {
    /// Session numbers updated.
    Applied,
    /// Recorded in the trade log only (session terminal or stopped).
    LogOnly,
    /// Contract already settled.
    Duplicate,
    /// Contract was never recorded as pending.
    Unknown,
}

/// Placement sent but not acknowledged yet.
#[derive(Debug, Clone)]
struct InFlight {
    req_id: Option<u64>,
    request: ContractRequest,
}

/// Contract opened by the venue and not settled yet.
#[derive(Debug, Clone)]
struct OpenContract {
    request: ContractRequest,
    opened_at: DateTime<Utc>,
}

/// Owns the trading session, its pending contracts and the trade log.
#[derive(Debug)]
pub struct SessionController {
    session: Option<TradingSession>,
    config: Option<SessionConfig>,
    progression: Box<dyn StakeProgression>,
    in_flight: Option<InFlight>,
    pending: HashMap<ContractId, OpenContract>,
    /// Still open when a later session started; settled into the log only.
    orphaned: HashSet<ContractId>,
    settled: HashSet<ContractId>,
    trade_log: TradeLog,
    stopped: bool,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            session: None,
            config: None,
            progression: Box::new(FlatStake {
                stake: Decimal::ZERO,
            }),
            in_flight: None,
            pending: HashMap::new(),
            orphaned: HashSet::new(),
            settled: HashSet::new(),
            trade_log: TradeLog::new(),
            stopped: false,
        }
    }

    /// Start a new session in Waiting.
    pub fn start(&mut self, config: SessionConfig) -> SessionResult<&TradingSession> {
        config.validate()?;
        if self.session.as_ref().is_some_and(|s| s.is_active()) {
            return Err(SessionError::AlreadyActive);
        }

        info!(
            stake = %config.initial_stake,
            target = %config.target_profit,
            stop_loss = %config.stop_loss,
            progression = ?config.progression,
            "Trading session started"
        );
        self.progression = config.progression.build(config.initial_stake);
        self.in_flight = None;
        if !self.pending.is_empty() {
            warn!(
                open = self.pending.len(),
                "Contracts from the previous session still open"
            );
        }
        self.orphaned.extend(self.pending.drain().map(|(id, _)| id));
        self.stopped = false;
        let session = TradingSession::new(&config);
        self.config = Some(config);
        Ok(self.session.insert(session))
    }

    /// Current session, if one was started.
    pub fn session(&self) -> Option<&TradingSession> {
        self.session.as_ref()
    }

    pub fn trade_log(&self) -> &TradeLog {
        &self.trade_log
    }

    /// Whether a placement or an open contract is outstanding.
    pub fn has_contract_in_flight(&self) -> bool {
        self.in_flight.is_some() || !self.pending.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Decide whether to act on a signal.
    ///
    /// Returns the contract to place, or `None` when the session is not
    /// accepting trades or a contract is still outstanding.
    pub fn on_signal(&mut self, signal: &Signal) -> Option<ContractRequest> {
        if self.stopped || self.has_contract_in_flight() {
            return None;
        }
        let session = self.session.as_ref().filter(|s| s.is_active())?;
        let config = self.config.as_ref()?;

        let request = ContractRequest {
            symbol: signal.symbol.clone(),
            contract_type: signal.contract_type,
            barrier: signal.barrier,
            stake: session.stake,
            currency: config.currency.clone(),
            duration: config.duration,
            duration_unit: config.duration_unit,
        };
        debug!(
            symbol = %request.symbol,
            contract_type = %request.contract_type,
            stake = %request.stake,
            "Signal accepted"
        );
        self.in_flight = Some(InFlight {
            req_id: None,
            request: request.clone(),
        });
        Some(request)
    }

    /// The placement from the last accepted signal was queued as `req_id`.
    pub fn on_placement_queued(&mut self, req_id: u64) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.req_id = Some(req_id);
        }
    }

    /// Whether `req_id` is the outstanding placement.
    pub fn is_in_flight_request(&self, req_id: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.req_id == Some(req_id))
    }

    /// The placement was rejected, dropped or answered with an error.
    ///
    /// `req_id` is `None` when the send failed before an id was assigned.
    pub fn on_placement_failed(&mut self, req_id: Option<u64>, reason: &str) -> bool {
        let matches = match (&self.in_flight, req_id) {
            (Some(f), Some(id)) => f.req_id == Some(id),
            (Some(f), None) => f.req_id.is_none(),
            (None, _) => false,
        };
        if matches {
            warn!(?req_id, reason, "Contract placement failed");
            self.in_flight = None;
        }
        matches
    }

    /// The venue acknowledged a placement.
    ///
    /// The contract joins the pending set and gets a Pending log entry, even
    /// after `stop()`, so its settlement can still be logged.
    pub fn on_contract_opened(&mut self, req_id: Option<u64>, receipt: &BuyReceipt) -> bool {
        let matches = match (&self.in_flight, req_id) {
            (Some(f), Some(id)) => f.req_id.is_none() || f.req_id == Some(id),
            (Some(_), None) => true,
            (None, _) => false,
        };
        let in_flight = if matches { self.in_flight.take() } else { None };
        let Some(InFlight { request, .. }) = in_flight else {
            warn!(?req_id, contract_id = %receipt.contract_id, "Receipt for unknown placement");
            return false;
        };

        let mut entry = TradeLogEntry::pending(
            receipt.contract_id.clone(),
            request.symbol.clone(),
            request.contract_type,
            request.barrier,
            receipt.buy_price,
        );
        if let Some(start) = receipt.start_time {
            entry.timestamp = start;
        }
        if let Err(e) = self.trade_log.record(entry) {
            warn!(error = %e, "Trade log rejected entry");
        }
        self.pending.insert(
            receipt.contract_id.clone(),
            OpenContract {
                request,
                opened_at: Utc::now(),
            },
        );

        if let Some(session) = self.session.as_mut() {
            if session.status == SessionStatus::Waiting && !self.stopped {
                session.status = SessionStatus::Trading;
                info!("Trading session is now trading");
            }
        }
        info!(contract_id = %receipt.contract_id, buy_price = %receipt.buy_price, "Contract opened");
        true
    }

    /// Entry spot for an open contract, from the quote it was placed on or
    /// from the venue's contract updates.
    pub fn record_entry_spot(&mut self, contract_id: &ContractId, price: Decimal) -> bool {
        if !self.pending.contains_key(contract_id) {
            return false;
        }
        match self.trade_log.set_entry_price(contract_id, price) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Trade log could not take entry spot");
                false
            }
        }
    }

    /// Symbol of an open contract.
    pub fn open_contract_symbol(&self, contract_id: &ContractId) -> Option<&str> {
        self.pending
            .get(contract_id)
            .map(|c| c.request.symbol.as_str())
    }

    /// Apply a contract settlement.
    pub fn on_settlement(&mut self, settlement: &Settlement) -> SettlementDisposition {
        let id = &settlement.contract_id;
        if self.settled.contains(id) {
            debug!(contract_id = %id, "Duplicate settlement ignored");
            return SettlementDisposition::Duplicate;
        }

        if self.orphaned.remove(id) {
            self.settled.insert(id.clone());
            if let Err(e) = self.trade_log.apply_settlement(settlement) {
                warn!(error = %e, "Trade log could not settle entry");
            }
            info!(contract_id = %id, profit = %settlement.profit, "Settlement from an earlier session logged");
            return SettlementDisposition::LogOnly;
        }

        if self.pending.remove(id).is_none() {
            self.settled.insert(id.clone());
            if self.stopped {
                warn!(contract_id = %id, "Settlement for unknown contract after stop");
                return SettlementDisposition::Unknown;
            }
            if let Some(session) = self.session.as_mut().filter(|s| s.is_active()) {
                error!(contract_id = %id, "Settlement for unknown contract, session halted");
                session.terminate(
                    SessionStatus::Error,
                    StopReason::UnknownSettlement {
                        contract_id: id.clone(),
                    },
                );
            }
            return SettlementDisposition::Unknown;
        }

        self.settled.insert(id.clone());
        if let Err(e) = self.trade_log.apply_settlement(settlement) {
            warn!(error = %e, "Trade log could not settle entry");
        }

        let Some(session) = self.session.as_mut() else {
            return SettlementDisposition::LogOnly;
        };
        if self.stopped || !session.is_active() {
            info!(contract_id = %id, profit = %settlement.profit, "Settlement logged without trading action");
            return SettlementDisposition::LogOnly;
        }

        session.current_profit += settlement.profit;
        match settlement.outcome {
            TradeOutcome::Win => session.wins += 1,
            TradeOutcome::Loss => session.losses += 1,
        }
        session.last_result = Some(settlement.outcome);
        session.stake = self
            .progression
            .next_stake(session.stake, settlement.outcome);

        info!(
            contract_id = %id,
            outcome = %settlement.outcome,
            profit = %settlement.profit,
            total = %session.current_profit,
            next_stake = %session.stake,
            "Contract settled"
        );

        if session.current_profit >= session.target_profit {
            info!(profit = %session.current_profit, "Target profit reached");
            session.terminate(SessionStatus::Completed, StopReason::TargetProfitReached);
        } else if session.current_profit <= -session.stop_loss {
            warn!(profit = %session.current_profit, "Stop loss reached");
            session.terminate(SessionStatus::Completed, StopReason::StopLossReached);
        }

        SettlementDisposition::Applied
    }

    /// A new connection is up.
    ///
    /// Queued placements were already reported dropped, so a placement still
    /// carrying a request id was written to the old socket and may or may not
    /// have opened a contract. The session halts rather than guess.
    pub fn on_reconnected(&mut self) -> bool {
        let Some(req_id) = self.in_flight.as_ref().and_then(|f| f.req_id) else {
            return false;
        };
        self.in_flight = None;
        if self.stopped {
            warn!(req_id, "Placement unconfirmed after reconnect");
            return true;
        }
        if let Some(session) = self.session.as_mut().filter(|s| s.is_active()) {
            error!(req_id, "Placement unconfirmed after reconnect, session halted");
            session.terminate(
                SessionStatus::Error,
                StopReason::PlacementUnconfirmed { req_id },
            );
        }
        true
    }

    /// Halt the session if an open contract has waited longer than the
    /// configured settlement timeout. Returns the overdue contract.
    pub fn check_settlement_timeouts(&mut self) -> Option<ContractId> {
        self.check_settlement_timeouts_at(Utc::now())
    }

    pub fn check_settlement_timeouts_at(&mut self, now: DateTime<Utc>) -> Option<ContractId> {
        let secs = self.config.as_ref()?.settlement_timeout_secs;
        if secs == 0 || self.stopped {
            return None;
        }
        let session = self.session.as_mut().filter(|s| s.is_active())?;
        let overdue = self
            .pending
            .iter()
            .filter(|(_, c)| {
                u64::try_from((now - c.opened_at).num_seconds()).is_ok_and(|waited| waited >= secs)
            })
            .min_by_key(|(_, c)| c.opened_at)
            .map(|(id, _)| id.clone())?;

        // Its settlement may still arrive; it is then logged only.
        self.pending.remove(&overdue);
        self.orphaned.insert(overdue.clone());
        error!(contract_id = %overdue, timeout_secs = secs, "Settlement overdue, session halted");
        session.terminate(
            SessionStatus::Error,
            StopReason::SettlementOverdue {
                contract_id: overdue.clone(),
            },
        );
        Some(overdue)
    }

    /// The connection is gone for good.
    pub fn on_connection_lost(&mut self, reason: &str) {
        self.in_flight = None;
        if let Some(session) = self.session.as_mut().filter(|s| s.is_active()) {
            error!(reason, "Connection lost, session halted");
            session.terminate(
                SessionStatus::Error,
                StopReason::ConnectionLost {
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// Stop trading. The session status is left as it was.
    pub fn stop(&mut self) {
        if !self.stopped {
            info!(pending = self.pending.len(), "Session controller stopped");
        }
        self.stopped = true;
        self.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tickflow_core::ContractType;

    fn config() -> SessionConfig {
        SessionConfig {
            initial_stake: dec!(10),
            target_profit: dec!(50),
            stop_loss: dec!(100),
            progression: ProgressionConfig::Martingale {
                factor: dec!(2),
                max_stake: dec!(1000),
            },
            currency: "USD".into(),
            duration: 1,
            duration_unit: DurationUnit::Ticks,
            settlement_timeout_secs: 300,
        }
    }

    fn signal() -> Signal {
        Signal {
            symbol: "R_100".into(),
            contract_type: ContractType::DigitOver,
            barrier: Some(4),
        }
    }

    fn settlement(id: &str, profit: Decimal) -> Settlement {
        Settlement {
            contract_id: ContractId::new(id),
            profit,
            outcome: if profit > Decimal::ZERO {
                TradeOutcome::Win
            } else {
                TradeOutcome::Loss
            },
            entry_price: None,
            exit_price: None,
            settled_at: Utc::now(),
        }
    }

    /// Signal -> queued -> opened. Returns the stake that was requested.
    fn open(ctl: &mut SessionController, id: &str, req_id: u64) -> Decimal {
        let request = ctl.on_signal(&signal()).expect("signal accepted");
        ctl.on_placement_queued(req_id);
        assert!(ctl.on_contract_opened(
            Some(req_id),
            &BuyReceipt {
                contract_id: ContractId::new(id),
                buy_price: request.stake,
                start_time: None,
            },
        ));
        request.stake
    }

    fn trade(ctl: &mut SessionController, id: &str, req_id: u64, profit: Decimal) -> Decimal {
        let stake = open(ctl, id, req_id);
        assert_eq!(
            ctl.on_settlement(&settlement(id, profit)),
            SettlementDisposition::Applied
        );
        stake
    }

    fn numbers(s: &TradingSession) -> (Decimal, Decimal, u32, u32) {
        (s.stake, s.current_profit, s.wins, s.losses)
    }

    #[test]
    fn test_start_validates() {
        let mut ctl = SessionController::new();
        let mut bad = config();
        bad.initial_stake = dec!(0);
        assert!(matches!(ctl.start(bad), Err(SessionError::InvalidConfig(_))));

        let session = ctl.start(config()).unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.stake, dec!(10));
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        assert!(matches!(ctl.start(config()), Err(SessionError::AlreadyActive)));
    }

    #[test]
    fn test_waiting_to_trading_on_first_contract() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();

        let request = ctl.on_signal(&signal()).unwrap();
        assert_eq!(request.stake, dec!(10));
        assert_eq!(request.barrier, Some(4));
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Waiting);

        ctl.on_placement_queued(1);
        ctl.on_contract_opened(
            Some(1),
            &BuyReceipt {
                contract_id: ContractId::new("100"),
                buy_price: dec!(10),
                start_time: None,
            },
        );
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Trading);
        assert!(ctl.trade_log().get(&ContractId::new("100")).unwrap().is_pending());
    }

    #[test]
    fn test_no_signal_without_session() {
        let mut ctl = SessionController::new();
        assert!(ctl.on_signal(&signal()).is_none());
    }

    #[test]
    fn test_one_contract_at_a_time() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();

        assert!(ctl.on_signal(&signal()).is_some());
        // Awaiting acknowledgement
        assert!(ctl.on_signal(&signal()).is_none());

        ctl.on_placement_queued(1);
        ctl.on_contract_opened(
            Some(1),
            &BuyReceipt {
                contract_id: ContractId::new("1"),
                buy_price: dec!(10),
                start_time: None,
            },
        );
        // Awaiting settlement
        assert!(ctl.on_signal(&signal()).is_none());

        ctl.on_settlement(&settlement("1", dec!(9)));
        assert!(ctl.on_signal(&signal()).is_some());
    }

    #[test]
    fn test_placement_failure_clears_in_flight() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();

        ctl.on_signal(&signal()).unwrap();
        ctl.on_placement_queued(3);
        assert!(ctl.is_in_flight_request(3));
        assert!(!ctl.on_placement_failed(Some(4), "other request"));
        assert!(ctl.on_placement_failed(Some(3), "InsufficientBalance"));
        assert!(!ctl.has_contract_in_flight());
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Waiting);

        // Send rejected before an id was assigned
        ctl.on_signal(&signal()).unwrap();
        assert!(ctl.on_placement_failed(None, "not connected"));
        assert!(ctl.on_signal(&signal()).is_some());
    }

    #[test]
    fn test_martingale_sequence_scenario() {
        // Loss(-10), Loss(-20), Win(+38) with doubling on loss
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();

        assert_eq!(trade(&mut ctl, "1", 1, dec!(-10)), dec!(10));
        assert_eq!(trade(&mut ctl, "2", 2, dec!(-20)), dec!(20));
        assert_eq!(trade(&mut ctl, "3", 3, dec!(38)), dec!(40));

        let s = ctl.session().unwrap();
        assert_eq!(s.stake, dec!(10));
        assert_eq!(s.current_profit, dec!(8));
        assert_eq!(s.wins, 1);
        assert_eq!(s.losses, 2);
        assert_eq!(s.last_result, Some(TradeOutcome::Win));
        assert_eq!(s.status, SessionStatus::Trading);
    }

    #[test]
    fn test_stop_loss_crossed_exactly() {
        let mut ctl = SessionController::new();
        let mut cfg = config();
        cfg.progression = ProgressionConfig::Flat;
        ctl.start(cfg).unwrap();

        trade(&mut ctl, "1", 1, dec!(-30));
        trade(&mut ctl, "2", 2, dec!(-30));
        assert_eq!(ctl.session().unwrap().current_profit, dec!(-60));
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Trading);

        trade(&mut ctl, "3", 3, dec!(-40));
        let s = ctl.session().unwrap();
        assert_eq!(s.current_profit, dec!(-100));
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.stop_reason, Some(StopReason::StopLossReached));
    }

    #[test]
    fn test_target_profit_completes() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();

        trade(&mut ctl, "1", 1, dec!(50));
        let s = ctl.session().unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.stop_reason, Some(StopReason::TargetProfitReached));
        assert!(ctl.on_signal(&signal()).is_none());
    }

    #[test]
    fn test_unknown_settlement_errors_without_touching_numbers() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        trade(&mut ctl, "1", 1, dec!(-10));
        let before = numbers(ctl.session().unwrap());

        assert_eq!(
            ctl.on_settlement(&settlement("999", dec!(5))),
            SettlementDisposition::Unknown
        );

        let s = ctl.session().unwrap();
        assert_eq!(s.status, SessionStatus::Error);
        assert_eq!(
            s.stop_reason,
            Some(StopReason::UnknownSettlement {
                contract_id: ContractId::new("999")
            })
        );
        assert_eq!(numbers(s), before);
    }

    #[test]
    fn test_duplicate_settlement_ignored() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        trade(&mut ctl, "1", 1, dec!(-10));
        let before = numbers(ctl.session().unwrap());

        assert_eq!(
            ctl.on_settlement(&settlement("1", dec!(-10))),
            SettlementDisposition::Duplicate
        );
        assert_eq!(numbers(ctl.session().unwrap()), before);
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Trading);
    }

    #[test]
    fn test_terminal_status_freezes_numbers() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        open(&mut ctl, "1", 1);
        ctl.on_connection_lost("gave up after 5 attempts");
        let frozen = numbers(ctl.session().unwrap());
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Error);

        assert!(ctl.on_signal(&signal()).is_none());
        assert_eq!(
            ctl.on_settlement(&settlement("1", dec!(9))),
            SettlementDisposition::LogOnly
        );
        assert_eq!(numbers(ctl.session().unwrap()), frozen);
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Error);

        // Still logged
        let entry = ctl.trade_log().get(&ContractId::new("1")).unwrap();
        assert!(!entry.is_pending());
    }

    #[test]
    fn test_stop_keeps_status_and_logs_late_settlement() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        open(&mut ctl, "1", 1);

        ctl.stop();
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Trading);
        assert!(ctl.on_signal(&signal()).is_none());

        let before = numbers(ctl.session().unwrap());
        assert_eq!(
            ctl.on_settlement(&settlement("1", dec!(-10))),
            SettlementDisposition::LogOnly
        );
        assert_eq!(numbers(ctl.session().unwrap()), before);
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Trading);
        assert_eq!(ctl.trade_log().stats().losses, 1);
    }

    #[test]
    fn test_restart_after_terminal() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        trade(&mut ctl, "1", 1, dec!(60));
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Completed);

        let session = ctl.start(config()).unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.current_profit, Decimal::ZERO);
        // Log survives for the process lifetime
        assert_eq!(ctl.trade_log().len(), 1);
    }

    #[test]
    fn test_receipt_for_unknown_placement() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        assert!(!ctl.on_contract_opened(
            Some(77),
            &BuyReceipt {
                contract_id: ContractId::new("5"),
                buy_price: dec!(10),
                start_time: None,
            },
        ));
        assert!(ctl.trade_log().is_empty());
    }

    #[test]
    fn test_stop_reason_serializes_with_kind_tag() {
        let value = serde_json::to_value(StopReason::ConnectionLost {
            reason: "gave up after 5 attempts".into(),
        })
        .unwrap();
        assert_eq!(value["kind"], "connection_lost");
        assert_eq!(value["reason"], "gave up after 5 attempts");

        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        ctl.on_connection_lost("closed");
        let session = serde_json::to_value(ctl.session().unwrap()).unwrap();
        assert_eq!(session["status"], "error");
        assert_eq!(session["stop_reason"]["kind"], "connection_lost");
    }

    #[test]
    fn test_unacknowledged_placement_halts_on_reconnect() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        ctl.on_signal(&signal()).unwrap();
        ctl.on_placement_queued(7);

        assert!(ctl.on_reconnected());
        assert!(!ctl.has_contract_in_flight());
        let s = ctl.session().unwrap();
        assert_eq!(s.status, SessionStatus::Error);
        assert_eq!(
            s.stop_reason,
            Some(StopReason::PlacementUnconfirmed { req_id: 7 })
        );
        assert!(ctl.on_signal(&signal()).is_none());
    }

    #[test]
    fn test_reconnect_without_placement_keeps_session() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        open(&mut ctl, "1", 1);

        assert!(!ctl.on_reconnected());
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Trading);
        assert_eq!(
            ctl.on_settlement(&settlement("1", dec!(9))),
            SettlementDisposition::Applied
        );
    }

    #[test]
    fn test_previous_session_contract_settles_log_only() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        open(&mut ctl, "A", 1);
        ctl.on_connection_lost("gave up after 5 attempts");

        ctl.start(config()).unwrap();
        // The old contract does not hold up the new session
        assert!(!ctl.has_contract_in_flight());

        assert_eq!(
            ctl.on_settlement(&settlement("A", dec!(-10))),
            SettlementDisposition::LogOnly
        );
        let s = ctl.session().unwrap();
        assert_eq!(s.status, SessionStatus::Waiting);
        assert_eq!(s.stop_reason, None);
        assert_eq!(numbers(s), (dec!(10), Decimal::ZERO, 0, 0));
        assert!(!ctl.trade_log().get(&ContractId::new("A")).unwrap().is_pending());

        assert_eq!(
            ctl.on_settlement(&settlement("A", dec!(-10))),
            SettlementDisposition::Duplicate
        );
    }

    #[test]
    fn test_overdue_settlement_halts_session() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        open(&mut ctl, "1", 1);

        let now = Utc::now();
        assert_eq!(ctl.check_settlement_timeouts_at(now), None);
        assert_eq!(
            ctl.check_settlement_timeouts_at(now + chrono::Duration::seconds(301)),
            Some(ContractId::new("1"))
        );
        let s = ctl.session().unwrap();
        assert_eq!(s.status, SessionStatus::Error);
        assert_eq!(
            s.stop_reason,
            Some(StopReason::SettlementOverdue {
                contract_id: ContractId::new("1")
            })
        );

        // A late settlement is still logged
        assert_eq!(
            ctl.on_settlement(&settlement("1", dec!(9))),
            SettlementDisposition::LogOnly
        );
        assert!(!ctl.trade_log().get(&ContractId::new("1")).unwrap().is_pending());
    }

    #[test]
    fn test_settlement_timeout_disabled() {
        let mut ctl = SessionController::new();
        let mut cfg = config();
        cfg.settlement_timeout_secs = 0;
        ctl.start(cfg).unwrap();
        open(&mut ctl, "1", 1);

        let later = Utc::now() + chrono::Duration::hours(24);
        assert_eq!(ctl.check_settlement_timeouts_at(later), None);
        assert_eq!(ctl.session().unwrap().status, SessionStatus::Trading);
    }

    #[test]
    fn test_entry_spot_recorded_for_open_contract() {
        let mut ctl = SessionController::new();
        ctl.start(config()).unwrap();
        open(&mut ctl, "1", 1);

        assert_eq!(ctl.open_contract_symbol(&ContractId::new("1")), Some("R_100"));
        assert!(ctl.record_entry_spot(&ContractId::new("1"), dec!(1234.57)));
        assert!(!ctl.record_entry_spot(&ContractId::new("2"), dec!(1)));
        assert_eq!(
            ctl.trade_log().get(&ContractId::new("1")).unwrap().entry_price,
            Some(dec!(1234.57))
        );
    }
}
