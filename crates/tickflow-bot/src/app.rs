//! Main application orchestrator.
//!
//! One task owns the connection (see `tickflow_ws::ConnectionManager`); the
//! dispatch loop in [`Application::run`] owns everything else. Every frame,
//! state change and transport fault arrives as a `ConnectionEvent` on a
//! single queue and is handled to completion before the next one, so the
//! aggregators, the controller and the trade log need no locks.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::notify::{LogSink, NotificationSink};
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tickflow_feed::{DigitAggregator, DigitExtractor, DigitSignalDetector, SymbolCatalogue};
use tickflow_session::{SessionController, SettlementDisposition};
use tickflow_telemetry::Metrics;
use tickflow_ws::{
    ApiError, BuyPayload, ConnectionEvent, ConnectionManager, ContractPayload, InboundFrame,
    SubscriptionKind, TickPayload, WsResult, WsWriteHandle,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Capacity of the connection event queue.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// How often open contracts are checked for an overdue settlement.
const SETTLEMENT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Main application.
pub struct Application {
    config: AppConfig,
    manager: Arc<ConnectionManager>,
    handle: WsWriteHandle,
    event_rx: mpsc::Receiver<ConnectionEvent>,
    extractor: DigitExtractor,
    aggregators: HashMap<String, DigitAggregator>,
    detector: DigitSignalDetector,
    controller: SessionController,
    sink: Box<dyn NotificationSink>,
}

impl Application {
    /// Create a new application that reports through the log.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        Self::with_sink(config, Box::new(LogSink))
    }

    /// Create a new application with a custom notification sink.
    pub fn with_sink(config: AppConfig, sink: Box<dyn NotificationSink>) -> AppResult<Self> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let manager = Arc::new(ConnectionManager::new(config.connection_config(), event_tx));
        let handle = manager.write_handle();

        let catalogue: Arc<dyn SymbolCatalogue> = Arc::new(config.catalogue());
        let detector = DigitSignalDetector::new(config.signal.clone())?;

        Ok(Self {
            extractor: DigitExtractor::new(catalogue),
            aggregators: HashMap::new(),
            detector,
            controller: SessionController::new(),
            manager,
            handle,
            event_rx,
            sink,
            config,
        })
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Digit window of `symbol`, once it has seen a tick.
    pub fn aggregator(&self, symbol: &str) -> Option<&DigitAggregator> {
        self.aggregators.get(symbol)
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Register the stream subscriptions. They are sent once connected.
    pub fn subscribe_all(&self) -> AppResult<()> {
        let mut kinds: Vec<SubscriptionKind> = self
            .config
            .symbols()
            .map(|s| SubscriptionKind::Ticks(s.to_string()))
            .collect();
        kinds.push(SubscriptionKind::Balance);
        if !self.config.observe_only {
            kinds.push(SubscriptionKind::Portfolio);
        }

        for kind in kinds {
            let id = self.handle.subscribe(kind.clone()).map_err(Box::new)?;
            debug!(%kind, %id, "Subscription registered");
        }
        Ok(())
    }

    /// Start the trading session, unless observing only.
    pub fn start_session(&mut self) -> AppResult<()> {
        if self.config.observe_only {
            info!("Observe-only mode, no trading session");
            return Ok(());
        }
        self.controller.start(self.config.session.clone())?;
        self.publish_session();
        Ok(())
    }

    /// Run until the connection stops or gives up.
    pub async fn run(mut self) -> AppResult<()> {
        info!(
            url = %self.config.ws_url,
            markets = ?self.config.symbols().collect::<Vec<_>>(),
            observe_only = self.config.observe_only,
            "Starting application"
        );

        self.subscribe_all()?;
        self.start_session()?;

        let manager = self.manager.clone();
        let mut ws_task: JoinHandle<WsResult<()>> =
            tokio::spawn(async move { manager.connect().await });

        let mut settlement_check = tokio::time::interval(SETTLEMENT_CHECK_INTERVAL);
        settlement_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Entering dispatch loop");
        let mut shutting_down = false;
        let connection_result = loop {
            tokio::select! {
                biased;

                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }

                result = &mut ws_task => {
                    while let Ok(event) = self.event_rx.try_recv() {
                        self.handle_event(event);
                    }
                    break result;
                }

                _ = settlement_check.tick() => {
                    self.check_settlements();
                }

                _ = tokio::signal::ctrl_c(), if !shutting_down => {
                    info!("Shutdown signal received");
                    shutting_down = true;
                    self.controller.stop();
                    self.manager.shutdown();
                }
            }
        };

        let outcome = match connection_result? {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "Connection failed");
                self.controller.on_connection_lost(&e.to_string());
                Err(AppError::WebSocket(Box::new(e)))
            }
        };

        self.log_summary();
        outcome
    }

    /// Handle one event from the connection task.
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                Metrics::ws_state_set(&state.to_string());
                self.sink.connection_state(state);
            }
            ConnectionEvent::Connected { replayed } => {
                info!(replayed, "Connected, subscriptions requested");
                self.extractor.reset();
                if self.controller.on_reconnected() {
                    Metrics::placement("unconfirmed");
                    self.publish_session();
                }
            }
            ConnectionEvent::FrameReceived(frame) => self.handle_frame(frame),
            ConnectionEvent::Closed(reason) => {
                warn!(%reason, "Connection closed");
            }
            ConnectionEvent::TransportError(reason) => {
                Metrics::transport_error();
                warn!(%reason, "Transport error");
            }
            ConnectionEvent::Reconnecting { attempt, delay_ms } => {
                Metrics::ws_reconnect();
                info!(attempt, delay_ms, "Reconnecting");
            }
            ConnectionEvent::RequestDropped { req_id } => {
                if self
                    .controller
                    .on_placement_failed(Some(req_id), "dropped on disconnect")
                {
                    Metrics::placement("dropped");
                }
            }
            ConnectionEvent::GaveUp { attempts } => {
                error!(attempts, "Reconnect attempts exhausted");
                self.controller
                    .on_connection_lost(&format!("gave up after {attempts} reconnect attempts"));
                self.publish_session();
            }
            ConnectionEvent::Stopped => {
                info!("Connection stopped");
            }
        }
    }

    fn handle_frame(&mut self, frame: InboundFrame) {
        Metrics::frame_received(frame.kind());

        match frame {
            InboundFrame::Tick { tick, .. } => self.on_tick(&tick),
            InboundFrame::Balance { balance, .. } => {
                info!(balance = %balance.balance, currency = %balance.currency, "Balance");
            }
            InboundFrame::Contract { contract, .. } => self.on_contract_update(&contract),
            InboundFrame::Buy { buy, req_id } => self.on_buy(req_id, &buy),
            InboundFrame::Error {
                error,
                msg_type,
                req_id,
            } => self.on_api_error(&error, msg_type.as_deref(), req_id),
            InboundFrame::Unrecognized { msg_type } => {
                debug!(%msg_type, "Unhandled frame type");
            }
            InboundFrame::Pong | InboundFrame::ForgetAck | InboundFrame::Malformed { .. } => {}
        }
    }

    fn on_tick(&mut self, payload: &TickPayload) {
        let tick = match self.extractor.extract(payload) {
            Ok(tick) => tick,
            Err(e) => {
                Metrics::invalid_tick();
                warn!(error = %e, "Tick rejected");
                return;
            }
        };

        let capacity = self.config.aggregator.window;
        let aggregator = self
            .aggregators
            .entry(tick.symbol.clone())
            .or_insert_with(|| DigitAggregator::new(capacity));
        aggregator.push(tick.clone());
        let snapshot = aggregator.snapshot();
        self.sink.tick(&tick, &snapshot);

        let Some(signal) = self.detector.evaluate(&tick.symbol, &snapshot) else {
            return;
        };
        Metrics::signal(signal.contract_type.as_str());
        if self.config.observe_only {
            return;
        }

        let Some(request) = self.controller.on_signal(&signal) else {
            return;
        };
        match self.handle.buy(&request) {
            Ok(req_id) => {
                Metrics::placement("queued");
                self.controller.on_placement_queued(req_id);
                info!(
                    req_id,
                    symbol = %request.symbol,
                    contract_type = %request.contract_type,
                    barrier = request.barrier,
                    stake = %request.stake,
                    "Contract placement queued"
                );
            }
            Err(e) => {
                Metrics::placement("failed");
                self.controller.on_placement_failed(None, &e.to_string());
            }
        }
    }

    fn on_buy(&mut self, req_id: Option<u64>, buy: &BuyPayload) {
        let receipt = buy.receipt();
        if !self.controller.on_contract_opened(req_id, &receipt) {
            return;
        }
        let quote = self
            .controller
            .open_contract_symbol(&receipt.contract_id)
            .and_then(|symbol| self.aggregators.get(symbol))
            .and_then(|window| window.latest())
            .map(|tick| tick.price.inner());
        match quote {
            Some(price) => {
                self.controller.record_entry_spot(&receipt.contract_id, price);
            }
            None => debug!(contract_id = %receipt.contract_id, "No quote seen for contract symbol"),
        }
        if let Some(entry) = self.controller.trade_log().get(&receipt.contract_id) {
            self.sink.trade(entry);
        }
        self.publish_session();
    }

    fn on_contract_update(&mut self, contract: &ContractPayload) {
        let Some(settlement) = contract.settlement() else {
            if let Some(id) = &contract.contract_id {
                debug!(contract_id = %id, profit = ?contract.profit, "Contract update");
                if let Some(spot) = contract.entry_spot {
                    self.controller.record_entry_spot(id, spot);
                }
            }
            return;
        };

        match self.controller.on_settlement(&settlement) {
            SettlementDisposition::Applied | SettlementDisposition::LogOnly => {
                Metrics::trade_settled(&settlement.outcome.to_string());
                if let Some(entry) = self.controller.trade_log().get(&settlement.contract_id) {
                    self.sink.trade(entry);
                }
            }
            SettlementDisposition::Duplicate => return,
            SettlementDisposition::Unknown => {}
        }
        self.publish_session();
    }

    fn on_api_error(&mut self, error: &ApiError, msg_type: Option<&str>, req_id: Option<u64>) {
        Metrics::api_error(&error.code);
        warn!(
            code = %error.code,
            message = %error.message,
            msg_type,
            req_id,
            "Venue error"
        );

        if let Some(id) = req_id.filter(|id| self.controller.is_in_flight_request(*id)) {
            self.controller.on_placement_failed(Some(id), &error.message);
            Metrics::placement("rejected");
        }
    }

    /// Halt the session if an open contract has waited too long.
    pub fn check_settlements(&mut self) {
        if let Some(contract_id) = self.controller.check_settlement_timeouts() {
            warn!(%contract_id, "Settlement overdue");
            self.publish_session();
        }
    }

    fn publish_session(&mut self) {
        if let Some(session) = self.controller.session() {
            Metrics::session_numbers(
                session.current_profit.to_f64().unwrap_or_default(),
                session.stake.to_f64().unwrap_or_default(),
            );
            self.sink.session(session);
        }
    }

    fn log_summary(&mut self) {
        let stats = self.controller.trade_log().stats();
        info!(
            total = stats.total,
            wins = stats.wins,
            losses = stats.losses,
            pending = stats.pending,
            win_rate = stats.win_rate,
            pnl = %stats.total_pnl,
            "Trade summary"
        );
        self.publish_session();
    }
}
