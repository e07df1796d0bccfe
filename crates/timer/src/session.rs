use crate::clock::Clock;
use crate::error::TimerError;
use api_client::ScheduleSource;
use chrono::{DateTime, Duration, Utc};
use configuration::TimerConfig;
use core_types::TradingDay;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Schedule days fetched for the initial decision.
const DECISION_HORIZON_DAYS: i64 = 2;
/// Width of one look-ahead window when searching for the next trading day.
const LOOKAHEAD_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The main session is open; strategies may trade until `session_end`.
    Start {
        at: DateTime<Utc>,
        session_end: DateTime<Utc>,
    },
    /// The session closes within the configured lead time; wind down.
    Stop { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    BeforeOpen,
    Open,
    AfterClose,
}

/// Emits [`SessionEvent`]s aligned to the exchange's published schedule.
pub struct SessionTimer {
    source: Arc<dyn ScheduleSource>,
    clock: Arc<dyn Clock>,
    exchange: String,
    lead: Duration,
    max_lookahead_windows: u32,
    state: TimerState,
}

impl SessionTimer {
    pub fn new(source: Arc<dyn ScheduleSource>, clock: Arc<dyn Clock>, config: &TimerConfig) -> Self {
        Self {
            source,
            clock,
            exchange: config.exchange.clone(),
            lead: Duration::minutes(config.stop_lead_minutes),
            max_lookahead_windows: config.max_lookahead_windows.max(1),
            state: TimerState::Idle,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Spawns the timer and returns its event queue. The queue closes when
    /// the timer exits.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (
        mpsc::Receiver<SessionEvent>,
        tokio::task::JoinHandle<Result<(), TimerError>>,
    ) {
        let (tx, rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.run(tx, cancel));
        (rx, handle)
    }

    /// Runs the state machine until cancelled. Returns `Ok` on cancellation
    /// or when the consumer drops the event queue.
    pub async fn run(
        mut self,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Result<(), TimerError> {
        loop {
            self.transition(TimerState::Idle);
            let now = self.clock.now();
            let Some(session) = self.cancellable(&cancel, self.find_session(now, None)).await else {
                return Ok(());
            };
            let (start, end) = session?;
            let stop_at = end - self.lead;

            if now < start {
                self.transition(TimerState::BeforeOpen);
                if !self.sleep_until(start, &cancel).await {
                    return Ok(());
                }
            }

            let now = self.clock.now();
            if now < stop_at {
                let event = SessionEvent::Start {
                    at: now,
                    session_end: end,
                };
                if !self.emit(&events, event, &cancel).await {
                    return Ok(());
                }
                self.transition(TimerState::Open);
                if !self.sleep_until(stop_at, &cancel).await {
                    return Ok(());
                }
            }

            // Either the open session reached its stop point, or the timer
            // started inside the lead window of a session.
            let event = SessionEvent::Stop { at: self.clock.now() };
            if !self.emit(&events, event, &cancel).await {
                return Ok(());
            }
            self.transition(TimerState::AfterClose);

            let now = self.clock.now();
            let Some(next) = self.cancellable(&cancel, self.find_session(now, Some(end))).await else {
                return Ok(());
            };
            let (next_start, _) = next?;
            if !self.sleep_until(next_start, &cancel).await {
                return Ok(());
            }
        }
    }

    /// The earliest session that ends after `now` and, when `not_before` is
    /// given, starts no earlier than it. Looks at the next two days first,
    /// then scans week-long windows.
    async fn find_session(
        &self,
        now: DateTime<Utc>,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), TimerError> {
        let pick = |days: Vec<TradingDay>| {
            days.iter()
                .filter_map(TradingDay::session)
                .filter(|(start, end)| *end > now && not_before.is_none_or(|bound| *start >= bound))
                .min()
        };

        let days = self
            .source
            .schedule(&self.exchange, now, now + Duration::days(DECISION_HORIZON_DAYS))
            .await?;
        if let Some(session) = pick(days) {
            return Ok(session);
        }

        for window in 0..i64::from(self.max_lookahead_windows) {
            let from = now + Duration::days(LOOKAHEAD_WINDOW_DAYS * window);
            let to = from + Duration::days(LOOKAHEAD_WINDOW_DAYS);
            let days = self.source.schedule(&self.exchange, from, to).await?;
            if let Some(session) = pick(days) {
                return Ok(session);
            }
            tracing::debug!(exchange = %self.exchange, %from, %to, "No trading day in look-ahead window.");
        }

        Err(TimerError::NoTradingDay {
            exchange: self.exchange.clone(),
            days: LOOKAHEAD_WINDOW_DAYS * i64::from(self.max_lookahead_windows),
        })
    }

    fn transition(&mut self, state: TimerState) {
        if self.state != state {
            tracing::info!(exchange = %self.exchange, from = ?self.state, to = ?state, "Session timer transition.");
            self.state = state;
        }
    }

    async fn cancellable<T>(
        &self,
        cancel: &CancellationToken,
        future: impl std::future::Future<Output = T>,
    ) -> Option<T> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            value = future => Some(value),
        }
    }

    /// Returns `false` when cancelled before `deadline`.
    async fn sleep_until(&self, deadline: DateTime<Utc>, cancel: &CancellationToken) -> bool {
        let remaining = (deadline - self.clock.now()).to_std().unwrap_or_default();
        tracing::debug!(%deadline, "Session timer sleeping.");
        self.cancellable(cancel, tokio::time::sleep(remaining))
            .await
            .is_some()
    }

    async fn emit(
        &self,
        events: &mpsc::Sender<SessionEvent>,
        event: SessionEvent,
        cancel: &CancellationToken,
    ) -> bool {
        tracing::info!(?event, "Session event.");
        match self.cancellable(cancel, events.send(event)).await {
            Some(Ok(())) => true,
            Some(Err(_)) => {
                tracing::debug!("Session event consumer is gone, stopping timer.");
                false
            }
            None => false,
        }
    }
}
