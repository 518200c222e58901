//! Live submission intake for one round.
//!
//! [`RoundCollector::collect`] blocks on three sources at once: client
//! submissions, an operator abort signal and the deadline timer. Arrivals are
//! stamped by the submission handle with the coordinator's clock
//! (milliseconds since the Unix epoch), so a late arrival keeps its real time
//! and is later classified as a straggler. Only on-time arrivals count toward
//! quorum. If quorum is short at the deadline the round is extended once by
//! the grace period, closing early as soon as quorum is met; after that it is
//! force-closed with whatever arrived.
//!
//! ```no_run
//! use qora_gate::round::{Round, RoundCollector, StragglerPolicy, collector::now_ms};
//!
//! let round = Round::open(1, now_ms() + 5_000);
//! let (collector, submissions, _abort) = RoundCollector::open(round, StragglerPolicy::new(3, 1_000));
//! // hand `submissions` clones to client-facing workers...
//! drop(submissions);
//! let round = collector.collect().unwrap();
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{after, bounded, never, select, unbounded, Receiver, Sender, TrySendError};

use crate::error::GateError;
use crate::model::ClientUpdate;

use super::{Round, StragglerPolicy};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sends client updates into an open round. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SubmissionHandle {
    round_id: u64,
    tx: Sender<ClientUpdate>,
}

impl SubmissionHandle {
    /// Round the handle feeds.
    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    /// Submit an update; fails with `RoundClosed` once intake has ended.
    ///
    /// The update's timestamp is replaced with its arrival time.
    pub fn submit(&self, mut update: ClientUpdate) -> Result<(), GateError> {
        update.timestamp = now_ms();
        self.tx
            .send(update)
            .map_err(|_| GateError::RoundClosed(self.round_id))
    }
}

/// Cancels an open round. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    round_id: u64,
    tx: Sender<()>,
}

impl AbortHandle {
    /// Request cancellation. Repeated requests are no-ops.
    pub fn abort(&self) -> Result<(), GateError> {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(GateError::RoundClosed(self.round_id)),
        }
    }
}

enum Event {
    Update(Option<ClientUpdate>),
    Abort(bool),
    Timer,
}

enum Wake {
    Deadline,
    Quorum,
    Disconnected,
}

/// Blocking intake loop for one round.
#[derive(Debug)]
pub struct RoundCollector {
    round: Round,
    policy: StragglerPolicy,
    updates: Receiver<ClientUpdate>,
    abort: Receiver<()>,
}

impl RoundCollector {
    /// Wrap an open round, returning the collector and its handles.
    pub fn open(round: Round, policy: StragglerPolicy) -> (Self, SubmissionHandle, AbortHandle) {
        let round_id = round.round_id();
        let (tx, updates) = unbounded();
        let (abort_tx, abort) = bounded(1);
        (
            Self {
                round,
                policy,
                updates,
                abort,
            },
            SubmissionHandle { round_id, tx },
            AbortHandle {
                round_id,
                tx: abort_tx,
            },
        )
    }

    /// Round being collected.
    pub fn round(&self) -> &Round {
        &self.round
    }

    /// Collect until the deadline (plus grace, if needed) and return the
    /// round, still open and ready for aggregation.
    pub fn collect(self) -> Result<Round, GateError> {
        let Self {
            mut round,
            policy,
            updates,
            mut abort,
        } = self;

        let mut wake = intake(&mut round, &updates, &mut abort, None)?;

        if matches!(wake, Wake::Deadline)
            && policy.needs_extension(on_time(&round), round.is_extended())
        {
            round.extend(policy.grace_ms())?;
            wake = intake(&mut round, &updates, &mut abort, Some(policy.min_clients()))?;
        }

        match wake {
            Wake::Quorum => log::info!("round {}: quorum reached during grace", round.round_id()),
            Wake::Disconnected => log::debug!("round {}: all submitters gone", round.round_id()),
            Wake::Deadline if on_time(&round) < policy.min_clients() => log::warn!(
                "round {}: forced close with {} of {} required updates",
                round.round_id(),
                on_time(&round),
                policy.min_clients()
            ),
            Wake::Deadline => {}
        }

        // Buffered arrivals stay in the round; admission sorts out stragglers
        for late in updates.try_iter() {
            log::debug!(
                "round {}: buffered submission from {} at {}",
                round.round_id(),
                late.client_id,
                late.timestamp
            );
            if let Err(e) = round.submit(late) {
                log::warn!("round {}: submission refused: {}", round.round_id(), e);
            }
        }

        log::info!(
            "round {}: intake closed with {} submissions",
            round.round_id(),
            round.submissions().len()
        );
        Ok(round)
    }
}

fn on_time(round: &Round) -> usize {
    round
        .submissions()
        .iter()
        .filter(|u| u.timestamp <= round.effective_deadline())
        .count()
}

fn intake(
    round: &mut Round,
    updates: &Receiver<ClientUpdate>,
    abort: &mut Receiver<()>,
    early_quorum: Option<usize>,
) -> Result<Wake, GateError> {
    let remaining = round.effective_deadline().saturating_sub(now_ms());
    let timer = after(Duration::from_millis(remaining));

    loop {
        if let Some(quorum) = early_quorum {
            if on_time(round) >= quorum {
                return Ok(Wake::Quorum);
            }
        }

        let abort_rx: &Receiver<()> = abort;
        let event = select! {
            recv(updates) -> msg => Event::Update(msg.ok()),
            recv(abort_rx) -> msg => Event::Abort(msg.is_ok()),
            recv(timer) -> _ => Event::Timer,
        };

        match event {
            Event::Update(Some(update)) => {
                if let Err(e) = round.submit(update) {
                    log::warn!("round {}: submission refused: {}", round.round_id(), e);
                }
            }
            Event::Update(None) => return Ok(Wake::Disconnected),
            Event::Abort(true) => {
                round.abort()?;
                return Err(GateError::RoundAborted(round.round_id()));
            }
            // Every abort handle dropped; stop watching
            Event::Abort(false) => *abort = never(),
            Event::Timer => return Ok(Wake::Deadline),
        }
    }
}
