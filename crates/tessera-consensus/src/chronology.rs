//! Round and phase timing
//!
//! Time since genesis is cut into rounds of fixed length. Every round runs
//! the same phase sequence, each phase lasting a configured number of
//! milliseconds. Zero-length phases mark instants (round start and end).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ConsensusError;

/// Source of the current Unix time in milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        ManualClock {
            now: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    StartRound,
    ProposeBlock,
    VerifyBlock,
    MultiSignRound1,
    MultiSignRound2,
    MultiSignRound3,
    EndRound,
}

impl Phase {
    /// Phases in execution order
    pub const ALL: [Phase; 7] = [
        Phase::StartRound,
        Phase::ProposeBlock,
        Phase::VerifyBlock,
        Phase::MultiSignRound1,
        Phase::MultiSignRound2,
        Phase::MultiSignRound3,
        Phase::EndRound,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::StartRound => "START_ROUND",
            Phase::ProposeBlock => "PROPOSE_BLOCK",
            Phase::VerifyBlock => "VERIFY_BLOCK",
            Phase::MultiSignRound1 => "MULTI_SIGN_ROUND_1",
            Phase::MultiSignRound2 => "MULTI_SIGN_ROUND_2",
            Phase::MultiSignRound3 => "MULTI_SIGN_ROUND_3",
            Phase::EndRound => "END_ROUND",
        };
        f.write_str(name)
    }
}

/// Phase durations in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChronologyConfig {
    pub start_round_ms: u64,
    pub propose_block_ms: u64,
    pub verify_block_ms: u64,
    pub multi_sign_round_1_ms: u64,
    pub multi_sign_round_2_ms: u64,
    pub multi_sign_round_3_ms: u64,
    pub end_round_ms: u64,
}

impl Default for ChronologyConfig {
    fn default() -> Self {
        ChronologyConfig {
            start_round_ms: 0,
            propose_block_ms: 2000,
            verify_block_ms: 1000,
            multi_sign_round_1_ms: 250,
            multi_sign_round_2_ms: 250,
            multi_sign_round_3_ms: 250,
            end_round_ms: 0,
        }
    }
}

impl ChronologyConfig {
    fn table(&self) -> [u64; 7] {
        [
            self.start_round_ms,
            self.propose_block_ms,
            self.verify_block_ms,
            self.multi_sign_round_1_ms,
            self.multi_sign_round_2_ms,
            self.multi_sign_round_3_ms,
            self.end_round_ms,
        ]
    }
}

/// A numbered time window starting at `start` (Unix ms)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub index: u64,
    pub start: u64,
}

/// The phase active at some instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    pub round: Round,
    pub phase: Phase,
    /// Milliseconds until the next phase begins
    pub remaining_ms: u64,
}

pub type PhaseHandler = Box<dyn Fn(Phase, &Round) + Send + Sync>;

pub struct RoundScheduler {
    durations: [u64; 7],
    round_duration: u64,
    handlers: [Option<PhaseHandler>; 7],
}

impl RoundScheduler {
    pub fn new(config: &ChronologyConfig) -> Result<Self, ConsensusError> {
        let durations = config.table();
        let round_duration = durations
            .iter()
            .try_fold(0u64, |acc, d| acc.checked_add(*d))
            .ok_or_else(|| ConsensusError::InvalidArgument("round duration overflows".into()))?;
        if round_duration == 0 {
            return Err(ConsensusError::InvalidArgument(
                "round duration must be positive".into(),
            ));
        }

        Ok(RoundScheduler {
            durations,
            round_duration,
            handlers: Default::default(),
        })
    }

    pub fn round_duration(&self) -> u64 {
        self.round_duration
    }

    pub fn phase_duration(&self, phase: Phase) -> u64 {
        self.durations[phase.index()]
    }

    /// Start of round `index`, `None` if it is not representable
    pub fn round_start(&self, genesis: u64, index: u64) -> Option<u64> {
        index
            .checked_mul(self.round_duration)
            .and_then(|offset| offset.checked_add(genesis))
    }

    pub fn round_for(&self, genesis: u64, now: u64) -> Result<Round, ConsensusError> {
        if now < genesis {
            return Err(ConsensusError::InvalidArgument(format!(
                "time {} precedes genesis {}",
                now, genesis
            )));
        }
        let index = (now - genesis) / self.round_duration;
        Ok(Round {
            index,
            start: genesis + index * self.round_duration,
        })
    }

    pub fn is_within_round(&self, round: &Round, timestamp: u64) -> bool {
        timestamp >= round.start && timestamp - round.start < self.round_duration
    }

    pub fn phase_at(&self, genesis: u64, now: u64) -> Result<PhaseTiming, ConsensusError> {
        let round = self.round_for(genesis, now)?;
        let offset = now - round.start;

        let mut end = 0u64;
        for phase in Phase::ALL {
            end += self.phase_duration(phase);
            if offset < end {
                return Ok(PhaseTiming {
                    round,
                    phase,
                    remaining_ms: end - offset,
                });
            }
        }

        // offset < round_duration, so some phase with positive length matched
        Err(ConsensusError::InvalidArgument(format!(
            "offset {} outside round of {}ms",
            offset, self.round_duration
        )))
    }

    /// Sleep until the current round ends and return the round that begins
    pub async fn wait_for_next_round_boundary(
        &self,
        genesis: u64,
        clock: &dyn Clock,
    ) -> Result<Round, ConsensusError> {
        let now = clock.now_ms();
        let round = self.round_for(genesis, now)?;
        let remaining = self.round_duration - (now - round.start);

        trace!("Sleeping {}ms until round {}", remaining, round.index + 1);
        tokio::time::sleep(Duration::from_millis(remaining)).await;

        Ok(Round {
            index: round.index + 1,
            start: round.start + self.round_duration,
        })
    }

    /// Register the action run when `phase` begins, replacing any previous one
    pub fn set_handler<F>(&mut self, phase: Phase, handler: F)
    where
        F: Fn(Phase, &Round) + Send + Sync + 'static,
    {
        self.handlers[phase.index()] = Some(Box::new(handler));
    }

    fn enter(&self, phase: Phase, round: &Round) {
        debug!("Round {} entering {}", round.index, phase);
        if let Some(handler) = &self.handlers[phase.index()] {
            handler(phase, round);
        }
    }

    /// Fire phase handlers forever, starting with the next full round
    pub async fn run(&self, genesis: u64, clock: &dyn Clock) -> Result<(), ConsensusError> {
        let now = clock.now_ms();
        let mut index = if now < genesis {
            0
        } else {
            self.round_for(genesis, now)?.index + 1
        };

        loop {
            let start = self.round_start(genesis, index).ok_or_else(|| {
                ConsensusError::InvalidArgument(format!("round {} out of range", index))
            })?;
            let round = Round { index, start };

            let mut phase_start = start;
            for phase in Phase::ALL {
                sleep_until(clock, phase_start).await;
                self.enter(phase, &round);
                phase_start += self.phase_duration(phase);
            }
            index += 1;
        }
    }
}

async fn sleep_until(clock: &dyn Clock, deadline: u64) {
    let now = clock.now_ms();
    if deadline > now {
        tokio::time::sleep(Duration::from_millis(deadline - now)).await;
    }
}
