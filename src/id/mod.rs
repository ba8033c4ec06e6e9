//! Unique identifier generation
//!
//! Snowflake layout (63 bits, always a positive `i64`):
//!   - 41 bits: milliseconds since 2024-01-01 UTC
//!   - 10 bits: node id
//!   - 12 bits: per-millisecond sequence

use chrono::Utc;
use std::sync::Mutex;
use thiserror::Error;

/// Custom epoch: 2024-01-01 00:00:00 UTC
const EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_BITS: u32 = 41;

pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;

/// Clock regressions up to this many milliseconds are absorbed
const CLOCK_TOLERANCE_MS: u64 = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("node id {0} exceeds maximum 1023")]
    InvalidNode(u16),

    #[error("clock moved backwards by {0}ms")]
    ClockMovedBackwards(u64),

    #[error("clock is before the id epoch")]
    ClockBeforeEpoch,

    #[error("id timestamp space exhausted")]
    Exhausted,

    #[error("id generator state poisoned")]
    Poisoned,
}

/// Source of unique, increasing identifiers
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Result<u64, IdError>;
}

#[derive(Debug)]
struct State {
    last_ms: u64,
    sequence: u64,
}

/// Process-local Snowflake generator
#[derive(Debug)]
pub struct SnowflakeGenerator {
    node_id: u16,
    state: Mutex<State>,
    clock: fn() -> i64,
}

fn system_clock_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl SnowflakeGenerator {
    pub fn new(node_id: u16) -> Result<Self, IdError> {
        Self::with_clock(node_id, system_clock_ms)
    }

    fn with_clock(node_id: u16, clock: fn() -> i64) -> Result<Self, IdError> {
        if node_id > MAX_NODE_ID {
            return Err(IdError::InvalidNode(node_id));
        }
        Ok(Self {
            node_id,
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
            clock,
        })
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    fn elapsed_ms(&self) -> Result<u64, IdError> {
        let elapsed = (self.clock)() - EPOCH_MS;
        u64::try_from(elapsed).map_err(|_| IdError::ClockBeforeEpoch)
    }

    fn wait_next_ms(&self, last_ms: u64) -> Result<u64, IdError> {
        loop {
            let now = self.elapsed_ms()?;
            if now > last_ms {
                return Ok(now);
            }
            std::hint::spin_loop();
        }
    }

    /// Split an id into (milliseconds since epoch, node, sequence)
    pub fn decompose(id: u64) -> (u64, u16, u64) {
        let sequence = id & MAX_SEQUENCE;
        let node = ((id >> SEQUENCE_BITS) & u64::from(MAX_NODE_ID)) as u16;
        let ms = id >> (SEQUENCE_BITS + NODE_BITS);
        (ms, node, sequence)
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn generate(&self) -> Result<u64, IdError> {
        let mut state = self.state.lock().map_err(|_| IdError::Poisoned)?;

        let mut now = self.elapsed_ms()?;
        if now < state.last_ms {
            let drift = state.last_ms - now;
            if drift > CLOCK_TOLERANCE_MS {
                return Err(IdError::ClockMovedBackwards(drift));
            }
            now = state.last_ms;
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond
                now = self.wait_next_ms(state.last_ms)?;
            }
        } else {
            state.sequence = 0;
        }

        if now > MAX_TIMESTAMP {
            return Err(IdError::Exhausted);
        }
        state.last_ms = now;

        Ok((now << (NODE_BITS + SEQUENCE_BITS))
            | (u64::from(self.node_id) << SEQUENCE_BITS)
            | state.sequence)
    }
}
