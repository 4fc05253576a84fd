use std::sync::Mutex;

/// 2025-01-01T00:00:00Z in Unix milliseconds.
pub const NOCTES_EPOCH_MS: u64 = 1_735_689_600_000;

const SEQUENCE_BITS: u32 = 16;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_RELATIVE_MS: u64 = (1 << 48) - 1;

struct GeneratorState {
    last_ms: u64,
    sequence: u64,
}

/// Time-ordered 64-bit id generator: 48 bits of milliseconds since
/// `NOCTES_EPOCH_MS`, then a 16-bit per-millisecond sequence.
pub struct SnowflakeGenerator {
    epoch_ms: u64,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    pub fn new(epoch_ms: u64) -> Self {
        Self {
            epoch_ms,
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> u64 {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        loop {
            let now = now_millis().max(state.last_ms);
            if now > state.last_ms {
                state.last_ms = now;
                state.sequence = 0;
            }

            if state.sequence <= MAX_SEQUENCE {
                let sequence = state.sequence;
                state.sequence += 1;
                let relative = now.saturating_sub(self.epoch_ms) & MAX_RELATIVE_MS;
                return (relative << SEQUENCE_BITS) | sequence;
            }

            // Sequence exhausted for this millisecond; wait for the clock.
            std::thread::yield_now();
        }
    }
}

impl Default for SnowflakeGenerator {
    fn default() -> Self {
        Self::new(NOCTES_EPOCH_MS)
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
