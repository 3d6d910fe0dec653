use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Twitter snowflake epoch, 2010-11-04T01:42:54Z in unix milliseconds.
const EPOCH0: i64 = 1_288_834_974_657;
const TIME_SHIFT: u32 = 22;
const NODE_SHIFT: u32 = 10;
/// Sequence wraps within the low 10 bits.
const MAX_SEQUENCE: i64 = (1 << NODE_SHIFT) - 1;
/// Node bits fill the gap between the time and sequence fields.
const NODE_MASK: i64 = (1 << (TIME_SHIFT - NODE_SHIFT)) - 1;

const FNV64_OFFSET: u64 = 14_695_981_039_346_656_037;
const FNV64_PRIME: u64 = 1_099_511_628_211;

fn fnv64(data: &str) -> u64 {
    let mut hash = FNV64_OFFSET;
    for byte in data.as_bytes() {
        hash = hash.wrapping_mul(FNV64_PRIME);
        hash ^= *byte as u64;
    }
    hash
}

struct GeneratorState {
    last_stamp: i64,
    sequence: i64,
}

/// Snowflake-style 64-bit ID generator: `time | node | sequence`. IDs from
/// one generator are strictly increasing; generators with distinct node
/// strings never collide.
pub struct IdGenerator {
    node_id: i64,
    state: Mutex<GeneratorState>,
}

impl IdGenerator {
    pub fn new(node: &str) -> Self {
        IdGenerator {
            node_id: (fnv64(node) as i64) & NODE_MASK,
            state: Mutex::new(GeneratorState {
                last_stamp: -1,
                sequence: 0,
            }),
        }
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock();

        let mut timestamp = millis_since_epoch0();
        if timestamp < state.last_stamp {
            // The clock stepped backwards; stay on the last stamp so the
            // sequence keeps the output monotonic.
            timestamp = state.last_stamp;
        }

        if timestamp == state.last_stamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted within this millisecond.
                while timestamp <= state.last_stamp {
                    timestamp = millis_since_epoch0();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_stamp = timestamp;

        (timestamp << TIME_SHIFT) | (self.node_id << NODE_SHIFT) | state.sequence
    }
}

fn millis_since_epoch0() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_millis() as i64;
    now - EPOCH0
}
