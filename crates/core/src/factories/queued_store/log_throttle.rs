use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

#[derive(Debug, Default)]
struct State {
    last_logged: Option<Instant>,
    suppressed: u64,
}

/// Allows one log line per interval, so that a burst of correlated
/// failures does not flood the log.
#[derive(Debug)]
pub(crate) struct LogThrottle {
    interval: Duration,
    state: Mutex<State>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(State::default()),
        }
    }

    /// Returns `Some(n)` if the caller should log now, `n` being the
    /// number of log lines suppressed since the last one.
    pub fn check(&self) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let due = match state.last_logged {
            None => true,
            Some(at) => now.duration_since(at) >= self.interval,
        };
        if due {
            state.last_logged = Some(now);
            Some(std::mem::take(&mut state.suppressed))
        } else {
            state.suppressed += 1;
            None
        }
    }
}
