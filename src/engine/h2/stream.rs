//! Per-stream state machine and flow-control bookkeeping.
//!
//! State graph grounded on `rama-http-core/src/h2/proto/streams/state.rs`,
//! trimmed to the transitions a client-only engine drives: no
//! `ReservedLocal`/`ReservedRemote` (those exist for server push, which is
//! disabled via `SETTINGS_ENABLE_PUSH=0`).

use tokio::sync::Notify;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Idle,
    Open { local_closed: bool, remote_closed: bool },
    Closed,
}

impl State {
    pub(crate) fn is_closed(self) -> bool {
        matches!(self, State::Closed)
    }

    /// We sent HEADERS (and, if `end_stream`, possibly the only frame).
    pub(crate) fn send_open(&mut self, end_stream: bool) -> Result<(), Error> {
        match *self {
            State::Idle => {
                *self = if end_stream {
                    State::Open {
                        local_closed: true,
                        remote_closed: false,
                    }
                } else {
                    State::Open {
                        local_closed: false,
                        remote_closed: false,
                    }
                };
                Ok(())
            }
            _ => Err(Error::protocol("stream not idle on send_open")),
        }
    }

    /// We sent a DATA frame with `END_STREAM`, or a trailing HEADERS.
    pub(crate) fn send_close(&mut self) -> Result<(), Error> {
        match *self {
            State::Open { remote_closed: true, .. } => {
                *self = State::Closed;
                Ok(())
            }
            State::Open { remote_closed: false, .. } => {
                *self = State::Open {
                    local_closed: true,
                    remote_closed: false,
                };
                Ok(())
            }
            _ => Err(Error::protocol("stream not open on send_close")),
        }
    }

    /// The peer sent a frame carrying `END_STREAM`.
    pub(crate) fn recv_close(&mut self) -> Result<(), Error> {
        match *self {
            State::Open { local_closed: true, .. } => {
                *self = State::Closed;
                Ok(())
            }
            State::Open { local_closed: false, .. } => {
                *self = State::Open {
                    local_closed: false,
                    remote_closed: true,
                };
                Ok(())
            }
            State::Idle => Err(Error::protocol("END_STREAM on idle stream")),
            State::Closed => Ok(()),
        }
    }

    pub(crate) fn force_close(&mut self) {
        *self = State::Closed;
    }
}

/// Per-direction flow-control window, shared between the connection level
/// and each stream level (RFC 7540 §6.9). `available` can go negative
/// transiently after a SETTINGS_INITIAL_WINDOW_SIZE reduction; we clamp
/// reads of it to zero via `can_send`.
pub(crate) struct FlowControl {
    available: i64,
    notify: Notify,
}

impl FlowControl {
    pub(crate) fn new(initial: u32) -> Self {
        Self {
            available: i64::from(initial),
            notify: Notify::new(),
        }
    }

    pub(crate) fn available(&self) -> i64 {
        self.available
    }

    pub(crate) fn can_send(&self, n: usize) -> bool {
        self.available >= n as i64
    }

    pub(crate) fn consume(&mut self, n: usize) {
        self.available -= n as i64;
    }

    pub(crate) fn credit(&mut self, n: u32) {
        self.available += i64::from(n);
        self.notify.notify_waiters();
    }

    pub(crate) fn apply_initial_window_delta(&mut self, delta: i64) {
        self.available += delta;
    }

    pub(crate) async fn wait_for_credit(&self) {
        self.notify.notified().await;
    }
}

/// Bookkeeping for one client-initiated H2 stream.
pub(crate) struct Stream {
    pub(crate) id: u32,
    pub(crate) state: State,
    pub(crate) send_window: FlowControl,
    pub(crate) recv_window: FlowControl,
}

impl Stream {
    pub(crate) fn new(id: u32, initial_send_window: u32, initial_recv_window: u32) -> Self {
        Self {
            id,
            state: State::Idle,
            send_window: FlowControl::new(initial_send_window),
            recv_window: FlowControl::new(initial_recv_window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_mutual_close() {
        let mut s = State::Idle;
        s.send_open(false).unwrap();
        assert_eq!(s, State::Open { local_closed: false, remote_closed: false });
        s.recv_close().unwrap();
        assert_eq!(s, State::Open { local_closed: false, remote_closed: true });
        s.send_close().unwrap();
        assert!(s.is_closed());
    }

    #[test]
    fn request_with_no_body_closes_locally_immediately() {
        let mut s = State::Idle;
        s.send_open(true).unwrap();
        assert_eq!(s, State::Open { local_closed: true, remote_closed: false });
    }

    #[test]
    fn flow_control_consume_and_credit() {
        let mut fc = FlowControl::new(100);
        assert!(fc.can_send(100));
        fc.consume(60);
        assert!(!fc.can_send(60));
        fc.credit(60);
        assert!(fc.can_send(60));
    }
}
