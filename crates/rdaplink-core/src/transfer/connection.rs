//! Drive connection state shared with the timer task
//!
//! The USB thread and the periodic timer both touch the
//! `current / next / remaining` triple, so it lives behind a blocking
//! mutex. Everything else in the transfer path is single-threaded.

use core::cell::RefCell;
use core::cmp::min;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Whether the drive is visible to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Media not present
    Disconnected,
    /// Media removed, waiting to come back
    Reconnecting,
    /// Media present
    Connected,
}

/// Delays between connection state changes, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionDelays {
    /// Before the drive first appears
    pub connect_ms: u32,
    /// Of host inactivity before the drive is removed
    pub disconnect_ms: u32,
    /// Before a removed drive comes back
    pub reconnect_ms: u32,
}

impl ConnectionDelays {
    /// Usable in `const` context, same as [`Default::default`]
    pub const DEFAULT: Self = Self {
        connect_ms: 0,
        disconnect_ms: 500,
        reconnect_ms: 2500,
    };
}

impl Default for ConnectionDelays {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A state change reported by [`ConnectionControl::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State left
    pub from: ConnectionState,
    /// State entered
    pub to: ConnectionState,
}

#[derive(Debug)]
struct Inner {
    current: ConnectionState,
    next: ConnectionState,
    remaining_ms: u32,
}

/// Connection state machine
///
/// Usually placed in a `static` so the timer task and the USB thread can
/// share it.
pub struct ConnectionControl<M: RawMutex> {
    delays: ConnectionDelays,
    inner: Mutex<M, RefCell<Inner>>,
}

impl<M: RawMutex> ConnectionControl<M> {
    /// Create a disconnected controller
    pub const fn new(delays: ConnectionDelays) -> Self {
        Self {
            delays,
            inner: Mutex::new(RefCell::new(Inner {
                current: ConnectionState::Disconnected,
                next: ConnectionState::Disconnected,
                remaining_ms: 0,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Configured delays
    pub fn delays(&self) -> ConnectionDelays {
        self.delays
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.with(|s| s.current)
    }

    /// Whether a state change is pending
    pub fn is_changing(&self) -> bool {
        self.with(|s| s.current != s.next)
    }

    /// Jump straight to connected or disconnected
    pub fn init(&self, connected: bool) {
        let state = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        self.with(|s| {
            s.current = state;
            s.next = state;
            s.remaining_ms = 0;
        });
    }

    /// Request the drive to appear or disappear
    pub fn enable(&self, enable: bool) {
        let delays = self.delays;
        self.with(|s| {
            if enable {
                s.next = ConnectionState::Connected;
                s.remaining_ms = delays.connect_ms;
            } else {
                s.next = ConnectionState::Disconnected;
                s.remaining_ms = delays.disconnect_ms;
            }
        });
    }

    /// Request a disconnect/reconnect cycle
    ///
    /// Ignored unless connected with no change pending.
    pub fn remount(&self) {
        let delay = self.delays.disconnect_ms;
        self.with(|s| {
            if s.current == ConnectionState::Connected && s.next == ConnectionState::Connected {
                s.next = ConnectionState::Reconnecting;
                s.remaining_ms = delay;
            }
        });
    }

    /// Cancel a pending remount
    pub fn abort_remount(&self) {
        self.with(|s| {
            if s.current == ConnectionState::Connected && s.next == ConnectionState::Reconnecting {
                s.next = ConnectionState::Connected;
            }
        });
    }

    /// Restart the disconnect delay; called on every host write
    pub fn restart_disconnect_delay(&self) {
        let delay = self.delays.disconnect_ms;
        self.with(|s| {
            if s.current == ConnectionState::Connected {
                s.remaining_ms = delay;
            }
        });
    }

    /// Advance the timers by `elapsed_ms`
    ///
    /// The state changes on the first tick after the delay has run out.
    pub fn tick(&self, elapsed_ms: u32) -> Option<Transition> {
        let reconnect = self.delays.reconnect_ms;
        self.with(|s| {
            if s.current == s.next {
                return None;
            }
            if s.remaining_ms > 0 {
                s.remaining_ms -= min(elapsed_ms, s.remaining_ms);
                return None;
            }

            let from = s.current;
            s.current = s.next;
            if s.current == ConnectionState::Reconnecting {
                s.next = ConnectionState::Connected;
                s.remaining_ms = reconnect;
            }
            Some(Transition {
                from,
                to: s.current,
            })
        })
    }
}
