//! Reconnection supervisor
//!
//! Pure, synchronous state machine: `handle(input) -> effects`. It decides
//! when a connection is opened and when a reconnect is scheduled; the
//! client actor carries the effects out. No IO, no async.
//!
//! Every connection attempt gets a fresh [`Generation`]. Events tagged with
//! any other generation are stale and change nothing.

use std::time::Duration;

/// Identifies one connection attempt. Strictly increasing per client.
pub type Generation = u64;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    TornDown,
}

// ---------------------------------------------------------------------------
// Input / Effect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Start,
    Opened(Generation),
    Closed(Generation),
    TimerFired,
    Dispose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Open a new connection tagged with this generation.
    Open(Generation),
    ScheduleReconnect(Duration),
    CancelTimer,
    CloseConnection,
    ResetMirror,
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Supervisor {
    phase: Phase,
    generation: Generation,
    timer_pending: bool,
    reconnect_delay: Duration,
}

impl Supervisor {
    pub fn new(reconnect_delay: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            timer_pending: false,
            reconnect_delay,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn timer_pending(&self) -> bool {
        self.timer_pending
    }

    /// Whether events tagged `generation` may still act.
    pub fn is_current(&self, generation: Generation) -> bool {
        self.phase != Phase::TornDown && generation == self.generation
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.phase == Phase::TornDown {
            return Vec::new();
        }

        match input {
            Input::Start => match self.phase {
                Phase::Idle => vec![self.begin_attempt()],
                _ => Vec::new(),
            },

            Input::Opened(generation) => {
                if generation == self.generation && self.phase == Phase::Connecting {
                    self.phase = Phase::Connected;
                }
                Vec::new()
            }

            Input::Closed(generation) => {
                if generation != self.generation {
                    return Vec::new();
                }
                match self.phase {
                    // A refused handshake counts as a drop too.
                    Phase::Connecting | Phase::Connected => {
                        self.phase = Phase::Disconnected;
                        let mut effects = vec![Effect::ResetMirror];
                        effects.extend(self.schedule_once());
                        effects
                    }
                    Phase::Disconnected => self.schedule_once().into_iter().collect(),
                    Phase::Idle | Phase::TornDown => Vec::new(),
                }
            }

            Input::TimerFired => {
                if !self.timer_pending {
                    return Vec::new();
                }
                self.timer_pending = false;
                match self.phase {
                    Phase::Disconnected => vec![self.begin_attempt()],
                    _ => Vec::new(),
                }
            }

            Input::Dispose => {
                let mut effects = Vec::new();
                if self.timer_pending {
                    self.timer_pending = false;
                    effects.push(Effect::CancelTimer);
                }
                if matches!(self.phase, Phase::Connecting | Phase::Connected) {
                    effects.push(Effect::CloseConnection);
                }
                effects.push(Effect::ResetMirror);
                self.phase = Phase::TornDown;
                effects
            }
        }
    }

    fn begin_attempt(&mut self) -> Effect {
        self.generation += 1;
        self.phase = Phase::Connecting;
        Effect::Open(self.generation)
    }

    fn schedule_once(&mut self) -> Option<Effect> {
        if self.timer_pending {
            return None;
        }
        self.timer_pending = true;
        Some(Effect::ScheduleReconnect(self.reconnect_delay))
    }
}
