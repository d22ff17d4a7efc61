#![forbid(unsafe_code)]

use exam_kernel_contracts::phase::{ExamPhase, TimerState, TimerToken};

/// Receives the countdown's callbacks. `on_tick` gets the remaining seconds after each decrement.
pub trait CountdownObserver {
    fn on_tick(&mut self, remaining_secs: u32);
    fn on_expire(&mut self);
}

/// Closure pair adapter for callers that do not want a dedicated observer type.
pub struct FnObserver<T, E>
where
    T: FnMut(u32),
    E: FnMut(),
{
    pub on_tick: T,
    pub on_expire: E,
}

impl<T, E> CountdownObserver for FnObserver<T, E>
where
    T: FnMut(u32),
    E: FnMut(),
{
    fn on_tick(&mut self, remaining_secs: u32) {
        (self.on_tick)(remaining_secs)
    }

    fn on_expire(&mut self) {
        (self.on_expire)()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ticked { remaining_secs: u32 },
    Expired,
    /// The token does not belong to the live run; nothing happened.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CountdownRun {
    token: TimerToken,
    remaining_secs: u32,
}

/// One-second countdown owned by a single phase at a time.
///
/// Every `start` mints a fresh token and supersedes the previous run, so a tick stream left
/// behind by an earlier phase can never decrement or expire the current one.
#[derive(Debug, Clone, Default)]
pub struct CountdownTimer {
    next_generation: u64,
    run: Option<CountdownRun>,
    last_state: TimerState,
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, owner: ExamPhase, duration_secs: u32) -> TimerToken {
        if let Some(previous) = self.stop() {
            tracing::debug!(
                generation = previous.generation,
                phase = previous.phase.as_str(),
                "countdown restarted; previous run superseded"
            );
        }
        self.next_generation = self.next_generation.wrapping_add(1);
        let token = TimerToken {
            generation: self.next_generation,
            phase: owner,
        };
        self.run = Some(CountdownRun {
            token,
            remaining_secs: duration_secs,
        });
        self.last_state = TimerState {
            remaining_secs: duration_secs,
            active: true,
        };
        token
    }

    /// Cancels the live run, keeping the last remaining value for display.
    pub fn stop(&mut self) -> Option<TimerToken> {
        let run = self.run.take()?;
        self.last_state = TimerState {
            remaining_secs: run.remaining_secs,
            active: false,
        };
        Some(run.token)
    }

    /// Cancels the live run and discards whatever time was left.
    pub fn stop_and_zero(&mut self) -> Option<TimerToken> {
        let token = self.stop();
        self.last_state = TimerState {
            remaining_secs: 0,
            active: false,
        };
        token
    }

    pub fn live_token(&self) -> Option<TimerToken> {
        self.run.map(|run| run.token)
    }

    pub fn state(&self) -> TimerState {
        match self.run {
            Some(run) => TimerState {
                remaining_secs: run.remaining_secs,
                active: true,
            },
            None => self.last_state,
        }
    }

    pub fn tick<O>(&mut self, token: TimerToken, observer: &mut O) -> TickOutcome
    where
        O: CountdownObserver,
    {
        let Some(run) = self.run.as_mut() else {
            return TickOutcome::Stale;
        };
        if run.token != token {
            return TickOutcome::Stale;
        }

        if run.remaining_secs > 0 {
            run.remaining_secs -= 1;
            observer.on_tick(run.remaining_secs);
        }
        if run.remaining_secs > 0 {
            return TickOutcome::Ticked {
                remaining_secs: run.remaining_secs,
            };
        }

        self.run = None;
        self.last_state = TimerState {
            remaining_secs: 0,
            active: false,
        };
        observer.on_expire();
        TickOutcome::Expired
    }
}
