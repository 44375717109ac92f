//! Session lifecycle state machine.
//!
//! The runtime owns every transition; this side only reacts. The reaction is
//! a pure function (`transition`) so it can be checked without a runtime, and
//! `SessionLifecycle` applies the resulting side effect through a
//! `SessionBackend`.

use tracing::{debug, error, info, warn};

use crate::engine::EngineResult;
use crate::engine::xr::backend::SessionBackend;
use crate::engine::xr::{Hand, RuntimeEvent, SessionState};

/// Side effect requested by a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEffect {
    BeginSession,
    EndSession,
    DestroySession,
}

/// Outcome of reacting to one session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    pub effect: Option<LifecycleEffect>,
    /// `running` after the effect succeeded.
    pub running: bool,
    pub frame_cycle: bool,
    pub quit: bool,
}

/// `(running, new state) -> (effect, running', frame cycle, quit)`.
pub fn transition(running: bool, state: SessionState) -> Transition {
    let (effect, running, frame_cycle, quit) = match state {
        SessionState::Unknown | SessionState::Idle | SessionState::Unrecognized(_) => {
            (None, running, false, false)
        }
        SessionState::Ready if running => (None, true, true, false),
        SessionState::Ready => (Some(LifecycleEffect::BeginSession), true, true, false),
        SessionState::Synchronized | SessionState::Visible | SessionState::Focused => {
            (None, running, true, false)
        }
        SessionState::Stopping if running => (Some(LifecycleEffect::EndSession), false, false, false),
        SessionState::Stopping => (None, false, false, false),
        SessionState::LossPending | SessionState::Exiting => {
            (Some(LifecycleEffect::DestroySession), false, false, true)
        }
    };

    Transition {
        state,
        effect,
        running,
        frame_cycle,
        quit,
    }
}

#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
    running: bool,
    frame_cycle: bool,
    quit: bool,
    destroyed: bool,
    exit_requested: bool,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Unknown,
            running: false,
            frame_cycle: false,
            quit: false,
            destroyed: false,
            exit_requested: false,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn frame_cycle_enabled(&self) -> bool {
        self.frame_cycle && !self.quit
    }

    #[inline]
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Polls until the queue is empty, reacting to each event in order.
    ///
    /// Returns the number of events handled. Poll failures and failed
    /// lifecycle calls are returned to the caller as fatal.
    pub fn drain_events<B: SessionBackend>(&mut self, backend: &mut B) -> EngineResult<usize> {
        let mut handled = 0;
        while let Some(event) = backend.poll_event()? {
            self.handle_event(backend, &event)?;
            handled += 1;
        }
        Ok(handled)
    }

    pub fn handle_event<B: SessionBackend>(
        &mut self,
        backend: &mut B,
        event: &RuntimeEvent,
    ) -> EngineResult<()> {
        match event {
            RuntimeEvent::InstanceLossPending { loss_time } => {
                warn!(loss_time = loss_time.0, "instance loss pending, shutting down");
                self.frame_cycle = false;
                self.quit = true;
            }
            RuntimeEvent::SessionStateChanged { state, .. } => {
                self.apply_state(backend, *state)?;
            }
            RuntimeEvent::InteractionProfileChanged => {
                self.log_interaction_profiles(backend);
            }
            RuntimeEvent::EventsLost { count } => {
                warn!(count, "runtime dropped events");
            }
            RuntimeEvent::Unhandled(kind) => {
                debug!(kind = kind.as_str(), "ignoring runtime event");
            }
        }
        Ok(())
    }

    fn apply_state<B: SessionBackend>(&mut self, backend: &mut B, state: SessionState) -> EngineResult<()> {
        info!(
            from = self.state.as_str(),
            to = state.as_str(),
            "session state changed"
        );
        if let SessionState::Unrecognized(raw) = state {
            warn!(raw, "unrecognized session state, pausing frame cycle");
        }

        let t = transition(self.running, state);
        self.state = t.state;

        if let Some(effect) = t.effect {
            self.run_effect(backend, effect)?;
        }

        self.running = t.running;
        self.frame_cycle = t.frame_cycle;
        self.quit |= t.quit;
        Ok(())
    }

    fn run_effect<B: SessionBackend>(&mut self, backend: &mut B, effect: LifecycleEffect) -> EngineResult<()> {
        let result = match effect {
            LifecycleEffect::BeginSession => backend.begin_session(),
            LifecycleEffect::EndSession => backend.end_session(),
            LifecycleEffect::DestroySession if self.destroyed => return Ok(()),
            LifecycleEffect::DestroySession => backend.destroy_session(),
        };

        match result {
            Ok(()) => {
                info!(?effect, "lifecycle call succeeded");
                if effect == LifecycleEffect::DestroySession {
                    self.destroyed = true;
                }
                Ok(())
            }
            Err(e) => {
                error!(?effect, "lifecycle call failed: {e}");
                self.frame_cycle = false;
                self.quit = true;
                Err(e)
            }
        }
    }

    /// Platform asked to close: let the runtime wind the session down.
    ///
    /// A session that never began cannot be asked to exit, so the loop quits
    /// directly instead.
    pub fn request_exit<B: SessionBackend>(&mut self, backend: &mut B) {
        if self.exit_requested || self.quit {
            return;
        }
        self.exit_requested = true;

        if !self.running {
            info!("exit requested before the session began, quitting");
            self.frame_cycle = false;
            self.quit = true;
            return;
        }

        info!("requesting exit...");
        if let Err(e) = backend.request_exit() {
            warn!("request exit failed, quitting without the runtime: {e}");
            self.frame_cycle = false;
            self.quit = true;
        }
    }

    fn log_interaction_profiles<B: SessionBackend>(&mut self, backend: &mut B) {
        if self.destroyed {
            return;
        }
        for hand in Hand::ALL {
            match backend.interaction_profile(hand) {
                Ok(Some(profile)) => info!(?hand, profile = profile.as_str(), "interaction profile changed"),
                Ok(None) => info!(?hand, "no interaction profile bound"),
                Err(e) => warn!(?hand, "failed to get interaction profile: {e}"),
            }
        }
    }
}
