//! Platform input (winit -> engine requests).
//!
//! The headset session does not need keyboard or mouse state; the only thing
//! the platform can ask for is a graceful quit.

use std::collections::HashSet;

use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{Key, NamedKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Window closed or Escape pressed.
    QuitRequested,
}

/// Source of platform events, drained once per loop iteration.
pub trait PlatformEvents {
    fn poll_platform(&mut self) -> Vec<PlatformEvent>;
}

/// No window: the runtime is the only event source.
#[derive(Debug, Default)]
pub struct Headless;

impl PlatformEvents for Headless {
    fn poll_platform(&mut self) -> Vec<PlatformEvent> {
        Vec::new()
    }
}

/// Stateful window event processor.
#[derive(Default, Debug, Clone)]
pub struct UserInput {
    keys_down: HashSet<Key>,
}

impl UserInput {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn key_down(&self, key: &Key) -> bool {
        self.keys_down.contains(key)
    }

    /// Feed a winit event into this input handler.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> Option<PlatformEvent> {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => Some(PlatformEvent::QuitRequested),
            WindowEvent::KeyboardInput { event, .. } => self.handle_key(&event.logical_key, event.state),
            _ => None,
        }
    }

    /// Escape quits on the initial press only, not on key repeat.
    pub fn handle_key(&mut self, key: &Key, state: ElementState) -> Option<PlatformEvent> {
        match state {
            ElementState::Pressed => {
                let was_down = !self.keys_down.insert(key.clone());
                (!was_down && *key == Key::Named(NamedKey::Escape)).then_some(PlatformEvent::QuitRequested)
            }
            ElementState::Released => {
                self.keys_down.remove(key);
                None
            }
        }
    }
}
