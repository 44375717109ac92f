use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::engine::user_input::{PlatformEvent, PlatformEvents, UserInput};
use crate::engine::{EngineError, EngineResult};

/// Companion desktop window (2025 winit style: ApplicationHandler).
///
/// The headset loop owns the thread, so the event loop is pumped without
/// blocking once per iteration instead of being run.
pub struct Windowing {
    event_loop: EventLoop<()>,
    app: App,
    exited: bool,
}

impl Windowing {
    pub fn new(title: &str) -> EngineResult<Self> {
        let event_loop = EventLoop::new().map_err(|e| EngineError::Window(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);

        Ok(Self {
            event_loop,
            app: App {
                title: title.to_string(),
                window: None,
                input: UserInput::new(),
                pending: Vec::new(),
            },
            exited: false,
        })
    }
}

impl PlatformEvents for Windowing {
    fn poll_platform(&mut self) -> Vec<PlatformEvent> {
        if self.exited {
            return Vec::new();
        }
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.app);

        let mut events = std::mem::take(&mut self.app.pending);
        if let PumpStatus::Exit(code) = status {
            info!(code, "window event loop exited");
            self.exited = true;
            events.push(PlatformEvent::QuitRequested);
        }
        events
    }
}

struct App {
    title: String,
    window: Option<Arc<Window>>,
    input: UserInput,
    pending: Vec<PlatformEvent>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs: WindowAttributes = Window::default_attributes()
            .with_title(self.title.as_str())
            .with_inner_size(winit::dpi::LogicalSize::new(640.0, 360.0));

        match event_loop.create_window(attrs) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(e) => {
                error!("failed to create companion window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(request) = self.input.handle_window_event(&event) {
            self.pending.push(request);
            if matches!(event, WindowEvent::CloseRequested) {
                self.window = None;
                event_loop.exit();
            }
        }
    }
}
