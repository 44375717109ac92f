//! Runtime seams.
//!
//! Each core component is generic over the narrowest trait it needs. The
//! OpenXR implementation lives in `openxr_runtime`; tests use `fake`.

use std::time::Duration;

use crate::engine::EngineResult;
use crate::engine::xr::{
    GrabState, Hand, HandPose, HapticPulse, ImageHandle, FrameState, LocatedViews,
    ProjectionLayer, RuntimeEvent, SwapchainId, SwapchainSpec, XrTime,
};

/// Event source plus the calls that move the session through its lifecycle.
pub trait SessionBackend {
    /// Returns `Ok(None)` once the event queue is empty.
    fn poll_event(&mut self) -> EngineResult<Option<RuntimeEvent>>;

    fn begin_session(&mut self) -> EngineResult<()>;

    fn end_session(&mut self) -> EngineResult<()>;

    /// Releases the session and everything it owns.
    fn destroy_session(&mut self) -> EngineResult<()>;

    /// Asks the runtime to take the session through Stopping/Exiting.
    fn request_exit(&mut self) -> EngineResult<()>;

    /// Path of the interaction profile currently bound to `hand`, if any.
    fn interaction_profile(&mut self, hand: Hand) -> EngineResult<Option<String>>;
}

pub trait ActionBackend {
    /// Synchronizes every declared action for this frame.
    fn sync_actions(&mut self) -> EngineResult<()>;

    fn pose_active(&mut self, hand: Hand) -> EngineResult<bool>;

    /// Locates the hand's action space in the shared reference space.
    fn locate_hand(&mut self, hand: Hand, time: XrTime) -> EngineResult<HandPose>;

    fn grab_state(&mut self, hand: Hand) -> EngineResult<GrabState>;

    fn apply_haptic(&mut self, hand: Hand, pulse: &HapticPulse) -> EngineResult<()>;
}

/// Outcome of a bounded swapchain wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

pub trait SwapchainBackend {
    fn enumerate_swapchain_formats(&mut self) -> EngineResult<Vec<i64>>;

    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> EngineResult<(SwapchainId, Vec<ImageHandle>)>;

    fn acquire_image(&mut self, id: SwapchainId) -> EngineResult<u32>;

    fn wait_image(&mut self, id: SwapchainId, timeout: Duration) -> EngineResult<WaitOutcome>;

    fn release_image(&mut self, id: SwapchainId) -> EngineResult<()>;
}

pub trait FrameBackend {
    /// Blocks until the compositor hands out the next frame slot.
    fn wait_frame(&mut self) -> EngineResult<FrameState>;

    fn begin_frame(&mut self) -> EngineResult<()>;

    fn locate_views(&mut self, time: XrTime) -> EngineResult<LocatedViews>;

    /// `None` submits an empty layer list.
    fn end_frame(&mut self, time: XrTime, layer: Option<&ProjectionLayer>) -> EngineResult<()>;
}

/// Everything the animation loop needs from a runtime.
pub trait XrRuntime: SessionBackend + ActionBackend + SwapchainBackend + FrameBackend {}

impl<T> XrRuntime for T where T: SessionBackend + ActionBackend + SwapchainBackend + FrameBackend {}
