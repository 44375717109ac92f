use tracing::trace;

use crate::engine::EngineResult;
use crate::engine::camera::Mat4;
use crate::engine::xr::{HAND_COUNT, Pose, RenderTarget, XrTime};

/// Everything needed to draw one view of one frame.
///
/// The targets are only borrowed for the duration of `Renderer::render`;
/// they go back to the runtime as soon as the call returns.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    /// `(width, height)` in pixels.
    pub viewport: (u32, u32),
    pub predicted_display_time: XrTime,
    pub view_index: usize,
    /// `None` for a hand whose pose orientation is not valid this frame.
    pub hand_poses: [Option<Pose>; HAND_COUNT],
    pub projection: Mat4,
    pub view: Mat4,
    pub color: &'a RenderTarget,
    pub depth: Option<&'a RenderTarget>,
}

/// Per-view camera block in the layout the shaders read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(C, align(16))]
pub struct CameraUbo {
    pub view: Mat4,
    pub proj: Mat4,
    pub viewport: [f32; 2],
    pub _pad0: [f32; 2],
}

impl CameraUbo {
    pub fn from_request(request: &RenderRequest<'_>) -> Self {
        Self {
            view: request.view,
            proj: request.projection,
            viewport: [request.viewport.0 as f32, request.viewport.1 as f32],
            _pad0: [0.0; 2],
        }
    }
}

/// Draws into a handed-over target.
pub trait Renderer {
    fn render(&mut self, request: &RenderRequest<'_>) -> EngineResult<()>;
}

/// Renderer that records what it was asked to draw without touching the GPU.
///
/// Used when no scene renderer is plugged in, so the frame protocol still runs
/// end to end against a real runtime.
#[derive(Debug, Default)]
pub struct TracingRenderer {
    draws: u64,
    #[cfg(test)]
    last_camera: Option<CameraUbo>,
}

impl TracingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    #[cfg(test)]
    pub fn last_camera(&self) -> Option<&CameraUbo> {
        self.last_camera.as_ref()
    }
}

impl Renderer for TracingRenderer {
    fn render(&mut self, request: &RenderRequest<'_>) -> EngineResult<()> {
        let tracked_hands = request.hand_poses.iter().filter(|p| p.is_some()).count();
        let camera = CameraUbo::from_request(request);
        trace!(
            view = request.view_index,
            width = request.viewport.0,
            height = request.viewport.1,
            image = request.color.image.0,
            index = request.color.index,
            format = request.color.format,
            depth = request.depth.is_some(),
            tracked_hands,
            time = request.predicted_display_time.0,
            eye = ?camera.view[3],
            skew = ?[camera.proj[2][0], camera.proj[2][1]],
            viewport = ?camera.viewport,
            "render view"
        );

        #[cfg(test)]
        {
            self.last_camera = Some(camera);
        }
        self.draws += 1;
        Ok(())
    }
}
