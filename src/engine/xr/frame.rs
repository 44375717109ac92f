//! Per-frame synchronization protocol.
//!
//! `wait_frame` hands out a `PendingFrame`; `submit` consumes it and always
//! ends the frame it began, rendering whatever views it can in between.

use tracing::{debug, trace, warn};

use crate::engine::EngineResult;
use crate::engine::camera;
use crate::engine::graphics::{RenderRequest, Renderer};
use crate::engine::xr::backend::{FrameBackend, SwapchainBackend};
use crate::engine::xr::swapchain::SwapchainPool;
use crate::engine::xr::{
    DepthSubImage, FrameState, HAND_COUNT, LocatedViews, Pose, ProjectionLayer, ProjectionView, View,
};

/// A frame slot the runtime has handed out.
///
/// Must be passed to `FrameScheduler::submit`, which begins and ends it.
#[must_use = "a waited frame must be begun and ended"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFrame {
    pub frame: u64,
    pub state: FrameState,
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub should_render: bool,
    pub orientation_valid: bool,
    pub layer_submitted: bool,
    pub rendered_views: usize,
    pub skipped_views: usize,
}

/// What a view's swapchains last handed back to the runtime.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Presented {
    /// Pose and FOV the color image was rendered with.
    view: View,
    /// The depth image from the same render was released too.
    depth: bool,
}

#[derive(Debug)]
pub struct FrameScheduler {
    near_z: f32,
    far_z: f32,
    frames: u64,
    last_presented: Vec<Option<Presented>>,
}

impl FrameScheduler {
    pub fn new(near_z: f32, far_z: f32) -> Self {
        Self {
            near_z,
            far_z,
            frames: 0,
            last_presented: Vec::new(),
        }
    }

    pub fn wait_frame<B: FrameBackend>(&mut self, backend: &mut B) -> EngineResult<PendingFrame> {
        let state = backend.wait_frame()?;
        self.frames += 1;
        trace!(
            frame = self.frames,
            time = state.predicted_display_time.0,
            period_ns = state.predicted_display_period_ns,
            should_render = state.should_render,
            "waited frame"
        );
        Ok(PendingFrame {
            frame: self.frames,
            state,
        })
    }

    /// Begin-frame, per-view render, end-frame.
    ///
    /// Only begin-frame and end-frame failures are returned. View location
    /// and per-view swapchain failures degrade the frame instead.
    pub fn submit<B, R>(
        &mut self,
        backend: &mut B,
        pending: PendingFrame,
        pool: &mut SwapchainPool,
        hand_poses: [Option<Pose>; HAND_COUNT],
        renderer: &mut R,
    ) -> EngineResult<FrameReport>
    where
        B: FrameBackend + SwapchainBackend,
        R: Renderer + ?Sized,
    {
        let PendingFrame { frame, state } = pending;
        let time = state.predicted_display_time;

        backend.begin_frame()?;
        self.last_presented.resize(pool.view_count(), None);

        let mut report = FrameReport {
            frame,
            should_render: state.should_render,
            ..FrameReport::default()
        };

        let located = match backend.locate_views(time) {
            Ok(located) if located.views.len() == pool.view_count() => {
                trace!(
                    orientation_valid = located.orientation_valid,
                    position_valid = located.position_valid,
                    "located views"
                );
                Some(located)
            }
            Ok(located) => {
                warn!(
                    located = located.views.len(),
                    expected = pool.view_count(),
                    "view count changed, submitting no layers"
                );
                None
            }
            Err(e) => {
                warn!("failed to locate views: {e}");
                None
            }
        };

        let layer = match &located {
            Some(located) => {
                report.orientation_valid = located.orientation_valid;
                if state.should_render {
                    self.render_views(backend, &state, located, pool, hand_poses, renderer, &mut report);
                } else {
                    debug!(frame, "shouldRender = false, skipping rendering work");
                }
                self.build_layer(&state, located, pool)
            }
            None => None,
        };

        report.layer_submitted = layer.is_some();
        backend.end_frame(time, layer.as_ref())?;
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_views<B, R>(
        &mut self,
        backend: &mut B,
        state: &FrameState,
        located: &LocatedViews,
        pool: &mut SwapchainPool,
        hand_poses: [Option<Pose>; HAND_COUNT],
        renderer: &mut R,
        report: &mut FrameReport,
    ) where
        B: SwapchainBackend,
        R: Renderer + ?Sized,
    {
        for (index, view) in located.views.iter().enumerate() {
            let targets = match pool.acquire_view(backend, index) {
                Ok(targets) => targets,
                Err(e) => {
                    warn!(view = index, "skipping view: {e}");
                    // A color failure hands the depth image back unrendered.
                    if let Some(presented) = self.last_presented[index].as_mut() {
                        presented.depth = false;
                    }
                    report.skipped_views += 1;
                    continue;
                }
            };

            let request = RenderRequest {
                viewport: (targets.color.width, targets.color.height),
                predicted_display_time: state.predicted_display_time,
                view_index: index,
                hand_poses,
                projection: camera::projection_from_fov(&view.fov, self.near_z, self.far_z),
                view: camera::view_from_pose(&view.pose),
                color: &targets.color,
                depth: targets.depth.as_ref(),
            };

            if let Err(e) = renderer.render(&request) {
                warn!(view = index, "renderer failed: {e}");
            }

            let released = pool.release_view(backend, index);
            if let Some(Err(e)) = &released.depth {
                warn!(view = index, "failed to release depth image: {e}");
            }
            let depth = released.depth_presented();
            match released.color {
                Ok(()) => {
                    self.last_presented[index] = Some(Presented { view: *view, depth });
                    report.rendered_views += 1;
                }
                Err(e) => {
                    warn!(view = index, "failed to release color image: {e}");
                    report.skipped_views += 1;
                }
            }
        }
    }

    /// One projection layer, or none when it must not be shown.
    ///
    /// A view skipped this frame is listed with the pose it was last rendered
    /// with, since its swapchain still holds that image. A view that has never
    /// been rendered has nothing to show, so the whole layer is dropped.
    /// Depth is attached only where the last released depth image belongs to
    /// that same render.
    fn build_layer(&self, state: &FrameState, located: &LocatedViews, pool: &SwapchainPool) -> Option<ProjectionLayer> {
        if !located.orientation_valid {
            debug!("view orientation invalid, submitting 0 layers");
            return None;
        }
        if !state.should_render {
            debug!("submitting 0 layers because shouldRender = false");
            return None;
        }

        let mut views = Vec::with_capacity(located.views.len());
        for index in 0..located.views.len() {
            let presented = self.last_presented.get(index).copied().flatten();
            let (Some(presented), Some(targets)) = (presented, pool.view(index)) else {
                debug!(view = index, "view has no rendered image yet, submitting 0 layers");
                return None;
            };
            let (width, height) = targets.color.extent();
            let depth = match (&targets.depth, presented.depth) {
                (Some(ring), true) => Some(DepthSubImage {
                    swapchain: ring.id(),
                    near_z: self.near_z,
                    far_z: self.far_z,
                }),
                _ => None,
            };
            views.push(ProjectionView {
                pose: presented.view.pose,
                fov: presented.view.fov,
                swapchain: targets.color.id(),
                width,
                height,
                depth,
            });
        }
        Some(ProjectionLayer { views })
    }
}
