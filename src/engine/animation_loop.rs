use std::thread;
use std::time::Duration;

use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::engine::EngineResult;
use crate::engine::config::XrConfig;
use crate::engine::frame_stats::FrameStats;
use crate::engine::graphics::Renderer;
use crate::engine::user_input::{PlatformEvent, PlatformEvents};
use crate::engine::xr::swapchain::SwapchainSettings;
use crate::engine::xr::{
    ActionSystem, FrameScheduler, SessionLifecycle, SwapchainPool, ViewConfig, XrRuntime,
};

/// The outer loop: platform events, runtime events, then one frame if the
/// session state allows it.
pub struct AnimationLoop<'a, X, P, R>
where
    X: XrRuntime,
    P: PlatformEvents + ?Sized,
    R: Renderer + ?Sized,
{
    runtime: &'a mut X,
    platform: &'a mut P,
    renderer: &'a mut R,
    lifecycle: SessionLifecycle,
    actions: ActionSystem,
    scheduler: FrameScheduler,
    pool: SwapchainPool,
    stats: FrameStats,
    idle_poll: Duration,
}

impl<'a, X, P, R> AnimationLoop<'a, X, P, R>
where
    X: XrRuntime,
    P: PlatformEvents + ?Sized,
    R: Renderer + ?Sized,
{
    /// Creates the per-view swapchains; any failure here is a startup failure.
    pub fn new(
        runtime: &'a mut X,
        platform: &'a mut P,
        renderer: &'a mut R,
        views: &[ViewConfig],
        config: &XrConfig,
    ) -> EngineResult<Self> {
        let pool = SwapchainPool::create(&mut *runtime, views, &SwapchainSettings::from_config(config))?;

        Ok(Self {
            runtime,
            platform,
            renderer,
            lifecycle: SessionLifecycle::new(),
            actions: ActionSystem::new(config.grab_threshold, config.haptic_amplitude),
            scheduler: FrameScheduler::new(config.near_z, config.far_z),
            pool,
            stats: FrameStats::new(),
            idle_poll: Duration::from_millis(config.idle_poll_interval_ms),
        })
    }

    #[cfg(test)]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    /// Runs until the session exits, the instance is lost or a fatal error.
    pub fn start(&mut self) -> EngineResult<()> {
        let run_id = Uuid::new_v4();
        let span = info_span!("session", %run_id);
        let _guard = span.enter();
        info!("entering frame loop");

        let result = loop {
            if let Err(e) = self.iterate() {
                error!("fatal: {e}");
                break Err(e);
            }
            if self.lifecycle.should_quit() {
                break Ok(());
            }
        };

        self.shutdown();
        result
    }

    fn iterate(&mut self) -> EngineResult<()> {
        for event in self.platform.poll_platform() {
            match event {
                PlatformEvent::QuitRequested => self.lifecycle.request_exit(&mut *self.runtime),
            }
        }

        self.lifecycle.drain_events(&mut *self.runtime)?;
        if self.lifecycle.should_quit() {
            return Ok(());
        }

        if !self.lifecycle.frame_cycle_enabled() {
            if !self.idle_poll.is_zero() {
                thread::sleep(self.idle_poll);
            }
            return Ok(());
        }

        let pulses = self.actions.update(&mut *self.runtime);
        self.stats.record_pulses(pulses);

        let pending = self.scheduler.wait_frame(&mut *self.runtime)?;
        self.actions
            .locate_hands(&mut *self.runtime, pending.state.predicted_display_time);

        let hands = self.actions.validated_poses();
        let report = self.scheduler.submit(
            &mut *self.runtime,
            pending,
            &mut self.pool,
            hands,
            &mut *self.renderer,
        )?;
        self.stats.record(&report);
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.lifecycle.is_destroyed() {
            info!("destroying session on shutdown");
            if let Err(e) = self.runtime.destroy_session() {
                warn!("failed to destroy session: {e}");
            }
        }
        self.stats.log_summary();
    }
}
