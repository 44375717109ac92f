//! Per-view color and depth image rings.
//!
//! Each ring tracks its own in-flight image so that acquire, wait and release
//! strictly alternate per (view, kind). Order violations never reach the
//! runtime and come back as `EngineError::SwapchainOrder`.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::config::{DepthPolicy, XrConfig};
use crate::engine::xr::backend::{SwapchainBackend, WaitOutcome};
use crate::engine::xr::{
    ImageHandle, MAX_SWAPCHAIN_IMAGES, MAX_VIEWS, SwapchainId, SwapchainKind, SwapchainSpec,
    ViewConfig,
};
use crate::engine::{EngineError, EngineResult};

/// Swapchain creation and wait parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainSettings {
    pub preferred_color_formats: Vec<i64>,
    pub depth_format: i64,
    pub depth_policy: DepthPolicy,
    pub wait_timeout: Duration,
}

impl SwapchainSettings {
    pub fn from_config(config: &XrConfig) -> Self {
        Self {
            preferred_color_formats: config.preferred_color_formats.clone(),
            depth_format: config.depth_format,
            depth_policy: config.depth_policy,
            wait_timeout: Duration::from_millis(config.swapchain_wait_timeout_ms),
        }
    }
}

/// First preferred format the runtime offers, else the runtime's first choice.
pub fn select_color_format(available: &[i64], preferred: &[i64]) -> EngineResult<i64> {
    preferred
        .iter()
        .copied()
        .find(|f| available.contains(f))
        .or_else(|| available.first().copied())
        .ok_or_else(|| EngineError::Config("runtime offers no swapchain formats".into()))
}

/// `Ok(None)` means the views render without depth.
pub fn select_depth_format(available: &[i64], wanted: i64, policy: DepthPolicy) -> EngineResult<Option<i64>> {
    if available.contains(&wanted) {
        return Ok(Some(wanted));
    }
    match policy {
        DepthPolicy::Disable => {
            warn!(format = wanted, "depth format not offered by the runtime, rendering without depth");
            Ok(None)
        }
        DepthPolicy::Require => Err(EngineError::Config(format!(
            "depth format {wanted} not offered by the runtime"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageStatus {
    Idle,
    /// Acquired, wait not yet satisfied.
    Acquired(u32),
    /// Acquired and waited; writable until released.
    Ready(u32),
}

/// Image lent to the renderer for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub image: ImageHandle,
    pub index: u32,
    pub format: i64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug)]
pub struct SwapchainRing {
    id: SwapchainId,
    view: usize,
    kind: SwapchainKind,
    format: i64,
    width: u32,
    height: u32,
    images: Vec<ImageHandle>,
    status: ImageStatus,
}

impl SwapchainRing {
    pub fn create<B: SwapchainBackend>(backend: &mut B, spec: SwapchainSpec) -> EngineResult<Self> {
        let (id, images) = backend.create_swapchain(&spec)?;
        if images.is_empty() {
            return Err(EngineError::Config(format!(
                "{:?} swapchain for view {} has no images",
                spec.kind, spec.view
            )));
        }
        if images.len() > MAX_SWAPCHAIN_IMAGES {
            return Err(EngineError::Capacity {
                what: "swapchain images",
                requested: images.len(),
                max: MAX_SWAPCHAIN_IMAGES,
            });
        }

        info!(
            view = spec.view,
            kind = ?spec.kind,
            format = spec.format,
            width = spec.width,
            height = spec.height,
            samples = spec.sample_count,
            images = images.len(),
            "created swapchain"
        );

        Ok(Self {
            id,
            view: spec.view,
            kind: spec.kind,
            format: spec.format,
            width: spec.width,
            height: spec.height,
            images,
            status: ImageStatus::Idle,
        })
    }

    #[inline]
    pub fn id(&self) -> SwapchainId {
        self.id
    }

    #[cfg(test)]
    pub fn kind(&self) -> SwapchainKind {
        self.kind
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True between a successful acquire and its release.
    #[cfg(test)]
    pub fn in_flight(&self) -> bool {
        self.status != ImageStatus::Idle
    }

    /// Acquires the next image, or returns the one already in flight.
    ///
    /// An image left acquired by a timed-out wait is reused instead of being
    /// acquired a second time. An index outside the ring still counts as in
    /// flight, so the following `wait` can hand it back to the runtime.
    pub fn acquire<B: SwapchainBackend>(&mut self, backend: &mut B) -> EngineResult<u32> {
        match self.status {
            ImageStatus::Acquired(index) | ImageStatus::Ready(index) => {
                debug!(view = self.view, kind = ?self.kind, index, "reusing in-flight image");
                Ok(index)
            }
            ImageStatus::Idle => {
                let index = backend.acquire_image(self.id)?;
                self.status = ImageStatus::Acquired(index);
                if !self.holds(index) {
                    return Err(self.out_of_range(index));
                }
                Ok(index)
            }
        }
    }

    /// Bounded wait for the acquired image.
    ///
    /// On timeout the image stays acquired; the next frame waits on it again.
    /// An out-of-range image is released as soon as its wait completes.
    pub fn wait<B: SwapchainBackend>(&mut self, backend: &mut B, timeout: Duration) -> EngineResult<RenderTarget> {
        let index = match self.status {
            ImageStatus::Idle => {
                return Err(EngineError::SwapchainOrder(format!(
                    "wait on the {:?} ring of view {} without an acquired image",
                    self.kind, self.view
                )));
            }
            ImageStatus::Ready(index) => index,
            ImageStatus::Acquired(index) => match backend.wait_image(self.id, timeout)? {
                WaitOutcome::Ready => {
                    self.status = ImageStatus::Ready(index);
                    index
                }
                WaitOutcome::TimedOut => {
                    return Err(EngineError::SwapchainTimeout {
                        view: self.view,
                        kind: self.kind,
                    });
                }
            },
        };

        if !self.holds(index) {
            backend.release_image(self.id)?;
            self.status = ImageStatus::Idle;
            return Err(self.out_of_range(index));
        }
        Ok(self.target(index))
    }

    pub fn release<B: SwapchainBackend>(&mut self, backend: &mut B) -> EngineResult<()> {
        match self.status {
            ImageStatus::Ready(_) => {
                backend.release_image(self.id)?;
                self.status = ImageStatus::Idle;
                Ok(())
            }
            ImageStatus::Acquired(_) => Err(EngineError::SwapchainOrder(format!(
                "release on the {:?} ring of view {} before its wait completed",
                self.kind, self.view
            ))),
            ImageStatus::Idle => Err(EngineError::SwapchainOrder(format!(
                "release on the {:?} ring of view {} without a matching acquire",
                self.kind, self.view
            ))),
        }
    }

    #[inline]
    fn holds(&self, index: u32) -> bool {
        (index as usize) < self.images.len()
    }

    fn out_of_range(&self, index: u32) -> EngineError {
        EngineError::SwapchainOrder(format!(
            "runtime returned image {index} of a {}-image {:?} ring",
            self.images.len(),
            self.kind
        ))
    }

    fn target(&self, index: u32) -> RenderTarget {
        RenderTarget {
            image: self.images[index as usize],
            index,
            format: self.format,
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug)]
pub struct ViewTargets {
    pub color: SwapchainRing,
    pub depth: Option<SwapchainRing>,
}

/// Targets handed out for one view of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredView {
    pub color: RenderTarget,
    pub depth: Option<RenderTarget>,
}

/// Outcome of `release_view`, per ring.
#[derive(Debug)]
pub struct ReleasedView {
    pub color: EngineResult<()>,
    /// `None` for a view without a depth ring.
    pub depth: Option<EngineResult<()>>,
}

impl ReleasedView {
    /// The depth image went back to the runtime together with the color image.
    pub fn depth_presented(&self) -> bool {
        self.color.is_ok() && matches!(self.depth, Some(Ok(())))
    }
}

#[derive(Debug)]
pub struct SwapchainPool {
    views: Vec<ViewTargets>,
    wait_timeout: Duration,
}

impl SwapchainPool {
    /// Creates one color ring and (if available) one depth ring per view at
    /// the recommended size and sample count.
    pub fn create<B: SwapchainBackend>(
        backend: &mut B,
        configs: &[ViewConfig],
        settings: &SwapchainSettings,
    ) -> EngineResult<Self> {
        if configs.is_empty() {
            return Err(EngineError::Config("no views to create swapchains for".into()));
        }
        if configs.len() > MAX_VIEWS {
            return Err(EngineError::Capacity {
                what: "views",
                requested: configs.len(),
                max: MAX_VIEWS,
            });
        }

        let available = backend.enumerate_swapchain_formats()?;
        debug!(?available, "runtime swapchain formats");

        let color_format = select_color_format(&available, &settings.preferred_color_formats)?;
        let depth_format = select_depth_format(&available, settings.depth_format, settings.depth_policy)?;

        let mut views = Vec::with_capacity(configs.len());
        for (view, config) in configs.iter().enumerate() {
            let spec = |kind, format| SwapchainSpec {
                view,
                kind,
                format,
                width: config.recommended_width,
                height: config.recommended_height,
                sample_count: config.recommended_sample_count,
            };

            let color = SwapchainRing::create(backend, spec(SwapchainKind::Color, color_format))?;
            let depth = match depth_format {
                Some(format) => Some(SwapchainRing::create(backend, spec(SwapchainKind::Depth, format))?),
                None => None,
            };
            views.push(ViewTargets { color, depth });
        }

        Ok(Self {
            views,
            wait_timeout: settings.wait_timeout,
        })
    }

    #[inline]
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn view(&self, view: usize) -> Option<&ViewTargets> {
        self.views.get(view)
    }

    #[cfg(test)]
    pub fn color_swapchain(&self, view: usize) -> Option<SwapchainId> {
        self.views.get(view).map(|v| v.color.id())
    }

    #[cfg(test)]
    pub fn any_in_flight(&self) -> bool {
        self.views
            .iter()
            .any(|v| v.color.in_flight() || v.depth.as_ref().is_some_and(SwapchainRing::in_flight))
    }

    /// Depth then color: acquire and wait on each.
    ///
    /// A color failure releases the depth image again. The color ring is
    /// only ever released after a render, so its last released image always
    /// matches the last pose presented for the view.
    pub fn acquire_view<B: SwapchainBackend>(&mut self, backend: &mut B, view: usize) -> EngineResult<AcquiredView> {
        let timeout = self.wait_timeout;
        let targets = self.views.get_mut(view).ok_or_else(|| {
            EngineError::SwapchainOrder(format!("view {view} has no swapchains"))
        })?;

        let depth = match targets.depth.as_mut() {
            None => None,
            Some(ring) => {
                ring.acquire(backend)?;
                Some(ring.wait(backend, timeout)?)
            }
        };

        let color = targets
            .color
            .acquire(backend)
            .and_then(|_| targets.color.wait(backend, timeout));

        match color {
            Ok(color) => Ok(AcquiredView { color, depth }),
            Err(e) => {
                if let (Some(ring), Some(_)) = (targets.depth.as_mut(), depth) {
                    if let Err(release_err) = ring.release(backend) {
                        warn!(view, "failed to release depth image after color failure: {release_err}");
                    }
                }
                Err(e)
            }
        }
    }

    /// Releases both images of a view acquired with `acquire_view`.
    ///
    /// Each ring is released independently; one failing leaves the other
    /// released.
    pub fn release_view<B: SwapchainBackend>(&mut self, backend: &mut B, view: usize) -> ReleasedView {
        let Some(targets) = self.views.get_mut(view) else {
            return ReleasedView {
                color: Err(EngineError::SwapchainOrder(format!("view {view} has no swapchains"))),
                depth: None,
            };
        };

        ReleasedView {
            color: targets.color.release(backend),
            depth: targets.depth.as_mut().map(|ring| ring.release(backend)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::xr::fake::{Call, FakeRuntime};

    const SRGB: i64 = 43;
    const UNORM: i64 = 37;
    const D16: i64 = 124;

    fn settings() -> SwapchainSettings {
        SwapchainSettings {
            preferred_color_formats: vec![SRGB],
            depth_format: D16,
            depth_policy: DepthPolicy::Disable,
            wait_timeout: Duration::from_millis(10),
        }
    }

    fn stereo() -> Vec<ViewConfig> {
        let view = ViewConfig {
            recommended_width: 1440,
            recommended_height: 1600,
            max_width: 2880,
            max_height: 3200,
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        vec![view, view]
    }

    #[test]
    fn color_format_prefers_configured_then_first() {
        assert_eq!(select_color_format(&[UNORM, SRGB], &[SRGB]).unwrap(), SRGB);
        assert_eq!(select_color_format(&[UNORM, 44], &[SRGB]).unwrap(), UNORM);
        assert!(select_color_format(&[], &[SRGB]).is_err());
    }

    #[test]
    fn depth_format_follows_policy() {
        assert_eq!(select_depth_format(&[SRGB, D16], D16, DepthPolicy::Require).unwrap(), Some(D16));
        assert_eq!(select_depth_format(&[SRGB], D16, DepthPolicy::Disable).unwrap(), None);
        assert!(matches!(
            select_depth_format(&[SRGB], D16, DepthPolicy::Require),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn pool_creates_color_and_depth_per_view() {
        let mut rt = FakeRuntime::new();
        let pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();

        assert_eq!(pool.view_count(), 2);
        let specs: Vec<_> = rt.created_swapchains().to_vec();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].kind, SwapchainKind::Color);
        assert_eq!(specs[0].format, SRGB);
        assert_eq!((specs[0].width, specs[0].height), (1440, 1600));
        assert_eq!(specs[1].kind, SwapchainKind::Depth);
        assert_eq!(specs[1].format, D16);
        assert_eq!(specs[3].view, 1);
    }

    #[test]
    fn pool_without_depth_format_skips_depth_rings() {
        let mut rt = FakeRuntime::new().with_formats(vec![UNORM, SRGB]);
        let pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();

        assert!(pool.view(0).unwrap().depth.is_none());
        assert_eq!(rt.created_swapchains().len(), 2);
    }

    #[test]
    fn too_many_views_is_a_capacity_error() {
        let mut rt = FakeRuntime::new();
        let configs = vec![ViewConfig::default(); MAX_VIEWS + 1];
        let err = SwapchainPool::create(&mut rt, &configs, &settings()).unwrap_err();
        assert!(matches!(err, EngineError::Capacity { what: "views", .. }));
    }

    #[test]
    fn acquire_and_release_alternate() {
        let mut rt = FakeRuntime::new();
        let mut pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();

        for _ in 0..3 {
            let targets = pool.acquire_view(&mut rt, 0).unwrap();
            assert!(targets.depth.is_some());
            assert!(pool.any_in_flight());
            assert!(pool.release_view(&mut rt, 0).depth_presented());
            assert!(!pool.any_in_flight());
        }

        let color = pool.color_swapchain(0).unwrap();
        let per_ring: Vec<_> = rt
            .calls()
            .iter()
            .filter(|c| match c {
                Call::AcquireImage(id) | Call::ReleaseImage(id) => *id == color,
                _ => false,
            })
            .collect();
        assert_eq!(per_ring.len(), 6);
        for pair in per_ring.chunks(2) {
            assert!(matches!(pair[0], Call::AcquireImage(_)));
            assert!(matches!(pair[1], Call::ReleaseImage(_)));
        }
    }

    #[test]
    fn timed_out_image_stays_acquired_and_is_reused() {
        let mut rt = FakeRuntime::new();
        let mut pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();
        let color = pool.color_swapchain(0).unwrap();
        rt.time_out_next_wait(color);

        let err = pool.acquire_view(&mut rt, 0).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SwapchainTimeout { view: 0, kind: SwapchainKind::Color }
        ));
        assert!(pool.view(0).unwrap().color.in_flight());

        pool.acquire_view(&mut rt, 0).unwrap();
        pool.release_view(&mut rt, 0).color.unwrap();

        let acquires = rt.calls().iter().filter(|c| **c == Call::AcquireImage(color)).count();
        let releases = rt.calls().iter().filter(|c| **c == Call::ReleaseImage(color)).count();
        assert_eq!((acquires, releases), (1, 1));
    }

    #[test]
    fn depth_timeout_leaves_the_color_ring_untouched() {
        let mut rt = FakeRuntime::new();
        let mut pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();
        let targets = pool.view(1).unwrap();
        let (color, depth) = (targets.color.id(), targets.depth.as_ref().unwrap().id());
        rt.time_out_next_wait(depth);

        assert!(pool.acquire_view(&mut rt, 1).is_err());

        let targets = pool.view(1).unwrap();
        assert!(!targets.color.in_flight());
        assert!(targets.depth.as_ref().unwrap().in_flight());
        assert!(!rt.calls().contains(&Call::AcquireImage(color)));
    }

    #[test]
    fn color_timeout_releases_the_depth_image() {
        let mut rt = FakeRuntime::new();
        let mut pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();
        let color = pool.color_swapchain(0).unwrap();
        rt.time_out_next_wait(color);

        assert!(pool.acquire_view(&mut rt, 0).is_err());

        let targets = pool.view(0).unwrap();
        assert!(targets.color.in_flight());
        assert!(!targets.depth.as_ref().unwrap().in_flight());
    }

    #[test]
    fn release_without_acquire_is_rejected() {
        let mut rt = FakeRuntime::new();
        let mut pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();

        let released = pool.release_view(&mut rt, 0);
        assert!(matches!(released.color, Err(EngineError::SwapchainOrder(_))));
        assert!(matches!(released.depth, Some(Err(EngineError::SwapchainOrder(_)))));
        assert!(!rt.calls().iter().any(|c| matches!(c, Call::ReleaseImage(_))));
    }

    #[test]
    fn depth_release_failure_still_releases_color() {
        let mut rt = FakeRuntime::new();
        let mut pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();
        let depth = pool.view(0).unwrap().depth.as_ref().unwrap().id();
        rt.fail_release(depth);

        pool.acquire_view(&mut rt, 0).unwrap();
        let released = pool.release_view(&mut rt, 0);

        assert!(released.color.is_ok());
        assert!(matches!(released.depth, Some(Err(_))));
        assert!(!released.depth_presented());
        assert!(!pool.view(0).unwrap().color.in_flight());
        assert!(pool.view(0).unwrap().depth.as_ref().unwrap().in_flight());
    }

    #[test]
    fn out_of_range_image_is_waited_and_handed_back() {
        let mut rt = FakeRuntime::new();
        let mut pool = SwapchainPool::create(&mut rt, &stereo(), &settings()).unwrap();
        let color = pool.color_swapchain(0).unwrap();
        rt.return_index_on_next_acquire(color, 7);

        let err = pool.acquire_view(&mut rt, 0).unwrap_err();
        assert!(matches!(err, EngineError::SwapchainOrder(_)));
        assert!(pool.view(0).unwrap().color.in_flight());

        // Next frame: no second acquire; the stray image is waited on and released.
        assert!(pool.acquire_view(&mut rt, 0).is_err());
        assert!(!pool.view(0).unwrap().color.in_flight());
        assert_eq!(rt.count(|c| *c == Call::AcquireImage(color)), 1);
        assert_eq!(rt.count(|c| *c == Call::ReleaseImage(color)), 1);

        let targets = pool.acquire_view(&mut rt, 0).unwrap();
        assert!(targets.color.index < 3);
        assert!(pool.release_view(&mut rt, 0).color.is_ok());
        assert_eq!(rt.count(|c| *c == Call::AcquireImage(color)), 2);
        assert_eq!(rt.count(|c| *c == Call::ReleaseImage(color)), 2);
    }
}
