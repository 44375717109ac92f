//! Scripted in-memory runtime for tests.
//!
//! Records every backend call in order. Events are queued in batches: one
//! `drain_events` pass sees exactly one batch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::engine::xr::backend::{
    ActionBackend, FrameBackend, SessionBackend, SwapchainBackend, WaitOutcome,
};
use crate::engine::xr::{
    Fov, FrameState, GrabState, Hand, HandPose, HapticPulse, ImageHandle, LocatedViews, Pose,
    ProjectionLayer, RuntimeEvent, SessionState, SwapchainId, SwapchainSpec, View, XrTime,
};
use crate::engine::{EngineError, EngineResult};

pub const IMAGES_PER_SWAPCHAIN: usize = 3;
pub const FRAME_PERIOD_NS: i64 = 11_111_111;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BeginSession,
    EndSession,
    DestroySession,
    RequestExit,
    InteractionProfile(Hand),
    SyncActions,
    PoseActive(Hand),
    LocateHand(Hand, XrTime),
    GrabState(Hand),
    ApplyHaptic(Hand, HapticPulse),
    EnumerateFormats,
    CreateSwapchain(SwapchainSpec),
    AcquireImage(SwapchainId),
    WaitImage(SwapchainId),
    ReleaseImage(SwapchainId),
    WaitFrame,
    BeginFrame,
    LocateViews(XrTime),
    EndFrame {
        time: XrTime,
        layer: Option<ProjectionLayer>,
    },
}

impl Call {
    pub fn is_frame_call(&self) -> bool {
        matches!(
            self,
            Call::WaitFrame | Call::BeginFrame | Call::EndFrame { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    PollEvent,
    BeginSession,
    EndSession,
    DestroySession,
    RequestExit,
    InteractionProfile,
    SyncActions,
    GrabState,
    ApplyHaptic,
    WaitFrame,
    BeginFrame,
    LocateViews,
    EndFrame,
}

impl FailPoint {
    fn call_name(self) -> &'static str {
        match self {
            FailPoint::PollEvent => "xrPollEvent",
            FailPoint::BeginSession => "xrBeginSession",
            FailPoint::EndSession => "xrEndSession",
            FailPoint::DestroySession => "xrDestroySession",
            FailPoint::RequestExit => "xrRequestExitSession",
            FailPoint::InteractionProfile => "xrGetCurrentInteractionProfile",
            FailPoint::SyncActions => "xrSyncActions",
            FailPoint::GrabState => "xrGetActionStateFloat",
            FailPoint::ApplyHaptic => "xrApplyHapticFeedback",
            FailPoint::WaitFrame => "xrWaitFrame",
            FailPoint::BeginFrame => "xrBeginFrame",
            FailPoint::LocateViews => "xrLocateViews",
            FailPoint::EndFrame => "xrEndFrame",
        }
    }
}

#[derive(Debug, Default)]
struct FakeChain {
    next_index: u32,
    acquired: bool,
    waited: bool,
}

#[derive(Debug)]
pub struct FakeRuntime {
    calls: Vec<Call>,
    /// `None` marks the end of a batch.
    events: VecDeque<Option<RuntimeEvent>>,
    exit_drives_shutdown: bool,
    failures: HashSet<FailPoint>,

    formats: Vec<i64>,
    created: Vec<SwapchainSpec>,
    chains: HashMap<SwapchainId, FakeChain>,
    timeouts: HashMap<SwapchainId, u32>,
    release_failures: HashSet<SwapchainId>,
    forced_index: HashMap<SwapchainId, u32>,

    frame_time: XrTime,
    should_render: VecDeque<bool>,
    frame_open: bool,
    orientation_valid: bool,
    view_count: usize,

    grab: [VecDeque<GrabState>; 2],
    hand_pose: [HandPose; 2],
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            events: VecDeque::new(),
            exit_drives_shutdown: true,
            failures: HashSet::new(),
            // R8G8B8A8_SRGB, B8G8R8A8_SRGB, D16_UNORM
            formats: vec![43, 50, 124],
            created: Vec::new(),
            chains: HashMap::new(),
            timeouts: HashMap::new(),
            release_failures: HashSet::new(),
            forced_index: HashMap::new(),
            frame_time: XrTime(1_000_000_000),
            should_render: VecDeque::new(),
            frame_open: false,
            orientation_valid: true,
            view_count: 2,
            grab: [VecDeque::new(), VecDeque::new()],
            hand_pose: [HandPose {
                orientation_valid: true,
                position_valid: true,
                pose: Pose::IDENTITY,
            }; 2],
        }
    }

    pub fn with_formats(mut self, formats: Vec<i64>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_view_count(mut self, count: usize) -> Self {
        self.view_count = count;
        self
    }

    /// Queues one batch of events, delivered by the next drain.
    pub fn push_events(&mut self, batch: impl IntoIterator<Item = RuntimeEvent>) {
        self.events.extend(batch.into_iter().map(Some));
        self.events.push_back(None);
    }

    pub fn push_states(&mut self, states: impl IntoIterator<Item = SessionState>) {
        let time = self.frame_time;
        self.push_events(
            states
                .into_iter()
                .map(|state| RuntimeEvent::SessionStateChanged { state, time }),
        );
    }

    /// When set (the default), `request_exit` queues Stopping then Exiting.
    pub fn set_exit_drives_shutdown(&mut self, enabled: bool) {
        self.exit_drives_shutdown = enabled;
    }

    pub fn fail(&mut self, point: FailPoint) {
        self.failures.insert(point);
    }

    pub fn recover(&mut self, point: FailPoint) {
        self.failures.remove(&point);
    }

    pub fn time_out_next_wait(&mut self, id: SwapchainId) {
        *self.timeouts.entry(id).or_default() += 1;
    }

    /// Every release on `id` fails and leaves the image acquired.
    pub fn fail_release(&mut self, id: SwapchainId) {
        self.release_failures.insert(id);
    }

    /// The next acquire on `id` reports `index` instead of the ring's next image.
    pub fn return_index_on_next_acquire(&mut self, id: SwapchainId, index: u32) {
        self.forced_index.insert(id, index);
    }

    /// `shouldRender` for the next frames; later frames render.
    pub fn script_should_render(&mut self, values: impl IntoIterator<Item = bool>) {
        self.should_render.extend(values);
    }

    /// Active grab values for the next synced frames of `hand`.
    pub fn script_grab(&mut self, hand: Hand, values: impl IntoIterator<Item = f32>) {
        self.grab[hand.index()].extend(values.into_iter().map(|value| GrabState { value, active: true }));
    }

    pub fn script_grab_states(&mut self, hand: Hand, states: impl IntoIterator<Item = GrabState>) {
        self.grab[hand.index()].extend(states);
    }

    pub fn set_orientation_valid(&mut self, valid: bool) {
        self.orientation_valid = valid;
    }

    pub fn set_hand_pose(&mut self, hand: Hand, pose: HandPose) {
        self.hand_pose[hand.index()] = pose;
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn created_swapchains(&self) -> &[SwapchainSpec] {
        &self.created
    }

    /// Layer argument of every end-frame call, in order.
    pub fn submitted_layers(&self) -> Vec<Option<ProjectionLayer>> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::EndFrame { layer, .. } => Some(layer.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn haptics(&self, hand: Hand) -> usize {
        self.count(|c| matches!(c, Call::ApplyHaptic(h, _) if *h == hand))
    }

    fn check(&self, point: FailPoint) -> EngineResult<()> {
        if self.failures.contains(&point) {
            return Err(EngineError::Xr {
                call: point.call_name(),
                result: openxr::sys::Result::ERROR_RUNTIME_FAILURE,
            });
        }
        Ok(())
    }

    fn chain(&mut self, id: SwapchainId) -> EngineResult<&mut FakeChain> {
        self.chains
            .get_mut(&id)
            .ok_or_else(|| EngineError::SwapchainOrder(format!("unknown swapchain {id:?}")))
    }

    fn views(&self) -> Vec<View> {
        (0..self.view_count)
            .map(|i| {
                let eye = if i == 0 { -0.032 } else { 0.032 };
                View {
                    pose: Pose {
                        position: [eye, 1.6, 0.0],
                        orientation: [0.0, 0.0, 0.0, 1.0],
                    },
                    fov: Fov {
                        angle_left: -0.9,
                        angle_right: 0.8,
                        angle_up: 0.85,
                        angle_down: -0.9,
                    },
                }
            })
            .collect()
    }
}

impl SessionBackend for FakeRuntime {
    fn poll_event(&mut self) -> EngineResult<Option<RuntimeEvent>> {
        self.check(FailPoint::PollEvent)?;
        Ok(self.events.pop_front().flatten())
    }

    fn begin_session(&mut self) -> EngineResult<()> {
        self.calls.push(Call::BeginSession);
        self.check(FailPoint::BeginSession)
    }

    fn end_session(&mut self) -> EngineResult<()> {
        self.calls.push(Call::EndSession);
        self.check(FailPoint::EndSession)
    }

    fn destroy_session(&mut self) -> EngineResult<()> {
        self.calls.push(Call::DestroySession);
        self.check(FailPoint::DestroySession)
    }

    fn request_exit(&mut self) -> EngineResult<()> {
        self.calls.push(Call::RequestExit);
        self.check(FailPoint::RequestExit)?;
        if self.exit_drives_shutdown {
            self.push_states([SessionState::Stopping, SessionState::Exiting]);
        }
        Ok(())
    }

    fn interaction_profile(&mut self, hand: Hand) -> EngineResult<Option<String>> {
        self.calls.push(Call::InteractionProfile(hand));
        self.check(FailPoint::InteractionProfile)?;
        Ok(Some("/interaction_profiles/valve/index_controller".to_string()))
    }
}

impl ActionBackend for FakeRuntime {
    fn sync_actions(&mut self) -> EngineResult<()> {
        self.calls.push(Call::SyncActions);
        self.check(FailPoint::SyncActions)
    }

    fn pose_active(&mut self, hand: Hand) -> EngineResult<bool> {
        self.calls.push(Call::PoseActive(hand));
        Ok(self.hand_pose[hand.index()].orientation_valid)
    }

    fn locate_hand(&mut self, hand: Hand, time: XrTime) -> EngineResult<HandPose> {
        self.calls.push(Call::LocateHand(hand, time));
        Ok(self.hand_pose[hand.index()])
    }

    fn grab_state(&mut self, hand: Hand) -> EngineResult<GrabState> {
        self.calls.push(Call::GrabState(hand));
        self.check(FailPoint::GrabState)?;
        Ok(self.grab[hand.index()].pop_front().unwrap_or_default())
    }

    fn apply_haptic(&mut self, hand: Hand, pulse: &HapticPulse) -> EngineResult<()> {
        self.calls.push(Call::ApplyHaptic(hand, *pulse));
        self.check(FailPoint::ApplyHaptic)
    }
}

impl SwapchainBackend for FakeRuntime {
    fn enumerate_swapchain_formats(&mut self) -> EngineResult<Vec<i64>> {
        self.calls.push(Call::EnumerateFormats);
        Ok(self.formats.clone())
    }

    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> EngineResult<(SwapchainId, Vec<ImageHandle>)> {
        self.calls.push(Call::CreateSwapchain(*spec));
        let id = SwapchainId(self.created.len() as u32 + 1);
        self.created.push(*spec);
        self.chains.insert(id, FakeChain::default());

        let images = (0..IMAGES_PER_SWAPCHAIN)
            .map(|i| ImageHandle(u64::from(id.0) * 100 + i as u64))
            .collect();
        Ok((id, images))
    }

    fn acquire_image(&mut self, id: SwapchainId) -> EngineResult<u32> {
        self.calls.push(Call::AcquireImage(id));
        let forced = self.forced_index.remove(&id);
        let chain = self.chain(id)?;
        if chain.acquired {
            return Err(EngineError::SwapchainOrder(format!("{id:?} acquired twice")));
        }
        chain.acquired = true;
        chain.waited = false;
        let index = chain.next_index;
        chain.next_index = (index + 1) % IMAGES_PER_SWAPCHAIN as u32;
        Ok(forced.unwrap_or(index))
    }

    fn wait_image(&mut self, id: SwapchainId, _timeout: Duration) -> EngineResult<WaitOutcome> {
        self.calls.push(Call::WaitImage(id));
        if let Some(pending) = self.timeouts.get_mut(&id).filter(|n| **n > 0) {
            *pending -= 1;
            return Ok(WaitOutcome::TimedOut);
        }
        let chain = self.chain(id)?;
        if !chain.acquired {
            return Err(EngineError::SwapchainOrder(format!("{id:?} waited without acquire")));
        }
        chain.waited = true;
        Ok(WaitOutcome::Ready)
    }

    fn release_image(&mut self, id: SwapchainId) -> EngineResult<()> {
        self.calls.push(Call::ReleaseImage(id));
        if self.release_failures.contains(&id) {
            return Err(EngineError::Xr {
                call: "xrReleaseSwapchainImage",
                result: openxr::sys::Result::ERROR_RUNTIME_FAILURE,
            });
        }
        let chain = self.chain(id)?;
        if !chain.acquired || !chain.waited {
            return Err(EngineError::SwapchainOrder(format!("{id:?} released before wait")));
        }
        chain.acquired = false;
        chain.waited = false;
        Ok(())
    }
}

impl FrameBackend for FakeRuntime {
    fn wait_frame(&mut self) -> EngineResult<FrameState> {
        self.calls.push(Call::WaitFrame);
        self.check(FailPoint::WaitFrame)?;
        self.frame_time = XrTime(self.frame_time.0 + FRAME_PERIOD_NS);
        Ok(FrameState {
            predicted_display_time: self.frame_time,
            predicted_display_period_ns: FRAME_PERIOD_NS,
            should_render: self.should_render.pop_front().unwrap_or(true),
        })
    }

    fn begin_frame(&mut self) -> EngineResult<()> {
        self.calls.push(Call::BeginFrame);
        self.check(FailPoint::BeginFrame)?;
        self.frame_open = true;
        Ok(())
    }

    fn locate_views(&mut self, time: XrTime) -> EngineResult<LocatedViews> {
        self.calls.push(Call::LocateViews(time));
        self.check(FailPoint::LocateViews)?;
        Ok(LocatedViews {
            orientation_valid: self.orientation_valid,
            position_valid: self.orientation_valid,
            views: self.views(),
        })
    }

    fn end_frame(&mut self, time: XrTime, layer: Option<&ProjectionLayer>) -> EngineResult<()> {
        self.calls.push(Call::EndFrame {
            time,
            layer: layer.cloned(),
        });
        self.check(FailPoint::EndFrame)?;
        if !self.frame_open {
            return Err(EngineError::Xr {
                call: "xrEndFrame",
                result: openxr::sys::Result::ERROR_CALL_ORDER_INVALID,
            });
        }
        self.frame_open = false;
        Ok(())
    }
}
