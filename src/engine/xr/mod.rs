//! OpenXR session driving.
//!
//! The core (`session`, `swapchain`, `frame`, `actions`) only talks to the
//! runtime through the traits in `backend`, so the protocol can be exercised
//! without a headset. `openxr_runtime` is the real implementation of those
//! traits on top of the `openxr` crate.

pub mod actions;
pub mod backend;
pub mod frame;
pub mod instance;
pub mod openxr_runtime;
pub mod session;
pub mod swapchain;

#[cfg(test)]
pub mod fake;

pub use actions::{ActionManifest, ActionSystem};
pub use backend::XrRuntime;
pub use frame::{FrameReport, FrameScheduler};
pub use instance::InstanceContext;
pub use openxr_runtime::OpenXrRuntime;
pub use session::SessionLifecycle;
pub use swapchain::{RenderTarget, SwapchainPool};

/// Upper bound on views per view configuration (PRIMARY_STEREO uses 2).
pub const MAX_VIEWS: usize = 4;

/// Upper bound on images in a single swapchain ring.
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;

pub const HAND_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const ALL: [Hand; HAND_COUNT] = [Hand::Left, Hand::Right];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    /// Top-level user path, also used as the subaction path.
    pub fn user_path(self) -> &'static str {
        match self {
            Hand::Left => "/user/hand/left",
            Hand::Right => "/user/hand/right",
        }
    }
}

/// Runtime timestamp in nanoseconds (XrTime).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XrTime(pub i64);

/// Rigid pose: position + unit quaternion (xyzw).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0; 3],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Field of view as four half-angles in radians (left/down are usually negative).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

/// One located view for the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

/// Result of a locate-views call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocatedViews {
    pub orientation_valid: bool,
    pub position_valid: bool,
    pub views: Vec<View>,
}

/// Per-frame timing handed out by wait-frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameState {
    pub predicted_display_time: XrTime,
    pub predicted_display_period_ns: i64,
    pub should_render: bool,
}

/// Per-view capabilities, fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewConfig {
    pub recommended_width: u32,
    pub recommended_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

/// Session states as delivered by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
    /// Raw value outside the known set (including the MAX_ENUM sentinel).
    Unrecognized(i32),
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Synchronized => "synchronized",
            Self::Visible => "visible",
            Self::Focused => "focused",
            Self::Stopping => "stopping",
            Self::LossPending => "loss-pending",
            Self::Exiting => "exiting",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Runtime events the loop reacts to, decoupled from the event buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    InstanceLossPending { loss_time: XrTime },
    SessionStateChanged { state: SessionState, time: XrTime },
    InteractionProfileChanged,
    EventsLost { count: u32 },
    /// Anything else; carries a short description for the log.
    Unhandled(String),
}

/// Tracked pose of one hand at the predicted display time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandPose {
    pub orientation_valid: bool,
    pub position_valid: bool,
    pub pose: Pose,
}

/// Float action state for one hand.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrabState {
    pub value: f32,
    pub active: bool,
}

/// Haptic vibration request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticPulse {
    pub amplitude: f32,
    /// `None` means the runtime's minimum supported duration.
    pub duration_ns: Option<i64>,
    /// `None` means unspecified, the runtime picks.
    pub frequency_hz: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapchainKind {
    Color,
    Depth,
}

/// Backend-assigned swapchain handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwapchainId(pub u32);

/// Opaque native image (a raw VkImage for the Vulkan backend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u64);

/// Everything needed to create one swapchain ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSpec {
    pub view: usize,
    pub kind: SwapchainKind,
    pub format: i64,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

/// Depth image submitted alongside a view's color image, with the clip
/// planes it was rendered with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSubImage {
    pub swapchain: SwapchainId,
    pub near_z: f32,
    pub far_z: f32,
}

/// One entry of the projection layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub swapchain: SwapchainId,
    pub width: u32,
    pub height: u32,
    /// Only set when the depth image was rendered together with the color
    /// image being presented.
    pub depth: Option<DepthSubImage>,
}

/// Projection layer in the frame's reference space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionLayer {
    pub views: Vec<ProjectionView>,
}
