//! Controller input: action declarations, per-frame sync and haptics.

use tracing::{debug, trace, warn};

use crate::engine::xr::backend::ActionBackend;
use crate::engine::xr::{GrabState, HAND_COUNT, Hand, HandPose, HapticPulse, Pose, XrTime};

/// Input bindings for one interaction profile, relative to a hand's user path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileBindings {
    pub profile: &'static str,
    pub grab: &'static str,
    pub pose: &'static str,
    pub haptic: &'static str,
}

impl ProfileBindings {
    /// `(action name, full binding path)` for every hand.
    pub fn suggested(&self, manifest: &ActionManifest) -> Vec<(&'static str, String)> {
        let mut out = Vec::with_capacity(3 * HAND_COUNT);
        for hand in Hand::ALL {
            let base = hand.user_path();
            out.push((manifest.grab_action, format!("{base}{}", self.grab)));
            out.push((manifest.pose_action, format!("{base}{}", self.pose)));
            out.push((manifest.haptic_action, format!("{base}{}", self.haptic)));
        }
        out
    }
}

/// Declared once at startup, immutable after the action set is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionManifest {
    pub action_set: &'static str,
    pub action_set_localized: &'static str,
    pub pose_action: &'static str,
    pub grab_action: &'static str,
    pub haptic_action: &'static str,
    pub profiles: Vec<ProfileBindings>,
}

impl Default for ActionManifest {
    fn default() -> Self {
        Self {
            action_set: "gameplay",
            action_set_localized: "Gameplay",
            pose_action: "handpose",
            grab_action: "grabobjectfloat",
            haptic_action: "haptic",
            profiles: vec![
                ProfileBindings {
                    profile: "/interaction_profiles/khr/simple_controller",
                    grab: "/input/select/click",
                    pose: "/input/grip/pose",
                    haptic: "/output/haptic",
                },
                ProfileBindings {
                    profile: "/interaction_profiles/valve/index_controller",
                    grab: "/input/trigger/value",
                    pose: "/input/grip/pose",
                    haptic: "/output/haptic",
                },
            ],
        }
    }
}

/// Per-hand input for the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HandState {
    pub pose_active: bool,
    pub location: HandPose,
    pub grab: GrabState,
}

impl HandState {
    /// The pose, if its orientation can be trusted this frame.
    pub fn validated_pose(&self) -> Option<Pose> {
        self.location.orientation_valid.then_some(self.location.pose)
    }
}

/// Level-triggered: every synced frame above the threshold pulses.
#[inline]
pub fn should_pulse(grab: &GrabState, threshold: f32) -> bool {
    grab.active && grab.value > threshold
}

#[derive(Debug)]
pub struct ActionSystem {
    grab_threshold: f32,
    pulse: HapticPulse,
    hands: [HandState; HAND_COUNT],
    synced: bool,
}

impl ActionSystem {
    pub fn new(grab_threshold: f32, haptic_amplitude: f32) -> Self {
        Self {
            grab_threshold,
            pulse: HapticPulse {
                amplitude: haptic_amplitude,
                duration_ns: None,
                frequency_hz: None,
            },
            hands: [HandState::default(); HAND_COUNT],
            synced: false,
        }
    }

    /// One sync, then per-hand pose activity and grab value, then haptics.
    /// Returns the number of pulses applied.
    ///
    /// Every failure here is logged and skipped; the frame goes on with the
    /// previous hand state cleared.
    pub fn update<B: ActionBackend>(&mut self, backend: &mut B) -> u32 {
        self.hands = [HandState::default(); HAND_COUNT];

        if let Err(e) = backend.sync_actions() {
            warn!("failed to sync actions: {e}");
            self.synced = false;
            return 0;
        }
        self.synced = true;

        let mut pulsed = 0;
        for hand in Hand::ALL {
            let state = &mut self.hands[hand.index()];

            match backend.pose_active(hand) {
                Ok(active) => state.pose_active = active,
                Err(e) => warn!(?hand, "failed to get pose action state: {e}"),
            }

            match backend.grab_state(hand) {
                Ok(grab) => state.grab = grab,
                Err(e) => {
                    warn!(?hand, "failed to get grab action state: {e}");
                    continue;
                }
            }

            if should_pulse(&state.grab, self.grab_threshold) {
                match backend.apply_haptic(hand, &self.pulse) {
                    Ok(()) => {
                        debug!(?hand, value = state.grab.value, "haptic pulse");
                        pulsed += 1;
                    }
                    Err(e) => warn!(?hand, "failed to apply haptics: {e}"),
                }
            }
        }
        pulsed
    }

    /// Locates the active hand spaces at the frame's predicted display time.
    pub fn locate_hands<B: ActionBackend>(&mut self, backend: &mut B, time: XrTime) {
        if !self.synced {
            return;
        }
        for hand in Hand::ALL {
            let state = &mut self.hands[hand.index()];
            if !state.pose_active {
                continue;
            }
            match backend.locate_hand(hand, time) {
                Ok(location) => {
                    trace!(
                        ?hand,
                        orientation_valid = location.orientation_valid,
                        position_valid = location.position_valid,
                        "located hand"
                    );
                    state.location = location;
                }
                Err(e) => warn!(?hand, "failed to locate hand space: {e}"),
            }
        }
    }

    pub fn validated_poses(&self) -> [Option<Pose>; HAND_COUNT] {
        [
            self.hands[Hand::Left.index()].validated_pose(),
            self.hands[Hand::Right.index()].validated_pose(),
        ]
    }
}
