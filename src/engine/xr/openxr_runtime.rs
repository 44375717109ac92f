//! Backend traits implemented on a live OpenXR session (Vulkan binding).

use std::ptr;
use std::time::Duration;

use openxr as xr;
use tracing::{debug, info, warn};

use crate::engine::config::ReferenceSpace;
use crate::engine::graphics::VulkanContext;
use crate::engine::xr::actions::ActionManifest;
use crate::engine::xr::backend::{
    ActionBackend, FrameBackend, SessionBackend, SwapchainBackend, WaitOutcome,
};
use crate::engine::xr::instance::{InstanceContext, VIEW_CONFIGURATION};
use crate::engine::xr::{
    Fov, FrameState, GrabState, HAND_COUNT, Hand, HandPose, HapticPulse, ImageHandle,
    LocatedViews, Pose, ProjectionLayer, ProjectionView, RuntimeEvent, SessionState, SwapchainId, SwapchainKind,
    SwapchainSpec, View, XrTime,
};
use crate::engine::{EngineError, EngineResult, xr_call};

/// Everything the session owns. Dropping it destroys the session.
struct SessionObjects {
    swapchains: Vec<xr::Swapchain<xr::Vulkan>>,
    hand_spaces: Vec<xr::Space>,
    pose_action: xr::Action<xr::Posef>,
    grab_action: xr::Action<f32>,
    haptic_action: xr::Action<xr::Haptic>,
    action_set: xr::ActionSet,
    space: xr::Space,
    frame_stream: xr::FrameStream<xr::Vulkan>,
    frame_waiter: xr::FrameWaiter,
    session: xr::Session<xr::Vulkan>,
}

pub struct OpenXrRuntime {
    session: Option<SessionObjects>,
    hand_paths: [xr::Path; HAND_COUNT],
    event_buffer: xr::EventDataBuffer,
    /// XR_KHR_composition_layer_depth is enabled on the instance.
    depth_layers: bool,
    instance: xr::Instance,
    /// Must outlive the session created on it.
    _vulkan: VulkanContext,
}

impl OpenXrRuntime {
    pub fn new(
        ctx: &InstanceContext,
        vulkan: VulkanContext,
        manifest: &ActionManifest,
        reference_space: ReferenceSpace,
    ) -> EngineResult<Self> {
        let instance = ctx.instance.clone();

        let (session, frame_waiter, frame_stream) = unsafe {
            instance.create_session::<xr::Vulkan>(
                ctx.system,
                &xr::vulkan::SessionCreateInfo {
                    instance: vulkan.raw_instance(),
                    physical_device: vulkan.raw_physical_device(),
                    device: vulkan.raw_device(),
                    queue_family_index: vulkan.queue_family_index(),
                    queue_index: vulkan.queue_index(),
                },
            )
        }
        .map_err(xr_call("xrCreateSession"))?;
        info!("created session");

        let space_type = match reference_space {
            ReferenceSpace::Stage => xr::ReferenceSpaceType::STAGE,
            ReferenceSpace::Local => xr::ReferenceSpaceType::LOCAL,
        };
        let space = session
            .create_reference_space(space_type, xr::Posef::IDENTITY)
            .map_err(xr_call("xrCreateReferenceSpace"))?;

        let hand_paths = [
            instance
                .string_to_path(Hand::Left.user_path())
                .map_err(xr_call("xrStringToPath"))?,
            instance
                .string_to_path(Hand::Right.user_path())
                .map_err(xr_call("xrStringToPath"))?,
        ];

        let action_set = instance
            .create_action_set(manifest.action_set, manifest.action_set_localized, 0)
            .map_err(xr_call("xrCreateActionSet"))?;
        let pose_action = action_set
            .create_action::<xr::Posef>(manifest.pose_action, "Hand Pose", &hand_paths)
            .map_err(xr_call("xrCreateAction"))?;
        let grab_action = action_set
            .create_action::<f32>(manifest.grab_action, "Grab Object", &hand_paths)
            .map_err(xr_call("xrCreateAction"))?;
        let haptic_action = action_set
            .create_action::<xr::Haptic>(manifest.haptic_action, "Haptic Vibration", &hand_paths)
            .map_err(xr_call("xrCreateAction"))?;

        for profile in &manifest.profiles {
            let profile_path = instance
                .string_to_path(profile.profile)
                .map_err(xr_call("xrStringToPath"))?;

            let mut bindings = Vec::new();
            for (action, path) in profile.suggested(manifest) {
                let path = instance.string_to_path(&path).map_err(xr_call("xrStringToPath"))?;
                let binding = if action == manifest.pose_action {
                    xr::Binding::new(&pose_action, path)
                } else if action == manifest.grab_action {
                    xr::Binding::new(&grab_action, path)
                } else {
                    xr::Binding::new(&haptic_action, path)
                };
                bindings.push(binding);
            }

            instance
                .suggest_interaction_profile_bindings(profile_path, &bindings)
                .map_err(xr_call("xrSuggestInteractionProfileBindings"))?;
            debug!(profile = profile.profile, "suggested bindings");
        }

        session
            .attach_action_sets(&[&action_set])
            .map_err(xr_call("xrAttachSessionActionSets"))?;

        let hand_spaces = hand_paths
            .iter()
            .map(|path| {
                pose_action
                    .create_space(session.clone(), *path, xr::Posef::IDENTITY)
                    .map_err(xr_call("xrCreateActionSpace"))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(Self {
            session: Some(SessionObjects {
                swapchains: Vec::new(),
                hand_spaces,
                pose_action,
                grab_action,
                haptic_action,
                action_set,
                space,
                frame_stream,
                frame_waiter,
                session,
            }),
            hand_paths,
            event_buffer: xr::EventDataBuffer::new(),
            depth_layers: ctx.composition_layer_depth,
            instance,
            _vulkan: vulkan,
        })
    }

    fn objects(&mut self, call: &'static str) -> EngineResult<&mut SessionObjects> {
        self.session.as_mut().ok_or(EngineError::Xr {
            call,
            result: xr::sys::Result::ERROR_SESSION_LOST,
        })
    }

    #[inline]
    fn hand_path(&self, hand: Hand) -> xr::Path {
        self.hand_paths[hand.index()]
    }
}

fn session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::UNKNOWN => SessionState::Unknown,
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        other => SessionState::Unrecognized(other.into_raw()),
    }
}

fn pose_from_xr(pose: &xr::Posef) -> Pose {
    let (p, o) = (pose.position, pose.orientation);
    Pose {
        position: [p.x, p.y, p.z],
        orientation: [o.x, o.y, o.z, o.w],
    }
}

fn pose_to_xr(pose: &Pose) -> xr::Posef {
    let [px, py, pz] = pose.position;
    let [x, y, z, w] = pose.orientation;
    xr::Posef {
        orientation: xr::Quaternionf { x, y, z, w },
        position: xr::Vector3f { x: px, y: py, z: pz },
    }
}

fn fov_from_xr(fov: &xr::Fovf) -> Fov {
    Fov {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

fn fov_to_xr(fov: &Fov) -> xr::Fovf {
    xr::Fovf {
        angle_left: fov.angle_left,
        angle_right: fov.angle_right,
        angle_up: fov.angle_up,
        angle_down: fov.angle_down,
    }
}

impl SessionBackend for OpenXrRuntime {
    fn poll_event(&mut self) -> EngineResult<Option<RuntimeEvent>> {
        let event = self
            .instance
            .poll_event(&mut self.event_buffer)
            .map_err(xr_call("xrPollEvent"))?;

        use xr::Event::*;
        Ok(event.map(|event| match event {
            InstanceLossPending(e) => RuntimeEvent::InstanceLossPending {
                loss_time: XrTime(e.loss_time().as_nanos()),
            },
            SessionStateChanged(e) => RuntimeEvent::SessionStateChanged {
                state: session_state(e.state()),
                time: XrTime(e.time().as_nanos()),
            },
            InteractionProfileChanged(_) => RuntimeEvent::InteractionProfileChanged,
            EventsLost(e) => RuntimeEvent::EventsLost {
                count: e.lost_event_count(),
            },
            ReferenceSpaceChangePending(_) => {
                RuntimeEvent::Unhandled("reference space change pending".to_string())
            }
            _ => RuntimeEvent::Unhandled("unhandled event type".to_string()),
        }))
    }

    fn begin_session(&mut self) -> EngineResult<()> {
        let objects = self.objects("xrBeginSession")?;
        objects
            .session
            .begin(VIEW_CONFIGURATION)
            .map_err(xr_call("xrBeginSession"))?;
        Ok(())
    }

    fn end_session(&mut self) -> EngineResult<()> {
        let objects = self.objects("xrEndSession")?;
        objects.session.end().map_err(xr_call("xrEndSession"))?;
        Ok(())
    }

    fn destroy_session(&mut self) -> EngineResult<()> {
        if self.session.take().is_some() {
            info!("destroyed session");
        }
        Ok(())
    }

    fn request_exit(&mut self) -> EngineResult<()> {
        let objects = self.objects("xrRequestExitSession")?;
        objects
            .session
            .request_exit()
            .map_err(xr_call("xrRequestExitSession"))
    }

    fn interaction_profile(&mut self, hand: Hand) -> EngineResult<Option<String>> {
        let path = self.hand_path(hand);
        let objects = self.objects("xrGetCurrentInteractionProfile")?;
        let profile = objects
            .session
            .current_interaction_profile(path)
            .map_err(xr_call("xrGetCurrentInteractionProfile"))?;
        if profile == xr::Path::NULL {
            return Ok(None);
        }
        let name = self
            .instance
            .path_to_string(profile)
            .map_err(xr_call("xrPathToString"))?;
        Ok(Some(name))
    }
}

impl ActionBackend for OpenXrRuntime {
    fn sync_actions(&mut self) -> EngineResult<()> {
        let objects = self.objects("xrSyncActions")?;
        objects
            .session
            .sync_actions(&[xr::ActiveActionSet::new(&objects.action_set)])
            .map_err(xr_call("xrSyncActions"))
    }

    fn pose_active(&mut self, hand: Hand) -> EngineResult<bool> {
        let path = self.hand_path(hand);
        let objects = self.objects("xrGetActionStatePose")?;
        objects
            .pose_action
            .is_active(&objects.session, path)
            .map_err(xr_call("xrGetActionStatePose"))
    }

    fn locate_hand(&mut self, hand: Hand, time: XrTime) -> EngineResult<HandPose> {
        let objects = self.objects("xrLocateSpace")?;
        let location = objects.hand_spaces[hand.index()]
            .locate(&objects.space, xr::Time::from_nanos(time.0))
            .map_err(xr_call("xrLocateSpace"))?;
        let flags = location.location_flags;
        Ok(HandPose {
            orientation_valid: flags.contains(xr::SpaceLocationFlags::ORIENTATION_VALID),
            position_valid: flags.contains(xr::SpaceLocationFlags::POSITION_VALID),
            pose: pose_from_xr(&location.pose),
        })
    }

    fn grab_state(&mut self, hand: Hand) -> EngineResult<GrabState> {
        let path = self.hand_path(hand);
        let objects = self.objects("xrGetActionStateFloat")?;
        let state = objects
            .grab_action
            .state(&objects.session, path)
            .map_err(xr_call("xrGetActionStateFloat"))?;
        Ok(GrabState {
            value: state.current_state,
            active: state.is_active,
        })
    }

    fn apply_haptic(&mut self, hand: Hand, pulse: &HapticPulse) -> EngineResult<()> {
        let path = self.hand_path(hand);
        let objects = self.objects("xrApplyHapticFeedback")?;
        let duration = pulse
            .duration_ns
            .map(xr::Duration::from_nanos)
            .unwrap_or(xr::Duration::MIN_HAPTIC);
        // XR_FREQUENCY_UNSPECIFIED
        let frequency = pulse.frequency_hz.unwrap_or(0.0);

        objects
            .haptic_action
            .apply_feedback(
                &objects.session,
                path,
                &xr::HapticVibration::new()
                    .amplitude(pulse.amplitude)
                    .duration(duration)
                    .frequency(frequency),
            )
            .map_err(xr_call("xrApplyHapticFeedback"))
    }
}

impl SwapchainBackend for OpenXrRuntime {
    fn enumerate_swapchain_formats(&mut self) -> EngineResult<Vec<i64>> {
        let objects = self.objects("xrEnumerateSwapchainFormats")?;
        let formats = objects
            .session
            .enumerate_swapchain_formats()
            .map_err(xr_call("xrEnumerateSwapchainFormats"))?;
        Ok(formats.into_iter().map(i64::from).collect())
    }

    fn create_swapchain(&mut self, spec: &SwapchainSpec) -> EngineResult<(SwapchainId, Vec<ImageHandle>)> {
        let format = u32::try_from(spec.format)
            .map_err(|_| EngineError::Config(format!("invalid Vulkan format {}", spec.format)))?;
        let usage_flags = match spec.kind {
            SwapchainKind::Color => {
                xr::SwapchainUsageFlags::COLOR_ATTACHMENT | xr::SwapchainUsageFlags::SAMPLED
            }
            SwapchainKind::Depth => xr::SwapchainUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        };

        let objects = self.objects("xrCreateSwapchain")?;
        let swapchain = objects
            .session
            .create_swapchain(&xr::SwapchainCreateInfo {
                create_flags: xr::SwapchainCreateFlags::EMPTY,
                usage_flags,
                format,
                sample_count: spec.sample_count,
                width: spec.width,
                height: spec.height,
                face_count: 1,
                array_size: 1,
                mip_count: 1,
            })
            .map_err(xr_call("xrCreateSwapchain"))?;

        let images = swapchain
            .enumerate_images()
            .map_err(xr_call("xrEnumerateSwapchainImages"))?
            .into_iter()
            .map(ImageHandle)
            .collect();

        let id = SwapchainId(objects.swapchains.len() as u32);
        objects.swapchains.push(swapchain);
        Ok((id, images))
    }

    fn acquire_image(&mut self, id: SwapchainId) -> EngineResult<u32> {
        let objects = self.objects("xrAcquireSwapchainImage")?;
        let swapchain = swapchain_mut(objects, id)?;
        swapchain
            .acquire_image()
            .map_err(xr_call("xrAcquireSwapchainImage"))
    }

    /// Goes through the raw entry point: the wrapper folds TIMEOUT_EXPIRED,
    /// a success code, into `Ok`.
    fn wait_image(&mut self, id: SwapchainId, timeout: Duration) -> EngineResult<WaitOutcome> {
        let fp = self.instance.fp().wait_swapchain_image;
        let objects = self.objects("xrWaitSwapchainImage")?;
        let swapchain = swapchain_mut(objects, id)?;

        let info = xr::sys::SwapchainImageWaitInfo {
            ty: xr::sys::SwapchainImageWaitInfo::TYPE,
            next: ptr::null(),
            timeout: xr::Duration::from_nanos(i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX)),
        };
        let result = unsafe { fp(swapchain.as_raw(), &info) };

        match result {
            xr::sys::Result::SUCCESS => Ok(WaitOutcome::Ready),
            xr::sys::Result::TIMEOUT_EXPIRED => Ok(WaitOutcome::TimedOut),
            result => Err(EngineError::Xr {
                call: "xrWaitSwapchainImage",
                result,
            }),
        }
    }

    fn release_image(&mut self, id: SwapchainId) -> EngineResult<()> {
        let objects = self.objects("xrReleaseSwapchainImage")?;
        let swapchain = swapchain_mut(objects, id)?;
        swapchain
            .release_image()
            .map_err(xr_call("xrReleaseSwapchainImage"))
    }
}

fn swapchain_mut(objects: &mut SessionObjects, id: SwapchainId) -> EngineResult<&mut xr::Swapchain<xr::Vulkan>> {
    objects
        .swapchains
        .get_mut(id.0 as usize)
        .ok_or_else(|| EngineError::SwapchainOrder(format!("unknown swapchain {id:?}")))
}

impl FrameBackend for OpenXrRuntime {
    fn wait_frame(&mut self) -> EngineResult<FrameState> {
        let objects = self.objects("xrWaitFrame")?;
        let state = objects.frame_waiter.wait().map_err(xr_call("xrWaitFrame"))?;
        Ok(FrameState {
            predicted_display_time: XrTime(state.predicted_display_time.as_nanos()),
            predicted_display_period_ns: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> EngineResult<()> {
        let objects = self.objects("xrBeginFrame")?;
        objects.frame_stream.begin().map_err(xr_call("xrBeginFrame"))
    }

    fn locate_views(&mut self, time: XrTime) -> EngineResult<LocatedViews> {
        let objects = self.objects("xrLocateViews")?;
        let (flags, views) = objects
            .session
            .locate_views(VIEW_CONFIGURATION, xr::Time::from_nanos(time.0), &objects.space)
            .map_err(xr_call("xrLocateViews"))?;

        Ok(LocatedViews {
            orientation_valid: flags.contains(xr::ViewStateFlags::ORIENTATION_VALID),
            position_valid: flags.contains(xr::ViewStateFlags::POSITION_VALID),
            views: views
                .iter()
                .map(|v| View {
                    pose: pose_from_xr(&v.pose),
                    fov: fov_from_xr(&v.fov),
                })
                .collect(),
        })
    }

    fn end_frame(&mut self, time: XrTime, layer: Option<&ProjectionLayer>) -> EngineResult<()> {
        let with_depth = self.depth_layers;
        let objects = self.objects("xrEndFrame")?;
        let time = xr::Time::from_nanos(time.0);
        let blend = xr::EnvironmentBlendMode::OPAQUE;

        let resolved = layer.and_then(|layer| {
            let swapchains = layer_swapchains(&layer.views, &objects.swapchains, with_depth);
            if swapchains.is_none() {
                warn!("projection layer refers to an unknown swapchain, submitting 0 layers");
            }
            swapchains.map(|swapchains| (layer, swapchains))
        });
        let Some((layer, swapchains)) = resolved else {
            return objects
                .frame_stream
                .end(time, blend, &[])
                .map_err(xr_call("xrEndFrame"));
        };

        let depth_infos: Vec<Option<xr::sys::CompositionLayerDepthInfoKHR>> = layer
            .views
            .iter()
            .zip(&swapchains)
            .map(|(view, (_, depth_swapchain))| {
                let (depth, swapchain) = (view.depth?, (*depth_swapchain)?);
                Some(xr::sys::CompositionLayerDepthInfoKHR {
                    ty: xr::sys::CompositionLayerDepthInfoKHR::TYPE,
                    next: ptr::null(),
                    sub_image: xr::sys::SwapchainSubImage {
                        swapchain: swapchain.as_raw(),
                        image_rect: image_rect(view),
                        image_array_index: 0,
                    },
                    min_depth: 0.0,
                    max_depth: 1.0,
                    near_z: depth.near_z,
                    far_z: depth.far_z,
                })
            })
            .collect();

        let views: Vec<xr::CompositionLayerProjectionView<'_, xr::Vulkan>> = layer
            .views
            .iter()
            .zip(&swapchains)
            .zip(&depth_infos)
            .map(|((view, (color, _)), depth_info)| {
                let mut raw = xr::CompositionLayerProjectionView::new()
                    .pose(pose_to_xr(&view.pose))
                    .fov(fov_to_xr(&view.fov))
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(*color)
                            .image_array_index(0)
                            .image_rect(image_rect(view)),
                    )
                    .into_raw();
                if let Some(info) = depth_info {
                    raw.next = ptr::from_ref(info).cast();
                }
                // SAFETY: `depth_infos` and the swapchains outlive `views`.
                unsafe { xr::CompositionLayerProjectionView::from_raw(raw) }
            })
            .collect();

        let projection = xr::CompositionLayerProjection::new()
            .space(&objects.space)
            .views(&views);
        objects
            .frame_stream
            .end(time, blend, &[&projection])
            .map_err(xr_call("xrEndFrame"))
    }
}

fn image_rect(view: &ProjectionView) -> xr::Rect2Di {
    xr::Rect2Di {
        offset: xr::Offset2Di { x: 0, y: 0 },
        extent: xr::Extent2Di {
            width: view.width as i32,
            height: view.height as i32,
        },
    }
}

/// Looks up the color and depth swapchain of every view in a layer.
///
/// `None` if any of them is unknown. Depth is only looked up when depth
/// layers are enabled.
fn layer_swapchains<'s, T>(
    views: &[ProjectionView],
    swapchains: &'s [T],
    with_depth: bool,
) -> Option<Vec<(&'s T, Option<&'s T>)>> {
    views
        .iter()
        .map(|view| {
            let color = swapchains.get(view.swapchain.0 as usize)?;
            let depth = match view.depth.filter(|_| with_depth) {
                Some(depth) => Some(swapchains.get(depth.swapchain.0 as usize)?),
                None => None,
            };
            Some((color, depth))
        })
        .collect()
}
