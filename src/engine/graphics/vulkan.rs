//! Vulkan device bootstrap for the OpenXR Vulkan binding.
//!
//! The runtime dictates the instance extensions, device extensions and
//! physical device; vulkano only creates what it is told to.

use std::ffi::c_void;
use std::sync::Arc;

use openxr as xr;
use tracing::{info, warn};
use vulkano::device::physical::PhysicalDevice;
use vulkano::device::{
    Device, DeviceCreateInfo, DeviceExtensions, Queue, QueueCreateInfo, QueueFlags,
};
use vulkano::instance::{Instance, InstanceCreateInfo, InstanceExtensions};
use vulkano::{Handle, Version, VulkanLibrary, VulkanObject};

use crate::engine::{EngineError, EngineResult, xr_call};

pub struct VulkanContext {
    pub instance: Arc<Instance>,
    pub physical_device: Arc<PhysicalDevice>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
}

impl VulkanContext {
    pub fn for_openxr(xr_instance: &xr::Instance, system: xr::SystemId) -> EngineResult<Self> {
        let requirements = xr_instance
            .graphics_requirements::<xr::Vulkan>(system)
            .map_err(xr_call("xrGetVulkanGraphicsRequirementsKHR"))?;
        info!(
            min = %requirements.min_api_version_supported,
            max = %requirements.max_api_version_supported,
            "runtime Vulkan requirements"
        );

        let library = VulkanLibrary::new().map_err(|e| EngineError::Vulkan(e.to_string()))?;

        let wanted_instance = xr_instance
            .vulkan_legacy_instance_extensions(system)
            .map_err(xr_call("xrGetVulkanInstanceExtensionsKHR"))?;
        let wanted_instance = InstanceExtensions::from_iter(wanted_instance.split_whitespace());
        let missing = wanted_instance.difference(library.supported_extensions());
        if !missing.is_empty() {
            warn!(?missing, "runtime asked for unsupported instance extensions");
        }

        let instance = Instance::new(
            library.clone(),
            InstanceCreateInfo {
                enabled_extensions: wanted_instance.intersection(library.supported_extensions()),
                ..Default::default()
            },
        )
        .map_err(|e| EngineError::Vulkan(e.to_string()))?;

        let raw_instance = instance.handle().as_raw() as usize as *const c_void;
        let raw_physical = unsafe { xr_instance.vulkan_graphics_device(system, raw_instance) }
            .map_err(xr_call("xrGetVulkanGraphicsDeviceKHR"))?;

        let physical_device = instance
            .enumerate_physical_devices()
            .map_err(|e| EngineError::Vulkan(e.to_string()))?
            .find(|pd| pd.handle().as_raw() == raw_physical as usize as u64)
            .ok_or_else(|| EngineError::Vulkan("runtime's physical device not found".into()))?;

        let props = physical_device.properties();
        let api = physical_device.api_version();
        info!(
            device = props.device_name.as_str(),
            api = %api,
            "Vulkan physical device"
        );

        let min = &requirements.min_api_version_supported;
        let min = Version {
            major: u32::from(min.major()),
            minor: u32::from(min.minor()),
            patch: 0,
        };
        if api < min {
            return Err(EngineError::Vulkan(format!(
                "device supports Vulkan {api}, runtime needs at least {min}"
            )));
        }

        let queue_family_index = physical_device
            .queue_family_properties()
            .iter()
            .position(|q| q.queue_flags.intersects(QueueFlags::GRAPHICS))
            .ok_or_else(|| EngineError::Vulkan("no graphics queue family".into()))? as u32;

        let wanted_device = xr_instance
            .vulkan_legacy_device_extensions(system)
            .map_err(xr_call("xrGetVulkanDeviceExtensionsKHR"))?;
        let wanted_device = DeviceExtensions::from_iter(wanted_device.split_whitespace());
        let missing = wanted_device.difference(physical_device.supported_extensions());
        if !missing.is_empty() {
            warn!(?missing, "runtime asked for unsupported device extensions");
        }

        let (device, mut queues) = Device::new(
            physical_device.clone(),
            DeviceCreateInfo {
                queue_create_infos: vec![QueueCreateInfo {
                    queue_family_index,
                    ..Default::default()
                }],
                enabled_extensions: wanted_device.intersection(physical_device.supported_extensions()),
                ..Default::default()
            },
        )
        .map_err(|e| EngineError::Vulkan(e.to_string()))?;

        let queue = queues
            .next()
            .ok_or_else(|| EngineError::Vulkan("device created without a queue".into()))?;

        Ok(Self {
            instance,
            physical_device,
            device,
            queue,
        })
    }

    pub fn raw_instance(&self) -> *const c_void {
        self.instance.handle().as_raw() as usize as *const c_void
    }

    pub fn raw_physical_device(&self) -> *const c_void {
        self.physical_device.handle().as_raw() as usize as *const c_void
    }

    pub fn raw_device(&self) -> *const c_void {
        self.device.handle().as_raw() as usize as *const c_void
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue.queue_family_index()
    }

    pub fn queue_index(&self) -> u32 {
        self.queue.queue_index()
    }
}
