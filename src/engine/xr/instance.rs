//! Runtime connection bootstrap.

use openxr as xr;
use tracing::{debug, info};

use crate::engine::xr::{MAX_VIEWS, ViewConfig};
use crate::engine::{EngineError, EngineResult, xr_call};

pub const VIEW_CONFIGURATION: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// Loaded runtime, instance and HMD system, plus the per-view capabilities.
///
/// Outlives any session created from it.
pub struct InstanceContext {
    /// Kept alive for the loader library; the instance holds function pointers into it.
    _entry: xr::Entry,
    pub instance: xr::Instance,
    pub system: xr::SystemId,
    pub system_name: String,
    pub views: Vec<ViewConfig>,
    /// XR_KHR_composition_layer_depth was offered and enabled.
    pub composition_layer_depth: bool,
}

impl InstanceContext {
    pub fn new(app_name: &str) -> EngineResult<Self> {
        info!("loading OpenXR runtime...");
        let entry = unsafe { xr::Entry::load() }.map_err(|e| EngineError::Loader(e.to_string()))?;

        let available = entry
            .enumerate_extensions()
            .map_err(xr_call("xrEnumerateInstanceExtensionProperties"))?;
        if !available.khr_vulkan_enable {
            return Err(EngineError::Loader(
                "runtime does not support XR_KHR_vulkan_enable".into(),
            ));
        }

        let mut extensions = xr::ExtensionSet::default();
        extensions.khr_vulkan_enable = true;
        extensions.khr_composition_layer_depth = available.khr_composition_layer_depth;
        if !extensions.khr_composition_layer_depth {
            info!("runtime lacks XR_KHR_composition_layer_depth, depth stays local");
        }

        let app_info = xr::ApplicationInfo {
            application_name: app_name,
            application_version: 1,
            engine_name: env!("CARGO_PKG_NAME"),
            engine_version: 1,
            api_version: xr::Version::new(1, 0, 0),
        };
        let instance = entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(xr_call("xrCreateInstance"))?;

        let props = instance
            .properties()
            .map_err(xr_call("xrGetInstanceProperties"))?;
        info!(
            runtime = props.runtime_name.as_str(),
            version = %props.runtime_version,
            "OpenXR runtime"
        );

        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(xr_call("xrGetSystem"))?;

        let system_props = instance
            .system_properties(system)
            .map_err(xr_call("xrGetSystemProperties"))?;
        info!(
            name = system_props.system_name.as_str(),
            vendor = system_props.vendor_id,
            max_layers = system_props.graphics_properties.max_layer_count,
            max_width = system_props.graphics_properties.max_swapchain_image_width,
            max_height = system_props.graphics_properties.max_swapchain_image_height,
            orientation_tracking = system_props.tracking_properties.orientation_tracking,
            position_tracking = system_props.tracking_properties.position_tracking,
            "HMD system"
        );

        let raw_views = instance
            .enumerate_view_configuration_views(system, VIEW_CONFIGURATION)
            .map_err(xr_call("xrEnumerateViewConfigurationViews"))?;
        let views = view_configs(&raw_views)?;

        if let Ok(modes) = instance.enumerate_environment_blend_modes(system, VIEW_CONFIGURATION) {
            debug!(?modes, "environment blend modes");
        }

        Ok(Self {
            _entry: entry,
            instance,
            system,
            system_name: system_props.system_name,
            views,
            composition_layer_depth: extensions.khr_composition_layer_depth,
        })
    }
}

/// Converts and caps the runtime's view configuration views.
pub fn view_configs(raw: &[xr::ViewConfigurationView]) -> EngineResult<Vec<ViewConfig>> {
    if raw.len() > MAX_VIEWS {
        return Err(EngineError::Capacity {
            what: "views",
            requested: raw.len(),
            max: MAX_VIEWS,
        });
    }

    let views: Vec<ViewConfig> = raw
        .iter()
        .map(|v| ViewConfig {
            recommended_width: v.recommended_image_rect_width,
            recommended_height: v.recommended_image_rect_height,
            max_width: v.max_image_rect_width,
            max_height: v.max_image_rect_height,
            recommended_sample_count: v.recommended_swapchain_sample_count,
            max_sample_count: v.max_swapchain_sample_count,
        })
        .collect();

    for (i, v) in views.iter().enumerate() {
        info!(
            view = i,
            width = v.recommended_width,
            height = v.recommended_height,
            max_width = v.max_width,
            max_height = v.max_height,
            samples = v.recommended_sample_count,
            max_samples = v.max_sample_count,
            "view configuration"
        );
    }
    Ok(views)
}
