pub mod animation_loop;
pub mod camera;
pub mod cli;
pub mod config;
pub mod frame_stats;
pub mod graphics;
pub mod user_input;
pub mod windowing;
pub mod xr;

use thiserror::Error;

use crate::engine::xr::SwapchainKind;

/// Engine-level error type.
///
/// Every fallible call in the crate funnels into this enum; the call site
/// decides whether a variant is fatal or is logged and skipped for the frame.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("OpenXR loader unavailable: {0}")]
    Loader(String),

    #[error("{call} failed: {result}")]
    Xr {
        call: &'static str,
        result: openxr::sys::Result,
    },

    #[error("timed out waiting for the {kind:?} image of view {view}")]
    SwapchainTimeout { view: usize, kind: SwapchainKind },

    #[error("swapchain call order violated: {0}")]
    SwapchainOrder(String),

    #[error("{what}: {requested} requested, at most {max} supported")]
    Capacity {
        what: &'static str,
        requested: usize,
        max: usize,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Vulkan error: {0}")]
    Vulkan(String),

    #[error("Window error: {0}")]
    Window(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Builds a `map_err` adapter that tags an OpenXR result with the call name.
///
/// ```ignore
/// session.begin(ty).map_err(xr_call("xrBeginSession"))?;
/// ```
pub fn xr_call(call: &'static str) -> impl Fn(openxr::sys::Result) -> EngineError {
    move |result| EngineError::Xr { call, result }
}
