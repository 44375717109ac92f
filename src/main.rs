mod engine;
mod utils;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use engine::EngineResult;
use engine::animation_loop::AnimationLoop;
use engine::cli::Cli;
use engine::graphics::{TracingRenderer, VulkanContext};
use engine::user_input::{Headless, PlatformEvents};
use engine::windowing::Windowing;
use engine::xr::{ActionManifest, InstanceContext, OpenXrRuntime};

fn main() -> ExitCode {
    let cli = Cli::parse();
    utils::logger::init(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> EngineResult<()> {
    let config = cli.resolve_config()?;
    if cli.print_config {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    info!("xr-frame-loop v{} starting", env!("CARGO_PKG_VERSION"));

    let ctx = InstanceContext::new(&config.app_name)?;
    info!(system = %ctx.system_name, views = ctx.views.len(), "using XR system");
    let vulkan = VulkanContext::for_openxr(&ctx.instance, ctx.system)?;
    let mut runtime = OpenXrRuntime::new(&ctx, vulkan, &ActionManifest::default(), config.reference_space)?;

    let mut platform: Box<dyn PlatformEvents> = if config.companion_window {
        match Windowing::new(&config.app_name) {
            Ok(window) => Box::new(window),
            Err(e) => {
                warn!("no companion window, continuing headless: {e}");
                Box::new(Headless)
            }
        }
    } else {
        Box::new(Headless)
    };
    let mut renderer = TracingRenderer::new();

    let result = AnimationLoop::new(&mut runtime, platform.as_mut(), &mut renderer, &ctx.views, &config)?.start();
    info!(draws = renderer.draws(), "renderer finished");
    result
}
