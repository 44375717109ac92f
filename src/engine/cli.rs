//! Command-line interface for xr-frame-loop.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::engine::EngineResult;
use crate::engine::config::{ReferenceSpace, XrConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpaceArg {
    Stage,
    Local,
}

impl From<SpaceArg> for ReferenceSpace {
    fn from(arg: SpaceArg) -> Self {
        match arg {
            SpaceArg::Stage => ReferenceSpace::Stage,
            SpaceArg::Local => ReferenceSpace::Local,
        }
    }
}

/// Drive an OpenXR session: lifecycle, frame pacing, swapchains and controller input.
#[derive(Debug, Clone, Parser)]
#[command(name = "xr-frame-loop", version, about)]
pub struct Cli {
    /// JSON configuration file; missing fields take their defaults.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Reference space for views, hands and the projection layer.
    #[arg(long, value_enum)]
    pub reference_space: Option<SpaceArg>,

    /// Run without the companion desktop window.
    #[arg(long)]
    pub no_window: bool,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Loads the configuration file (if any) and applies flag overrides.
    pub fn resolve_config(&self) -> EngineResult<XrConfig> {
        let mut config = match &self.config {
            Some(path) => XrConfig::load(path)?,
            None => XrConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut XrConfig) {
        if let Some(space) = self.reference_space {
            config.reference_space = space.into();
        }
        if self.no_window {
            config.companion_window = false;
        }
    }
}
