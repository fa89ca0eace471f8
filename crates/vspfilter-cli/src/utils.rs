// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use clap::Args as ClapArgs;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use vspfilter::config::Settings;
use vspfilter::format::PixelFormat;

/// Device selection shared by every command that opens the VSP.
#[derive(ClapArgs, Debug)]
pub struct DeviceArgs {
    /// Input (source frame) queue device, overrides the configuration file
    #[arg(id = "input_device", long = "input-device", value_name = "DEV")]
    pub input: Option<PathBuf>,

    /// Output (converted frame) queue device, overrides the configuration file
    #[arg(id = "output_device", long = "output-device", value_name = "DEV")]
    pub output: Option<PathBuf>,
}

impl DeviceArgs {
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        if let Some(ref path) = self.input {
            settings.set_devfile_input(path);
        }
        if let Some(ref path) = self.output {
            settings.set_devfile_output(path);
        }
        settings
    }
}

/// Parse resolution string in format "WxH" or "W*H"
pub fn parse_resolution(s: &str) -> Result<(u32, u32), CliError> {
    let (width_str, height_str) = s
        .split_once('x')
        .or_else(|| s.split_once('*'))
        .ok_or_else(|| {
            CliError::InvalidArgs(format!(
                "Invalid resolution format (expected WxH or W*H): {}",
                s
            ))
        })?;

    let width = width_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid width in resolution: {}", s)))?;
    let height = height_str
        .parse::<u32>()
        .map_err(|_| CliError::InvalidArgs(format!("Invalid height in resolution: {}", s)))?;

    if width == 0 || height == 0 {
        return Err(CliError::InvalidArgs(format!(
            "Resolution dimensions must be positive: {}",
            s
        )));
    }

    Ok((width, height))
}

/// Parse a pixel format name such as "NV12" or "BGRx" (case-insensitive)
pub fn parse_format(s: &str) -> Result<PixelFormat, CliError> {
    s.parse::<PixelFormat>().map_err(|_| {
        let known: Vec<_> = PixelFormat::ALL.iter().map(|f| f.name()).collect();
        CliError::UnsupportedFormat(format!("{} (expected one of {})", s, known.join(", ")))
    })
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}
