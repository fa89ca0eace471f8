// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Element properties and the device configuration file.
//!
//! Device paths come from three places, strongest first: explicit
//! settings, `gstvspfilter.conf` and the built-in defaults. The file lives
//! in `$VSPFILTER_CONFIG_DIR` (default `/etc`) and holds plain lines:
//!
//! ```text
//! input-device-name=/dev/video0
//! output-device-name=/dev/video1
//! ```

use crate::{video::ColorRange, Error};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const CONFIG_DIR_ENV: &str = "VSPFILTER_CONFIG_DIR";
pub const CONFIG_FILE: &str = "gstvspfilter.conf";
pub const DEFAULT_CONFIG_DIR: &str = "/etc";

pub const DEFAULT_INPUT_DEVICE: &str = "/dev/video0";
pub const DEFAULT_OUTPUT_DEVICE: &str = "/dev/video1";

/// Bound on the wait for one frame to complete.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

const INPUT_KEY: &str = "input-device-name=";
const OUTPUT_KEY: &str = "output-device-name=";

/// How frames of one side reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Import dma-bufs, use pool buffers or copy into them
    #[default]
    Auto,
    /// Always hand the device page-aligned host pointers
    UserPtr,
}

impl fmt::Display for IoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMode::Auto => f.write_str("auto"),
            IoMode::UserPtr => f.write_str("userptr"),
        }
    }
}

impl FromStr for IoMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(IoMode::Auto),
            "userptr" => Ok(IoMode::UserPtr),
            _ => Err(Error::ConfigInvalid(format!("unknown io mode '{}'", s))),
        }
    }
}

/// Override of the input side quantization range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRangeMode {
    /// Keep the negotiated range
    #[default]
    Auto,
    Full,
    Limited,
    /// Leave the range to the driver
    Unset,
}

impl ColorRangeMode {
    /// Range to program for a negotiated `range`.
    pub fn apply(self, range: ColorRange) -> ColorRange {
        match self {
            ColorRangeMode::Auto => range,
            ColorRangeMode::Full => ColorRange::Full,
            ColorRangeMode::Limited => ColorRange::Limited,
            ColorRangeMode::Unset => ColorRange::Unknown,
        }
    }
}

impl fmt::Display for ColorRangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorRangeMode::Auto => f.write_str("auto"),
            ColorRangeMode::Full => f.write_str("full"),
            ColorRangeMode::Limited => f.write_str("limited"),
            ColorRangeMode::Unset => f.write_str("unset"),
        }
    }
}

impl FromStr for ColorRangeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ColorRangeMode::Auto),
            "full" => Ok(ColorRangeMode::Full),
            "limited" => Ok(ColorRangeMode::Limited),
            "unset" => Ok(ColorRangeMode::Unset),
            _ => Err(Error::ConfigInvalid(format!("unknown color range '{}'", s))),
        }
    }
}

/// Properties of one filter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    devfile_input: PathBuf,
    devfile_output: PathBuf,
    input_explicit: bool,
    output_explicit: bool,
    pub input_io_mode: IoMode,
    pub output_io_mode: IoMode,
    pub input_color_range: ColorRangeMode,
    pub hflip: bool,
    pub vflip: bool,
    pub timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            devfile_input: PathBuf::from(DEFAULT_INPUT_DEVICE),
            devfile_output: PathBuf::from(DEFAULT_OUTPUT_DEVICE),
            input_explicit: false,
            output_explicit: false,
            input_io_mode: IoMode::Auto,
            output_io_mode: IoMode::Auto,
            input_color_range: ColorRangeMode::Auto,
            hflip: false,
            vflip: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Settings {
    pub fn devfile_input(&self) -> &Path {
        &self.devfile_input
    }

    pub fn devfile_output(&self) -> &Path {
        &self.devfile_output
    }

    /// Sets the input device. The configuration file no longer applies to it.
    pub fn set_devfile_input(&mut self, path: impl Into<PathBuf>) {
        self.devfile_input = path.into();
        self.input_explicit = true;
    }

    /// Sets the output device. The configuration file no longer applies to it.
    pub fn set_devfile_output(&mut self, path: impl Into<PathBuf>) {
        self.devfile_output = path.into();
        self.output_explicit = true;
    }

    /// Sets a property by its element name, e.g. `devfile-input`.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), Error> {
        match name {
            "devfile-input" => self.set_devfile_input(value),
            "devfile-output" => self.set_devfile_output(value),
            "input-io-mode" => self.input_io_mode = value.parse()?,
            "output-io-mode" => self.output_io_mode = value.parse()?,
            "input-color-range" => self.input_color_range = value.parse()?,
            "hflip" => self.hflip = parse_bool(name, value)?,
            "vflip" => self.vflip = parse_bool(name, value)?,
            _ => return Err(Error::ConfigInvalid(format!("unknown property '{}'", name))),
        }
        Ok(())
    }

    /// Path of the configuration file.
    pub fn config_path() -> PathBuf {
        let dir = std::env::var_os(CONFIG_DIR_ENV)
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
        dir.join(CONFIG_FILE)
    }

    /// Reads device paths from the default configuration file.
    pub fn load_config(&mut self) -> Result<(), Error> {
        self.load_config_from(&Self::config_path())
    }

    /// Reads device paths from `path` into every path not set explicitly.
    /// A missing file changes nothing.
    pub fn load_config_from(&mut self, path: &Path) -> Result<(), Error> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no configuration file at {}", path.display());
                return Ok(());
            }
            Err(err) => {
                log::error!("cannot read {}: {}", path.display(), err);
                return Err(Error::ConfigInvalid(format!(
                    "cannot read {}: {}",
                    path.display(),
                    err
                )));
            }
        };

        let (input, output) = parse_config(&text)?;
        if let Some(input) = input {
            if self.input_explicit {
                log::debug!("input device set explicitly, ignoring {}", input);
            } else {
                log::debug!("input device from {}: {}", path.display(), input);
                self.devfile_input = PathBuf::from(input);
            }
        }
        if let Some(output) = output {
            if self.output_explicit {
                log::debug!("output device set explicitly, ignoring {}", output);
            } else {
                log::debug!("output device from {}: {}", path.display(), output);
                self.devfile_output = PathBuf::from(output);
            }
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::ConfigInvalid(format!(
            "{} expects a boolean, got '{}'",
            name, value
        ))),
    }
}

/// Device paths named by a configuration file, later lines winning.
fn parse_config(text: &str) -> Result<(Option<&str>, Option<&str>), Error> {
    let mut input = None;
    let mut output = None;
    for line in text.lines() {
        let (slot, key) = if line.starts_with(INPUT_KEY) {
            (&mut input, INPUT_KEY)
        } else if line.starts_with(OUTPUT_KEY) {
            (&mut output, OUTPUT_KEY)
        } else {
            continue;
        };
        let value = line[key.len()..].trim_end_matches('\r');
        if value.is_empty() {
            return Err(Error::ConfigInvalid(format!("{} has no value", key)));
        }
        *slot = Some(value);
    }
    Ok((input, output))
}
