// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils::{self, DeviceArgs};
use clap::Args as ClapArgs;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::atomic::Ordering;
use std::time::Instant;
use vspfilter::element::{Transformed, VspFilter};
use vspfilter::memory::Buffer;
use vspfilter::video::VideoInfo;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Input file of raw frames
    input: String,

    /// Output file for the converted raw frames
    output: String,

    /// Pixel format of the input frames (e.g. NV12, I420, YUY2)
    #[arg(long, value_name = "FORMAT")]
    in_format: String,

    /// Resolution of the input frames (WxH)
    #[arg(long, value_name = "WxH")]
    in_size: String,

    /// Pixel format of the output frames (e.g. BGRx, RGB16, NV12)
    #[arg(long, value_name = "FORMAT")]
    out_format: String,

    /// Resolution of the output frames, defaults to the input resolution
    #[arg(long, value_name = "WxH")]
    out_size: Option<String>,

    /// Number of frames to convert (0 = whole input)
    #[arg(short = 'n', long, default_value = "0")]
    frames: u64,

    #[command(flatten)]
    devices: DeviceArgs,

    /// Input buffer transfer mode (auto|userptr)
    #[arg(long, default_value = "auto")]
    input_io_mode: String,

    /// Output buffer transfer mode (auto|userptr)
    #[arg(long, default_value = "auto")]
    output_io_mode: String,

    /// Input color range override (auto|full|limited|unset)
    #[arg(long, default_value = "auto")]
    input_color_range: String,

    /// Mirror the output horizontally
    #[arg(long)]
    hflip: bool,

    /// Mirror the output vertically
    #[arg(long)]
    vflip: bool,
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    frames: u64,
    dropped: u64,
    elapsed_secs: f64,
    fps: f64,
    bytes_written: u64,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing convert command: {:?}", args);

    let (in_width, in_height) = utils::parse_resolution(&args.in_size)?;
    let (out_width, out_height) = match args.out_size {
        Some(ref size) => utils::parse_resolution(size)?,
        None => (in_width, in_height),
    };
    let input = VideoInfo::new(utils::parse_format(&args.in_format)?, in_width, in_height);
    let output = VideoInfo::new(utils::parse_format(&args.out_format)?, out_width, out_height);

    let mut settings = args.devices.settings();
    for (name, value) in [
        ("input-io-mode", args.input_io_mode.as_str()),
        ("output-io-mode", args.output_io_mode.as_str()),
        ("input-color-range", args.input_color_range.as_str()),
        ("hflip", if args.hflip { "true" } else { "false" }),
        ("vflip", if args.vflip { "true" } else { "false" }),
    ] {
        settings
            .set_property(name, value)
            .map_err(|e| CliError::InvalidArgs(e.to_string()))?;
    }

    for info in [&input, &output] {
        info.validate()
            .map_err(|e| CliError::InvalidArgs(e.to_string()))?;
    }
    let in_frame = input.default_layout()?.total_size()?;
    let out_frame = output.default_layout()?.total_size()?;

    let mut reader = BufReader::new(
        File::open(&args.input)
            .map_err(|e| CliError::General(format!("Failed to open input file: {}", e)))?,
    );
    let mut writer = BufWriter::new(
        File::create(&args.output)
            .map_err(|e| CliError::General(format!("Failed to create output file: {}", e)))?,
    );

    let term = utils::install_signal_handler()?;

    let mut filter = VspFilter::new(settings);
    filter.start()?;
    filter.set_caps(&input, &output)?;
    log::info!("Converting {} -> {}", input, output);

    let mut src = Buffer::alloc_host(&input)?;
    let mut dst = Buffer::alloc_host(&output)?;
    let mut summary = Summary::default();
    let start = Instant::now();

    while !term.load(Ordering::Relaxed) && (args.frames == 0 || summary.frames < args.frames) {
        let slice = src
            .host_slice_mut()
            .ok_or_else(|| CliError::General("source frame is not host memory".to_string()))?;
        if !read_frame(&mut reader, &mut slice[..in_frame])? {
            break;
        }

        match filter.transform(&mut src, &mut dst)? {
            Transformed::Done => {
                let frame = dst.host_slice().ok_or_else(|| {
                    CliError::General("output frame is not host memory".to_string())
                })?;
                writer
                    .write_all(&frame[..out_frame])
                    .map_err(|e| CliError::General(format!("Failed to write frame: {}", e)))?;
                summary.bytes_written += out_frame as u64;
            }
            Transformed::Dropped => summary.dropped += 1,
        }
        summary.frames += 1;
        log::trace!("frame {} converted", summary.frames);
    }

    if term.load(Ordering::Relaxed) {
        log::info!("Interrupted, stopping");
    }

    writer
        .flush()
        .map_err(|e| CliError::General(format!("Failed to write output file: {}", e)))?;
    filter.stop();

    summary.elapsed_secs = start.elapsed().as_secs_f64();
    if summary.elapsed_secs > 0.0 {
        summary.fps = summary.frames as f64 / summary.elapsed_secs;
    }

    if json {
        let json_str = serde_json::to_string_pretty(&summary)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", json_str);
    } else {
        println!(
            "Converted {} frames ({} dropped) in {:.2}s: {:.1} fps, {} bytes written",
            summary.frames,
            summary.dropped,
            summary.elapsed_secs,
            summary.fps,
            summary.bytes_written
        );
    }

    Ok(())
}

/// Fills `frame` from `reader`. Returns false at a clean end of input; a
/// trailing partial frame is discarded with a warning.
fn read_frame(reader: &mut impl Read, frame: &mut [u8]) -> Result<bool, CliError> {
    let mut filled = 0;
    while filled < frame.len() {
        match reader.read(&mut frame[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CliError::General(format!("Failed to read frame: {}", e))),
        }
    }
    if filled == frame.len() {
        return Ok(true);
    }
    if filled > 0 {
        log::warn!(
            "Ignoring {} trailing bytes, short of a {} byte frame",
            filled,
            frame.len()
        );
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_frame() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = &data[..];
        let mut frame = [0u8; 4];

        assert!(read_frame(&mut reader, &mut frame).unwrap());
        assert_eq!(frame, [0, 1, 2, 3]);
        assert!(read_frame(&mut reader, &mut frame).unwrap());
        assert_eq!(frame, [4, 5, 6, 7]);
        // two bytes left
        assert!(!read_frame(&mut reader, &mut frame).unwrap());
        assert!(!read_frame(&mut reader, &mut frame).unwrap());
    }
}
