// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Listing of the pixel format translation table.

use crate::error::CliError;
use clap::Args as ClapArgs;
use serde::Serialize;
use vspfilter::format;

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Show per-plane sampling details
    #[arg(short, long)]
    detail: bool,
}

#[derive(Debug, Serialize)]
struct FormatInfo {
    name: &'static str,
    fourcc: String,
    mbus_code: String,
    planes: usize,
    yuv: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampling: Option<Vec<PlaneInfo>>,
}

#[derive(Debug, Serialize)]
struct PlaneInfo {
    bytes_per_sample: u32,
    horizontal_subsampling: u32,
    vertical_subsampling: u32,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing formats command: {:?}", args);

    let formats: Vec<FormatInfo> = format::entries()
        .iter()
        .map(|entry| FormatInfo {
            name: entry.format.name(),
            fourcc: entry.fourcc.to_string(),
            mbus_code: format!("0x{:04x}", entry.mbus_code),
            planes: entry.n_planes,
            yuv: entry.format.is_yuv(),
            sampling: args.detail.then(|| {
                entry
                    .planes()
                    .iter()
                    .map(|p| PlaneInfo {
                        bytes_per_sample: p.pixel_stride,
                        horizontal_subsampling: 1 << p.x_shift,
                        vertical_subsampling: 1 << p.y_shift,
                    })
                    .collect()
            }),
        })
        .collect();

    if json {
        let json_str = serde_json::to_string_pretty(&formats)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_output(&formats);
    }

    Ok(())
}

fn print_text_output(formats: &[FormatInfo]) {
    println!("VSP Pixel Formats");
    println!("=================");
    println!(
        "{:<8} {:<8} {:<10} {:<7} {}",
        "Format", "FourCC", "Bus code", "Planes", "Family"
    );
    for f in formats {
        println!(
            "{:<8} {:<8} {:<10} {:<7} {}",
            f.name,
            f.fourcc,
            f.mbus_code,
            f.planes,
            if f.yuv { "YUV" } else { "RGB" }
        );
        if let Some(ref planes) = f.sampling {
            for (i, p) in planes.iter().enumerate() {
                println!(
                    "    plane {}: {} byte(s)/sample, {}x{} subsampling",
                    i, p.bytes_per_sample, p.horizontal_subsampling, p.vertical_subsampling
                );
            }
        }
    }
}
