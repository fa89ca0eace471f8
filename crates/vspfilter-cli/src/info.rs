// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils::DeviceArgs;
use clap::Args as ClapArgs;
use serde::Serialize;
use vspfilter::element::VspFilter;
use vspfilter::media;
use vspfilter::session::{Session, RESIZE_ENTITY};
use vspfilter::v4l2::{CardInfo, Queue};

#[derive(ClapArgs, Debug)]
pub struct Args {
    #[command(flatten)]
    devices: DeviceArgs,

    /// Skip the media graph
    #[arg(long)]
    no_graph: bool,
}

#[derive(Debug, Serialize)]
struct SystemInfo {
    version: &'static str,
    ip_name: String,
    input: PortInfo,
    output: PortInfo,
    terminal: String,
    scaler: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    graph: Option<Vec<EntityInfo>>,
}

#[derive(Debug, Serialize)]
struct PortInfo {
    device: String,
    card: String,
    driver: String,
    bus_info: String,
    entity: String,
    capabilities: String,
}

#[derive(Debug, Serialize)]
struct EntityInfo {
    id: u32,
    name: String,
    pads: u16,
    links: Vec<LinkInfo>,
}

#[derive(Debug, Serialize)]
struct LinkInfo {
    source_pad: u16,
    sink: String,
    sink_pad: u16,
    enabled: bool,
    immutable: bool,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing info command: {:?}", args);

    let mut filter = VspFilter::new(args.devices.settings());
    filter.start()?;
    let session = filter
        .session()
        .ok_or_else(|| CliError::General("devices did not open".to_string()))?;

    let settings = filter.settings();
    let input_card = session.card(Queue::Output);
    let output_card = session.card(Queue::Capture);
    let entities = session.entities().entities();

    let graph = if args.no_graph {
        None
    } else {
        Some(query_graph(session)?)
    };

    let info = SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        ip_name: input_card.ip_name.clone(),
        input: port_info(settings.devfile_input().display().to_string(), input_card),
        output: port_info(settings.devfile_output().display().to_string(), output_card),
        terminal: session.terminal().to_string(),
        scaler: entities.iter().any(|e| e.name.ends_with(RESIZE_ENTITY)),
        graph,
    };

    if json {
        let json_str = serde_json::to_string_pretty(&info)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_info(&info);
    }

    filter.stop();
    Ok(())
}

fn port_info(device: String, card: &CardInfo) -> PortInfo {
    PortInfo {
        device,
        card: card.card.clone(),
        driver: card.driver.clone(),
        bus_info: card.bus_info.clone(),
        entity: card.entity.clone(),
        capabilities: format!("0x{:08x}", card.capabilities),
    }
}

fn query_graph(session: &Session) -> Result<Vec<EntityInfo>, CliError> {
    let table = session.entities();
    let mut graph = Vec::with_capacity(table.len());
    for entity in table.entities() {
        let links = media::links(session.media(), entity)?
            .into_iter()
            .map(|link| {
                let (sink, sink_pad) = link.sink();
                LinkInfo {
                    source_pad: link.source().1,
                    sink: table
                        .by_id(sink)
                        .map(|e| e.name.clone())
                        .unwrap_or_else(|| format!("entity {}", sink)),
                    sink_pad,
                    enabled: link.is_enabled(),
                    immutable: link.is_immutable(),
                }
            })
            .collect();
        graph.push(EntityInfo {
            id: entity.id,
            name: entity.name.clone(),
            pads: entity.pads,
            links,
        });
    }
    Ok(graph)
}

fn print_text_info(info: &SystemInfo) {
    println!("VSP Filter System Information");
    println!("=============================");
    println!("Version: {}", info.version);
    println!("IP block: {}", info.ip_name);
    println!(
        "Scaler: {}",
        if info.scaler {
            "✓ Available"
        } else {
            "✗ Not available"
        }
    );
    println!();

    for (label, port) in [("Input", &info.input), ("Output", &info.output)] {
        println!("{} port: {}", label, port.device);
        println!("  Card: {}", port.card);
        println!("  Driver: {}", port.driver);
        println!("  Bus: {}", port.bus_info);
        println!("  Entity: {}", port.entity);
        println!("  Capabilities: {}", port.capabilities);
        println!();
    }
    println!("Terminal entity: {}", info.terminal);

    if let Some(ref graph) = info.graph {
        println!();
        println!("Media graph:");
        for entity in graph {
            println!("  [{}] {} ({} pads)", entity.id, entity.name, entity.pads);
            for link in &entity.links {
                let mut flags = Vec::new();
                if link.enabled {
                    flags.push("enabled");
                }
                if link.immutable {
                    flags.push("immutable");
                }
                println!(
                    "    pad {} -> {}:{} [{}]",
                    link.source_pad,
                    link.sink,
                    link.sink_pad,
                    flags.join(", ")
                );
            }
        }
    }
}
