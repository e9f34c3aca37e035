//! Chip info and port listing command implementations.

use {
    crate::{
        Cli, check_chip, config::Config, open_session, serial::PromptSelector, session_config,
        target_port,
    },
    anyhow::{Context, Result},
    console::style,
    samflash::{DetectedPort, Device, NativePortProvider, detect_ports},
};

/// List ports command implementation.
pub(crate) fn cmd_list_ports(config: &Config, json: bool) -> Result<()> {
    let detected =
        detect_ports(&mut NativePortProvider).context("Failed to enumerate serial ports")?;
    let allow_list = config.allow_list();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| port_json(p, p.is_allowed(&allow_list)))
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let vendor = if port.vendor.is_known() {
            format!(" [{}]", style(port.vendor.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{vendor}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Some(port) = detected
        .iter()
        .find(|p| p.is_allowed(&allow_list))
    {
        eprintln!(
            "\n{} Bootloader candidate: {}",
            style("→").green().bold(),
            style(&port.name).cyan().bold()
        );
    }

    Ok(())
}

fn port_json(port: &DetectedPort, bootloader: bool) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "vendor": port.vendor.name(),
        "bootloader_candidate": bootloader,
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let port = target_port(cli, config);
    let mut session = open_session(session_config(cli, config));
    let mut selector = PromptSelector::new(cli.non_interactive, config);

    let device = session
        .identify(port.as_deref(), &mut selector)
        .context("Failed to identify chip")?;
    check_chip(cli, device.family())?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": device_json(&device),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let flash = device.flash_descriptor();
    let id = device.device_id();
    println!("{}", style("Chip information").bold().underlined());
    println!("  Family:              {}", style(device.family()).cyan());
    println!("  Revision:            {}", device.revision());
    println!("  Device ID:           {id}");
    println!("  Die / series:        {} / {}", id.die(), id.series());
    println!(
        "  Flash:               {} KiB ({} pages x {} bytes)",
        flash.total_size / 1024,
        flash.num_pages,
        flash.page_size
    );
    println!("  Row size:            {} bytes", flash.row_size());
    println!("  Application offset:  {:#x}", device.application_offset());
    if !device.family().is_programmable() {
        println!(
            "  {}",
            style("Identification only, programming is not supported").yellow()
        );
    }

    Ok(())
}

fn device_json(device: &Device) -> serde_json::Value {
    let flash = device.flash_descriptor();
    serde_json::json!({
        "family": device.family().to_string(),
        "device_id": device.device_id().to_string(),
        "revision": device.revision().to_string(),
        "page_size": flash.page_size,
        "num_pages": flash.num_pages,
        "total_size": flash.total_size,
        "row_size": flash.row_size(),
        "application_offset": device.application_offset(),
        "programmable": device.family().is_programmable(),
    })
}
