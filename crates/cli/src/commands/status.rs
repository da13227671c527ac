//! `expose status`: fleet summary

use anyhow::Result;
use colored::Colorize;
use expose_lib::StatusResponse;

use crate::client::ApiClient;
use crate::output::{
    color_percent, color_status, format_bytes, format_timestamp, print_heading, print_json,
    OutputFormat,
};

/// Show the fleet summary
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&status),
        OutputFormat::Table => {
            print_summary(&status);
            Ok(())
        }
    }
}

fn print_summary(status: &StatusResponse) {
    println!("{}", "Conduit Status".bold());
    println!("{}", "=".repeat(50));
    println!("Server:                 {}", status.server_id.cyan());
    println!("Snapshot:               {}", format_timestamp(status.timestamp));
    println!("Containers:             {}", status.total_containers);
    println!(
        "Clients:                {} connected, {} connecting",
        status.connected_clients.to_string().green(),
        status.connecting_clients
    );
    let manager = if status.manager_available { "yes" } else { "no" };
    println!("Manager data:           {}", color_status(manager));

    if let Some(system) = &status.system {
        print_heading("Host");
        println!("CPU:                    {}", color_percent(system.cpu_percent));
        let memory_percent = if system.memory_total_mb > 0.0 {
            system.memory_used_mb / system.memory_total_mb * 100.0
        } else {
            0.0
        };
        println!(
            "Memory:                 {:.0} / {:.0} MB ({})",
            system.memory_used_mb,
            system.memory_total_mb,
            color_percent(memory_percent)
        );
        println!(
            "Load:                   {:.2} {:.2} {:.2}",
            system.load_avg_1m, system.load_avg_5m, system.load_avg_15m
        );
        println!(
            "Disk:                   {:.1} / {:.1} GB",
            system.disk_used_gb, system.disk_total_gb
        );
        println!(
            "Network:                {:.2} Mbps in, {:.2} Mbps out ({} errors, {} drops)",
            system.net_in_mbps, system.net_out_mbps, system.net_errors, system.net_drops
        );
    }

    if let Some(session) = &status.session {
        print_heading("Session");
        println!("Started:                {}", format_timestamp(session.start_time));
        println!("Peak clients:           {}", session.peak_connections);
        println!("Average clients:        {:.1}", session.avg_connections);
        println!("Uploaded:               {}", format_bytes(session.total_upload_bytes));
        println!("Downloaded:             {}", format_bytes(session.total_download_bytes));
    }

    if let Some(settings) = &status.settings {
        print_heading("Settings");
        println!("Max clients:            {}", settings.max_clients);
        println!("Bandwidth limit:        {:.1} Mbps", settings.bandwidth_limit_mbps);
        let auto_start = if settings.auto_start { "yes" } else { "no" };
        println!("Auto start:             {}", auto_start);
    }

    if let Some(connections) = &status.connections {
        print_heading("Connections");
        println!("Total:                  {}", connections.total);
        println!("Unique IPs:             {}", connections.unique_ips);
        for (state, count) in &connections.states {
            println!("  {:<22}{}", state, count);
        }
    }

    if let Some(snowflake) = &status.snowflake {
        print_heading("Snowflake");
        println!("Connections:            {}", snowflake.total_connections);
        println!("Timeouts:               {}", snowflake.timeouts_total);
        println!("Inbound:                {}", format_bytes(snowflake.inbound_bytes));
        println!("Outbound:               {}", format_bytes(snowflake.outbound_bytes));
    }
}
