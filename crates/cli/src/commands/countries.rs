//! `expose countries`: clients and traffic by country

use anyhow::Result;
use expose_lib::{CountryStats, CountryTraffic};
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{format_bytes, print_heading, print_json, print_table, OutputFormat};

/// Row for the clients-by-country table
#[derive(Tabled)]
struct ClientRow {
    #[tabled(rename = "Country")]
    country: String,
    #[tabled(rename = "Clients")]
    clients: u64,
    #[tabled(rename = "Share")]
    share: String,
}

/// Row for the traffic-by-country table
#[derive(Tabled)]
struct TrafficRow {
    #[tabled(rename = "Country")]
    country: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
}

#[derive(Serialize)]
struct CountriesOutput<'a> {
    clients_by_country: &'a [CountryStats],
    traffic_by_country: &'a [CountryTraffic],
}

fn client_rows(countries: &[CountryStats], limit: usize) -> Vec<ClientRow> {
    let total: u64 = countries.iter().map(|c| c.connections).sum();
    countries
        .iter()
        .take(limit)
        .map(|c| ClientRow {
            country: c.country.clone(),
            clients: c.connections,
            share: if total > 0 {
                format!("{:.1}%", c.connections as f64 / total as f64 * 100.0)
            } else {
                "-".to_string()
            },
        })
        .collect()
}

fn traffic_rows(traffic: &[CountryTraffic], limit: usize) -> Vec<TrafficRow> {
    traffic
        .iter()
        .take(limit)
        .map(|t| TrafficRow {
            country: t.country.clone(),
            from: format_bytes(t.from_bytes),
            to: format_bytes(t.to_bytes),
        })
        .collect()
}

/// Show the country breakdowns, at most `limit` rows each
pub async fn show_countries(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let snapshot = client.status().await?;
    let clients = &snapshot.clients_by_country[..limit.min(snapshot.clients_by_country.len())];
    let traffic = &snapshot.traffic_by_country[..limit.min(snapshot.traffic_by_country.len())];

    match format {
        OutputFormat::Json => print_json(&CountriesOutput {
            clients_by_country: clients,
            traffic_by_country: traffic,
        }),
        OutputFormat::Table => {
            print_heading("Clients by country");
            print_table(
                &client_rows(&snapshot.clients_by_country, limit),
                "No country data in this snapshot",
            );
            print_heading("Traffic by country");
            print_table(
                &traffic_rows(&snapshot.traffic_by_country, limit),
                "Manager traffic data not available",
            );
            Ok(())
        }
    }
}
