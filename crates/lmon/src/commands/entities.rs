//! Container and service listing

use anyhow::Result;
use monitor_lib::EntitySample;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_status, format_bytes, format_rate, print_info, print_json, print_table, print_warning,
    OutputFormat,
};

/// Row for the entities table
#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Rx")]
    rx: String,
    #[tabled(rename = "Tx")]
    tx: String,
    #[tabled(rename = "Rx/s")]
    rx_speed: String,
    #[tabled(rename = "Tx/s")]
    tx_speed: String,
}

impl From<&EntitySample> for EntityRow {
    fn from(sample: &EntitySample) -> Self {
        if let Some(error) = &sample.error {
            return Self {
                kind: sample.kind.to_string(),
                id: sample.id.clone(),
                name: sample.name.clone(),
                state: format!("{} ({})", color_status("error"), error),
                cpu: "-".to_string(),
                memory: "-".to_string(),
                rx: format_bytes(sample.net_rx_cumulative_bytes),
                tx: format_bytes(sample.net_tx_cumulative_bytes),
                rx_speed: "-".to_string(),
                tx_speed: "-".to_string(),
            };
        }

        Self {
            kind: sample.kind.to_string(),
            id: sample.id.clone(),
            name: sample.name.clone(),
            state: color_status(&sample.state),
            cpu: format!("{:.1}%", sample.cpu_percent),
            memory: format!(
                "{} / {} ({:.1}%)",
                format_bytes(sample.memory_usage_bytes),
                format_bytes(sample.memory_limit_bytes),
                sample.memory_percent
            ),
            rx: format_bytes(sample.net_rx_cumulative_bytes),
            tx: format_bytes(sample.net_tx_cumulative_bytes),
            rx_speed: format_rate(sample.net_rx_speed_bps),
            tx_speed: format_rate(sample.net_tx_speed_bps),
        }
    }
}

/// Collect one batch of containers and services
///
/// A baseline batch is collected first so the reported speeds cover the
/// window. With `persist`, the reported batch goes through the traffic
/// ledger and shows restart-proof totals.
pub async fn show_entities(
    data_file: &Path,
    persist: bool,
    docker: bool,
    window: u64,
    format: OutputFormat,
) -> Result<()> {
    let monitor = super::local_monitor(data_file, docker)?;

    monitor.collect_entities(false).await;
    tokio::time::sleep(super::window(window)).await;
    let samples = monitor.collect_entities(persist).await;

    match format {
        OutputFormat::Json => print_json(&samples)?,
        OutputFormat::Table => {
            if samples.is_empty() {
                print_warning("No containers or services found");
                return Ok(());
            }

            print_table(samples.iter().map(EntityRow::from).collect());

            let errors = samples.iter().filter(|s| s.is_error()).count();
            println!("\nTotal: {} entities ({} errors)", samples.len(), errors);
            if persist {
                print_info(&format!("Traffic totals saved to {}", data_file.display()));
            }
        }
    }

    Ok(())
}
