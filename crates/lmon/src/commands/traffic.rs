//! Traffic ledger listing

use anyhow::Result;
use monitor_lib::{EntityStore, TrafficRecord};
use std::path::Path;
use tabled::Tabled;

use crate::output::{format_bytes, format_timestamp, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled)]
struct TrafficRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Total Rx")]
    total_rx: String,
    #[tabled(rename = "Total Tx")]
    total_tx: String,
    #[tabled(rename = "Runtime Rx")]
    runtime_rx: String,
    #[tabled(rename = "Runtime Tx")]
    runtime_tx: String,
    #[tabled(rename = "Updated")]
    updated_at: String,
}

impl From<&TrafficRecord> for TrafficRow {
    fn from(record: &TrafficRecord) -> Self {
        Self {
            name: record.name.clone(),
            total_rx: format_bytes(record.total_rx_bytes),
            total_tx: format_bytes(record.total_tx_bytes),
            runtime_rx: format_bytes(record.last_seen_runtime_rx),
            runtime_tx: format_bytes(record.last_seen_runtime_tx),
            updated_at: format_timestamp(&record.updated_at),
        }
    }
}

/// Show persisted traffic totals, ordered by name
pub fn show_traffic(data_file: &Path, format: OutputFormat) -> Result<()> {
    let store = super::open_store(data_file)?;
    let records = store.begin()?.traffic_records()?;

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            if records.is_empty() {
                print_warning("No traffic recorded yet");
                return Ok(());
            }

            let rx: u64 = records.iter().map(|r| r.total_rx_bytes).sum();
            let tx: u64 = records.iter().map(|r| r.total_tx_bytes).sum();
            print_table(records.iter().map(TrafficRow::from).collect());
            println!(
                "\nTotal: {} entities, {} received, {} sent",
                records.len(),
                format_bytes(rx),
                format_bytes(tx)
            );
        }
    }

    Ok(())
}
