//! Alert commands

use anyhow::Result;
use colored::Colorize;
use monitor_lib::{AlertLevel, AlertRecord, EntityStore};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_status, format_timestamp, print_json, print_success, print_table, print_warning,
    OutputFormat,
};

/// Row for the alerts table
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Read")]
    read: String,
}

impl From<&AlertRecord> for AlertRow {
    fn from(alert: &AlertRecord) -> Self {
        Self {
            id: alert.id,
            level: color_status(&alert.level.to_string()),
            message: alert.message.clone(),
            created_at: format_timestamp(&alert.created_at),
            read: if alert.is_read {
                "✓".to_string()
            } else {
                "".to_string()
            },
        }
    }
}

#[derive(Serialize)]
struct Changed {
    changed: usize,
}

/// List recent alerts, newest first
pub fn list_alerts(data_file: &Path, limit: usize, format: OutputFormat) -> Result<()> {
    let store = super::open_store(data_file)?;
    let alerts = store.begin()?.alerts(limit)?;

    match format {
        OutputFormat::Json => print_json(&alerts)?,
        OutputFormat::Table => {
            if alerts.is_empty() {
                print_warning("No alerts found");
                return Ok(());
            }

            print_table(alerts.iter().map(AlertRow::from).collect());
            let unread = alerts.iter().filter(|a| !a.is_read).count();
            println!("\nTotal: {} alerts ({} unread)", alerts.len(), unread);
        }
    }

    Ok(())
}

/// Evaluate thresholds once against a fresh host sample and entity batch
///
/// Cooldowns live in the running agent, so every threshold crossed right
/// now is stored again.
pub async fn check_alerts(data_file: &Path, docker: bool, format: OutputFormat) -> Result<()> {
    let monitor = super::local_monitor(data_file, docker)?;

    monitor.sample_host();
    monitor.collect_entities(false).await;
    tokio::time::sleep(super::window(1)).await;
    monitor.collect_entities(false).await;
    let host = monitor.sample_host();

    let records = monitor.evaluate_alerts(&host);

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            if records.is_empty() {
                print_success("No thresholds crossed");
                return Ok(());
            }

            let critical = records
                .iter()
                .filter(|r| r.level == AlertLevel::Critical)
                .count();
            if critical > 0 {
                println!("{}", format!("{} critical", critical).red().bold());
            }
            print_table(records.iter().map(AlertRow::from).collect());
        }
    }

    Ok(())
}

/// Mark every alert as read
pub fn mark_read(data_file: &Path, format: OutputFormat) -> Result<()> {
    let store = super::open_store(data_file)?;
    let mut tx = store.begin()?;
    let changed = tx.mark_alerts_read()?;
    tx.commit()?;

    report_changed(changed, "marked as read", format)
}

/// Delete every alert
pub fn clear_alerts(data_file: &Path, format: OutputFormat) -> Result<()> {
    let store = super::open_store(data_file)?;
    let mut tx = store.begin()?;
    let changed = tx.clear_alerts()?;
    tx.commit()?;

    report_changed(changed, "cleared", format)
}

fn report_changed(changed: usize, action: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&Changed { changed })?,
        OutputFormat::Table => print_success(&format!("{} alerts {}", changed, action)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use monitor_lib::LocalStore;

    fn seeded_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("monitor.json");
        let store = LocalStore::open(&path).unwrap();
        let mut tx = store.begin().unwrap();
        tx.insert_alert(AlertLevel::Warning, "High CPU usage: 85.0%", Utc::now())
            .unwrap();
        tx.insert_alert(AlertLevel::Critical, "Disk almost full: 99.0%", Utc::now())
            .unwrap();
        tx.commit().unwrap();
        path
    }

    #[test]
    fn test_mark_read_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_file(&dir);

        mark_read(&path, OutputFormat::Json).unwrap();

        let alerts = LocalStore::open(&path)
            .unwrap()
            .begin()
            .unwrap()
            .alerts(10)
            .unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.is_read));
    }

    #[test]
    fn test_clear_alerts_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_file(&dir);

        clear_alerts(&path, OutputFormat::Json).unwrap();

        let store = LocalStore::open(&path).unwrap();
        assert!(store.begin().unwrap().alerts(10).unwrap().is_empty());
    }

    #[test]
    fn test_alert_row() {
        colored::control::set_override(false);
        let dir = tempfile::tempdir().unwrap();
        let path = seeded_file(&dir);
        let alerts = LocalStore::open(&path)
            .unwrap()
            .begin()
            .unwrap()
            .alerts(1)
            .unwrap();

        let row = AlertRow::from(&alerts[0]);
        assert_eq!(row.level, "critical");
        assert_eq!(row.read, "");
    }
}
