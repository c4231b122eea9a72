//! Host sample command

use anyhow::Result;
use colored::Colorize;
use monitor_lib::alerts::Thresholds;
use monitor_lib::host::{HostSampler, SysinfoHost};
use monitor_lib::HostSample;
use std::time::Duration;
use tabled::Tabled;

use crate::output::{
    color_percent, format_bytes, format_timestamp, format_uptime, print_json, print_table,
    OutputFormat,
};

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Sample the host twice, `window` seconds apart, and show the second sample
pub async fn show_host(window: u64, format: OutputFormat) -> Result<()> {
    let sampler = HostSampler::new(Box::new(SysinfoHost::new())).with_min_interval(Duration::ZERO);
    sampler.sample();
    tokio::time::sleep(super::window(window)).await;
    let sample = sampler.sample();

    match format {
        OutputFormat::Json => print_json(&sample)?,
        OutputFormat::Table => {
            println!("{}", "Host".bold());
            print_table(host_rows(&sample, &Thresholds::default()));
        }
    }

    Ok(())
}

fn level(value: f64, threshold: monitor_lib::alerts::Threshold) -> String {
    color_percent(
        value,
        threshold.warning.unwrap_or(f64::INFINITY),
        threshold.critical.unwrap_or(f64::INFINITY),
    )
}

fn host_rows(sample: &HostSample, thresholds: &Thresholds) -> Vec<MetricRow> {
    let temperature = match sample.cpu_temp_celsius {
        Some(celsius) => format!("{:.1}°C", celsius),
        None => "n/a".to_string(),
    };

    vec![
        MetricRow {
            metric: "CPU",
            value: level(sample.cpu_percent, thresholds.cpu),
        },
        MetricRow {
            metric: "RAM",
            value: level(sample.ram_percent, thresholds.ram),
        },
        MetricRow {
            metric: "Disk",
            value: format!(
                "{} ({} used, {} free)",
                level(sample.disk_percent, thresholds.disk),
                format_bytes(sample.disk_used_bytes),
                format_bytes(sample.disk_free_bytes)
            ),
        },
        MetricRow {
            metric: "Temperature",
            value: temperature,
        },
        MetricRow {
            metric: "Upload",
            value: format!("{:.1} KB/s", sample.net_sent_kbps),
        },
        MetricRow {
            metric: "Download",
            value: format!("{:.1} KB/s", sample.net_recv_kbps),
        },
        MetricRow {
            metric: "Processes",
            value: sample.process_count.to_string(),
        },
        MetricRow {
            metric: "Uptime",
            value: format_uptime(sample.uptime_seconds),
        },
        MetricRow {
            metric: "Sampled",
            value: format_timestamp(&sample.sampled_at),
        },
    ]
}
