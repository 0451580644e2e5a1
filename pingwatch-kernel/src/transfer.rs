//! Semicolon-delimited import/export of the host table.

use crate::models::Host;
use time::macros::format_description;

pub const DELIMITER: char = ';';
pub const EXPORT_HEADER: [&str; 6] = ["Address", "Status", "RTT, ms", "Delivered, %", "Loss, %", "Last probe"];

/// First field of every non-blank line. Header rows and garbage come out
/// as invalid addresses and are skipped by the registry.
pub fn import_rows(text: &str) -> Vec<String> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .filter_map(|line| {
            let first = line.split(DELIMITER).next()?.trim().trim_matches('"').trim();
            (!first.is_empty()).then(|| first.to_string())
        })
        .collect()
}

pub fn export_row(host: &Host) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let rtt = host.round_trip_ms.map_or_else(|| "n/a".to_string(), |ms| format!("{ms:.1}"));
    let last = host
        .last_probe_at
        .and_then(|ts| ts.format(&fmt).ok())
        .unwrap_or_else(|| "n/a".to_string());
    [
        host.address.clone(),
        host.status.to_string(),
        rtt,
        format!("{:.1}%", host.delivered_pct),
        format!("{:.1}%", host.loss_pct),
        last,
    ]
    .join(";")
}

/// Header plus one row per host, `\n` terminated.
pub fn export_table(hosts: &[Host]) -> String {
    let mut out = EXPORT_HEADER.join(";");
    out.push('\n');
    for host in hosts {
        out.push_str(&export_row(host));
        out.push('\n');
    }
    out
}
