/*!
Import/export fixtures

- ImportFileBuilder assembles ';'-delimited import files row by row
- parse_export turns an export table back into typed rows for assertions
*/

use anyhow::{bail, Result};
use pingwatch_kernel::transfer::{DELIMITER, EXPORT_HEADER};
use std::path::Path;

/// Builds an import body the way an operator's spreadsheet would look.
#[derive(Debug, Default, Clone)]
pub struct ImportFileBuilder {
    header: bool,
    rows: Vec<String>,
}

impl ImportFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends the export header, which import must skip.
    pub fn with_header(mut self) -> Self {
        self.header = true;
        self
    }

    pub fn host(mut self, address: &str) -> Self {
        self.rows.push(format!("{address};imported"));
        self
    }

    pub fn hosts<'a>(mut self, addresses: impl IntoIterator<Item = &'a str>) -> Self {
        for address in addresses {
            self = self.host(address);
        }
        self
    }

    /// Any raw line, e.g. garbage or a quoted field.
    pub fn raw(mut self, line: &str) -> Self {
        self.rows.push(line.to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut out = String::new();
        if self.header {
            out.push_str(&EXPORT_HEADER.join(";"));
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(row);
            out.push('\n');
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.build())?;
        log::info!("[fixtures] wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// One parsed export line.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub address: String,
    pub status: String,
    pub rtt_ms: Option<f64>,
    pub delivered_pct: f64,
    pub loss_pct: f64,
    pub last_probe: Option<String>,
}

fn parse_pct(field: &str) -> Result<f64> {
    let Some(num) = field.strip_suffix('%') else {
        bail!("percentage without '%' suffix: {field}");
    };
    Ok(num.parse()?)
}

fn optional(field: &str) -> Option<&str> {
    (field != "n/a").then_some(field)
}

/// Checks the header, then parses every data line.
pub fn parse_export(text: &str) -> Result<Vec<ExportRow>> {
    let mut lines = text.lines();
    let header = lines.next().unwrap_or_default();
    if header.split(DELIMITER).collect::<Vec<_>>() != EXPORT_HEADER {
        bail!("unexpected export header: {header}");
    }

    lines
        .filter(|l| !l.is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split(DELIMITER).collect();
            let [address, status, rtt, delivered, loss, last] = fields[..] else {
                bail!("expected 6 fields, got {}: {line}", fields.len());
            };
            Ok(ExportRow {
                address: address.to_string(),
                status: status.to_string(),
                rtt_ms: optional(rtt).map(str::parse).transpose()?,
                delivered_pct: parse_pct(delivered)?,
                loss_pct: parse_pct(loss)?,
                last_probe: optional(last).map(str::to_string),
            })
        })
        .collect()
}
