// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Parsing of host printer listings.

use serde::Deserialize;

use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::PrinterInfo;

/// Parse `lpstat -p -d` output (run with `LANG=C`).
///
/// Printer lines look like `printer NAME is idle.  enabled since ...` or
/// `printer NAME disabled since ...`; the default is announced as
/// `system default destination: NAME`.
pub fn parse_lpstat(output: &str) -> Vec<PrinterInfo> {
    let default = output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("system default destination:")
            .map(|name| name.trim().to_owned())
    });

    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("printer "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(|name| PrinterInfo {
            name: name.to_owned(),
            is_default: default.as_deref() == Some(name),
        })
        .collect()
}

/// Whether lpstat's complaint means "no printers at all" rather than failure.
pub fn lpstat_reports_none(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no destinations added") || stderr.contains("no printers")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Win32Printer {
    name: String,
    #[serde(default)]
    default: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Win32Listing {
    Many(Vec<Win32Printer>),
    One(Win32Printer),
}

/// Parse `Get-CimInstance Win32_Printer | Select-Object Name,Default |
/// ConvertTo-Json`. PowerShell emits a bare object for a single printer and
/// nothing at all when there are none.
pub fn parse_win32_printers(json: &str) -> Result<Vec<PrinterInfo>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let listing: Win32Listing = serde_json::from_str(json.trim())
        .map_err(|e| BridgeError::PrinterEnumeration(format!("unexpected printer listing: {e}")))?;
    let printers = match listing {
        Win32Listing::Many(list) => list,
        Win32Listing::One(one) => vec![one],
    };
    Ok(printers
        .into_iter()
        .map(|p| PrinterInfo {
            name: p.name,
            is_default: p.default,
        })
        .collect())
}

/// The printer marked as default, if any.
pub fn default_of(printers: &[PrinterInfo]) -> Option<String> {
    printers.iter().find(|p| p.is_default).map(|p| p.name.clone())
}
