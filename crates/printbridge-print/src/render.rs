// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Documents for the rendered channels: the HTML page and the PowerShell
// System.Drawing script. Input is already sanitized to printable ASCII.

/// Wrap text in a monospace HTML page, escaping markup.
pub fn html_page(text: &str) -> String {
    let mut body = String::with_capacity(text.len() + 64);
    for c in text.chars() {
        match c {
            '&' => body.push_str("&amp;"),
            '<' => body.push_str("&lt;"),
            '>' => body.push_str("&gt;"),
            '\n' => body.push_str("<br>"),
            '\r' => {}
            other => body.push(other),
        }
    }
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<style>\n\
         @page {{ margin: 10mm; }}\n\
         body {{ font-family: 'Courier New', monospace; font-size: 12px; margin: 0; padding: 10px; white-space: pre-wrap; }}\n\
         </style>\n</head>\n<body>{body}</body>\n</html>\n"
    )
}

/// Quote a value as a PowerShell single-quoted string literal.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Script that draws `text` in Courier New on `printer`, breaking pages
/// when the next line would run past the bottom margin.
pub fn graphics_script(printer: &str, text: &str) -> String {
    format!(
        r#"$ErrorActionPreference = 'Stop'
Add-Type -AssemblyName System.Drawing
$lines = ({text}) -split "`r?`n"
$doc = New-Object System.Drawing.Printing.PrintDocument
$doc.PrinterSettings.PrinterName = {printer}
if (-not $doc.PrinterSettings.IsValid) {{ throw "printer not found: " + {printer} }}
$doc.DocumentName = 'printbridge'
$font = New-Object System.Drawing.Font('Courier New', 9)
$script:index = 0
$doc.add_PrintPage({{
    param($sender, $e)
    $y = $e.MarginBounds.Top
    $height = $font.GetHeight($e.Graphics)
    while ($script:index -lt $lines.Count) {{
        if ($y + $height -gt $e.MarginBounds.Bottom) {{ $e.HasMorePages = $true; return }}
        $e.Graphics.DrawString($lines[$script:index], $font, [System.Drawing.Brushes]::Black, $e.MarginBounds.Left, $y)
        $y += $height
        $script:index++
    }}
    $e.HasMorePages = $false
}})
$doc.Print()
$font.Dispose()
$doc.Dispose()
"#,
        text = ps_quote(text),
        printer = ps_quote(printer),
    )
}
