// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fixed page printed by "test print".

use chrono::{DateTime, Local};

const RULE: &str = "========================================";

/// Content of the test page for `station` on `printer`, stamped with `now`.
pub fn test_page(station: &str, printer: &str, now: DateTime<Local>) -> String {
    format!(
        "\n{RULE}\n           PRINT TEST\n{RULE}\n\n\
         Station: {station}\n\
         Date/Time: {}\n\
         Printer: {printer}\n\n\
         This is a test page from Printbridge.\n\n\
         If you can read this, printing is\n\
         working correctly!\n\n\
         {RULE}\n",
        now.format("%d/%m/%Y %H:%M:%S"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn page_names_station_printer_and_time() {
        let now = Local
            .with_ymd_and_hms(2025, 3, 1, 18, 30, 5)
            .single()
            .expect("unambiguous local time");
        let page = test_page("Cozinha", "EPSON_TM_T20", now);
        assert!(page.contains("Station: Cozinha"));
        assert!(page.contains("Printer: EPSON_TM_T20"));
        assert!(page.contains("01/03/2025 18:30:05"));
    }
}
