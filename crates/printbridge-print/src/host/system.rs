// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print host backed by the platform's command-line tools: `lp`/`lpstat` on
// POSIX, PowerShell on Windows.

use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use printbridge_core::config::DispatchSettings;
use printbridge_core::error::{BridgeError, Result};
use printbridge_core::types::PrinterInfo;

use super::{PrintHost, RenderRequest};
use crate::completion::Completion;
use crate::printers::{lpstat_reports_none, parse_lpstat, parse_win32_printers};
use crate::render::ps_quote;

/// Placeholder in the spooler command replaced by the printer name.
pub const PRINTER_PLACEHOLDER: &str = "{printer}";

const POWERSHELL: &str = "powershell";
const WIN32_PRINTERS: &str =
    "Get-CimInstance Win32_Printer | Select-Object Name,Default | ConvertTo-Json -Compress";

/// Pause between writing the page and asking the OS to print it.
const RENDER_WARMUP: Duration = Duration::from_millis(500);

/// Host that runs the system's printing commands.
#[derive(Debug, Clone)]
pub struct SystemHost {
    spooler_command: Vec<String>,
    render_warmup: Duration,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::from_settings(&DispatchSettings::default())
    }
}

impl SystemHost {
    pub fn from_settings(settings: &DispatchSettings) -> Self {
        Self {
            spooler_command: settings.spooler_command.clone(),
            render_warmup: RENDER_WARMUP,
        }
    }

    pub fn with_spooler_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spooler_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Program and arguments for spooling to `printer`.
    pub fn spooler_argv(&self, printer: &str) -> Result<(String, Vec<String>)> {
        let (program, args) = self
            .spooler_command
            .split_first()
            .ok_or_else(|| BridgeError::Config("spooler command is empty".into()))?;
        let args = args
            .iter()
            .map(|a| a.replace(PRINTER_PLACEHOLDER, printer))
            .collect();
        Ok((program.clone(), args))
    }

    async fn lpstat(&self) -> Result<Vec<PrinterInfo>> {
        let output = Command::new("lpstat")
            .args(["-p", "-d"])
            .env("LANG", "C")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BridgeError::PrinterEnumeration(format!("could not run lpstat: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            if lpstat_reports_none(&stderr) {
                return Ok(Vec::new());
            }
            return Err(BridgeError::PrinterEnumeration(format!(
                "lpstat {}: {}",
                describe_exit(output.status),
                diagnostic(&stderr)
            )));
        }
        Ok(parse_lpstat(&stdout))
    }

    async fn win32_printers(&self) -> Result<Vec<PrinterInfo>> {
        let stdout = self
            .run_script(WIN32_PRINTERS)
            .await
            .map_err(|e| BridgeError::PrinterEnumeration(e.to_string()))?;
        parse_win32_printers(&stdout)
    }
}

fn describe_exit(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".into(),
    }
}

fn diagnostic(stderr: &str) -> &str {
    match stderr.trim() {
        "" => "unknown error",
        s => s,
    }
}

async fn run_powershell(script: &str) -> Result<String> {
    let mut child = Command::new(POWERSHELL)
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
            "-",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::Print(format!("could not start {POWERSHELL}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .await
            .map_err(|e| BridgeError::Print(format!("could not send script: {e}")))?;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| BridgeError::Print(format!("{POWERSHELL} did not finish: {e}")))?;
    if !output.status.success() {
        return Err(BridgeError::Print(format!(
            "script {}: {}",
            describe_exit(output.status),
            diagnostic(&String::from_utf8_lossy(&output.stderr))
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Write the page to a temporary file and hand it to the shell's `PrintTo`
/// verb. The returned path must outlive the spooler's read of the file.
async fn submit_page(request: &RenderRequest, warmup: Duration) -> Result<tempfile::TempPath> {
    if !cfg!(windows) {
        return Err(BridgeError::Print(
            "rendered-page printing needs a Windows host".into(),
        ));
    }

    let mut file = tempfile::Builder::new()
        .prefix("printbridge-")
        .suffix(".html")
        .tempfile()?;
    file.write_all(request.html.as_bytes())?;
    file.flush()?;
    let path = file.into_temp_path();

    tokio::time::sleep(warmup).await;

    let script = format!(
        "$ErrorActionPreference = 'Stop'\n\
         Start-Process -FilePath {} -Verb PrintTo -ArgumentList {} -WindowStyle Hidden -Wait\n",
        ps_quote(&path.to_string_lossy()),
        ps_quote(&format!("\"{}\"", request.printer)),
    );
    run_powershell(&script).await?;
    Ok(path)
}

#[async_trait]
impl PrintHost for SystemHost {
    async fn list_printers(&self) -> Result<Vec<PrinterInfo>> {
        if cfg!(windows) {
            self.win32_printers().await
        } else {
            self.lpstat().await
        }
    }

    async fn spool_raw(&self, printer: &str, data: &[u8]) -> Result<()> {
        let (program, args) = self.spooler_argv(printer)?;
        debug!(%program, ?args, bytes = data.len(), "spooling raw job");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Print(format!("could not run spooler '{program}': {e}")))?;

        // A spooler that rejects the job may exit before reading its input;
        // its exit status is the more useful diagnostic, so check that first.
        let written = match child.stdin.take() {
            Some(mut stdin) => {
                let result = stdin.write_all(data).await;
                drop(stdin);
                result
            }
            None => Ok(()),
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BridgeError::Print(format!("spooler '{program}' did not finish: {e}")))?;
        if !output.status.success() {
            return Err(BridgeError::Print(format!(
                "spooler {}: {}",
                describe_exit(output.status),
                diagnostic(&String::from_utf8_lossy(&output.stderr))
            )));
        }
        written.map_err(|e| BridgeError::Print(format!("could not send data to spooler: {e}")))?;
        info!(printer, "raw job accepted by spooler");
        Ok(())
    }

    async fn run_script(&self, script: &str) -> Result<String> {
        run_powershell(script).await
    }

    fn render_and_print(&self, request: RenderRequest, completion: Completion) {
        let warmup = self.render_warmup;
        tokio::spawn(async move {
            match submit_page(&request, warmup).await {
                Ok(path) => {
                    if completion.finish(Ok(())) {
                        tokio::time::sleep(request.keepalive).await;
                    }
                    drop(path);
                }
                Err(e) => {
                    warn!(printer = %request.printer, error = %e, "rendered page submission failed");
                    completion.finish(Err(e));
                }
            }
        });
    }

    fn host_name(&self) -> &str {
        if cfg!(windows) { "windows" } else { "posix" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spooler_is_lp_raw() {
        let host = SystemHost::default();
        let (program, args) = host.spooler_argv("EPSON").expect("argv");
        assert_eq!(program, "lp");
        assert_eq!(args, ["-d", "EPSON", "-o", "raw"]);
    }

    #[test]
    fn empty_spooler_command_is_config_error() {
        let host = SystemHost::default().with_spooler_command(Vec::<String>::new());
        assert!(matches!(host.spooler_argv("x"), Err(BridgeError::Config(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejecting_spooler_reports_exit_code_and_stderr() {
        let host = SystemHost::default().with_spooler_command([
            "sh",
            "-c",
            "cat >/dev/null; echo \"lp: The printer or class does not exist.\" >&2; exit 1",
            "sh",
            "{printer}",
        ]);
        let err = host
            .spool_raw("does-not-exist", b"hello\n")
            .await
            .expect_err("spooler rejects");
        let message = err.to_string();
        assert!(matches!(err, BridgeError::Print(_)));
        assert!(message.contains("code 1"), "{message}");
        assert!(message.contains("does not exist"), "{message}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn accepting_spooler_receives_payload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("job.bin");
        let host = SystemHost::default().with_spooler_command([
            "sh".to_string(),
            "-c".to_string(),
            format!("cat > '{}'", sink.display()),
        ]);
        host.spool_raw("any", b"Mesa 4\n").await.expect("spooled");
        assert_eq!(std::fs::read(&sink).expect("sink"), b"Mesa 4\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_spooler_binary_is_print_error() {
        let host = SystemHost::default().with_spooler_command(["/nonexistent/printbridge-lp"]);
        let err = host.spool_raw("x", b"").await.expect_err("no binary");
        assert!(err.to_string().contains("could not run spooler"));
    }
}
