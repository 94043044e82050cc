//! Platform security-center facts: antivirus state and pending OS updates.
//! Windows queries Defender through PowerShell; elsewhere these facts are
//! reported as unsupported so the scan engine can mark them unknown.

use super::{AntivirusFacts, ProbeError};
#[cfg(target_os = "windows")]
use serde::Deserialize;

#[derive(Default)]
pub struct DefenderCollector;

#[cfg(target_os = "windows")]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MpComputerStatus {
    antivirus_enabled: Option<bool>,
    real_time_protection_enabled: Option<bool>,
    quick_scan_age: Option<u32>,
    full_scan_age: Option<u32>,
    antivirus_signature_age: Option<u32>,
}

#[cfg(target_os = "windows")]
fn powershell(fact: &'static str, script: &str) -> Result<String, ProbeError> {
    let output = std::process::Command::new("powershell")
        .args(["-NoProfile", "-NonInteractive", "-Command", script])
        .output()
        .map_err(|e| ProbeError::unavailable(fact, e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::unavailable(fact, stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

impl DefenderCollector {
    #[cfg(target_os = "windows")]
    pub fn antivirus(&self) -> Result<AntivirusFacts, ProbeError> {
        let out = powershell(
            "antivirus",
            "Get-MpComputerStatus | Select-Object AntivirusEnabled, RealTimeProtectionEnabled, \
             QuickScanAge, FullScanAge, AntivirusSignatureAge | ConvertTo-Json",
        )?;
        let status: MpComputerStatus =
            serde_json::from_str(&out).map_err(|e| ProbeError::unavailable("antivirus", e))?;
        Ok(AntivirusFacts {
            antivirus_enabled: status.antivirus_enabled,
            real_time_protection: status.real_time_protection_enabled,
            quick_scan_age_days: status.quick_scan_age,
            full_scan_age_days: status.full_scan_age,
            signature_age_days: status.antivirus_signature_age,
        })
    }

    #[cfg(not(target_os = "windows"))]
    pub fn antivirus(&self) -> Result<AntivirusFacts, ProbeError> {
        Err(ProbeError::Unsupported("antivirus"))
    }

    #[cfg(target_os = "windows")]
    pub fn pending_updates(&self) -> Result<u32, ProbeError> {
        let out = powershell(
            "pending_updates",
            "$s = New-Object -ComObject Microsoft.Update.Session; \
             $r = $s.CreateUpdateSearcher().Search('IsInstalled=0'); $r.Updates.Count",
        )?;
        out.parse::<u32>()
            .map_err(|e| ProbeError::unavailable("pending_updates", e))
    }

    #[cfg(not(target_os = "windows"))]
    pub fn pending_updates(&self) -> Result<u32, ProbeError> {
        Err(ProbeError::Unsupported("pending_updates"))
    }
}
