//! Score deduction policy. Applied in a fixed order and summed before the
//! final clamp to [0, 100].

use super::{AntivirusStatus, Severity, SuspiciousIndicator, Vulnerability};
use crate::config::ScoringConfig;
use serde::{Deserialize, Serialize};

pub const MAX_SCORE: i64 = 100;

const ANTIVIRUS_DISABLED: i64 = 30;
const REAL_TIME_DISABLED: i64 = 20;
const SIGNATURE_AGE_GRACE_DAYS: u32 = 7;
const SIGNATURE_AGE_PER_DAY: i64 = 2;
const SIGNATURE_AGE_CAP: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: u8, config: &ScoringConfig) -> Self {
        if score < config.high_risk_below {
            RiskLevel::High
        } else if score < config.medium_risk_below {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// One line of the score breakdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduction {
    pub reason: &'static str,
    pub points: i64,
}

fn indicator_points(severity: Severity) -> i64 {
    match severity {
        Severity::High => 25,
        Severity::Medium => 15,
        Severity::Low => 5,
    }
}

fn vulnerability_points(severity: Severity) -> i64 {
    match severity {
        Severity::High => 20,
        Severity::Medium => 10,
        Severity::Low => 5,
    }
}

fn flag_off(flag: Option<bool>, config: &ScoringConfig) -> bool {
    match flag {
        Some(on) => !on,
        None => config.unknown_as_disabled,
    }
}

/// Signature age deduction: nothing up to 7 days, then 2 points per day capped at 20.
pub fn signature_age_points(age_days: Option<u32>) -> i64 {
    match age_days {
        Some(age) if age > SIGNATURE_AGE_GRACE_DAYS => {
            (i64::from(age) * SIGNATURE_AGE_PER_DAY).min(SIGNATURE_AGE_CAP)
        }
        _ => 0,
    }
}

pub fn deductions(
    antivirus: &AntivirusStatus,
    suspicious: &[SuspiciousIndicator],
    vulnerabilities: &[Vulnerability],
    config: &ScoringConfig,
) -> Vec<Deduction> {
    let mut out = Vec::new();
    if flag_off(antivirus.antivirus_enabled, config) {
        out.push(Deduction {
            reason: "antivirus_disabled",
            points: ANTIVIRUS_DISABLED,
        });
    }
    if flag_off(antivirus.real_time_protection, config) {
        out.push(Deduction {
            reason: "real_time_protection_disabled",
            points: REAL_TIME_DISABLED,
        });
    }
    let age = signature_age_points(antivirus.signature_age_days);
    if age > 0 {
        out.push(Deduction {
            reason: "signature_age",
            points: age,
        });
    }
    for indicator in suspicious {
        out.push(Deduction {
            reason: indicator.kind.as_str(),
            points: indicator_points(indicator.severity),
        });
    }
    for vuln in vulnerabilities {
        out.push(Deduction {
            reason: vuln.kind.as_str(),
            points: vulnerability_points(vuln.severity),
        });
    }
    out
}

pub fn score_from(deductions: &[Deduction]) -> u8 {
    let total: i64 = deductions.iter().map(|d| d.points).sum();
    // clamp bounds the value to 0..=100, so the cast cannot truncate
    (MAX_SCORE - total).clamp(0, MAX_SCORE) as u8
}

pub fn security_score(
    antivirus: &AntivirusStatus,
    suspicious: &[SuspiciousIndicator],
    vulnerabilities: &[Vulnerability],
    config: &ScoringConfig,
) -> u8 {
    score_from(&deductions(antivirus, suspicious, vulnerabilities, config))
}
