//! Static lookup tables: known security tooling and suspicious name tokens.

/// Process name (compared case-insensitively) → vendor label.
pub const SECURITY_SOFTWARE: &[(&str, &str)] = &[
    // Antivirus
    ("MsMpEng.exe", "Windows Defender"),
    ("avp.exe", "Kaspersky"),
    ("avast.exe", "Avast"),
    ("avgnt.exe", "Avira"),
    ("mbamservice.exe", "Malwarebytes"),
    ("mcshield.exe", "McAfee"),
    ("nod32krn.exe", "ESET NOD32"),
    ("bdagent.exe", "Bitdefender"),
    ("fsav32.exe", "F-Secure"),
    ("wrsa.exe", "Webroot"),
    ("clamd", "ClamAV"),
    ("freshclam", "ClamAV"),
    ("falcon-sensor", "CrowdStrike Falcon"),
    // Firewalls
    ("zlclient.exe", "ZoneAlarm"),
    ("outpost.exe", "Outpost Firewall"),
    // System monitors
    ("procmon.exe", "Process Monitor"),
    ("wireshark.exe", "Wireshark"),
    ("wireshark", "Wireshark"),
    ("fiddler.exe", "Fiddler"),
    ("osqueryd", "osquery"),
];

/// Lowercase substrings that flag a process name as suspicious.
pub const SUSPICIOUS_TOKENS: &[&str] = &[
    "bitcoin", "miner", "crypto", "hack", "keylog", "trojan", "backdoor", "rootkit", "spyware",
    "adware",
];

pub fn vendor_for(process_name: &str) -> Option<&'static str> {
    SECURITY_SOFTWARE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(process_name))
        .map(|(_, vendor)| *vendor)
}

/// Every suspicious token contained in `process_name`, in table order.
pub fn suspicious_tokens_in(process_name: &str) -> impl Iterator<Item = &'static str> + '_ {
    let lower = process_name.to_lowercase();
    SUSPICIOUS_TOKENS
        .iter()
        .copied()
        .filter(move |token| lower.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_lookup_ignores_case() {
        assert_eq!(vendor_for("msmpeng.exe"), Some("Windows Defender"));
        assert_eq!(vendor_for("notepad.exe"), None);
    }

    #[test]
    fn tokens_match_substrings() {
        let hits: Vec<_> = suspicious_tokens_in("BitcoinMiner.exe").collect();
        assert_eq!(hits, vec!["bitcoin", "miner"]);
        assert_eq!(suspicious_tokens_in("bash").count(), 0);
    }
}
