//! Interface version gate.

use crate::manifest::Manifest;
use crate::types::{PluginError, PluginResult};

/// Major interface version implemented by this host.
pub const INTERFACE_VERSION_MAJOR: u32 = 1;

/// Highest minor interface version implemented by this host.
pub const INTERFACE_VERSION_MINOR: u32 = 1;

/// The host interface version as declared by plugins, `"<major>.<minor>"`.
pub fn interface_version() -> String {
    format!("{INTERFACE_VERSION_MAJOR}.{INTERFACE_VERSION_MINOR}")
}

/// Name of the running platform as used in `md_platforms`.
pub fn current_platform() -> &'static str {
    if cfg!(target_os = "macos") {
        "Darwin"
    } else if cfg!(target_os = "windows") {
        "Windows"
    } else {
        "Linux"
    }
}

/// Split `"<major>.<minor>"`. Components too large for a `u64` saturate.
fn parse_iid(iid: &str) -> Option<(u64, u64)> {
    let (major, minor) = iid.split_once('.')?;
    let number = |s: &str| {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(s.parse().unwrap_or(u64::MAX))
    };
    Some((number(major)?, number(minor)?))
}

/// Collect every reason the manifest is unacceptable on `platform`.
pub fn rejection_reasons(manifest: &Manifest, platform: &str) -> Vec<String> {
    let mut reasons = Vec::new();

    if manifest.iid.is_empty() {
        reasons.push("Interface id missing".to_string());
    } else {
        match parse_iid(&manifest.iid) {
            None => reasons.push(format!("Invalid interface id pattern: '{}'", manifest.iid)),
            Some((major, minor)) => {
                if major != u64::from(INTERFACE_VERSION_MAJOR) {
                    reasons.push(format!(
                        "Incompatible major version: {major}, expected: {INTERFACE_VERSION_MAJOR}"
                    ));
                }
                if minor > u64::from(INTERFACE_VERSION_MINOR) {
                    reasons.push(format!(
                        "Incompatible minor version: {minor}, supported up to: {INTERFACE_VERSION_MINOR}"
                    ));
                }
            }
        }
    }

    if !manifest.platforms.is_empty() && !manifest.platforms.iter().any(|p| p == platform) {
        reasons.push(format!("Platform not supported: {platform}"));
    }

    reasons
}

/// Accept or reject a manifest for the running platform.
pub fn validate(manifest: &Manifest) -> PluginResult<()> {
    let reasons = rejection_reasons(manifest, current_platform());
    if reasons.is_empty() {
        Ok(())
    } else {
        Err(PluginError::InvalidManifest {
            id: manifest.id.clone(),
            reasons: reasons.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(iid: &str) -> Manifest {
        Manifest {
            id: "lua.gate".into(),
            iid: iid.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_exactly_compatible_versions() {
        for major in 0..4u32 {
            for minor in 0..4u32 {
                let m = manifest(&format!("{major}.{minor}"));
                let reasons = rejection_reasons(&m, "Linux");
                let compatible =
                    major == INTERFACE_VERSION_MAJOR && minor <= INTERFACE_VERSION_MINOR;
                assert_eq!(reasons.is_empty(), compatible, "{major}.{minor}: {reasons:?}");
            }
        }
    }

    #[test]
    fn test_pattern_and_empty() {
        for bad in ["1", "1.", ".1", "v1.0", "1.0.0", "1.x"] {
            let reasons = rejection_reasons(&manifest(bad), "Linux");
            assert_eq!(reasons.len(), 1, "{bad}");
            assert!(reasons[0].contains("pattern"), "{bad}");
        }
        assert_eq!(
            rejection_reasons(&manifest(""), "Linux"),
            vec!["Interface id missing".to_string()]
        );
    }

    #[test]
    fn test_oversized_versions_are_mismatches() {
        let reasons = rejection_reasons(&manifest("1.99999999999"), "Linux");
        assert_eq!(
            reasons,
            vec!["Incompatible minor version: 99999999999, supported up to: 1".to_string()]
        );

        let huge = format!("{}.0", "9".repeat(40));
        let reasons = rejection_reasons(&manifest(&huge), "Linux");
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].starts_with("Incompatible major version"));
    }

    #[test]
    fn test_reasons_are_collected() {
        let mut m = manifest("2.5");
        m.platforms = vec!["Darwin".into()];

        let reasons = rejection_reasons(&m, "Linux");
        assert_eq!(reasons.len(), 3);

        m.platforms.push("Linux".into());
        m.iid = "1.0".into();
        assert!(rejection_reasons(&m, "Linux").is_empty());
    }

    #[test]
    fn test_validate_joins_reasons() {
        let mut m = manifest("0.9");
        m.platforms = vec!["Plan9".into()];

        match validate(&m).unwrap_err() {
            PluginError::InvalidManifest { id, reasons } => {
                assert_eq!(id, "lua.gate");
                assert!(reasons.contains(", Platform not supported"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(interface_version(), "1.1");
    }
}
