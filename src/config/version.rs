//! Image version from `info/version.txt`, e.g. `agrodroid_t51-v45`.

use serde::Serialize;
use std::path::Path;

use crate::utils::{HarnessError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageVersion {
    raw: String,
    major: u32,
}

impl ImageVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let digits: String = raw
            .rfind("-v")
            .map(|pos| raw[pos + 2..].chars().take_while(|c| c.is_ascii_digit()).collect())
            .unwrap_or_default();
        let major = digits.parse().map_err(|_| {
            HarnessError::Configuration(format!("image version `{}` has no -v<major> suffix", raw))
        })?;
        Ok(Self { raw: raw.to_string(), major })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Configuration(format!("cannot read version file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    /// Board/variant markers such as `t51`, `t71` or `agrodroid_onnx_patch`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.raw.contains(tag)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_major_and_tags() {
        let v = ImageVersion::parse("agrodroid_t51-v45\n").unwrap();
        assert_eq!(v.major(), 45);
        assert!(v.has_tag("t51"));
        assert!(!v.has_tag("t71"));
        assert_eq!(v.as_str(), "agrodroid_t51-v45");
    }

    #[test]
    fn last_suffix_wins() {
        assert_eq!(ImageVersion::parse("agrodroid-video-v2-v38").unwrap().major(), 38);
    }

    #[test]
    fn missing_suffix_is_a_configuration_error() {
        assert!(matches!(ImageVersion::parse("agrodroid"), Err(HarnessError::Configuration(_))));
        assert!(ImageVersion::parse("agrodroid-v").is_err());
    }
}
