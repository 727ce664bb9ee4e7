//! ---
//! uev_section: "05-networking-external-interfaces"
//! uev_subsection: "module"
//! uev_type: "source"
//! uev_scope: "code"
//! uev_description: "Build metadata reported by --version."
//! uev_version: "v0.1.0"
//! uev_owner: "tbd"
//! ---
/// Compile-time version metadata captured via `vergen`.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub semver: String,
    pub build_timestamp: String,
    pub target: String,
    pub profile: String,
}

impl VersionInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            semver: env!("CARGO_PKG_VERSION").to_owned(),
            build_timestamp: option_env!("VERGEN_BUILD_TIMESTAMP")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            target: option_env!("VERGEN_CARGO_TARGET_TRIPLE")
                .unwrap_or("UNKNOWN")
                .to_owned(),
            profile: option_env!("VERGEN_CARGO_OPT_LEVEL")
                .map(|level| format!("opt-level {}", level))
                .unwrap_or_else(|| "UNKNOWN".to_owned()),
        }
    }

    #[must_use]
    pub fn banner(&self) -> String {
        format!("uevctl v{}", self.semver)
    }

    /// Multi-line string for `--version`.
    #[must_use]
    pub fn extended(&self) -> String {
        format!(
            "{banner}\nBuilt: {built}\nTarget: {target}\nProfile: {profile}",
            banner = self.banner(),
            built = self.build_timestamp,
            target = self.target,
            profile = self.profile
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_contains_semver() {
        let info = VersionInfo::current();
        assert!(info.extended().contains(&info.semver));
        assert!(info.extended().starts_with("uevctl v"));
    }
}
