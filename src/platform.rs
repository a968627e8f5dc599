//! Target platforms
//!
//! Validates the requested OS/architecture/ARM revision against the
//! configured allow-lists and normalizes the result so that requests
//! differing only in ignored fields describe the same platform.

use crate::archive::ArchiveFormat;
use crate::config::schema::PlatformsConfig;
use crate::error::{BuildsrvError, BuildsrvResult};
use std::fmt;

/// Architecture name whose builds take an ARM revision
pub const ARM_ARCH: &str = "arm";

/// A validated, normalized build target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    os: String,
    arch: String,
    arm: Option<String>,
}

impl Platform {
    /// Validate raw request values and normalize them.
    ///
    /// Empty strings count as absent. The ARM revision is checked whenever
    /// it is given, then dropped for non-ARM architectures; ARM builds
    /// without one get `rules.default_arm`.
    pub fn parse(
        os: Option<&str>,
        arch: Option<&str>,
        arm: Option<&str>,
        rules: &PlatformsConfig,
    ) -> BuildsrvResult<Self> {
        let os = non_empty(os).ok_or(BuildsrvError::MissingParameter("os"))?;
        let arch = non_empty(arch).ok_or(BuildsrvError::MissingParameter("arch"))?;
        let arm = non_empty(arm);

        if !is_supported(rules, os, arch) {
            return Err(BuildsrvError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            });
        }

        if let Some(rev) = arm {
            if !rules.arm.iter().any(|a| a == rev) {
                return Err(BuildsrvError::UnsupportedArm(rev.to_string()));
            }
        }

        let arm = if arch == ARM_ARCH {
            Some(arm.unwrap_or(&rules.default_arm).to_string())
        } else {
            None
        };

        Ok(Self {
            os: os.to_string(),
            arch: arch.to_string(),
            arm,
        })
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// ARM revision; always `None` for non-ARM architectures
    pub fn arm(&self) -> Option<&str> {
        self.arm.as_deref()
    }

    /// File name of the raw binary built for this platform
    pub fn binary_file_name(&self, base: &str) -> String {
        if self.os == "windows" {
            format!("{}.exe", base)
        } else {
            base.to_string()
        }
    }

    /// Suggested download name for the packaged artifact
    pub fn download_file_name(&self, base: &str, format: ArchiveFormat) -> String {
        format!(
            "{}_{}_{}{}_custom.{}",
            base,
            self.os,
            self.arch,
            self.arm.as_deref().unwrap_or(""),
            format.extension()
        )
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(ref arm) = self.arm {
            write!(f, "/v{}", arm)?;
        }
        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_supported(rules: &PlatformsConfig, os: &str, arch: &str) -> bool {
    let combo = format!("{}/{}", os, arch);
    rules.os.iter().any(|o| o == os)
        && rules.arch.iter().any(|a| a == arch)
        && !rules.exclude.iter().any(|e| *e == combo)
}
