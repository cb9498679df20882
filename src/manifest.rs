//! Package metadata of this crate and validation of Cargo manifests.

use crate::error::{DeconvolutionError, Result};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// The crate's own manifest.
const EMBEDDED_MANIFEST: &str = include_str!("../Cargo.toml");

/// Metadata of the compiled package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub authors: Vec<&'static str>,
    pub license: &'static str,
}

impl PackageInfo {
    pub fn current() -> PackageInfo {
        PackageInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            description: env!("CARGO_PKG_DESCRIPTION"),
            authors: env!("CARGO_PKG_AUTHORS")
                .split(':')
                .filter(|a| !a.is_empty())
                .collect(),
            license: env!("CARGO_PKG_LICENSE"),
        }
    }

    pub fn semver(&self) -> Result<Version> {
        Ok(Version::parse(self.version)?)
    }
}

impl Display for PackageInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {}", self.name, self.version)?;
        writeln!(f, "{}", self.description)?;
        writeln!(f, "authors: {}", self.authors.join(", "))?;
        write!(f, "license: {}", self.license)
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PackageSection {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub license: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Manifest {
    pub package: Option<PackageSection>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, toml::Value>,
}

fn manifest_error(message: impl Into<String>) -> DeconvolutionError {
    DeconvolutionError::Manifest {
        message: message.into(),
    }
}

fn required<'a>(field: &str, value: &'a Option<String>) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(manifest_error(format!("package.{field} is missing or empty"))),
    }
}

fn check_requirement(dependency: &str, requirement: &str) -> Result<()> {
    VersionReq::parse(requirement).map_err(|err| {
        manifest_error(format!(
            "dependency {dependency} has an invalid version requirement \"{requirement}\": {err}"
        ))
    })?;
    Ok(())
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Manifest> {
        Ok(toml::from_str(text)?)
    }

    /// The manifest this crate was built from.
    pub fn embedded() -> Result<Manifest> {
        Manifest::parse(EMBEDDED_MANIFEST)
    }

    /// Checks the package metadata and the dependency declarations, returning the version.
    pub fn validate(&self) -> Result<Version> {
        let package = self
            .package
            .as_ref()
            .ok_or_else(|| manifest_error("the [package] table is missing"))?;

        let name = required("name", &package.name)?;
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(manifest_error(format!(
                "package.name \"{name}\" must be lowercase alphanumeric with - or _"
            )));
        }
        let version = Version::parse(required("version", &package.version)?)?;
        required("description", &package.description)?;
        required("license", &package.license)?;
        if package.authors.iter().all(|a| a.trim().is_empty()) {
            return Err(manifest_error("package.authors is missing or empty"));
        }

        for (dependency, declaration) in &self.dependencies {
            match declaration {
                toml::Value::String(requirement) => check_requirement(dependency, requirement)?,
                toml::Value::Table(table) => {
                    if let Some(requirement) = table.get("version") {
                        let requirement = requirement.as_str().ok_or_else(|| {
                            manifest_error(format!(
                                "dependency {dependency} has a non-string version"
                            ))
                        })?;
                        check_requirement(dependency, requirement)?;
                    } else if !table.contains_key("path")
                        && !table.contains_key("git")
                        && !table.contains_key("workspace")
                    {
                        return Err(manifest_error(format!(
                            "dependency {dependency} needs a version, path or git source"
                        )));
                    }
                }
                _ => {
                    return Err(manifest_error(format!(
                        "dependency {dependency} must be a string or a table"
                    )))
                }
            }
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
        [package]
        name = "thz-deconvolution"
        version = "1.0.0"
        description = "THz-TDS deconvolution library"
        authors = ["Arnaud Demion"]
        license = "MIT"

        [dependencies]
        ndarray = "0.16"
        rayon = { version = "1.11" }
        cancellable_loops = { path = "cancellable_loops" }
    "#;

    #[test]
    fn test_embedded_manifest_is_valid() {
        let manifest = Manifest::embedded().unwrap();
        let version = manifest.validate().unwrap();
        assert_eq!(version, Version::new(1, 0, 0));
        let package = manifest.package.unwrap();
        assert_eq!(package.name.as_deref(), Some("thz-deconvolution"));
        assert_eq!(package.license.as_deref(), Some("MIT"));
    }

    #[test]
    fn test_package_info_matches_manifest() {
        let info = PackageInfo::current();
        assert_eq!(info.name, "thz-deconvolution");
        assert_eq!(info.semver().unwrap(), Version::new(1, 0, 0));
        assert_eq!(info.authors, vec!["Arnaud Demion"]);
        assert_eq!(info.description, "THz-TDS deconvolution library");
    }

    #[test]
    fn test_valid_manifest() {
        assert!(Manifest::parse(VALID).unwrap().validate().is_ok());
    }

    #[test]
    fn test_missing_description() {
        let text = VALID.replace("description = \"THz-TDS deconvolution library\"", "");
        let err = Manifest::parse(&text).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_invalid_version() {
        let text = VALID.replace("version = \"1.0.0\"", "version = \"1.0\"");
        assert!(matches!(
            Manifest::parse(&text).unwrap().validate(),
            Err(DeconvolutionError::Version(_))
        ));
    }

    #[test]
    fn test_invalid_dependency() {
        let text = VALID.replace("ndarray = \"0.16\"", "ndarray = \"latest!\"");
        assert!(Manifest::parse(&text).unwrap().validate().is_err());
        let text = VALID.replace("ndarray = \"0.16\"", "ndarray = { features = [\"rayon\"] }");
        assert!(Manifest::parse(&text).unwrap().validate().is_err());
    }

    #[test]
    fn test_invalid_name() {
        let text = VALID.replace("thz-deconvolution", "THz Deconvolution");
        assert!(Manifest::parse(&text).unwrap().validate().is_err());
    }

    #[test]
    fn test_missing_package_table() {
        let manifest = Manifest::parse("[dependencies]\nndarray = \"0.16\"\n").unwrap();
        assert!(manifest.validate().is_err());
    }
}
