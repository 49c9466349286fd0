//! Package identity and the per-ecosystem analysis lifecycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named stage of a package's usage lifecycle, analysed separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Install,
    Import,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Install => "install",
            RunPhase::Import => "import",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown ecosystem: {0}")]
pub struct UnknownEcosystem(pub String);

/// Package registries supported by the sandbox images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ecosystem {
    #[serde(rename = "npm")]
    Npm,
    #[serde(rename = "pypi")]
    PyPi,
    #[serde(rename = "rubygems")]
    RubyGems,
    #[serde(rename = "crates.io")]
    CratesIo,
    #[serde(rename = "packagist")]
    Packagist,
}

const INSTALL_AND_IMPORT: &[RunPhase] = &[RunPhase::Install, RunPhase::Import];
const INSTALL_ONLY: &[RunPhase] = &[RunPhase::Install];

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "npm",
            Ecosystem::PyPi => "pypi",
            Ecosystem::RubyGems => "rubygems",
            Ecosystem::CratesIo => "crates.io",
            Ecosystem::Packagist => "packagist",
        }
    }

    /// Phases in execution order. Importing an uninstalled package is
    /// meaningless, so install always comes first.
    pub fn run_phases(&self) -> &'static [RunPhase] {
        match self {
            Ecosystem::CratesIo => INSTALL_ONLY,
            _ => INSTALL_AND_IMPORT,
        }
    }

    /// Default sandbox image carrying the ecosystem's toolchain and entry script.
    pub fn sandbox_image(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "localhost/package-analysis/dynamic-node:latest",
            Ecosystem::PyPi => "localhost/package-analysis/dynamic-python:latest",
            Ecosystem::RubyGems => "localhost/package-analysis/dynamic-ruby:latest",
            Ecosystem::CratesIo => "localhost/package-analysis/dynamic-rust:latest",
            Ecosystem::Packagist => "localhost/package-analysis/dynamic-php:latest",
        }
    }

    /// Entry script inside the sandbox image that drives a single phase.
    pub fn entry_script(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "analyze-node.js",
            Ecosystem::PyPi => "analyze-python.py",
            Ecosystem::RubyGems => "analyze-ruby.rb",
            Ecosystem::CratesIo => "analyze-rust.py",
            Ecosystem::Packagist => "analyze-php.php",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ecosystem {
    type Err = UnknownEcosystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npm" => Ok(Ecosystem::Npm),
            "pypi" => Ok(Ecosystem::PyPi),
            "rubygems" => Ok(Ecosystem::RubyGems),
            "crates.io" | "cratesio" | "crates" => Ok(Ecosystem::CratesIo),
            "packagist" => Ok(Ecosystem::Packagist),
            other => Err(UnknownEcosystem(other.to_string())),
        }
    }
}

/// A package to analyse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: Option<String>,
    /// Path of a local archive, as seen from inside the sandbox.
    pub local_path: Option<String>,
}

impl Package {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            version: None,
            local_path: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn run_phases(&self) -> &'static [RunPhase] {
        self.ecosystem.run_phases()
    }

    /// Command line executed inside the sandbox for `phase`.
    ///
    /// A local archive takes precedence over a registry version.
    pub fn command(&self, phase: RunPhase) -> Vec<String> {
        let mut argv = vec![
            self.ecosystem.entry_script().to_string(),
            "--phase".to_string(),
            phase.as_str().to_string(),
        ];

        if let Some(path) = &self.local_path {
            argv.push("--local-file".to_string());
            argv.push(path.clone());
        } else if let Some(version) = &self.version {
            argv.push("--version".to_string());
            argv.push(version.clone());
        }

        argv.push(self.name.clone());
        argv
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}/{}@{}", self.ecosystem, self.name, version),
            None => write!(f, "{}/{}", self.ecosystem, self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_install_precedes_import() {
        assert_eq!(Ecosystem::Npm.run_phases(), &[RunPhase::Install, RunPhase::Import]);
        assert_eq!(Ecosystem::PyPi.run_phases()[0], RunPhase::Install);
        assert_eq!(Ecosystem::CratesIo.run_phases(), &[RunPhase::Install]);
    }

    #[test]
    fn test_command_with_version() {
        let pkg = Package::new(Ecosystem::Npm, "left-pad").with_version("1.3.0");
        assert_eq!(
            pkg.command(RunPhase::Import),
            vec!["analyze-node.js", "--phase", "import", "--version", "1.3.0", "left-pad"]
        );
    }

    #[test]
    fn test_local_file_overrides_version() {
        let pkg = Package::new(Ecosystem::PyPi, "requests")
            .with_version("2.31.0")
            .with_local_path("/local/requests-2.31.0.tar.gz");
        let argv = pkg.command(RunPhase::Install);
        assert!(argv.contains(&"--local-file".to_string()));
        assert!(!argv.contains(&"--version".to_string()));
        assert_eq!(argv.last().map(String::as_str), Some("requests"));
    }

    #[test]
    fn test_ecosystem_round_trip_names() {
        assert_eq!("crates.io".parse::<Ecosystem>().unwrap(), Ecosystem::CratesIo);
        assert_eq!("PyPI".parse::<Ecosystem>().unwrap(), Ecosystem::PyPi);
        assert!("maven".parse::<Ecosystem>().is_err());
        assert_eq!(
            serde_json::to_string(&Ecosystem::CratesIo).unwrap(),
            "\"crates.io\""
        );
    }

    #[test]
    fn test_display() {
        let pkg = Package::new(Ecosystem::RubyGems, "rails").with_version("7.1.0");
        assert_eq!(pkg.to_string(), "rubygems/rails@7.1.0");
    }
}
