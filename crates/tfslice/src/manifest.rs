//! resolved module reference index
//!
//! `terraform init` records where it installed each nested module in
//! `.terraform/modules/modules.json`:
//!
//! ```json
//! {"Modules": [
//!   {"Key": "", "Source": "", "Dir": "."},
//!   {"Key": "net", "Source": "./modules/net", "Dir": "modules/net"},
//!   {"Key": "net.subnets", "Source": "registry.terraform.io/acme/subnets/aws", "Version": "1.2.0", "Dir": ".terraform/modules/net.subnets"}
//! ]}
//! ```
//!
//! Keys are the call names joined with `.` from the root module down. `Dir` is relative to
//! the root module directory.
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MANIFEST_PATH: &str = ".terraform/modules/modules.json";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestEntry {
    pub key: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub version: Option<String>,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ModuleManifest {
    #[serde(rename = "Modules", default)]
    entries: Vec<ManifestEntry>,
}

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("Unable to read module manifest {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to parse module manifest {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ModuleManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        tracing::info!(path=%path.display(), "loading module manifest");
        let contents = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_owned(),
            source,
        })?;

        contents.parse().map_err(|source| ManifestError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Loads `<root_dir>/.terraform/modules/modules.json` when it exists
    pub fn discover(root_dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = root_dir.join(DEFAULT_MANIFEST_PATH);
        if !path.is_file() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Directory of the module installed for `key`, relative to the root module
    ///
    /// The recorded source must match. Versions are compared when both sides have one.
    pub fn resolve(&self, key: &str, source: &str, version: Option<&str>) -> Option<&Path> {
        let entry = self.entries.iter().find(|entry| entry.key == key)?;

        if entry.source != source {
            tracing::debug!(key, recorded=%entry.source, requested=source, "manifest source mismatch");
            return None;
        }

        if let (Some(recorded), Some(requested)) = (entry.version.as_deref(), version) {
            if recorded != requested && !requested.contains(|c: char| "<>=~!, ".contains(c)) {
                tracing::debug!(key, recorded, requested, "manifest version mismatch");
                return None;
            }
        }

        Some(&entry.dir)
    }
}

impl std::str::FromStr for ModuleManifest {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// Manifest key of call `name` inside the module with key `parent_key`
pub fn child_key(parent_key: &str, name: &str) -> String {
    if parent_key.is_empty() {
        name.to_string()
    } else {
        format!("{parent_key}.{name}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"{"Modules":[
        {"Key":"","Source":"","Dir":"."},
        {"Key":"net","Source":"./modules/net","Dir":"modules/net"},
        {"Key":"net.subnets","Source":"acme/subnets/aws","Version":"1.2.0","Dir":".terraform/modules/net.subnets"}
    ]}"#;

    #[test]
    fn resolves_keys() {
        let manifest: ModuleManifest = MANIFEST.parse().unwrap();
        assert_eq!(manifest.entries().len(), 3);

        assert_eq!(
            manifest.resolve("net", "./modules/net", None),
            Some(Path::new("modules/net"))
        );
        assert_eq!(
            manifest.resolve("net.subnets", "acme/subnets/aws", Some("1.2.0")),
            Some(Path::new(".terraform/modules/net.subnets"))
        );
        assert_eq!(
            manifest.resolve("net.subnets", "acme/subnets/aws", Some("~> 1.2")),
            Some(Path::new(".terraform/modules/net.subnets"))
        );
    }

    #[test]
    fn rejects_mismatches() {
        let manifest: ModuleManifest = MANIFEST.parse().unwrap();
        assert_eq!(manifest.resolve("net", "./other", None), None);
        assert_eq!(manifest.resolve("net.subnets", "acme/subnets/aws", Some("2.0.0")), None);
        assert_eq!(manifest.resolve("missing", "./missing", None), None);
    }

    #[test]
    fn child_keys() {
        assert_eq!(child_key("", "net"), "net");
        assert_eq!(child_key("net", "subnets"), "net.subnets");
    }

    #[test]
    fn load_errors_name_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.json");
        std::fs::write(&path, r#"{"Modules": [{"Key": "net""#).unwrap();

        let err = ModuleManifest::load(&path).unwrap_err();
        assert!(matches!(&err, ManifestError::Parse { path: p, .. } if p == &path));
        assert_eq!(err.to_string(), format!("Unable to parse module manifest {}", path.display()));

        let missing = ModuleManifest::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ManifestError::Io { .. }));

        assert_eq!(ModuleManifest::discover(dir.path()).unwrap(), None);
    }
}
