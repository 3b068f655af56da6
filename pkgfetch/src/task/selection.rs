//! Application manifest parsing and package selection.
//!
//! An application manifest is the JSON document the catalog returns for a
//! build. Only `Packages.Package[]` is read; every entry becomes a
//! [`Package`] whose `is_selected` and `is_required` flags follow the
//! default selection rules below.
//!
//! | Group        | Type     | Selected when                                            |
//! |--------------|----------|----------------------------------------------------------|
//! | main product | core     | no condition, target architecture, or install language    |
//! | main product | non-core | install language                                          |
//! | dependency   | any      | no condition, `[OSVersion]` holds, or install language    |
//!
//! Core packages of the main product that are selected are also required.
//! The language `ALL` selects everything.
//!
//! An entry may carry an `IntegrityManifest` object (`segmentSize`,
//! `lastSegmentSize`, `segments[{segmentNumber, hash}]`); its segments then
//! drive chunking and verification of that package.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::model::{Package, PackageKind};
use crate::download::{DownloadError, DownloadResult};

/// Language value that selects every package.
pub const ALL_LANGUAGES: &str = "ALL";

/// Inputs of the default selection rules.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionContext {
    /// True when parsing the main product rather than a dependency.
    pub is_main_product: bool,
    pub language: String,
    pub apple_silicon: bool,
    /// Host OS version as `major.minor`; `[OSVersion]` conditions never
    /// hold when unknown.
    pub os_version: Option<f64>,
}

impl SelectionContext {
    fn target_architecture(&self) -> &'static str {
        if self.apple_silicon {
            "arm64"
        } else {
            "x64"
        }
    }

    fn install_language(&self) -> String {
        format!("[installLanguage]=={}", self.language)
    }

    fn selects_all(&self) -> bool {
        self.language == ALL_LANGUAGES
    }

    /// Returns `(selected, required)` for a package.
    fn evaluate(&self, kind: PackageKind, condition: &str) -> (bool, bool) {
        let language_match = condition.contains(&self.install_language()) || self.selects_all();
        if self.is_main_product {
            match kind {
                PackageKind::Core => {
                    let arch = format!("[OSArchitecture]=={}", self.target_architecture());
                    let selected = condition.is_empty() || condition.contains(&arch) || language_match;
                    (selected, selected)
                }
                PackageKind::NonCore => (language_match, false),
            }
        } else {
            let os_match = condition.contains("[OSVersion]")
                && self
                    .os_version
                    .is_some_and(|current| os_version_condition_holds(condition, current));
            (condition.is_empty() || os_match || language_match, false)
        }
    }
}

fn os_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[OSVersion\](>=|<=|<|>|==)([\d.]+)").expect("valid OSVersion pattern"))
}

/// Returns true if every `[OSVersion]` comparison in `condition` holds for
/// `current`. A condition without any comparison never holds.
pub fn os_version_condition_holds(condition: &str, current: f64) -> bool {
    let mut matched = false;
    for caps in os_version_pattern().captures_iter(condition) {
        let Ok(required) = caps[2].parse::<f64>() else {
            continue;
        };
        matched = true;
        let holds = match &caps[1] {
            ">=" => current >= required,
            "<=" => current <= required,
            ">" => current > required,
            "<" => current < required,
            "==" => current == required,
            _ => false,
        };
        if !holds {
            return false;
        }
    }
    matched
}

fn string_field<'a>(entry: &'a Value, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn download_size(entry: &Value) -> u64 {
    match entry.get("DownloadSize") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Parse an application manifest into packages with default selection
/// flags applied.
///
/// Entries without a `Path` or without any name are skipped. The name falls
/// back to `<PackageName>.zip` when `fullPackageName` is absent.
pub fn parse_application_manifest(text: &str, context: &SelectionContext) -> DownloadResult<Vec<Package>> {
    let root: Value = serde_json::from_str(text)?;
    let entries = root
        .get("Packages")
        .and_then(|p| p.get("Package"))
        .and_then(Value::as_array)
        .ok_or_else(|| DownloadError::InvalidData("application manifest has no Packages.Package list".into()))?;

    let mut packages = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(path) = string_field(entry, "Path") else {
            continue;
        };
        let name = match (string_field(entry, "fullPackageName"), string_field(entry, "PackageName")) {
            (Some(full), _) => full.to_string(),
            (None, Some(short)) => format!("{}.zip", short),
            (None, None) => continue,
        };
        let kind = PackageKind::from_manifest(string_field(entry, "Type").unwrap_or("non-core"));
        let condition = string_field(entry, "Condition").unwrap_or_default().to_string();
        let (selected, required) = context.evaluate(kind, &condition);

        let mut package = Package::new(kind, name, download_size(entry), path);
        package.package_version = string_field(entry, "PackageVersion").unwrap_or_default().to_string();
        package.condition = condition;
        package.is_selected = selected;
        package.is_required = required;
        package.integrity = entry
            .get("IntegrityManifest")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?;
        packages.push(package);
    }
    Ok(packages)
}

/// Keep the packages that will be downloaded.
///
/// With no explicit request the default selection is kept. Otherwise only
/// the named packages are kept, plus every required package.
pub fn select_packages(packages: Vec<Package>, requested: &[String]) -> Vec<Package> {
    packages
        .into_iter()
        .filter_map(|mut package| {
            let keep = if requested.is_empty() {
                package.is_selected
            } else {
                package.is_required || requested.iter().any(|r| r == &package.full_package_name)
            };
            keep.then(|| {
                package.is_selected = true;
                package
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "Packages": {
            "Package": [
                {"PackageName": "Core", "Type": "core", "Path": "/p/Core.zip", "DownloadSize": 1000},
                {"fullPackageName": "Arm.zip", "Type": "core", "Path": "/p/Arm.zip",
                 "DownloadSize": "2000", "Condition": "[OSArchitecture]==arm64"},
                {"fullPackageName": "Intel.zip", "Type": "core", "Path": "/p/Intel.zip",
                 "DownloadSize": 3000, "Condition": "[OSArchitecture]==x64"},
                {"fullPackageName": "de_DE.zip", "Type": "non-core", "Path": "/p/de.zip",
                 "DownloadSize": 10, "Condition": "[installLanguage]==de_DE"},
                {"fullPackageName": "en_US.zip", "Path": "/p/en.zip",
                 "DownloadSize": 10, "Condition": "[installLanguage]==en_US", "PackageVersion": "1.2"},
                {"fullPackageName": "NoPath.zip", "Type": "core", "DownloadSize": 10}
            ]
        }
    }"#;

    fn main_context(language: &str) -> SelectionContext {
        SelectionContext {
            is_main_product: true,
            language: language.to_string(),
            apple_silicon: true,
            os_version: Some(14.2),
        }
    }

    fn selected_names(packages: &[Package]) -> Vec<&str> {
        packages
            .iter()
            .filter(|p| p.is_selected)
            .map(|p| p.full_package_name.as_str())
            .collect()
    }

    #[test]
    fn test_parse_fields() {
        let packages = parse_application_manifest(MANIFEST, &main_context("en_US")).unwrap();
        assert_eq!(packages.len(), 5, "entries without a path are skipped");
        assert_eq!(packages[0].full_package_name, "Core.zip");
        assert_eq!(packages[0].kind, PackageKind::Core);
        assert_eq!(packages[1].download_size, 2000);
        assert_eq!(packages[4].kind, PackageKind::NonCore);
        assert_eq!(packages[4].package_version, "1.2");
        assert!(packages.iter().all(|p| p.integrity.is_none()));
    }

    #[test]
    fn test_parse_integrity_manifest() {
        let manifest = r#"{"Packages": {"Package": [
            {"fullPackageName": "Core.zip", "Type": "core", "Path": "/a", "DownloadSize": 15,
             "IntegrityManifest": {"segmentSize": 10, "lastSegmentSize": 5, "segments": [
                {"segmentNumber": 1, "hash": "aa"}, {"segmentNumber": 2, "hash": "bb"}]}}
        ]}}"#;
        let packages = parse_application_manifest(manifest, &main_context("en_US")).unwrap();
        let integrity = packages[0].integrity.as_ref().unwrap();
        assert_eq!(integrity.total_size(), 15);
        assert_eq!(integrity.segments[1].hash, "bb");
    }

    #[test]
    fn test_main_product_rules() {
        let packages = parse_application_manifest(MANIFEST, &main_context("en_US")).unwrap();
        assert_eq!(selected_names(&packages), vec!["Core.zip", "Arm.zip", "en_US.zip"]);
        assert!(packages[0].is_required);
        assert!(packages[1].is_required);
        assert!(!packages[2].is_required);
        assert!(!packages[4].is_required, "non-core packages are never required");
    }

    #[test]
    fn test_intel_selects_x64() {
        let mut context = main_context("de_DE");
        context.apple_silicon = false;
        let packages = parse_application_manifest(MANIFEST, &context).unwrap();
        assert_eq!(selected_names(&packages), vec!["Core.zip", "Intel.zip", "de_DE.zip"]);
    }

    #[test]
    fn test_all_languages_selects_everything() {
        let packages = parse_application_manifest(MANIFEST, &main_context(ALL_LANGUAGES)).unwrap();
        assert!(packages.iter().all(|p| p.is_selected));
    }

    #[test]
    fn test_dependency_rules() {
        let manifest = r#"{"Packages": {"Package": [
            {"fullPackageName": "Plain.zip", "Path": "/a"},
            {"fullPackageName": "New.zip", "Path": "/b", "Condition": "[OSVersion]>=13.0"},
            {"fullPackageName": "Old.zip", "Path": "/c", "Condition": "[OSVersion]<12.0"},
            {"fullPackageName": "Arch.zip", "Path": "/d", "Condition": "[OSArchitecture]==arm64"}
        ]}}"#;
        let context = SelectionContext {
            is_main_product: false,
            ..main_context("en_US")
        };
        let packages = parse_application_manifest(manifest, &context).unwrap();
        assert_eq!(selected_names(&packages), vec!["Plain.zip", "New.zip"]);

        let unknown_os = SelectionContext {
            os_version: None,
            ..context
        };
        let packages = parse_application_manifest(manifest, &unknown_os).unwrap();
        assert_eq!(selected_names(&packages), vec!["Plain.zip"]);
    }

    #[test]
    fn test_os_version_conditions() {
        assert!(os_version_condition_holds("[OSVersion]>=10.15", 14.0));
        assert!(os_version_condition_holds("[OSVersion]>=11.0 && [OSVersion]<15.0", 14.0));
        assert!(!os_version_condition_holds("[OSVersion]>=11.0 && [OSVersion]<15.0", 15.1));
        assert!(os_version_condition_holds("[OSVersion]==14.0", 14.0));
        assert!(!os_version_condition_holds("[installLanguage]==en_US", 14.0));
    }

    #[test]
    fn test_explicit_subset_keeps_required() {
        let packages = parse_application_manifest(MANIFEST, &main_context("en_US")).unwrap();
        let kept = select_packages(packages, &["de_DE.zip".to_string()]);
        let names: Vec<&str> = kept.iter().map(|p| p.full_package_name.as_str()).collect();
        assert_eq!(names, vec!["Core.zip", "Arm.zip", "de_DE.zip"]);
        assert!(kept.iter().all(|p| p.is_selected));
    }

    #[test]
    fn test_default_subset_is_selection() {
        let packages = parse_application_manifest(MANIFEST, &main_context("en_US")).unwrap();
        assert_eq!(select_packages(packages, &[]).len(), 3);
    }

    #[test]
    fn test_missing_package_list_is_invalid() {
        let err = parse_application_manifest(r#"{"Name": "x"}"#, &main_context("en_US")).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidData(_)));
        let err = parse_application_manifest("not json", &main_context("en_US")).unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
    }
}
