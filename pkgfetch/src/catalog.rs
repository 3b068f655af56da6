//! Product catalog collaborator.
//!
//! The engine never parses vendor catalogs itself. It asks a [`Catalog`] for
//! a [`ProductDescriptor`] (what to download) and for the raw application
//! manifest of each build (which packages exist). [`StaticCatalog`] is a
//! simple JSON-backed implementation:
//!
//! ```json
//! {
//!   "cdn": "https://cdn.example.com",
//!   "products": [
//!     {"id": "PHSP", "version": "25.0", "displayName": "Photoshop",
//!      "platform": "macuniversal", "buildId": "guid-1",
//!      "dependencies": [{"code": "KBRG", "version": "14.0", "buildId": "guid-2"}]}
//!   ],
//!   "manifests": {"guid-1": {"Packages": {"Package": []}}, "guid-2": "<raw json text>"}
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::download::{DownloadError, DownloadResult};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A dependency of a product: another component fetched into the same task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDescriptor {
    pub code: String,
    pub version: String,
    pub build_id: String,
}

/// What the catalog knows about one product version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDescriptor {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub display_name: String,
    pub platform: String,
    pub build_id: String,
    #[serde(default)]
    pub dependencies: Vec<DependencyDescriptor>,
}

impl ProductDescriptor {
    /// Component groups in transfer order: the product itself, then its
    /// dependencies.
    pub fn components(&self) -> Vec<DependencyDescriptor> {
        std::iter::once(DependencyDescriptor {
            code: self.id.clone(),
            version: self.version.clone(),
            build_id: self.build_id.clone(),
        })
        .chain(self.dependencies.iter().cloned())
        .collect()
    }
}

/// Source of product metadata.
///
/// Uses boxed futures so the engine can hold an `Arc<dyn Catalog>`.
pub trait Catalog: Send + Sync {
    /// Look up a product. Without a version, the newest listed version wins.
    fn find_product(&self, id: &str, version: Option<&str>) -> Option<ProductDescriptor>;

    /// Fetch the raw application manifest of a build.
    fn application_info(&self, build_id: &str) -> BoxFuture<'_, DownloadResult<String>>;

    /// CDN base URL that package paths are relative to, if the catalog
    /// dictates one.
    fn cdn_base(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDocument {
    #[serde(default)]
    cdn: Option<String>,
    #[serde(default)]
    products: Vec<ProductDescriptor>,
    #[serde(default)]
    manifests: HashMap<String, Value>,
}

/// In-memory catalog, optionally loaded from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    cdn: Option<String>,
    products: Vec<ProductDescriptor>,
    manifests: HashMap<String, String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog document. Manifests may be given as JSON objects or
    /// as raw strings.
    pub fn from_json(text: &str) -> DownloadResult<Self> {
        let doc: CatalogDocument =
            serde_json::from_str(text).map_err(|e| DownloadError::Catalog(format!("invalid catalog: {}", e)))?;
        let manifests = doc
            .manifests
            .into_iter()
            .map(|(build_id, value)| {
                let raw = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (build_id, raw)
            })
            .collect();
        Ok(Self {
            cdn: doc.cdn,
            products: doc.products,
            manifests,
        })
    }

    /// Load a catalog document from disk.
    pub fn load(path: &Path) -> DownloadResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DownloadError::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn with_cdn(mut self, cdn: impl Into<String>) -> Self {
        self.cdn = Some(cdn.into());
        self
    }

    pub fn add_product(&mut self, product: ProductDescriptor) {
        self.products.push(product);
    }

    pub fn add_manifest(&mut self, build_id: impl Into<String>, manifest: impl Into<String>) {
        self.manifests.insert(build_id.into(), manifest.into());
    }

    pub fn products(&self) -> &[ProductDescriptor] {
        &self.products
    }
}

impl Catalog for StaticCatalog {
    fn find_product(&self, id: &str, version: Option<&str>) -> Option<ProductDescriptor> {
        let mut matches = self
            .products
            .iter()
            .filter(|p| p.id == id && version.map_or(true, |v| p.version == v));
        match version {
            Some(_) => matches.next().cloned(),
            None => matches.max_by(|a, b| compare_versions(&a.version, &b.version)).cloned(),
        }
    }

    fn application_info(&self, build_id: &str) -> BoxFuture<'_, DownloadResult<String>> {
        let found = self
            .manifests
            .get(build_id)
            .cloned()
            .ok_or_else(|| DownloadError::Catalog(format!("no application info for build {}", build_id)));
        Box::pin(async move { found })
    }

    fn cdn_base(&self) -> Option<String> {
        self.cdn.clone()
    }
}

/// Compare dotted version strings numerically, part by part.
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parts = |v: &str| -> Vec<u64> { v.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    parts(a).cmp(&parts(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "cdn": "https://cdn.example.com",
        "products": [
            {"id": "PHSP", "version": "9.1", "platform": "osx10", "buildId": "old"},
            {"id": "PHSP", "version": "25.0", "displayName": "Photoshop", "platform": "macuniversal",
             "buildId": "guid-1", "dependencies": [{"code": "KBRG", "version": "14.0", "buildId": "guid-2"}]}
        ],
        "manifests": {
            "guid-1": {"Packages": {"Package": []}},
            "guid-2": "{\"Packages\": {\"Package\": []}}"
        }
    }"#;

    #[test]
    fn test_find_product_by_version() {
        let catalog = StaticCatalog::from_json(DOC).unwrap();
        let product = catalog.find_product("PHSP", Some("9.1")).unwrap();
        assert_eq!(product.build_id, "old");
        assert!(catalog.find_product("PHSP", Some("1.0")).is_none());
        assert!(catalog.find_product("XXXX", None).is_none());
    }

    #[test]
    fn test_find_product_newest_without_version() {
        let catalog = StaticCatalog::from_json(DOC).unwrap();
        let product = catalog.find_product("PHSP", None).unwrap();
        assert_eq!(product.version, "25.0");
        assert_eq!(product.display_name, "Photoshop");
    }

    #[test]
    fn test_components_start_with_product() {
        let catalog = StaticCatalog::from_json(DOC).unwrap();
        let product = catalog.find_product("PHSP", Some("25.0")).unwrap();
        let codes: Vec<String> = product.components().into_iter().map(|c| c.code).collect();
        assert_eq!(codes, vec!["PHSP", "KBRG"]);
    }

    #[tokio::test]
    async fn test_application_info_object_or_string() {
        let catalog = StaticCatalog::from_json(DOC).unwrap();
        let raw = catalog.application_info("guid-1").await.unwrap();
        assert!(serde_json::from_str::<Value>(&raw).is_ok());
        let raw = catalog.application_info("guid-2").await.unwrap();
        assert!(raw.contains("Packages"));

        let err = catalog.application_info("missing").await.unwrap_err();
        assert!(matches!(err, DownloadError::Catalog(_)));
        assert_eq!(catalog.cdn_base().as_deref(), Some("https://cdn.example.com"));
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(StaticCatalog::from_json("[]"), Err(DownloadError::Catalog(_))));
    }
}
