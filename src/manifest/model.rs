//! Manifest parsing
//!
//! A manifest is a JSON document listing every module of one application
//! version, keyed by module id in declaration order:
//!
//! ```json
//! {
//!   "modules": {
//!     "alpha": { "url": "alpha.bin", "sha256": "…", "dependsOnIds": [] },
//!     "bravo": { "url": "bravo.bin", "sha256": "…", "dependsOnIds": ["alpha"] }
//!   }
//! }
//! ```

use crate::error::{ShiploadError, ShiploadResult};
use crate::manifest::digest::Digest;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// Well-known file name of a manifest persisted next to its modules
pub const PREBUILT_MANIFEST_FILE_NAME: &str = "manifest.json";

/// File name of an application-specific manifest in an embedded directory
pub fn application_manifest_file_name(application: &str) -> String {
    format!("{}.manifest.json", application)
}

/// A single unit of code content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Where to download the module, absolute or relative to the manifest
    pub url: String,

    /// Digest of the module bytes
    pub sha256: Digest,

    /// Ids of modules that must be loaded first
    #[serde(default)]
    pub depends_on_ids: Vec<String>,

    /// Id or digest of a prior version a delta applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_from: Option<String>,

    /// Location of the delta against `patch_from`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_url: Option<String>,
}

impl Module {
    pub fn new(url: impl Into<String>, sha256: Digest) -> Self {
        Self {
            url: url.into(),
            sha256,
            depends_on_ids: Vec::new(),
            patch_from: None,
            patch_url: None,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on_ids = ids.into_iter().map(Into::into).collect();
        self
    }
}

/// A versioned set of modules and their dependency edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    modules: IndexMap<String, Module>,
}

impl Manifest {
    pub fn new(modules: IndexMap<String, Module>) -> Self {
        Self { modules }
    }

    /// Append a module, keeping declaration order
    pub fn with_module(mut self, id: impl Into<String>, module: Module) -> Self {
        self.modules.insert(id.into(), module);
        self
    }

    /// Parse a manifest from JSON bytes
    pub fn parse(bytes: &[u8]) -> ShiploadResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| ShiploadError::ManifestParse(e.to_string()))
    }

    /// Serialize to the JSON wire format
    pub fn to_json(&self) -> ShiploadResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Modules in declaration order
    pub fn modules(&self) -> impl Iterator<Item = (&str, &Module)> {
        self.modules.iter().map(|(id, module)| (id.as_str(), module))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Position of a module in declaration order
    pub(crate) fn index_of(&self, id: &str) -> Option<usize> {
        self.modules.get_index_of(id)
    }

    /// Resolve relative module and patch URLs against the manifest's own URL.
    ///
    /// Absolute URLs are kept. A base that is not itself a URL (for example
    /// a bare host name) leaves the manifest untouched.
    pub fn resolve_urls(mut self, manifest_url: &str) -> Self {
        let Ok(base) = Url::parse(manifest_url) else {
            return self;
        };
        for module in self.modules.values_mut() {
            module.url = join_url(&base, &module.url);
            if let Some(patch_url) = module.patch_url.as_mut() {
                *patch_url = join_url(&base, patch_url);
            }
        }
        self
    }
}

fn join_url(base: &Url, reference: &str) -> String {
    match Url::parse(reference) {
        Ok(_) => reference.to_string(),
        Err(_) => base
            .join(reference)
            .map(String::from)
            .unwrap_or_else(|_| reference.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(seed: &str) -> Digest {
        Digest::of(seed.as_bytes())
    }

    #[test]
    fn parse_preserves_declaration_order() {
        let json = format!(
            r#"{{"modules":{{
                "zulu":{{"url":"zulu.bin","sha256":"{z}"}},
                "alpha":{{"url":"alpha.bin","sha256":"{a}","dependsOnIds":["zulu"]}}
            }}}}"#,
            z = digest("zulu"),
            a = digest("alpha"),
        );
        let manifest = Manifest::parse(json.as_bytes()).unwrap();
        let ids: Vec<&str> = manifest.modules().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["zulu", "alpha"]);
        assert_eq!(manifest.get("alpha").unwrap().depends_on_ids, vec!["zulu"]);
        assert_eq!(manifest.get("zulu").unwrap().patch_from, None);
    }

    #[test]
    fn json_round_trip_is_stable() {
        let manifest = Manifest::default()
            .with_module("alpha", Module::new("alpha.bin", digest("alpha")))
            .with_module(
                "bravo",
                Module::new("bravo.bin", digest("bravo")).depends_on(["alpha"]),
            );
        let json = manifest.to_json().unwrap();
        assert!(json.contains("dependsOnIds"));
        assert!(!json.contains("patchUrl"));
        assert_eq!(Manifest::parse(json.as_bytes()).unwrap(), manifest);
    }

    #[test]
    fn parse_rejects_bad_digest() {
        let json = r#"{"modules":{"a":{"url":"a.bin","sha256":"nothex"}}}"#;
        let err = Manifest::parse(json.as_bytes()).unwrap_err();
        assert!(matches!(err, ShiploadError::ManifestParse(_)));
    }

    #[test]
    fn resolves_relative_urls() {
        let manifest = Manifest::default()
            .with_module("alpha", Module::new("alpha.bin", digest("alpha")))
            .with_module(
                "bravo",
                Module::new("https://cdn.example.com/bravo.bin", digest("bravo")),
            )
            .resolve_urls("https://example.com/app/manifest.json");

        assert_eq!(
            manifest.get("alpha").unwrap().url,
            "https://example.com/app/alpha.bin"
        );
        assert_eq!(
            manifest.get("bravo").unwrap().url,
            "https://cdn.example.com/bravo.bin"
        );
    }

    #[test]
    fn non_url_base_leaves_manifest_untouched() {
        let manifest = Manifest::default()
            .with_module("alpha", Module::new("alpha.bin", digest("alpha")))
            .resolve_urls("test.example.app");
        assert_eq!(manifest.get("alpha").unwrap().url, "alpha.bin");
    }

    #[test]
    fn application_manifest_name() {
        assert_eq!(application_manifest_file_name("red"), "red.manifest.json");
    }
}
