use std::collections::BTreeMap;

use serde::Serialize;

use crate::wire::{Version, NAMESPACE, NAMESPACE_0_2};

/// Name of the extended service discovery field carrying the size limit.
pub const MAX_FILE_SIZE_FIELD: &str = "max-file-size";

/// An upload endpoint found through service discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadService {
    address: String,
    version: Version,
    max_file_size: Option<u64>,
}

impl UploadService {
    pub fn new(address: impl Into<String>, version: Version, max_file_size: Option<u64>) -> Self {
        Self {
            address: address.into(),
            version,
            max_file_size,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }

    pub fn has_max_file_size_limit(&self) -> bool {
        self.max_file_size.is_some()
    }

    pub fn accepts_file_of_size(&self, size: u64) -> bool {
        match self.max_file_size {
            Some(max) => size <= max,
            None => true,
        }
    }
}

/// Result of a feature query against one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoInfo {
    pub address: String,
    pub features: Vec<String>,
    /// Extended information forms keyed by their `FORM_TYPE`.
    pub forms: BTreeMap<String, BTreeMap<String, String>>,
}

impl DiscoInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    pub fn with_form_field(
        mut self,
        form_type: impl Into<String>,
        var: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.forms
            .entry(form_type.into())
            .or_default()
            .insert(var.into(), value.into());
        self
    }

    pub fn contains_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }

    pub fn supports_upload(&self) -> bool {
        self.contains_feature(NAMESPACE) || self.contains_feature(NAMESPACE_0_2)
    }

    /// Builds the service descriptor, preferring the current protocol when an
    /// entity advertises both namespaces.
    pub fn upload_service(&self) -> Option<UploadService> {
        let version = if self.contains_feature(NAMESPACE) {
            Version::V0_3
        } else if self.contains_feature(NAMESPACE_0_2) {
            Version::V0_2
        } else {
            return None;
        };
        let max_file_size = self
            .forms
            .get(version.namespace())
            .and_then(|fields| fields.get(MAX_FILE_SIZE_FIELD))
            .and_then(|v| v.trim().parse().ok());
        Some(UploadService::new(&self.address, version, max_file_size))
    }
}
