//! Experiment configuration construction
//!
//! Pure value construction: checkpoint-storage fragments, deep merge of
//! config documents, fingerprinting for idempotent submission, and loading
//! documents from YAML or JSON files. The schema itself is owned by the
//! experiment service; this module only assembles documents to pass through.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::Path;

/// A JSON-compatible experiment configuration document.
pub type ConfigDocument = Value;

/// Credentials for S3-backed checkpoint storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

/// Where the service persists trial checkpoints.
///
/// An S3 configuration without credentials is structurally valid; the
/// experiment will only fail once storage access is attempted at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckpointStorage {
    SharedFs {
        host_path: String,
    },
    S3 {
        bucket: String,
        #[serde(flatten)]
        credentials: Option<S3Credentials>,
    },
}

impl CheckpointStorage {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckpointStorage::SharedFs { .. } => "shared_fs",
            CheckpointStorage::S3 { .. } => "s3",
        }
    }
}

/// Checkpoint storage on a filesystem shared between trial containers.
pub fn shared_fs_checkpoint_config(host_path: &str) -> CheckpointStorage {
    CheckpointStorage::SharedFs {
        host_path: host_path.to_string(),
    }
}

/// S3-backed checkpoint storage with explicit credentials.
pub fn s3_checkpoint_config(bucket: &str, credentials: S3Credentials) -> CheckpointStorage {
    CheckpointStorage::S3 {
        bucket: bucket.to_string(),
        credentials: Some(credentials),
    }
}

/// S3-backed checkpoint storage relying on ambient credentials.
///
/// Deliberately credential-less: failure tests use this to drive an
/// experiment into the ERROR state when no ambient credentials exist.
pub fn s3_checkpoint_config_no_creds(bucket: &str) -> CheckpointStorage {
    CheckpointStorage::S3 {
        bucket: bucket.to_string(),
        credentials: None,
    }
}

/// A host directory exposed inside trial containers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Bind mount exposing the root user's home directory inside trial
/// containers, for scenarios that stage files through the home directory.
pub fn root_user_home_bind_mount() -> BindMount {
    BindMount {
        host_path: "/root".to_string(),
        container_path: "/root".to_string(),
        read_only: false,
    }
}

/// Return `base` with its `bind_mounts` section replaced.
pub fn with_bind_mounts(base: &ConfigDocument, mounts: &[BindMount]) -> Result<ConfigDocument> {
    let fragment = serde_json::to_value(mounts).context("Failed to serialize bind mounts")?;
    Ok(build_experiment_config(
        base,
        &json!({ "bind_mounts": fragment }),
    ))
}

/// Merge `overrides` into `base`, recursing into objects.
///
/// Non-object values in `overrides` replace the corresponding `base` value
/// wholesale, including arrays.
pub fn build_experiment_config(base: &ConfigDocument, overrides: &ConfigDocument) -> ConfigDocument {
    match (base, overrides) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in override_map {
                match merged.get(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        let combined = build_experiment_config(existing, value);
                        merged.insert(key.clone(), combined);
                    }
                    _ => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        _ => overrides.clone(),
    }
}

/// Return `base` with its `checkpoint_storage` section replaced.
pub fn with_checkpoint_storage(
    base: &ConfigDocument,
    storage: &CheckpointStorage,
) -> Result<ConfigDocument> {
    let fragment = serde_json::to_value(storage).context("Failed to serialize checkpoint storage")?;
    Ok(build_experiment_config(
        base,
        &json!({ "checkpoint_storage": fragment }),
    ))
}

/// Stable fingerprint of a config document, used to detect equivalent
/// experiments across idempotent test runs.
///
/// serde_json orders object keys, so serialization is canonical for
/// structurally equal documents.
pub fn config_fingerprint(config: &ConfigDocument) -> String {
    let canonical = config.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

/// Load a config document from a YAML or JSON file, by extension.
pub fn load_config_file(path: &Path) -> Result<ConfigDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON config: {}", path.display()))
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Invalid YAML config: {}", path.display()))
    }
}
