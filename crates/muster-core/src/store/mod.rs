//! Typed document storage over plain JSON files.
//!
//! Every mutable record in a workspace (claims, assignments, agent
//! manifests, plans) is a single JSON document named after its identifier.
//! This module owns the read and write discipline for those documents:
//!
//! - Reads are bounded: a document larger than [`MAX_DOCUMENT_SIZE`] is
//!   rejected instead of being buffered.
//! - Reads refuse symlinks and directories.
//! - Writes are atomic: content goes to a hidden temp file in the target
//!   directory, then a rename moves it into place.
//! - Writes serialize through a [`serde_json::Value`] so object keys come
//!   out sorted and repeated writes of equal content are byte-identical.
//!
//! There is no file locking. Two processes writing the same document race,
//! and the rename means the last writer wins with no torn reads.

mod error;

pub use error::StoreError;

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::agent::AgentManifest;
use crate::claim::{Assignment, Claim};
use crate::config::Workspace;
use crate::plan::Plan;

/// Maximum accepted size for a single JSON document, in bytes.
pub const MAX_DOCUMENT_SIZE: u64 = 256 * 1024;

/// Checks that an identifier is safe to embed in a file name.
///
/// Identifiers name documents directly (`claims/<task_id>.json`), so
/// anything that could traverse out of the record directory is refused.
pub fn validate_id(id: &str) -> Result<(), StoreError> {
    let reason = if id.is_empty() {
        Some("must not be empty")
    } else if id.len() > 128 {
        Some("must be at most 128 bytes")
    } else if id.starts_with('.') {
        Some("must not start with a dot")
    } else if id.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        Some("must not contain path separators or control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidId {
            id: id.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Reads and deserializes a JSON document.
///
/// Returns `Ok(None)` when the file does not exist. Oversize documents,
/// non-regular files, and schema mismatches are errors.
pub fn read_json_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        },
    };
    if !meta.is_file() {
        return Err(StoreError::NotAFile {
            path: path.to_path_buf(),
        });
    }

    let file = std::fs::File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = Vec::new();
    file.take(MAX_DOCUMENT_SIZE + 1)
        .read_to_end(&mut buf)
        .map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if buf.len() as u64 > MAX_DOCUMENT_SIZE {
        return Err(StoreError::Oversize {
            path: path.to_path_buf(),
            limit: MAX_DOCUMENT_SIZE,
        });
    }

    let value = serde_json::from_slice(&buf).map_err(|source| StoreError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// Serializes a document and writes it atomically.
///
/// The value is converted to a [`serde_json::Value`] first so that object
/// keys serialize in sorted order.
pub fn write_json_document<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|source| StoreError::Serialize { source })?;
    let mut bytes =
        serde_json::to_vec_pretty(&value).map_err(|source| StoreError::Serialize { source })?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Writes bytes to `path` via a temp file and rename in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
        path: parent.to_path_buf(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let tmp_path = parent.join(format!(".{file_name}.tmp"));
    std::fs::write(&tmp_path, bytes).map_err(|source| StoreError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp_path);
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Typed access to the record directories of one workspace.
#[derive(Debug, Clone)]
pub struct RecordStore {
    claims_dir: PathBuf,
    assignments_dir: PathBuf,
    manifests_dir: PathBuf,
    plans_dir: PathBuf,
}

impl RecordStore {
    /// Builds a store over the record directories of `workspace`.
    #[must_use]
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            claims_dir: workspace.claims_dir(),
            assignments_dir: workspace.assignments_dir(),
            manifests_dir: workspace.manifests_dir(),
            plans_dir: workspace.plans_dir(),
        }
    }

    /// Path of the claim document for `task_id`.
    pub fn claim_path(&self, task_id: &str) -> Result<PathBuf, StoreError> {
        validate_id(task_id)?;
        Ok(self.claims_dir.join(format!("{task_id}.json")))
    }

    /// Loads the claim for `task_id`, if one has been recorded.
    pub fn load_claim(&self, task_id: &str) -> Result<Option<Claim>, StoreError> {
        read_json_document(&self.claim_path(task_id)?)
    }

    /// Persists a claim document.
    pub fn save_claim(&self, claim: &Claim) -> Result<PathBuf, StoreError> {
        let path = self.claim_path(&claim.task_id)?;
        write_json_document(&path, claim)?;
        Ok(path)
    }

    /// Lists every recorded claim, ordered by task id.
    pub fn list_claims(&self) -> Result<Vec<Claim>, StoreError> {
        let mut claims: Vec<Claim> = self.list_documents(&self.claims_dir)?;
        claims.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(claims)
    }

    /// Loads the assignment for `task_id`, if one has been recorded.
    pub fn load_assignment(&self, task_id: &str) -> Result<Option<Assignment>, StoreError> {
        validate_id(task_id)?;
        read_json_document(&self.assignments_dir.join(format!("{task_id}.json")))
    }

    /// Persists an assignment document.
    pub fn save_assignment(&self, assignment: &Assignment) -> Result<PathBuf, StoreError> {
        validate_id(&assignment.task_id)?;
        let path = self.assignments_dir.join(format!("{}.json", assignment.task_id));
        write_json_document(&path, assignment)?;
        Ok(path)
    }

    /// Lists every recorded assignment, ordered by task id.
    pub fn list_assignments(&self) -> Result<Vec<Assignment>, StoreError> {
        let mut assignments: Vec<Assignment> = self.list_documents(&self.assignments_dir)?;
        assignments.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(assignments)
    }

    /// Loads the manifest for `agent_id`, if one has been recorded.
    pub fn load_manifest(&self, agent_id: &str) -> Result<Option<AgentManifest>, StoreError> {
        validate_id(agent_id)?;
        read_json_document(&self.manifests_dir.join(format!("{agent_id}.json")))
    }

    /// Persists an agent manifest.
    pub fn save_manifest(&self, manifest: &AgentManifest) -> Result<PathBuf, StoreError> {
        validate_id(&manifest.agent_id)?;
        let path = self.manifests_dir.join(format!("{}.json", manifest.agent_id));
        write_json_document(&path, manifest)?;
        Ok(path)
    }

    /// Lists every agent manifest, ordered by agent id.
    pub fn list_manifests(&self) -> Result<Vec<AgentManifest>, StoreError> {
        let mut manifests: Vec<AgentManifest> = self.list_documents(&self.manifests_dir)?;
        manifests.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(manifests)
    }

    /// Loads the plan for `plan_id`, if one has been recorded.
    pub fn load_plan(&self, plan_id: &str) -> Result<Option<Plan>, StoreError> {
        validate_id(plan_id)?;
        read_json_document(&self.plans_dir.join(format!("{plan_id}.json")))
    }

    /// Persists a plan document.
    pub fn save_plan(&self, plan: &Plan) -> Result<PathBuf, StoreError> {
        validate_id(&plan.plan_id)?;
        let path = self.plans_dir.join(format!("{}.json", plan.plan_id));
        write_json_document(&path, plan)?;
        Ok(path)
    }

    fn list_documents<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>, StoreError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: dir.to_path_buf(),
                    source,
                });
            },
        };
        let mut documents = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    continue;
                }
            }
            if let Some(doc) = read_json_document(&path)? {
                documents.push(doc);
            }
        }
        Ok(documents)
    }
}
