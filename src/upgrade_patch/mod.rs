//! Version-gated migration of the HyperConverged resource across upgrades
//!
//! The patch table lists JSON patches (RFC 6902) to run against the stored
//! HyperConverged object, each gated by a [`SemverRange`] over the version
//! the operator is upgrading *from*, and objects left behind by older
//! versions that must be removed.
//!
//! The table is embedded in the binary and can be overridden with
//! `UPGRADE_PATCHES_FILE`. It is validated once at startup against a
//! canonical HyperConverged document; an invalid table stops the operator.

pub mod semver_range;

use std::path::Path;

use json_patch::{Patch, PatchOperation};
use kube::api::ApiResource;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::kube_utils::build_api_resource;
use crate::Error;

pub use semver_range::SemverRange;

const EMBEDDED_PATCHES: &str = include_str!("../data/upgrade_patches.json");
const CANONICAL_HYPERCONVERGED: &str = include_str!("../data/hco_cr.json");

/// Relaxations applied while running a patch
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JsonPatchApplyOptions {
    /// A `remove` of a missing path is skipped instead of failing
    #[serde(default)]
    pub allow_missing_path_on_remove: bool,

    /// An `add` creates missing parent objects instead of failing
    #[serde(default)]
    pub ensure_path_exists_on_add: bool,
}

/// A JSON patch applied to the HyperConverged resource when upgrading from
/// a version inside `semver_range`
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedPatch {
    /// Versions the patch applies to
    pub semver_range: SemverRange,

    /// Operations to run
    pub json_patch: Patch,

    /// Optional relaxations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_patch_apply_options: Option<JsonPatchApplyOptions>,
}

/// Group, version and kind of an object to remove
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct GroupVersionKind {
    /// API group, empty for the core group
    #[serde(default)]
    pub group: String,
    /// API version
    #[serde(default)]
    pub version: String,
    /// Kind
    #[serde(default)]
    pub kind: String,
}

/// Name and namespace of an object to remove
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ObjectKey {
    /// Object name
    #[serde(default)]
    pub name: String,
    /// Namespace; empty for cluster-scoped objects
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// An object left behind by older versions
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectToBeRemoved {
    /// Versions that left the object behind
    pub semver_range: SemverRange,
    /// Kind of the object
    pub group_version_kind: GroupVersionKind,
    /// Identity of the object
    pub object_key: ObjectKey,
}

impl ObjectToBeRemoved {
    /// API resource of the object
    pub fn api_resource(&self) -> ApiResource {
        let gvk = &self.group_version_kind;
        let api_version = if gvk.group.is_empty() {
            gvk.version.clone()
        } else {
            format!("{}/{}", gvk.group, gvk.version)
        };
        build_api_resource(&api_version, &gvk.kind)
    }

    /// Namespace of the object, `None` when cluster scoped
    pub fn namespace(&self) -> Option<&str> {
        Some(self.object_key.namespace.as_str()).filter(|ns| !ns.is_empty())
    }

    fn validate(&self) -> Result<(), Error> {
        if self.group_version_kind.kind.is_empty() {
            return Err(Error::validation("missing object kind"));
        }
        if self.group_version_kind.version.is_empty() {
            return Err(Error::validation("missing object API version"));
        }
        if self.object_key.name.is_empty() {
            return Err(Error::validation("missing object name"));
        }
        Ok(())
    }
}

/// The upgrade-patch table
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UpgradePatches {
    /// Patches to the HyperConverged resource, applied in order
    #[serde(rename = "hcoCRPatchList", default)]
    pub hco_cr_patch_list: Vec<HyperConvergedPatch>,

    /// Leftover objects to delete
    #[serde(rename = "objectsToBeRemoved", default)]
    pub objects_to_be_removed: Vec<ObjectToBeRemoved>,
}

impl UpgradePatches {
    /// Parse a table from JSON without validating it
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load and validate the table from `path`, or the embedded one
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let patches = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::startup(format!("can't read upgrade patches {}: {e}", path.display()))
                })?;
                Self::from_json(&raw)
            }
            None => Self::from_json(EMBEDDED_PATCHES),
        }
        .map_err(|e| Error::startup(format!("invalid upgrade patches: {e}")))?;

        patches
            .validate()
            .map_err(|e| Error::startup(format!("invalid upgrade patches: {e}")))?;

        info!(
            patches = patches.hco_cr_patch_list.len(),
            leftovers = patches.objects_to_be_removed.len(),
            "loaded upgrade patches"
        );
        Ok(patches)
    }

    /// Check every entry against the canonical HyperConverged document
    ///
    /// Patches may only touch `/spec/` and must apply cleanly, except that
    /// failing `test` operations are accepted. Leftover entries need a kind,
    /// an API version and a name.
    pub fn validate(&self) -> Result<(), Error> {
        let canonical: Value = serde_json::from_str(CANONICAL_HYPERCONVERGED)?;

        for patch in &self.hco_cr_patch_list {
            for op in patch.json_patch.0.iter() {
                if !operation_path(op).starts_with("/spec/") {
                    return Err(Error::validation("can only modify spec fields"));
                }
            }
            run(&canonical, patch)?;
        }

        for leftover in &self.objects_to_be_removed {
            leftover.validate()?;
        }
        Ok(())
    }

    /// Apply every patch whose range contains `known_version` to `hco`
    ///
    /// A patch whose `test` operation fails is skipped as a whole.
    pub fn apply(&self, hco: &Value, known_version: &Version) -> Result<Value, Error> {
        let mut current = hco.clone();
        for patch in &self.hco_cr_patch_list {
            if !patch.semver_range.contains(known_version) {
                continue;
            }
            info!(
                known_version = %known_version,
                range = %patch.semver_range,
                operations = patch.json_patch.0.len(),
                "applying upgrade patch"
            );
            if let Some(patched) = run(&current, patch)? {
                current = patched;
            }
        }
        Ok(current)
    }

    /// Leftover objects for an upgrade from `known_version`
    pub fn objects_to_remove(&self, known_version: &Version) -> Vec<&ObjectToBeRemoved> {
        self.objects_to_be_removed
            .iter()
            .filter(|o| o.semver_range.contains(known_version))
            .collect()
    }
}

/// Target path of an operation
pub fn operation_path(op: &PatchOperation) -> &str {
    match op {
        PatchOperation::Add(op) => op.path.as_str(),
        PatchOperation::Remove(op) => op.path.as_str(),
        PatchOperation::Replace(op) => op.path.as_str(),
        PatchOperation::Move(op) => op.path.as_str(),
        PatchOperation::Copy(op) => op.path.as_str(),
        PatchOperation::Test(op) => op.path.as_str(),
    }
}

/// Run one patch; `Ok(None)` when a `test` operation did not match
fn run(doc: &Value, patch: &HyperConvergedPatch) -> Result<Option<Value>, Error> {
    let options = patch.json_patch_apply_options.clone().unwrap_or_default();
    let patched = apply_with_options(doc, &patch.json_patch, &options)
        .map_err(|e| Error::patch(e.to_string()))?;
    if patched.is_none() {
        debug!(range = %patch.semver_range, "upgrade patch test did not match; skipping");
    }
    Ok(patched)
}

/// Apply `patch` to a copy of `doc`; the input is never modified
///
/// Returns `Ok(None)` when a `test` operation does not match. A `test` of a
/// missing path only matches `null`.
pub fn apply_with_options(
    doc: &Value,
    patch: &Patch,
    options: &JsonPatchApplyOptions,
) -> Result<Option<Value>, json_patch::PatchError> {
    let mut out = doc.clone();
    for op in patch.0.iter() {
        match op {
            PatchOperation::Test(test) => {
                let matched = match out.pointer(test.path.as_str()) {
                    Some(value) => *value == test.value,
                    None => test.value.is_null(),
                };
                if !matched {
                    return Ok(None);
                }
                continue;
            }
            PatchOperation::Remove(remove)
                if options.allow_missing_path_on_remove
                    && out.pointer(remove.path.as_str()).is_none() =>
            {
                continue;
            }
            PatchOperation::Add(add) if options.ensure_path_exists_on_add => {
                ensure_parents(&mut out, add.path.as_str());
            }
            _ => {}
        }
        json_patch::patch(&mut out, std::slice::from_ref(op))?;
    }
    Ok(Some(out))
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Create the missing objects on the way to the parent of `pointer`
fn ensure_parents(doc: &mut Value, pointer: &str) {
    let tokens: Vec<String> = pointer.split('/').skip(1).map(unescape).collect();
    let Some((_, parents)) = tokens.split_last() else {
        return;
    };

    let mut current = doc;
    for token in parents {
        current = match current {
            Value::Object(map) => map
                .entry(token.clone())
                .or_insert_with(|| Value::Object(Default::default())),
            Value::Array(items) => match token.parse::<usize>() {
                Ok(i) if i < items.len() => &mut items[i],
                _ => return,
            },
            _ => return,
        };
    }
}
