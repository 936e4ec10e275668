//! Golden-image (DataImportCronTemplate) resolver
//!
//! The operator ships a catalog of common golden images. Users may add their
//! own templates, customize a common one by reusing its name, or disable a
//! common one with the enable annotation. [`GoldenImageCatalog::resolve`]
//! merges both sources into the sorted list published in
//! `status.dataImportCronTemplates`; [`to_ssp`] projects that list into the
//! form the scheduling/templates operand consumes.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{debug, info};

use crate::crd::{
    is_condition_false, remove_condition, set_condition, Condition, ConditionStatus,
    DataImportCronSpec, DataImportCronStatus, DataImportCronTemplate,
    DataImportCronTemplateStatus, HyperConverged, RegistrySource,
};
use crate::metrics;
use crate::Error;

/// Comma-separated list of the architectures an image is published for
pub const MULTI_ARCH_ANNOTATION: &str = "ssp.kubevirt.io/dict.architectures";
/// Asks the data importer to bind the import PVC immediately
pub const IMMEDIATE_BIND_ANNOTATION: &str = "cdi.kubevirt.io/storage.bind.immediate.requested";
/// `true`/`false` switch of a user template
pub const ENABLE_ANNOTATION: &str = "dataimportcrontemplate.kubevirt.io/enable";

/// Condition type set on templates that cannot be deployed
pub const DEPLOYED_CONDITION: &str = "Deployed";
/// Reason of a `Deployed=False` condition
pub const UNSUPPORTED_ARCHITECTURES_REASON: &str = "UnsupportedArchitectures";
const UNSUPPORTED_ARCHITECTURES_MESSAGE: &str =
    "DataImportCronTemplate has no supported architectures for the current cluster";

const EMBEDDED_MANIFESTS: [(&str, &str); 2] = [
    (
        "centos-stream.yaml",
        include_str!("../data/dataImportCronTemplates/centos-stream.yaml"),
    ),
    (
        "fedora.yaml",
        include_str!("../data/dataImportCronTemplates/fedora.yaml"),
    ),
];

/// The common golden images, keyed by template name
///
/// Read-only once loaded. A schedule persisted in the HyperConverged status
/// is applied per resolve instead of mutating the catalog.
#[derive(Debug, Clone, Default)]
pub struct GoldenImageCatalog {
    templates: BTreeMap<String, DataImportCronTemplate>,
}

impl GoldenImageCatalog {
    /// Catalog compiled into the binary
    pub fn embedded() -> Result<Self, Error> {
        Self::from_manifests(
            EMBEDDED_MANIFESTS
                .iter()
                .map(|(file, content)| (file.to_string(), content.to_string())),
        )
    }

    /// Catalog read from every `*.yaml` file of `dir`
    pub fn from_dir(dir: &Path) -> Result<Self, Error> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::startup(format!(
                "can't read the golden image directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| Error::startup(format!("can't list {}: {e}", dir.display())))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "yaml") {
                files.push(path);
            }
        }
        files.sort();

        let mut manifests = Vec::with_capacity(files.len());
        for path in files {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::startup(format!("can't read {}: {e}", path.display()))
            })?;
            manifests.push((path.display().to_string(), content));
        }
        Self::from_manifests(manifests)
    }

    /// Catalog from `dir` when given, the embedded one otherwise
    pub fn load(dir: Option<&Path>) -> Result<Self, Error> {
        let catalog = match dir {
            Some(dir) => Self::from_dir(dir)?,
            None => Self::embedded()?,
        };
        info!(templates = catalog.len(), "loaded golden image catalog");
        Ok(catalog)
    }

    /// Catalog from already-parsed templates
    pub fn from_templates(
        templates: impl IntoIterator<Item = DataImportCronTemplate>,
    ) -> Result<Self, Error> {
        let mut catalog = Self::default();
        for template in templates {
            catalog.insert(template)?;
        }
        Ok(catalog)
    }

    fn from_manifests(
        manifests: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, Error> {
        let mut catalog = Self::default();
        for (file, content) in manifests {
            let templates: Vec<DataImportCronTemplate> = serde_yaml::from_str(&content)
                .map_err(|e| {
                    Error::startup(format!("can't process the golden image file {file}: {e}"))
                })?;
            for template in templates {
                catalog.insert(template)?;
            }
        }
        Ok(catalog)
    }

    fn insert(&mut self, template: DataImportCronTemplate) -> Result<(), Error> {
        let name = template.name().to_string();
        if name.is_empty() {
            return Err(Error::startup("golden image template without a name"));
        }
        if self.templates.contains_key(&name) {
            return Err(Error::startup(format!(
                "golden image template {name} is defined more than once"
            )));
        }
        self.templates.insert(name, template);
        Ok(())
    }

    /// Number of common templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Common templates, in name order
    pub fn iter(&self) -> impl Iterator<Item = &DataImportCronTemplate> {
        self.templates.values()
    }

    /// Common template by name
    pub fn get(&self, name: &str) -> Option<&DataImportCronTemplate> {
        self.templates.get(name)
    }

    /// Whether `name` is a common template
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Merge the catalog with the user templates of `hc`
    ///
    /// `workload_archs` is only consulted when the multi-arch feature gate
    /// is on. The result is sorted by name.
    pub fn resolve(
        &self,
        hc: &HyperConverged,
        workload_archs: &[String],
    ) -> Result<Vec<DataImportCronTemplateStatus>, Error> {
        let user = user_templates(&hc.spec.data_import_cron_templates)?;
        let multi_arch = hc.multi_arch_boot_images_enabled();
        let status = hc.status.as_ref();
        let schedule_override = status
            .and_then(|s| s.data_import_schedule.as_deref())
            .filter(|s| !s.is_empty());

        let mut resolved = Vec::with_capacity(self.templates.len() + user.len());

        if hc.common_boot_image_import_enabled() {
            for (name, common) in &self.templates {
                let mut target = DataImportCronTemplateStatus {
                    template: common.clone(),
                    status: DataImportCronStatus {
                        common_template: true,
                        ..Default::default()
                    },
                };
                if let (Some(schedule), Some(spec)) =
                    (schedule_override, target.template.spec.as_mut())
                {
                    spec.schedule = schedule.to_string();
                }

                match user.get(name.as_str()) {
                    Some(custom) => {
                        if !customize_common(&mut target, custom, multi_arch) {
                            debug!(template = %name, "common golden image disabled");
                            continue;
                        }
                    }
                    None => {
                        if let Some(ns) = hc
                            .spec
                            .common_boot_image_namespace
                            .as_deref()
                            .filter(|ns| !ns.is_empty())
                        {
                            target.template.metadata.namespace = Some(ns.to_string());
                        }
                    }
                }
                resolved.push(target);
            }
        }

        for (name, custom) in &user {
            if is_enabled(custom) && !self.templates.contains_key(*name) {
                resolved.push(DataImportCronTemplateStatus {
                    template: (*custom).clone(),
                    status: DataImportCronStatus::default(),
                });
            }
        }

        if multi_arch {
            let previous = status
                .map(|s| s.data_import_cron_templates.as_slice())
                .unwrap_or_default();
            for dict in &mut resolved {
                if let Some(prev) = previous.iter().find(|p| p.name() == dict.name()) {
                    dict.status.conditions = prev.status.conditions.clone();
                }
                restrict_to_architectures(dict, workload_archs);
            }
        }

        resolved.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(resolved)
    }
}

fn user_templates(
    templates: &[DataImportCronTemplate],
) -> Result<BTreeMap<&str, &DataImportCronTemplate>, Error> {
    let mut by_name = BTreeMap::new();
    for template in templates {
        if by_name.insert(template.name(), template).is_some() {
            return Err(Error::validation(format!(
                "{} DataImportCronTable is already defined",
                template.name()
            )));
        }
    }
    Ok(by_name)
}

fn registry(spec: Option<&DataImportCronSpec>) -> Option<&RegistrySource> {
    spec?.template.spec.source.as_ref()?.registry.as_ref()
}

fn customize_common(
    target: &mut DataImportCronTemplateStatus,
    custom: &DataImportCronTemplate,
    multi_arch: bool,
) -> bool {
    if !is_enabled(custom) {
        return false;
    }

    let mut spec = custom.spec.clone().unwrap_or_default();
    if spec.schedule.is_empty() {
        if let Some(common) = target.template.spec.as_ref() {
            spec.schedule = common.schedule.clone();
        }
    }

    let custom_registry = registry(custom.spec.as_ref());
    let registry_modified =
        custom_registry.is_some() && custom_registry != registry(target.template.spec.as_ref());
    merge_annotations(target, custom, multi_arch, registry_modified);

    target.template.spec = Some(spec);
    target.template.metadata.namespace = custom.metadata.namespace.clone();
    target.status.modified = true;
    true
}

/// User annotations win, except for the architecture list: with the
/// multi-arch gate on, it follows the registry the image is pulled from.
fn merge_annotations(
    target: &mut DataImportCronTemplateStatus,
    custom: &DataImportCronTemplate,
    multi_arch: bool,
    registry_modified: bool,
) {
    if let Some(mut custom_annotations) = custom.metadata.annotations.clone() {
        if multi_arch && !registry_modified {
            match target.template.annotation(MULTI_ARCH_ANNOTATION) {
                Some(common) => {
                    custom_annotations
                        .insert(MULTI_ARCH_ANNOTATION.to_string(), common.to_string());
                }
                None => {
                    custom_annotations.remove(MULTI_ARCH_ANNOTATION);
                }
            }
        }
        target
            .template
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(custom_annotations);
    }

    if multi_arch && registry_modified && custom.annotation(MULTI_ARCH_ANNOTATION).is_none() {
        if let Some(annotations) = target.template.metadata.annotations.as_mut() {
            annotations.remove(MULTI_ARCH_ANNOTATION);
        }
    }
}

fn restrict_to_architectures(dict: &mut DataImportCronTemplateStatus, workload_archs: &[String]) {
    let Some(original) = dict.template.annotation(MULTI_ARCH_ANNOTATION).map(str::to_string) else {
        return;
    };

    let supported = original
        .split(',')
        .map(str::trim)
        .filter(|arch| workload_archs.iter().any(|w| w == arch))
        .collect::<Vec<_>>()
        .join(",");

    if supported.is_empty() {
        set_condition(
            &mut dict.status.conditions,
            Condition::new(
                DEPLOYED_CONDITION,
                ConditionStatus::False,
                UNSUPPORTED_ARCHITECTURES_REASON,
                UNSUPPORTED_ARCHITECTURES_MESSAGE,
            ),
        );
    } else {
        remove_condition(&mut dict.status.conditions, DEPLOYED_CONDITION);
    }

    dict.template
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(MULTI_ARCH_ANNOTATION.to_string(), supported);
    dict.status.original_supported_architectures = Some(original);
}

/// Whether a user template is enabled; anything but a `true` annotation
/// value disables it
pub fn is_enabled(dict: &DataImportCronTemplate) -> bool {
    dict.annotation(ENABLE_ANNOTATION)
        .is_none_or(|v| v.eq_ignore_ascii_case("true"))
}

/// Strict reading of the enable annotation, used by admission
pub fn enablement(dict: &DataImportCronTemplate) -> Result<bool, Error> {
    match dict.annotation(ENABLE_ANNOTATION) {
        None => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(Error::validation(format!(
            "the {ENABLE_ANNOTATION} annotation of the {} dataImportCronTemplate \
             must be \"true\" or \"false\"; found {v:?}",
            dict.name()
        ))),
    }
}

/// Admission checks of the user templates
pub fn validate_user_templates(templates: &[DataImportCronTemplate]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for template in templates {
        if !seen.insert(template.name()) {
            return Err(Error::validation(format!(
                "{} DataImportCronTable is already defined",
                template.name()
            )));
        }
        if enablement(template)? && template.spec.is_none() {
            return Err(Error::validation(format!(
                "missing spec in the {} dataImportCronTemplate; \
                 a template may omit its spec only when it is disabled",
                template.name()
            )));
        }
    }
    Ok(())
}

/// Project resolved templates into the scheduling/templates operand form
///
/// Templates with `Deployed=False` are left out when the multi-arch gate is
/// on; the architecture annotation is stripped when it is off.
pub fn to_ssp(
    hc: &HyperConverged,
    statuses: &[DataImportCronTemplateStatus],
) -> Vec<DataImportCronTemplate> {
    let multi_arch = hc.multi_arch_boot_images_enabled();
    statuses
        .iter()
        .filter(|s| !(multi_arch && is_condition_false(&s.status.conditions, DEPLOYED_CONDITION)))
        .map(|s| {
            let mut dict = DataImportCronTemplate {
                metadata: s.template.metadata.clone(),
                spec: Some(s.template.spec.clone().unwrap_or_default()),
            };
            let annotations = dict.metadata.annotations.get_or_insert_with(Default::default);
            annotations
                .entry(IMMEDIATE_BIND_ANNOTATION.to_string())
                .or_insert_with(|| "true".to_string());
            if !multi_arch {
                annotations.remove(MULTI_ARCH_ANNOTATION);
            }
            dict
        })
        .collect()
}

/// Publish the per-template gauges
///
/// The multi-arch gauge is only meaningful on clusters with more than one
/// workload architecture and at least one deployable template.
pub fn record_metrics(
    hc: &HyperConverged,
    statuses: &[DataImportCronTemplateStatus],
    workload_archs: &[String],
) {
    let multi_arch = hc.multi_arch_boot_images_enabled();
    let mut any_deployed = false;

    for dict in statuses {
        let data_source = dict
            .template
            .spec
            .as_ref()
            .map(|s| s.managed_data_source.as_str())
            .unwrap_or_default();
        let supported =
            !(multi_arch && is_condition_false(&dict.status.conditions, DEPLOYED_CONDITION));
        any_deployed |= supported;

        metrics::set_dict_supported_architectures(dict.name(), data_source, supported);
        metrics::set_dict_architecture_annotation(
            dict.name(),
            data_source,
            dict.template.annotation(MULTI_ARCH_ANNOTATION).is_some()
                || dict.status.original_supported_architectures.is_some(),
        );
    }

    if workload_archs.len() > 1 && any_deployed {
        metrics::set_multi_arch_boot_images_enabled(multi_arch);
    }
}
