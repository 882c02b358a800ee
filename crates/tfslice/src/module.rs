//! in-memory module tree
//!
//! A [ModuleTree] is an arena of [Module]s. The root module has id [ModuleId::ROOT], nested
//! module calls point at their loaded child by id. Ids are stable once assigned, modules are
//! never removed.
//!
//! Raw expressions are kept next to their resolved references so later stages (second
//! resolution pass, requirement graph) can look at them again.
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::documents::SourcePos;
use crate::reference::{AttributeReference, RelativeAttributeReference, Root};
use indexmap::IndexMap;
use serde::Serialize;
use std::ops::Range;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ModuleId(pub usize);

impl ModuleId {
    pub const ROOT: ModuleId = ModuleId(0);
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ModuleTree {
    pub(crate) modules: Vec<Module>,
}

impl ModuleTree {
    pub fn root(&self) -> &Module {
        &self.modules[ModuleId::ROOT.0]
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id.0)
    }

    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .map(|(index, module)| (ModuleId(index), module))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Diagnostics of every module in the tree
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.modules
            .iter()
            .flat_map(|module| module.diagnostics.iter())
    }

    pub fn has_errors(&self) -> bool {
        self.modules
            .iter()
            .any(|module| module.diagnostics.has_errors())
    }

    pub(crate) fn push(&mut self, module: Module) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(module);
        id
    }

    pub(crate) fn get_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.0]
    }

    /// Name of the call in `ancestor` whose subtree contains `descendant`
    pub fn call_leading_to(&self, ancestor: ModuleId, descendant: ModuleId) -> Option<&str> {
        let mut current = descendant;
        loop {
            let module = self.get(current)?;
            let parent = module.parent?;
            if parent == ancestor {
                return module.call_name.as_deref();
            }
            current = parent;
        }
    }
}

impl std::ops::Index<ModuleId> for ModuleTree {
    type Output = Module;

    fn index(&self, index: ModuleId) -> &Self::Output {
        &self.modules[index.0]
    }
}

#[derive(Debug, Serialize)]
pub struct Module {
    pub dir: PathBuf,
    /// manifest key, `""` for the root module
    pub key: String,
    #[serde(skip)]
    pub parent: Option<ModuleId>,
    /// name of the call in the parent that loaded this module
    #[serde(skip)]
    pub call_name: Option<String>,
    pub required_core: Vec<String>,
    pub required_providers: IndexMap<String, ProviderRequirement>,
    pub provider_configs: IndexMap<String, ProviderConfig>,
    pub variables: IndexMap<String, Variable>,
    pub locals: IndexMap<String, Local>,
    pub outputs: IndexMap<String, Output>,
    pub managed_resources: IndexMap<String, Resource>,
    pub data_resources: IndexMap<String, Resource>,
    pub module_calls: IndexMap<String, ModuleCall>,
    /// variable name -> path inside the variable -> terminal attributes fed by it
    pub inputs: IndexMap<String, IndexMap<String, Vec<RelativeAttributeReference>>>,
    pub diagnostics: Diagnostics,
}

impl Module {
    pub fn new(dir: PathBuf, key: String) -> Self {
        Self {
            dir,
            key,
            parent: None,
            call_name: None,
            required_core: vec![],
            required_providers: Default::default(),
            provider_configs: Default::default(),
            variables: Default::default(),
            locals: Default::default(),
            outputs: Default::default(),
            managed_resources: Default::default(),
            data_resources: Default::default(),
            module_calls: Default::default(),
            inputs: Default::default(),
            diagnostics: Default::default(),
        }
    }

    pub fn resources(&self, mode: ResourceMode) -> &IndexMap<String, Resource> {
        match mode {
            ResourceMode::Managed => &self.managed_resources,
            ResourceMode::Data => &self.data_resources,
        }
    }

    pub(crate) fn resources_mut(&mut self, mode: ResourceMode) -> &mut IndexMap<String, Resource> {
        match mode {
            ResourceMode::Managed => &mut self.managed_resources,
            ResourceMode::Data => &mut self.data_resources,
        }
    }

    pub fn resource(&self, mode: ResourceMode, type_name: &str, name: &str) -> Option<&Resource> {
        self.resources(mode).get(&Resource::key(type_name, name))
    }

    /// All managed resources followed by all data resources
    pub fn all_resources(&self) -> impl Iterator<Item = &Resource> {
        self.managed_resources
            .values()
            .chain(self.data_resources.values())
    }

    /// Records that `referrer` points into `path` of the resource `(mode, type, name)`
    ///
    /// Returns `false` without changing anything when the resource is not declared here.
    pub fn add_resource_reference(
        &mut self,
        mode: ResourceMode,
        type_name: &str,
        name: &str,
        path: &[String],
        referrer: AttributeReference,
    ) -> bool {
        let Some(resource) = self
            .resources_mut(mode)
            .get_mut(&Resource::key(type_name, name))
        else {
            return false;
        };

        tracing::trace!(target=%resource.address(), path=%path.join("."), %referrer, "reference added");
        resource
            .references
            .entry(path.join("."))
            .or_default()
            .push(referrer);
        true
    }

    /// Appends to the `Inputs` index
    pub fn add_input(
        &mut self,
        variable: &str,
        path: &[String],
        reference: RelativeAttributeReference,
    ) {
        self.inputs
            .entry(variable.to_string())
            .or_default()
            .entry(path.join("."))
            .or_default()
            .push(reference);
    }

    /// Terminal attributes fed by `var.<variable>`, in index order
    pub fn inputs_of(&self, variable: &str) -> impl Iterator<Item = &RelativeAttributeReference> {
        self.inputs
            .get(variable)
            .into_iter()
            .flat_map(|paths| paths.values().flatten())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequirement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub version_constraints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub pos: SourcePos,
    #[serde(skip)]
    pub expressions: IndexMap<String, hcl::Expression>,
}

impl ProviderConfig {
    /// `name` or `name.alias`
    pub fn key(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}.{}", self.name, alias),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    pub required: bool,
    pub sensitive: bool,
    pub nullable: bool,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Serialize)]
pub struct Local {
    pub name: String,
    #[serde(skip)]
    pub expression: hcl::Expression,
    /// the `name = ...` attribute
    pub pos: SourcePos,
    /// the enclosing `locals { ... }` block
    pub block_pos: SourcePos,
}

#[derive(Debug, Clone, Serialize)]
pub struct Output {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sensitive: bool,
    #[serde(skip)]
    pub expression: hcl::Expression,
    #[serde(skip)]
    pub depends_on: Option<hcl::Expression>,
    pub value: AttributeReference,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    Managed,
    Data,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub mode: ResourceMode,
    pub type_name: String,
    pub name: String,
    /// provider configuration key, explicit `provider = ...` or implied by the type prefix
    pub provider: String,
    pub pos: SourcePos,
    #[serde(skip)]
    pub expressions: IndexMap<String, hcl::Expression>,
    pub inputs: IndexMap<String, AttributeReference>,
    pub references: IndexMap<String, Vec<AttributeReference>>,
}

impl Resource {
    pub fn key(type_name: &str, name: &str) -> String {
        format!("{type_name}.{name}")
    }

    /// `type.name` or `data.type.name`
    pub fn address(&self) -> String {
        match self.mode {
            ResourceMode::Managed => Resource::key(&self.type_name, &self.name),
            ResourceMode::Data => format!("data.{}.{}", self.type_name, self.name),
        }
    }

    /// Reference to one of this resource's own attributes
    pub fn attribute_reference(&self, module: ModuleId, path: &str) -> AttributeReference {
        AttributeReference::new(
            module,
            Root::resource(self.mode, self.type_name.as_str(), self.name.as_str()),
            split_path(path),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleCall {
    pub name: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub pos: SourcePos,
    /// bytes of the `source` attribute value
    #[serde(skip)]
    pub source_span: Option<Range<usize>>,
    #[serde(skip)]
    pub expressions: IndexMap<String, hcl::Expression>,
    /// `providers = { ... }` passed to the child, not an input
    #[serde(skip)]
    pub providers: Option<hcl::Expression>,
    pub inputs: IndexMap<String, AttributeReference>,
    pub child: Option<ModuleId>,
}

/// Inverse of `path.join(".")`
pub fn split_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return vec![];
    }
    path.split('.').map(str::to_string).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn pos() -> SourcePos {
        SourcePos {
            file: "main.tf".into(),
            bytes: 0..1,
            start_line: 1,
            end_line: 1,
        }
    }

    fn resource(type_name: &str, name: &str) -> Resource {
        Resource {
            mode: ResourceMode::Managed,
            type_name: type_name.into(),
            name: name.into(),
            provider: "aws".into(),
            pos: pos(),
            expressions: Default::default(),
            inputs: Default::default(),
            references: Default::default(),
        }
    }

    #[test]
    fn add_resource_reference_matches_type_and_name() {
        let mut module = Module::new("/tmp".into(), String::new());
        module
            .managed_resources
            .insert(Resource::key("aws_vpc", "main"), resource("aws_vpc", "main"));

        let referrer = resource("aws_subnet", "a").attribute_reference(ModuleId::ROOT, "vpc_id");
        let path = vec!["id".to_string()];

        assert!(module.add_resource_reference(
            ResourceMode::Managed,
            "aws_vpc",
            "main",
            &path,
            referrer.clone()
        ));
        assert!(!module.add_resource_reference(
            ResourceMode::Data,
            "aws_vpc",
            "main",
            &path,
            referrer.clone()
        ));
        assert!(!module.add_resource_reference(
            ResourceMode::Managed,
            "aws_vpc",
            "other",
            &path,
            referrer
        ));

        let vpc = module.resource(ResourceMode::Managed, "aws_vpc", "main").unwrap();
        assert_eq!(vpc.references["id"].len(), 1);
        assert_eq!(vpc.references["id"][0].attribute(), "aws_subnet.a.vpc_id");
    }

    #[test]
    fn split_path_round_trip() {
        assert!(split_path("").is_empty());
        assert_eq!(split_path("a.b").join("."), "a.b");
    }
}
