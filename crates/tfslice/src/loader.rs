//! module loading and intra-module resolution
//!
//! Loading a directory happens in this order:
//!
//! 1. every `*.tf` file is parsed ([crate::documents]) and its blocks are declared in file
//!    order. Inputs of resources, data sources, module calls and outputs are resolved right
//!    away (first pass). Locals declared in a later file and outputs of nested modules are
//!    not known yet, such references keep the root `local`/`module`.
//! 2. nested module calls are loaded depth-first through the same entry point.
//! 3. second pass: inputs of resources, data sources and module calls as well as output
//!    values still rooted at `local` or `module` are resolved again, back-edges that found
//!    no target are retried.
//! 4. every input of every resolved module call is followed into the child
//!    ([crate::dataflow]).
//!
//! Problems are recorded as diagnostics on the module and never stop the load.
use crate::dataflow::{self, DataflowEdge};
use crate::diagnostics::Diagnostics;
use crate::documents::{self, SourceFile, SourcePos};
use crate::manifest::{child_key, ModuleManifest};
use crate::module::{
    Local, Module, ModuleCall, ModuleId, ModuleTree, Output, ProviderConfig,
    ProviderRequirement, Resource, ResourceMode, Variable,
};
use crate::reference::{AttributeReference, RelativeAttributeReference, Root};
use crate::resolve::{ResolveCache, Resolver};
use crate::util::is_local_source;
use crate::value::Value;
use hcl_edit::structure::{Attribute, Block, Body, Structure};
use hcl_edit::Span;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Module call arguments that are not inputs of the child module
const MODULE_CALL_META: &[&str] = &["source", "version", "providers"];
/// Resource arguments that are not inputs
const RESOURCE_META: &[&str] = &["provider"];
/// Module call arguments handled by the configuration language itself
pub(crate) const MODULE_CALL_LANGUAGE_ARGS: &[&str] = &["count", "for_each", "depends_on"];

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("Unable to resolve module directory {path}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// the literal default holds a value JSON cannot represent, e.g. an infinite decimal
    #[error("Default value of variable {name} in {path} cannot be serialized")]
    DefaultValue {
        name: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ModuleTree {
    /// Loads the module in `dir` and every nested module call that can be resolved
    ///
    /// Calls are resolved through `manifest` first and fall back to local `./` and `../`
    /// sources.
    pub fn load(dir: &Path, manifest: Option<&ModuleManifest>) -> Result<ModuleTree, LoadError> {
        Loader::new(dir, manifest)?.load()
    }
}

/// Back-edge whose target resource was not declared when it was found
#[derive(Debug, derive_new::new)]
struct PendingReference {
    target: AttributeReference,
    referrer: AttributeReference,
}

pub struct Loader<'m> {
    tree: ModuleTree,
    cache: ResolveCache,
    manifest: Option<&'m ModuleManifest>,
    root_dir: PathBuf,
    /// directories currently being loaded
    loading: Vec<PathBuf>,
    pending: Vec<PendingReference>,
}

impl<'m> Loader<'m> {
    pub fn new(dir: &Path, manifest: Option<&'m ModuleManifest>) -> Result<Self, LoadError> {
        let root_dir = dir.canonicalize().map_err(|source| LoadError::Directory {
            path: dir.to_owned(),
            source,
        })?;

        Ok(Self {
            tree: Default::default(),
            cache: Default::default(),
            manifest,
            root_dir,
            loading: vec![],
            pending: vec![],
        })
    }

    pub fn load(mut self) -> Result<ModuleTree, LoadError> {
        let root_dir = self.root_dir.clone();
        self.load_module(root_dir, String::new(), None)?;
        tracing::debug!(
            modules = self.tree.len(),
            cached_outputs = self.cache.len(),
            "load complete"
        );
        Ok(self.tree)
    }

    #[tracing::instrument(level = "trace", skip(self, parent))]
    fn load_module(
        &mut self,
        dir: PathBuf,
        key: String,
        parent: Option<(ModuleId, String)>,
    ) -> Result<ModuleId, LoadError> {
        tracing::info!(directory=%dir.display(), key, "loading module");

        let mut module = Module::new(dir.clone(), key);
        if let Some((parent, call_name)) = parent {
            module.parent = Some(parent);
            module.call_name = Some(call_name);
        }
        let id = self.tree.push(module);
        self.loading.push(dir.clone());

        let mut diagnostics = Diagnostics::default();
        let files = documents::load_directory(&dir, &mut diagnostics);
        self.tree.get_mut(id).diagnostics = diagnostics;

        for file in &files {
            self.load_file(id, file)?;
        }

        self.load_children(id)?;
        self.second_pass(id);
        self.follow_module_calls(id);

        self.loading.pop();
        Ok(id)
    }

    fn load_file(&mut self, id: ModuleId, file: &SourceFile) -> Result<(), LoadError> {
        for structure in file.body.iter() {
            match structure {
                Structure::Attribute(attribute) => {
                    let pos = pos_of(file, attribute);
                    self.diagnostics(id).error(
                        format!(
                            "Unexpected attribute {:?} outside of a block",
                            attribute.key.value().as_str()
                        ),
                        pos,
                    );
                }
                Structure::Block(block) => self.load_block(id, file, block)?,
            }
        }

        Ok(())
    }

    fn load_block(
        &mut self,
        id: ModuleId,
        file: &SourceFile,
        block: &Block,
    ) -> Result<(), LoadError> {
        match block.ident.value().as_str() {
            "terraform" => self.load_terraform(id, file, block),
            "locals" => self.load_locals(id, file, block),
            "variable" => return self.load_variable(id, file, block),
            "output" => self.load_output(id, file, block),
            "provider" => self.load_provider(id, file, block),
            "resource" => self.load_resource(id, file, block, ResourceMode::Managed),
            "data" => self.load_resource(id, file, block, ResourceMode::Data),
            "module" => self.load_module_call(id, file, block),
            other => tracing::trace!(block = other, "ignoring block"),
        }

        Ok(())
    }

    fn diagnostics(&mut self, id: ModuleId) -> &mut Diagnostics {
        &mut self.tree.get_mut(id).diagnostics
    }

    /// Labels of `block`, or a diagnostic when there are not exactly `N`
    fn labels<'b, const N: usize>(
        &mut self,
        id: ModuleId,
        file: &SourceFile,
        block: &'b Block,
        names: [&str; N],
    ) -> Option<[&'b str; N]> {
        let labels: Vec<&str> = block.labels.iter().map(|label| label.as_str()).collect();
        match <[&str; N]>::try_from(labels) {
            Ok(labels) => Some(labels),
            Err(labels) => {
                let kind = block.ident.value().as_str().to_string();
                self.diagnostics(id).error_with_detail(
                    format!("Invalid {kind} block"),
                    format!("expected labels {names:?}, found {} label(s)", labels.len()),
                    pos_of(file, block),
                );
                None
            }
        }
    }

    fn load_terraform(&mut self, id: ModuleId, file: &SourceFile, block: &Block) {
        if let Some(version) = string_attribute(&block.body, "required_version") {
            self.tree.get_mut(id).required_core.push(version);
        }

        for required_providers in block
            .body
            .blocks()
            .filter(|block| block.ident.value().as_str() == "required_providers")
        {
            for attribute in required_providers.body.attributes() {
                let name = attribute.key.value().as_str().to_string();
                let expr: hcl::Expression = attribute.value.clone().into();

                let (source, version) = match &expr {
                    hcl::Expression::Object(object) => {
                        let field = |field: &str| {
                            object.iter().find_map(|(key, value)| {
                                let key = match key {
                                    hcl::ObjectKey::Identifier(ident) => ident.as_str(),
                                    hcl::ObjectKey::Expression(hcl::Expression::String(s)) => {
                                        s.as_str()
                                    }
                                    _ => return None,
                                };
                                (key == field).then(|| literal_string(value)).flatten()
                            })
                        };
                        (field("source"), field("version"))
                    }
                    // legacy `aws = "~> 3.0"` form
                    other => (None, literal_string(other)),
                };

                let pos = pos_of(file, attribute);
                let module = self.tree.get_mut(id);
                let requirement = module
                    .required_providers
                    .entry(name.clone())
                    .or_insert_with(|| ProviderRequirement {
                        source: None,
                        version_constraints: vec![],
                    });

                match (requirement.source.clone(), source) {
                    (Some(existing), Some(new)) if existing != new => {
                        let detail =
                            format!("{name} is declared with source {existing:?} and {new:?}");
                        module.diagnostics.error_with_detail(
                            "Conflicting provider source declarations",
                            detail,
                            pos,
                        );
                    }
                    (None, Some(new)) => requirement.source = Some(new),
                    _ => {}
                }

                if let Some(version) = version {
                    requirement.version_constraints.push(version);
                }
            }
        }
    }

    fn load_locals(&mut self, id: ModuleId, file: &SourceFile, block: &Block) {
        let block_pos = pos_of(file, block);

        for attribute in block.body.attributes() {
            let name = attribute.key.value().as_str().to_string();
            let local = Local {
                name: name.clone(),
                expression: attribute.value.clone().into(),
                pos: pos_of(file, attribute),
                block_pos: block_pos.clone(),
            };

            let module = self.tree.get_mut(id);
            if module.locals.contains_key(&name) {
                module
                    .diagnostics
                    .error(format!("Duplicate local value {name:?}"), local.pos);
                continue;
            }
            module.locals.insert(name, local);
        }
    }

    fn load_variable(
        &mut self,
        id: ModuleId,
        file: &SourceFile,
        block: &Block,
    ) -> Result<(), LoadError> {
        let Some([name]) = self.labels(id, file, block, ["name"]) else {
            return Ok(());
        };
        let pos = pos_of(file, block);

        let default = match attribute(&block.body, "default") {
            None => None,
            Some(attribute) => {
                let expr: hcl::Expression = attribute.value.clone().into();
                match Value::try_from(&expr) {
                    Ok(value) => Some(value.to_json().map_err(|source| LoadError::DefaultValue {
                        name: name.to_string(),
                        path: file.path.clone(),
                        source,
                    })?),
                    Err(err) => {
                        self.diagnostics(id).warning(
                            format!("Default of variable {name:?} is ignored: {err}"),
                            pos_of(file, attribute),
                        );
                        None
                    }
                }
            }
        };

        let variable = Variable {
            name: name.to_string(),
            type_expr: attribute(&block.body, "type")
                .map(|attr| attr.value.to_string().trim().to_string()),
            description: string_attribute(&block.body, "description"),
            required: attribute(&block.body, "default").is_none(),
            default,
            sensitive: bool_attribute(&block.body, "sensitive").unwrap_or(false),
            nullable: bool_attribute(&block.body, "nullable").unwrap_or(true),
            pos,
        };

        let module = self.tree.get_mut(id);
        if module.variables.contains_key(name) {
            module
                .diagnostics
                .error(format!("Duplicate variable {name:?}"), variable.pos);
            return Ok(());
        }
        module.variables.insert(name.to_string(), variable);
        Ok(())
    }

    fn load_output(&mut self, id: ModuleId, file: &SourceFile, block: &Block) {
        let Some([name]) = self.labels(id, file, block, ["name"]) else {
            return;
        };
        let pos = pos_of(file, block);

        let expression: hcl::Expression = match attribute(&block.body, "value") {
            Some(attribute) => attribute.value.clone().into(),
            None => {
                self.diagnostics(id)
                    .error(format!("Output {name:?} has no value"), pos.clone());
                hcl::Expression::Null
            }
        };

        if self.tree[id].outputs.contains_key(name) {
            self.diagnostics(id)
                .error(format!("Duplicate output {name:?}"), pos);
            return;
        }

        let value = Resolver::new(&self.tree, &mut self.cache).resolve(id, &expression);
        let output = Output {
            name: name.to_string(),
            description: string_attribute(&block.body, "description"),
            sensitive: bool_attribute(&block.body, "sensitive").unwrap_or(false),
            depends_on: attribute(&block.body, "depends_on").map(|attr| attr.value.clone().into()),
            expression,
            value: value.clone(),
            pos,
        };
        self.tree.get_mut(id).outputs.insert(name.to_string(), output);

        let referrer = AttributeReference::new(id, Root::Output(name.to_string()), vec![]);
        self.link_back_edge(referrer, &value);
    }

    fn load_provider(&mut self, id: ModuleId, file: &SourceFile, block: &Block) {
        let Some([name]) = self.labels(id, file, block, ["name"]) else {
            return;
        };

        let mut expressions = IndexMap::new();
        flatten_body(&block.body, &[], &["alias"], false, &mut expressions);

        let config = ProviderConfig {
            name: name.to_string(),
            alias: string_attribute(&block.body, "alias"),
            pos: pos_of(file, block),
            expressions,
        };

        let key = config.key();
        let module = self.tree.get_mut(id);
        if module.provider_configs.contains_key(&key) {
            module
                .diagnostics
                .error(format!("Duplicate provider configuration {key:?}"), config.pos);
            return;
        }
        module.provider_configs.insert(key, config);
    }

    fn load_resource(
        &mut self,
        id: ModuleId,
        file: &SourceFile,
        block: &Block,
        mode: ResourceMode,
    ) {
        let Some([type_name, name]) = self.labels(id, file, block, ["type", "name"]) else {
            return;
        };

        let provider = match attribute(&block.body, "provider") {
            Some(attribute) => attribute.value.to_string().trim().to_string(),
            None => type_name.split('_').next().unwrap_or(type_name).to_string(),
        };

        let mut expressions = IndexMap::new();
        flatten_body(&block.body, &[], RESOURCE_META, false, &mut expressions);

        let resource = Resource {
            mode,
            type_name: type_name.to_string(),
            name: name.to_string(),
            provider,
            pos: pos_of(file, block),
            expressions,
            inputs: Default::default(),
            references: Default::default(),
        };

        let key = Resource::key(type_name, name);
        let module = self.tree.get_mut(id);
        if module.resources(mode).contains_key(&key) {
            let address = resource.address();
            module
                .diagnostics
                .error(format!("Duplicate resource {address:?}"), resource.pos);
            return;
        }
        module.resources_mut(mode).insert(key.clone(), resource);

        // first pass
        let resolved: Vec<(String, AttributeReference)> = {
            let mut resolver = Resolver::new(&self.tree, &mut self.cache);
            self.tree[id].resources(mode)[&key]
                .expressions
                .iter()
                .map(|(path, expr)| (path.clone(), resolver.resolve(id, expr)))
                .collect()
        };

        for (path, reference) in resolved {
            if matches!(reference.root, Root::Local(_) | Root::Module(_)) {
                tracing::debug!(resource=%key, path, %reference, "deferred to second pass");
            }
            self.record_resource_input(id, mode, &key, &path, reference);
        }
    }

    fn load_module_call(&mut self, id: ModuleId, file: &SourceFile, block: &Block) {
        let Some([name]) = self.labels(id, file, block, ["name"]) else {
            return;
        };
        let pos = pos_of(file, block);

        let source_attribute = attribute(&block.body, "source");
        let source = source_attribute.and_then(|attr| {
            let expr: hcl::Expression = attr.value.clone().into();
            literal_string(&expr)
        });
        let Some(source) = source else {
            self.diagnostics(id)
                .error(format!("Module call {name:?} has no literal source"), pos);
            return;
        };

        let mut expressions = IndexMap::new();
        flatten_body(&block.body, &[], MODULE_CALL_META, false, &mut expressions);

        if self.tree[id].module_calls.contains_key(name) {
            self.diagnostics(id)
                .error(format!("Duplicate module call {name:?}"), pos);
            return;
        }

        let inputs: IndexMap<String, AttributeReference> = {
            let mut resolver = Resolver::new(&self.tree, &mut self.cache);
            expressions
                .iter()
                .map(|(attr, expr)| (attr.clone(), resolver.resolve(id, expr)))
                .collect()
        };

        let call = ModuleCall {
            name: name.to_string(),
            source,
            version: string_attribute(&block.body, "version"),
            pos,
            source_span: source_attribute.and_then(|attr| attr.value.span()),
            expressions,
            providers: attribute(&block.body, "providers").map(|attr| attr.value.clone().into()),
            inputs: inputs.clone(),
            child: None,
        };
        self.tree.get_mut(id).module_calls.insert(name.to_string(), call);

        for (attr, reference) in inputs {
            let referrer = AttributeReference::new(id, Root::Module(name.to_string()), vec![attr]);
            self.link_back_edge(referrer, &reference);
        }
    }

    fn load_children(&mut self, id: ModuleId) -> Result<(), LoadError> {
        let module = &self.tree[id];
        let module_dir = module.dir.clone();
        let module_key = module.key.clone();
        let calls: Vec<(String, String, Option<String>)> = module
            .module_calls
            .values()
            .map(|call| (call.name.clone(), call.source.clone(), call.version.clone()))
            .collect();

        for (name, source, version) in calls {
            let key = child_key(&module_key, &name);
            let Some(child_dir) = self.locate(&module_dir, &key, &source, version.as_deref()) else {
                tracing::warn!(call = name, source, "unable to resolve module call");
                continue;
            };

            if self.loading.contains(&child_dir) {
                tracing::warn!(call = name, directory=%child_dir.display(), "module calls itself, not loading again");
                continue;
            }

            let child = self.load_module(child_dir, key, Some((id, name.clone())))?;
            if let Some(call) = self.tree.get_mut(id).module_calls.get_mut(&name) {
                call.child = Some(child);
            }
        }

        Ok(())
    }

    fn locate(
        &self,
        module_dir: &Path,
        key: &str,
        source: &str,
        version: Option<&str>,
    ) -> Option<PathBuf> {
        if let Some(dir) = self
            .manifest
            .and_then(|manifest| manifest.resolve(key, source, version))
        {
            match self.root_dir.join(dir).canonicalize() {
                Ok(dir) => return Some(dir),
                Err(err) => {
                    tracing::warn!(key, directory=%dir.display(), %err, "manifest directory missing")
                }
            }
        }

        if is_local_source(source) {
            return module_dir.join(source).canonicalize().ok();
        }

        None
    }

    fn second_pass(&mut self, id: ModuleId) {
        let deferred = |reference: &AttributeReference| {
            matches!(reference.root, Root::Local(_) | Root::Module(_))
        };

        let (updates, call_updates, output_updates) = {
            let module = &self.tree[id];
            let mut resolver = Resolver::new(&self.tree, &mut self.cache);
            let mut updates = vec![];
            for mode in [ResourceMode::Managed, ResourceMode::Data] {
                for (key, resource) in module.resources(mode) {
                    for (path, reference) in &resource.inputs {
                        if !deferred(reference) {
                            continue;
                        }
                        let reference = resolver.resolve(id, &resource.expressions[path]);
                        updates.push((mode, key.clone(), path.clone(), reference));
                    }
                }
            }

            let mut call_updates = vec![];
            for (name, call) in &module.module_calls {
                for (attr, reference) in &call.inputs {
                    if !deferred(reference) {
                        continue;
                    }
                    let reference = resolver.resolve(id, &call.expressions[attr]);
                    call_updates.push((name.clone(), attr.clone(), reference));
                }
            }

            let mut output_updates = vec![];
            for (name, output) in &module.outputs {
                if deferred(&output.value) {
                    let reference = resolver.resolve(id, &output.expression);
                    output_updates.push((name.clone(), reference));
                }
            }

            (updates, call_updates, output_updates)
        };

        for (mode, key, path, reference) in updates {
            tracing::debug!(resource=%key, path, %reference, "second pass");
            self.record_resource_input(id, mode, &key, &path, reference);
        }

        for (name, attr, reference) in call_updates {
            tracing::debug!(call=%name, attr, %reference, "second pass");
            if let Some(call) = self.tree.get_mut(id).module_calls.get_mut(&name) {
                call.inputs.insert(attr.clone(), reference.clone());
            }
            let referrer = AttributeReference::new(id, Root::Module(name), vec![attr]);
            self.link_back_edge(referrer, &reference);
        }

        for (name, reference) in output_updates {
            tracing::debug!(output=%name, %reference, "second pass");
            if let Some(output) = self.tree.get_mut(id).outputs.get_mut(&name) {
                output.value = reference.clone();
            }
            let referrer = AttributeReference::new(id, Root::Output(name), vec![]);
            self.link_back_edge(referrer, &reference);
        }

        let pending = std::mem::take(&mut self.pending);
        for PendingReference { target, referrer } in pending {
            if target.module != id && self.loading.contains(&self.tree[target.module].dir) {
                self.pending.push(PendingReference::new(target, referrer));
                continue;
            }
            if !self.add_back_edge(&target, referrer.clone()) {
                tracing::info!(%target, %referrer, "reference to undeclared resource");
            }
        }
    }

    fn follow_module_calls(&mut self, id: ModuleId) {
        let edges: Vec<DataflowEdge> = {
            let module = &self.tree[id];
            let mut edges = vec![];
            for call in module.module_calls.values() {
                for (attr, expr) in &call.expressions {
                    if MODULE_CALL_LANGUAGE_ARGS.contains(&attr.as_str()) {
                        continue;
                    }
                    edges.extend(dataflow::resolve_module_call_input(
                        &self.tree,
                        &mut self.cache,
                        id,
                        call,
                        attr,
                        expr,
                    ));
                }
            }
            edges
        };

        for edge in edges {
            match edge {
                DataflowEdge::Input {
                    variable,
                    path,
                    reference,
                } => self.tree.get_mut(id).add_input(&variable, &path, reference),
                DataflowEdge::Reference {
                    target,
                    referrer,
                } => {
                    if !self.add_back_edge(&target, referrer.clone()) {
                        tracing::info!(%target, %referrer, "module input refers to undeclared resource");
                    }
                }
            }
        }
    }

    /// Stores a resolved resource input and indexes it
    fn record_resource_input(
        &mut self,
        id: ModuleId,
        mode: ResourceMode,
        key: &str,
        path: &str,
        reference: AttributeReference,
    ) {
        let module = self.tree.get_mut(id);
        let Some(resource) = module.resources_mut(mode).get_mut(key) else {
            return;
        };
        let referrer = resource.attribute_reference(id, path);
        resource.inputs.insert(path.to_string(), reference.clone());

        match &reference.root {
            Root::Variable(variable) if reference.module == id => {
                let relative = RelativeAttributeReference::new(referrer, reference.path.clone());
                module.add_input(variable, &reference.path, relative);
            }
            _ => self.link_back_edge(referrer, &reference),
        }
    }

    /// Registers `referrer` on the resource `reference` points at, or keeps it for later
    fn link_back_edge(&mut self, referrer: AttributeReference, reference: &AttributeReference) {
        if !reference.is_terminal() {
            return;
        }

        if !self.add_back_edge(reference, referrer.clone()) {
            tracing::debug!(target=%reference, %referrer, "reference target not declared (yet)");
            self.pending
                .push(PendingReference::new(reference.clone(), referrer));
        }
    }

    fn add_back_edge(&mut self, target: &AttributeReference, referrer: AttributeReference) -> bool {
        let (mode, type_name, name) = match &target.root {
            Root::Resource { type_name, name } => (ResourceMode::Managed, type_name, name),
            Root::Data { type_name, name } => (ResourceMode::Data, type_name, name),
            _ => return false,
        };

        self.tree
            .get_mut(target.module)
            .add_resource_reference(mode, type_name, name, &target.path, referrer)
    }
}

fn pos_of(file: &SourceFile, node: &impl Span) -> SourcePos {
    file.pos_of(node).unwrap_or_else(|| file.file_pos())
}

fn attribute<'b>(body: &'b Body, key: &str) -> Option<&'b Attribute> {
    body.attributes()
        .find(|attribute| attribute.key.value().as_str() == key)
}

fn literal_string(expr: &hcl::Expression) -> Option<String> {
    match Value::try_from(expr) {
        Ok(Value::String(s)) => Some(s),
        _ => None,
    }
}

pub(crate) fn string_attribute(body: &Body, key: &str) -> Option<String> {
    let expr: hcl::Expression = attribute(body, key)?.value.clone().into();
    literal_string(&expr)
}

fn bool_attribute(body: &Body, key: &str) -> Option<bool> {
    let expr: hcl::Expression = attribute(body, key)?.value.clone().into();
    match Value::try_from(&expr) {
        Ok(Value::Boolean(b)) => Some(b),
        _ => None,
    }
}

/// Collects attribute expressions of `body` under dotted paths
///
/// Nested blocks add their identifier as a path segment, repeated blocks get an index
/// (`ingress`, `ingress[1]`, ...). `dynamic "x" { content { ... } }` is flattened as `x`.
/// `lifecycle` blocks are skipped.
fn flatten_body(
    body: &Body,
    prefix: &[String],
    skip: &[&str],
    in_dynamic: bool,
    out: &mut IndexMap<String, hcl::Expression>,
) {
    let mut occurrences: IndexMap<String, usize> = IndexMap::new();
    let path_of = |key: &str| {
        prefix
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(key))
            .collect::<Vec<_>>()
            .join(".")
    };

    for structure in body.iter() {
        match structure {
            Structure::Attribute(attribute) => {
                let key = attribute.key.value().as_str();
                if prefix.is_empty() && skip.contains(&key) {
                    continue;
                }
                out.insert(path_of(key), attribute.value.clone().into());
            }
            Structure::Block(block) => {
                let ident = block.ident.value().as_str();
                if prefix.is_empty() && ident == "lifecycle" {
                    continue;
                }

                if in_dynamic && ident == "content" {
                    flatten_body(&block.body, prefix, &[], false, out);
                    continue;
                }

                let (segment, dynamic) = match (ident, block.labels.first()) {
                    ("dynamic", Some(label)) => (label.as_str(), true),
                    _ => (ident, false),
                };

                let count = occurrences.entry(segment.to_string()).or_insert(0);
                let segment = match *count {
                    0 => segment.to_string(),
                    n => format!("{segment}[{n}]"),
                };
                *count += 1;

                let mut nested = prefix.to_vec();
                nested.push(segment);
                flatten_body(&block.body, &nested, &[], dynamic, out);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Writes `files` into a temporary directory and loads it as root module
    pub(crate) fn load_sources(files: &[(&str, &str)]) -> (tempfile::TempDir, ModuleTree) {
        let dir = tempfile::tempdir().expect("temporary directory");
        for (path, contents) in files {
            let path = dir.path().join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }

        let tree = ModuleTree::load(dir.path(), None).expect("module must load");
        (dir, tree)
    }

    fn input(tree: &ModuleTree, module: ModuleId, address: &str, path: &str) -> String {
        let (type_name, name) = address.split_once('.').unwrap();
        let resource = tree[module]
            .resource(ResourceMode::Managed, type_name, name)
            .unwrap_or_else(|| panic!("resource {address} must exist"));
        resource.inputs[path].attribute()
    }

    #[test]
    fn declarations() {
        let (_dir, tree) = load_sources(&[(
            "main.tf",
            r#"
terraform {
  required_version = ">= 1.5"
  required_providers {
    aws = {
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }
  }
}

provider "aws" {
  region = var.region
}

provider "aws" {
  alias  = "west"
  region = "us-west-2"
}

variable "region" {
  type        = string
  description = "AWS region"
  default     = "eu-central-1"
}

variable "ami_id" {
  sensitive = true
}

locals {
  name = "web"
}

resource "aws_instance" "a" {
  ami      = var.ami_id
  provider = aws.west
}

data "aws_ami" "ubuntu" {
  most_recent = true
}

output "id" {
  value       = aws_instance.a.id
  description = "instance id"
}
"#,
        )]);

        let root = tree.root();
        assert!(!tree.has_errors(), "{:?}", tree.diagnostics().collect::<Vec<_>>());
        assert_eq!(root.required_core, vec![">= 1.5"]);
        assert_eq!(root.required_providers["aws"].source.as_deref(), Some("hashicorp/aws"));
        assert_eq!(root.required_providers["aws"].version_constraints, vec!["~> 5.0"]);
        assert_eq!(root.provider_configs.keys().collect::<Vec<_>>(), vec!["aws", "aws.west"]);

        let region = &root.variables["region"];
        assert_eq!(region.type_expr.as_deref(), Some("string"));
        assert_eq!(region.description.as_deref(), Some("AWS region"));
        assert_eq!(region.default, Some(serde_json::json!("eu-central-1")));
        assert!(!region.required);

        let ami = &root.variables["ami_id"];
        assert!(ami.required);
        assert!(ami.sensitive);

        assert_eq!(root.locals.keys().collect::<Vec<_>>(), vec!["name"]);
        assert_eq!(root.managed_resources["aws_instance.a"].provider, "aws.west");
        assert_eq!(root.data_resources["aws_ami.ubuntu"].provider, "aws");
        assert_eq!(root.outputs["id"].description.as_deref(), Some("instance id"));
        assert_eq!(root.outputs["id"].value.attribute(), "aws_instance.a.id");
    }

    #[test]
    fn variable_reference_scenario() {
        let (_dir, tree) = load_sources(&[(
            "main.tf",
            "resource \"aws_instance\" \"a\" {\n  ami = var.ami_id\n}\n\nvariable \"ami_id\" {}\n",
        )]);

        let reference = &tree.root().managed_resources["aws_instance.a"].inputs["ami"];
        assert_eq!(reference.root_kind(), "var");
        assert_eq!(reference.name(), "ami_id");
        assert!(reference.path().is_empty());

        let fed: Vec<_> = tree
            .root()
            .inputs_of("ami_id")
            .map(|r| r.reference.attribute())
            .collect();
        assert_eq!(fed, vec!["aws_instance.a.ami"]);
    }

    #[test]
    fn nested_blocks_are_flattened() {
        let (_dir, tree) = load_sources(&[(
            "main.tf",
            r#"
resource "aws_security_group" "sg" {
  vpc_id = aws_vpc.main.id

  ingress {
    cidr_blocks = [aws_vpc.main.cidr_block]
  }

  ingress {
    from_port = var.port
  }

  dynamic "egress" {
    for_each = var.rules
    content {
      to_port = egress.value.port
    }
  }

  lifecycle {
    ignore_changes = [tags]
  }
}
"#,
        )]);

        let sg = &tree.root().managed_resources["aws_security_group.sg"];
        assert_eq!(
            sg.inputs.keys().collect::<Vec<_>>(),
            vec![
                "vpc_id",
                "ingress.cidr_blocks",
                "ingress[1].from_port",
                "egress.for_each",
                "egress.to_port"
            ]
        );
    }

    #[test]
    fn diagnostics_do_not_stop_loading() {
        let (_dir, tree) = load_sources(&[
            ("a.tf", "variable {}\nresource \"only_type\" {}\nmodule \"m\" {}\n"),
            ("b.tf", "this is = not valid\n"),
            ("c.tf", "variable \"ok\" {}\nvariable \"ok\" {}\n"),
            (
                "d.tf",
                r#"
terraform {
  required_providers {
    aws = { source = "hashicorp/aws" }
  }
}
terraform {
  required_providers {
    aws = { source = "example/aws" }
  }
}
"#,
            ),
        ]);

        let summaries: Vec<_> = tree.diagnostics().map(|d| d.summary.clone()).collect();
        assert!(tree.has_errors());
        assert_eq!(summaries.len(), 6, "{summaries:#?}");
        assert!(summaries.iter().any(|s| s == "Invalid variable block"));
        assert!(summaries.iter().any(|s| s == "Invalid resource block"));
        assert!(summaries.iter().any(|s| s.starts_with("Module call \"m\"")));
        assert!(summaries.iter().any(|s| s.starts_with("Unable to parse")));
        assert!(summaries.iter().any(|s| s == "Duplicate variable \"ok\""));
        assert!(summaries.iter().any(|s| s == "Conflicting provider source declarations"));
        assert!(tree.root().variables.contains_key("ok"));
    }

    #[test]
    fn non_literal_default_is_a_warning() {
        let (_dir, tree) = load_sources(&[(
            "main.tf",
            "variable \"a\" {\n  default = \"${path.module}/x\"\n}\n",
        )]);

        assert!(!tree.has_errors());
        assert_eq!(tree.diagnostics().count(), 1);
        assert_eq!(tree.root().variables["a"].default, None);
        assert!(!tree.root().variables["a"].required);
    }

    #[test]
    fn forward_references_across_files() {
        let (_dir, tree) = load_sources(&[
            (
                "a.tf",
                r#"
resource "aws_instance" "web" {
  subnet_id = local.subnet
  vpc_cidr  = module.net.cidr
  sg        = aws_security_group.later.id
}
"#,
            ),
            (
                "b.tf",
                r#"
locals {
  subnet = local.first_subnet
}

locals {
  first_subnet = aws_subnet.a.id
}

resource "aws_subnet" "a" {}
resource "aws_security_group" "later" {}

module "net" {
  source = "./net"
}
"#,
            ),
            (
                "net/main.tf",
                "output \"cidr\" {\n  value = aws_vpc.main.cidr_block\n}\nresource \"aws_vpc\" \"main\" {}\n",
            ),
        ]);

        let root = ModuleId::ROOT;
        assert_eq!(input(&tree, root, "aws_instance.web", "subnet_id"), "aws_subnet.a.id");
        assert_eq!(input(&tree, root, "aws_instance.web", "vpc_cidr"), "aws_vpc.main.cidr_block");
        assert_eq!(input(&tree, root, "aws_instance.web", "sg"), "aws_security_group.later.id");

        let subnet = &tree.root().managed_resources["aws_subnet.a"];
        assert_eq!(subnet.references["id"][0].attribute(), "aws_instance.web.subnet_id");

        let sg = &tree.root().managed_resources["aws_security_group.later"];
        assert_eq!(sg.references["id"][0].attribute(), "aws_instance.web.sg");

        let child = tree.root().module_calls["net"].child.unwrap();
        let vpc = &tree[child].managed_resources["aws_vpc.main"];
        let referrers: Vec<_> = vpc.references["cidr_block"]
            .iter()
            .map(|r| r.attribute())
            .collect();
        assert_eq!(referrers, vec!["output.cidr", "aws_instance.web.vpc_cidr"]);
    }

    #[test]
    fn sibling_module_outputs() {
        let (_dir, tree) = load_sources(&[
            (
                "main.tf",
                r#"
resource "aws_instance" "web" {
  subnet_id = module.app.subnet
}

module "app" {
  source    = "./app"
  subnet_id = module.net.subnet_id
}

module "net" {
  source = "./net"
}
"#,
            ),
            (
                "app/main.tf",
                "variable \"subnet_id\" {}\noutput \"subnet\" {\n  value = var.subnet_id\n}\nresource \"aws_instance\" \"app\" {\n  subnet_id = var.subnet_id\n}\n",
            ),
            (
                "net/main.tf",
                "resource \"aws_subnet\" \"a\" {}\noutput \"subnet_id\" {\n  value = aws_subnet.a.id\n}\n",
            ),
        ]);

        // app's output is a variable of app, it cannot be followed further from the root
        assert_eq!(input(&tree, ModuleId::ROOT, "aws_instance.web", "subnet_id"), "var.subnet_id");

        let net = tree.root().module_calls["net"].child.unwrap();
        let subnet = &tree[net].managed_resources["aws_subnet.a"];
        let referrers: Vec<_> = subnet.references["id"].iter().map(|r| r.attribute()).collect();
        assert_eq!(
            referrers,
            vec![
                "output.subnet_id",
                "module.app.subnet_id",
                "aws_instance.app.subnet_id"
            ]
        );
    }

    #[test]
    fn unresolved_module_calls_keep_module_root() {
        let (_dir, tree) = load_sources(&[(
            "main.tf",
            r#"
module "vpc" {
  source  = "terraform-aws-modules/vpc/aws"
  version = "5.0.0"
}

resource "aws_instance" "a" {
  subnet_id = module.vpc.private_subnets[0]
}
"#,
        )]);

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().module_calls["vpc"].child, None);
        let reference = &tree.root().managed_resources["aws_instance.a"].inputs["subnet_id"];
        assert_eq!(reference.root_kind(), "module");
        assert_eq!(reference.attribute(), "module.vpc.private_subnets");
    }

    #[test]
    fn manifest_resolves_registry_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("main.tf"),
            "module \"vpc\" {\n  source  = \"terraform-aws-modules/vpc/aws\"\n  version = \"5.0.0\"\n}\n",
        )
        .unwrap();
        let installed = dir.path().join(".terraform/modules/vpc");
        std::fs::create_dir_all(&installed).unwrap();
        std::fs::write(installed.join("main.tf"), "resource \"aws_vpc\" \"this\" {}\n").unwrap();

        let manifest: ModuleManifest = r#"{"Modules":[
            {"Key":"","Source":"","Dir":"."},
            {"Key":"vpc","Source":"terraform-aws-modules/vpc/aws","Version":"5.0.0","Dir":".terraform/modules/vpc"}
        ]}"#
        .parse()
        .unwrap();

        let tree = ModuleTree::load(dir.path(), Some(&manifest)).unwrap();
        let child = tree.root().module_calls["vpc"].child.expect("module must be resolved");
        assert_eq!(tree[child].key, "vpc");
        assert!(tree[child].managed_resources.contains_key("aws_vpc.this"));
    }

    #[test]
    fn recursive_module_calls_are_not_followed() {
        let (_dir, tree) = load_sources(&[("main.tf", "module \"me\" {\n  source = \"./\"\n}\n")]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.root().module_calls["me"].child, None);
    }

    #[test]
    fn loading_is_deterministic() {
        let files = [
            (
                "main.tf",
                "module \"app\" {\n  source = \"./app\"\n  image = aws_ami.a.id\n  size = var.size\n}\nresource \"aws_ami\" \"a\" {}\nvariable \"size\" {}\n",
            ),
            (
                "app/main.tf",
                "variable \"image\" {}\nvariable \"size\" {}\nresource \"aws_instance\" \"i\" {\n  ami = var.image\n  type = var.size\n}\n",
            ),
        ];
        let (_a, first) = load_sources(&files);
        let (_b, second) = load_sources(&files);

        let render = |tree: &ModuleTree| {
            let modules: Vec<_> = tree
                .modules()
                .map(|(_, m)| {
                    (
                        serde_json::to_string(&m.inputs).unwrap(),
                        serde_json::to_string(&m.managed_resources).unwrap(),
                    )
                })
                .collect();
            serde_json::to_string(&modules)
                .unwrap()
                .replace(&*tree.root().dir.to_string_lossy(), "<root>")
        };

        assert_eq!(render(&first), render(&second));
    }
}
