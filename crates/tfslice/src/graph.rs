//! block requirement graph
//!
//! Nodes are the blocks of one module, edges point from a block to the blocks it needs to be
//! valid on its own. The graph is built as a closure over a set of seed blocks, blocks that
//! are not reachable from a seed are not part of it.
//!
//! Requirements of a block are the union of
//! - the references the loader resolved for it, mapped back to blocks of the module. A
//!   reference that ended up inside a nested module maps to the call leading there.
//! - every traversal in the block's raw expressions
//! - the provider configuration of resources and data sources
//!
//! Only blocks declared in the module are kept.
use crate::module::{Module, ModuleId, ModuleTree, ResourceMode};
use crate::reference::{AttributeReference, Root};
use crate::resolve::{ResolveCache, Resolver};
use crate::util::TraversalExt;
use crate::visit::VisitTraversals;
use hcl::Traversal;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    ModuleCall,
    Resource,
    Data,
    Local,
    Variable,
    Output,
    Provider,
    /// anything referenced that is not a known kind of block
    Undefined,
}

/// Block of a module, e.g. `module.net` or `data.aws_ami.ubuntu`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub block_type: BlockType,
    /// `type.name` for resources and data sources, `name.alias` for aliased providers
    pub name: String,
}

impl BlockId {
    pub fn new(block_type: BlockType, name: impl Into<String>) -> Self {
        Self {
            block_type,
            name: name.into(),
        }
    }

    pub fn module_call(name: impl Into<String>) -> Self {
        Self::new(BlockType::ModuleCall, name)
    }

    pub fn resource(type_name: &str, name: &str) -> Self {
        Self::new(BlockType::Resource, format!("{type_name}.{name}"))
    }

    pub fn data(type_name: &str, name: &str) -> Self {
        Self::new(BlockType::Data, format!("{type_name}.{name}"))
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(BlockType::Local, name)
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::new(BlockType::Variable, name)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(BlockType::Output, name)
    }

    pub fn provider(key: impl Into<String>) -> Self {
        Self::new(BlockType::Provider, key)
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        Self::new(BlockType::Undefined, name)
    }

    /// Block a resolved reference points at, `None` for unresolved and `each` references
    pub fn from_reference(reference: &AttributeReference) -> Option<Self> {
        let id = match &reference.root {
            Root::Unresolved | Root::Each => return None,
            Root::Variable(name) => Self::variable(name.as_str()),
            Root::Local(name) => Self::local(name.as_str()),
            Root::Module(name) => Self::module_call(name.as_str()),
            Root::Output(name) => Self::output(name.as_str()),
            Root::Resource { type_name, name } => Self::resource(type_name, name),
            Root::Data { type_name, name } => Self::data(type_name, name),
        };
        Some(id)
    }

    /// Block a traversal starts at, going by its leading attribute names only
    pub fn from_traversal(traversal: &Traversal) -> Option<Self> {
        let id = match traversal.get_longest_path().as_slice() {
            ["var", name, ..] => Self::variable(*name),
            ["local", name, ..] => Self::local(*name),
            ["module", name, ..] => Self::module_call(*name),
            ["data", type_name, name, ..] => Self::data(type_name, name),
            [type_name, name, ..] => Self::resource(type_name, name),
            _ => return None,
        };
        Some(id)
    }

    /// Whether `module` declares this block
    pub fn is_declared_in(&self, module: &Module) -> bool {
        let name = self.name.as_str();
        match self.block_type {
            BlockType::ModuleCall => module.module_calls.contains_key(name),
            BlockType::Resource => module.managed_resources.contains_key(name),
            BlockType::Data => module.data_resources.contains_key(name),
            BlockType::Local => module.locals.contains_key(name),
            BlockType::Variable => module.variables.contains_key(name),
            BlockType::Output => module.outputs.contains_key(name),
            BlockType::Provider => module.provider_configs.contains_key(name),
            BlockType::Undefined => false,
        }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.block_type {
            BlockType::ModuleCall => "module.",
            BlockType::Resource | BlockType::Undefined => "",
            BlockType::Data => "data.",
            BlockType::Local => "local.",
            BlockType::Variable => "var.",
            BlockType::Output => "output.",
            BlockType::Provider => "provider.",
        };
        write!(f, "{prefix}{}", self.name)
    }
}

impl Serialize for BlockId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Every module call whose name satisfies `select`, followed by every output
pub fn seed_blocks(module: &Module, select: impl Fn(&str) -> bool) -> Vec<BlockId> {
    module
        .module_calls
        .keys()
        .filter(|name| select(name))
        .map(|name| BlockId::module_call(name.as_str()))
        .chain(module.outputs.keys().map(|name| BlockId::output(name.as_str())))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: BlockId,
    pub requirements: BTreeSet<BlockId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Graph {
    nodes: BTreeMap<BlockId, GraphNode>,
}

impl Graph {
    /// Requirement closure of `seeds` inside `module`
    #[tracing::instrument(level = "trace", skip_all, fields(module=%module))]
    pub fn build(
        tree: &ModuleTree,
        module: ModuleId,
        seeds: impl IntoIterator<Item = BlockId>,
    ) -> Graph {
        let mut cache = ResolveCache::default();
        let mut graph = Graph::default();
        let mut queue: VecDeque<BlockId> = seeds.into_iter().collect();

        while let Some(id) = queue.pop_front() {
            if graph.nodes.contains_key(&id) {
                continue;
            }

            let requirements = requirements(tree, &mut cache, module, &id);
            tracing::trace!(block=%id, requirements = requirements.len(), "node added");
            queue.extend(
                requirements
                    .iter()
                    .filter(|requirement| !graph.nodes.contains_key(*requirement))
                    .cloned(),
            );
            graph.nodes.insert(id.clone(), GraphNode { id, requirements });
        }

        tracing::debug!(nodes = graph.len(), "requirement graph built");
        graph
    }

    pub fn get(&self, id: &BlockId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first walk over the closure of `targets`
    ///
    /// Every block is visited once, after the blocks it requires. Targets that are not part
    /// of the graph are visited as well. The first error returned by `visit` stops the walk.
    pub fn walk<E>(
        &self,
        targets: &[BlockId],
        mut visit: impl FnMut(&BlockId) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut visited = BTreeSet::new();
        for target in targets {
            self.walk_node(target, &mut visited, &mut visit)?;
        }
        Ok(())
    }

    fn walk_node<E>(
        &self,
        id: &BlockId,
        visited: &mut BTreeSet<BlockId>,
        visit: &mut impl FnMut(&BlockId) -> Result<(), E>,
    ) -> Result<(), E> {
        if !visited.insert(id.clone()) {
            return Ok(());
        }

        if let Some(node) = self.nodes.get(id) {
            for requirement in &node.requirements {
                self.walk_node(requirement, visited, visit)?;
            }
        }

        visit(id)
    }
}

impl std::fmt::Display for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for node in self.nodes.values() {
            write!(f, "{}", node.id)?;
            if !node.requirements.is_empty() {
                let requirements: Vec<String> =
                    node.requirements.iter().map(ToString::to_string).collect();
                write!(f, " <- {}", requirements.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Direct requirements of `id`, restricted to blocks declared in `module`
fn requirements(
    tree: &ModuleTree,
    cache: &mut ResolveCache,
    module: ModuleId,
    id: &BlockId,
) -> BTreeSet<BlockId> {
    let current = &tree[module];
    let mut resolved: Vec<AttributeReference> = vec![];
    let mut expressions: Vec<&hcl::Expression> = vec![];
    let mut required = BTreeSet::new();

    match id.block_type {
        BlockType::ModuleCall => {
            if let Some(call) = current.module_calls.get(&id.name) {
                resolved.extend(call.inputs.values().cloned());
                expressions.extend(call.expressions.values());
                if let Some(providers) = &call.providers {
                    providers.visit_traversals(&mut |traversal: &Traversal| {
                        let key = traversal.get_longest_path().join(".");
                        required.insert(BlockId::provider(key));
                    });
                }
            }
        }
        BlockType::Resource | BlockType::Data => {
            let mode = match id.block_type {
                BlockType::Data => ResourceMode::Data,
                _ => ResourceMode::Managed,
            };
            if let Some(resource) = current.resources(mode).get(&id.name) {
                resolved.extend(resource.inputs.values().cloned());
                expressions.extend(resource.expressions.values());
                required.insert(BlockId::provider(resource.provider.as_str()));
            }
        }
        BlockType::Local => {
            if let Some(local) = current.locals.get(&id.name) {
                resolved.push(Resolver::new(tree, cache).resolve(module, &local.expression));
                expressions.push(&local.expression);
            }
        }
        BlockType::Output => {
            if let Some(output) = current.outputs.get(&id.name) {
                resolved.push(output.value.clone());
                expressions.push(&output.expression);
                expressions.extend(output.depends_on.iter());
            }
        }
        BlockType::Provider => {
            if let Some(config) = current.provider_configs.get(&id.name) {
                expressions.extend(config.expressions.values());
            }
        }
        BlockType::Variable | BlockType::Undefined => {}
    }

    for reference in &resolved {
        let block = if reference.module == module {
            BlockId::from_reference(reference)
        } else {
            tree.call_leading_to(module, reference.module)
                .map(BlockId::module_call)
        };
        required.extend(block);
    }

    for expr in expressions {
        expr.visit_traversals(&mut |traversal: &Traversal| {
            required.extend(BlockId::from_traversal(traversal));
        });
    }

    required.retain(|block| block != id && block.is_declared_in(current));
    required
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::loader::test::load_sources;
    use pretty_assertions::assert_eq;

    const MAIN: &str = r#"
variable "region" {}
variable "unused" {}

provider "aws" {
  region = var.region
}

locals {
  name = "web"
  tags = { Name = local.name }
}

data "aws_ami" "ubuntu" {}

resource "aws_vpc" "main" {
  tags = local.tags
}

resource "aws_instance" "web" {
  ami = data.aws_ami.ubuntu.id
}

module "net" {
  source = "./net"
  cidr   = aws_vpc.main.cidr_block
}

module "app" {
  source    = "./app"
  subnet_id = module.net.subnet_id
}

output "instance" {
  value = aws_instance.web.id
}
"#;

    const NET: &str = r#"
variable "cidr" {}

resource "aws_subnet" "a" {
  cidr_block = var.cidr
}

output "subnet_id" {
  value = aws_subnet.a.id
}
"#;

    fn fixture() -> (tempfile::TempDir, ModuleTree) {
        load_sources(&[
            ("main.tf", MAIN),
            ("net/main.tf", NET),
            ("app/main.tf", "variable \"subnet_id\" {}\n"),
        ])
    }

    fn app_graph(tree: &ModuleTree) -> Graph {
        let seeds = seed_blocks(tree.root(), |name| name.starts_with("app"));
        assert_eq!(seeds, vec![BlockId::module_call("app"), BlockId::output("instance")]);
        Graph::build(tree, ModuleId::ROOT, seeds)
    }

    #[test]
    fn closure_of_selected_calls() {
        let (_dir, tree) = fixture();
        let graph = app_graph(&tree);

        insta::assert_snapshot!(graph.to_string(), @r###"
        module.app <- module.net
        module.net <- aws_vpc.main
        aws_instance.web <- data.aws_ami.ubuntu, provider.aws
        aws_vpc.main <- local.tags, provider.aws
        data.aws_ami.ubuntu <- provider.aws
        local.name
        local.tags <- local.name
        var.region
        output.instance <- aws_instance.web
        provider.aws <- var.region
        "###);
    }

    #[test]
    fn requirements_are_nodes() {
        let (_dir, tree) = fixture();
        let graph = app_graph(&tree);

        for node in graph.nodes() {
            assert!(node.id.is_declared_in(tree.root()), "{} is not declared", node.id);
            for requirement in &node.requirements {
                assert!(graph.contains(requirement), "{requirement} is dangling");
            }
        }
        assert!(!graph.contains(&BlockId::variable("unused")));
    }

    #[test]
    fn walk_visits_requirements_first() {
        let (_dir, tree) = fixture();
        let graph = app_graph(&tree);

        let mut visited = vec![];
        graph
            .walk(
                &[BlockId::module_call("app"), BlockId::output("instance")],
                |id| -> Result<(), ()> {
                    visited.push(id.to_string());
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(
            visited,
            vec![
                "local.name",
                "local.tags",
                "var.region",
                "provider.aws",
                "aws_vpc.main",
                "module.net",
                "module.app",
                "data.aws_ami.ubuntu",
                "aws_instance.web",
                "output.instance",
            ]
        );
    }

    #[test]
    fn walk_visits_every_block_once() {
        let (_dir, tree) = fixture();
        let graph = app_graph(&tree);

        let mut visited: Vec<BlockId> = vec![];
        let targets = [
            BlockId::output("instance"),
            BlockId::undefined("ghost"),
            BlockId::module_call("app"),
            BlockId::output("instance"),
        ];
        graph
            .walk(&targets, |id| -> Result<(), ()> {
                visited.push(id.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(visited.len(), graph.len() + 1);
        assert!(visited.contains(&BlockId::undefined("ghost")));

        let position = |id: &BlockId| visited.iter().position(|v| v == id).unwrap();
        for node in graph.nodes() {
            for requirement in &node.requirements {
                assert!(position(requirement) < position(&node.id));
            }
        }
    }

    #[test]
    fn walk_ignores_target_order() {
        let (_dir, tree) = fixture();
        let graph = app_graph(&tree);

        let visit_all = |targets: &[BlockId]| {
            let mut visited = BTreeSet::new();
            graph
                .walk(targets, |id| -> Result<(), ()> {
                    assert!(visited.insert(id.clone()), "{id} visited twice");
                    Ok(())
                })
                .unwrap();
            visited
        };

        let mut targets: Vec<BlockId> = graph.nodes().map(|node| node.id.clone()).collect();
        let forward = visit_all(&targets);
        assert_eq!(forward.len(), graph.len());

        targets.reverse();
        assert_eq!(visit_all(&targets), forward);
        assert_eq!(
            visit_all(&[BlockId::output("instance"), BlockId::module_call("app")]),
            forward
        );
    }

    #[test]
    fn module_call_providers_are_required() {
        let (_dir, tree) = load_sources(&[
            (
                "main.tf",
                r#"
provider "aws" {}

provider "aws" {
  alias  = "west"
  region = "us-west-2"
}

module "app" {
  source = "./app"
  providers = {
    aws = aws.west
  }
}
"#,
            ),
            ("app/main.tf", "resource \"aws_s3_bucket\" \"b\" {}\n"),
        ]);

        let app = &tree.root().module_calls["app"];
        assert!(app.inputs.is_empty());

        let graph = Graph::build(&tree, ModuleId::ROOT, [BlockId::module_call("app")]);
        assert_eq!(
            graph.get(&BlockId::module_call("app")).unwrap().requirements,
            BTreeSet::from([BlockId::provider("aws.west")])
        );
        assert!(graph.contains(&BlockId::provider("aws.west")));
        assert!(!graph.contains(&BlockId::provider("aws")));
    }

    #[test]
    fn walk_stops_at_first_error() {
        let (_dir, tree) = fixture();
        let graph = app_graph(&tree);

        let mut visited = vec![];
        let result = graph.walk(&[BlockId::module_call("app")], |id| {
            if id == &BlockId::module_call("net") {
                return Err(format!("cannot visit {id}"));
            }
            visited.push(id.clone());
            Ok(())
        });

        assert_eq!(result, Err("cannot visit module.net".to_string()));
        assert!(!visited.contains(&BlockId::module_call("app")));
    }

    #[test]
    fn block_ids() {
        assert_eq!(BlockId::data("aws_ami", "ubuntu").to_string(), "data.aws_ami.ubuntu");
        assert_eq!(BlockId::provider("aws.west").to_string(), "provider.aws.west");
        assert!(BlockId::module_call("b") < BlockId::resource("a", "a"));
        assert_eq!(
            serde_json::to_string(&BlockId::local("tags")).unwrap(),
            r#""local.tags""#
        );
    }
}
