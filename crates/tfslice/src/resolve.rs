//! expression to reference resolution
//!
//! [Resolver::resolve] reduces any expression to exactly one [AttributeReference]. The
//! reduction is a best-effort approximation: conditionals only follow the true branch,
//! function calls only their first argument (except `lookup`), tuples only their first
//! element. Nothing here fails, an expression that cannot be followed resolves to
//! [Root::Unresolved].
//!
//! `local.<name>` is inlined by resolving the local's own expression. `module.<call>.<output>`
//! is inlined by resolving the output's expression inside the child module, so the resulting
//! reference can point into another module of the tree.
use crate::expr::RefExpr;
use crate::module::{ModuleId, ModuleTree};
use crate::reference::{AttributeReference, Root};
use hcl::Expression;
use std::collections::HashMap;

/// Memoized module output resolutions
///
/// Scoped to one operation (a load or a graph build). Only outputs of fully loaded child
/// modules are stored.
#[derive(Debug, Default)]
pub struct ResolveCache {
    outputs: HashMap<(ModuleId, String), AttributeReference>,
}

impl ResolveCache {
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Binding {
    Local(String),
    Output(String),
}

pub struct Resolver<'t, 'c> {
    tree: &'t ModuleTree,
    cache: &'c mut ResolveCache,
    /// locals and outputs currently being inlined
    stack: Vec<(ModuleId, Binding)>,
}

impl<'t, 'c> Resolver<'t, 'c> {
    pub fn new(tree: &'t ModuleTree, cache: &'c mut ResolveCache) -> Self {
        Self {
            tree,
            cache,
            stack: vec![],
        }
    }

    #[tracing::instrument(level = "trace", skip_all, fields(module=%module))]
    pub fn resolve(&mut self, module: ModuleId, expr: &Expression) -> AttributeReference {
        let reference = self.resolve_shape(module, &RefExpr::from(expr));
        tracing::trace!(%reference, kind=reference.root_kind(), "resolved");
        reference
    }

    pub fn resolve_shape(&mut self, module: ModuleId, shape: &RefExpr) -> AttributeReference {
        match shape {
            RefExpr::Scope { root, path } => self.resolve_scope(module, root, path),
            RefExpr::Call { name, args } => {
                if name == "lookup" && args.len() >= 2 {
                    let map = self.resolve_shape(module, &args[0]);
                    let key = self.resolve_shape(module, &args[1]);
                    return map.merge(key);
                }

                match args.first() {
                    Some(first) => self.resolve_shape(module, first),
                    None => AttributeReference::unresolved(module),
                }
            }
            RefExpr::Splat { source, each } => {
                let mut reference = self.resolve_shape(module, source);
                reference.extend_path(each.iter().cloned());
                reference
            }
            RefExpr::Index { collection } => self.resolve_shape(module, collection),
            RefExpr::Relative { source, path } => {
                let mut reference = self.resolve_shape(module, source);
                reference.extend_path(path.iter().cloned());
                reference
            }
            RefExpr::Conditional { true_expr } => self.resolve_shape(module, true_expr),
            RefExpr::For {
                key_var,
                value_var,
                collection,
                value,
            } => {
                let value = self.resolve_shape(module, value);

                let iterates_collection = value.root_kind() == value_var
                    || key_var.as_deref() == Some(value.root_kind());
                if !iterates_collection {
                    return value;
                }

                let mut reference = self.resolve_shape(module, collection);
                reference.extend_path(std::iter::once(value.name().to_string()));
                reference.extend_path(value.path);
                reference
            }
            RefExpr::Literal(literal) => {
                AttributeReference::new(module, Root::Unresolved, vec![literal.clone()])
            }
            RefExpr::Wrap(inner) => self.resolve_shape(module, inner),
            RefExpr::Tuple(elements) => match elements.first() {
                Some(first) => self.resolve_shape(module, first),
                None => AttributeReference::unresolved(module),
            },
            RefExpr::Opaque => AttributeReference::unresolved(module),
        }
    }

    fn resolve_scope(
        &mut self,
        module: ModuleId,
        root: &str,
        path: &[String],
    ) -> AttributeReference {
        let first = || path.first().cloned().unwrap_or_default();
        let tail = || path.iter().skip(1).cloned().collect::<Vec<_>>();

        let root = match root {
            "var" => Root::Variable(first()),
            "local" => match path.split_first() {
                Some((name, rest)) => return self.resolve_local(module, name, rest),
                None => Root::Local(String::new()),
            },
            "module" => match path.split_first() {
                Some((name, rest)) => return self.resolve_module_output(module, name, rest),
                None => Root::Module(String::new()),
            },
            "each" => return AttributeReference::new(module, Root::Each, path.to_vec()),
            "data" => {
                let type_name = path.first().cloned().unwrap_or_default();
                let name = path.get(1).cloned().unwrap_or_default();
                let rest = path.iter().skip(2).cloned().collect();
                return AttributeReference::new(module, Root::Data { type_name, name }, rest);
            }
            type_name => Root::Resource {
                type_name: type_name.to_string(),
                name: first(),
            },
        };

        AttributeReference::new(module, root, tail())
    }

    fn resolve_local(
        &mut self,
        module: ModuleId,
        name: &str,
        rest: &[String],
    ) -> AttributeReference {
        let tree = self.tree;
        let Some(local) = tree.get(module).and_then(|m| m.locals.get(name)) else {
            tracing::debug!(local = name, "local not available (yet)");
            return AttributeReference::new(module, Root::Local(name.to_string()), rest.to_vec());
        };

        let binding = (module, Binding::Local(name.to_string()));
        if self.stack.contains(&binding) {
            tracing::warn!(local = name, "local refers to itself");
            return AttributeReference::unresolved(module);
        }

        self.stack.push(binding);
        let mut reference = self.resolve(module, &local.expression);
        self.stack.pop();

        reference.extend_path(rest.iter().cloned());
        reference
    }

    fn resolve_module_output(
        &mut self,
        module: ModuleId,
        call_name: &str,
        path: &[String],
    ) -> AttributeReference {
        let tree = self.tree;
        let unresolved_call =
            || AttributeReference::new(module, Root::Module(call_name.to_string()), path.to_vec());

        let Some(call) = tree.get(module).and_then(|m| m.module_calls.get(call_name)) else {
            tracing::debug!(call = call_name, "module call not declared (yet)");
            return unresolved_call();
        };
        let Some(child) = call.child else {
            tracing::debug!(call = call_name, "module call not resolved");
            return unresolved_call();
        };
        let Some((output_name, rest)) = path.split_first() else {
            return unresolved_call();
        };
        let Some(output) = tree[child].outputs.get(output_name) else {
            tracing::debug!(call = call_name, output = %output_name, "module has no such output");
            return unresolved_call();
        };

        let key = (child, output_name.clone());
        let mut reference = match self.cache.outputs.get(&key) {
            Some(cached) => cached.clone(),
            None => {
                let binding = (child, Binding::Output(output_name.clone()));
                if self.stack.contains(&binding) {
                    tracing::warn!(call = call_name, output = %output_name, "output refers to itself");
                    return AttributeReference::unresolved(module);
                }

                self.stack.push(binding);
                let reference = self.resolve(child, &output.expression);
                self.stack.pop();

                self.cache.outputs.insert(key, reference.clone());
                reference
            }
        };

        reference.extend_path(rest.iter().cloned());
        reference
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::loader::test::load_sources;
    use pretty_assertions::assert_eq;

    fn resolve_in(tree: &ModuleTree, module: ModuleId, source: &str) -> AttributeReference {
        let expr: hcl_edit::expr::Expression = source.parse().expect("expression must parse");
        let mut cache = ResolveCache::default();
        Resolver::new(tree, &mut cache).resolve(module, &Expression::from(expr))
    }

    fn resolve(source: &str) -> AttributeReference {
        let (_dir, tree) = load_sources(&[("main.tf", "")]);
        resolve_in(&tree, ModuleId::ROOT, source)
    }

    #[test]
    fn dotted_traversal_round_trips() {
        for source in ["aws_vpc.main.cidr_block", "aws_instance.web.tags.Name"] {
            assert_eq!(resolve(source).attribute(), source);
        }

        let reference = resolve("data.aws_ami.ubuntu.id");
        assert_eq!(reference.root_kind(), "data");
        assert_eq!(reference.name(), "ubuntu");
        assert_eq!(reference.attribute(), "data.aws_ami.ubuntu.id");
    }

    #[test]
    fn variables() {
        let reference = resolve("var.ami_id");
        assert_eq!(reference.root_kind(), "var");
        assert_eq!(reference.name(), "ami_id");
        assert!(reference.path().is_empty());

        assert_eq!(resolve("each.value.name").attribute(), "each.value.name");
    }

    #[test]
    fn shapes() {
        assert_eq!(resolve("aws_subnet.a[0].id").attribute(), "aws_subnet.a.id");
        assert_eq!(resolve("aws_subnet.a[*].id").attribute(), "aws_subnet.a.id");
        assert_eq!(resolve("aws_subnet.a[var.index]").attribute(), "aws_subnet.a");
        assert_eq!(resolve("var.on ? aws_eip.a.id : aws_eip.b.id").attribute(), "aws_eip.a.id");
        assert_eq!(resolve("element(aws_subnet.a.*.id, 0)").attribute(), "aws_subnet.a.id");
        assert_eq!(resolve(r#"lookup(var.amis, "eu")"#).attribute(), "var.amis.eu");
        assert_eq!(resolve("[aws_eip.a.id, aws_eip.b.id]").attribute(), "aws_eip.a.id");
        assert_eq!(resolve(r#""${aws_eip.a.id}""#).attribute(), "aws_eip.a.id");
        assert!(!resolve(r#""${aws_eip.a.id}-x""#).is_resolved());
        assert!(!resolve("1 + 2").is_resolved());
    }

    #[test]
    fn for_expression_narrows_collection() {
        assert_eq!(
            resolve("[for s in aws_subnet.private : s.id]").attribute(),
            "aws_subnet.private.id"
        );
        assert_eq!(
            resolve("{ for k, v in var.subnets : k => v.cidr }").attribute(),
            "var.subnets.cidr"
        );
        assert_eq!(
            resolve("[for s in var.names : upper(aws_eip.a.id)]").attribute(),
            "aws_eip.a.id"
        );
    }

    #[test]
    fn locals_are_inlined() {
        let (_dir, tree) = load_sources(&[(
            "main.tf",
            r#"
locals {
  vpc   = aws_vpc.main
  chain = local.vpc.cidr_block
  self  = local.self
}
"#,
        )]);

        let inlined = resolve_in(&tree, ModuleId::ROOT, "local.vpc.cidr_block");
        let direct = resolve_in(&tree, ModuleId::ROOT, "aws_vpc.main.cidr_block");
        assert_eq!(inlined, direct);

        assert_eq!(
            resolve_in(&tree, ModuleId::ROOT, "local.chain").attribute(),
            "aws_vpc.main.cidr_block"
        );
        assert!(!resolve_in(&tree, ModuleId::ROOT, "local.self").is_resolved());

        let missing = resolve_in(&tree, ModuleId::ROOT, "local.missing.x");
        assert_eq!(missing.root, Root::Local("missing".into()));
        assert_eq!(missing.path(), ["x"]);
    }

    #[test]
    fn module_outputs_are_inlined() {
        let (_dir, tree) = load_sources(&[
            ("main.tf", "module \"net\" {\n  source = \"./net\"\n}\n"),
            (
                "net/main.tf",
                "output \"cidr\" {\n  value = aws_vpc.main.cidr_block\n}\n",
            ),
        ]);

        let reference = resolve_in(&tree, ModuleId::ROOT, "module.net.cidr");
        assert_eq!(reference.root_kind(), "aws_vpc");
        assert_eq!(reference.name(), "main");
        assert_eq!(reference.path(), ["cidr_block"]);
        assert_eq!(Some(reference.module), tree.root().module_calls["net"].child);

        let unknown = resolve_in(&tree, ModuleId::ROOT, "module.other.value");
        assert_eq!(unknown.root_kind(), "module");
        assert_eq!(unknown.attribute(), "module.other.value");
    }

    #[test]
    fn cache_is_filled_by_module_outputs() {
        let (_dir, tree) = load_sources(&[
            ("main.tf", "module \"net\" {\n  source = \"./net\"\n}\n"),
            ("net/main.tf", "output \"id\" {\n  value = aws_vpc.main.id\n}\n"),
        ]);

        let expr: hcl_edit::expr::Expression = "module.net.id".parse().unwrap();
        let expr = Expression::from(expr);
        let mut cache = ResolveCache::default();
        let mut resolver = Resolver::new(&tree, &mut cache);
        let first = resolver.resolve(ModuleId::ROOT, &expr);
        let second = resolver.resolve(ModuleId::ROOT, &expr);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }
}
