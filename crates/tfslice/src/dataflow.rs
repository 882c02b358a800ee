//! dataflow across module call boundaries
//!
//! A module call input `name = <expr>` feeds `var.name` of the child. Everything inside the
//! child subtree that consumes `var.name` therefore consumes `<expr>` as well. These
//! functions compute that relation without touching the tree, the loader applies the
//! returned [DataflowEdge]s.
use crate::module::{ModuleCall, ModuleId, ModuleTree};
use crate::reference::{AttributeReference, RelativeAttributeReference, Root};
use crate::resolve::{ResolveCache, Resolver};

/// Change to apply to the parent module of a call
#[derive(Debug, Clone, PartialEq)]
pub enum DataflowEdge {
    /// the call input passes a parent variable through: index it in the parent's `Inputs`
    Input {
        variable: String,
        path: Vec<String>,
        reference: RelativeAttributeReference,
    },
    /// the call input is fed by a resource: register `referrer` on `target`
    Reference {
        target: AttributeReference,
        referrer: AttributeReference,
    },
}

/// Terminal attributes in the subtree of `module` that consume `var.<variable>`
///
/// Each result carries the path inside the variable that flows into it.
#[tracing::instrument(level = "trace", skip(tree, cache))]
pub fn resolve_variable(
    tree: &ModuleTree,
    cache: &mut ResolveCache,
    module: ModuleId,
    variable: &str,
) -> Vec<RelativeAttributeReference> {
    let Some(current) = tree.get(module) else {
        return vec![];
    };
    let is_variable = |reference: &AttributeReference| {
        reference.module == module
            && matches!(&reference.root, Root::Variable(name) if name == variable)
    };

    let mut consumers = vec![];
    for resource in current.all_resources() {
        for (path, reference) in &resource.inputs {
            if is_variable(reference) {
                consumers.push(RelativeAttributeReference::new(
                    resource.attribute_reference(module, path),
                    reference.path.clone(),
                ));
            }
        }
    }

    for call in current.module_calls.values() {
        let Some(child) = call.child else {
            continue;
        };

        for (attr, expr) in &call.expressions {
            let reference = Resolver::new(tree, cache).resolve(module, expr);
            if !is_variable(&reference) {
                continue;
            }

            consumers.extend(
                resolve_variable(tree, cache, child, attr)
                    .into_iter()
                    .map(|consumer| consumer.prefixed(&reference.path)),
            );
        }
    }

    consumers
}

/// Follows one input of `call` into the child module
///
/// `expr` is resolved in `parent`. A pass-through of a parent variable becomes an
/// [DataflowEdge::Input], a resource or data source becomes a [DataflowEdge::Reference] per
/// consumer in the child subtree. Other roots cannot be followed.
#[tracing::instrument(level = "trace", skip(tree, cache, call, expr), fields(call=%call.name))]
pub fn resolve_module_call_input(
    tree: &ModuleTree,
    cache: &mut ResolveCache,
    parent: ModuleId,
    call: &ModuleCall,
    attr: &str,
    expr: &hcl::Expression,
) -> Vec<DataflowEdge> {
    let Some(child) = call.child else {
        tracing::debug!(source = call.source, "module call not resolved, input not followed");
        return vec![];
    };

    let source = Resolver::new(tree, cache).resolve(parent, expr);
    let consumers = resolve_variable(tree, cache, child, attr);

    let mut edges = Vec::with_capacity(consumers.len());
    for consumer in consumers {
        match &source.root {
            Root::Variable(variable) if source.module == parent => {
                let consumer = consumer.prefixed(&source.path);
                edges.push(DataflowEdge::Input {
                    variable: variable.clone(),
                    path: consumer.relative.clone(),
                    reference: consumer,
                });
            }
            Root::Resource { .. } | Root::Data { .. } => {
                let mut target = source.clone();
                target.extend_path(consumer.relative.iter().cloned());
                edges.push(DataflowEdge::Reference {
                    target,
                    referrer: consumer.reference,
                });
            }
            _ => {
                tracing::trace!(%source, %consumer, "input source cannot be followed");
            }
        }
    }

    edges
}
