//! expression shapes understood by the resolver
//!
//! [hcl::Expression] is lowered into [RefExpr], a closed set of the shapes that matter for
//! reference resolution. Everything that cannot point anywhere becomes [RefExpr::Opaque].
//!
//! Traversals are split the way the configuration language groups them:
//!
//! | source                | shape                                          |
//! |-----------------------|------------------------------------------------|
//! | `a.b.c`               | `Scope { root: a, path: [b, c] }`              |
//! | `a.b[0].c`            | `Relative { Index { Scope(a.b) }, [c] }`       |
//! | `a.b[*].c`            | `Splat { source: Scope(a.b), each: [c] }`      |
//! | `f(x).c`              | `Relative { Call(f), [c] }`                    |
use crate::util::TraversalExt;
use hcl::template::Element;
use hcl::{Expression, Traversal, TraversalOperator};

#[derive(Debug, Clone, PartialEq)]
pub enum RefExpr {
    /// dotted traversal starting at a variable
    Scope { root: String, path: Vec<String> },
    Call { name: String, args: Vec<RefExpr> },
    /// `source[*].each...`
    Splat { source: Box<RefExpr>, each: Vec<String> },
    /// `collection[key]`, the key is not kept
    Index { collection: Box<RefExpr> },
    /// attribute access on something that is not a plain variable
    Relative { source: Box<RefExpr>, path: Vec<String> },
    /// only the branch taken when the condition holds
    Conditional { true_expr: Box<RefExpr> },
    For {
        key_var: Option<String>,
        value_var: String,
        collection: Box<RefExpr>,
        value: Box<RefExpr>,
    },
    /// string without interpolation
    Literal(String),
    /// `"${expr}"`
    Wrap(Box<RefExpr>),
    Tuple(Vec<RefExpr>),
    Opaque,
}

impl From<&Expression> for RefExpr {
    fn from(expr: &Expression) -> Self {
        match expr {
            Expression::Variable(var) => RefExpr::Scope {
                root: var.to_string(),
                path: vec![],
            },
            Expression::Traversal(traversal) => lower_traversal(traversal),
            Expression::FuncCall(func) => RefExpr::Call {
                name: func.name.to_string(),
                args: func.args.iter().map(RefExpr::from).collect(),
            },
            Expression::Parenthesis(inner) => RefExpr::from(inner.as_ref()),
            Expression::Conditional(cond) => RefExpr::Conditional {
                true_expr: Box::new(RefExpr::from(&cond.true_expr)),
            },
            Expression::ForExpr(for_expr) => RefExpr::For {
                key_var: for_expr.key_var.as_ref().map(|ident| ident.to_string()),
                value_var: for_expr.value_var.to_string(),
                collection: Box::new(RefExpr::from(&for_expr.collection_expr)),
                value: Box::new(RefExpr::from(&for_expr.value_expr)),
            },
            Expression::String(s) => RefExpr::Literal(s.clone()),
            Expression::TemplateExpr(template_expr) => {
                let Ok(template) = hcl::Template::from_expr(template_expr) else {
                    return RefExpr::Opaque;
                };
                match template.elements() {
                    [Element::Interpolation(interpolation)] => {
                        RefExpr::Wrap(Box::new(RefExpr::from(&interpolation.expr)))
                    }
                    elements => {
                        let mut literal = String::new();
                        for element in elements {
                            let Element::Literal(part) = element else {
                                return RefExpr::Opaque;
                            };
                            literal.push_str(part);
                        }
                        RefExpr::Literal(literal)
                    }
                }
            }
            Expression::Array(elements) => {
                RefExpr::Tuple(elements.iter().map(RefExpr::from).collect())
            }
            _ => RefExpr::Opaque,
        }
    }
}

fn lower_traversal(traversal: &Traversal) -> RefExpr {
    let longest_path = traversal.get_longest_path();
    let (mut current, operators) = match longest_path.split_first() {
        Some((root, path)) => (
            RefExpr::Scope {
                root: root.to_string(),
                path: path.iter().map(|segment| segment.to_string()).collect(),
            },
            &traversal.operators[path.len()..],
        ),
        None => (RefExpr::from(&traversal.expr), traversal.operators.as_slice()),
    };

    for (index, operator) in operators.iter().enumerate() {
        current = match operator {
            TraversalOperator::GetAttr(ident) => match current {
                RefExpr::Relative { source, mut path } => {
                    path.push(ident.to_string());
                    RefExpr::Relative { source, path }
                }
                other => RefExpr::Relative {
                    source: Box::new(other),
                    path: vec![ident.to_string()],
                },
            },
            TraversalOperator::Index(_) | TraversalOperator::LegacyIndex(_) => RefExpr::Index {
                collection: Box::new(current),
            },
            TraversalOperator::AttrSplat | TraversalOperator::FullSplat => {
                let each = operators[index + 1..]
                    .iter()
                    .filter_map(|operator| match operator {
                        TraversalOperator::GetAttr(ident) => Some(ident.to_string()),
                        _ => None,
                    })
                    .collect();
                return RefExpr::Splat {
                    source: Box::new(current),
                    each,
                };
            }
        };
    }

    current
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lower(source: &str) -> RefExpr {
        let expr: hcl_edit::expr::Expression = source.parse().expect("expression must parse");
        RefExpr::from(&Expression::from(expr))
    }

    fn scope(root: &str, path: &[&str]) -> RefExpr {
        RefExpr::Scope {
            root: root.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn dotted_traversal() {
        assert_eq!(lower("aws_vpc.main.cidr_block"), scope("aws_vpc", &["main", "cidr_block"]));
        assert_eq!(lower("var.name"), scope("var", &["name"]));
        assert_eq!(lower("count"), scope("count", &[]));
    }

    #[test]
    fn index_then_attribute() {
        assert_eq!(
            lower("aws_subnet.private[0].id"),
            RefExpr::Relative {
                source: Box::new(RefExpr::Index {
                    collection: Box::new(scope("aws_subnet", &["private"]))
                }),
                path: vec!["id".into()],
            }
        );
    }

    #[test]
    fn splat() {
        assert_eq!(
            lower("aws_subnet.private[*].id"),
            RefExpr::Splat {
                source: Box::new(scope("aws_subnet", &["private"])),
                each: vec!["id".into()],
            }
        );
    }

    #[test]
    fn templates() {
        assert_eq!(lower(r#""literal""#), RefExpr::Literal("literal".into()));
        assert_eq!(
            lower(r#""${var.name}""#),
            RefExpr::Wrap(Box::new(scope("var", &["name"])))
        );
        assert_eq!(lower(r#""${var.name}-suffix""#), RefExpr::Opaque);
    }

    #[test]
    fn for_expression() {
        assert_eq!(
            lower("[for s in aws_subnet.private : s.id]"),
            RefExpr::For {
                key_var: None,
                value_var: "s".into(),
                collection: Box::new(scope("aws_subnet", &["private"])),
                value: Box::new(scope("s", &["id"])),
            }
        );
    }

    #[test]
    fn conditional_keeps_true_branch() {
        assert_eq!(
            lower("var.enabled ? aws_eip.a.id : null"),
            RefExpr::Conditional {
                true_expr: Box::new(scope("aws_eip", &["a", "id"])),
            }
        );
    }
}
