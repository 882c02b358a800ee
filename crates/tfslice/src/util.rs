use hcl::{Expression, Traversal, TraversalOperator};
use std::path::{Component, Path, PathBuf};

pub(crate) trait TraversalExt {
    /// Root variable followed by the leading attribute names, e.g. `a.b.c` for `a.b.c[0].d`
    ///
    /// Empty when the traversal does not start at a variable.
    fn get_longest_path(&self) -> Vec<&str>;
}

impl TraversalExt for Traversal {
    fn get_longest_path(&self) -> Vec<&str> {
        let Expression::Variable(var) = &self.expr else {
            return vec![];
        };

        let mut path = vec![var.as_str()];
        for operator in &self.operators {
            let TraversalOperator::GetAttr(ident) = operator else {
                break;
            };

            path.push(ident.as_str());
        }

        path
    }
}

/// Removes `.` and resolves `..` without touching the file system
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path leading from directory `from` to `to`, both absolute
pub(crate) fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from = normalize(from);
    let to = normalize(to);

    let from_components: Vec<_> = from.components().collect();
    let to_components: Vec<_> = to.components().collect();
    let common = from_components
        .iter()
        .zip(&to_components)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from_components.len() {
        relative.push("..");
    }
    for component in &to_components[common..] {
        relative.push(component.as_os_str());
    }
    relative
}

/// Module source string for a local directory, always starting with `./` or `../`
pub(crate) fn local_module_source(relative: &Path) -> String {
    let rendered = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    if rendered.is_empty() {
        "./".to_string()
    } else if rendered.starts_with("..") {
        rendered
    } else {
        format!("./{rendered}")
    }
}

/// `./` and `../` module sources refer to directories on disk
pub(crate) fn is_local_source(source: &str) -> bool {
    source.starts_with("./") || source.starts_with("../")
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn longest_path() {
        let expr: hcl_edit::expr::Expression = "one.two[0].three".parse().unwrap();
        let Expression::Traversal(traversal) = Expression::from(expr) else {
            panic!("expected a traversal");
        };

        assert_eq!(traversal.get_longest_path(), vec!["one", "two"]);
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_path(Path::new("/out/env"), Path::new("/src/env/../modules/net")),
            PathBuf::from("../../src/modules/net")
        );
        assert_eq!(
            relative_path(Path::new("/src"), Path::new("/src/modules")),
            PathBuf::from("modules")
        );
    }

    #[test]
    fn module_sources() {
        assert_eq!(local_module_source(Path::new("modules/net")), "./modules/net");
        assert_eq!(local_module_source(Path::new("../net")), "../net");
        assert_eq!(local_module_source(Path::new("")), "./");
        assert!(is_local_source("../net"));
        assert!(!is_local_source("terraform-aws-modules/vpc/aws"));
    }
}
