//! resolved attribute references
//!
//! An [AttributeReference] is what an expression points at after resolution: a [Root] plus
//! the attribute path below it. The reference remembers the module it was resolved in as a
//! [ModuleId] handle into the [crate::module::ModuleTree] arena.
use crate::module::{ModuleId, ResourceMode};
use serde::Serializer;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Root {
    /// literal or an expression shape that cannot be followed
    Unresolved,
    /// `var.<name>`
    Variable(String),
    /// `local.<name>` whose binding was not available
    Local(String),
    /// `module.<name>` of a call whose child module is not (yet) loaded
    Module(String),
    /// `each.<path>`
    Each,
    /// `<type>.<name>`
    Resource { type_name: String, name: String },
    /// `data.<type>.<name>`
    Data { type_name: String, name: String },
    /// `output.<name>`, only used for the referring side of a back-edge
    Output(String),
}

impl Root {
    pub fn resource(
        mode: ResourceMode,
        type_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let type_name = type_name.into();
        let name = name.into();
        match mode {
            ResourceMode::Managed => Root::Resource { type_name, name },
            ResourceMode::Data => Root::Data { type_name, name },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeReference {
    pub module: ModuleId,
    pub root: Root,
    pub path: Vec<String>,
}

impl AttributeReference {
    pub fn new(module: ModuleId, root: Root, path: Vec<String>) -> Self {
        Self { module, root, path }
    }

    pub fn unresolved(module: ModuleId) -> Self {
        Self::new(module, Root::Unresolved, vec![])
    }

    pub fn is_resolved(&self) -> bool {
        self.root != Root::Unresolved
    }

    /// `true` for resource and data references
    pub fn is_terminal(&self) -> bool {
        matches!(self.root, Root::Resource { .. } | Root::Data { .. })
    }

    /// Classification of the reference origin
    ///
    /// `""` for unresolved references, the resource type for managed resources.
    pub fn root_kind(&self) -> &str {
        match &self.root {
            Root::Unresolved => "",
            Root::Variable(_) => "var",
            Root::Local(_) => "local",
            Root::Module(_) => "module",
            Root::Each => "each",
            Root::Resource { type_name, .. } => type_name,
            Root::Data { .. } => "data",
            Root::Output(_) => "output",
        }
    }

    pub fn name(&self) -> &str {
        match &self.root {
            Root::Unresolved | Root::Each => "",
            Root::Variable(name)
            | Root::Local(name)
            | Root::Module(name)
            | Root::Output(name)
            | Root::Resource { name, .. }
            | Root::Data { name, .. } => name,
        }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Dotted string form, e.g. `aws_vpc.main.cidr_block` or `data.aws_ami.ubuntu.id`
    pub fn attribute(&self) -> String {
        let mut segments: Vec<&str> = vec![];
        match &self.root {
            Root::Unresolved => {}
            Root::Each => segments.push("each"),
            Root::Data { type_name, name } => {
                segments.extend(["data", type_name.as_str(), name.as_str()])
            }
            Root::Resource { type_name, name } => {
                segments.push(type_name);
                if !name.is_empty() {
                    segments.push(name);
                }
            }
            other => {
                segments.push(self.root_kind());
                if let Root::Variable(name)
                | Root::Local(name)
                | Root::Module(name)
                | Root::Output(name) = other
                {
                    if !name.is_empty() {
                        segments.push(name);
                    }
                }
            }
        }
        segments.extend(self.path.iter().map(String::as_str));
        segments.join(".")
    }

    /// Appends path segments, skipping empty ones
    pub fn extend_path<I, S>(&mut self, segments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path.extend(
            segments
                .into_iter()
                .map(Into::into)
                .filter(|segment: &String| !segment.is_empty()),
        );
    }

    /// Combines two references written into the same place, the resolved one wins
    ///
    /// An unresolved `other` only contributes its path (a computed attribute name).
    pub fn merge(mut self, other: AttributeReference) -> AttributeReference {
        if other.is_resolved() {
            return other;
        }

        self.path.extend(other.path);
        self
    }
}

impl std::fmt::Display for AttributeReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.attribute())
    }
}

impl serde::ser::Serialize for AttributeReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.attribute())
    }
}

/// Terminal reference reached through one or more module-call boundaries
///
/// `relative` is the path inside the variable that flows into `reference`. It grows at
/// every boundary crossed on the way up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct RelativeAttributeReference {
    pub reference: AttributeReference,
    pub relative: Vec<String>,
}

impl RelativeAttributeReference {
    pub fn new(reference: AttributeReference, relative: Vec<String>) -> Self {
        Self {
            reference,
            relative,
        }
    }

    /// Base path followed by the relative suffix
    pub fn full_path(&self) -> Vec<String> {
        self.reference
            .path
            .iter()
            .chain(self.relative.iter())
            .cloned()
            .collect()
    }

    /// Prefixes the relative path, used when crossing another boundary upwards
    pub fn prefixed(mut self, prefix: &[String]) -> Self {
        self.relative.splice(0..0, prefix.iter().cloned());
        self
    }
}

impl std::fmt::Display for RelativeAttributeReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reference)?;
        if !self.relative.is_empty() {
            write!(f, " (via {})", self.relative.join("."))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reference(root: Root, path: &[&str]) -> AttributeReference {
        AttributeReference::new(
            ModuleId::ROOT,
            root,
            path.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn dotted_forms() {
        let resource = reference(
            Root::Resource {
                type_name: "aws_vpc".into(),
                name: "main".into(),
            },
            &["cidr_block"],
        );
        assert_eq!(resource.attribute(), "aws_vpc.main.cidr_block");
        assert_eq!(resource.root_kind(), "aws_vpc");

        let data = reference(
            Root::Data {
                type_name: "aws_ami".into(),
                name: "ubuntu".into(),
            },
            &["id"],
        );
        assert_eq!(data.attribute(), "data.aws_ami.ubuntu.id");
        assert_eq!(data.root_kind(), "data");

        assert_eq!(reference(Root::Variable("ami".into()), &[]).attribute(), "var.ami");
        assert_eq!(reference(Root::Each, &["value", "id"]).attribute(), "each.value.id");
        assert_eq!(reference(Root::Unresolved, &["literal"]).attribute(), "literal");
    }

    #[test]
    fn merge_prefers_resolved() {
        let map = reference(Root::Variable("amis".into()), &[]);
        let key = reference(Root::Unresolved, &["us-east-1"]);
        assert_eq!(map.clone().merge(key).attribute(), "var.amis.us-east-1");

        let resolved_key = reference(Root::Variable("region".into()), &[]);
        assert_eq!(map.merge(resolved_key).attribute(), "var.region");
    }

    #[test]
    fn relative_paths() {
        let terminal = reference(
            Root::Resource {
                type_name: "aws_instance".into(),
                name: "a".into(),
            },
            &["ami"],
        );
        let relative = RelativeAttributeReference::new(terminal, vec!["id".into()])
            .prefixed(&["image".to_string()]);

        assert_eq!(relative.relative, vec!["image", "id"]);
        assert_eq!(relative.full_path(), vec!["ami", "image", "id"]);
    }
}
