//! non-fatal problems found while loading modules
//!
//! Diagnostics are collected for the whole recursive load and never stop it. The caller
//! decides whether an error level entry makes the result unusable.
use crate::documents::SourcePos;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<SourcePos>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{level}: {}", self.summary)?;
        if let Some(pos) = &self.pos {
            write!(f, " ({}:{})", pos.file.display(), pos.start_line)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n  {detail}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn error(&mut self, summary: impl Into<String>, pos: impl Into<Option<SourcePos>>) {
        self.push(Severity::Error, summary.into(), None, pos.into());
    }

    pub fn error_with_detail(
        &mut self,
        summary: impl Into<String>,
        detail: impl Into<String>,
        pos: impl Into<Option<SourcePos>>,
    ) {
        self.push(
            Severity::Error,
            summary.into(),
            Some(detail.into()),
            pos.into(),
        );
    }

    pub fn warning(&mut self, summary: impl Into<String>, pos: impl Into<Option<SourcePos>>) {
        self.push(Severity::Warning, summary.into(), None, pos.into());
    }

    fn push(
        &mut self,
        severity: Severity,
        summary: String,
        detail: Option<String>,
        pos: Option<SourcePos>,
    ) {
        let diagnostic = Diagnostic {
            severity,
            summary,
            detail,
            pos,
        };
        tracing::trace!(%diagnostic, "diagnostic recorded");
        self.0.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.0
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
