//! visitor pattern helpers
mod visit_traversals;
pub use visit_traversals::VisitTraversals;

/// Visitor that looks at its subjects
pub trait Visit<T> {
    fn visit(&mut self, value: &T);
}

// blanket impl for FnMut
impl<T, F> Visit<T> for F
where
    F: FnMut(&T),
{
    fn visit(&mut self, value: &T) {
        self(value)
    }
}
