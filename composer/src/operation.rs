use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use weft::tag::Tag;

use crate::error::Location;
use crate::scope::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Append,
    Replace,
}

/// A run of unexpanded sibling tags together with the scope they close over.
#[derive(Clone)]
pub struct Batch {
    tags: Arc<[Tag]>,
    range: Range<usize>,
    pub scope: Arc<Scope>,
}

impl Batch {
    pub fn new(tags: Arc<[Tag]>, range: Range<usize>, scope: Arc<Scope>) -> Self {
        Batch { tags, range, scope }
    }

    pub fn whole(tags: Arc<[Tag]>, scope: Arc<Scope>) -> Self {
        let range = 0..tags.len();
        Batch::new(tags, range, scope)
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags[self.range.clone()]
    }

    /// Extend this batch with `next` when it continues the same run of
    /// siblings in the same scope.
    fn try_extend(&mut self, next: &Batch) -> bool {
        let contiguous = Arc::ptr_eq(&self.tags, &next.tags)
            && Arc::ptr_eq(&self.scope, &next.scope)
            && self.range.end == next.range.start;
        if contiguous {
            self.range.end = next.range.end;
        }
        contiguous
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.tags().iter().map(|t| t.name.as_str()).collect();
        f.debug_struct("Batch").field("tags", &names).finish()
    }
}

/// Caller-supplied content waiting for the block it targets.
#[derive(Debug, Clone)]
pub struct Operation {
    pub target: String,
    pub kind: OperationKind,
    pub batches: Vec<Batch>,
    pub consumed: bool,
    pub origin: Option<Location>,
}

impl Operation {
    pub fn new(
        target: impl Into<String>,
        kind: OperationKind,
        batch: Batch,
        origin: Option<Location>,
    ) -> Self {
        Operation {
            target: target.into(),
            kind,
            batches: vec![batch],
            consumed: false,
            origin,
        }
    }

    /// Combine with an operation queued after this one for the same target.
    /// A later replace wins outright, appends concatenate.
    pub fn merge(mut self, later: Operation) -> Operation {
        match later.kind {
            OperationKind::Replace => later,
            OperationKind::Append => {
                for batch in later.batches {
                    self.push_batch(batch);
                }
                self.consumed = self.consumed && later.consumed;
                self
            }
        }
    }

    pub fn push_batch(&mut self, batch: Batch) {
        if let Some(last) = self.batches.last_mut() {
            if last.try_extend(&batch) {
                return;
            }
        }
        self.batches.push(batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft::parser::Parser;

    fn tags(src: &str) -> Arc<[Tag]> {
        Parser::new(src, 0).parse().unwrap().tags
    }

    fn op(kind: OperationKind, src: &str) -> Operation {
        Operation::new("t", kind, Batch::whole(tags(src), Scope::file(None)), None)
    }

    fn names(op: &Operation) -> Vec<String> {
        op.batches
            .iter()
            .flat_map(|b| b.tags().iter().map(|t| t.name.clone()))
            .collect()
    }

    #[test]
    fn appends_concatenate_in_order() {
        let a = op(OperationKind::Append, "<a/>");
        let b = op(OperationKind::Append, "<b/>");
        let c = op(OperationKind::Append, "<i/>");

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));
        assert_eq!(names(&left), ["a", "b", "i"]);
        assert_eq!(names(&right), ["a", "b", "i"]);
        assert_eq!(left.kind, OperationKind::Append);
    }

    #[test]
    fn replace_discards_earlier_appends() {
        let merged = op(OperationKind::Append, "<a/>")
            .merge(op(OperationKind::Append, "<b/>"))
            .merge(op(OperationKind::Replace, "<p/>"));
        assert_eq!(merged.kind, OperationKind::Replace);
        assert_eq!(names(&merged), ["p"]);
    }

    #[test]
    fn appends_after_replace_extend_it() {
        let merged = op(OperationKind::Replace, "<p/>").merge(op(OperationKind::Append, "<a/>"));
        assert_eq!(merged.kind, OperationKind::Replace);
        assert_eq!(names(&merged), ["p", "a"]);
    }

    #[test]
    fn contiguous_batches_coalesce() {
        let run = tags("<a/><b/><i/>");
        let scope = Scope::file(None);
        let mut op = Operation::new(
            "default",
            OperationKind::Append,
            Batch::new(run.clone(), 0..1, scope.clone()),
            None,
        );
        op.push_batch(Batch::new(run.clone(), 1..2, scope.clone()));
        op.push_batch(Batch::new(run, 2..3, Scope::sub(&scope)));
        assert_eq!(op.batches.len(), 2);
        assert_eq!(op.batches[0].tags().len(), 2);
        assert_eq!(names(&op), ["a", "b", "i"]);
    }
}
