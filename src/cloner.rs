//! Cross-document object graph cloning.
//!
//! Naive deep copy of a PDF subgraph drags the whole file along (page trees
//! link back to their parents) and breaks on cycles. The cloner walks a
//! subgraph by kind, memoizes every indirect object it has copied, and runs
//! each object through an ordered filter list that can veto individual
//! dictionary entries or array items before the copy and patch the clone
//! afterwards.

use std::collections::HashMap;

use log::debug;

use crate::document::Document;
use crate::error::Result;
use crate::object::{ContextId, Object, ObjectRef};

/// Cap on parent-chain walks while inlining inherited attributes.
const MAX_ANCESTRY_DEPTH: usize = 64;

/// Page attributes inheritable from ancestor nodes of the page tree.
const INHERITABLE_PAGE_KEYS: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// One clone operation: the two documents and the memo of already copied
/// objects, keyed by source number pair.
pub struct CloneContext<'a> {
    /// Document the subgraph is read from.
    pub source: &'a mut Document,
    /// Document the copies are registered into.
    pub target: &'a mut Document,
    cloned: HashMap<(u32, u16), ObjectRef>,
}

impl<'a> CloneContext<'a> {
    /// Start a clone operation between two documents.
    pub fn new(source: &'a mut Document, target: &'a mut Document) -> Self {
        Self {
            source,
            target,
            cloned: HashMap::new(),
        }
    }
}

/// Policy hook consulted while cloning.
///
/// Filters are tried in order; the first whose `matches` accepts the source
/// object governs it, and a built-in no-op governs everything unmatched.
pub trait CloneFilter {
    /// Whether this filter governs the given source object. Predicates
    /// inspect structural shape, not resolved semantics.
    fn matches(&self, source: &Object) -> bool;

    /// Veto hook per dictionary entry; return false to drop the entry from
    /// the clone.
    fn copy_entry(&self, key: &str) -> bool {
        let _ = key;
        true
    }

    /// Veto hook per array item.
    fn copy_item(&self, index: usize) -> bool {
        let _ = index;
        true
    }

    /// Post-copy hook, called with the source payload and the finished
    /// clone of an indirect object before it lands in the target.
    fn finish(
        &self,
        cloner: &Cloner,
        ctx: &mut CloneContext<'_>,
        source: &Object,
        clone: &mut Object,
    ) -> Result<()> {
        let _ = (cloner, ctx, source, clone);
        Ok(())
    }
}

struct NoopFilter;

impl CloneFilter for NoopFilter {
    fn matches(&self, _source: &Object) -> bool {
        true
    }
}

/// Deep-copies subgraphs between documents.
pub struct Cloner {
    filters: Vec<Box<dyn CloneFilter>>,
    fallback: NoopFilter,
}

impl Default for Cloner {
    fn default() -> Self {
        Cloner::new()
    }
}

impl Cloner {
    /// Cloner with the built-in page and annotation filters.
    pub fn new() -> Self {
        Cloner {
            filters: vec![Box::new(PageCloneFilter), Box::new(AnnotationCloneFilter)],
            fallback: NoopFilter,
        }
    }

    /// Cloner with a custom filter list.
    pub fn with_filters(filters: Vec<Box<dyn CloneFilter>>) -> Self {
        Cloner {
            filters,
            fallback: NoopFilter,
        }
    }

    /// Append a filter; it is consulted after the existing ones.
    pub fn add_filter(&mut self, filter: Box<dyn CloneFilter>) {
        self.filters.push(filter);
    }

    fn filter_for(&self, source: &Object) -> &dyn CloneFilter {
        self.filters
            .iter()
            .map(|f| f.as_ref())
            .find(|f| f.matches(source))
            .unwrap_or(&self.fallback)
    }

    /// Clone the indirect object behind `reference` from the source into
    /// the target document, returning the target-side reference.
    ///
    /// Memoized per context: a source object is copied at most once, which
    /// also terminates cycles.
    pub fn clone_reference(
        &self,
        ctx: &mut CloneContext<'_>,
        reference: ObjectRef,
    ) -> Result<ObjectRef> {
        if let Some(&done) = ctx.cloned.get(&(reference.number, reference.generation)) {
            return Ok(done);
        }
        // Reserve the target slot first so cycles resolve to it.
        let slot = ctx.target.register(Object::Null);
        ctx.cloned
            .insert((reference.number, reference.generation), slot);
        debug!("cloning {} into slot {}", reference, slot.number);

        let source = ctx.source.resolve(reference)?;
        let mut clone = self.clone_object(ctx, &source)?;
        self.filter_for(&source).finish(self, ctx, &source, &mut clone)?;
        ctx.target.update(slot, clone)?;
        Ok(slot)
    }

    /// Clone a direct value. References into the target document copy
    /// shallowly; everything else is copied deeply, with the governing
    /// filter's vetoes applied.
    pub fn clone_object(&self, ctx: &mut CloneContext<'_>, source: &Object) -> Result<Object> {
        match source {
            Object::Reference(r) => {
                if r.context == ctx.target.context && r.context != ContextId::DETACHED {
                    return Ok(Object::Reference(*r));
                }
                Ok(Object::Reference(self.clone_reference(ctx, *r)?))
            },
            Object::Array(items) => {
                let filter = self.filter_for(source);
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if filter.copy_item(index) {
                        out.push(self.clone_object(ctx, item)?);
                    }
                }
                Ok(Object::Array(out))
            },
            Object::Dictionary(dict) => {
                Ok(Object::Dictionary(self.clone_dict(ctx, source, dict)?))
            },
            Object::Stream { dict, data, .. } => {
                let dict = self.clone_dict(ctx, source, dict)?;
                Ok(Object::stream(dict, data.clone()))
            },
            scalar => Ok(scalar.clone()),
        }
    }

    fn clone_dict(
        &self,
        ctx: &mut CloneContext<'_>,
        source: &Object,
        dict: &HashMap<String, Object>,
    ) -> Result<HashMap<String, Object>> {
        let filter = self.filter_for(source);
        let mut out = HashMap::with_capacity(dict.len());
        for (key, value) in dict {
            if !filter.copy_entry(key) {
                debug!("dropping /{} while cloning", key);
                continue;
            }
            out.insert(key.clone(), self.clone_object(ctx, value)?);
        }
        Ok(out)
    }
}

/// Governs page-shaped dictionaries: the parent back-link stays behind and
/// inherited attributes are inlined so the page stands alone in the target.
pub struct PageCloneFilter;

impl CloneFilter for PageCloneFilter {
    fn matches(&self, source: &Object) -> bool {
        match source.as_dict() {
            Some(dict) => dict.contains_key("Parent") && dict.contains_key("Contents"),
            None => false,
        }
    }

    fn copy_entry(&self, key: &str) -> bool {
        key != "Parent"
    }

    fn finish(
        &self,
        cloner: &Cloner,
        ctx: &mut CloneContext<'_>,
        source: &Object,
        clone: &mut Object,
    ) -> Result<()> {
        let Some(clone_dict) = clone.as_dict_mut() else {
            return Ok(());
        };
        for key in INHERITABLE_PAGE_KEYS {
            if clone_dict.contains_key(key) {
                continue;
            }
            let mut inherited = None;
            let mut current = source.clone();
            for _ in 0..MAX_ANCESTRY_DEPTH {
                let parent = match current
                    .as_dict()
                    .and_then(|d| d.get("Parent"))
                    .and_then(Object::as_reference)
                {
                    Some(r) => ctx.source.resolve(r)?,
                    None => break,
                };
                if let Some(value) = parent.as_dict().and_then(|d| d.get(key)) {
                    inherited = Some(value.clone());
                    break;
                }
                current = parent;
            }
            if let Some(value) = inherited {
                debug!("inlining inherited /{} into cloned page", key);
                let value = cloner.clone_object(ctx, &value)?;
                clone_dict.insert(key.to_string(), value);
            }
        }
        Ok(())
    }
}

/// Governs annotation-shaped dictionaries (a `/Subtype` name next to a
/// four-number `/Rect`): the page back-link `/P` stays behind.
pub struct AnnotationCloneFilter;

impl CloneFilter for AnnotationCloneFilter {
    fn matches(&self, source: &Object) -> bool {
        let Some(dict) = source.as_dict() else {
            return false;
        };
        let has_subtype = matches!(dict.get("Subtype"), Some(Object::Name(_)));
        let has_rect = dict
            .get("Rect")
            .and_then(Object::as_array)
            .map(|items| items.len() == 4 && items.iter().all(|i| i.as_number().is_some()))
            .unwrap_or(false);
        has_subtype && has_rect
    }

    fn copy_entry(&self, key: &str) -> bool {
        key != "P"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Version;

    fn dict(entries: &[(&str, Object)]) -> Object {
        Object::Dictionary(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_scalar_clone() {
        let mut source = Document::new(Version::default());
        let mut target = Document::new(Version::default());
        let r = source.register(Object::Integer(7));
        let mut ctx = CloneContext::new(&mut source, &mut target);
        let cloned = Cloner::new().clone_reference(&mut ctx, r).unwrap();
        assert_eq!(target.resolve(cloned).unwrap(), Object::Integer(7));
    }

    #[test]
    fn test_clone_is_memoized() {
        let mut source = Document::new(Version::default());
        let mut target = Document::new(Version::default());
        let shared = source.register(Object::Integer(1));
        let holder = source.register(Object::Array(vec![
            Object::Reference(shared),
            Object::Reference(shared),
        ]));
        let mut ctx = CloneContext::new(&mut source, &mut target);
        let cloned = Cloner::new().clone_reference(&mut ctx, holder).unwrap();
        let array = target.resolve(cloned).unwrap();
        let items = array.as_array().unwrap().to_vec();
        assert_eq!(items[0], items[1]);
    }

    #[test]
    fn test_cycle_terminates() {
        let mut source = Document::new(Version::default());
        let mut target = Document::new(Version::default());
        let a = source.register(Object::Null);
        let b = source.register(dict(&[("Other", Object::Reference(a))]));
        source
            .update(a, dict(&[("Other", Object::Reference(b))]))
            .unwrap();

        let mut ctx = CloneContext::new(&mut source, &mut target);
        let cloned_a = Cloner::new().clone_reference(&mut ctx, a).unwrap();
        let obj_a = target.resolve(cloned_a).unwrap();
        let to_b = obj_a.as_dict().unwrap()["Other"].as_reference().unwrap();
        let obj_b = target.resolve(to_b).unwrap();
        assert_eq!(
            obj_b.as_dict().unwrap()["Other"].as_reference().unwrap(),
            cloned_a
        );
    }

    #[test]
    fn test_page_filter_drops_parent() {
        let page = dict(&[
            ("Parent", Object::Reference(ObjectRef::detached(9, 0))),
            ("Contents", Object::Integer(0)),
        ]);
        assert!(PageCloneFilter.matches(&page));
        assert!(!PageCloneFilter.copy_entry("Parent"));
        assert!(PageCloneFilter.copy_entry("Resources"));
    }

    #[test]
    fn test_annotation_filter_shape() {
        let rect = Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(10.5),
            Object::Integer(20),
        ]);
        let annot = dict(&[("Subtype", Object::name("Link")), ("Rect", rect.clone())]);
        assert!(AnnotationCloneFilter.matches(&annot));
        assert!(!AnnotationCloneFilter.copy_entry("P"));

        let short_rect = dict(&[
            ("Subtype", Object::name("Link")),
            ("Rect", Object::Array(vec![Object::Integer(0)])),
        ]);
        assert!(!AnnotationCloneFilter.matches(&short_rect));
    }

    #[test]
    fn test_target_context_reference_is_shallow() {
        let mut source = Document::new(Version::default());
        let mut target = Document::new(Version::default());
        let local = target.register(Object::Integer(5));
        let holder = source.register(Object::Array(vec![Object::Integer(1)]));
        // Patch the source array to hold a target-context reference.
        source
            .update(holder, Object::Array(vec![Object::Reference(local)]))
            .unwrap();

        let mut ctx = CloneContext::new(&mut source, &mut target);
        let cloned = Cloner::new().clone_reference(&mut ctx, holder).unwrap();
        let array = target.resolve(cloned).unwrap();
        assert_eq!(array.as_array().unwrap()[0], Object::Reference(local));
    }
}
