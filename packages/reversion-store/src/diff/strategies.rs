//! Built-in diff strategies, one per field kind

use std::collections::BTreeSet;

use super::text::{diff_text, render_html};
use super::{DiffContext, DiffStrategy, FieldDiff, RelatedObject, RenderedDiff};
use crate::domain::{FieldDescriptor, FieldValue, ObjectRef};
use crate::error::Result;

/// Display string of a referenced object, falling back to `"{type} object ({pk})"`
fn related_repr(ctx: &DiffContext<'_>, object: &ObjectRef) -> Result<String> {
    let live = ctx.objects.get(object)?;
    let schema = ctx.objects.catalog().get(&object.object_type);
    Ok(match (live, schema) {
        (Some(instance), Some(schema)) => schema.repr(&instance),
        _ => format!("{} object ({})", object.object_type, object.object_id),
    })
}

/// Default strategy: token diff of the text renderings
///
/// Fields with a choice set compare labels instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarDiff;

impl DiffStrategy for ScalarDiff {
    fn diff(
        &self,
        field: &FieldDescriptor,
        old: &FieldValue,
        new: &FieldValue,
        _ctx: &DiffContext<'_>,
    ) -> Result<FieldDiff> {
        let changed = old != new;
        let rendered = if field.choices.is_some() {
            let label = |value: &FieldValue| {
                (!value.is_null()).then(|| {
                    field
                        .choice_label(value)
                        .map(str::to_string)
                        .unwrap_or_else(|| value.display())
                })
            };
            RenderedDiff::Labels {
                old: label(old),
                new: label(new),
            }
        } else {
            let edits = diff_text(&old.display(), &new.display());
            let html = render_html(&edits);
            RenderedDiff::Text { edits, html }
        };
        Ok(FieldDiff::new(field, changed, rendered))
    }
}

/// Raw old/new pair (booleans, dates, datetimes)
///
/// Values pass through unmodified; rendering is left to the consumer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueDiff;

impl DiffStrategy for ValueDiff {
    fn diff(
        &self,
        field: &FieldDescriptor,
        old: &FieldValue,
        new: &FieldValue,
        _ctx: &DiffContext<'_>,
    ) -> Result<FieldDiff> {
        Ok(FieldDiff::new(
            field,
            old != new,
            RenderedDiff::Values {
                old: old.clone(),
                new: new.clone(),
            },
        ))
    }
}

/// Single foreign reference: compares identities, renders display strings
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceDiff;

impl DiffStrategy for ReferenceDiff {
    fn diff(
        &self,
        field: &FieldDescriptor,
        old: &FieldValue,
        new: &FieldValue,
        ctx: &DiffContext<'_>,
    ) -> Result<FieldDiff> {
        let changed = old.as_reference() != new.as_reference();
        let resolve = |value: &FieldValue| -> Result<Option<String>> {
            match (field.kind.target(), value.as_reference()) {
                (Some(target), Some(pk)) => {
                    related_repr(ctx, &ObjectRef::new(target, pk)).map(Some)
                }
                _ => Ok(None),
            }
        };
        Ok(FieldDiff::new(
            field,
            changed,
            RenderedDiff::Pair {
                old: resolve(old)?,
                new: resolve(new)?,
            },
        ))
    }
}

/// Many-valued relation: set difference in both directions
#[derive(Debug, Clone, Copy, Default)]
pub struct ManyDiff;

impl DiffStrategy for ManyDiff {
    fn diff(
        &self,
        field: &FieldDescriptor,
        old: &FieldValue,
        new: &FieldValue,
        ctx: &DiffContext<'_>,
    ) -> Result<FieldDiff> {
        let old_set: BTreeSet<&str> = old.referenced_pks().into_iter().collect();
        let new_set: BTreeSet<&str> = new.referenced_pks().into_iter().collect();
        let target = field.kind.target().unwrap_or(field.name.as_str());

        let resolve = |pks: Vec<&&str>| -> Result<Vec<RelatedObject>> {
            pks.into_iter()
                .map(|pk| {
                    let object = ObjectRef::new(target, *pk);
                    let repr = related_repr(ctx, &object)?;
                    Ok(RelatedObject { object, repr })
                })
                .collect()
        };

        let removed = resolve(old_set.difference(&new_set).collect())?;
        let added = resolve(new_set.difference(&old_set).collect())?;
        let changed = !removed.is_empty() || !added.is_empty();

        Ok(FieldDiff::new(
            field,
            changed,
            RenderedDiff::Members { removed, added },
        ))
    }
}

/// Media reference: previews from the configured media storage
///
/// Without a media storage the rendering is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaDiff;

impl DiffStrategy for MediaDiff {
    fn diff(
        &self,
        field: &FieldDescriptor,
        old: &FieldValue,
        new: &FieldValue,
        ctx: &DiffContext<'_>,
    ) -> Result<FieldDiff> {
        let changed = old != new && !(old.is_absent() && new.is_absent());
        let rendered = match ctx.media {
            Some(storage) => {
                let preview = |value: &FieldValue| match value {
                    FieldValue::Media(name) if !name.is_empty() => storage.resolve(name),
                    _ => None,
                };
                RenderedDiff::Media {
                    old: preview(old),
                    new: preview(new),
                }
            }
            None => RenderedDiff::Empty,
        };
        Ok(FieldDiff::new(field, changed, rendered))
    }
}
