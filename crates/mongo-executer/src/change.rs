//! Change specification normalization
//!
//! Older drivers accepted a bare object as an update and replaced the whole
//! document with it. Current drivers reject that. Updates built here never rely on
//! either behaviour: a change without any recognized modifier is wrapped in `$set`.

use bson::{doc, Document};

/// Top-level keys that mark a change as already modifier-based.
pub const RECOGNIZED_MODIFIERS: [&str; 3] = ["$set", "$unset", "$rename"];

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedChange {
    AsGiven(Document),
    /// The original change, now under `$set`
    WrappedInSet(Document),
}

impl NormalizedChange {
    pub fn was_wrapped(&self) -> bool {
        matches!(self, NormalizedChange::WrappedInSet(_))
    }

    pub fn update(&self) -> &Document {
        match self {
            NormalizedChange::AsGiven(update) | NormalizedChange::WrappedInSet(update) => update,
        }
    }

    pub fn into_update(self) -> Document {
        match self {
            NormalizedChange::AsGiven(update) | NormalizedChange::WrappedInSet(update) => update,
        }
    }
}

pub fn has_recognized_modifier(change: &Document) -> bool {
    RECOGNIZED_MODIFIERS
        .iter()
        .any(|modifier| change.contains_key(modifier))
}

pub fn normalize_change(change: &Document) -> NormalizedChange {
    if has_recognized_modifier(change) {
        NormalizedChange::AsGiven(change.clone())
    } else {
        NormalizedChange::WrappedInSet(doc! { "$set": change.clone() })
    }
}
