//! Update modifiers for the in-memory store

use super::filter::{get_path, remove_path, set_path};
use bson::{Bson, Document};
use mongo_executer_common::{ExecuterError, Result};

/// Rejects updates that are not made only of modifiers, as current servers do.
pub(crate) fn check_update(update: &Document) -> Result<()> {
    if update.is_empty() || update.keys().any(|key| !key.starts_with('$')) {
        return Err(ExecuterError::Database(
            "update document requires atomic operators".to_string(),
        ));
    }
    Ok(())
}

fn operands<'a>(operator: &str, argument: &'a Bson) -> Result<&'a Document> {
    argument.as_document().ok_or_else(|| {
        ExecuterError::Database(format!(
            "Modifiers operate on fields but we found type {:?} instead for {}",
            argument.element_type(),
            operator
        ))
    })
}

fn overflow(path: &str) -> ExecuterError {
    ExecuterError::Database(format!(
        "Failed to apply $inc operations: integer overflow at '{}'",
        path
    ))
}

fn increment(current: Option<&Bson>, by: &Bson, path: &str) -> Result<Bson> {
    let sum = match (current, by) {
        (None, by) => by.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(n) => Bson::Int32(n),
            None => Bson::Int64(i64::from(*a) + i64::from(*b)),
        },
        (Some(Bson::Int32(a)), Bson::Int64(b)) => {
            Bson::Int64(i64::from(*a).checked_add(*b).ok_or_else(|| overflow(path))?)
        }
        (Some(Bson::Int64(a)), Bson::Int32(b)) => {
            Bson::Int64(a.checked_add(i64::from(*b)).ok_or_else(|| overflow(path))?)
        }
        (Some(Bson::Int64(a)), Bson::Int64(b)) => {
            Bson::Int64(a.checked_add(*b).ok_or_else(|| overflow(path))?)
        }
        (Some(Bson::Double(a)), Bson::Double(b)) => Bson::Double(a + b),
        (Some(Bson::Double(a)), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Some(Bson::Double(a)), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Some(Bson::Int32(a)), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Some(Bson::Int64(a)), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => {
            return Err(ExecuterError::Database(format!(
                "Cannot apply $inc to a value of non-numeric type at '{}'",
                path
            )));
        }
    };
    Ok(sum)
}

fn push(document: &mut Document, path: &str, value: &Bson) -> Result<()> {
    let additions = match value {
        Bson::Document(spec) if spec.contains_key("$each") => spec
            .get_array("$each")
            .map_err(|_| ExecuterError::Database("$each requires an array".to_string()))?
            .clone(),
        single => vec![single.clone()],
    };

    let mut items = match get_path(document, path) {
        None => Vec::new(),
        Some(Bson::Array(items)) => items.clone(),
        Some(other) => {
            return Err(ExecuterError::Database(format!(
                "The field '{}' must be an array but is of type {:?}",
                path,
                other.element_type()
            )));
        }
    };
    items.extend(additions);
    set_path(document, path, Bson::Array(items))
}

/// Applies `update` to a copy of `document`.
pub(crate) fn apply_update(document: &Document, update: &Document) -> Result<Document> {
    check_update(update)?;
    let mut updated = document.clone();

    for (operator, argument) in update {
        let fields = operands(operator, argument)?;
        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(&mut updated, path, value.clone())?,
                "$unset" => {
                    remove_path(&mut updated, path);
                }
                "$rename" => {
                    let target = value.as_str().ok_or_else(|| {
                        ExecuterError::Database(format!(
                            "The 'to' field for $rename must be a string: {}",
                            path
                        ))
                    })?;
                    if let Some(moved) = remove_path(&mut updated, path) {
                        set_path(&mut updated, target, moved)?;
                    }
                }
                "$push" => push(&mut updated, path, value)?,
                "$inc" => {
                    let sum = increment(get_path(&updated, path), value, path)?;
                    set_path(&mut updated, path, sum)?;
                }
                unknown => {
                    return Err(ExecuterError::Database(format!(
                        "Unknown modifier: {}",
                        unknown
                    )));
                }
            }
        }
    }

    if updated.get("_id") != document.get("_id") && document.contains_key("_id") {
        return Err(ExecuterError::Database(
            "Performing an update on the path '_id' would modify the immutable field '_id'"
                .to_string(),
        ));
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_bare_update_is_rejected() {
        let err = apply_update(&doc! { "a": 1 }, &doc! { "a": 2 }).unwrap_err();
        assert!(err.to_string().contains("atomic operators"));
        assert!(check_update(&doc! {}).is_err());
    }

    #[test]
    fn test_set_unset_rename() {
        let original = doc! { "_id": 1, "name": "X", "legacy": true, "old": 5 };
        let updated = apply_update(
            &original,
            &doc! {
                "$set": { "name": "Y", "meta.version": 2 },
                "$unset": { "legacy": "" },
                "$rename": { "old": "new" },
            },
        )
        .unwrap();
        assert_eq!(
            updated,
            doc! { "_id": 1, "name": "Y", "meta": { "version": 2 }, "new": 5 }
        );
    }

    #[test]
    fn test_push_and_each() {
        let original = doc! { "tags": ["a"] };
        let updated = apply_update(&original, &doc! { "$push": { "tags": "b" } }).unwrap();
        assert_eq!(updated, doc! { "tags": ["a", "b"] });

        let updated =
            apply_update(&updated, &doc! { "$push": { "tags": { "$each": ["c", "d"] } } }).unwrap();
        assert_eq!(updated, doc! { "tags": ["a", "b", "c", "d"] });

        let created = apply_update(&doc! {}, &doc! { "$push": { "log": 1 } }).unwrap();
        assert_eq!(created, doc! { "log": [1] });

        assert!(apply_update(&doc! { "tags": 1 }, &doc! { "$push": { "tags": 2 } }).is_err());
    }

    #[test]
    fn test_inc() {
        let updated = apply_update(
            &doc! { "visits": 1, "score": 1.5 },
            &doc! { "$inc": { "visits": 2, "score": 1, "fresh": 4 } },
        )
        .unwrap();
        assert_eq!(updated, doc! { "visits": 3, "score": 2.5, "fresh": 4 });
        assert!(apply_update(&doc! { "name": "x" }, &doc! { "$inc": { "name": 1 } }).is_err());
    }

    #[test]
    fn test_inc_overflow_is_an_error() {
        let err = apply_update(&doc! { "n": i64::MAX }, &doc! { "$inc": { "n": 1_i64 } })
            .unwrap_err();
        assert!(err.to_string().contains("overflow"));
        assert!(apply_update(&doc! { "n": i64::MIN }, &doc! { "$inc": { "n": -1 } }).is_err());

        let widened =
            apply_update(&doc! { "n": i32::MAX }, &doc! { "$inc": { "n": 1 } }).unwrap();
        assert_eq!(widened, doc! { "n": i64::from(i32::MAX) + 1 });
    }

    #[test]
    fn test_id_is_immutable() {
        let err = apply_update(&doc! { "_id": "a1" }, &doc! { "$set": { "_id": "b2" } });
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_modifier() {
        assert!(apply_update(&doc! {}, &doc! { "$bit": { "a": { "and": 1 } } }).is_err());
        assert!(apply_update(&doc! {}, &doc! { "$set": 1 }).is_err());
    }
}
