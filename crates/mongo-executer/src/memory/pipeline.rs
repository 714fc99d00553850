//! Projection, sorting and aggregation stages for the in-memory store

use super::filter::{get_path, join_matches, matches, remove_path, set_path, sort_order};
use bson::{Bson, Document};
use mongo_executer_common::{ExecuterError, Result};
use std::cmp::Ordering;

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        _ => true,
    }
}

/// Applies an inclusion or exclusion projection. `_id` is kept unless excluded.
pub(crate) fn project(document: &Document, projection: &Document) -> Result<Document> {
    let keep_id = projection.get("_id").map_or(true, is_truthy);
    let fields: Vec<(&String, bool)> = projection
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .map(|(key, value)| (key, is_truthy(value)))
        .collect();

    let id_only = fields.is_empty() && projection.contains_key("_id") && keep_id;
    let inclusion = id_only || fields.iter().any(|(_, include)| *include);
    if inclusion {
        if let Some((key, _)) = fields.iter().find(|(_, include)| !*include) {
            return Err(ExecuterError::Query(format!(
                "Cannot do exclusion on field {} in inclusion projection",
                key
            )));
        }

        let mut projected = Document::new();
        if keep_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (path, _) in fields {
            if let Some(value) = get_path(document, path) {
                set_path(&mut projected, path, value.clone())?;
            }
        }
        return Ok(projected);
    }

    let mut projected = document.clone();
    for (path, _) in fields {
        remove_path(&mut projected, path);
    }
    if !keep_id {
        projected.remove("_id");
    }
    Ok(projected)
}

/// Stable sort by a `{ field: 1 | -1 }` specification.
pub(crate) fn sort_documents(documents: &mut [Document], spec: &Document) -> Result<()> {
    if spec.is_empty() {
        return Err(ExecuterError::Query(
            "$sort stage must have at least one sort key".to_string(),
        ));
    }

    let mut keys = Vec::with_capacity(spec.len());
    for (path, direction) in spec {
        let descending = match direction {
            Bson::Int32(1) | Bson::Int64(1) => false,
            Bson::Int32(-1) | Bson::Int64(-1) => true,
            Bson::Double(d) if *d == 1.0 => false,
            Bson::Double(d) if *d == -1.0 => true,
            _ => {
                return Err(ExecuterError::Query(format!(
                    "$sort key ordering must be 1 (for ascending) or -1 (for descending): {}",
                    path
                )));
            }
        };
        keys.push((path.as_str(), descending));
    }

    documents.sort_by(|left, right| {
        for (path, descending) in &keys {
            let order = sort_order(get_path(left, path), get_path(right, path));
            let order = if *descending { order.reverse() } else { order };
            if order != Ordering::Equal {
                return order;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn lookup_field<'a>(spec: &'a Document, field: &str) -> Result<&'a str> {
    spec.get_str(field).map_err(|_| {
        ExecuterError::Query(format!("$lookup requires a string '{}' field", field))
    })
}

/// Left outer join against another collection of the same database.
pub(crate) fn lookup(
    documents: Vec<Document>,
    spec: &Document,
    foreign: &[Document],
) -> Result<Vec<Document>> {
    let local_field = lookup_field(spec, "localField")?;
    let foreign_field = lookup_field(spec, "foreignField")?;
    let target = lookup_field(spec, "as")?;

    documents
        .into_iter()
        .map(|mut document| {
            let local = get_path(&document, local_field).cloned().unwrap_or(Bson::Null);
            let joined: Vec<Bson> = foreign
                .iter()
                .filter(|candidate| join_matches(get_path(candidate, foreign_field), &local))
                .cloned()
                .map(Bson::Document)
                .collect();
            set_path(&mut document, target, Bson::Array(joined))?;
            Ok(document)
        })
        .collect()
}

/// Runs `pipeline` over `documents`. `resolve` returns the contents of another
/// collection for `$lookup`.
pub(crate) fn run_pipeline<F>(
    mut documents: Vec<Document>,
    pipeline: &[Document],
    resolve: F,
) -> Result<Vec<Document>>
where
    F: Fn(&str) -> Vec<Document>,
{
    for stage in pipeline {
        let mut entries = stage.iter();
        let (name, argument) = match (entries.next(), entries.next()) {
            (Some(entry), None) => entry,
            _ => {
                return Err(ExecuterError::Query(
                    "A pipeline stage specification object must contain exactly one field"
                        .to_string(),
                ));
            }
        };
        let spec = argument.as_document().ok_or_else(|| {
            ExecuterError::Query(format!("{} specification must be an object", name))
        })?;

        documents = match name.as_str() {
            "$match" => {
                let mut kept = Vec::with_capacity(documents.len());
                for document in documents {
                    if matches(&document, spec)? {
                        kept.push(document);
                    }
                }
                kept
            }
            "$lookup" => {
                let from = lookup_field(spec, "from")?;
                lookup(documents, spec, &resolve(from))?
            }
            "$sort" => {
                sort_documents(&mut documents, spec)?;
                documents
            }
            "$project" => {
                if spec.is_empty() {
                    return Err(ExecuterError::Query(
                        "$project requires at least one output field".to_string(),
                    ));
                }
                documents
                    .iter()
                    .map(|document| project(document, spec))
                    .collect::<Result<_>>()?
            }
            unknown => {
                return Err(ExecuterError::Query(format!(
                    "Unrecognized pipeline stage name: '{}'",
                    unknown
                )));
            }
        };
    }
    Ok(documents)
}
