//! Query matching and value comparison for the in-memory store

use bson::{Bson, Document};
use mongo_executer_common::{ExecuterError, Result};
use std::cmp::Ordering;

/// Resolves a dotted path through nested documents.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

/// Sets a dotted path, creating intermediate documents.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> Result<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(child)) => set_path(child, rest, value),
                _ => Err(ExecuterError::Database(format!(
                    "Cannot create field '{}' in element {{{}: ...}}",
                    rest, head
                ))),
            }
        }
    }
}

/// Removes a dotted path, returning the removed value.
pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(child)) => remove_path(child, rest),
            _ => None,
        },
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Equality with numeric types compared by value.
pub(crate) fn bson_eq(left: &Bson, right: &Bson) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

/// Ordering between values of comparable types; `None` across types.
pub(crate) fn compare(left: &Bson, right: &Bson) -> Option<Ordering> {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return l.partial_cmp(&r);
    }
    match (left, right) {
        (Bson::String(l), Bson::String(r)) => Some(l.cmp(r)),
        (Bson::Boolean(l), Bson::Boolean(r)) => Some(l.cmp(r)),
        (Bson::DateTime(l), Bson::DateTime(r)) => Some(l.cmp(r)),
        (Bson::ObjectId(l), Bson::ObjectId(r)) => Some(l.bytes().cmp(&r.bytes())),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

/// Total order used for sorting: type rank first, then value.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let by_rank = type_rank(left).cmp(&type_rank(right));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (left, right) {
        (Some(l), Some(r)) => compare(l, r).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn value_matches(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| bson_eq(item, expected))
        }
        Some(actual) => bson_eq(actual, expected),
    }
}

/// Join condition for `$lookup`: an array on the local side matches any element.
pub(crate) fn join_matches(foreign: Option<&Bson>, local: &Bson) -> bool {
    match local {
        Bson::Array(items) => items.iter().any(|item| value_matches(foreign, item)),
        _ => value_matches(foreign, local),
    }
}

fn ordered(value: Option<&Bson>, bound: &Bson, accept: fn(Ordering) -> bool) -> bool {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| compare(item, bound).is_some_and(accept)),
        Some(actual) => compare(actual, bound).is_some_and(accept),
        None => false,
    }
}

fn candidates<'a>(operator: &str, argument: &'a Bson) -> Result<&'a Vec<Bson>> {
    argument
        .as_array()
        .ok_or_else(|| ExecuterError::Query(format!("{} needs an array", operator)))
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
            Some(ops)
        }
        _ => None,
    }
}

fn condition_matches(value: Option<&Bson>, condition: &Bson) -> Result<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(value_matches(value, condition));
    };

    for (operator, argument) in operators {
        let matched = match operator.as_str() {
            "$eq" => value_matches(value, argument),
            "$ne" => !value_matches(value, argument),
            "$gt" => ordered(value, argument, Ordering::is_gt),
            "$gte" => ordered(value, argument, Ordering::is_ge),
            "$lt" => ordered(value, argument, Ordering::is_lt),
            "$lte" => ordered(value, argument, Ordering::is_le),
            "$in" => candidates(operator, argument)?
                .iter()
                .any(|candidate| value_matches(value, candidate)),
            "$nin" => !candidates(operator, argument)?
                .iter()
                .any(|candidate| value_matches(value, candidate)),
            "$exists" => {
                let wanted = match argument {
                    Bson::Boolean(flag) => *flag,
                    other => as_number(other).is_some_and(|n| n != 0.0),
                };
                value.is_some() == wanted
            }
            unknown => {
                return Err(ExecuterError::Query(format!("unknown operator: {}", unknown)));
            }
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(operator: &str, argument: &'a Bson) -> Result<Vec<&'a Document>> {
    let items = argument.as_array().filter(|items| !items.is_empty()).ok_or_else(|| {
        ExecuterError::Query(format!("{} must be a nonempty array", operator))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_document().ok_or_else(|| {
                ExecuterError::Query(format!("{} argument's entries must be objects", operator))
            })
        })
        .collect()
}

/// Whether `document` satisfies `filter`.
pub(crate) fn matches(document: &Document, filter: &Document) -> Result<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                if key == "$or" {
                    any
                } else {
                    !any
                }
            }
            other if other.starts_with('$') => {
                return Err(ExecuterError::Query(format!(
                    "unknown top level operator: {}",
                    other
                )));
            }
            path => condition_matches(get_path(document, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Top-level equality fields of a filter, used to seed upserted documents.
pub(crate) fn equality_seed(filter: &Document) -> Result<Document> {
    let mut seed = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        match is_operator_document(condition) {
            Some(operators) => {
                if let Some(value) = operators.get("$eq") {
                    set_path(&mut seed, key, value.clone())?;
                }
            }
            None => set_path(&mut seed, key, condition.clone())?,
        }
    }
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn conversation() -> Document {
        doc! {
            "_id": "abc123",
            "name": "Support",
            "number": 42,
            "tags": ["urgent", "billing"],
            "owner": { "team": "ops", "level": 2 },
        }
    }

    #[test]
    fn test_equality_and_dotted_paths() {
        let doc = conversation();
        assert!(matches(&doc, &doc! {}).unwrap());
        assert!(matches(&doc, &doc! { "_id": "abc123" }).unwrap());
        assert!(matches(&doc, &doc! { "owner.team": "ops" }).unwrap());
        assert!(!matches(&doc, &doc! { "owner.team": "dev" }).unwrap());
        assert!(matches(&doc, &doc! { "number": 42.0 }).unwrap());
    }

    #[test]
    fn test_array_membership() {
        let doc = conversation();
        assert!(matches(&doc, &doc! { "tags": "urgent" }).unwrap());
        assert!(matches(&doc, &doc! { "tags": ["urgent", "billing"] }).unwrap());
        assert!(!matches(&doc, &doc! { "tags": "sales" }).unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let doc = conversation();
        assert!(matches(&doc, &doc! { "number": { "$gt": 40, "$lte": 42 } }).unwrap());
        assert!(!matches(&doc, &doc! { "number": { "$lt": 42 } }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$in": ["Sales", "Support"] } }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$nin": ["Sales"] } }).unwrap());
        assert!(matches(&doc, &doc! { "missing": { "$exists": false } }).unwrap());
        assert!(matches(&doc, &doc! { "name": { "$ne": "Sales" } }).unwrap());
        assert!(!matches(&doc, &doc! { "name": { "$gt": 5 } }).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = conversation();
        assert!(matches(&doc, &doc! { "$or": [{ "name": "Sales" }, { "number": 42 }] }).unwrap());
        assert!(!matches(&doc, &doc! { "$and": [{ "name": "Support" }, { "number": 1 }] }).unwrap());
        assert!(matches(&doc, &doc! { "$nor": [{ "name": "Sales" }] }).unwrap());
    }

    #[test]
    fn test_unknown_operators_fail() {
        let doc = conversation();
        assert!(matches(&doc, &doc! { "$where": "true" }).is_err());
        assert!(matches(&doc, &doc! { "name": { "$regex": "^S" } }).is_err());
        assert!(matches(&doc, &doc! { "$or": [] }).is_err());
    }

    #[test]
    fn test_set_and_remove_path() {
        let mut doc = doc! { "a": 1 };
        set_path(&mut doc, "b.c", Bson::Int32(2)).unwrap();
        assert_eq!(get_path(&doc, "b.c"), Some(&Bson::Int32(2)));
        assert!(set_path(&mut doc, "a.x", Bson::Int32(3)).is_err());
        assert_eq!(remove_path(&mut doc, "b.c"), Some(Bson::Int32(2)));
        assert_eq!(doc, doc! { "a": 1, "b": {} });
    }

    #[test]
    fn test_sort_order_ranks_types() {
        let null = Bson::Null;
        let one = Bson::Int32(1);
        let text = Bson::String("a".to_string());
        assert_eq!(sort_order(None, Some(&one)), Ordering::Less);
        assert_eq!(sort_order(Some(&null), None), Ordering::Equal);
        assert_eq!(sort_order(Some(&one), Some(&text)), Ordering::Less);
        assert_eq!(sort_order(Some(&Bson::Double(2.5)), Some(&one)), Ordering::Greater);
    }

    #[test]
    fn test_equality_seed() {
        let seed = equality_seed(&doc! {
            "_id": "a1",
            "owner.team": "ops",
            "age": { "$gt": 3 },
            "kind": { "$eq": "chat" },
            "$or": [{ "x": 1 }],
        })
        .unwrap();
        assert_eq!(seed, doc! { "_id": "a1", "owner": { "team": "ops" }, "kind": "chat" });
    }
}
