//! `$name` placeholder substitution over workflow documents

use crate::error::{EnsembleError, Result};
use crate::models::document::Document;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Mapping key that identifies a document and is never rewritten
pub const RESERVED_ID_KEY: &str = "_id";

/// Nesting depth past which a template is rejected
pub const MAX_TEMPLATE_DEPTH: usize = 128;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z0-9_]+)").expect("token pattern is valid"));

/// Substitute `$name` tokens in every string leaf of `document`.
///
/// Tokens whose name is missing from `params` are kept verbatim, `$` included.
/// Values under the `_id` key are never touched. Either the whole document is
/// rewritten or an error is returned; nothing is partially applied.
pub fn interpolate(document: &Document, params: &HashMap<String, String>) -> Result<Document> {
    interpolate_node(document, params, 0)
}

fn interpolate_node(
    node: &Document,
    params: &HashMap<String, String>,
    depth: usize,
) -> Result<Document> {
    if depth > MAX_TEMPLATE_DEPTH {
        return Err(EnsembleError::MalformedTemplate(format!(
            "document nesting exceeds {} levels",
            MAX_TEMPLATE_DEPTH
        )));
    }

    match node {
        Document::String(s) => Ok(Document::String(interpolate_str(s, params))),
        Document::Sequence(items) => items
            .iter()
            .map(|item| interpolate_node(item, params, depth + 1))
            .collect::<Result<Vec<_>>>()
            .map(Document::Sequence),
        Document::Mapping(map) => {
            let mut out = IndexMap::with_capacity(map.len());
            for (key, value) in map {
                let value = if key == RESERVED_ID_KEY {
                    value.clone()
                } else {
                    interpolate_node(value, params, depth + 1)?
                };
                out.insert(key.clone(), value);
            }
            Ok(Document::Mapping(out))
        }
        Document::Scalar(_) => Ok(node.clone()),
    }
}

/// Substitute tokens within a single string
pub fn interpolate_str(input: &str, params: &HashMap<String, String>) -> String {
    TOKEN
        .replace_all(input, |caps: &Captures| match params.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
