//! Views every database carries.

use cairn_store::{is_reserved, Document};
use serde_json::{json, Value};

use crate::error::ViewResult;
use crate::index::IndexBacking;
use crate::options::ViewDefinition;
use crate::value::ViewValue;
use crate::view::View;

/// Name of the view indexing every slot of every head.
pub const ALL_SLOTS_VIEW: &str = "cairn_all_slots";

/// The all-slots view: key `[slot name, value]`, value the document.
///
/// Array slots emit one entry per element, so `find` with key
/// `["tags", "x"]` returns every document whose `tags` contains `"x"`.
pub fn all_slots(backing: IndexBacking) -> ViewResult<View> {
    Ok(View::initialize(ViewDefinition::named(ALL_SLOTS_VIEW), backing)?.with_mapper(map_all_slots))
}

pub fn map_all_slots(document: &Document) -> Vec<(Value, ViewValue)> {
    let mut pairs = Vec::new();
    for (name, value) in document.slots() {
        if is_reserved(name) {
            continue;
        }
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push((json!([name, item]), ViewValue::Document(document.clone())));
                }
            }
            value => pairs.push((json!([name, value]), ViewValue::Document(document.clone()))),
        }
    }
    pairs
}
