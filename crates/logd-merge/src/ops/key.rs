// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `!key(field)`: treat an array as a set keyed by `field`; align patch
//! elements to document elements by that field's value (spec.md §4.B).

use crate::MergeError;
use logd_node::{Node, Value};

/// `target` and `patch_node` must both be dense arrays of objects carrying
/// `field`. Each patch element is matched to the document element sharing
/// its `field` value; a patch element naming no existing `field` value is
/// inserted, and a patch element tagged `!delete` removes its match.
pub fn patch(target: &Node, patch_node: &Node) -> Result<Node, MergeError> {
    let field = patch_node
        .tag
        .as_ref()
        .and_then(|t| t.segments().first())
        .and_then(|s| s.args.first())
        .ok_or(MergeError::MissingField("key field name"))?;
    let Value::Array(items) = &target.value else {
        return Err(MergeError::TypeMismatch {
            expected: "array",
            found: target.value.kind_name(),
        });
    };
    let Value::Array(patch_items) = &patch_node.value else {
        return Err(MergeError::TypeMismatch {
            expected: "array",
            found: patch_node.value.kind_name(),
        });
    };

    let mut result = items.clone();
    for patch_item in patch_items {
        let key_value = field_value(patch_item, field)?;
        let existing = result.iter().position(|item| field_value(item, field).as_ref() == Ok(&key_value));
        match existing {
            Some(idx) if patch_item.tag_head() == Some("delete") => {
                result.remove(idx);
            }
            Some(idx) => {
                result[idx] = crate::patch(&result[idx], patch_item)?;
            }
            None if patch_item.tag_head() == Some("delete") => {}
            None => result.push(patch_item.clone()),
        }
    }
    Ok(Node::new(Value::Array(result)))
}

fn field_value(item: &Node, field: &str) -> Result<Node, MergeError> {
    item.value
        .object_get(field)
        .cloned()
        .ok_or(MergeError::MissingField("key field value"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use logd_node::{Tag, TagSegment};

    fn keyed(tag_arg: &str) -> Tag {
        Tag::new(vec![TagSegment::with_args("key", vec![tag_arg.into()])]).unwrap()
    }

    fn obj(id: i64, field: &str) -> Node {
        Node::new(Value::Object(vec![
            ("id".into(), Node::new(Value::Number(logd_node::Number::from_i64(id)))),
            ("field".into(), Node::new(Value::String(field.into()))),
        ]))
    }

    #[test]
    fn aligns_by_field_and_patches_match() {
        let target = Node::new(Value::Array(vec![obj(1, "a"), obj(2, "b")]));
        let patch_node = Node::new(Value::Array(vec![Node::new(Value::Object(vec![(
            "id".into(),
            Node::new(Value::Number(logd_node::Number::from_i64(1))),
        )]))]))
        .with_tag(keyed("id"));
        let result = patch(&target, &patch_node).unwrap();
        let Value::Array(out) = result.value else { unreachable!() };
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn unmatched_patch_element_is_inserted() {
        let target = Node::new(Value::Array(vec![obj(1, "a")]));
        let patch_node = Node::new(Value::Array(vec![obj(2, "b")])).with_tag(keyed("id"));
        let result = patch(&target, &patch_node).unwrap();
        let Value::Array(out) = result.value else { unreachable!() };
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn delete_tagged_element_removes_match() {
        let target = Node::new(Value::Array(vec![obj(1, "a"), obj(2, "b")]));
        let del = Node::new(Value::Object(vec![(
            "id".into(),
            Node::new(Value::Number(logd_node::Number::from_i64(1))),
        )]))
        .with_tag(Tag::single("delete"));
        let patch_node = Node::new(Value::Array(vec![del])).with_tag(keyed("id"));
        let result = patch(&target, &patch_node).unwrap();
        let Value::Array(out) = result.value else { unreachable!() };
        assert_eq!(out.len(), 1);
    }
}
