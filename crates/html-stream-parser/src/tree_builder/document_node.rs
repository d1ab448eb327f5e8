use async_recursion::async_recursion;
use serde::Serialize;

use super::node::{Attribute, Node, NodeStream};
use crate::decoder::Position;
use crate::errors::ParserError;

/// A fully-materialized node, produced by draining a parse stream.
///
/// Serializing one of these yields the documented JSON shape: positions
/// flatten into `l`/`c` keys, and `attributes`/`children` are omitted
/// entirely when empty rather than serialized as empty lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DocumentNode {
    Element {
        #[serde(rename = "tagName")]
        tag_name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        attributes: Vec<Attribute>,
        #[serde(skip_serializing_if = "Option::is_none")]
        children: Option<Vec<DocumentNode>>,
        #[serde(flatten)]
        at: Position,
    },
    Text {
        #[serde(rename = "textContent")]
        text_content: String,
        #[serde(flatten)]
        at: Position,
    },
    Doctype {
        #[serde(rename = "doctypeDeclaration")]
        doctype_declaration: String,
        #[serde(flatten)]
        at: Position,
    },
    Comment {
        comment: String,
        #[serde(flatten)]
        at: Position,
    },
}

/// Drains a node stream depth-first into concrete nodes, resolving
/// every element's child stream along the way.
///
/// Elements whose resolved child sequence is empty get `children:
/// None`, indistinguishable from self-closing ones.
#[async_recursion]
pub(crate) async fn resolve_stream(
    mut stream: NodeStream,
) -> Result<Vec<DocumentNode>, ParserError> {
    let mut resolved = Vec::new();
    while let Some(next) = stream.next().await {
        resolved.push(match next? {
            Node::Element(element) => {
                let children = match element.children {
                    Some(child_stream) => {
                        let children = resolve_stream(child_stream).await?;
                        if children.is_empty() {
                            None
                        } else {
                            Some(children)
                        }
                    }
                    None => None,
                };
                DocumentNode::Element {
                    tag_name: element.tag_name,
                    attributes: element.attributes,
                    children,
                    at: element.at,
                }
            }
            Node::Text { text_content, at } => DocumentNode::Text { text_content, at },
            Node::Doctype {
                doctype_declaration,
                at,
            } => DocumentNode::Doctype {
                doctype_declaration,
                at,
            },
            Node::Comment { comment, at } => DocumentNode::Comment { comment, at },
        });
    }
    Ok(resolved)
}
