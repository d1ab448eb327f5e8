use serde::Serialize;
use tokio::sync::mpsc;

use crate::decoder::Position;
use crate::errors::ParserError;

/// A parsed node delivered on a [`NodeStream`].
#[derive(Debug)]
pub enum Node {
    Element(ElementNode),
    Text {
        text_content: String,
        at: Position,
    },
    Doctype {
        doctype_declaration: String,
        at: Position,
    },
    Comment {
        comment: String,
        at: Position,
    },
}

impl Node {
    pub fn position(&self) -> Position {
        match self {
            Node::Element(element) => element.at,
            Node::Text { at, .. } | Node::Doctype { at, .. } | Node::Comment { at, .. } => *at,
        }
    }
}

/// An element with its attributes and, when it has a body, a lazy
/// stream of its children.
///
/// The child stream is filled while the parent document is still being
/// parsed; reading from it drives the parse forward. A consumer that
/// does not care about an element's children can simply drop the
/// stream: the subtree is still parsed for structure, but nothing is
/// buffered for it.
#[derive(Debug)]
pub struct ElementNode {
    pub tag_name: String,
    pub attributes: Vec<Attribute>,

    /// `None` when the element is void or used self-closing syntax and
    /// therefore has no body.
    pub children: Option<NodeStream>,

    pub at: Position,
}

/// A single parsed attribute. Boolean attributes carry an empty value.
/// The position is that of the attribute's name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    #[serde(flatten)]
    pub at: Position,
}

/// The receiving half of a bounded node channel.
///
/// Nodes arrive in document order; the producing side suspends when the
/// channel is full, so an unread stream holds back the lexer instead of
/// buffering the document. Errors arrive in-band as the final item.
#[derive(Debug)]
pub struct NodeStream {
    receiver: mpsc::Receiver<Result<Node, ParserError>>,
}

impl NodeStream {
    pub(crate) fn new(receiver: mpsc::Receiver<Result<Node, ParserError>>) -> Self {
        Self { receiver }
    }

    /// Pulls the next node, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<Result<Node, ParserError>> {
        self.receiver.recv().await
    }
}
