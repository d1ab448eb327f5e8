pub(crate) mod document_node;
pub(crate) mod node;

use async_recursion::async_recursion;
use log::trace;
use tokio::sync::mpsc;

use crate::decoder::Position;
use crate::errors::ParserError;
use crate::parser::{ParserOptions, TagNameCasing};
use crate::tokenizer::token::Token;
use node::{Attribute, ElementNode, Node, NodeStream};

/// Capacity of every node channel, the root stream and each element's
/// child stream alike. Small on purpose: the buffer only smooths
/// producer/consumer hand-off, while backpressure does the real work of
/// keeping memory flat on deep documents.
pub(crate) const NODE_CHANNEL_CAPACITY: usize = 16;

/// How a [`TreeBuilder::parse_children`] level ended.
enum Unwind {
    /// The input is exhausted. Still-open elements just have their
    /// streams closed; no synthetic close is produced for them.
    EndOfInput,

    /// A closing tag matched an ancestor carrying this (already
    /// case-transformed) tagname. Levels unwind until the matching
    /// element is reached.
    ClosedBy(String),

    /// A terminal error. Whoever returns this has already aborted its
    /// own stream with it; each caller aborts its own stream in turn.
    Fault(ParserError),

    /// The root consumer is gone and the whole parse is abandoned.
    Cancelled,
}

/// Outcome of consuming one element, from its tagname token to the end
/// of its subtree.
enum ElementStep {
    Continue,
    Unwind(Unwind),
}

/// Assembles the token stream into a hierarchy of streamed nodes.
///
/// Nesting is handled by recursion: each element's body is parsed by a
/// recursive call holding that element's child writer, with an
/// immutable stack of open ancestor tagnames for matching closers.
/// There are no parent pointers anywhere, so subtrees the consumer has
/// dropped can be discarded wholesale.
pub(crate) struct TreeBuilder {
    tokens: mpsc::Receiver<Token>,
    root: mpsc::Sender<Result<Node, ParserError>>,
    casing: TagNameCasing,
    preserve_comments: bool,
}

impl TreeBuilder {
    pub(crate) fn new(
        tokens: mpsc::Receiver<Token>,
        root: mpsc::Sender<Result<Node, ParserError>>,
        options: &ParserOptions,
    ) -> Self {
        Self {
            tokens,
            root,
            casing: options.tag_name_casing,
            preserve_comments: options.preserve_comments,
        }
    }

    pub(crate) async fn run(mut self) {
        let root = self.root.clone();
        match self.parse_children(&root, &[]).await {
            Unwind::EndOfInput | Unwind::Fault(_) | Unwind::Cancelled => {}
            // The root level has no open ancestors, so a matching close
            // can never unwind past it.
            Unwind::ClosedBy(name) => trace!("closing tag </{name}> escaped the root level"),
        }
    }

    /// Consumes tokens at one nesting level, writing nodes to `writer`
    /// until the level is terminated by a matching closer, the end of
    /// input, or an error.
    #[async_recursion]
    async fn parse_children(
        &mut self,
        writer: &mpsc::Sender<Result<Node, ParserError>>,
        open_tags: &[String],
    ) -> Unwind {
        loop {
            if self.root.is_closed() {
                return Unwind::Cancelled;
            }
            let Some(token) = self.tokens.recv().await else {
                return Unwind::EndOfInput;
            };
            match token {
                Token::Eof { .. } => return Unwind::EndOfInput,
                Token::Error(error) => {
                    let _ = writer.send(Err(error.clone())).await;
                    return Unwind::Fault(error);
                }
                Token::Text { value, at } => {
                    let _ = writer
                        .send(Ok(Node::Text {
                            text_content: value,
                            at,
                        }))
                        .await;
                }
                Token::DoctypeDeclaration { value, at } => {
                    let _ = writer
                        .send(Ok(Node::Doctype {
                            doctype_declaration: value,
                            at,
                        }))
                        .await;
                }
                Token::Comment { value, at } => {
                    if self.preserve_comments {
                        let _ = writer.send(Ok(Node::Comment { comment: value, at })).await;
                    }
                }
                Token::OpeningTagName { value, at } => {
                    match self.parse_element(writer, open_tags, value, at).await {
                        ElementStep::Continue => {}
                        ElementStep::Unwind(unwind) => {
                            if let Unwind::Fault(error) = &unwind {
                                let _ = writer.send(Err(error.clone())).await;
                            }
                            return unwind;
                        }
                    }
                }
                Token::ClosingTagName { value, .. } => {
                    let name = self.casing.apply(&value);
                    if open_tags.iter().any(|open| open == &name) {
                        return Unwind::ClosedBy(name);
                    }
                    // No open ancestor matches; tolerate the stray
                    // closer and carry on at this level.
                    trace!("ignoring stray closing tag </{name}>");
                }
                unexpected @ (Token::AttributeName { .. }
                | Token::AttributeValue { .. }
                | Token::OpeningTagEnd { .. }
                | Token::SelfClosingTagEnd { .. }) => {
                    let error = ParserError::parser_protocol(
                        "attribute or tag-end token received outside of an opening tag",
                        unexpected.at(),
                    );
                    let _ = writer.send(Err(error.clone())).await;
                    return Unwind::Fault(error);
                }
            }
        }
    }

    /// Consumes an element's attribute tokens and, when it has a body,
    /// its whole subtree.
    ///
    /// The element node is written *before* its subtree is parsed, so a
    /// consumer holding the child stream observes the parent first and
    /// can start iterating children while the body is still being
    /// lexed.
    async fn parse_element(
        &mut self,
        writer: &mpsc::Sender<Result<Node, ParserError>>,
        open_tags: &[String],
        raw_name: String,
        at: Position,
    ) -> ElementStep {
        let tag_name = self.casing.apply(&raw_name);
        let mut attributes: Vec<Attribute> = Vec::new();
        let mut value_allowed = false;
        loop {
            let Some(token) = self.tokens.recv().await else {
                return ElementStep::Unwind(Unwind::EndOfInput);
            };
            match token {
                Token::AttributeName { value, at } => {
                    attributes.push(Attribute {
                        name: value,
                        value: String::new(),
                        at,
                    });
                    value_allowed = true;
                }
                Token::AttributeValue { value, at } => {
                    if !value_allowed {
                        return ElementStep::Unwind(Unwind::Fault(ParserError::parser_protocol(
                            "attribute value without a preceding attribute name",
                            at,
                        )));
                    }
                    if let Some(attribute) = attributes.last_mut() {
                        attribute.value = value;
                    }
                    value_allowed = false;
                }
                Token::SelfClosingTagEnd { .. } => {
                    trace!("element <{tag_name}> has no body");
                    let _ = writer
                        .send(Ok(Node::Element(ElementNode {
                            tag_name,
                            attributes,
                            children: None,
                            at,
                        })))
                        .await;
                    return ElementStep::Continue;
                }
                Token::OpeningTagEnd { .. } => {
                    let (child_writer, child_reader) = mpsc::channel(NODE_CHANNEL_CAPACITY);
                    let _ = writer
                        .send(Ok(Node::Element(ElementNode {
                            tag_name: tag_name.clone(),
                            attributes,
                            children: Some(NodeStream::new(child_reader)),
                            at,
                        })))
                        .await;

                    let mut child_tags = open_tags.to_vec();
                    child_tags.push(tag_name.clone());
                    let unwind = self.parse_children(&child_writer, &child_tags).await;
                    drop(child_writer);

                    return match unwind {
                        Unwind::ClosedBy(name) if name == tag_name => ElementStep::Continue,
                        other => ElementStep::Unwind(other),
                    };
                }
                Token::Eof { .. } => {
                    // The input ended inside the opening tag. Keep what
                    // was read; the element simply has no body.
                    let _ = writer
                        .send(Ok(Node::Element(ElementNode {
                            tag_name,
                            attributes,
                            children: None,
                            at,
                        })))
                        .await;
                    return ElementStep::Unwind(Unwind::EndOfInput);
                }
                Token::Error(error) => {
                    return ElementStep::Unwind(Unwind::Fault(error));
                }
                unexpected @ (Token::Text { .. }
                | Token::Comment { .. }
                | Token::DoctypeDeclaration { .. }
                | Token::OpeningTagName { .. }
                | Token::ClosingTagName { .. }) => {
                    return ElementStep::Unwind(Unwind::Fault(ParserError::parser_protocol(
                        "unexpected token inside of an opening tag",
                        unexpected.at(),
                    )));
                }
            }
        }
    }
}
