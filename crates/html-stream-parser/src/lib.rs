//! A streaming HTML parser producing a lazy tree of typed nodes.
//!
//! Input bytes, whether from a file or an in-memory string, pass
//! through a BOM-aware decoder (UTF-8, UTF-16 LE/BE, UTF-32 LE/BE) into a
//! state-machine lexer, and the resulting token stream is assembled
//! into a hierarchy of nodes. Every element node exposes its children
//! as a lazy stream, so deeply nested documents can be processed
//! incrementally without the whole tree ever being in memory; bounded
//! channels between the pipeline stages mean a slow consumer throttles
//! the lexer instead of growing a buffer.
//!
//! ```no_run
//! use html_stream_parser::{HtmlParser, Node};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let parser = HtmlParser::new();
//! let mut result = parser.parse_string("<ul><li>one</li></ul>");
//! let mut stream = result.stream().unwrap();
//! while let Some(node) = stream.next().await {
//!     match node.unwrap() {
//!         Node::Element(element) => println!("<{}>", element.tag_name),
//!         Node::Text { text_content, .. } => println!("{text_content}"),
//!         _ => {}
//!     }
//! }
//! # }
//! ```
//!
//! For consumers that want the whole document at once,
//! [`ParseResult::to_array`] drains the tree into fully-materialized
//! [`DocumentNode`]s, which serialize into a compact JSON form.
//!
//! This is not a conforming HTML5 parser: there is no entity decoding
//! and no error-recovery table. Malformed markup is tolerated rather
//! than repaired; stray closing tags are ignored and elements left
//! open at the end of input are simply closed.

mod byte_stream;
mod char_classes;
mod decoder;
mod errors;
mod parser;
mod tokenizer;
mod tree_builder;

pub use decoder::Position;
pub use errors::{ParserError, ParserErrorKind};
pub use parser::{HtmlParser, ParseResult, ParserOptions, TagNameCasing};
pub use tree_builder::document_node::DocumentNode;
pub use tree_builder::node::{Attribute, ElementNode, Node, NodeStream};
