use std::path::{Path, PathBuf};

use log::debug;
use tokio::sync::mpsc;

use crate::byte_stream::ByteStream;
use crate::decoder::{CharDecoder, Position};
use crate::errors::ParserError;
use crate::tokenizer::Tokenizer;
use crate::tree_builder::document_node::{resolve_stream, DocumentNode};
use crate::tree_builder::node::NodeStream;
use crate::tree_builder::{TreeBuilder, NODE_CHANNEL_CAPACITY};

/// Capacity of the token channel between the lexer and the tree
/// builder. Larger than the node channels because tokens are small and
/// several of them usually collapse into one node.
const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// How tagnames are normalized before they are stored on element nodes
/// and compared against closing tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagNameCasing {
    /// Lowercase everything; `<DIV>` and `</div>` match.
    #[default]
    Lower,
    /// Uppercase everything.
    Upper,
    /// Keep source casing. A closing tag whose casing differs from
    /// every open ancestor counts as a stray close and is ignored.
    Preserve,
}

impl TagNameCasing {
    pub(crate) fn apply(&self, tag_name: &str) -> String {
        match self {
            TagNameCasing::Lower => tag_name.to_ascii_lowercase(),
            TagNameCasing::Upper => tag_name.to_ascii_uppercase(),
            TagNameCasing::Preserve => tag_name.to_string(),
        }
    }
}

/// Parser configuration. The defaults match what browsers do most
/// closely: lowercase tagnames, `/>` honored, comments kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    pub tag_name_casing: TagNameCasing,

    /// When set, `/>` on a non-void element is treated as a plain `>`
    /// and the element's body begins after it.
    pub ignore_self_closing_syntax: bool,

    /// When cleared, comment nodes are dropped by the tree builder and
    /// never reach the consumer.
    pub preserve_comments: bool,
}

impl ParserOptions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            tag_name_casing: TagNameCasing::Lower,
            ignore_self_closing_syntax: false,
            preserve_comments: true,
        }
    }
}

enum ParseInput {
    File(PathBuf),
    Memory(Box<[u8]>),
}

/// Entry point for parsing HTML documents into streamed node trees.
///
/// A parser holds nothing but configuration and may be reused across
/// any number of documents. Each `parse_*` call spawns the lexer and
/// tree-builder tasks onto the ambient Tokio runtime and hands back a
/// single-use [`ParseResult`]; the pipeline stages are connected by
/// bounded channels, so parsing advances only as fast as the consumer
/// reads.
pub struct HtmlParser {
    options: ParserOptions,
}

impl HtmlParser {
    pub fn new() -> Self {
        Self::with_options(ParserOptions::default())
    }

    pub fn with_options(options: ParserOptions) -> Self {
        Self { options }
    }

    /// Parses the file at `path`, decoding it per its byte-order mark.
    ///
    /// The file is opened lazily by the parse task: a missing or
    /// unreadable file surfaces as a [`ParserError`] with the
    /// underlying OS error message, delivered as the stream's only
    /// item.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> ParseResult {
        self.spawn_pipeline(ParseInput::File(path.as_ref().to_path_buf()))
    }

    /// Parses an in-memory string.
    pub fn parse_string(&self, text: impl AsRef<str>) -> ParseResult {
        self.spawn_pipeline(ParseInput::Memory(text.as_ref().as_bytes().into()))
    }

    fn spawn_pipeline(&self, input: ParseInput) -> ParseResult {
        let options = self.options;
        let (node_writer, node_reader) = mpsc::channel(NODE_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let bytes = match input {
                ParseInput::File(path) => match ByteStream::open(&path).await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        debug!("failed to open {}: {error}", path.display());
                        let error = ParserError::io(error.to_string(), Position::start());
                        let _ = node_writer.send(Err(error)).await;
                        return;
                    }
                },
                ParseInput::Memory(bytes) => ByteStream::from_bytes(bytes),
            };

            let (token_writer, token_reader) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
            let tokenizer = Tokenizer::new(
                CharDecoder::new(bytes),
                token_writer,
                options.ignore_self_closing_syntax,
            );
            let lexer = tokio::spawn(tokenizer.run());

            TreeBuilder::new(token_reader, node_writer, &options)
                .run()
                .await;

            // The builder only stops once the lexer's side of the token
            // channel is finished or abandoned, so this never blocks
            // for long.
            let _ = lexer.await;
        });

        ParseResult {
            stream: Some(NodeStream::new(node_reader)),
        }
    }
}

impl Default for HtmlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-use handle over one parse's root node stream.
///
/// The stream can be consumed exactly once, either incrementally via
/// [`ParseResult::stream`] or all at once via [`ParseResult::to_array`];
/// any further consumption attempt reports the fixed consumed-error.
pub struct ParseResult {
    stream: Option<NodeStream>,
}

impl ParseResult {
    /// Takes the root node stream for incremental consumption.
    pub fn stream(&mut self) -> Result<NodeStream, ParserError> {
        self.stream.take().ok_or_else(ParserError::consumed)
    }

    /// Drains the whole tree into fully-materialized nodes, resolving
    /// each element's child stream into a concrete child list.
    pub async fn to_array(&mut self) -> Result<Vec<DocumentNode>, ParserError> {
        let stream = self.stream()?;
        resolve_stream(stream).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::ParserErrorKind;
    use crate::tree_builder::node::Node;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    fn at(line: u32, column: u32) -> Position {
        Position::new(line, column)
    }

    fn element(
        tag_name: &str,
        children: Option<Vec<DocumentNode>>,
        line: u32,
        column: u32,
    ) -> DocumentNode {
        DocumentNode::Element {
            tag_name: tag_name.into(),
            attributes: vec![],
            children,
            at: at(line, column),
        }
    }

    fn text(value: &str, line: u32, column: u32) -> DocumentNode {
        DocumentNode::Text {
            text_content: value.into(),
            at: at(line, column),
        }
    }

    async fn parse(input: &str) -> Vec<DocumentNode> {
        HtmlParser::new().parse_string(input).to_array().await.unwrap()
    }

    async fn parse_with(input: &str, options: ParserOptions) -> Vec<DocumentNode> {
        HtmlParser::with_options(options)
            .parse_string(input)
            .to_array()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn parses_a_simple_element_with_text() {
        assert_eq!(
            parse("<div>Hello, world!</div>").await,
            vec![element(
                "div",
                Some(vec![text("Hello, world!", 1, 6)]),
                1,
                2
            )]
        );
    }

    #[tokio::test]
    async fn lowercases_tagnames_by_default() {
        assert_eq!(
            parse("<DIV>hi</Div>").await,
            vec![element("div", Some(vec![text("hi", 1, 6)]), 1, 2)]
        );
    }

    #[tokio::test]
    async fn uppercases_tagnames_on_request() {
        let options = ParserOptions {
            tag_name_casing: TagNameCasing::Upper,
            ..ParserOptions::default()
        };
        assert_eq!(
            parse_with("<div>hi</DIV>", options).await,
            vec![element("DIV", Some(vec![text("hi", 1, 6)]), 1, 2)]
        );
    }

    #[tokio::test]
    async fn preserve_casing_ignores_mismatched_closers() {
        let options = ParserOptions {
            tag_name_casing: TagNameCasing::Preserve,
            ..ParserOptions::default()
        };
        assert_eq!(
            parse_with("<Div></div>hello", options).await,
            vec![element("Div", Some(vec![text("hello", 1, 12)]), 1, 2)]
        );
    }

    #[tokio::test]
    async fn self_closing_and_void_elements_have_no_children() {
        let nodes = parse("<div/>Hello!<input type=text />after").await;
        assert_eq!(
            nodes,
            vec![
                element("div", None, 1, 2),
                text("Hello!", 1, 7),
                DocumentNode::Element {
                    tag_name: "input".into(),
                    attributes: vec![crate::tree_builder::node::Attribute {
                        name: "type".into(),
                        value: "text".into(),
                        at: at(1, 20),
                    }],
                    children: None,
                    at: at(1, 14),
                },
                text("after", 1, 32),
            ]
        );
    }

    #[tokio::test]
    async fn ignoring_self_closing_syntax_gives_the_element_a_body() {
        let options = ParserOptions {
            ignore_self_closing_syntax: true,
            ..ParserOptions::default()
        };
        assert_eq!(
            parse_with("<div/>x", options).await,
            vec![element("div", Some(vec![text("x", 1, 7)]), 1, 2)]
        );
    }

    #[tokio::test]
    async fn quoted_closer_inside_a_style_body_is_content() {
        assert_eq!(
            parse("<style>a{content:'</style>'}</style>").await,
            vec![element(
                "style",
                Some(vec![text("a{content:'</style>'}", 1, 8)]),
                1,
                2
            )]
        );
    }

    #[tokio::test]
    async fn doctype_comes_through_as_its_own_node() {
        assert_eq!(
            parse("<!DOCTYPE html><html></html>").await,
            vec![
                DocumentNode::Doctype {
                    doctype_declaration: "html".into(),
                    at: at(1, 11),
                },
                element("html", None, 1, 17),
            ]
        );
    }

    #[tokio::test]
    async fn comments_are_preserved_by_default_and_strippable() {
        assert_eq!(
            parse("<!-- note -->").await,
            vec![DocumentNode::Comment {
                comment: "note".into(),
                at: at(1, 5),
            }]
        );

        let options = ParserOptions {
            preserve_comments: false,
            ..ParserOptions::default()
        };
        assert_eq!(parse_with("<!-- note -->", options).await, vec![]);
    }

    #[tokio::test]
    async fn streaming_delivers_the_parent_before_its_children() {
        let mut result = HtmlParser::new().parse_string("<ul><li>one</li></ul>");
        let mut stream = result.stream().unwrap();

        let Node::Element(ul) = stream.next().await.unwrap().unwrap() else {
            panic!("expected the ul element first");
        };
        assert_eq!(ul.tag_name, "ul");

        let mut ul_children = ul.children.unwrap();
        let Node::Element(li) = ul_children.next().await.unwrap().unwrap() else {
            panic!("expected the li element on the child stream");
        };
        assert_eq!(li.tag_name, "li");

        let mut li_children = li.children.unwrap();
        let Some(Ok(Node::Text { text_content, .. })) = li_children.next().await else {
            panic!("expected the text node");
        };
        assert_eq!(text_content, "one");

        assert!(li_children.next().await.is_none());
        assert!(ul_children.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_a_child_stream_does_not_stall_the_outer_stream() {
        let mut result = HtmlParser::new().parse_string(
            "<section><p>skipped</p><p>also skipped</p></section><footer></footer>",
        );
        let mut stream = result.stream().unwrap();

        let Node::Element(section) = stream.next().await.unwrap().unwrap() else {
            panic!("expected the section element");
        };
        // Abandon the subtree entirely.
        drop(section.children);

        let Node::Element(footer) = stream.next().await.unwrap().unwrap() else {
            panic!("expected the footer element");
        };
        assert_eq!(footer.tag_name, "footer");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn a_parse_result_is_single_use() {
        let mut result = HtmlParser::new().parse_string("<div></div>");
        assert!(result.stream().is_ok());

        let error = result.stream().unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::Consumed);
        assert_eq!(result.to_array().await.unwrap_err(), error);
    }

    #[tokio::test]
    async fn a_missing_file_surfaces_the_os_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.html");

        let mut result = HtmlParser::new().parse_file(&missing);
        let error = result.to_array().await.unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::Io);
        assert!(
            !error.message().is_empty(),
            "the OS error text should be carried verbatim"
        );
    }

    #[tokio::test]
    async fn parses_a_utf16_le_file_with_a_byte_order_mark() {
        let mut bytes = Vec::new();
        for unit in "\u{FEFF}<div>Hi 👋</div>".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.html");
        std::fs::write(&path, &bytes).unwrap();

        let nodes = HtmlParser::new()
            .parse_file(&path)
            .to_array()
            .await
            .unwrap();
        assert_eq!(
            nodes,
            vec![element("div", Some(vec![text("Hi 👋", 1, 6)]), 1, 2)]
        );
    }

    #[tokio::test]
    async fn decode_failures_reach_the_consumer_in_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.html");
        std::fs::write(&path, b"<div>\xFF</div>").unwrap();

        let mut result = HtmlParser::new().parse_file(&path);
        let error = result.to_array().await.unwrap_err();
        assert_eq!(error.kind(), ParserErrorKind::Decode);
    }

    #[tokio::test]
    async fn materialized_nodes_serialize_in_the_documented_shape() {
        let nodes = parse(r#"<div class="a">hi</div>"#).await;
        let json = serde_json::to_value(&nodes).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "tagName": "div",
                "attributes": [{ "name": "class", "value": "a", "l": 1, "c": 6 }],
                "children": [{ "textContent": "hi", "l": 1, "c": 16 }],
                "l": 1,
                "c": 2,
            }])
        );
    }

    #[tokio::test]
    async fn empty_collections_are_elided_from_serialization() {
        let nodes = parse("<div></div>").await;
        let json = serde_json::to_value(&nodes).unwrap();
        assert_eq!(json, serde_json::json!([{ "tagName": "div", "l": 1, "c": 2 }]));
    }

    /// Renders a materialized tree back into markup. Good enough for
    /// round-trip checks on documents without comments or quotes
    /// inside attribute values.
    fn render(nodes: &[DocumentNode]) -> String {
        let mut html = String::new();
        for node in nodes {
            match node {
                DocumentNode::Element {
                    tag_name,
                    attributes,
                    children,
                    ..
                } => {
                    html.push('<');
                    html.push_str(tag_name);
                    for attribute in attributes {
                        html.push(' ');
                        html.push_str(&attribute.name);
                        if !attribute.value.is_empty() {
                            html.push_str("=\"");
                            html.push_str(&attribute.value);
                            html.push('"');
                        }
                    }
                    match children {
                        Some(children) => {
                            html.push('>');
                            html.push_str(&render(children));
                            html.push_str("</");
                            html.push_str(tag_name);
                            html.push('>');
                        }
                        None => html.push_str("/>"),
                    }
                }
                DocumentNode::Text { text_content, .. } => html.push_str(text_content),
                DocumentNode::Doctype {
                    doctype_declaration,
                    ..
                } => {
                    html.push_str("<!DOCTYPE ");
                    html.push_str(doctype_declaration);
                    html.push('>');
                }
                DocumentNode::Comment { comment, .. } => {
                    html.push_str("<!--");
                    html.push_str(comment);
                    html.push_str("-->");
                }
            }
        }
        html
    }

    fn strip_positions(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                map.remove("l");
                map.remove("c");
                for nested in map.values_mut() {
                    strip_positions(nested);
                }
            }
            serde_json::Value::Array(items) => items.iter_mut().for_each(strip_positions),
            _ => {}
        }
    }

    #[tokio::test]
    async fn a_rendered_tree_reparses_to_an_equivalent_tree() {
        let source =
            r#"<!DOCTYPE html><main id=app><br><p class="x">one</p><input disabled></main>"#;
        let first = parse(source).await;
        let reparsed = parse(&render(&first)).await;

        let mut a = serde_json::to_value(&first).unwrap();
        let mut b = serde_json::to_value(&reparsed).unwrap();
        strip_positions(&mut a);
        strip_positions(&mut b);
        assert_eq!(a, b);
    }

    fn run_blocking<T>(future: impl std::future::Future<Output = T>) -> T {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    fn positions_are_one_based(nodes: &[DocumentNode]) -> bool {
        nodes.iter().all(|node| match node {
            DocumentNode::Element {
                attributes,
                children,
                at,
                ..
            } => {
                at.line >= 1
                    && at.column >= 1
                    && attributes
                        .iter()
                        .all(|attribute| attribute.at.line >= 1 && attribute.at.column >= 1)
                    && children
                        .as_deref()
                        .map_or(true, positions_are_one_based)
            }
            DocumentNode::Text { at, .. }
            | DocumentNode::Doctype { at, .. }
            | DocumentNode::Comment { at, .. } => at.line >= 1 && at.column >= 1,
        })
    }

    #[quickcheck]
    fn parsing_arbitrary_text_never_fails_and_positions_stay_one_based(input: String) -> bool {
        run_blocking(async {
            let nodes = HtmlParser::new()
                .parse_string(&input)
                .to_array()
                .await
                .unwrap();
            positions_are_one_based(&nodes)
        })
    }

    #[quickcheck]
    fn plain_text_without_markup_round_trips(input: String) -> TestResult {
        if input.contains('<') || input.is_empty() || input.starts_with('\u{FEFF}') {
            // A leading U+FEFF would be consumed as a byte-order mark.
            return TestResult::discard();
        }
        // The lexer coalesces a contiguous text run into one node.
        TestResult::from_bool(run_blocking(async {
            let nodes = HtmlParser::new()
                .parse_string(&input)
                .to_array()
                .await
                .unwrap();
            matches!(
                nodes.as_slice(),
                [DocumentNode::Text { text_content, .. }] if *text_content == input
            )
        }))
    }
}
