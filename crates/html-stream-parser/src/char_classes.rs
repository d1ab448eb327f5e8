use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/// Elements whose opening tag always closes them, regardless of syntax.
///
/// @see https://html.spec.whatwg.org/#void-elements
static VOID_ELEMENTS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ]
    .into_iter()
    .collect()
});

/// Elements whose body is read verbatim until the matching close tag.
///
/// @see https://html.spec.whatwg.org/#generic-raw-text-element-parsing-algorithm
static RAW_TEXT_ELEMENTS: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| ["script", "style", "textarea", "title"].into_iter().collect());

pub(crate) fn is_void_element(tag_name: &str) -> bool {
    VOID_ELEMENTS.contains(tag_name.to_ascii_lowercase().as_str())
}

pub(crate) fn is_raw_text_element(tag_name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(tag_name.to_ascii_lowercase().as_str())
}

pub(crate) fn is_letter(ch: char) -> bool {
    matches!(ch, 'a'..='z' | 'A'..='Z')
}

pub(crate) fn is_whitespace(ch: char) -> bool {
    matches!(ch, '\u{09}'..='\u{0D}' | ' ')
}

pub(crate) fn is_line_break(ch: char) -> bool {
    matches!(ch, '\u{0A}'..='\u{0D}')
}

/// Whether a tagname may begin with this character.
pub(crate) fn is_tag_name_start_char(ch: char) -> bool {
    is_letter(ch) || ch == '_'
}

/// Whether a tagname may contain this character past the first.
///
/// Beyond ASCII this admits the codepoints HTML allows in custom
/// element names.
///
/// @see https://html.spec.whatwg.org/#valid-custom-element-name
pub(crate) fn is_tag_name_char(ch: char) -> bool {
    is_letter(ch) || matches!(ch, '1'..='9' | '-' | '.' | ':' | '_') || is_custom_element_char(ch)
}

fn is_custom_element_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{C0}'..='\u{D6}'
            | '\u{D8}'..='\u{F6}'
            | '\u{F8}'..='\u{37D}'
            | '\u{37F}'..='\u{1FFF}'
            | '\u{200C}'..='\u{200D}'
            | '\u{203F}'..='\u{2040}'
            | '\u{2070}'..='\u{218F}'
            | '\u{2C00}'..='\u{2FEF}'
            | '\u{3001}'..='\u{D7FF}'
            | '\u{F900}'..='\u{FDCF}'
            | '\u{FDF0}'..='\u{FFFD}'
            | '\u{10000}'..='\u{EFFFF}'
    )
}

pub(crate) fn is_attribute_name_char(ch: char) -> bool {
    !matches!(ch, '=' | '>' | '/' | '\'' | '"') && !is_whitespace(ch)
}

pub(crate) fn is_unquoted_attribute_value_char(ch: char) -> bool {
    !matches!(ch, '<' | '>' | '\'' | '"') && !is_whitespace(ch)
}

pub(crate) fn is_attribute_value_quote(ch: char) -> bool {
    matches!(ch, '\'' | '"')
}

/// Quote characters that suspend close-tag scanning inside script
/// bodies. Backticks count because of template literals.
pub(crate) fn is_script_quote(ch: char) -> bool {
    matches!(ch, '\'' | '"' | '`')
}

pub(crate) fn is_style_quote(ch: char) -> bool {
    matches!(ch, '\'' | '"')
}
