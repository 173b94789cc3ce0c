use std::borrow::Cow;

use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{TreeError, TreeResult};
use crate::node::{Content, Node};

// ---------------------------------------------------------------------------
// XML parsing: quick-xml events → tree
// ---------------------------------------------------------------------------

/// Deepest element nesting accepted by [`parse`]. Deeper documents are
/// rejected as malformed so every later tree walk stays bounded.
pub const MAX_DEPTH: usize = 512;

/// Parses a single-root document. Whitespace-only text is not part of the
/// tree; declarations, processing instructions, doctypes and comments outside
/// the root element are skipped.
pub fn parse(xml: &str) -> TreeResult<Node> {
    if xml.trim().is_empty() {
        return Err(TreeError::malformed("empty document: no root element found"));
    }

    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                if stack.is_empty() {
                    ensure_single_root(&root, e)?;
                }
                ensure_depth(stack.len() + 1)?;
                stack.push(start_node(e)?);
            }
            Ok(Event::End(_)) => {
                let completed = stack
                    .pop()
                    .ok_or_else(|| TreeError::malformed("unexpected closing tag"))?;
                attach(&mut stack, &mut root, completed);
            }
            Ok(Event::Empty(ref e)) => {
                if stack.is_empty() {
                    ensure_single_root(&root, e)?;
                }
                ensure_depth(stack.len() + 1)?;
                let elem = start_node(e)?;
                attach(&mut stack, &mut root, elem);
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| TreeError::malformed(format!("text error: {err}")))?;
                check_chars(&text, "text")?;
                if text.chars().all(char::is_whitespace) {
                    continue;
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Content::Text(text.into_owned())),
                    None => {
                        return Err(TreeError::malformed(format!(
                            "text outside the root element: '{}'",
                            text.trim()
                        )))
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                let text = std::str::from_utf8(e)
                    .map_err(|err| TreeError::malformed(format!("CDATA error: {err}")))?;
                check_chars(text, "CDATA section")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(Content::CData(text.to_string())),
                    None => return Err(TreeError::malformed("CDATA outside the root element")),
                }
            }
            Ok(Event::Comment(ref e)) => {
                let text = std::str::from_utf8(e)
                    .map_err(|err| TreeError::malformed(format!("comment error: {err}")))?;
                check_chars(text, "comment")?;
                if text.contains("--") || text.ends_with('-') {
                    return Err(TreeError::malformed("'--' inside a comment"));
                }
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Content::Comment(text.to_string()));
                }
            }
            Ok(Event::Eof) => {
                if !stack.is_empty() {
                    let unclosed: Vec<&str> = stack.iter().map(|el| el.name.as_str()).collect();
                    return Err(TreeError::malformed(format!(
                        "unclosed element(s): <{}>",
                        unclosed.join(">, <")
                    )));
                }
                break;
            }
            Ok(_) => {} // Skip declarations, PIs, doctypes
            Err(e) => {
                return Err(TreeError::malformed(format!(
                    "parse error at position {}: {e}",
                    reader.error_position()
                )))
            }
        }
    }

    let root = root.ok_or_else(|| TreeError::malformed("no root element found"))?;
    debug!("parsed <{}> with {} child element(s)", root.name, root.child_element_count());
    Ok(root)
}

fn ensure_single_root(root: &Option<Node>, e: &BytesStart) -> TreeResult<()> {
    match root {
        Some(existing) => Err(TreeError::malformed(format!(
            "more than one root element: <{}> follows <{}>",
            String::from_utf8_lossy(e.name().as_ref()),
            existing.name
        ))),
        None => Ok(()),
    }
}

fn ensure_depth(depth: usize) -> TreeResult<()> {
    if depth > MAX_DEPTH {
        return Err(TreeError::malformed(format!(
            "elements nested deeper than {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Content::Element(node));
    } else {
        *root = Some(node);
    }
}

fn start_node(e: &BytesStart) -> TreeResult<Node> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| TreeError::malformed(format!("invalid element name: {err}")))?
        .to_string();
    check_name(&name, "element")?;
    check_attribute_spacing(e)?;
    let attributes = read_attributes(e)?;
    Ok(Node { name, attributes, children: Vec::new() })
}

fn read_attributes(e: &BytesStart) -> TreeResult<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| TreeError::malformed(format!("attribute error: {err}")))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| TreeError::malformed(format!("attribute key error: {err}")))?
            .to_string();
        check_name(&key, "attribute")?;
        let val = attr
            .unescape_value()
            .map_err(|err| TreeError::malformed(format!("attribute value error: {err}")))?
            .into_owned();
        check_chars(&val, "attribute value")?;
        attrs.push((key, val));
    }
    Ok(attrs)
}

/// Every closing quote must be followed by whitespace or the end of the tag.
fn check_attribute_spacing(e: &BytesStart) -> TreeResult<()> {
    let raw = e.attributes_raw();
    let mut quote = None;
    for (i, &b) in raw.iter().enumerate() {
        match quote {
            Some(q) if b == q => {
                quote = None;
                if let Some(&next) = raw.get(i + 1) {
                    if !matches!(next, b' ' | b'\t' | b'\r' | b'\n' | b'/') {
                        return Err(TreeError::malformed(format!(
                            "missing whitespace between attributes of <{}>",
                            String::from_utf8_lossy(e.name().as_ref())
                        )));
                    }
                }
            }
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None => {}
        }
    }
    Ok(())
}

fn is_name_start_char(c: char) -> bool {
    matches!(c,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}' | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' | '\u{10000}'..='\u{EFFFF}')
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c)
        || matches!(c, '-' | '.' | '0'..='9' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

fn check_name(name: &str, what: &str) -> TreeResult<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char);
    if valid {
        Ok(())
    } else {
        Err(TreeError::malformed(format!("invalid {what} name {name:?}")))
    }
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

fn check_chars(text: &str, what: &str) -> TreeResult<()> {
    match text.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(TreeError::malformed(format!(
            "invalid character U+{:04X} in {what}",
            c as u32
        ))),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// XML serialization: tree → string
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// No insignificant whitespace. The stored form.
    #[default]
    Compact,
    /// Two-space indentation for element-only content. Elements holding text
    /// are written compactly so the output still parses back to the same tree.
    Pretty,
}

pub fn serialize(node: &Node) -> String {
    serialize_with(node, Layout::Compact)
}

pub fn serialize_with(node: &Node, layout: Layout) -> String {
    let mut out = String::new();
    write_element(node, 0, layout == Layout::Pretty, &mut out);
    if layout == Layout::Pretty {
        let len = out.trim_end().len();
        out.truncate(len);
    }
    out
}

/// Escape XML text content - single pass, no intermediate allocations
fn escape_xml_text(s: &str) -> Cow<'_, str> {
    if s.bytes().any(|b| matches!(b, b'&' | b'<' | b'>')) {
        let mut out = String::with_capacity(s.len() + 8);
        for c in s.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                _ => out.push(c),
            }
        }
        Cow::Owned(out)
    } else {
        Cow::Borrowed(s)
    }
}

/// Escape XML attribute value - single pass, no intermediate allocations
fn escape_xml_attr(s: &str) -> Cow<'_, str> {
    if s.bytes().any(|b| matches!(b, b'&' | b'<' | b'>' | b'"')) {
        let mut out = String::with_capacity(s.len() + 8);
        for c in s.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                _ => out.push(c),
            }
        }
        Cow::Owned(out)
    } else {
        Cow::Borrowed(s)
    }
}

fn push_indent(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push(' ');
    }
}

fn write_element(element: &Node, indent: usize, pretty: bool, out: &mut String) {
    if pretty {
        push_indent(out, indent);
    }

    out.push('<');
    out.push_str(&element.name);
    for (k, v) in &element.attributes {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&escape_xml_attr(v));
        out.push('"');
    }

    if element.children.is_empty() {
        out.push_str("/>");
        if pretty {
            out.push('\n');
        }
        return;
    }

    out.push('>');

    let has_text = element
        .children
        .iter()
        .any(|c| matches!(c, Content::Text(_) | Content::CData(_)));
    let indent_children = pretty && !has_text;

    if indent_children {
        out.push('\n');
    }

    for child in &element.children {
        match child {
            Content::Element(el) => write_element(el, indent + 2, indent_children, out),
            Content::Text(t) => out.push_str(&escape_xml_text(t)),
            Content::CData(c) => {
                out.push_str("<![CDATA[");
                out.push_str(c);
                out.push_str("]]>");
            }
            Content::Comment(c) => {
                if indent_children {
                    push_indent(out, indent + 2);
                }
                out.push_str("<!--");
                out.push_str(c);
                out.push_str("-->");
                if indent_children {
                    out.push('\n');
                }
            }
        }
    }

    if indent_children {
        push_indent(out, indent);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
    if pretty {
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_round_trip(xml: &str) {
        let tree = parse(xml).unwrap();
        let text = serialize(&tree);
        assert_eq!(parse(&text).unwrap(), tree, "round trip changed {xml}");
        assert_eq!(serialize(&parse(&text).unwrap()), text);
    }

    #[test]
    fn test_parse_structure() {
        let tree = parse(r#"<Root><Dept id="eng" floor="2"><Team name="infra"/></Dept><Dept id="ops"/></Root>"#)
            .unwrap();
        assert_eq!(tree.name, "Root");
        assert_eq!(tree.child_element_count(), 2);
        let eng = tree.child_elements().next().unwrap();
        assert_eq!(
            eng.attributes,
            vec![("id".to_string(), "eng".to_string()), ("floor".to_string(), "2".to_string())]
        );
        assert_eq!(eng.child_elements().next().unwrap().get_attribute("name"), Some("infra"));
    }

    #[test]
    fn test_compact_serialization() {
        let xml = r#"<Root><Dept id="eng"/></Root>"#;
        assert_eq!(serialize(&parse(xml).unwrap()), xml);

        let spaced = "<Root>\n  <Dept id=\"eng\">\n    <Team/>\n  </Dept>\n</Root>";
        assert_eq!(serialize(&parse(spaced).unwrap()), r#"<Root><Dept id="eng"><Team/></Dept></Root>"#);
    }

    #[test]
    fn test_round_trip_preserves_content() {
        assert_round_trip(r#"<Root><person id="1" b="2" a="3"><name>Franciszek</name><children/></person></Root>"#);
        assert_round_trip(r#"<Root><note>a &amp; b &lt; c "q"</note><x v="&quot;&amp;&lt;"/></Root>"#);
        assert_round_trip("<Root><![CDATA[<raw>]]><!-- kept --><p>mixed <b>bold</b> tail</p></Root>");
        assert_round_trip(r#"<?xml version="1.0"?><Root><x:y xmlns:x="urn:x"/></Root>"#);
    }

    #[test]
    fn test_empty_and_open_close_are_equal() {
        assert_eq!(parse("<a></a>").unwrap(), parse("<a/>").unwrap());
    }

    #[test]
    fn test_escaping() {
        let mut node = Node::new("n").with_attribute("v", "\"<&>");
        node.children.push(Content::Text("1 < 2 & 3 > 2".into()));
        let text = serialize(&node);
        assert_eq!(text, r#"<n v="&quot;&lt;&amp;&gt;">1 &lt; 2 &amp; 3 &gt; 2</n>"#);
        assert_eq!(parse(&text).unwrap(), node);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "   ",
            "<Root>",
            "<Root></Other>",
            "</Root>",
            "<a/><b/>",
            "<a></a><b></b>",
            "text only",
            "<a/>trailing",
            "<a>&bogus;</a>",
            r#"<a x="1" x="2"/>"#,
            "<a>\u{1}</a>",
            "<a>&#1;</a>",
            "<1a/>",
            "<a\0/>",
            "<-a></-a>",
            r#"<a b="1"c="2"/>"#,
            r#"<a 1b="x"/>"#,
            "<a b=\"\u{1b}\"/>",
            "<a><![CDATA[\u{0}]]></a>",
            "<a><!-- x -- y --></a>",
        ] {
            let err = parse(bad).unwrap_err();
            assert_eq!(err.kind(), "MalformedInput", "accepted {bad:?}");
        }
    }

    #[test]
    fn test_accepts_unicode_names_and_spacing() {
        let tree = parse("<Zespół\tnazwa='a'\nx:id=\"b\"><é.1-_/></Zespół>").unwrap();
        assert_eq!(tree.attributes.len(), 2);
        assert_eq!(tree.child_elements().next().unwrap().name, "é.1-_");
    }

    fn nested(depth: usize) -> String {
        format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth))
    }

    #[test]
    fn test_nesting_limit() {
        let deepest = parse(&nested(MAX_DEPTH)).unwrap();
        assert_eq!(deepest.depth(), MAX_DEPTH);
        let inner = MAX_DEPTH - 1;
        assert_eq!(serialize(&deepest), format!("{}<a/>{}", "<a>".repeat(inner), "</a>".repeat(inner)));

        for depth in [MAX_DEPTH + 1, 100_000] {
            let err = parse(&nested(depth)).unwrap_err();
            assert_eq!(err.kind(), "MalformedInput");
        }
        let err = parse(&format!("{}<b/>{}", "<a>".repeat(MAX_DEPTH), "</a>".repeat(MAX_DEPTH))).unwrap_err();
        assert!(err.to_string().contains("nested deeper"), "{err}");
    }

    #[test]
    fn test_pretty_layout_reparses_to_same_tree() {
        let tree = parse(r#"<Root><Dept id="eng"><Team name="infra"/><!--c--></Dept><Note>hi <b>x</b></Note></Root>"#)
            .unwrap();
        let pretty = serialize_with(&tree, Layout::Pretty);
        assert!(pretty.contains("\n  <Dept id=\"eng\">\n    <Team name=\"infra\"/>\n"));
        assert!(pretty.contains("<Note>hi <b>x</b></Note>"));
        assert!(!pretty.ends_with('\n'));
        assert_eq!(parse(&pretty).unwrap(), tree);
    }
}
