use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::Html;

/// Tags whose whole subtree is chrome, never content.
const DROPPED_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "svg", "template"];

/// Elements with no closing tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Normalize raw page bytes into stable HTML for the parser.
///
/// Drops scripts, styles, comments, and tracking pixels; keeps tag
/// structure, text, and the semantically significant attributes (`href`,
/// `id`, `class`, `data-*`). Whitespace runs collapse to a single space,
/// except runs containing a line break, which collapse to a single newline —
/// date ranges in calendar cells depend on those breaks surviving.
///
/// Deterministic and idempotent: `normalize_html(normalize_html(x)) ==
/// normalize_html(x)`.
pub fn normalize_html(bytes: &[u8]) -> String {
    let raw = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&raw);
    let mut out = String::with_capacity(raw.len() / 2);
    write_node(document.tree.root(), &mut out);
    out
}

fn write_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Document | Node::Fragment => {
            for child in node.children() {
                write_node(child, out);
            }
        }
        Node::Element(element) => {
            let name = element.name();
            if DROPPED_TAGS.contains(&name) {
                return;
            }
            if name == "img" && is_tracking_pixel(element) {
                return;
            }

            out.push('<');
            out.push_str(name);
            let mut kept: Vec<(&str, &str)> = element
                .attrs()
                .filter(|(k, _)| keep_attr(k))
                .collect();
            kept.sort();
            for (key, value) in kept {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                escape_into(value, true, out);
                out.push('"');
            }
            out.push('>');

            if VOID_TAGS.contains(&name) {
                return;
            }
            for child in node.children() {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Node::Text(text) => {
            let collapsed = collapse_whitespace(&text.text);
            escape_into(&collapsed, false, out);
        }
        // Comments, doctypes, and processing instructions are chrome.
        _ => {}
    }
}

fn keep_attr(key: &str) -> bool {
    key == "href" || key == "id" || key == "class" || key.starts_with("data-")
}

fn is_tracking_pixel(element: &scraper::node::Element) -> bool {
    element.attr("width") == Some("1") && element.attr("height") == Some("1")
}

/// Collapse each whitespace run to a single space, or a single newline when
/// the run contains one.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run_has_newline = false;
    let mut in_run = false;
    for c in text.chars() {
        if c.is_whitespace() {
            in_run = true;
            if c == '\n' {
                run_has_newline = true;
            }
        } else {
            if in_run {
                out.push(if run_has_newline { '\n' } else { ' ' });
                in_run = false;
                run_has_newline = false;
            }
            out.push(c);
        }
    }
    if in_run {
        out.push(if run_has_newline { '\n' } else { ' ' });
    }
    out
}

fn escape_into(text: &str, attr: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}
