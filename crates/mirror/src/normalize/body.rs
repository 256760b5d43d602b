//! Body selection over a MIME part tree

/// Text wrap width for HTML rendered to plain text
const HTML_TEXT_WIDTH: usize = 100;

/// A node in a backend's MIME tree
///
/// Implemented for Gmail payload parts and for `mailparse` parts so both
/// providers share one selection policy.
pub trait MimeNode {
    /// Lowercased MIME type, empty when the backend didn't say
    fn mime_type(&self) -> String;

    /// Whether the part is an attachment rather than body content
    fn is_attachment(&self) -> bool;

    /// Child parts, in document order
    fn children(&self) -> Vec<&Self>;

    /// Decoded text content of a leaf part
    fn text(&self) -> Option<String>;
}

/// Select the message body from a MIME tree.
///
/// `text/plain` wins over `text/html` at the same multipart level. HTML is
/// rendered to text when it is the only option. Nested multiparts are
/// searched depth-first and the first non-empty result is returned.
pub fn select_body<N: MimeNode>(node: &N) -> Option<String> {
    let children = node.children();
    if children.is_empty() {
        return leaf_text(node);
    }

    let plain_available = children
        .iter()
        .any(|child| is_leaf_of(*child, "text/plain") && leaf_text(*child).is_some());

    children
        .into_iter()
        .filter(|child| !(plain_available && is_leaf_of(*child, "text/html")))
        .find_map(select_body)
}

/// Render HTML to plain text, keeping paragraph breaks
pub fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), HTML_TEXT_WIDTH).unwrap_or_else(|_| html.to_string())
}

fn leaf_text<N: MimeNode>(node: &N) -> Option<String> {
    if node.is_attachment() {
        return None;
    }

    let mime = node.mime_type();
    let text = if mime.is_empty() || mime.starts_with("text/plain") {
        node.text()
    } else if mime.starts_with("text/html") {
        node.text().map(|html| html_to_text(&html))
    } else {
        None
    };

    text.filter(|t| !t.trim().is_empty())
}

fn is_leaf_of<N: MimeNode>(node: &N, mime: &str) -> bool {
    node.children().is_empty() && !node.is_attachment() && node.mime_type().starts_with(mime)
}
