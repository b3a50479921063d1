//! Readable body text.

use scraper::{ElementRef, Html};

use super::metadata::{collapse, selector};

/// Content roots, most specific first.
const ROOTS: [&str; 3] = ["article", "main", "body"];

const BLOCKS: [&str; 17] = [
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "td", "th", "dt", "dd", "figcaption",
    "summary", "caption",
];

/// Elements whose text never counts as content.
const SKIPPED: [&str; 12] =
    ["script", "style", "noscript", "template", "nav", "header", "footer", "aside", "form", "svg", "button", "iframe"];

/// Paragraphs of the first content root, separated by blank lines.
///
/// Falls back to the root's whole visible text when it has no block
/// elements.
pub(crate) fn read_text(doc: &Html) -> String {
    let root = ROOTS
        .iter()
        .find_map(|css| doc.select(&selector(css)).next())
        .unwrap_or_else(|| doc.root_element());

    let mut paragraphs: Vec<String> = Vec::new();
    for block in root.select(&selector(&BLOCKS.join(", "))) {
        if is_nested(block, root) {
            continue;
        }
        let text = visible_text(block);
        if !text.is_empty() {
            paragraphs.push(text);
        }
    }

    if paragraphs.is_empty() {
        return visible_text(root);
    }
    paragraphs.join("\n\n")
}

/// Inside another block or a skipped element below `root`.
fn is_nested(element: ElementRef<'_>, root: ElementRef<'_>) -> bool {
    for ancestor in element.ancestors() {
        if ancestor.id() == root.id() {
            break;
        }
        if let Some(parent) = ancestor.value().as_element()
            && (BLOCKS.contains(&parent.name()) || SKIPPED.contains(&parent.name()))
        {
            return true;
        }
    }
    false
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    push_text(element, &mut raw);
    collapse(&raw)
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let name = child.value().name();
            if SKIPPED.contains(&name) {
                continue;
            }
            if name == "br" || BLOCKS.contains(&name) {
                out.push(' ');
            }
            push_text(child, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(html: &str) -> String {
        read_text(&Html::parse_document(html))
    }

    #[test]
    fn test_prefers_article_over_body() {
        let text = text_of(
            r#"<body>
                <nav><p>Home | About</p></nav>
                <p>Sidebar teaser</p>
                <article>
                    <h1>Headline</h1>
                    <p>First   paragraph with <b>bold</b>words.</p>
                    <script>var tracking = 1;</script>
                    <p>Second<br>line</p>
                </article>
            </body>"#,
        );
        assert_eq!(text, "Headline\n\nFirst paragraph with boldwords.\n\nSecond line");
    }

    #[test]
    fn test_main_then_body() {
        assert_eq!(text_of("<body><main><p>Main text</p></main><p>Other</p></body>"), "Main text");
        assert_eq!(
            text_of("<body><header><p>Site</p></header><p>One</p><footer><p>Legal</p></footer><p>Two</p></body>"),
            "One\n\nTwo"
        );
    }

    #[test]
    fn test_nested_blocks_not_repeated() {
        let text = text_of("<article><ul><li><p>Item one</p></li><li>Item two</li></ul></article>");
        assert_eq!(text, "Item one\n\nItem two");
    }

    #[test]
    fn test_falls_back_to_visible_text() {
        assert_eq!(text_of("<body><div>Just <span>a</span> div</div><style>p{}</style></body>"), "Just a div");
        assert_eq!(text_of(""), "");
    }
}
