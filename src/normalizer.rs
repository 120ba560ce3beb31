//! HTML to text normalization for the cleaning stage, plus the markdown rendering
//! stored on raw records.

use scraper::{ElementRef, Html, Node, Selector};

use crate::records::RawRecord;

/// Elements whose contents never count as page text.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];
/// Additional chrome skipped when rendering markdown.
const MARKDOWN_SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg", "nav"];
const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre",
];
const MAX_BLOCKS: usize = 8192;

/// Reduces a raw record to whitespace-collapsed plain text.
///
/// HTML wins when present; text appended by PDF augmentation is added after it. Records
/// without HTML fall back to their markdown, which already carries that text.
pub fn normalize_record(record: &RawRecord) -> String {
    if record.html.trim().is_empty() {
        return collapse_whitespace(&record.markdown);
    }
    let mut text = html_text(&record.html);
    for attachment in record.attachments() {
        text.push(' ');
        text.push_str(attachment);
    }
    collapse_whitespace(&text)
}

/// Concatenates every text node outside script/style-like elements.
pub fn html_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut pieces: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| SKIPPED_TAGS.contains(&el.name()))
                .unwrap_or(false)
        });
        if !hidden {
            pieces.push(text);
        }
    }
    collapse_whitespace(&pieces.join(" "))
}

/// Collapses every whitespace run to a single space and trims the ends.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

/// Renders the readable blocks of an HTML page as markdown.
pub fn render_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = RootSelectors::new().pick_root(&document);
    let mut collector = BlockCollector::default();
    collector.walk(root);
    collector.finish()
}

struct RootSelectors {
    article: Selector,
    main: Selector,
    body: Selector,
}

impl RootSelectors {
    fn new() -> Self {
        Self {
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    fn pick_root<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Heading(u8),
    Paragraph,
    ListItem,
    Preformatted,
    Quote,
}

#[derive(Default)]
struct BlockCollector {
    blocks: Vec<String>,
}

impl BlockCollector {
    fn walk(&mut self, root: ElementRef<'_>) {
        for element in root.descendent_elements() {
            if self.blocks.len() >= MAX_BLOCKS {
                break;
            }
            self.maybe_record(root, element);
        }
    }

    fn maybe_record(&mut self, root: ElementRef<'_>, element: ElementRef<'_>) {
        let kind = match element.value().name() {
            "h1" => BlockKind::Heading(1),
            "h2" => BlockKind::Heading(2),
            "h3" => BlockKind::Heading(3),
            "h4" => BlockKind::Heading(4),
            "h5" => BlockKind::Heading(5),
            "h6" => BlockKind::Heading(6),
            "p" => BlockKind::Paragraph,
            "li" => BlockKind::ListItem,
            "blockquote" => BlockKind::Quote,
            "pre" => BlockKind::Preformatted,
            _ => return,
        };

        // Nested blocks are rendered by their outermost block ancestor.
        let mut ancestors = element
            .ancestors()
            .take_while(|node| node.id() != root.id())
            .filter_map(ElementRef::wrap);
        let suppressed = ancestors.any(|ancestor| {
            let name = ancestor.value().name();
            MARKDOWN_SKIPPED_TAGS.contains(&name) || BLOCK_TAGS.contains(&name)
        });
        if suppressed {
            return;
        }

        let raw: String = element.text().collect();
        let rendered = match kind {
            BlockKind::Preformatted => {
                let body = collapse_newlines(&raw);
                if body.is_empty() {
                    return;
                }
                format!("```\n{body}\n```")
            }
            _ => {
                let text = collapse_whitespace(&raw);
                if text.is_empty() {
                    return;
                }
                match kind {
                    BlockKind::Heading(level) => {
                        format!("{} {text}", "#".repeat(level as usize))
                    }
                    BlockKind::ListItem => format!("- {text}"),
                    BlockKind::Quote => format!("> {text}"),
                    _ => text,
                }
            }
        };
        self.blocks.push(rendered);
    }

    fn finish(self) -> String {
        self.blocks.join("\n\n")
    }
}

fn collapse_newlines(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
