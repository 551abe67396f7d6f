//! Restricted Markdown rendering for finalized assistant replies.
//!
//! Rendering runs in two stages. [`lex`] turns `pulldown_cmark` events into
//! tagged [`Block`]/[`Inline`] tokens, keeping the exact source slice of
//! anything outside the supported subset. [`render_tokens`] maps tokens to
//! display [`Node`]s; unsupported tokens come out as their raw source text.
//! Neither stage can fail.

use std::fmt::Write as _;
use std::iter::Peekable;
use std::ops::Range;

use pulldown_cmark::{Alignment, CodeBlockKind, Event, Options, Parser, Tag, TagEnd};

/// Links open in a fresh browsing context with no handle back to the page.
pub const LINK_TARGET: &str = "_blank";
pub const LINK_REL: &str = "noopener noreferrer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    fn from_source(alignment: Alignment) -> Option<Self> {
        match alignment {
            Alignment::None => None,
            Alignment::Left => Some(Self::Left),
            Alignment::Center => Some(Self::Center),
            Alignment::Right => Some(Self::Right),
        }
    }

    pub fn as_css(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    /// Inline content placed directly in a container, as in tight list items.
    Text(Vec<Inline>),
    Heading {
        level: u8,
        content: Vec<Inline>,
    },
    List {
        ordered: bool,
        start: Option<u64>,
        items: Vec<Vec<Block>>,
    },
    Code {
        lang: Option<String>,
        text: String,
    },
    BlockQuote(Vec<Block>),
    Table(TableToken),
    Rule,
    Unknown {
        raw: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableToken {
    pub align: Vec<Option<Align>>,
    pub header: Vec<Vec<Inline>>,
    pub rows: Vec<Vec<Vec<Inline>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Strong(Vec<Inline>),
    Emphasis(Vec<Inline>),
    Code(String),
    Link {
        href: String,
        title: Option<String>,
        content: Vec<Inline>,
    },
    LineBreak,
    Unknown {
        raw: String,
    },
}

/// Display tree produced by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Paragraph(Vec<Node>),
    Strong(Vec<Node>),
    Emphasis(Vec<Node>),
    Code(String),
    /// Code block contents, kept verbatim.
    Preformatted(String),
    List {
        ordered: bool,
        start: Option<u64>,
        items: Vec<Vec<Node>>,
    },
    BlockQuote(Vec<Node>),
    Table(TableNode),
    Link {
        href: String,
        title: Option<String>,
        children: Vec<Node>,
    },
    LineBreak,
    Rule,
    /// Source of a block outside the supported subset.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNode {
    pub header: Vec<CellNode>,
    pub rows: Vec<Vec<CellNode>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellNode {
    pub align: Option<Align>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rendered {
    nodes: Vec<Node>,
}

impl Rendered {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Serializes to HTML with every text and attribute value escaped.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            write_html(&mut out, node);
        }
        out
    }

    /// Flattens to terminal-friendly text.
    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        write_plain_blocks(&mut out, &self.nodes, "");
        out.trim_end().to_string()
    }
}

/// Renders Markdown text into display nodes.
pub fn render(text: &str) -> Rendered {
    render_tokens(&lex(text))
}

/// Tokenizes Markdown text.
pub fn lex(text: &str) -> Vec<Block> {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let mut events = Parser::new_ext(text, options).into_offset_iter().peekable();
    parse_blocks(&mut events, text)
}

pub fn render_tokens(blocks: &[Block]) -> Rendered {
    let mut nodes = Vec::new();
    for block in blocks {
        render_block(&mut nodes, block);
    }
    Rendered { nodes }
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

fn parse_blocks<'a, I>(events: &mut Peekable<I>, source: &str) -> Vec<Block>
where
    I: Iterator<Item = (Event<'a>, Range<usize>)>,
{
    let mut blocks = Vec::new();

    while let Some((event, range)) = events.next() {
        match event {
            Event::End(_) => break,
            Event::Start(Tag::Paragraph) => {
                blocks.push(Block::Paragraph(parse_inlines(events, source)));
            }
            Event::Start(Tag::Heading { level, .. }) => blocks.push(Block::Heading {
                level: level as u8,
                content: parse_inlines(events, source),
            }),
            Event::Start(Tag::BlockQuote(_)) => {
                blocks.push(Block::BlockQuote(parse_blocks(events, source)));
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().map(str::to_string)
                    }
                    CodeBlockKind::Indented => None,
                };
                blocks.push(Block::Code {
                    lang,
                    text: collect_code(events),
                });
            }
            Event::Start(Tag::List(start)) => {
                let mut items = Vec::new();
                while let Some((event, _)) = events.next() {
                    match event {
                        Event::Start(Tag::Item) => items.push(parse_blocks(events, source)),
                        Event::End(_) => break,
                        _ => {}
                    }
                }
                blocks.push(Block::List {
                    ordered: start.is_some(),
                    start,
                    items,
                });
            }
            Event::Start(Tag::Table(alignments)) => {
                blocks.push(Block::Table(parse_table(alignments, events, source)));
            }
            Event::Rule => blocks.push(Block::Rule),
            event if is_inline(&event) => {
                let mut run = Vec::new();
                push_inline(&mut run, parse_inline(event, range, events, source));
                while events.peek().is_some_and(|(next, _)| is_inline(next)) {
                    let Some((next, range)) = events.next() else {
                        break;
                    };
                    push_inline(&mut run, parse_inline(next, range, events, source));
                }
                blocks.push(Block::Text(run));
            }
            Event::Start(_) => {
                skip_container(events);
                blocks.push(Block::Unknown {
                    raw: source_slice(source, range),
                });
            }
            _ => blocks.push(Block::Unknown {
                raw: source_slice(source, range),
            }),
        }
    }

    blocks
}

fn parse_inlines<'a, I>(events: &mut Peekable<I>, source: &str) -> Vec<Inline>
where
    I: Iterator<Item = (Event<'a>, Range<usize>)>,
{
    let mut inlines = Vec::new();
    while let Some((event, range)) = events.next() {
        if matches!(event, Event::End(_)) {
            break;
        }
        let inline = parse_inline(event, range, events, source);
        push_inline(&mut inlines, inline);
    }
    inlines
}

fn parse_inline<'a, I>(
    event: Event<'a>,
    range: Range<usize>,
    events: &mut Peekable<I>,
    source: &str,
) -> Inline
where
    I: Iterator<Item = (Event<'a>, Range<usize>)>,
{
    match event {
        Event::Text(text) => Inline::Text(text.into_string()),
        Event::Code(code) => Inline::Code(code.into_string()),
        Event::SoftBreak => Inline::Text("\n".to_string()),
        Event::HardBreak => Inline::LineBreak,
        Event::Start(Tag::Strong) => Inline::Strong(parse_inlines(events, source)),
        Event::Start(Tag::Emphasis) => Inline::Emphasis(parse_inlines(events, source)),
        Event::Start(Tag::Link {
            dest_url, title, ..
        }) => Inline::Link {
            href: dest_url.into_string(),
            title: (!title.is_empty()).then(|| title.into_string()),
            content: parse_inlines(events, source),
        },
        Event::Start(_) => {
            skip_container(events);
            Inline::Unknown {
                raw: source_slice(source, range),
            }
        }
        _ => Inline::Unknown {
            raw: source_slice(source, range),
        },
    }
}

fn parse_table<'a, I>(
    alignments: Vec<Alignment>,
    events: &mut Peekable<I>,
    source: &str,
) -> TableToken
where
    I: Iterator<Item = (Event<'a>, Range<usize>)>,
{
    let mut table = TableToken {
        align: alignments.into_iter().map(Align::from_source).collect(),
        header: Vec::new(),
        rows: Vec::new(),
    };

    while let Some((event, _)) = events.next() {
        match event {
            Event::Start(Tag::TableHead) => table.header = parse_cells(events, source),
            Event::Start(Tag::TableRow) => {
                let cells = parse_cells(events, source);
                if table.header.is_empty() && table.rows.is_empty() {
                    table.header = cells;
                } else {
                    table.rows.push(cells);
                }
            }
            Event::End(TagEnd::Table) => break,
            Event::Start(_) => skip_container(events),
            _ => {}
        }
    }

    table
}

fn parse_cells<'a, I>(events: &mut Peekable<I>, source: &str) -> Vec<Vec<Inline>>
where
    I: Iterator<Item = (Event<'a>, Range<usize>)>,
{
    let mut cells = Vec::new();
    while let Some((event, _)) = events.next() {
        match event {
            Event::Start(Tag::TableCell) => cells.push(parse_inlines(events, source)),
            Event::Start(Tag::TableRow) => {}
            Event::End(TagEnd::TableRow | TagEnd::TableHead) => break,
            Event::Start(_) => skip_container(events),
            _ => {}
        }
    }
    cells
}

fn collect_code<'a, I>(events: &mut Peekable<I>) -> String
where
    I: Iterator<Item = (Event<'a>, Range<usize>)>,
{
    let mut text = String::new();
    while let Some((event, _)) = events.next() {
        match event {
            Event::Text(chunk) => text.push_str(&chunk),
            Event::End(_) => break,
            _ => {}
        }
    }
    if text.ends_with('\n') {
        text.pop();
    }
    text
}

/// Consumes events up to the end of a container whose start was already read.
fn skip_container<'a, I>(events: &mut Peekable<I>)
where
    I: Iterator<Item = (Event<'a>, Range<usize>)>,
{
    let mut depth = 1usize;
    for (event, _) in events.by_ref() {
        match event {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
            _ => {}
        }
    }
}

fn is_inline(event: &Event<'_>) -> bool {
    matches!(
        event,
        Event::Text(_)
            | Event::Code(_)
            | Event::SoftBreak
            | Event::HardBreak
            | Event::InlineHtml(_)
            | Event::InlineMath(_)
            | Event::FootnoteReference(_)
            | Event::Start(
                Tag::Emphasis
                    | Tag::Strong
                    | Tag::Strikethrough
                    | Tag::Link { .. }
                    | Tag::Image { .. }
            )
    )
}

fn push_inline(inlines: &mut Vec<Inline>, inline: Inline) {
    if let (Some(Inline::Text(last)), Inline::Text(next)) = (inlines.last_mut(), &inline) {
        last.push_str(next);
        return;
    }
    inlines.push(inline);
}

fn source_slice(source: &str, range: Range<usize>) -> String {
    source.get(range).unwrap_or_default().to_string()
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_block(out: &mut Vec<Node>, block: &Block) {
    match block {
        Block::Paragraph(inlines) => out.push(Node::Paragraph(render_inlines(inlines))),
        Block::Text(inlines) => {
            for node in render_inlines(inlines) {
                push_node(out, node);
            }
        }
        // Headings are emphasized text, not document structure.
        Block::Heading { content, .. } => {
            out.push(Node::Strong(render_inlines(content)));
            out.push(Node::LineBreak);
        }
        Block::List {
            ordered,
            start,
            items,
        } => out.push(Node::List {
            ordered: *ordered,
            start: *start,
            items: items.iter().map(|item| render_item(item)).collect(),
        }),
        Block::Code { text, .. } => out.push(Node::Preformatted(text.clone())),
        Block::BlockQuote(blocks) => {
            let mut children = Vec::new();
            for block in blocks {
                render_block(&mut children, block);
            }
            out.push(Node::BlockQuote(children));
        }
        Block::Table(table) => out.push(Node::Table(render_table(table))),
        Block::Rule => out.push(Node::Rule),
        Block::Unknown { raw } => out.push(Node::Raw(raw.clone())),
    }
}

fn render_item(blocks: &[Block]) -> Vec<Node> {
    let mut nodes = Vec::new();
    for block in blocks {
        match block {
            Block::Paragraph(inlines) | Block::Text(inlines) => {
                if !nodes.is_empty() {
                    nodes.push(Node::LineBreak);
                }
                for node in render_inlines(inlines) {
                    push_node(&mut nodes, node);
                }
            }
            other => render_block(&mut nodes, other),
        }
    }
    nodes
}

fn render_table(table: &TableToken) -> TableNode {
    // Header and body cells resolve alignment independently by column index.
    let cell = |index: usize, inlines: &Vec<Inline>| CellNode {
        align: table.align.get(index).copied().flatten(),
        children: render_inlines(inlines),
    };

    TableNode {
        header: table
            .header
            .iter()
            .enumerate()
            .map(|(index, inlines)| cell(index, inlines))
            .collect(),
        rows: table
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .map(|(index, inlines)| cell(index, inlines))
                    .collect()
            })
            .collect(),
    }
}

fn render_inlines(inlines: &[Inline]) -> Vec<Node> {
    let mut nodes = Vec::with_capacity(inlines.len());
    for inline in inlines {
        let node = match inline {
            Inline::Text(text) => Node::Text(text.clone()),
            Inline::Strong(children) => Node::Strong(render_inlines(children)),
            Inline::Emphasis(children) => Node::Emphasis(render_inlines(children)),
            Inline::Code(code) => Node::Code(code.clone()),
            Inline::Link {
                href,
                title,
                content,
            } => Node::Link {
                href: href.clone(),
                title: title.clone(),
                children: render_inlines(content),
            },
            Inline::LineBreak => Node::LineBreak,
            Inline::Unknown { raw } => Node::Text(raw.clone()),
        };
        push_node(&mut nodes, node);
    }
    nodes
}

fn push_node(nodes: &mut Vec<Node>, node: Node) {
    if let (Some(Node::Text(last)), Node::Text(next)) = (nodes.last_mut(), &node) {
        last.push_str(next);
        return;
    }
    nodes.push(node);
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

fn write_html(out: &mut String, node: &Node) {
    match node {
        Node::Text(text) => escape_into(out, text),
        Node::Paragraph(children) => write_element(out, "p", children),
        Node::Strong(children) => write_element(out, "strong", children),
        Node::Emphasis(children) => write_element(out, "em", children),
        Node::Code(code) => {
            out.push_str("<code>");
            escape_into(out, code);
            out.push_str("</code>");
        }
        Node::Preformatted(code) => {
            out.push_str("<pre><code>");
            escape_into(out, code);
            out.push_str("</code></pre>");
        }
        Node::List {
            ordered,
            start,
            items,
        } => {
            let tag = if *ordered { "ol" } else { "ul" };
            match start {
                Some(start) if *ordered && *start != 1 => {
                    let _ = write!(out, "<ol start=\"{start}\">");
                }
                _ => {
                    let _ = write!(out, "<{tag}>");
                }
            }
            for item in items {
                write_element(out, "li", item);
            }
            let _ = write!(out, "</{tag}>");
        }
        Node::BlockQuote(children) => write_element(out, "blockquote", children),
        Node::Table(table) => {
            out.push_str("<div class=\"table-container\"><table><thead><tr>");
            for cell in &table.header {
                write_cell(out, "th", cell);
            }
            out.push_str("</tr></thead><tbody>");
            for row in &table.rows {
                out.push_str("<tr>");
                for cell in row {
                    write_cell(out, "td", cell);
                }
                out.push_str("</tr>");
            }
            out.push_str("</tbody></table></div>");
        }
        Node::Link {
            href,
            title,
            children,
        } => {
            out.push_str("<a href=\"");
            escape_into(out, href);
            out.push('"');
            if let Some(title) = title {
                out.push_str(" title=\"");
                escape_into(out, title);
                out.push('"');
            }
            let _ = write!(out, " target=\"{LINK_TARGET}\" rel=\"{LINK_REL}\">");
            for child in children {
                write_html(out, child);
            }
            out.push_str("</a>");
        }
        Node::LineBreak => out.push_str("<br />"),
        Node::Rule => out.push_str("<hr />"),
        Node::Raw(raw) => {
            out.push_str("<span>");
            escape_into(out, raw);
            out.push_str("</span>");
        }
    }
}

fn write_element(out: &mut String, tag: &str, children: &[Node]) {
    let _ = write!(out, "<{tag}>");
    for child in children {
        write_html(out, child);
    }
    let _ = write!(out, "</{tag}>");
}

fn write_cell(out: &mut String, tag: &str, cell: &CellNode) {
    match cell.align {
        Some(align) => {
            let _ = write!(out, "<{tag} style=\"text-align: {};\">", align.as_css());
        }
        None => {
            let _ = write!(out, "<{tag}>");
        }
    }
    for child in &cell.children {
        write_html(out, child);
    }
    let _ = write!(out, "</{tag}>");
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Plain text
// ---------------------------------------------------------------------------

fn write_plain_blocks(out: &mut String, nodes: &[Node], indent: &str) {
    let mut inline_run = String::new();

    let flush = |out: &mut String, run: &mut String| {
        if run.is_empty() {
            return;
        }
        push_indented(out, run.trim_end(), indent);
        out.push_str("\n\n");
        run.clear();
    };

    for node in nodes {
        match node {
            Node::Paragraph(children) => {
                flush(out, &mut inline_run);
                let mut text = String::new();
                write_plain_inlines(&mut text, children);
                push_indented(out, &text, indent);
                out.push_str("\n\n");
            }
            Node::Preformatted(code) => {
                flush(out, &mut inline_run);
                let nested = format!("{indent}    ");
                push_indented(out, code, &nested);
                out.push_str("\n\n");
            }
            Node::List {
                ordered,
                start,
                items,
            } => {
                flush(out, &mut inline_run);
                let first = start.unwrap_or(1);
                for (offset, item) in items.iter().enumerate() {
                    let marker = if *ordered {
                        format!("{}. ", first + offset as u64)
                    } else {
                        "- ".to_string()
                    };
                    let mut body = String::new();
                    write_plain_blocks(&mut body, item, "");
                    let body = body.trim_end();
                    let continuation = format!("{indent}{}", " ".repeat(marker.len()));
                    for (line_index, line) in body.lines().enumerate() {
                        if line_index == 0 {
                            let _ = writeln!(out, "{indent}{marker}{line}");
                        } else if line.is_empty() {
                            out.push('\n');
                        } else {
                            let _ = writeln!(out, "{continuation}{line}");
                        }
                    }
                    if body.is_empty() {
                        let _ = writeln!(out, "{indent}{}", marker.trim_end());
                    }
                }
                out.push('\n');
            }
            Node::BlockQuote(children) => {
                flush(out, &mut inline_run);
                let mut body = String::new();
                write_plain_blocks(&mut body, children, "");
                for line in body.trim_end().lines() {
                    let _ = writeln!(out, "{indent}> {line}");
                }
                out.push('\n');
            }
            Node::Table(table) => {
                flush(out, &mut inline_run);
                write_plain_table(out, table, indent);
                out.push('\n');
            }
            Node::Rule => {
                flush(out, &mut inline_run);
                let _ = write!(out, "{indent}---\n\n");
            }
            Node::Raw(raw) => {
                flush(out, &mut inline_run);
                push_indented(out, raw.trim_end(), indent);
                out.push_str("\n\n");
            }
            inline => write_plain_inlines(&mut inline_run, std::slice::from_ref(inline)),
        }
    }

    flush(out, &mut inline_run);
}

fn write_plain_inlines(out: &mut String, nodes: &[Node]) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Strong(children) | Node::Emphasis(children) => write_plain_inlines(out, children),
            Node::Code(code) => {
                let _ = write!(out, "`{code}`");
            }
            Node::Link { href, children, .. } => {
                let mut label = String::new();
                write_plain_inlines(&mut label, children);
                if label.is_empty() || label == *href {
                    out.push_str(href);
                } else {
                    let _ = write!(out, "{label} ({href})");
                }
            }
            Node::LineBreak => out.push('\n'),
            Node::Raw(raw) => out.push_str(raw),
            block => {
                let mut nested = String::new();
                write_plain_blocks(&mut nested, std::slice::from_ref(block), "");
                out.push_str(nested.trim_end());
            }
        }
    }
}

fn write_plain_table(out: &mut String, table: &TableNode, indent: &str) {
    let to_text = |cell: &CellNode| {
        let mut text = String::new();
        write_plain_inlines(&mut text, &cell.children);
        (text.replace('\n', " "), cell.align)
    };

    let header = table.header.iter().map(to_text).collect::<Vec<_>>();
    let rows = table
        .rows
        .iter()
        .map(|row| row.iter().map(to_text).collect::<Vec<_>>())
        .collect::<Vec<_>>();

    let columns = std::iter::once(&header)
        .chain(rows.iter())
        .map(Vec::len)
        .max()
        .unwrap_or(0);
    let mut widths = vec![3usize; columns];
    for row in std::iter::once(&header).chain(rows.iter()) {
        for (index, (text, _)) in row.iter().enumerate() {
            widths[index] = widths[index].max(text.chars().count());
        }
    }

    let write_row = |out: &mut String, row: &[(String, Option<Align>)]| {
        out.push_str(indent);
        out.push('|');
        for (index, width) in widths.iter().enumerate() {
            let (text, align) = row
                .get(index)
                .map(|(text, align)| (text.as_str(), *align))
                .unwrap_or(("", None));
            let _ = write!(out, " {} |", pad_cell(text, *width, align));
        }
        out.push('\n');
    };

    write_row(out, &header);
    out.push_str(indent);
    out.push('|');
    for width in &widths {
        let _ = write!(out, "{}|", "-".repeat(width + 2));
    }
    out.push('\n');
    for row in &rows {
        write_row(out, row);
    }
}

fn pad_cell(text: &str, width: usize, align: Option<Align>) -> String {
    let len = text.chars().count();
    if len >= width {
        return text.to_string();
    }
    let pad = width - len;
    match align {
        None | Some(Align::Left) => format!("{text}{}", " ".repeat(pad)),
        Some(Align::Right) => format!("{}{text}", " ".repeat(pad)),
        Some(Align::Center) => {
            let left = pad / 2;
            format!("{}{text}{}", " ".repeat(left), " ".repeat(pad - left))
        }
    }
}

fn push_indented(out: &mut String, text: &str, indent: &str) {
    if indent.is_empty() {
        out.push_str(text);
        return;
    }
    for (index, line) in text.lines().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        if !line.is_empty() {
            out.push_str(indent);
        }
        out.push_str(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> Node {
        Node::Text(value.to_string())
    }

    #[test]
    fn empty_input_renders_nothing() {
        assert!(render("").is_empty());
        assert!(render("\n\n   \n").is_empty());
        assert_eq!(render("").to_html(), "");
    }

    #[test]
    fn rendering_is_idempotent() {
        let source = "# Title\n\nSome **bold** and *soft* text with `code`.\n\n\
                      | a | b |\n|:--|--:|\n| 1 | 2 |\n\n> quoted\n\n1. one\n2. two\n";
        let first = render(source);
        let second = render(source);
        assert_eq!(first, second);
        assert_eq!(first.to_html(), second.to_html());
    }

    #[test]
    fn paragraph_with_inline_styles() {
        let rendered = render("Hello **bold** *it* `x` \\*esc\\*");
        assert_eq!(
            rendered.nodes(),
            [Node::Paragraph(vec![
                text("Hello "),
                Node::Strong(vec![text("bold")]),
                text(" "),
                Node::Emphasis(vec![text("it")]),
                text(" "),
                Node::Code("x".to_string()),
                text(" *esc*"),
            ])]
        );
    }

    #[test]
    fn heading_becomes_bold_text_and_break() {
        assert_eq!(
            render("## Install").nodes(),
            [Node::Strong(vec![text("Install")]), Node::LineBreak]
        );
    }

    #[test]
    fn fenced_code_is_kept_verbatim() {
        let rendered = render("```cpp\nint main() { return a < b; }\n```\n");
        assert_eq!(
            rendered.nodes(),
            [Node::Preformatted("int main() { return a < b; }".to_string())]
        );
        assert_eq!(
            rendered.to_html(),
            "<pre><code>int main() { return a &lt; b; }</code></pre>"
        );
    }

    #[test]
    fn lists_keep_order_and_inline_items() {
        let rendered = render("- first\n- **second**\n\n3. three\n4. four\n");
        assert_eq!(
            rendered.nodes(),
            [
                Node::List {
                    ordered: false,
                    start: None,
                    items: vec![vec![text("first")], vec![Node::Strong(vec![text("second")])]],
                },
                Node::List {
                    ordered: true,
                    start: Some(3),
                    items: vec![vec![text("three")], vec![text("four")]],
                },
            ]
        );
        assert!(rendered.to_html().starts_with("<ul><li>first</li>"));
        assert!(rendered.to_html().contains("<ol start=\"3\">"));
    }

    #[test]
    fn blockquote_renders_nested_blocks() {
        assert_eq!(
            render("> quote\n>\n> - item\n").nodes(),
            [Node::BlockQuote(vec![
                Node::Paragraph(vec![text("quote")]),
                Node::List {
                    ordered: false,
                    start: None,
                    items: vec![vec![text("item")]],
                },
            ])]
        );
    }

    #[test]
    fn table_alignment_resolves_per_column() {
        let rendered = render("| L | C | R | N |\n|:--|:-:|--:|---|\n| 1 | 2 | 3 | 4 |\n");
        let [Node::Table(table)] = rendered.nodes() else {
            panic!("expected a single table, got {:?}", rendered.nodes());
        };

        let header_align = table.header.iter().map(|cell| cell.align).collect::<Vec<_>>();
        let expected = [Some(Align::Left), Some(Align::Center), Some(Align::Right), None];
        assert_eq!(header_align, expected);

        let body_align = table.rows[0].iter().map(|cell| cell.align).collect::<Vec<_>>();
        assert_eq!(body_align, expected);
        assert_eq!(table.rows[0][2].children, [text("3")]);

        let html = rendered.to_html();
        assert!(html.contains("<th style=\"text-align: center;\">C</th>"));
        assert!(html.contains("<td style=\"text-align: right;\">3</td>"));
        assert!(html.contains("<td>4</td>"));
    }

    #[test]
    fn links_open_in_new_context() {
        let html = render("[docs](https://example.com/a?b=1&c=2)").to_html();
        assert_eq!(
            html,
            "<p><a href=\"https://example.com/a?b=1&amp;c=2\" target=\"_blank\" \
             rel=\"noopener noreferrer\">docs</a></p>"
        );
    }

    #[test]
    fn unknown_inline_tokens_keep_raw_source() {
        assert_eq!(
            render("see ![logo](a.png) and ~~old~~ here").nodes(),
            [Node::Paragraph(vec![text("see ![logo](a.png) and ~~old~~ here")])]
        );
    }

    #[test]
    fn unknown_block_tokens_keep_raw_source() {
        let blocks = lex("<div class=\"x\">hi</div>\n");
        let [Block::Unknown { raw }] = blocks.as_slice() else {
            panic!("expected unknown block, got {blocks:?}");
        };
        assert_eq!(raw.trim_end(), "<div class=\"x\">hi</div>");

        let html = render_tokens(&blocks).to_html();
        assert!(html.starts_with("<span>&lt;div class=&quot;x&quot;&gt;hi&lt;/div&gt;"));
    }

    #[test]
    fn task_markers_stay_as_written() {
        let rendered = render("- [ ] task\n- [x] done\n");
        assert_eq!(
            rendered.nodes(),
            [Node::List {
                ordered: false,
                start: None,
                items: vec![vec![text("[ ] task")], vec![text("[x] done")]],
            }]
        );
        assert_eq!(rendered.to_plain_text(), "- [ ] task\n- [x] done");
    }

    #[test]
    fn thematic_break_and_hard_break() {
        assert_eq!(
            render("a  \nb\n\n---\n").nodes(),
            [
                Node::Paragraph(vec![text("a"), Node::LineBreak, text("b")]),
                Node::Rule
            ]
        );
    }

    #[test]
    fn plain_text_is_readable() {
        let rendered = render(
            "# Setup\n\nUse **ncnn**.\n\n- one\n- two\n\n| k | v |\n|---|--:|\n| a | 10 |\n\n[site](https://x.y)",
        );
        let plain = rendered.to_plain_text();
        assert!(plain.starts_with("Setup\n\nUse ncnn."), "{plain}");
        assert!(plain.contains("- one\n- two"), "{plain}");
        assert!(plain.contains("| a   |  10 |"), "{plain}");
        assert!(plain.ends_with("site (https://x.y)"), "{plain}");
    }
}
