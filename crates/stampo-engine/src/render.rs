//! The substitution engine: scans WordprocessingML parts for delimited tags,
//! resolves them against a JSON data mapping, and rewrites the XML in place.
//!
//! Placeholders may be split across runs; substitution rewrites the text nodes
//! of the affected runs so run-level formatting survives. Loop blocks spanning
//! paragraphs repeat whole paragraph sequences.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::debug;

use crate::archive::TemplateArchive;
use crate::error::{EngineError, TemplateIssue};
use crate::module::{ModuleContext, PendingAssets, Replacement, RenderModule};
use crate::xml;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub start: String,
    pub end: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            start: "%%".to_string(),
            end: "%%".to_string(),
        }
    }
}

/// Behavior applied when a placeholder has no entry in the data mapping.
pub type NullGetter = Box<dyn Fn(&str) -> String + Send + Sync>;

pub struct RenderOptions {
    pub delimiters: Delimiters,
    /// Remove paragraphs that consist solely of a loop tag instead of leaving
    /// empty paragraphs behind.
    pub paragraph_loop: bool,
    /// Turn `\n` in substituted values into `<w:br/>` run breaks.
    pub linebreaks: bool,
    pub null_getter: NullGetter,
    /// Set by the caller to abandon an in-flight render. Checked between
    /// parts and between nodes; a cancelled render leaves the archive
    /// untouched and fails with [`EngineError::Cancelled`].
    pub cancel: Arc<AtomicBool>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            delimiters: Delimiters::default(),
            paragraph_loop: false,
            linebreaks: false,
            null_getter: Box::new(|_| String::new()),
            cancel: Arc::default(),
        }
    }
}

/// Renders one template archive against one data mapping.
pub struct Engine {
    archive: TemplateArchive,
    options: RenderOptions,
    modules: Vec<Box<dyn RenderModule>>,
}

impl Engine {
    pub fn new(archive: TemplateArchive, options: RenderOptions) -> Self {
        Self {
            archive,
            options,
            modules: Vec::new(),
        }
    }

    /// Attach an extension module. Order matters: modules are asked to claim
    /// a tag in attach order and the first claimant wins.
    pub fn attach_module(&mut self, module: Box<dyn RenderModule>) -> &mut Self {
        debug!(
            target: "stampo_engine::render",
            module = module.name(),
            "module attached"
        );
        self.modules.push(module);
        self
    }

    /// Substitute every tag in the document body, headers, and footers.
    ///
    /// All-or-nothing: on error the archive is left untouched. Syntax issues
    /// are collected across every part before substitution begins; render
    /// issues are collected across every tag before failing.
    pub fn render(&mut self, data: &Value) -> Result<(), EngineError> {
        let targets: Vec<String> = self
            .archive
            .part_names()
            .filter(|name| is_render_target(name))
            .map(str::to_string)
            .collect();
        debug!(
            target: "stampo_engine::render",
            parts = targets.len(),
            "rendering template parts"
        );

        let mut syntax_issues = Vec::new();
        let mut parsed = Vec::with_capacity(targets.len());
        for name in &targets {
            if self.options.cancel.load(Ordering::Relaxed) {
                return Err(EngineError::Cancelled);
            }
            let raw = self.archive.part(name).unwrap_or_default();
            let xml = String::from_utf8_lossy(raw).into_owned();
            let nodes = parse_part(name, &xml, &self.options, &self.modules, &mut syntax_issues);
            parsed.push((name.clone(), nodes));
        }
        if !syntax_issues.is_empty() {
            return Err(EngineError::Syntax(syntax_issues));
        }

        let mut ctx = RenderCtx {
            opts: &self.options,
            modules: &self.modules,
            archive: &self.archive,
            part: String::new(),
            pending: PendingAssets::default(),
            issues: Vec::new(),
        };
        let mut rendered = Vec::with_capacity(parsed.len());
        for (name, nodes) in &parsed {
            ctx.part = name.clone();
            let mut scopes = vec![data];
            let mut out = String::new();
            render_nodes(nodes, &mut scopes, &mut ctx, &mut out);
            rendered.push((name.clone(), out));
        }

        let RenderCtx {
            pending, issues, ..
        } = ctx;
        if self.options.cancel.load(Ordering::Relaxed) {
            return Err(EngineError::Cancelled);
        }
        if !issues.is_empty() {
            return Err(EngineError::Render(issues));
        }

        for (name, xml) in rendered {
            self.archive.set_part(&name, xml.into_bytes());
        }
        pending.commit(&mut self.archive);
        Ok(())
    }

    pub fn into_archive(self) -> TemplateArchive {
        self.archive
    }
}

fn is_render_target(name: &str) -> bool {
    name == "word/document.xml"
        || ((name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml"))
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TagKind {
    Scalar,
    LoopOpen,
    LoopClose,
    Module(usize),
}

#[derive(Debug, Clone)]
struct Tag {
    /// Tag content with delimiters stripped and surrounding whitespace trimmed.
    raw: String,
    /// Resolution name: loop tags have their `#`/`/` sigil removed.
    name: String,
    kind: TagKind,
    /// Position in the paragraph's concatenated text, delimiters included.
    range: Range<usize>,
}

#[derive(Debug, Clone)]
struct TextSpan {
    /// Range of the `<w:t …>` start tag within the paragraph XML.
    open_tag: Range<usize>,
    /// Range of the element's inner text within the paragraph XML.
    inner: Range<usize>,
    /// End offset of the enclosing `<w:r>` element, where drawing runs insert.
    run_end: usize,
    /// Range this span covers in the concatenated paragraph text.
    concat: Range<usize>,
}

#[derive(Debug, Clone)]
struct Paragraph {
    xml: String,
    text: String,
    spans: Vec<TextSpan>,
    tags: Vec<Tag>,
}

enum Node {
    Raw(String),
    Para(Paragraph),
    Loop { name: String, body: Vec<Node> },
}

enum ElementToken {
    Open {
        start: usize,
        tag_end: usize,
        self_closing: bool,
    },
    Close {
        end: usize,
    },
}

/// Find the next start or end tag of `name` at or after `from`, skipping
/// longer element names sharing the prefix (`w:p` must not match `w:pPr`).
fn scan_element(xml: &str, from: usize, name: &str) -> Option<ElementToken> {
    let open_pat = format!("<{name}");
    let close_pat = format!("</{name}>");
    let bytes = xml.as_bytes();
    let mut i = from;
    loop {
        let open = xml[i..].find(&open_pat).map(|p| p + i);
        let close = xml[i..].find(&close_pat).map(|p| p + i);
        let at_open = match (open, close) {
            (None, None) => return None,
            (Some(o), Some(c)) => o < c,
            (Some(_), None) => true,
            (None, Some(_)) => false,
        };
        if !at_open {
            return Some(ElementToken::Close {
                end: close.unwrap_or(0) + close_pat.len(),
            });
        }
        let start = open.unwrap_or(0);
        let after = start + open_pat.len();
        let valid = bytes
            .get(after)
            .is_some_and(|b| matches!(b, b' ' | b'>' | b'/' | b'\t' | b'\r' | b'\n'));
        if !valid {
            i = start + 1;
            continue;
        }
        let Some(gt) = xml[after..].find('>').map(|p| p + after) else {
            return None;
        };
        return Some(ElementToken::Open {
            start,
            tag_end: gt + 1,
            self_closing: xml[..gt].ends_with('/'),
        });
    }
}

/// Outermost ranges of `<name>…</name>` elements, self-closing ones skipped.
fn element_ranges(xml: &str, name: &str) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(token) = scan_element(xml, i, name) {
        match token {
            ElementToken::Open {
                self_closing: true,
                tag_end,
                ..
            } => i = tag_end,
            ElementToken::Close { end } => i = end,
            ElementToken::Open {
                start,
                tag_end,
                self_closing: false,
            } => {
                let mut depth = 1;
                let mut j = tag_end;
                let mut element_end = None;
                while let Some(inner) = scan_element(xml, j, name) {
                    match inner {
                        ElementToken::Open {
                            self_closing: true,
                            tag_end,
                            ..
                        } => j = tag_end,
                        ElementToken::Open { tag_end, .. } => {
                            depth += 1;
                            j = tag_end;
                        }
                        ElementToken::Close { end } => {
                            depth -= 1;
                            j = end;
                            if depth == 0 {
                                element_end = Some(end);
                                break;
                            }
                        }
                    }
                }
                match element_end {
                    Some(end) => {
                        out.push(start..end);
                        i = end;
                    }
                    None => i = tag_end,
                }
            }
        }
    }
    out
}

/// Collect the `<w:t>` spans of a paragraph and their concatenated text.
fn collect_spans(par: &str) -> (Vec<TextSpan>, String) {
    let mut spans = Vec::new();
    let mut text = String::new();
    for run in element_ranges(par, "w:r") {
        let run_xml = &par[run.clone()];
        for t in element_ranges(run_xml, "w:t") {
            let abs = (run.start + t.start)..(run.start + t.end);
            let Some(gt) = par[abs.start..].find('>').map(|p| p + abs.start) else {
                continue;
            };
            let inner = (gt + 1)..(abs.end - "</w:t>".len());
            let decoded = xml::unescape(&par[inner.clone()]);
            let start = text.len();
            text.push_str(&decoded);
            spans.push(TextSpan {
                open_tag: abs.start..(gt + 1),
                inner,
                run_end: run.end,
                concat: start..text.len(),
            });
        }
    }
    (spans, text)
}

fn snippet(text: &str, at: usize) -> String {
    let mut out: String = text[at..].chars().take(24).collect();
    if at + out.len() < text.len() {
        out.push_str("...");
    }
    out
}

fn tokenize(
    text: &str,
    part: &str,
    options: &RenderOptions,
    modules: &[Box<dyn RenderModule>],
    issues: &mut Vec<TemplateIssue>,
) -> Vec<Tag> {
    let Delimiters { start, end } = &options.delimiters;
    let mut tags = Vec::new();
    let mut i = 0;
    while let Some(open) = text[i..].find(start.as_str()).map(|p| p + i) {
        let after = open + start.len();
        let Some(close) = text[after..].find(end.as_str()).map(|p| p + after) else {
            issues.push(TemplateIssue::new(
                part,
                None,
                format!(
                    "unclosed tag: no closing delimiter `{end}` after `{}`",
                    snippet(text, open)
                ),
            ));
            break;
        };
        let raw = text[after..close].trim().to_string();
        let range = open..(close + end.len());
        if raw.is_empty() {
            issues.push(TemplateIssue::new(
                part,
                None,
                format!("empty tag between delimiters `{start}{end}`"),
            ));
        } else if let Some(name) = raw.strip_prefix('#') {
            let name = name.trim().to_string();
            if name.is_empty() {
                issues.push(TemplateIssue::new(part, None, "loop tag with an empty name"));
            } else {
                tags.push(Tag {
                    raw,
                    name,
                    kind: TagKind::LoopOpen,
                    range,
                });
            }
        } else if let Some(name) = raw.strip_prefix('/') {
            let name = name.trim().to_string();
            if name.is_empty() {
                issues.push(TemplateIssue::new(part, None, "loop tag with an empty name"));
            } else {
                tags.push(Tag {
                    raw,
                    name,
                    kind: TagKind::LoopClose,
                    range,
                });
            }
        } else if let Some(index) = modules.iter().position(|module| module.claims(&raw)) {
            tags.push(Tag {
                name: raw.clone(),
                raw,
                kind: TagKind::Module(index),
                range,
            });
        } else {
            tags.push(Tag {
                name: raw.clone(),
                raw,
                kind: TagKind::Scalar,
                range,
            });
        }
        i = close + end.len();
    }
    tags
}

/// Loop tags left unbalanced within a single paragraph. These mark the
/// boundaries of loops spanning multiple paragraphs.
fn unmatched_boundaries(tags: &[Tag]) -> Vec<(usize, bool)> {
    let mut stack: Vec<usize> = Vec::new();
    let mut out = Vec::new();
    for (index, tag) in tags.iter().enumerate() {
        match tag.kind {
            TagKind::LoopOpen => stack.push(index),
            TagKind::LoopClose => {
                if stack
                    .last()
                    .is_some_and(|open| tags[*open].name == tag.name)
                {
                    stack.pop();
                } else {
                    out.push((index, false));
                }
            }
            _ => {}
        }
    }
    out.extend(stack.into_iter().map(|index| (index, true)));
    out.sort_by_key(|(index, _)| *index);
    out
}

fn is_tag_only(paragraph: &Paragraph, tag: &Tag) -> bool {
    paragraph.text[..tag.range.start].trim().is_empty()
        && paragraph.text[tag.range.end..].trim().is_empty()
}

fn sink<'a>(
    root: &'a mut Vec<Node>,
    frames: &'a mut Vec<(String, Vec<Node>)>,
) -> &'a mut Vec<Node> {
    match frames.last_mut() {
        Some((_, body)) => body,
        None => root,
    }
}

fn parse_part(
    part: &str,
    xml: &str,
    options: &RenderOptions,
    modules: &[Box<dyn RenderModule>],
    issues: &mut Vec<TemplateIssue>,
) -> Vec<Node> {
    let mut root: Vec<Node> = Vec::new();
    let mut frames: Vec<(String, Vec<Node>)> = Vec::new();
    let mut cursor = 0;

    for range in element_ranges(xml, "w:p") {
        if range.start > cursor {
            sink(&mut root, &mut frames).push(Node::Raw(xml[cursor..range.start].to_string()));
        }
        cursor = range.end;

        let par_xml = xml[range].to_string();
        let (spans, text) = collect_spans(&par_xml);
        let tags = tokenize(&text, part, options, modules, issues);
        let paragraph = Paragraph {
            xml: par_xml,
            text,
            spans,
            tags,
        };

        let boundaries = unmatched_boundaries(&paragraph.tags);
        match boundaries.as_slice() {
            [] => sink(&mut root, &mut frames).push(Node::Para(paragraph)),
            [(index, true)] => {
                let tag = paragraph.tags[*index].clone();
                let drop_paragraph = options.paragraph_loop && is_tag_only(&paragraph, &tag);
                if !drop_paragraph {
                    sink(&mut root, &mut frames).push(Node::Para(paragraph));
                }
                frames.push((tag.name, Vec::new()));
            }
            [(index, false)] => {
                let tag = paragraph.tags[*index].clone();
                if frames.last().is_some_and(|(name, _)| *name == tag.name) {
                    let (name, body) = frames.pop().unwrap_or_default();
                    sink(&mut root, &mut frames).push(Node::Loop { name, body });
                    let drop_paragraph = options.paragraph_loop && is_tag_only(&paragraph, &tag);
                    if !drop_paragraph {
                        sink(&mut root, &mut frames).push(Node::Para(paragraph));
                    }
                } else {
                    issues.push(TemplateIssue::new(
                        part,
                        Some(tag.name.clone()),
                        format!("loop close tag `/{}` has no matching open tag", tag.name),
                    ));
                    sink(&mut root, &mut frames).push(Node::Para(paragraph));
                }
            }
            _ => {
                issues.push(TemplateIssue::new(
                    part,
                    None,
                    "paragraph mixes boundaries of more than one paragraph-spanning loop",
                ));
                sink(&mut root, &mut frames).push(Node::Para(paragraph));
            }
        }
    }

    if cursor < xml.len() {
        sink(&mut root, &mut frames).push(Node::Raw(xml[cursor..].to_string()));
    }

    while let Some((name, body)) = frames.pop() {
        issues.push(TemplateIssue::new(
            part,
            Some(name.clone()),
            format!("loop tag `#{name}` is never closed"),
        ));
        sink(&mut root, &mut frames).extend(body);
    }

    root
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

struct RenderCtx<'e> {
    opts: &'e RenderOptions,
    modules: &'e [Box<dyn RenderModule>],
    archive: &'e TemplateArchive,
    part: String,
    pending: PendingAssets,
    issues: Vec<TemplateIssue>,
}

enum Atom {
    /// Untouched slice of the original concatenated text.
    Literal(Range<usize>),
    /// Substituted text anchored at a position in the original text.
    Text { anchor: usize, value: String },
    /// A run-level XML fragment inserted after the anchor's host run.
    Run { anchor: usize, xml: String },
}

fn render_nodes<'d>(
    nodes: &[Node],
    scopes: &mut Vec<&'d Value>,
    ctx: &mut RenderCtx<'_>,
    out: &mut String,
) {
    for node in nodes {
        if ctx.opts.cancel.load(Ordering::Relaxed) {
            return;
        }
        match node {
            Node::Raw(raw) => out.push_str(raw),
            Node::Para(paragraph) => out.push_str(&render_paragraph(paragraph, scopes, ctx)),
            Node::Loop { name, body } => match resolve_path(scopes, name) {
                Some(Value::Array(items)) => {
                    for item in items {
                        scopes.push(item);
                        render_nodes(body, scopes, ctx, out);
                        scopes.pop();
                    }
                }
                None | Some(Value::Null) => {}
                Some(other) => ctx.issues.push(TemplateIssue::new(
                    &ctx.part,
                    Some(name.clone()),
                    format!(
                        "loop placeholder `{name}` expects a sequence of values, found {}",
                        json_kind(other)
                    ),
                )),
            },
        }
    }
}

fn render_paragraph<'d>(
    paragraph: &Paragraph,
    scopes: &mut Vec<&'d Value>,
    ctx: &mut RenderCtx<'_>,
) -> String {
    if paragraph.tags.is_empty() {
        return paragraph.xml.clone();
    }
    let mut atoms = Vec::new();
    render_tags(
        paragraph,
        &paragraph.tags,
        0..paragraph.text.len(),
        scopes,
        ctx,
        &mut atoms,
        None,
    );
    assemble(paragraph, &atoms, ctx.opts)
}

#[allow(clippy::too_many_arguments)]
fn render_tags<'d>(
    paragraph: &Paragraph,
    tags: &[Tag],
    seg: Range<usize>,
    scopes: &mut Vec<&'d Value>,
    ctx: &mut RenderCtx<'_>,
    out: &mut Vec<Atom>,
    collapse: Option<usize>,
) {
    let mut pos = seg.start;
    let mut i = 0;
    while i < tags.len() {
        let tag = &tags[i];
        if tag.range.start > pos {
            push_literal(paragraph, pos..tag.range.start, collapse, out);
        }
        let anchor = collapse.unwrap_or(tag.range.start);
        match &tag.kind {
            TagKind::Scalar => {
                let value = match resolve_path(scopes, &tag.name) {
                    None | Some(Value::Null) => (ctx.opts.null_getter)(&tag.name),
                    Some(scalar) => match scalar_to_string(scalar) {
                        Some(text) => text,
                        None => {
                            ctx.issues.push(TemplateIssue::new(
                                &ctx.part,
                                Some(tag.name.clone()),
                                format!(
                                    "placeholder `{}` resolved to {}; use a `#` loop tag for sequences",
                                    tag.name,
                                    json_kind(resolve_path(scopes, &tag.name).unwrap_or(&Value::Null))
                                ),
                            ));
                            String::new()
                        }
                    },
                };
                out.push(Atom::Text { anchor, value });
                pos = tag.range.end;
                i += 1;
            }
            TagKind::Module(index) => {
                let modules = ctx.modules;
                let module = &modules[*index];
                let value = resolve_path(scopes, module.data_key(&tag.raw));
                let mut module_ctx =
                    ModuleContext::new(&ctx.part, ctx.archive, &mut ctx.pending);
                match module.resolve(&tag.raw, value, &mut module_ctx) {
                    Ok(Replacement::Text(value)) => out.push(Atom::Text { anchor, value }),
                    Ok(Replacement::RunXml(xml)) => out.push(Atom::Run { anchor, xml }),
                    Err(issue) => {
                        ctx.issues.push(issue);
                        out.push(Atom::Text {
                            anchor,
                            value: String::new(),
                        });
                    }
                }
                pos = tag.range.end;
                i += 1;
            }
            TagKind::LoopOpen => match matching_close(tags, i) {
                Some(close) => {
                    let inner = tag.range.end..tags[close].range.start;
                    match resolve_path(scopes, &tag.name) {
                        Some(Value::Array(items)) => {
                            for item in items {
                                scopes.push(item);
                                render_tags(
                                    paragraph,
                                    &tags[i + 1..close],
                                    inner.clone(),
                                    scopes,
                                    ctx,
                                    out,
                                    Some(anchor),
                                );
                                scopes.pop();
                            }
                        }
                        None | Some(Value::Null) => {}
                        Some(other) => ctx.issues.push(TemplateIssue::new(
                            &ctx.part,
                            Some(tag.name.clone()),
                            format!(
                                "loop placeholder `{}` expects a sequence of values, found {}",
                                tag.name,
                                json_kind(other)
                            ),
                        )),
                    }
                    pos = tags[close].range.end;
                    i = close + 1;
                }
                None => {
                    // Boundary of a paragraph-spanning loop; iteration is
                    // handled by the node tree, the tag itself leaves nothing.
                    out.push(Atom::Text {
                        anchor,
                        value: String::new(),
                    });
                    pos = tag.range.end;
                    i += 1;
                }
            },
            TagKind::LoopClose => {
                out.push(Atom::Text {
                    anchor,
                    value: String::new(),
                });
                pos = tag.range.end;
                i += 1;
            }
        }
    }
    if pos < seg.end {
        push_literal(paragraph, pos..seg.end, collapse, out);
    }
}

fn matching_close(tags: &[Tag], open: usize) -> Option<usize> {
    let name = &tags[open].name;
    let mut depth = 0;
    for (offset, tag) in tags.iter().enumerate().skip(open + 1) {
        match &tag.kind {
            TagKind::LoopOpen if tag.name == *name => depth += 1,
            TagKind::LoopClose if tag.name == *name => {
                if depth == 0 {
                    return Some(offset);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn push_literal(
    paragraph: &Paragraph,
    range: Range<usize>,
    collapse: Option<usize>,
    out: &mut Vec<Atom>,
) {
    if range.is_empty() {
        return;
    }
    match collapse {
        Some(anchor) => out.push(Atom::Text {
            anchor,
            value: paragraph.text[range].to_string(),
        }),
        None => out.push(Atom::Literal(range)),
    }
}

fn span_index_for(paragraph: &Paragraph, anchor: usize) -> usize {
    let mut best = 0;
    for (index, span) in paragraph.spans.iter().enumerate() {
        if span.concat.start <= anchor && anchor < span.concat.end {
            return index;
        }
        if span.concat.start <= anchor {
            best = index;
        }
    }
    best
}

fn assemble(paragraph: &Paragraph, atoms: &[Atom], opts: &RenderOptions) -> String {
    if paragraph.spans.is_empty() {
        return paragraph.xml.clone();
    }
    let mut span_text: Vec<String> = vec![String::new(); paragraph.spans.len()];
    let mut inserts: BTreeMap<usize, String> = BTreeMap::new();

    for atom in atoms {
        match atom {
            Atom::Literal(range) => {
                for (index, span) in paragraph.spans.iter().enumerate() {
                    let start = range.start.max(span.concat.start);
                    let end = range.end.min(span.concat.end);
                    if start < end {
                        span_text[index].push_str(&paragraph.text[start..end]);
                    }
                }
            }
            Atom::Text { anchor, value } => {
                if !value.is_empty() {
                    span_text[span_index_for(paragraph, *anchor)].push_str(value);
                }
            }
            Atom::Run { anchor, xml } => {
                let span = &paragraph.spans[span_index_for(paragraph, *anchor)];
                inserts.entry(span.run_end).or_default().push_str(xml);
            }
        }
    }

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    for (index, span) in paragraph.spans.iter().enumerate() {
        edits.push((
            span.open_tag.clone(),
            "<w:t xml:space=\"preserve\">".to_string(),
        ));
        edits.push((
            span.inner.clone(),
            encode_text(&span_text[index], opts.linebreaks),
        ));
    }
    for (position, xml) in inserts {
        edits.push((position..position, xml));
    }
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));

    let mut xml = paragraph.xml.clone();
    for (range, replacement) in edits {
        xml.replace_range(range, &replacement);
    }
    xml
}

fn encode_text(text: &str, linebreaks: bool) -> String {
    let cleaned = text.replace('\r', "");
    if linebreaks && cleaned.contains('\n') {
        cleaned
            .split('\n')
            .map(xml::escape)
            .collect::<Vec<_>>()
            .join("</w:t><w:br/><w:t xml:space=\"preserve\">")
    } else {
        xml::escape(&cleaned.replace('\n', " "))
    }
}

/// Resolve a dotted path against the scope stack, innermost scope first.
/// The bare `.` path names the current scope itself.
fn resolve_path<'d>(scopes: &[&'d Value], path: &str) -> Option<&'d Value> {
    if path == "." {
        return scopes.last().copied();
    }
    for scope in scopes.iter().rev() {
        let mut current = *scope;
        let mut resolved = true;
        for segment in path.split('.') {
            match current.as_object().and_then(|object| object.get(segment)) {
                Some(value) => current = value,
                None => {
                    resolved = false;
                    break;
                }
            }
        }
        if resolved {
            return Some(current);
        }
    }
    None
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> RenderOptions {
        RenderOptions::default()
    }

    fn no_modules() -> Vec<Box<dyn RenderModule>> {
        Vec::new()
    }

    #[test]
    fn element_ranges_skip_prefixed_names() {
        let xml = "<w:pPr/><w:p><w:pPr><w:jc/></w:pPr>x</w:p><w:p>y</w:p>";
        let ranges = element_ranges(xml, "w:p");
        assert_eq!(ranges.len(), 2);
        assert_eq!(&xml[ranges[0].clone()], "<w:p><w:pPr><w:jc/></w:pPr>x</w:p>");
        assert_eq!(&xml[ranges[1].clone()], "<w:p>y</w:p>");
    }

    #[test]
    fn collect_spans_concatenates_across_runs() {
        let par = "<w:p><w:r><w:t>Hello </w:t></w:r><w:r><w:rPr/><w:t>world</w:t></w:r></w:p>";
        let (spans, text) = collect_spans(par);
        assert_eq!(text, "Hello world");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].concat, 0..6);
        assert_eq!(spans[1].concat, 6..11);
    }

    #[test]
    fn tokenize_classifies_tags() {
        let opts = options();
        let modules = no_modules();
        let mut issues = Vec::new();
        let tags = tokenize(
            "a %%name%% b %%#items%% c %%/items%%",
            "word/document.xml",
            &opts,
            &modules,
            &mut issues,
        );
        assert!(issues.is_empty());
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0].kind, TagKind::Scalar);
        assert_eq!(tags[1].kind, TagKind::LoopOpen);
        assert_eq!(tags[1].name, "items");
        assert_eq!(tags[2].kind, TagKind::LoopClose);
    }

    #[test]
    fn tokenize_reports_unbalanced_delimiters() {
        let opts = options();
        let modules = no_modules();
        let mut issues = Vec::new();
        tokenize(
            "broken %%name tail",
            "word/document.xml",
            &opts,
            &modules,
            &mut issues,
        );
        assert_eq!(issues.len(), 1);
        assert!(issues[0].explanation.contains("unclosed tag"));
    }

    #[test]
    fn resolve_path_prefers_inner_scope_and_supports_dots() {
        let root = json!({ "name": "outer", "user": { "city": "Turin" } });
        let inner = json!({ "name": "inner" });
        let scopes: Vec<&Value> = vec![&root, &inner];
        assert_eq!(resolve_path(&scopes, "name"), Some(&json!("inner")));
        assert_eq!(resolve_path(&scopes, "user.city"), Some(&json!("Turin")));
        assert_eq!(resolve_path(&scopes, "absent"), None);
    }

    #[test]
    fn dot_path_names_the_current_scope() {
        let root = json!({});
        let item = json!("three");
        let scopes: Vec<&Value> = vec![&root, &item];
        assert_eq!(resolve_path(&scopes, "."), Some(&json!("three")));
    }

    #[test]
    fn encode_text_emits_run_breaks_when_enabled() {
        assert_eq!(
            encode_text("a\nb", true),
            "a</w:t><w:br/><w:t xml:space=\"preserve\">b"
        );
        assert_eq!(encode_text("a\nb", false), "a b");
        assert_eq!(encode_text("x & y", true), "x &amp; y");
    }
}
