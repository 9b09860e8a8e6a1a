//! Convert-markup stage: deterministic Markdown to LaTeX.
//!
//! Handles the subset of Markdown the notes use: headings, paragraphs,
//! (nested) bullet and numbered lists, emphasis, inline code, links, code
//! fences, block quotes, horizontal rules and standalone images as figures.
//! The first heading becomes the document title.

use super::images::unresolved_queries;
use super::{Artifact, RunContext, Stage, StageAdapter, StageResult};
use crate::config::MarkupSettings;
use crate::error::StageError;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, instrument, warn};

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*$").expect("Invalid regex"));

static UNORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*+]\s+(.*)$").expect("Invalid regex"));

static ORDERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)\d+[.)]\s+(.*)$").expect("Invalid regex"));

static FIGURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!\[([^\]]*)\]\(([^)\s]+)\)$").expect("Invalid regex"));

const PACKAGES: &[&str] = &[
    r"\usepackage[utf8]{inputenc}",
    r"\usepackage[T1]{fontenc}",
    r"\usepackage{graphicx}",
    r"\usepackage[margin=1in]{geometry}",
    r"\usepackage{amsmath}",
    r"\usepackage{enumitem}",
    r"\usepackage{parskip}",
    r"\usepackage{hyperref}",
];

/// Layout choices for the generated document.
#[derive(Debug, Clone)]
pub struct MarkupOptions {
    pub document_class: String,
    pub table_of_contents: bool,
    /// Sections needed before a table of contents is emitted.
    pub toc_min_sections: usize,
}

impl Default for MarkupOptions {
    fn default() -> Self {
        Self::from(&MarkupSettings::default())
    }
}

impl From<&MarkupSettings> for MarkupOptions {
    fn from(settings: &MarkupSettings) -> Self {
        Self {
            document_class: settings.document_class.clone(),
            table_of_contents: settings.table_of_contents,
            toc_min_sections: settings.toc_min_sections,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bullet,
    Numbered,
}

impl ListKind {
    fn env(&self) -> &'static str {
        match self {
            ListKind::Bullet => "itemize",
            ListKind::Numbered => "enumerate",
        }
    }
}

struct ListItem<'a> {
    indent: usize,
    kind: ListKind,
    text: &'a str,
}

fn list_item(line: &str) -> Option<ListItem<'_>> {
    let (caps, kind) = if let Some(caps) = UNORDERED_ITEM.captures(line) {
        (caps, ListKind::Bullet)
    } else if let Some(caps) = ORDERED_ITEM.captures(line) {
        (caps, ListKind::Numbered)
    } else {
        return None;
    };

    let indent = caps
        .get(1)
        .map(|m| m.as_str().chars().map(|c| if c == '\t' { 4 } else { 1 }).sum())
        .unwrap_or(0);
    let text = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    Some(ListItem { indent, kind, text })
}

fn is_rule(line: &str) -> bool {
    let compact: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && matches!(compact[0], '-' | '*' | '_')
        && compact.iter().all(|c| *c == compact[0])
}

/// Builds the document body block by block.
struct Converter<'a> {
    image_root: Option<&'a Path>,
    out: Vec<String>,
    paragraph: Vec<String>,
    lists: Vec<(usize, ListKind)>,
    title: Option<String>,
    title_level: usize,
    sections: usize,
}

impl<'a> Converter<'a> {
    fn new(image_root: Option<&'a Path>) -> Self {
        Self {
            image_root,
            out: Vec::new(),
            paragraph: Vec::new(),
            lists: Vec::new(),
            title: None,
            title_level: 0,
            sections: 0,
        }
    }

    fn flush_paragraph(&mut self) {
        if !self.paragraph.is_empty() {
            self.out.push(self.paragraph.join("\n"));
            self.out.push(String::new());
            self.paragraph.clear();
        }
    }

    fn close_lists(&mut self) {
        if !self.lists.is_empty() {
            while let Some((_, kind)) = self.lists.pop() {
                self.out.push(format!("\\end{{{}}}", kind.env()));
            }
            self.out.push(String::new());
        }
    }

    /// End whatever inline context is open before a new block.
    fn break_block(&mut self) {
        self.flush_paragraph();
        self.close_lists();
    }

    fn heading(&mut self, level: usize, text: &str) {
        self.break_block();
        if self.title.is_none() {
            self.title = Some(inline(text));
            self.title_level = level;
            return;
        }

        let command = if level <= self.title_level + 1 {
            self.sections += 1;
            "section"
        } else if level == self.title_level + 2 {
            "subsection"
        } else {
            "subsubsection"
        };
        self.out.push(format!("\\{}{{{}}}", command, inline(text)));
        self.out.push(String::new());
    }

    fn list_item(&mut self, item: ListItem<'_>) {
        self.flush_paragraph();

        if let Some((top, _)) = self.lists.last().copied() {
            if item.indent < top {
                self.close_lists_nested(item.indent);
            }
        }

        match self.lists.last().copied() {
            Some((top, kind)) if top == item.indent && kind != item.kind => {
                self.out.push(format!("\\end{{{}}}", kind.env()));
                self.lists.pop();
                self.open_list(item.indent, item.kind);
            }
            Some((top, _)) if top >= item.indent => {}
            _ => self.open_list(item.indent, item.kind),
        }

        self.out.push(format!("\\item {}", inline(item.text)));
    }

    /// Close nested lists deeper than `indent`, keeping the enclosing list open.
    fn close_lists_nested(&mut self, indent: usize) {
        while let Some((top, kind)) = self.lists.last().copied() {
            if top <= indent || self.lists.len() == 1 {
                break;
            }
            self.out.push(format!("\\end{{{}}}", kind.env()));
            self.lists.pop();
        }
    }

    fn open_list(&mut self, indent: usize, kind: ListKind) {
        self.out.push(format!("\\begin{{{}}}", kind.env()));
        self.lists.push((indent, kind));
    }

    fn figure(&mut self, alt: &str, path: &str) {
        self.break_block();

        if path.starts_with("http://") || path.starts_with("https://") {
            warn!("Dropping figure '{}': remote images are not embedded", alt);
            return;
        }
        if let Some(root) = self.image_root {
            if !root.join(path).is_file() {
                warn!("Dropping figure '{}': {} not found", alt, path);
                return;
            }
        }

        let mut figure = vec![
            r"\begin{figure}[htbp]".to_string(),
            r"\centering".to_string(),
            format!("\\includegraphics[width=0.8\\textwidth]{{{}}}", path),
        ];
        if !alt.trim().is_empty() {
            figure.push(format!("\\caption{{{}}}", inline(alt)));
        }
        figure.push(r"\end{figure}".to_string());

        self.out.push(figure.join("\n"));
        self.out.push(String::new());
    }
}

/// Convert Markdown notes into a complete LaTeX document.
///
/// `fallback_title` is used when the notes have no heading. When `image_root`
/// is given, figures whose file does not exist under it are dropped.
pub fn markdown_to_latex(
    markdown: &str,
    fallback_title: &str,
    options: &MarkupOptions,
    image_root: Option<&Path>,
) -> Result<String, StageError> {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut conv = Converter::new(image_root);
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let lineno = i + 1;
        let trimmed = line.trim();

        if trimmed.contains("[INSERT_IMAGE:") {
            return Err(StageError::malformed(format!(
                "line {}: unprocessed image placeholder",
                lineno
            )));
        }

        if trimmed.starts_with("```") {
            conv.break_block();
            let close = lines[i + 1..]
                .iter()
                .position(|l| l.trim().starts_with("```"))
                .map(|offset| i + 1 + offset)
                .ok_or_else(|| {
                    StageError::malformed(format!("line {}: unterminated code fence", lineno))
                })?;

            let mut block = vec![r"\begin{verbatim}".to_string()];
            block.extend(lines[i + 1..close].iter().map(|l| l.to_string()));
            block.push(r"\end{verbatim}".to_string());
            conv.out.push(block.join("\n"));
            conv.out.push(String::new());
            i = close + 1;
            continue;
        }

        if trimmed.is_empty() {
            conv.flush_paragraph();
            if !conv.lists.is_empty() {
                let next = lines[i + 1..].iter().find(|l| !l.trim().is_empty());
                if next.map(|l| list_item(l).is_none()).unwrap_or(true) {
                    conv.close_lists();
                }
            }
            i += 1;
            continue;
        }

        if trimmed.starts_with("<!--") {
            conv.break_block();
            let mut end = i;
            while end < lines.len() && !lines[end].contains("-->") {
                end += 1;
            }
            let end = end.min(lines.len() - 1);
            let comment = lines[i..=end].join(" ");
            for query in unresolved_queries(&comment) {
                conv.out.push(format!("% unresolved image: {}", query));
            }
            i = end + 1;
            continue;
        }

        if let Some(caps) = HEADING.captures(trimmed) {
            let level = caps[1].len();
            conv.heading(level, &caps[2]);
            i += 1;
            continue;
        }

        if is_rule(trimmed) {
            conv.break_block();
            conv.out.push(r"\noindent\rule{\linewidth}{0.4pt}".to_string());
            conv.out.push(String::new());
            i += 1;
            continue;
        }

        if let Some(caps) = FIGURE.captures(trimmed) {
            conv.figure(&caps[1], &caps[2]);
            i += 1;
            continue;
        }

        if trimmed.starts_with('>') {
            conv.break_block();
            let mut quoted = Vec::new();
            while i < lines.len() && lines[i].trim().starts_with('>') {
                let text = lines[i].trim().trim_start_matches('>').trim();
                if !text.is_empty() {
                    quoted.push(inline(text));
                }
                i += 1;
            }
            conv.out.push(format!("\\begin{{quote}}\n{}\n\\end{{quote}}", quoted.join("\n")));
            conv.out.push(String::new());
            continue;
        }

        if let Some(item) = list_item(line) {
            conv.list_item(item);
            i += 1;
            continue;
        }

        if !conv.lists.is_empty() && line.starts_with(char::is_whitespace) {
            // Continuation of the previous item
            if let Some(last) = conv.out.last_mut() {
                last.push(' ');
                last.push_str(&inline(trimmed));
            }
            i += 1;
            continue;
        }

        conv.close_lists();
        conv.paragraph.push(inline(trimmed));
        i += 1;
    }
    conv.break_block();

    let title = conv
        .title
        .clone()
        .unwrap_or_else(|| escape(fallback_title));
    let with_toc = options.table_of_contents && conv.sections >= options.toc_min_sections;
    debug!("Converted {} section(s), table of contents: {}", conv.sections, with_toc);

    let mut doc: Vec<String> = vec![format!("\\documentclass[11pt]{{{}}}", options.document_class)];
    doc.extend(PACKAGES.iter().map(|p| p.to_string()));
    doc.push(r"\hypersetup{colorlinks=true, linkcolor=black, urlcolor=blue}".to_string());
    doc.push(r"\setcounter{secnumdepth}{0}".to_string());
    doc.push(String::new());
    doc.push(format!("\\title{{{}}}", title));
    doc.push(r"\date{}".to_string());
    doc.push(String::new());
    doc.push(r"\begin{document}".to_string());
    doc.push(r"\maketitle".to_string());
    if with_toc {
        doc.push(r"\tableofcontents".to_string());
        doc.push(r"\newpage".to_string());
    }
    doc.push(String::new());

    while conv.out.last().map(|l| l.is_empty()).unwrap_or(false) {
        conv.out.pop();
    }
    doc.extend(conv.out);
    doc.push(String::new());
    doc.push(r"\end{document}".to_string());
    doc.push(String::new());

    Ok(doc.join("\n"))
}

/// Convert inline Markdown (emphasis, code, links) to escaped LaTeX.
fn inline(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '`' => {
                if let Some(end) = find_char(&chars, i + 1, '`') {
                    let code: String = chars[i + 1..end].iter().collect();
                    out.push_str(&format!("\\texttt{{{}}}", escape(&code)));
                    i = end + 1;
                    continue;
                }
            }
            '*' | '_' if chars.get(i + 1) == Some(&c) => {
                if let Some(end) = find_double(&chars, i + 2, c) {
                    if end > i + 2 {
                        let inner: String = chars[i + 2..end].iter().collect();
                        out.push_str(&format!("\\textbf{{{}}}", inline(&inner)));
                        i = end + 2;
                        continue;
                    }
                }
            }
            '*' | '_' if opens_emphasis(&chars, i) => {
                if let Some(end) = find_emphasis_close(&chars, i + 1, c) {
                    let inner: String = chars[i + 1..end].iter().collect();
                    out.push_str(&format!("\\emph{{{}}}", inline(&inner)));
                    i = end + 1;
                    continue;
                }
            }
            '!' if chars.get(i + 1) == Some(&'[') => {
                if let Some((alt, _, next)) = parse_link(&chars, i + 1) {
                    out.push_str(&format!("\\emph{{{}}}", escape(&alt)));
                    i = next;
                    continue;
                }
            }
            '[' => {
                if let Some((label, url, next)) = parse_link(&chars, i) {
                    out.push_str(&format!("\\href{{{}}}{{{}}}", escape_url(&url), inline(&label)));
                    i = next;
                    continue;
                }
            }
            _ => {}
        }
        push_escaped(&mut out, c);
        i += 1;
    }

    out
}

fn find_char(chars: &[char], from: usize, target: char) -> Option<usize> {
    (from..chars.len()).find(|&j| chars[j] == target)
}

fn find_double(chars: &[char], from: usize, target: char) -> Option<usize> {
    (from..chars.len().saturating_sub(1)).find(|&j| chars[j] == target && chars[j + 1] == target)
}

fn opens_emphasis(chars: &[char], at: usize) -> bool {
    let next_ok = chars.get(at + 1).map(|n| !n.is_whitespace()).unwrap_or(false);
    // snake_case identifiers are not emphasis
    let prev_ok = chars[at] != '_' || at == 0 || !chars[at - 1].is_alphanumeric();
    next_ok && prev_ok
}

fn find_emphasis_close(chars: &[char], from: usize, marker: char) -> Option<usize> {
    (from + 1..chars.len()).find(|&j| {
        chars[j] == marker
            && !chars[j - 1].is_whitespace()
            && (marker != '_' || chars.get(j + 1).map(|n| !n.is_alphanumeric()).unwrap_or(true))
    })
}

/// Parse `[label](url)` starting at `[`. Returns label, url and the index after `)`.
fn parse_link(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let close = find_char(chars, start + 1, ']')?;
    if chars.get(close + 1) != Some(&'(') {
        return None;
    }
    let end = find_char(chars, close + 2, ')')?;
    let label: String = chars[start + 1..close].iter().collect();
    let url: String = chars[close + 2..end].iter().collect();
    if url.trim().is_empty() {
        return None;
    }
    Some((label, url.trim().to_string(), end + 1))
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '\\' => out.push_str(r"\textbackslash{}"),
        '{' => out.push_str(r"\{"),
        '}' => out.push_str(r"\}"),
        '$' => out.push_str(r"\$"),
        '&' => out.push_str(r"\&"),
        '#' => out.push_str(r"\#"),
        '%' => out.push_str(r"\%"),
        '_' => out.push_str(r"\_"),
        '^' => out.push_str(r"\textasciicircum{}"),
        '~' => out.push_str(r"\textasciitilde{}"),
        '<' => out.push_str(r"\textless{}"),
        '>' => out.push_str(r"\textgreater{}"),
        other => out.push(other),
    }
}

/// Escape LaTeX special characters in plain text.
pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut out, c);
    }
    out
}

fn escape_url(url: &str) -> String {
    url.replace('\\', "/").replace('%', r"\%").replace('#', r"\#")
}

/// Markdown to LaTeX conversion as a pipeline stage.
pub struct MarkupAdapter {
    options: MarkupOptions,
}

impl MarkupAdapter {
    pub fn new(options: MarkupOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl StageAdapter for MarkupAdapter {
    fn stage(&self) -> Stage {
        Stage::ConvertMarkup
    }

    #[instrument(skip_all, fields(run = %ctx.run_id))]
    async fn produce(&self, ctx: &RunContext, input: &Artifact) -> StageResult {
        let markdown = input.read_text().await?;
        if markdown.trim().is_empty() {
            return Err(StageError::malformed("Notes are empty"));
        }

        let run_dir = ctx.run_dir();
        let latex = markdown_to_latex(&markdown, &ctx.title, &self.options, Some(&run_dir))?;
        Ok(ctx.store.write(&ctx.run_id, Stage::ConvertMarkup, latex).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageErrorKind;

    fn convert(md: &str) -> String {
        markdown_to_latex(md, "Fallback", &MarkupOptions::default(), None).unwrap()
    }

    #[test]
    fn test_document_structure() {
        let latex = convert("## Cardiac Cycle\n\n### Systole\n\nThe **left ventricle** contracts.\n");
        assert!(latex.starts_with("\\documentclass[11pt]{article}"));
        assert!(latex.contains("\\usepackage{graphicx}"));
        assert!(latex.contains("\\title{Cardiac Cycle}"));
        assert!(latex.contains("\\maketitle"));
        assert!(latex.contains("\\section{Systole}"));
        assert!(latex.contains("The \\textbf{left ventricle} contracts."));
        assert!(latex.trim_end().ends_with("\\end{document}"));
    }

    #[test]
    fn test_fallback_title_is_escaped() {
        let latex = convert("Just text.");
        assert!(latex.contains("\\title{Fallback}"));
        let latex = markdown_to_latex("text", "Week_3 & 4", &MarkupOptions::default(), None).unwrap();
        assert!(latex.contains("\\title{Week\\_3 \\& 4}"));
    }

    #[test]
    fn test_heading_levels() {
        let latex = convert("## Title\n### A\n#### A.1\n##### A.1.a\n");
        assert!(latex.contains("\\section{A}"));
        assert!(latex.contains("\\subsection{A.1}"));
        assert!(latex.contains("\\subsubsection{A.1.a}"));
    }

    #[test]
    fn test_lists() {
        let latex = convert("## T\n\n- one\n- two\n  - nested\n- three\n\n1. first\n2. second\n");
        let itemize = latex.matches("\\begin{itemize}").count();
        assert_eq!(itemize, 2);
        assert_eq!(latex.matches("\\end{itemize}").count(), 2);
        assert!(latex.contains("\\item nested"));
        assert!(latex.contains("\\begin{enumerate}\n\\item first\n\\item second\n\\end{enumerate}"));
    }

    #[test]
    fn test_list_continuation_line() {
        let latex = convert("## T\n\n- a long item\n  that wraps\n- next\n");
        assert!(latex.contains("\\item a long item that wraps"));
    }

    #[test]
    fn test_inline_formatting() {
        assert_eq!(inline("*stress* and `x_1`"), "\\emph{stress} and \\texttt{x\\_1}");
        assert_eq!(inline("snake_case_name"), "snake\\_case\\_name");
        assert_eq!(inline("50% of $5 #1"), "50\\% of \\$5 \\#1");
        assert_eq!(
            inline("see [docs](https://x.org/a#b)"),
            "see \\href{https://x.org/a\\#b}{docs}"
        );
        assert_eq!(inline("a ~ b ^ c"), "a \\textasciitilde{} b \\textasciicircum{} c");
    }

    #[test]
    fn test_code_fence_and_quote() {
        let latex = convert("## T\n\n```rust\nlet x = {1};\n```\n\n> quoted & wise\n");
        assert!(latex.contains("\\begin{verbatim}\nlet x = {1};\n\\end{verbatim}"));
        assert!(latex.contains("\\begin{quote}\nquoted \\& wise\n\\end{quote}"));
    }

    #[test]
    fn test_unterminated_fence_reports_line() {
        let err = markdown_to_latex("## T\n\n```\ncode", "x", &MarkupOptions::default(), None).unwrap_err();
        assert_eq!(err.kind, StageErrorKind::MalformedInput);
        assert!(err.message.contains("line 3"));
    }

    #[test]
    fn test_raw_placeholder_is_rejected() {
        let err = markdown_to_latex(
            "## T\n[INSERT_IMAGE: 'heart']\n",
            "x",
            &MarkupOptions::default(),
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind, StageErrorKind::MalformedInput);
        assert!(err.message.contains("line 2"));
    }

    #[test]
    fn test_unresolved_apostrophe_query_converts() {
        let notes = crate::stage::images::strip_placeholders(
            "## Mechanics\n\n[INSERT_IMAGE: 'Newton's cradle diagram']\n\nMomentum is conserved.\n",
        );
        let latex = markdown_to_latex(&notes, "x", &MarkupOptions::default(), None).unwrap();
        assert!(latex.contains("% unresolved image: Newton's cradle diagram"));
        assert!(latex.contains("Momentum is conserved."));
    }

    #[test]
    fn test_figures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("images")).unwrap();
        std::fs::write(dir.path().join("images/heart.png"), b"png").unwrap();

        let md = "## T\n\n![Heart diagram](images/heart.png)\n\n![Missing](images/gone.jpg)\n\n<!-- unresolved image: 'ECG trace' -->\n";
        let latex = markdown_to_latex(md, "x", &MarkupOptions::default(), Some(dir.path())).unwrap();

        assert!(latex.contains("\\begin{figure}[htbp]"));
        assert!(latex.contains("\\includegraphics[width=0.8\\textwidth]{images/heart.png}"));
        assert!(latex.contains("\\caption{Heart diagram}"));
        assert!(!latex.contains("gone.jpg"));
        assert!(latex.contains("% unresolved image: ECG trace"));
    }

    #[test]
    fn test_table_of_contents_threshold() {
        let few = convert("## T\n### A\n### B\n");
        assert!(!few.contains("\\tableofcontents"));

        let many = convert("## T\n### A\n### B\n### C\n");
        assert!(many.contains("\\tableofcontents"));

        let options = MarkupOptions {
            table_of_contents: false,
            ..MarkupOptions::default()
        };
        let off = markdown_to_latex("## T\n### A\n### B\n### C\n", "x", &options, None).unwrap();
        assert!(!off.contains("\\tableofcontents"));
    }

    #[test]
    fn test_horizontal_rule() {
        let latex = convert("## T\n\nabove\n\n---\n\nbelow\n");
        assert!(latex.contains("\\rule{\\linewidth}{0.4pt}"));
    }
}
