//! Compiler diagnostics and the debug page served in place of a broken route.
//!
//! Toolchain output is expected in the form
//!
//! ```text
//! # package/name
//! path/to/main.go:12:4: undefined: Foo
//! ```
//!
//! Header lines start with `#`; each following `path:line:col:message` line
//! is one diagnostic.

use std::fmt::Write as _;

/// Lines shown around the failing line.
pub const EXCERPT_LINES: usize = 15;

/// One `path:line:col:message` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// Parse every diagnostic line in `output`, skipping `#` headers and any
/// line that doesn't have the expected shape.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter(|l| !l.starts_with('#'))
        .filter_map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Option<Diagnostic> {
    let mut parts = line.splitn(4, ':');
    let path = parts.next()?.trim();
    let row = parts.next()?.trim().parse().ok()?;
    let column = parts.next()?.trim().parse().ok()?;
    let message = parts.next()?.trim();
    if path.is_empty() {
        return None;
    }
    Some(Diagnostic {
        path: path.to_string(),
        line: row,
        column,
        message: message.to_string(),
    })
}

/// Inclusive 1-based line window of at most [`EXCERPT_LINES`] lines centered
/// on `line`, shifted to stay inside a file of `total` lines.
pub fn excerpt_range(total: usize, line: usize) -> (usize, usize) {
    if total <= EXCERPT_LINES {
        return (1, total);
    }
    let half = EXCERPT_LINES / 2;
    let line = line.clamp(1, total);
    let start = line.saturating_sub(half).max(1).min(total - EXCERPT_LINES + 1);
    (start, start + EXCERPT_LINES - 1)
}

/// Rendered diagnostic page for one failed build.
#[derive(Debug, Clone)]
pub struct DebugPage {
    html: String,
}

impl DebugPage {
    /// Render a page for `route`. `source` is the contents of the file the
    /// first diagnostic points at, when it could be read.
    pub fn render(route: &str, output: &str, diagnostic: Option<&Diagnostic>, source: Option<&str>) -> Self {
        let title = diagnostic
            .map(|d| d.message.as_str())
            .unwrap_or("Build failed");

        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>{}</title>{STYLE}</head><body>",
            escape_html(title)
        );
        let _ = write!(html, "<h1>Route <code>{}</code> failed to build</h1>", escape_html(route));

        if let Some(d) = diagnostic {
            let _ = write!(
                html,
                "<div id=\"code-1\" class=\"code-block\"><h2>{}</h2><h3>{}:{}:{}</h3>",
                escape_html(&d.message),
                escape_html(&d.path),
                d.line,
                d.column
            );
            if let Some(source) = source {
                html.push_str(&render_excerpt(source, d.line));
            }
            html.push_str("</div>");
        }

        let _ = write!(html, "<h3>Compiler output</h3><pre class=\"output\">{}</pre>", escape_html(output));
        html.push_str("</body></html>");

        Self { html }
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

fn render_excerpt(source: &str, line: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let (start, end) = excerpt_range(lines.len(), line);

    let mut out = String::from("<pre><code>");
    for n in start..=end {
        let class = if n == line { " class=\"failing\"" } else { "" };
        let _ = writeln!(
            out,
            "<span{class}><span class=\"ln\">{n:>4}</span> {}</span>",
            escape_html(lines[n - 1])
        );
    }
    out.push_str("</code></pre>");
    out
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

const STYLE: &str = "<style>body{font-family:sans-serif;margin:2em}\
pre{background:#f6f6f6;padding:1em;overflow:auto}\
.failing{background:#ffd7d7;display:block}.ln{color:#999}</style>";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compiler_output() {
        let diags = parse_diagnostics("#error\n/src/blog/main.go:12:4:undefined: Foo");
        assert_eq!(
            diags,
            vec![Diagnostic {
                path: "/src/blog/main.go".into(),
                line: 12,
                column: 4,
                message: "undefined: Foo".into(),
            }]
        );
    }

    #[test]
    fn keeps_colons_in_message_and_skips_noise() {
        let diags = parse_diagnostics("# pkg\nnote: something\n./main.go:3:1: expected ';', found ':'\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "expected ';', found ':'");
    }

    #[test]
    fn excerpt_centers_and_shifts() {
        assert_eq!(excerpt_range(10, 5), (1, 10));
        assert_eq!(excerpt_range(40, 20), (13, 27));
        assert_eq!(excerpt_range(40, 2), (1, 15));
        assert_eq!(excerpt_range(40, 39), (26, 40));
    }

    #[test]
    fn page_contains_message_and_centered_excerpt() {
        let source: String = (1..=30).map(|n| format!("line {n}\n")).collect();
        let diag = parse_diagnostics("#error\n/src/blog/main.go:12:4:undefined: Foo").remove(0);
        let page = DebugPage::render("blog", "#error", Some(&diag), Some(&source));
        let html = page.html();

        assert!(html.contains("undefined: Foo"));
        assert!(html.contains("line 5<"));
        assert!(html.contains("line 19<"));
        assert!(!html.contains("line 4<"));
        assert!(!html.contains("line 20<"));
        assert!(html.contains("<span class=\"failing\"><span class=\"ln\">  12</span> line 12</span>"));
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
