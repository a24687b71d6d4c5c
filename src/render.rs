//! Markdown-ish text to HTML markup.
//!
//! The conversion is a fixed sequence of pure stages. Fragments that later
//! stages must not touch (whitelisted tags, code) are parked in a [`Vault`]
//! and replaced by tokens built from Unicode private-use code points; input
//! is scrubbed of those code points first, so user text can never forge a
//! token. The output depends only on the input text and options, so
//! re-rendering the same accumulated answer yields byte-identical markup.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const TOKEN_OPEN: char = '\u{E000}';
const TOKEN_CLOSE: char = '\u{E001}';

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x{E000}(\d+)\x{E001}").expect("Invalid regex"));
static PASSTHROUGH_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:details|summary)>|<br\s*/?>").expect("Invalid regex")
});
static FENCED_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_+#-]*)[ \t]*\n(.*?)```[ \t]*\n?").expect("Invalid regex")
});
static INLINE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`\n]+)`").expect("Invalid regex"));
static TABLE_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\|(.+)\|\s*$").expect("Invalid regex"));
static TABLE_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\|[-:\s|]+\|\s*$").expect("Invalid regex"));
static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(#{1,3})[ \t]+(.+?)[ \t]*$").expect("Invalid regex"));
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("Invalid regex"));
static ITALIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*\s][^*\n]*?)\*").expect("Invalid regex"));
static BARE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"'\]\[)(]+"#).expect("Invalid regex"));
static ORDERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+[.)][ \t]+(.+)$").expect("Invalid regex"));
static UNORDERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*+][ \t]+(.+)$").expect("Invalid regex"));
static BLOCK_END_NEWLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(</(?:table|blockquote|h[1-3]|ul|ol)>)\n").expect("Invalid regex")
});
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid regex"));
static TAG_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<(/?)([A-Za-z][A-Za-z0-9]*)").expect("Invalid regex"));
static FIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:,\d{3})*(?:\.\d+)?%?").expect("Invalid regex"));

/// Elements whose text is never touched by figure highlighting.
const FIGURE_SKIP: &[&str] = &["code", "pre", "a", "strong"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Wrap figures (`12%`, `3.5`, `1,200`, `42`) in `<strong>`.
    pub bold_figures: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { bold_figures: true }
    }
}

/// Render with [`RenderOptions::default`].
pub fn render(text: &str) -> String {
    render_with(text, &RenderOptions::default())
}

pub fn render_with(text: &str, options: &RenderOptions) -> String {
    let mut vault = Vault::default();
    let text = normalize(text);
    let text = preserve_tags(&text, &mut vault);
    let text = fenced_code(&text, &mut vault);
    let text = inline_code(&text, &mut vault);
    let text = blockquotes(&text, &mut vault);
    let text = blocks(&text);
    let text = vault.restore(&text);
    if options.bold_figures {
        bold_figures(&text)
    } else {
        text
    }
}

// ---------------------------------------------------------------------------
// Token vault
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Vault {
    items: Vec<String>,
}

impl Vault {
    fn stash(&mut self, fragment: String) -> String {
        let token = format!("{TOKEN_OPEN}{}{TOKEN_CLOSE}", self.items.len());
        self.items.push(fragment);
        token
    }

    fn lookup(&self, caps: &Captures) -> Option<&str> {
        let index: usize = caps[1].parse().ok()?;
        self.items.get(index).map(String::as_str)
    }

    /// Replace tokens with their fragments. Fragments may hold tokens stashed
    /// before them, so this repeats until none remain.
    fn restore(&self, text: &str) -> String {
        let mut out = text.to_string();
        for _ in 0..=self.items.len() {
            if !out.contains(TOKEN_OPEN) {
                break;
            }
            out = TOKEN
                .replace_all(&out, |caps: &Captures| {
                    self.lookup(caps).unwrap_or_default().to_string()
                })
                .into_owned();
        }
        out
    }

    /// Replace tokens with their fragments escaped as text (used inside code).
    fn restore_escaped(&self, text: &str) -> String {
        TOKEN
            .replace_all(text, |caps: &Captures| {
                escape_text(self.lookup(caps).unwrap_or_default())
            })
            .into_owned()
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .filter(|c| *c != TOKEN_OPEN && *c != TOKEN_CLOSE)
        .collect()
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;")
}

/// Markup for text shown verbatim, such as the user's own messages.
pub fn escape_html(text: &str) -> String {
    escape_text(text).replace('>', "&gt;").replace('"', "&quot;")
}

/// Park whitelisted tags, then escape everything else that could open markup.
fn preserve_tags(text: &str, vault: &mut Vault) -> String {
    let parked = PASSTHROUGH_TAG
        .replace_all(text, |caps: &Captures| vault.stash(caps[0].to_string()))
        .into_owned();
    escape_text(&parked)
}

fn fenced_code(text: &str, vault: &mut Vault) -> String {
    FENCED_CODE
        .replace_all(text, |caps: &Captures| {
            let body = vault.restore_escaped(caps[2].trim_end_matches('\n'));
            let html = match &caps[1] {
                "" => format!("<pre><code>{body}</code></pre>"),
                lang => format!("<pre><code class=\"language-{lang}\">{body}</code></pre>"),
            };
            vault.stash(html)
        })
        .into_owned()
}

fn inline_code(text: &str, vault: &mut Vault) -> String {
    INLINE_CODE
        .replace_all(text, |caps: &Captures| {
            let body = vault.restore_escaped(&caps[1]);
            vault.stash(format!("<code>{body}</code>"))
        })
        .into_owned()
}

/// Collapse runs of consecutive lines accepted by `item` into one block.
fn group_lines<'a, F, W>(text: &'a str, item: F, mut wrap: W) -> String
where
    F: Fn(&'a str) -> Option<&'a str>,
    W: FnMut(&[&'a str]) -> String,
{
    let mut out: Vec<String> = Vec::new();
    let mut run: Vec<&'a str> = Vec::new();
    for line in text.split('\n') {
        match item(line) {
            Some(content) => run.push(content),
            None => {
                if !run.is_empty() {
                    out.push(wrap(&run));
                    run.clear();
                }
                out.push(line.to_string());
            }
        }
    }
    if !run.is_empty() {
        out.push(wrap(&run));
    }
    out.join("\n")
}

/// Everything after the code and quote stages, applied in order.
fn blocks(text: &str) -> String {
    let text = tables(text);
    let text = headings(&text);
    let text = bold(&text);
    let text = italic(&text);
    let text = autolink(&text);
    let text = ordered_lists(&text);
    let text = unordered_lists(&text);
    line_breaks(&text)
}

/// Quoted lines are rendered on their own and parked, so lists and tables
/// inside a quote nest within it.
fn blockquotes(text: &str, vault: &mut Vault) -> String {
    group_lines(
        text,
        |line| {
            let rest = line.trim_start().strip_prefix('>')?;
            Some(rest.strip_prefix(' ').unwrap_or(rest))
        },
        |run| {
            let inner = blocks(&run.join("\n"));
            format!("<blockquote>{}</blockquote>", vault.stash(inner))
        },
    )
}

fn table_cells(row: &str) -> Vec<String> {
    TABLE_ROW
        .captures(row)
        .map(|caps| caps[1].split('|').map(|c| c.trim().to_string()).collect())
        .unwrap_or_default()
}

/// Header row, `|---|` separator, then one or more body rows.
fn tables(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let is_table = i + 2 < lines.len()
            && TABLE_ROW.is_match(lines[i])
            && TABLE_SEPARATOR.is_match(lines[i + 1])
            && TABLE_ROW.is_match(lines[i + 2])
            && !TABLE_SEPARATOR.is_match(lines[i]);
        if !is_table {
            out.push(lines[i].to_string());
            i += 1;
            continue;
        }

        let mut html = String::from("<table class=\"md-table\"><thead><tr>");
        for cell in table_cells(lines[i]) {
            html.push_str(&format!("<th>{cell}</th>"));
        }
        html.push_str("</tr></thead><tbody>");
        i += 2;
        while i < lines.len() && TABLE_ROW.is_match(lines[i]) {
            html.push_str("<tr>");
            for cell in table_cells(lines[i]) {
                html.push_str(&format!("<td>{cell}</td>"));
            }
            html.push_str("</tr>");
            i += 1;
        }
        html.push_str("</tbody></table>");
        out.push(html);
    }
    out.join("\n")
}

fn headings(text: &str) -> String {
    HEADING
        .replace_all(text, |caps: &Captures| {
            let level = caps[1].len();
            format!("<h{level}>{}</h{level}>", &caps[2])
        })
        .into_owned()
}

fn bold(text: &str) -> String {
    BOLD.replace_all(text, "<strong>$1</strong>").into_owned()
}

fn italic(text: &str) -> String {
    ITALIC.replace_all(text, "<em>$1</em>").into_owned()
}

fn autolink(text: &str) -> String {
    BARE_URL
        .replace_all(text, |caps: &Captures| {
            let m = caps.get(0).map(|m| (m.start(), m.as_str())).unwrap_or((0, ""));
            let (start, url) = m;
            // already inside an attribute value
            if text[..start].ends_with(['"', '\'', '=']) {
                return url.to_string();
            }
            let trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?']);
            let tail = &url[trimmed.len()..];
            format!(
                "<a href=\"{trimmed}\" target=\"_blank\" rel=\"noopener noreferrer\">{trimmed}</a>{tail}"
            )
        })
        .into_owned()
}

fn list_block(tag: &str, run: &[&str]) -> String {
    let items: String = run.iter().map(|item| format!("<li>{item}</li>")).collect();
    format!("<{tag}>{items}</{tag}>")
}

fn ordered_lists(text: &str) -> String {
    group_lines(
        text,
        |line| ORDERED_ITEM.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str()),
        |run| list_block("ol", run),
    )
}

fn unordered_lists(text: &str) -> String {
    group_lines(
        text,
        |line| UNORDERED_ITEM.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str()),
        |run| list_block("ul", run),
    )
}

fn line_breaks(text: &str) -> String {
    BLOCK_END_NEWLINE
        .replace_all(text, "$1")
        .replace('\n', "<br>")
}

fn bold_figures(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut skip_depth = 0usize;
    let mut last = 0;
    for tag in HTML_TAG.find_iter(html) {
        push_text(&mut out, &html[last..tag.start()], skip_depth == 0);
        if let Some(caps) = TAG_NAME.captures(tag.as_str()) {
            let name = caps[2].to_ascii_lowercase();
            if FIGURE_SKIP.contains(&name.as_str()) {
                if caps[1].is_empty() {
                    skip_depth += 1;
                } else {
                    skip_depth = skip_depth.saturating_sub(1);
                }
            }
        }
        out.push_str(tag.as_str());
        last = tag.end();
    }
    push_text(&mut out, &html[last..], skip_depth == 0);
    out
}

fn push_text(out: &mut String, text: &str, highlight: bool) {
    if !highlight {
        out.push_str(text);
        return;
    }
    let replaced = FIGURE.replace_all(text, |caps: &Captures| {
        let Some(m) = caps.get(0) else {
            return String::new();
        };
        let figure = m.as_str();
        let glued = text[m.end()..].chars().next().is_some_and(|c| c.is_alphanumeric());
        let digits = figure.chars().filter(|c| c.is_ascii_digit()).count();
        let looks_like_figure = figure.contains(['%', '.', ',']) || digits >= 2;
        if looks_like_figure && !glued {
            format!("<strong>{figure}</strong>")
        } else {
            figure.to_string()
        }
    });
    out.push_str(&replaced);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PLAIN: RenderOptions = RenderOptions { bold_figures: false };

    fn plain(text: &str) -> String {
        render_with(text, &PLAIN)
    }

    #[test]
    fn test_bold() {
        assert_eq!(plain("**x**"), "<strong>x</strong>");
    }

    #[test]
    fn test_italic_and_bold_together() {
        assert_eq!(plain("**a** and *b*"), "<strong>a</strong> and <em>b</em>");
    }

    #[rstest]
    #[case("# Title", "<h1>Title</h1>")]
    #[case("## Sub", "<h2>Sub</h2>")]
    #[case("### Small", "<h3>Small</h3>")]
    #[case("#### Too deep", "#### Too deep")]
    #[case("#hashtag", "#hashtag")]
    fn test_headings(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(plain(input), expected);
    }

    #[test]
    fn test_heading_swallows_following_newline() {
        assert_eq!(plain("# T\nbody"), "<h1>T</h1>body");
    }

    #[test]
    fn test_newlines_become_breaks() {
        assert_eq!(plain("a\nb\n\nc"), "a<br>b<br><br>c");
    }

    #[test]
    fn test_crlf_normalized() {
        assert_eq!(plain("a\r\nb"), "a<br>b");
    }

    #[test]
    fn test_table_two_columns_three_rows() {
        let md = "| Line | Output |\n|------|--------|\n| A | 10 |\n| B | 20 |\n| C | 30 |";
        let html = plain(md);
        assert_eq!(html.matches("<table").count(), 1);
        assert_eq!(html.matches("<th>").count(), 2);
        assert_eq!(html.matches("<td>").count(), 6);
        // header row plus three body rows
        assert_eq!(html.matches("<tr>").count(), 4);
        assert!(html.contains("<th>Line</th><th>Output</th>"));
        assert!(html.contains("<tr><td>C</td><td>30</td></tr>"));
    }

    #[test]
    fn test_table_keeps_empty_inner_cell() {
        let html = plain("| a | b | c |\n|---|---|---|\n| 1 |  | 3 |");
        assert!(html.contains("<tr><td>1</td><td></td><td>3</td></tr>"), "{html}");
    }

    #[test]
    fn test_table_needs_separator() {
        let html = plain("| a | b |\n| 1 | 2 |");
        assert!(!html.contains("<table"));
    }

    #[test]
    fn test_table_followed_by_text() {
        let html = plain("| k | v |\n|---|---|\n| a | 1 |\nafter");
        assert!(html.ends_with("</table>after"), "{html}");
    }

    #[test]
    fn test_fenced_code_is_escaped_and_shielded() {
        let html = plain("```rust\nlet x = **y** < 3;\n```\ndone");
        assert_eq!(
            html,
            "<pre><code class=\"language-rust\">let x = **y** &lt; 3;</code></pre>done"
        );
    }

    #[test]
    fn test_fenced_code_without_language() {
        assert_eq!(plain("```\nraw\n```"), "<pre><code>raw</code></pre>");
    }

    #[test]
    fn test_unterminated_fence_left_as_text() {
        let html = plain("```py\nprint(1)");
        assert!(!html.contains("<pre>"));
    }

    #[test]
    fn test_inline_code_shields_markdown() {
        assert_eq!(plain("use `*ptr*` here"), "use <code>*ptr*</code> here");
    }

    #[test]
    fn test_blockquote_groups_lines() {
        assert_eq!(plain("> one\n> two\nafter"), "<blockquote>one<br>two</blockquote>after");
    }

    #[rstest]
    #[case("> 1. a\n> 2. b", "<blockquote><ol><li>a</li><li>b</li></ol></blockquote>")]
    #[case("> - a\n> - b\nafter", "<blockquote><ul><li>a</li><li>b</li></ul></blockquote>after")]
    #[case("> note\n> - a", "<blockquote>note<br><ul><li>a</li></ul></blockquote>")]
    fn test_lists_nest_inside_blockquote(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(plain(input), expected);
    }

    #[test]
    fn test_table_inside_blockquote() {
        let html = plain("> | a | b |\n> |---|---|\n> | 1 | 2 |");
        assert_eq!(
            html,
            "<blockquote><table class=\"md-table\"><thead><tr><th>a</th><th>b</th></tr></thead>\
             <tbody><tr><td>1</td><td>2</td></tr></tbody></table></blockquote>"
        );
    }

    #[test]
    fn test_unordered_list() {
        assert_eq!(plain("- a\n- b"), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn test_star_list_is_not_italic() {
        assert_eq!(plain("* a\n* b"), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn test_ordered_list() {
        assert_eq!(
            plain("Steps:\n1. cut\n2) weld\nend"),
            "Steps:<br><ol><li>cut</li><li>weld</li></ol>end"
        );
    }

    #[test]
    fn test_autolink() {
        assert_eq!(
            plain("see https://example.com/a?b=1."),
            "see <a href=\"https://example.com/a?b=1\" target=\"_blank\" rel=\"noopener noreferrer\">https://example.com/a?b=1</a>."
        );
    }

    #[test]
    fn test_passthrough_tags_survive() {
        let html = plain("<details><summary>More</summary>hidden</details>");
        assert_eq!(html, "<details><summary>More</summary>hidden</details>");
    }

    #[test]
    fn test_other_tags_are_escaped() {
        assert_eq!(plain("<script>x</script>"), "&lt;script>x&lt;/script>");
    }

    #[test]
    fn test_passthrough_tag_inside_code_is_text() {
        assert_eq!(plain("`<details>`"), "<code>&lt;details></code>");
    }

    #[test]
    fn test_forged_token_is_scrubbed() {
        let forged = format!("{TOKEN_OPEN}0{TOKEN_CLOSE} `x`");
        assert_eq!(plain(&forged), "0 <code>x</code>");
    }

    #[rstest]
    #[case("yield 12%", "yield <strong>12%</strong>")]
    #[case("rate 3.5", "rate <strong>3.5</strong>")]
    #[case("total 1,200 pcs", "total <strong>1,200</strong> pcs")]
    #[case("count 42", "count <strong>42</strong>")]
    #[case("line 7", "line 7")]
    #[case("model A320x", "model A320x")]
    fn test_bold_figures(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(render(input), expected);
    }

    #[test]
    fn test_bold_figures_skips_code_and_links() {
        let html = render("`v1.25` at https://h/12345 and 99");
        assert!(html.contains("<code>v1.25</code>"), "{html}");
        assert!(html.contains(">https://h/12345</a>"), "{html}");
        assert!(html.ends_with("and <strong>99</strong>"), "{html}");
    }

    #[test]
    fn test_bold_figures_not_doubled_inside_strong() {
        assert_eq!(render("**42**"), "<strong>42</strong>");
    }

    #[test]
    fn test_render_is_idempotent_on_same_input() {
        let md = "# Report\n| a | b |\n|---|---|\n| 1 | 2.5% |\n- **x**\n```\ncode\n```";
        assert_eq!(render(md), render(md));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(render(""), "");
    }

    #[test]
    fn test_escape_html_for_verbatim_text() {
        assert_eq!(escape_html(r#"a < b & "c" > d"#), "a &lt; b &amp; &quot;c&quot; &gt; d");
    }
}
