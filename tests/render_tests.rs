use proptest::prelude::*;
use rstest::rstest;

use sse_chat::outputs::format_outputs;
use sse_chat::{render, render_with, RenderOptions};

const PLAIN: RenderOptions = RenderOptions { bold_figures: false };

const PRIVATE_DELIMITERS: [char; 2] = ['\u{E000}', '\u{E001}'];
/// Markdown punctuation mixed with the private-use delimiters the renderer
/// uses internally.
const TOKEN_PRONE_TEXT: &str = "[a-z*`#|>\\- \\n\\x{E000}\\x{E001}0-9]{0,80}";

#[test]
fn test_typical_answer_document() {
    let md = "\
## Shift summary
Output was **1,250** units, see https://mes.example/report.
| Line | Yield |
|------|-------|
| A | 98.5% |
| B | 97.1% |
1. check line B
2. restock
> plan is final
<details><summary>Raw</summary>`qty=1250`</details>";

    let html = render(md);
    assert!(html.starts_with("<h2>Shift summary</h2>"), "{html}");
    assert!(html.contains("<strong>1,250</strong>"));
    assert!(html.contains(
        r#"<a href="https://mes.example/report" target="_blank" rel="noopener noreferrer">https://mes.example/report</a>."#
    ));
    assert_eq!(html.matches("<td>").count(), 4);
    assert!(html.contains("<td><strong>98.5%</strong></td>"));
    assert!(html.contains("<ol><li>check line B</li><li>restock</li></ol>"));
    assert!(html.contains("<blockquote>plan is final</blockquote>"));
    assert!(html.contains("<details><summary>Raw</summary><code>qty=1250</code></details>"));
}

#[rstest]
#[case("**x**", "<strong>x</strong>")]
#[case("- a\n- b", "<ul><li>a</li><li>b</li></ul>")]
#[case("`<b>`", "<code>&lt;b></code>")]
#[case("<script>alert(1)</script>", "&lt;script>alert(1)&lt;/script>")]
#[case("line<br>next", "line<br>next")]
fn test_render_cases(#[case] input: &str, #[case] expected: &str) {
    assert_eq!(render_with(input, &PLAIN), expected);
}

#[test]
fn test_quoted_list_stays_inside_quote() {
    let html = render_with("> 1. check line B\n> 2. restock\nafter", &PLAIN);
    assert_eq!(
        html,
        "<blockquote><ol><li>check line B</li><li>restock</li></ol></blockquote>after"
    );
}

#[test]
fn test_private_delimiters_in_input_are_dropped() {
    assert_eq!(render_with("a\u{E000}0\u{E001}b", &PLAIN), "a0b");
}

#[test]
fn test_workflow_output_renders_as_table() {
    let outputs = serde_json::json!({
        "result": r#"[{"key":"Good","value":40},{"key":"Scrap","value":2}]"#
    });
    let markdown = format_outputs(&outputs).expect("formatted");
    let html = render_with(&markdown, &PLAIN);
    assert_eq!(html.matches("<th>").count(), 2);
    assert!(html.contains("<tr><td>Scrap</td><td>2</td></tr>"), "{html}");
}

proptest! {
    #[test]
    fn prop_render_is_deterministic(text in "[ -~\\n]{0,200}") {
        prop_assert_eq!(render(&text), render(&text));
    }

    #[test]
    fn prop_private_tokens_never_leak(text in TOKEN_PRONE_TEXT) {
        let html = render(&text);
        prop_assert!(!html.contains(PRIVATE_DELIMITERS));
    }

    #[test]
    fn prop_plain_words_pass_through(words in proptest::collection::vec("[a-z]{1,8}", 1..10)) {
        let text = words.join(" ");
        prop_assert_eq!(render_with(&text, &PLAIN), text);
    }
}
