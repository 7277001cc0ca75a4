use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn code_block_regex() -> &'static Regex {
    static CODE_BLOCK: OnceLock<Regex> = OnceLock::new();
    CODE_BLOCK.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("fenced code block pattern is valid"))
}

/// Escapes HTML outside fenced code blocks (```), leaving the blocks
/// untouched. Existing entities are decoded first so saving the same body
/// twice does not double-escape it.
pub fn sanitize_markdown_content(markdown_input: &str) -> String {
    let mut code_blocks: Vec<String> = Vec::new();

    let with_placeholders = code_block_regex().replace_all(markdown_input, |caps: &regex::Captures| {
        code_blocks.push(caps[0].to_string());
        format!("__CODE_BLOCK_PLACEHOLDER_{}__", code_blocks.len() - 1)
    });

    let decoded = html_escape::decode_html_entities(&with_placeholders);
    let mut output = html_escape::encode_text(&decoded).to_string();

    for (i, block) in code_blocks.iter().enumerate() {
        let placeholder = format!("__CODE_BLOCK_PLACEHOLDER_{}__", i);
        output = output.replacen(&placeholder, block, 1);
    }

    output
}

/// Reduces input to plain text: tags are removed (script and style bodies
/// with them) and entities are decoded, so "Tips &amp; Tricks" stays
/// "Tips & Tricks" for slugs and JSON.
pub fn strip_all_html(input: &str) -> String {
    let cleaned = ammonia::Builder::new()
        .tags(HashSet::new())
        .clean(input)
        .to_string();
    html_escape::decode_html_entities(&cleaned).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_script_bodies() {
        assert_eq!(strip_all_html("<b>Bold</b> move<script>alert(1)</script>"), "Bold move");
    }

    #[test]
    fn keeps_ampersands_as_text() {
        assert_eq!(strip_all_html("Tips & Tricks"), "Tips & Tricks");
    }

    #[test]
    fn escapes_html_outside_code_fences() {
        let input = "Hello <img src=x onerror=alert(1)>\n```\nlet a = \"<b>\";\n```";
        let output = sanitize_markdown_content(input);
        assert!(output.starts_with("Hello &lt;img"));
        assert!(output.contains("let a = \"<b>\";"));
    }

    #[test]
    fn does_not_double_escape() {
        let once = sanitize_markdown_content("a < b");
        assert_eq!(sanitize_markdown_content(&once), once);
    }
}
