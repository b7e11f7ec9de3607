// src/feed/html.rs
//! HTML cleanup for feed text: single-line titles, structured bodies, and
//! image discovery inside markup.

use once_cell::sync::OnceCell;
use regex::Regex;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"(?is)<[^>]*>")
}

fn whitespace() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"\s+")
}

/// Title-style cleanup: tags removed, entities decoded, one line.
pub fn clean_text(s: &str) -> String {
    let stripped = tags().replace_all(s, " ");
    let decoded = html_escape::decode_html_entities(&stripped);
    whitespace().replace_all(&decoded, " ").trim().to_string()
}

/// Body-style cleanup: block and line breaks become newlines before tags are
/// stripped, then entities are decoded and blank runs collapsed.
pub fn clean_html(s: &str) -> String {
    static BR: OnceCell<Regex> = OnceCell::new();
    static BLOCK_END: OnceCell<Regex> = OnceCell::new();
    static HSPACE: OnceCell<Regex> = OnceCell::new();
    static BLANKS: OnceCell<Regex> = OnceCell::new();

    let out = re(&BR, r"(?i)<br\s*/?>").replace_all(s, "\n");
    let out = re(
        &BLOCK_END,
        r"(?i)</(p|div|li|h[1-6]|blockquote|tr|pre|section|article)\s*>",
    )
    .replace_all(&out, "\n\n");
    let out = tags().replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out);

    let hspace = re(&HSPACE, r"[ \t\u{00A0}\r\f\v]+");
    let lines: Vec<String> = out
        .lines()
        .map(|l| hspace.replace_all(l, " ").trim().to_string())
        .collect();
    let joined = lines.join("\n");
    re(&BLANKS, r"\n{3,}")
        .replace_all(&joined, "\n\n")
        .trim()
        .to_string()
}

/// `src` of the first `<img>` tag in raw markup.
pub fn first_img_src(html: &str) -> Option<String> {
    static IMG: OnceCell<Regex> = OnceCell::new();
    re(&IMG, r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str().trim()).into_owned())
        .filter(|s| !s.is_empty())
}

const IMAGE_EXTENSIONS: [&str; 8] = [
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".avif",
];

/// Whether a URL path ends with a common image extension.
pub fn looks_like_image_url(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = path.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
