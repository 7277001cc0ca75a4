/// Derives the URL identifier used for posts, categories and tags.
///
/// Lowercases the input, drops every character that is not alphanumeric,
/// whitespace or a hyphen, then joins the remaining words with single
/// hyphens. The result never starts or ends with a hyphen and may be empty
/// when the input has no alphanumerics at all.
pub fn slugify(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();

    kept.split(|c: char| c.is_whitespace() || c == '-')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
