//! Text handling for card content: markdown image extraction, mentions,
//! notification snippets and name validation.

use std::sync::LazyLock;

use regex::Regex;

macro_rules! regex {
    ($name:ident, $pattern:expr) => {
        #[allow(clippy::expect_used)]
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pattern).expect("compile regex"));
    };
}

regex!(IMAGE_TAG, r"!\[[^\(\)]*\]\([^\[\]]*\)");
regex!(PARENTHESIZED, r"\([^\(\)]*\)");
regex!(LINKBAR, r"%%%[^%]*%%%");
regex!(MENTION, r"(?:^|[^\\\w])[@!]([a-z0-9_]{2,})");
regex!(
    URL,
    r"(http|ftp|https)://([\w_-]+(?:(?:\.[\w_-]+)+))([\w.,@?^=%&:/~+#-]*[\w@?^=%&/~+#-])?"
);
regex!(IMAGE_OR_LINK, r"[!]?\[[^\]]*\]\([^)]*\)");
regex!(INLINE_HEADER, r"#+\s+");
regex!(TRAILING_SPACE, r"\s+$");
regex!(USERNAME, r"^[a-z0-9_]{2,20}$");
regex!(CHANNEL_NAME, r"^[a-zA-Z0-9_]{2,24}$");

/// URLs of images embedded in markdown (`![alt](url)`) and of linkbar
/// blocks whose third line is a link, in order of appearance.
pub fn image_urls(markdown: &str) -> Vec<String> {
    let mut urls: Vec<String> = IMAGE_TAG
        .find_iter(markdown)
        .filter_map(|tag| PARENTHESIZED.find(tag.as_str()))
        .map(|m| m.as_str().trim_matches(|c| c == '(' || c == ')').to_string())
        .filter(|url| !url.is_empty())
        .collect();

    for bar in LINKBAR.find_iter(markdown) {
        if let Some(line) = bar.as_str().split('\n').nth(2) {
            if line.starts_with("http") {
                urls.push(line.to_string());
            }
        }
    }
    urls
}

/// Replace each URL once, in order, with its re-hosted counterpart.
pub fn replace_urls(markdown: &str, rehosted: &[(String, String)]) -> String {
    rehosted
        .iter()
        .fold(markdown.to_string(), |md, (from, to)| md.replacen(from.as_str(), to, 1))
}

/// Names tagged with `@name` or `!name`. An escaped `\@` does not count.
pub fn mentioned_names(content: &str) -> Vec<String> {
    MENTION
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect()
}

/// Plain-text snippet of card content for notification messages: links,
/// images, linkbar markers, headers and line breaks removed, then cut to
/// `length` characters. A length of 0 keeps everything.
pub fn content_tail(content: &str, length: usize) -> String {
    let content = URL.replace_all(content, "");
    let content = IMAGE_OR_LINK.replace_all(&content, "");
    let content = content.replace("%%%\n", "");
    let content = INLINE_HEADER
        .replace_all(&content, "")
        .replace('\n', " ")
        .replace("%n", " ");
    let content = TRAILING_SPACE.replace_all(&content, "");

    if length == 0 || content.chars().count() < length {
        return content.into_owned();
    }
    let mut cut: String = content.chars().take(length).collect();
    cut.push_str("...");
    cut
}

/// The first `count` space-separated words. A count of 0 returns the whole string.
pub fn first_words(value: &str, count: usize) -> &str {
    if count == 0 {
        return value;
    }
    match value.match_indices(' ').nth(count - 1) {
        Some((i, _)) => &value[..i],
        None => value,
    }
}

pub fn is_valid_username(username: &str) -> bool {
    USERNAME.is_match(&username.to_lowercase())
}

pub fn is_valid_channel_name(name: &str) -> bool {
    CHANNEL_NAME.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_urls_from_tags_and_linkbars() {
        let md = "look ![cat](https://a.test/cat.png) and\n%%%\ntitle\nhttps://b.test/pic.jpg\n%%%";
        assert_eq!(
            image_urls(md),
            vec!["https://a.test/cat.png".to_string(), "https://b.test/pic.jpg".to_string()]
        );
    }

    #[test]
    fn test_plain_links_are_not_images() {
        assert!(image_urls("[site](https://a.test)").is_empty());
    }

    #[test]
    fn test_replace_urls_once_each() {
        let md = "![a](http://x/1.png) ![b](http://x/1.png)";
        let out = replace_urls(md, &[("http://x/1.png".into(), "http://cdn/9.png".into())]);
        assert_eq!(out, "![a](http://cdn/9.png) ![b](http://x/1.png)");
    }

    #[test]
    fn test_mentions() {
        let names = mentioned_names("hey @chad and !blue_fox, not \\@skip");
        assert_eq!(names, vec!["chad".to_string(), "blue_fox".to_string()]);
    }

    #[test]
    fn test_content_tail_strips_markup() {
        let content = "## Title\nsee https://a.test/page ![img](x.png) now  ";
        assert_eq!(content_tail(content, 80), "Title see   now");
    }

    #[test]
    fn test_content_tail_truncates() {
        let long = "word ".repeat(30);
        let tail = content_tail(&long, 80);
        assert_eq!(tail.chars().count(), 83);
        assert!(tail.ends_with("..."));
        assert_eq!(content_tail(&long, 0), long.trim_end());
    }

    #[test]
    fn test_first_words() {
        assert_eq!(first_words("one two three", 2), "one two");
        assert_eq!(first_words("one two three", 5), "one two three");
        assert_eq!(first_words("one two three", 0), "one two three");
    }

    #[test]
    fn test_username_rules() {
        assert!(is_valid_username("Chad_99"));
        assert!(!is_valid_username("c"));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"x".repeat(21)));
    }

    #[test]
    fn test_channel_name_rules() {
        assert!(is_valid_channel_name("Bakers_Guild"));
        assert!(!is_valid_channel_name("no-dashes"));
    }
}
