//! Cached regex patterns for markup scanning.
//!
//! Raw markup is bytes in the book's codepage, so matching runs on
//! [`ascii_view`], which keeps byte offsets identical to the source.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex_lite::Regex;

/// Opening `<svg ...>` tag of a flow piece.
pub static SVG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<svg[^>]*>").unwrap());

/// `<image ...>` reference inside an SVG flow.
pub static IMAGE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<image[^>]*>").unwrap());

/// `id="..."` at the start of a single tag.
pub static TAG_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^<[^>]*\sid\s*=\s*['"]([^'"]*)['"]"#).unwrap()
});

/// `name="..."` at the start of a single tag.
pub static TAG_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^<[^>]*\sname\s*=\s*['"]([^'"]*)['"]"#).unwrap()
});

/// Legacy `filepos=NNN` link targets.
pub static FILEPOS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<[^<>]+filepos=['"]{0,1}(\d+)[^<>]*>"#).unwrap()
});

/// Tag carrying a specific `aid` attribute.
pub fn aid_tag_re(aid: &str) -> Option<Regex> {
    let pattern = format!(
        r#"(?i)<[^>]*\said\s*=\s*['"]{}['"][^>]*>"#,
        regex_lite::escape(aid)
    );
    Regex::new(&pattern).ok()
}

/// Replace non-ASCII bytes with `?` so offsets match the source bytes.
pub fn ascii_view(bytes: &[u8]) -> Cow<'_, str> {
    if bytes.is_ascii() {
        // ASCII is valid UTF-8
        return String::from_utf8_lossy(bytes);
    }
    Cow::Owned(
        bytes
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect(),
    )
}
