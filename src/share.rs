//! Share-target links.
//!
//! A page can hand its text to the reader with a link of the form
//! `<base>?title=..&text=..&url=..`. [`SharedContent::from_query`] decides
//! what such a link asks for: text to speak directly, or a page URL for the
//! host to fetch first.

use url::{form_urlencoded, Url};

use crate::SyncError;

/// Longest page text carried in a share link, in characters.
pub const MAX_SHARED_TEXT_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedContent {
    /// Speak this text as-is.
    Text(String),
    /// Fetch this page and speak its content.
    Url(Url),
}

impl SharedContent {
    /// Interpret a share-target query string, with or without the leading `?`.
    ///
    /// Returns `None` unless a non-empty `text` or `url` is present. The
    /// non-empty `title`, `text` and `url` values are joined with newlines;
    /// if an `http(s)` URL appears anywhere in that, the first one wins.
    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut title = None;
        let mut text = None;
        let mut page = None;
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match &*key {
                "title" => &mut title,
                "text" => &mut text,
                "url" => &mut page,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }

        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if !present(&text) && !present(&page) {
            return None;
        }

        let combined = [title, text, page]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(candidate) = find_http_url(&combined) {
            match Url::parse(candidate) {
                Ok(url) => return Some(SharedContent::Url(url)),
                Err(e) => log::debug!("Ignoring unparseable shared URL {candidate:?}: {e}"),
            }
        }
        Some(SharedContent::Text(combined))
    }

    /// Interpret a full share link.
    pub fn from_share_link(link: &str) -> Result<Option<Self>, SyncError> {
        let link = Url::parse(link)?;
        Ok(link.query().and_then(Self::from_query))
    }
}

/// Build a share link for a page, truncating its text to
/// [`MAX_SHARED_TEXT_CHARS`].
pub fn share_link(base: &str, title: &str, page_text: &str, page_url: &str) -> Result<Url, SyncError> {
    let mut link = Url::parse(base)?;
    let text = match page_text.char_indices().nth(MAX_SHARED_TEXT_CHARS) {
        Some((cut, _)) => &page_text[..cut],
        None => page_text,
    };
    link.query_pairs_mut()
        .clear()
        .append_pair("title", title)
        .append_pair("text", text)
        .append_pair("url", page_url);
    Ok(link)
}

/// First `http://` or `https://` run of non-whitespace in `text`.
fn find_http_url(text: &str) -> Option<&str> {
    text.match_indices("http").find_map(|(start, _)| {
        let rest = &text[start..];
        let scheme_len = if rest.starts_with("https://") {
            "https://".len()
        } else if rest.starts_with("http://") {
            "http://".len()
        } else {
            return None;
        };
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        (end > scheme_len).then(|| &rest[..end])
    })
}
