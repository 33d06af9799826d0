//! Wikitext link extraction and redirect detection.
//!
//! Links are `[[...]]` spans whose inner text holds no further `[`. Each span is
//! normalized the way MediaWiki resolves link targets (underscores, entities, percent
//! escapes, section anchors, first-letter case) and classified as a page or category link.

use crate::config::{IGNORED_NAMESPACES, LANGUAGE_CODES, MEDIA_NAMESPACES};
use crate::entities::decode_entities;
use crate::models::{Link, LinkKind, PageType};
use memchr::memchr;
use memchr::memmem;
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use tracing::trace;

static NOWIKI_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<nowiki>.*?</nowiki>").unwrap());

static REDIRECT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\A\s*#redirect\s*:?\s*\[\[[^\[]*?\]\]").unwrap());

static SPACE_RUN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r" {2,}").unwrap());

pub static DEFAULT_FILTER: Lazy<LinkFilter> = Lazy::new(LinkFilter::default);

/// Prefixes that cause a link to be dropped: interwiki language codes and ignored namespaces.
#[derive(Debug, Clone)]
pub struct LinkFilter {
    ignored_namespaces: FxHashSet<String>,
    language_codes: FxHashSet<String>,
}

impl Default for LinkFilter {
    fn default() -> Self {
        Self {
            ignored_namespaces: IGNORED_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            language_codes: LANGUAGE_CODES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LinkFilter {
    /// Adds namespaces on top of the defaults. Matching is exact after lower-casing.
    pub fn with_ignored_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ignored_namespaces.extend(
            namespaces
                .into_iter()
                .map(|ns| ns.as_ref().trim().replace('_', " ").to_lowercase()),
        );
        self
    }

    pub fn is_dropped_prefix(&self, prefix: &str) -> bool {
        self.language_codes.contains(prefix) || self.ignored_namespaces.contains(prefix)
    }
}

/// Lazy iterator over the links of a page, in document order, duplicates included.
///
/// The iterator is cheap to clone; a clone restarts from the clone point.
#[derive(Clone)]
pub struct Links<'a> {
    text: &'a str,
    pos: usize,
    filter: &'a LinkFilter,
}

pub fn extract_links<'a>(text: &'a str, filter: &'a LinkFilter) -> Links<'a> {
    Links {
        text,
        pos: 0,
        filter,
    }
}

impl<'a> Iterator for Links<'a> {
    type Item = Link;

    fn next(&mut self) -> Option<Link> {
        while let Some(inner) = self.next_span() {
            if let Some(link) = normalize_link(inner, self.filter) {
                return Some(link);
            }
        }
        None
    }
}

impl<'a> Links<'a> {
    /// Returns the inner text of the next `[[...]]` span that contains no `[`.
    fn next_span(&mut self) -> Option<&'a str> {
        let bytes = self.text.as_bytes();
        loop {
            if self.pos >= bytes.len() {
                return None;
            }
            let open = self.pos + memmem::find(&bytes[self.pos..], b"[[")?;
            let inner_start = open + 2;
            let rest = &bytes[inner_start..];
            let close = memmem::find(rest, b"]]");
            let nested = memchr(b'[', rest);

            match (close, nested) {
                (Some(c), None) => {
                    self.pos = inner_start + c + 2;
                    return Some(&self.text[inner_start..inner_start + c]);
                }
                (Some(c), Some(n)) if c < n => {
                    self.pos = inner_start + c + 2;
                    return Some(&self.text[inner_start..inner_start + c]);
                }
                (_, Some(n)) => {
                    let head = &self.text[inner_start..inner_start + n];
                    self.pos = if is_media_link(head) {
                        skip_bracketed(bytes, open)
                    } else {
                        open + 1
                    };
                }
                (None, None) => {
                    self.pos = bytes.len();
                    return None;
                }
            }
        }
    }
}

/// True when the text opening a bracket span names an embedded file or image.
fn is_media_link(head: &str) -> bool {
    let head = head.trim_start();
    if head.starts_with(':') {
        return false;
    }
    let target = head.split('|').next().unwrap_or_default();
    match target.split_once(':') {
        Some((prefix, _)) => {
            let prefix = prefix.trim().to_lowercase();
            MEDIA_NAMESPACES.contains(&prefix.as_str())
        }
        None => false,
    }
}

/// Skips a media link together with its caption, honouring nested `[[ ]]` pairs.
/// An unterminated media link swallows the rest of its line.
fn skip_bracketed(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'[', b'[') => {
                depth += 1;
                i += 2;
            }
            (b']', b']') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    memchr(b'\n', &bytes[open..]).map_or(bytes.len(), |nl| open + nl + 1)
}

/// Normalizes the inner text of one bracket span; `None` means the link is dropped.
pub fn normalize_link(inner: &str, filter: &LinkFilter) -> Option<Link> {
    let mut link = inner.trim_start();
    if link.is_empty() {
        return None;
    }

    let escaped = link.starts_with(':');
    if escaped {
        link = link[1..].trim_start();
    }

    let target = link.split('|').next().unwrap_or_default();
    let decoded = percent_decode_str(target).decode_utf8_lossy();
    let unescaped = decode_entities(&decoded);
    let without_anchor = unescaped.split('#').next().unwrap_or_default();
    let spaced = without_anchor.replace(['_', '\u{a0}'], " ");
    let collapsed = SPACE_RUN_REGEX.replace_all(spaced.trim(), " ");

    if collapsed.is_empty() {
        return None;
    }

    let mut kind = LinkKind::Page;
    let mut title: &str = &collapsed;

    if !escaped {
        if let Some((prefix, rest)) = collapsed.split_once(':') {
            let prefix = prefix.trim().to_lowercase();
            if filter.is_dropped_prefix(&prefix) {
                return None;
            }
            let rest = rest.trim_start();
            if prefix == "category" && !rest.is_empty() {
                kind = LinkKind::Category;
                title = rest;
            } else {
                trace!(prefix = %prefix, "Unrecognized link prefix kept as page link");
            }
        }
    }

    Some(Link {
        kind,
        title: capitalize_first(title),
    })
}

/// Upper-cases the first character only; MediaWiki titles are case-sensitive after it.
fn capitalize_first(title: &str) -> String {
    let mut chars = title.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(title.len());
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

/// Removes `<nowiki>...</nowiki>` spans (case-insensitive, across lines).
pub fn strip_nowiki(text: &str) -> Cow<'_, str> {
    NOWIKI_REGEX.replace_all(text, "")
}

/// Returns the redirect target when `text` opens with a redirect directive to a page.
///
/// `text` must already have its nowiki spans stripped.
pub fn detect_redirect(text: &str, filter: &LinkFilter) -> Option<String> {
    let directive = REDIRECT_REGEX.find(text)?;
    let mut links = extract_links(directive.as_str(), filter);
    match (links.next(), links.next()) {
        (Some(link), None) if link.kind == LinkKind::Page => Some(link.title),
        _ => None,
    }
}

/// Strips nowiki spans and classifies the page as redirect or article.
pub fn classify_page(raw_text: &str, filter: &LinkFilter) -> (PageType, String) {
    let text = strip_nowiki(raw_text).into_owned();
    let page_type = match detect_redirect(&text, filter) {
        Some(target) => PageType::Redirect(target),
        None => PageType::Article,
    };
    (page_type, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(text: &str) -> Vec<Link> {
        extract_links(text, &DEFAULT_FILTER).collect()
    }

    fn pages(text: &str) -> Vec<String> {
        links(text).into_iter().map(|l| l.title).collect()
    }

    #[test]
    fn normalization_suite() {
        let text = " \n\
            [[LinkOne]] [[Sameline]]\n\
            [[Link\n\
            [[Link  _ 2#a|b]]\n\
            [[Link__3#a|b]]\n\
            [[Link___4#a|b]]\n\
            [[Link____5#a|b]]\n\
            [[smallcase]]\n\
            [[   Link6    #sdffsf|asdfdsf]]\n\
            [[Link%207]]\n\
            [[Link&quot;]]\n\
            [[Link&nbsp;8]]\n\
            [[End test]]\n";
        assert_eq!(
            pages(text),
            vec![
                "LinkOne", "Sameline", "Link 2", "Link 3", "Link 4", "Link 5", "Smallcase",
                "Link6", "Link 7", "Link\"", "Link 8", "End test",
            ]
        );
        assert!(links(text).iter().all(|l| l.kind == LinkKind::Page));
    }

    #[test]
    fn section_and_display_text_dropped() {
        assert_eq!(links("[[Link  _ 2#a|b]]"), vec![Link::page("Link 2")]);
    }

    #[test]
    fn nbsp_entity_becomes_space() {
        assert_eq!(links("[[Link&nbsp;8]]"), vec![Link::page("Link 8")]);
    }

    #[test]
    fn category_link() {
        assert_eq!(links("[[Category:Foo]]"), vec![Link::category("Foo")]);
        assert_eq!(
            links("[[category : bar baz|Sort key]]"),
            vec![Link::category("Bar baz")]
        );
    }

    #[test]
    fn empty_category_is_page_link() {
        assert_eq!(links("[[Category:]]"), vec![Link::page("Category:")]);
    }

    #[test]
    fn escaped_category_is_page_link() {
        assert_eq!(
            links("[[:Category:Foo]]"),
            vec![Link::page("Category:Foo")]
        );
    }

    #[test]
    fn interwiki_and_ignored_namespaces_dropped() {
        assert!(links("[[de:Rust]] [[File:A.jpg]] [[User talk:Bob]] [[Template:X]]").is_empty());
        assert!(links("[[Wikipedia_talk:Foo]]").is_empty());
    }

    #[test]
    fn unknown_prefix_kept_verbatim() {
        assert_eq!(
            links("[[Star Wars: Episode I]]"),
            vec![Link::page("Star Wars: Episode I")]
        );
    }

    #[test]
    fn self_section_and_blank_links_dropped() {
        assert!(links("[[#History]] [[ ]] [[]] [[|x]]").is_empty());
    }

    #[test]
    fn unterminated_media_caption_emits_nothing() {
        assert!(links("[[File:A.jpg| [[No Match]]").is_empty());
    }

    #[test]
    fn media_caption_links_skipped_then_scanning_resumes() {
        assert_eq!(
            pages("[[File:A.jpg|thumb|A [[Caption link]] here]] then [[After]]"),
            vec!["After"]
        );
    }

    #[test]
    fn unterminated_media_only_swallows_its_line() {
        assert_eq!(
            pages("[[Image:B.png|a [[X]]\n[[Next line]]"),
            vec!["Next line"]
        );
    }

    #[test]
    fn unterminated_plain_link_does_not_block_following_link() {
        assert_eq!(pages("[[Link [[Inner]]"), vec!["Inner"]);
    }

    #[test]
    fn closed_link_before_later_bracket() {
        assert_eq!(pages("[[A]] see [note] [[B]]"), vec!["A", "B"]);
        assert_eq!(pages("[[Last]]"), vec!["Last"]);
    }

    #[test]
    fn html_and_xml_entities_decoded() {
        assert_eq!(
            pages("[[Caf&eacute;]] [[A&apos;s]] [[X&#39;y]]"),
            vec!["Café", "A's", "X'y"]
        );
    }

    #[test]
    fn duplicates_kept_in_order() {
        assert_eq!(pages("[[B]] [[A]] [[B]]"), vec!["B", "A", "B"]);
    }

    #[test]
    fn first_letter_only_capitalized() {
        assert_eq!(pages("[[iPhone]] [[émile zola]]"), vec!["IPhone", "Émile zola"]);
    }

    #[test]
    fn iterator_is_restartable() {
        let it = extract_links("[[A]] [[B]]", &DEFAULT_FILTER);
        let first: Vec<_> = it.clone().collect();
        let second: Vec<_> = it.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn custom_ignored_namespace() {
        let filter = LinkFilter::default().with_ignored_namespaces(["Draft"]);
        assert!(extract_links("[[Draft:Thing]]", &filter).next().is_none());
        assert_eq!(pages("[[Draft:Thing]]"), vec!["Draft:Thing"]);
    }

    #[test]
    fn nowiki_removed() {
        let stripped = strip_nowiki("<nowiki>[[Nolink]]</nowiki>");
        assert!(links(&stripped).is_empty());
        let multi = strip_nowiki("a<NoWiki>\n[[X]]\n</NOWIKI>b<nowiki>y</nowiki>[[Kept]]");
        assert_eq!(multi, "ab[[Kept]]");
    }

    #[test]
    fn redirect_detected() {
        assert_eq!(
            detect_redirect("  #REDIRECT [[Target Page]]", &DEFAULT_FILTER),
            Some("Target Page".to_string())
        );
        assert_eq!(
            detect_redirect("#redirect:[[target_page#Section]]", &DEFAULT_FILTER),
            Some("Target page".to_string())
        );
        assert_eq!(
            detect_redirect("#Redirect\n[[A]]\n\n{{R from move}}", &DEFAULT_FILTER),
            Some("A".to_string())
        );
    }

    #[test]
    fn redirect_must_be_anchored() {
        assert_eq!(detect_redirect("not at start #redirect [[X]]", &DEFAULT_FILTER), None);
        assert_eq!(detect_redirect("<b>#redirect [[X]]</b>", &DEFAULT_FILTER), None);
    }

    #[test]
    fn redirect_to_category_is_not_redirect() {
        assert_eq!(detect_redirect("#REDIRECT [[Category:Foo]]", &DEFAULT_FILTER), None);
    }

    #[test]
    fn redirect_to_interwiki_is_not_redirect() {
        assert_eq!(detect_redirect("#REDIRECT [[fr:Bonjour]]", &DEFAULT_FILTER), None);
    }

    #[test]
    fn classify_strips_nowiki_first() {
        let (page_type, text) =
            classify_page("<nowiki>#REDIRECT [[X]]</nowiki>Body [[Y]]", &DEFAULT_FILTER);
        assert!(matches!(page_type, PageType::Article));
        assert_eq!(text, "Body [[Y]]");

        let (page_type, _) = classify_page("#REDIRECT [[Target]]", &DEFAULT_FILTER);
        assert!(matches!(page_type, PageType::Redirect(ref t) if t == "Target"));
    }
}
