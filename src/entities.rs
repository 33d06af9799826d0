//! HTML/XML character reference decoding for link targets.
//!
//! Each `&...;` reference is handed to `quick-xml`, which knows the XML predefined
//! entities, the HTML named entities and numeric references. Anything it rejects stays
//! in the text untouched.

use once_cell::sync::Lazy;
use quick_xml::escape::unescape;
use regex::{Captures, Regex};
use std::borrow::Cow;

static ENTITY_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#?\w+;").unwrap());

pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    ENTITY_REGEX.replace_all(text, |caps: &Captures| decode_one(&caps[0]))
}

fn decode_one(raw: &str) -> String {
    // quick-xml only accepts a lower-case hex marker
    let reference = match raw.strip_prefix("&#X") {
        Some(hex) => Cow::Owned(format!("&#x{hex}")),
        None => Cow::Borrowed(raw),
    };
    match unescape(&reference) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}
