//! Streaming dump parser.
//!
//! [`DocumentParser`] is a small state machine fed by element callbacks; [`WikiReader`]
//! pumps `quick-xml` events into it and yields one [`PageRecord`] per closed `<page>`.

use crate::corpus;
use crate::models::PageRecord;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    Outside,
    InPage,
    InTitle,
    InText,
}

impl fmt::Display for DocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocState::Outside => "outside a page",
            DocState::InPage => "in a page",
            DocState::InTitle => "in a title",
            DocState::InText => "in page text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },
    #[error("unexpected {}<{element}> while {state}", end_marker(.closing))]
    UnexpectedElement {
        element: String,
        closing: bool,
        state: DocState,
    },
    #[error("corpus ended while {state}")]
    Truncated { state: DocState },
    #[error(transparent)]
    Open(#[from] anyhow::Error),
}

fn end_marker(closing: &bool) -> &'static str {
    if *closing {
        "/"
    } else {
        ""
    }
}

/// Element-level callbacks from the underlying XML reader.
pub trait DumpEvents {
    fn on_element_start(&mut self, element: &[u8]) -> Result<(), CorpusError>;

    fn on_text(&mut self, text: &str);

    /// Returns the completed record when `element` closes a page.
    fn on_element_end(&mut self, element: &[u8]) -> Result<Option<PageRecord>, CorpusError>;
}

/// Tracks `page` / `title` / `text` nesting and accumulates their character data.
pub struct DocumentParser {
    state: DocState,
    title: String,
    text: String,
    pages: u64,
}

impl Default for DocumentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser {
    pub fn new() -> Self {
        Self {
            state: DocState::Outside,
            title: String::new(),
            text: String::new(),
            pages: 0,
        }
    }

    pub fn state(&self) -> DocState {
        self.state
    }

    pub fn pages_completed(&self) -> u64 {
        self.pages
    }

    fn transition(
        &mut self,
        element: &[u8],
        closing: bool,
        expected: DocState,
        next: DocState,
    ) -> Result<(), CorpusError> {
        if self.state != expected {
            return Err(CorpusError::UnexpectedElement {
                element: String::from_utf8_lossy(element).into_owned(),
                closing,
                state: self.state,
            });
        }
        self.state = next;
        Ok(())
    }
}

impl DumpEvents for DocumentParser {
    fn on_element_start(&mut self, element: &[u8]) -> Result<(), CorpusError> {
        match element {
            b"page" => {
                self.transition(element, false, DocState::Outside, DocState::InPage)?;
                self.title.clear();
                self.text.clear();
            }
            b"title" => self.transition(element, false, DocState::InPage, DocState::InTitle)?,
            b"text" => self.transition(element, false, DocState::InPage, DocState::InText)?,
            _ => {}
        }
        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        match self.state {
            DocState::InTitle => self.title.push_str(text),
            DocState::InText => self.text.push_str(text),
            _ => {}
        }
    }

    fn on_element_end(&mut self, element: &[u8]) -> Result<Option<PageRecord>, CorpusError> {
        match element {
            b"page" => {
                self.transition(element, true, DocState::InPage, DocState::Outside)?;
                self.pages += 1;
                Ok(Some(PageRecord {
                    title: std::mem::take(&mut self.title),
                    text: std::mem::take(&mut self.text),
                }))
            }
            b"title" => {
                self.transition(element, true, DocState::InTitle, DocState::InPage)?;
                Ok(None)
            }
            b"text" => {
                self.transition(element, true, DocState::InText, DocState::InPage)?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

/// Iterator over the page records of one corpus stream.
///
/// A structural error is yielded once; the iterator is exhausted afterwards.
pub struct WikiReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    parser: DocumentParser,
    done: bool,
}

impl WikiReader<Box<dyn BufRead + Send>> {
    pub fn open(path: &Path) -> Result<Self, CorpusError> {
        Ok(Self::new(corpus::open(path)?))
    }
}

impl<R: BufRead> WikiReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            reader: Reader::from_reader(source),
            buf: Vec::with_capacity(8192),
            parser: DocumentParser::new(),
            done: false,
        }
    }

    pub fn pages_completed(&self) -> u64 {
        self.parser.pages_completed()
    }

    fn next_record(&mut self) -> Result<Option<PageRecord>, CorpusError> {
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(source) => {
                    return Err(CorpusError::Xml {
                        position: self.reader.buffer_position(),
                        source,
                    })
                }
            };
            match event {
                Event::Start(e) => self.parser.on_element_start(e.name().as_ref())?,
                Event::Empty(e) => {
                    self.parser.on_element_start(e.name().as_ref())?;
                    if let Some(record) = self.parser.on_element_end(e.name().as_ref())? {
                        return Ok(Some(record));
                    }
                }
                Event::End(e) => {
                    if let Some(record) = self.parser.on_element_end(e.name().as_ref())? {
                        return Ok(Some(record));
                    }
                }
                Event::Text(e) => {
                    let position = self.reader.buffer_position();
                    let text = e
                        .unescape()
                        .map_err(|source| CorpusError::Xml { position, source })?;
                    self.parser.on_text(&text);
                }
                Event::CData(e) => {
                    let raw = e.into_inner();
                    self.parser.on_text(&String::from_utf8_lossy(&raw));
                }
                Event::Eof => {
                    return match self.parser.state() {
                        DocState::Outside => Ok(None),
                        state => Err(CorpusError::Truncated { state }),
                    };
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for WikiReader<R> {
    type Item = Result<PageRecord, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(xml: &str) -> Vec<Result<PageRecord, CorpusError>> {
        WikiReader::new(xml.as_bytes()).collect()
    }

    #[test]
    fn reads_title_and_text() {
        let xml = "<mediawiki><page><title>A &amp; B</title><ns>0</ns>\
                   <revision><text xml:space=\"preserve\">Hello [[World]]</text></revision>\
                   </page></mediawiki>";
        let records: Vec<_> = read_all(xml).into_iter().map(Result::unwrap).collect();
        assert_eq!(
            records,
            vec![PageRecord {
                title: "A & B".to_string(),
                text: "Hello [[World]]".to_string(),
            }]
        );
    }

    #[test]
    fn text_fragments_are_concatenated() {
        let xml = "<page><title>T</title><text>one &lt;two&gt; <![CDATA[three]]> four</text></page>";
        let records: Vec<_> = read_all(xml).into_iter().map(Result::unwrap).collect();
        assert_eq!(records[0].text, "one <two> three four");
    }

    #[test]
    fn empty_text_element() {
        let xml = "<page><title>Blank</title><revision><text /></revision></page>";
        let records: Vec<_> = read_all(xml).into_iter().map(Result::unwrap).collect();
        assert_eq!(records[0].title, "Blank");
        assert_eq!(records[0].text, "");
    }

    #[test]
    fn counts_pages() {
        let xml = "<mediawiki><page><title>A</title></page><page><title>B</title></page></mediawiki>";
        let mut reader = WikiReader::new(xml.as_bytes());
        assert_eq!(reader.by_ref().count(), 2);
        assert_eq!(reader.pages_completed(), 2);
    }

    #[test]
    fn title_outside_page_is_fatal() {
        let results = read_all("<mediawiki><title>Stray</title></mediawiki>");
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(CorpusError::UnexpectedElement {
                closing: false,
                state: DocState::Outside,
                ..
            })
        ));
    }

    #[test]
    fn nested_page_is_fatal() {
        let results = read_all("<page><title>A</title><page></page></page>");
        assert!(matches!(
            results.last(),
            Some(Err(CorpusError::UnexpectedElement {
                state: DocState::InPage,
                ..
            }))
        ));
    }

    #[test]
    fn truncated_page_is_fatal() {
        let results = read_all("<mediawiki><page><title>A</title><text>abc");
        assert!(matches!(results.last(), Some(Err(_))));
    }

    #[test]
    fn state_machine_direct() {
        let mut parser = DocumentParser::new();
        parser.on_element_start(b"page").unwrap();
        parser.on_element_start(b"title").unwrap();
        parser.on_text("Ti");
        parser.on_text("tle");
        parser.on_element_end(b"title").unwrap();
        parser.on_text("ignored between elements");
        parser.on_element_start(b"text").unwrap();
        parser.on_text("body");
        parser.on_element_end(b"text").unwrap();
        let record = parser.on_element_end(b"page").unwrap().unwrap();
        assert_eq!(record.title, "Title");
        assert_eq!(record.text, "body");
        assert_eq!(parser.state(), DocState::Outside);
        assert!(parser.on_element_end(b"title").is_err());
    }
}
