//! Thin helpers over the `quick-xml` streaming writer.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use thiserror::Error;

/// Failure while serializing a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("xml serialization failed: {0}")]
pub struct XmlError(String);

impl XmlError {
    fn from_display(err: impl std::fmt::Display) -> Self {
        Self(err.to_string())
    }
}

/// Indented UTF-8 document writer.
pub(crate) struct XmlWriter {
    inner: Writer<Vec<u8>>,
}

impl XmlWriter {
    pub(crate) fn new() -> Self {
        Self {
            inner: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    pub(crate) fn declaration(&mut self) -> Result<(), XmlError> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    pub(crate) fn start(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), XmlError> {
        let mut element = BytesStart::new(name);
        for attribute in attributes {
            element.push_attribute(*attribute);
        }
        self.write(Event::Start(element))
    }

    pub(crate) fn end(&mut self, name: &str) -> Result<(), XmlError> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// Write `<name attrs...>text</name>`. Text is escaped.
    pub(crate) fn leaf_with(
        &mut self,
        name: &str,
        attributes: &[(&str, &str)],
        text: &str,
    ) -> Result<(), XmlError> {
        self.start(name, attributes)?;
        self.write(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    pub(crate) fn leaf(&mut self, name: &str, text: &str) -> Result<(), XmlError> {
        self.leaf_with(name, &[], text)
    }

    pub(crate) fn finish(self) -> Result<String, XmlError> {
        let mut bytes = self.inner.into_inner();
        bytes.push(b'\n');
        String::from_utf8(bytes).map_err(XmlError::from_display)
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), XmlError> {
        self.inner.write_event(event).map_err(XmlError::from_display)
    }
}
