//! ISO 20022 message documents: outbound pacs.008 instructions and inbound
//! camt.053 statements.

pub mod camt053;
pub mod pacs008;
mod xml;

pub use xml::XmlError;
