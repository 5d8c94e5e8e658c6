use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

/// Header written at the top of every entity file the server creates.
pub const DEFAULT_HEADER: &str =
    "# yaml-language-server: $schema=./SCHEMA/work-flow-schema.json\n\n";

/// A YAML document split into its preserved header and its parsed content.
///
/// The header is the leading run of comment (`#`), directive (`%`) and blank
/// lines. It carries no data but editors rely on it (schema hints, notes left
/// by humans), so it is kept byte-for-byte and reattached on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub header: String,
    pub content: Value,
}

impl Document {
    /// A new document with the default schema header.
    pub fn new(content: Value) -> Self {
        Self::with_header(DEFAULT_HEADER, content)
    }

    pub fn with_header(header: impl Into<String>, content: Value) -> Self {
        Self {
            header: header.into(),
            content,
        }
    }

    /// Build a document from any serializable value, with the default header.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, serde_yaml::Error> {
        Ok(Self::new(serde_yaml::to_value(value)?))
    }

    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        let (header, body) = split_header(text);
        let content = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(body)?
        };
        Ok(Self::with_header(header, content))
    }

    /// Serialize the document, header first.
    pub fn render(&self) -> Result<String, serde_yaml::Error> {
        let mut out = self.header.clone();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        if !self.content.is_null() {
            out.push_str(&serde_yaml::to_string(&self.content)?);
        }
        Ok(out)
    }

    /// Deserialize the content into a typed structure. An empty document
    /// decodes as an empty mapping so structs with defaulted fields load.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_yaml::Error> {
        match &self.content {
            Value::Null => serde_yaml::from_value(Value::Mapping(Mapping::new())),
            content => serde_yaml::from_value(content.clone()),
        }
    }

    /// Replace the content with a typed structure, keeping the header.
    pub fn encode<T: Serialize>(&mut self, value: &T) -> Result<(), serde_yaml::Error> {
        self.content = serde_yaml::to_value(value)?;
        Ok(())
    }
}

fn split_header(text: &str) -> (&str, &str) {
    let mut end = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('%') {
            end += line.len();
        } else {
            break;
        }
    }
    text.split_at(end)
}
