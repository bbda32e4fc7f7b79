//! Properties XML document codec
//!
//! Configurations are persisted as a properties document:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8" standalone="no"?>
//! <!DOCTYPE properties SYSTEM "http://java.sun.com/dtd/properties.dtd">
//! <properties>
//! <entry key="ConfigurationID">cfg-1</entry>
//! </properties>
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>"#;
const PROPERTIES_DOCTYPE: &str =
    r#"<!DOCTYPE properties SYSTEM "http://java.sun.com/dtd/properties.dtd">"#;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename = "properties")]
struct PropertiesDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Entry {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "$text", default)]
    value: String,
}

/// Error raised while reading or writing a properties document
#[derive(Debug, thiserror::Error)]
#[error("properties document: {0}")]
pub struct PropertiesError(String);

/// Parse a properties document into an ordered key/value map
///
/// Later entries win when a key is repeated.
pub fn parse(xml: &str) -> Result<BTreeMap<String, String>, PropertiesError> {
    let document: PropertiesDocument =
        quick_xml::de::from_str(xml).map_err(|e| PropertiesError(e.to_string()))?;

    Ok(document
        .entries
        .into_iter()
        .map(|entry| (entry.key, entry.value))
        .collect())
}

/// Render a key/value map as a properties document
pub fn render(properties: &BTreeMap<String, String>) -> Result<String, PropertiesError> {
    let document = PropertiesDocument {
        comment: None,
        entries: properties
            .iter()
            .map(|(key, value)| Entry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
    };

    let body = quick_xml::se::to_string(&document).map_err(|e| PropertiesError(e.to_string()))?;

    Ok(format!("{XML_DECLARATION}\n{PROPERTIES_DOCTYPE}\n{body}\n"))
}
