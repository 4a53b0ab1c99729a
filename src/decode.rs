//! Request body decoders.
//!
//! Each supported MIME group decodes into a JSON object so rules and
//! templates see one structure regardless of the wire format.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::{MockError, Result};

/// Supported request body formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Xml,
    Form,
}

const JSON_MIME_TYPES: &[&str] = &["application/json"];
const XML_MIME_TYPES: &[&str] = &["application/xml", "application/soap+xml", "text/xml"];
const FORM_MIME_TYPES: &[&str] = &["application/x-www-form-urlencoded"];

/// Deepest XML element nesting accepted, matching serde_json's recursion
/// limit for JSON bodies.
pub const MAX_XML_DEPTH: usize = 128;

impl BodyFormat {
    /// Classify a Content-Type header value by its MIME essence.
    pub fn classify(content_type: &str) -> Option<Self> {
        let essence = mime_essence(content_type);
        if JSON_MIME_TYPES.contains(&essence.as_str()) {
            Some(BodyFormat::Json)
        } else if XML_MIME_TYPES.contains(&essence.as_str()) {
            Some(BodyFormat::Xml)
        } else if FORM_MIME_TYPES.contains(&essence.as_str()) {
            Some(BodyFormat::Form)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BodyFormat::Json => "json",
            BodyFormat::Xml => "xml",
            BodyFormat::Form => "form",
        }
    }

    /// Decode `raw` into a key/value map.
    pub fn decode(&self, raw: &str) -> Result<Map<String, Value>> {
        match self {
            BodyFormat::Json => parse_json(raw),
            BodyFormat::Xml => parse_xml(raw),
            BodyFormat::Form => Ok(parse_form(raw)),
        }
    }
}

/// `type/subtype` without parameters, lowercased.
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decode a JSON object.
pub fn parse_json(raw: &str) -> Result<Map<String, Value>> {
    serde_json::from_str(raw).map_err(|e| MockError::BodyDecode {
        format: "json",
        message: e.to_string(),
    })
}

/// Decode an url-encoded form. Repeated keys keep the last value.
pub fn parse_form(raw: &str) -> Map<String, Value> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect()
}

struct Element {
    name: String,
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| xml_error(e.to_string()))?;
            let key = format!("-{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value().map_err(|e| xml_error(e.to_string()))?;
            attributes.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name,
            attributes,
            children: Map::new(),
            text: String::new(),
        })
    }

    fn into_value(self) -> (String, Value) {
        if self.attributes.is_empty() && self.children.is_empty() {
            return (self.name, Value::String(self.text));
        }
        let mut map = self.attributes;
        for (k, v) in self.children {
            map.insert(k, v);
        }
        if !self.text.is_empty() {
            map.insert("#text".to_string(), Value::String(self.text));
        }
        (self.name, Value::Object(map))
    }
}

/// Insert a child, turning repeated names into an array.
fn insert_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

/// Decode an XML document into a nested map.
///
/// Attributes appear as `-name`, mixed text as `#text`, and repeated
/// sibling elements become arrays.
pub fn parse_xml(raw: &str) -> Result<Map<String, Value>> {
    let mut reader = Reader::from_str(raw.trim());
    reader.trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = Map::new();

    loop {
        let event = reader.read_event().map_err(|e| xml_error(e.to_string()))?;
        match event {
            Event::Start(start) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(xml_error(format!(
                        "nesting deeper than {} elements",
                        MAX_XML_DEPTH
                    )));
                }
                stack.push(Element::open(&start)?);
            }
            Event::Empty(start) => {
                let (name, value) = Element::open(&start)?.into_value();
                close_into(&mut stack, &mut root, name, value)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| xml_error(e.to_string()))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| xml_error("unexpected closing tag".to_string()))?;
                let (name, value) = element.into_value();
                close_into(&mut stack, &mut root, name, value)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(xml_error("unexpected end of document".to_string()));
    }
    if root.is_empty() {
        return Err(xml_error("missing root element".to_string()));
    }
    Ok(root)
}

fn close_into(
    stack: &mut [Element],
    root: &mut Map<String, Value>,
    name: String,
    value: Value,
) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => insert_child(&mut parent.children, name, value),
        None => {
            if !root.is_empty() {
                return Err(xml_error("multiple root elements".to_string()));
            }
            root.insert(name, value);
        }
    }
    Ok(())
}

fn xml_error(message: String) -> MockError {
    MockError::BodyDecode {
        format: "xml",
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BOOKSTORE: &str = r#"
        <?xml version="1.0" encoding="UTF-8"?>
        <bookstore>
            <book category="cooking">
                <title lang="en">Everyday Italian</title>
                <author>Giada De Laurentiis</author>
                <year>2005</year>
                <price>30.00</price>
            </book>
            <book category="children">
                <title lang="en">Harry Potter</title>
                <author>J.K. Rowling</author>
                <year>2005</year>
                <price>29.99</price>
            </book>
        </bookstore>
    "#;

    #[test]
    fn test_classify_content_type() {
        assert_eq!(BodyFormat::classify("application/json"), Some(BodyFormat::Json));
        assert_eq!(
            BodyFormat::classify("Application/JSON; charset=utf-8"),
            Some(BodyFormat::Json)
        );
        assert_eq!(BodyFormat::classify("text/xml"), Some(BodyFormat::Xml));
        assert_eq!(BodyFormat::classify("application/soap+xml"), Some(BodyFormat::Xml));
        assert_eq!(
            BodyFormat::classify("application/x-www-form-urlencoded"),
            Some(BodyFormat::Form)
        );
        assert_eq!(BodyFormat::classify("text/plain"), None);
        assert_eq!(BodyFormat::classify(""), None);
    }

    #[test]
    fn test_parse_json() {
        let body = parse_json(r#"{"name": "John Doe", "age": 30, "tags": ["a"]}"#).unwrap();
        assert_eq!(body["name"], "John Doe");
        assert_eq!(body["age"], 30);
        assert_eq!(body["tags"], json!(["a"]));

        assert!(parse_json(r#"{"name": "John""#).is_err());
        assert!(parse_json("[1, 2]").is_err());
    }

    #[test]
    fn test_parse_form_last_value_wins() {
        let body = parse_form("name=John+Doe&role=admin&role=owner&empty=");
        assert_eq!(body["name"], "John Doe");
        assert_eq!(body["role"], "owner");
        assert_eq!(body["empty"], "");
    }

    #[test]
    fn test_parse_xml() {
        let body = parse_xml(BOOKSTORE).unwrap();
        let expected = json!({
            "bookstore": {
                "book": [
                    {
                        "-category": "cooking",
                        "author": "Giada De Laurentiis",
                        "price": "30.00",
                        "title": {"#text": "Everyday Italian", "-lang": "en"},
                        "year": "2005"
                    },
                    {
                        "-category": "children",
                        "author": "J.K. Rowling",
                        "price": "29.99",
                        "title": {"#text": "Harry Potter", "-lang": "en"},
                        "year": "2005"
                    }
                ]
            }
        });
        assert_eq!(Value::Object(body), expected);
    }

    #[test]
    fn test_parse_xml_empty_and_escaped() {
        let body = parse_xml(r#"<req><flag/><q>a &amp; b</q></req>"#).unwrap();
        assert_eq!(Value::Object(body), json!({"req": {"flag": "", "q": "a & b"}}));
    }

    #[test]
    fn test_parse_xml_depth_limit() {
        let nested = |depth: usize| {
            format!("{}x{}", "<a>".repeat(depth), "</a>".repeat(depth))
        };

        assert!(parse_xml(&nested(MAX_XML_DEPTH)).is_ok());

        let err = parse_xml(&nested(20_000)).unwrap_err();
        assert!(matches!(err, MockError::BodyDecode { format: "xml", .. }));
    }

    #[test]
    fn test_parse_invalid_xml() {
        let truncated = r#"
            <bookstore>
                <book category="cooking">
                    <title lang="en">Everyday Italian</title>
                </book>
                <book category="children">
            </bookstore>
        "#;
        assert!(parse_xml(truncated).is_err());
        assert!(parse_xml("<a></a><b></b>").is_err());
        assert!(parse_xml("").is_err());
    }
}
