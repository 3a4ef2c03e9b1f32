// 🏗️ Feed Parser - XML propertyList documents into raw records
//
// The raw record keeps the feed's wrapper shape: every element path maps to
// the sequence of text values found at that path, in document order.
// Collapsing the wrappers is the normalizer's job, not the parser's.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fmt;

/// Document root expected of every feed file.
const ROOT_ELEMENT: &[u8] = b"propertyList";

/// The record element. The feed also carries rental and land lists; this
/// system only tracks residential listings.
const RECORD_ELEMENT: &[u8] = b"residential";

// ============================================================================
// RAW RECORD
// ============================================================================

/// One record exactly as the feed wrapped it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// XML attributes of the record element (`status`, `modTime`, ...).
    pub attrs: BTreeMap<String, String>,

    /// Dotted element path below the record element (`uniqueID`,
    /// `listingAgent.name`, ...) to the text values found at that path, in
    /// document order. An empty leaf element contributes an empty string, so
    /// `<uniqueID/>` survives to normalization where the empty id is
    /// rejected as a validation error rather than a parse error.
    pub fields: BTreeMap<String, Vec<String>>,
}

impl RawRecord {
    pub fn new() -> Self {
        RawRecord::default()
    }
}

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Failure of a whole feed document. One malformed document never aborts
/// the run; the host skips it and leaves it in the feed directory.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the document.
    pub position: u64,
}

impl ParseError {
    fn new(message: impl Into<String>, position: u64) -> Self {
        ParseError {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "feed document malformed at byte {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

// ============================================================================
// FEED PARSING
// ============================================================================

struct Frame {
    name: String,
    text: String,
    has_children: bool,
}

/// Parse one feed document into its raw records, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<RawRecord>, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records: Vec<RawRecord> = Vec::new();
    let mut record: Option<RawRecord> = None;
    let mut stack: Vec<Frame> = Vec::new();
    let mut saw_root = false;

    let mut buf = Vec::new();
    loop {
        let position = reader.buffer_position() as u64;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name();
                if record.is_some() {
                    if let Some(parent) = stack.last_mut() {
                        parent.has_children = true;
                    }
                    stack.push(Frame {
                        name: String::from_utf8_lossy(name.as_ref()).to_string(),
                        text: String::new(),
                        has_children: false,
                    });
                } else if !saw_root {
                    if name.as_ref() != ROOT_ELEMENT {
                        return Err(ParseError::new(
                            format!(
                                "expected <propertyList> root, found <{}>",
                                String::from_utf8_lossy(name.as_ref())
                            ),
                            position,
                        ));
                    }
                    saw_root = true;
                } else if name.as_ref() == RECORD_ELEMENT {
                    record = Some(record_with_attrs(e, position)?);
                } else {
                    // Not a residential listing; skip the whole subtree.
                    let end = e.to_end().into_owned();
                    let mut skip_buf = Vec::new();
                    reader
                        .read_to_end_into(end.name(), &mut skip_buf)
                        .map_err(|err| ParseError::new(err.to_string(), position))?;
                }
            }

            Ok(Event::Empty(ref e)) => {
                let name = e.name();
                if let Some(rec) = record.as_mut() {
                    if let Some(parent) = stack.last_mut() {
                        parent.has_children = true;
                    }
                    let mut parts: Vec<&str> = stack.iter().map(|f| f.name.as_str()).collect();
                    let leaf = String::from_utf8_lossy(name.as_ref()).to_string();
                    parts.push(&leaf);
                    rec.fields.entry(parts.join(".")).or_default().push(String::new());
                } else if !saw_root && name.as_ref() == ROOT_ELEMENT {
                    saw_root = true;
                } else if saw_root && name.as_ref() == RECORD_ELEMENT {
                    records.push(record_with_attrs(e, position)?);
                }
            }

            Ok(Event::Text(ref e)) => {
                if record.is_some() {
                    if let Some(frame) = stack.last_mut() {
                        let decoded = e
                            .decode()
                            .map_err(|err| ParseError::new(err.to_string(), position))?;
                        let text = quick_xml::escape::unescape(&decoded)
                            .map_err(|err| ParseError::new(err.to_string(), position))?;
                        frame.text.push_str(&text);
                    }
                }
            }

            Ok(Event::GeneralRef(ref e)) => {
                if record.is_some() {
                    if let Some(frame) = stack.last_mut() {
                        let name = e
                            .decode()
                            .map_err(|err| ParseError::new(err.to_string(), position))?;
                        let raw = format!("&{};", name);
                        let text = quick_xml::escape::unescape(&raw)
                            .map_err(|err| ParseError::new(err.to_string(), position))?;
                        frame.text.push_str(&text);
                    }
                }
            }

            Ok(Event::CData(ref e)) => {
                if record.is_some() {
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&String::from_utf8_lossy(e));
                    }
                }
            }

            Ok(Event::End(_)) => {
                if record.is_some() {
                    match stack.pop() {
                        Some(frame) => {
                            if !frame.has_children {
                                let mut parts: Vec<&str> =
                                    stack.iter().map(|f| f.name.as_str()).collect();
                                parts.push(&frame.name);
                                let path = parts.join(".");
                                if let Some(rec) = record.as_mut() {
                                    rec.fields.entry(path).or_default().push(frame.text);
                                }
                            }
                        }
                        None => {
                            // Closing the record element itself.
                            if let Some(done) = record.take() {
                                records.push(done);
                            }
                        }
                    }
                }
            }

            Ok(Event::Eof) => break,

            Ok(_) => {}

            Err(err) => return Err(ParseError::new(err.to_string(), position)),
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ParseError::new("document has no <propertyList> root", 0));
    }

    Ok(records)
}

fn record_with_attrs(
    e: &quick_xml::events::BytesStart<'_>,
    position: u64,
) -> Result<RawRecord, ParseError> {
    let mut record = RawRecord::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ParseError::new(err.to_string(), position))?;
        record.attrs.insert(
            String::from_utf8_lossy(attr.key.as_ref()).to_string(),
            String::from_utf8_lossy(&attr.value).to_string(),
        );
    }
    Ok(record)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<propertyList>
  <residential status="current" modTime="2017-06-05-12:30:00">
    <uniqueID>AB123</uniqueID>
    <listingAgent id="1">
      <name>Therese Plath</name>
      <telephone>0400 000 000</telephone>
    </listingAgent>
    <price>450000</price>
    <description><![CDATA[Leafy & quiet street]]></description>
    <features>
      <feature>pool</feature>
      <feature>garage</feature>
    </features>
  </residential>
  <rental status="current" modTime="2017-06-05-12:31:00">
    <uniqueID>RENT1</uniqueID>
  </rental>
  <residential status="sold" modTime="2017-06-06-09:00:00">
    <uniqueID>AB124</uniqueID>
    <soldDetails>
      <price>430000</price>
    </soldDetails>
  </residential>
</propertyList>
"#;

    #[test]
    fn test_parses_residential_records_in_document_order() {
        let records = parse_feed(SAMPLE).unwrap();
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].attrs.get("status").unwrap(), "current");
        assert_eq!(records[0].attrs.get("modTime").unwrap(), "2017-06-05-12:30:00");
        assert_eq!(records[1].attrs.get("status").unwrap(), "sold");
    }

    #[test]
    fn test_fields_keep_their_wrappers() {
        let records = parse_feed(SAMPLE).unwrap();

        assert_eq!(records[0].fields.get("uniqueID").unwrap(), &vec!["AB123".to_string()]);
        assert_eq!(
            records[0].fields.get("listingAgent.name").unwrap(),
            &vec!["Therese Plath".to_string()]
        );
        assert_eq!(
            records[1].fields.get("soldDetails.price").unwrap(),
            &vec!["430000".to_string()]
        );
    }

    #[test]
    fn test_repeated_elements_accumulate() {
        let records = parse_feed(SAMPLE).unwrap();
        assert_eq!(
            records[0].fields.get("features.feature").unwrap(),
            &vec!["pool".to_string(), "garage".to_string()]
        );
    }

    #[test]
    fn test_cdata_is_text() {
        let records = parse_feed(SAMPLE).unwrap();
        assert_eq!(
            records[0].fields.get("description").unwrap(),
            &vec!["Leafy & quiet street".to_string()]
        );
    }

    #[test]
    fn test_container_elements_are_not_fields() {
        let records = parse_feed(SAMPLE).unwrap();
        assert!(!records[0].fields.contains_key("listingAgent"));
        assert!(!records[0].fields.contains_key("features"));
    }

    #[test]
    fn test_non_residential_records_are_skipped() {
        let records = parse_feed(SAMPLE).unwrap();
        assert!(records.iter().all(|r| !r
            .fields
            .get("uniqueID")
            .map(|ids| ids.contains(&"RENT1".to_string()))
            .unwrap_or(false)));
    }

    #[test]
    fn test_empty_leaf_survives_as_empty_string() {
        let xml = r#"<propertyList>
  <residential status="current" modTime="2017-06-05-12:30:00">
    <uniqueID></uniqueID>
    <other/>
  </residential>
</propertyList>"#;

        let records = parse_feed(xml).unwrap();
        assert_eq!(records[0].fields.get("uniqueID").unwrap(), &vec![String::new()]);
        assert_eq!(records[0].fields.get("other").unwrap(), &vec![String::new()]);
    }

    #[test]
    fn test_empty_property_list() {
        assert_eq!(parse_feed("<propertyList/>").unwrap().len(), 0);
        assert_eq!(parse_feed("<propertyList></propertyList>").unwrap().len(), 0);
    }

    #[test]
    fn test_wrong_root_is_an_error() {
        let err = parse_feed("<somethingElse/>").unwrap_err();
        assert!(err.message.contains("propertyList"));
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let xml = "<propertyList><residential status=\"current\"><uniqueID>X</residential>";
        assert!(parse_feed(xml).is_err());
    }

    #[test]
    fn test_entities_are_unescaped() {
        let xml = r#"<propertyList>
  <residential status="current" modTime="2017-06-05-12:30:00">
    <uniqueID>AB&amp;1</uniqueID>
  </residential>
</propertyList>"#;

        let records = parse_feed(xml).unwrap();
        assert_eq!(records[0].fields.get("uniqueID").unwrap(), &vec!["AB&1".to_string()]);
    }
}
