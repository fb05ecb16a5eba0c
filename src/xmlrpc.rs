//! Minimal XML-RPC codec.
//!
//! Builds `<methodCall>` bodies and parses `<methodResponse>` documents into
//! [`Value`] trees. Faults are returned as [`TrackerError::Fault`]. Only the
//! subset of XML-RPC used by the Trac RPC plugin is supported, which is all
//! of the standard scalar types plus arrays and structs.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::TrackerError;

/// A decoded XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    String(String),
    DateTime(String),
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    Nil,
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Render a scalar as text. Numbers and booleans are formatted, `nil`
    /// and containers become the empty string.
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) | Value::DateTime(s) | Value::Base64(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Value::Array(_) | Value::Struct(_) | Value::Nil => String::new(),
        }
    }

    /// Interpret the value as a Unix timestamp in seconds.
    ///
    /// Accepts `dateTime.iso8601` in the compact (`20240131T08:15:00`) and
    /// dashed forms, and plain integers.
    pub fn to_timestamp(&self) -> Option<i64> {
        match self {
            Value::DateTime(s) => parse_datetime(s),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

fn parse_datetime(s: &str) -> Option<i64> {
    let s = s.trim().trim_end_matches('Z');
    ["%Y%m%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y%m%dT%H%M%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| dt.and_utc().timestamp())
}

/// Encode a `<methodCall>` document.
pub fn method_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => out.push_str(&format!("<int>{}</int>", i)),
        Value::Bool(b) => out.push_str(&format!("<boolean>{}</boolean>", u8::from(*b))),
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::String(s) => out.push_str(&format!("<string>{}</string>", escape(s))),
        Value::DateTime(s) => out.push_str(&format!(
            "<dateTime.iso8601>{}</dateTime.iso8601>",
            escape(s)
        )),
        Value::Base64(s) => out.push_str(&format!("<base64>{}</base64>", escape(s))),
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name));
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

/// Parse a `<methodResponse>` document.
pub fn parse_response(xml: &str) -> Result<Value, TrackerError> {
    let mut parser = Parser::new(xml);
    parser.expect_start("methodResponse")?;
    match parser.next_tag()? {
        Tag::Start(name) if name == "params" => {
            parser.expect_start("param")?;
            parser.expect_start("value")?;
            parser.parse_value()
        }
        Tag::Start(name) if name == "fault" => {
            parser.expect_start("value")?;
            let fault = parser.parse_value()?;
            let members = fault
                .as_struct()
                .ok_or_else(|| decode_err("fault is not a struct"))?;
            let code = members.get("faultCode").and_then(Value::as_i64).unwrap_or(0);
            let message = members
                .get("faultString")
                .map(Value::to_text)
                .unwrap_or_default();
            Err(TrackerError::Fault { code, message })
        }
        other => Err(decode_err(format!("unexpected element {:?}", other))),
    }
}

fn decode_err(msg: impl Into<String>) -> TrackerError {
    TrackerError::Decode(msg.into())
}

#[derive(Debug)]
enum Tag {
    Start(String),
    Empty(String),
    End(String),
    Eof,
}

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Parser<'a> {
    fn new(xml: &'a str) -> Self {
        Self {
            reader: Reader::from_str(xml),
        }
    }

    fn read(&mut self) -> Result<Event<'a>, TrackerError> {
        self.reader
            .read_event()
            .map_err(|e| decode_err(format!("malformed XML: {}", e)))
    }

    /// Next structural tag, skipping declarations, comments and whitespace.
    fn next_tag(&mut self) -> Result<Tag, TrackerError> {
        loop {
            match self.read()? {
                Event::Start(e) => return Ok(Tag::Start(local_name(e.local_name().as_ref()))),
                Event::Empty(e) => return Ok(Tag::Empty(local_name(e.local_name().as_ref()))),
                Event::End(e) => return Ok(Tag::End(local_name(e.local_name().as_ref()))),
                Event::Eof => return Ok(Tag::Eof),
                Event::Text(t) => {
                    if !t.iter().all(|b| b.is_ascii_whitespace()) {
                        return Err(decode_err("unexpected text between elements"));
                    }
                }
                _ => {}
            }
        }
    }

    fn expect_start(&mut self, expected: &str) -> Result<(), TrackerError> {
        match self.next_tag()? {
            Tag::Start(name) if name == expected => Ok(()),
            other => Err(decode_err(format!(
                "expected <{}>, found {:?}",
                expected, other
            ))),
        }
    }

    fn expect_end(&mut self, expected: &str) -> Result<(), TrackerError> {
        match self.next_tag()? {
            Tag::End(name) if name == expected => Ok(()),
            other => Err(decode_err(format!(
                "expected </{}>, found {:?}",
                expected, other
            ))),
        }
    }

    /// Collect character data up to the closing tag `name`.
    fn read_text(&mut self, name: &str) -> Result<String, TrackerError> {
        let mut text = String::new();
        loop {
            match self.read()? {
                Event::Text(t) => {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| decode_err(format!("bad entity: {}", e)))?;
                    text.push_str(&unescaped);
                }
                Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
                Event::End(e) if local_name(e.local_name().as_ref()) == name => return Ok(text),
                Event::Eof => return Err(decode_err(format!("unterminated <{}>", name))),
                Event::Comment(_) => {}
                other => {
                    return Err(decode_err(format!(
                        "unexpected {:?} inside <{}>",
                        other, name
                    )))
                }
            }
        }
    }

    /// Parse the contents of a `<value>` whose start tag was consumed.
    fn parse_value(&mut self) -> Result<Value, TrackerError> {
        let mut bare = String::new();
        loop {
            match self.read()? {
                Event::Text(t) => {
                    let unescaped = t
                        .unescape()
                        .map_err(|e| decode_err(format!("bad entity: {}", e)))?;
                    bare.push_str(&unescaped);
                }
                Event::CData(c) => bare.push_str(&String::from_utf8_lossy(&c)),
                Event::Start(e) => {
                    let name = local_name(e.local_name().as_ref());
                    let value = self.parse_typed(&name)?;
                    self.expect_end("value")?;
                    return Ok(value);
                }
                Event::Empty(e) => {
                    let name = local_name(e.local_name().as_ref());
                    let value = empty_typed(&name)?;
                    self.expect_end("value")?;
                    return Ok(value);
                }
                // Untyped values are strings
                Event::End(_) => return Ok(Value::String(bare)),
                Event::Eof => return Err(decode_err("unterminated <value>")),
                _ => {}
            }
        }
    }

    fn parse_typed(&mut self, name: &str) -> Result<Value, TrackerError> {
        match name {
            "string" => Ok(Value::String(self.read_text(name)?)),
            "int" | "i4" | "i8" => {
                let text = self.read_text(name)?;
                text.trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| decode_err(format!("bad integer '{}'", text)))
            }
            "boolean" => Ok(Value::Bool(self.read_text(name)?.trim() == "1")),
            "double" => {
                let text = self.read_text(name)?;
                text.trim()
                    .parse()
                    .map(Value::Double)
                    .map_err(|_| decode_err(format!("bad double '{}'", text)))
            }
            "dateTime.iso8601" => Ok(Value::DateTime(self.read_text(name)?)),
            "base64" => Ok(Value::Base64(self.read_text(name)?)),
            "nil" => {
                self.read_text(name)?;
                Ok(Value::Nil)
            }
            "array" => self.parse_array(),
            "struct" => self.parse_struct(),
            other => Err(decode_err(format!("unknown value type <{}>", other))),
        }
    }

    fn parse_array(&mut self) -> Result<Value, TrackerError> {
        let mut items = Vec::new();
        match self.next_tag()? {
            Tag::Start(name) if name == "data" => loop {
                match self.next_tag()? {
                    Tag::Start(name) if name == "value" => items.push(self.parse_value()?),
                    Tag::Empty(name) if name == "value" => items.push(Value::String(String::new())),
                    Tag::End(name) if name == "data" => break,
                    other => return Err(decode_err(format!("unexpected {:?} in array", other))),
                }
            },
            Tag::Empty(name) if name == "data" => {}
            other => return Err(decode_err(format!("expected <data>, found {:?}", other))),
        }
        self.expect_end("array")?;
        Ok(Value::Array(items))
    }

    fn parse_struct(&mut self) -> Result<Value, TrackerError> {
        let mut members = BTreeMap::new();
        loop {
            match self.next_tag()? {
                Tag::Start(name) if name == "member" => {
                    self.expect_start("name")?;
                    let key = self.read_text("name")?;
                    let value = match self.next_tag()? {
                        Tag::Start(name) if name == "value" => self.parse_value()?,
                        Tag::Empty(name) if name == "value" => Value::String(String::new()),
                        other => {
                            return Err(decode_err(format!(
                                "expected member value, found {:?}",
                                other
                            )))
                        }
                    };
                    self.expect_end("member")?;
                    members.insert(key, value);
                }
                Tag::End(name) if name == "struct" => return Ok(Value::Struct(members)),
                other => return Err(decode_err(format!("unexpected {:?} in struct", other))),
            }
        }
    }
}

fn empty_typed(name: &str) -> Result<Value, TrackerError> {
    match name {
        "string" => Ok(Value::String(String::new())),
        "nil" => Ok(Value::Nil),
        "array" => Ok(Value::Array(Vec::new())),
        "struct" => Ok(Value::Struct(BTreeMap::new())),
        "base64" => Ok(Value::Base64(String::new())),
        other => Err(decode_err(format!("empty <{}/> is not a value", other))),
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_string_params() {
        let body = method_call("ticket.get", &[Value::String("4<2".to_string())]);
        assert!(body.contains("<methodName>ticket.get</methodName>"));
        assert!(body.contains("<value><string>4&lt;2</string></value>"));
    }

    #[test]
    fn parses_nested_response() {
        let xml = r#"<?xml version='1.0'?>
<methodResponse>
  <params>
    <param>
      <value><array><data>
        <value><int>42</int></value>
        <value><dateTime.iso8601>20240131T08:15:00</dateTime.iso8601></value>
        <value><struct>
          <member><name>summary</name><value><string>Fix &amp; test</string></value></member>
          <member><name>keywords</name><value>has-patch</value></member>
          <member><name>cc</name><value><string/></value></member>
        </struct></value>
      </data></array></value>
    </param>
  </params>
</methodResponse>"#;
        let value = parse_response(xml).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items[0], Value::Int(42));
        assert_eq!(items[1].to_timestamp(), Some(1_706_688_900));
        let attrs = items[2].as_struct().unwrap();
        assert_eq!(attrs["summary"].as_str(), Some("Fix & test"));
        assert_eq!(attrs["keywords"].as_str(), Some("has-patch"));
        assert_eq!(attrs["cc"].as_str(), Some(""));
    }

    #[test]
    fn keeps_whitespace_inside_strings() {
        let xml = "<methodResponse><params><param><value><string>  two  </string></value></param></params></methodResponse>";
        assert_eq!(
            parse_response(xml).unwrap(),
            Value::String("  two  ".to_string())
        );
    }

    #[test]
    fn fault_becomes_error() {
        let xml = r#"<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>404</int></value></member>
<member><name>faultString</name><value><string>Ticket 99999999 does not exist.</string></value></member>
</struct></value></fault></methodResponse>"#;
        match parse_response(xml) {
            Err(TrackerError::Fault { code, message }) => {
                assert_eq!(code, 404);
                assert!(message.contains("does not exist"));
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn malformed_xml_is_decode_error() {
        let result = parse_response("<methodResponse><params>");
        assert!(matches!(result, Err(TrackerError::Decode(_))));
    }
}
