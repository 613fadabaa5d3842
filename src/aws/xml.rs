//! XML Response Conversion
//!
//! AWS query, ec2 and rest-xml services answer in XML. Responses are turned
//! into `serde_json::Value` generically so result selectors and metadata
//! stripping work the same for every protocol:
//!
//! - `member` / `item` children become array elements
//! - a plural wrapper of uniformly named children (`Buckets/Bucket`,
//!   `Items/*`) becomes an array
//! - repeated siblings become arrays
//! - `true`/`false` and numeric leaves become booleans and numbers, unless
//!   the element names an identifier or free-form text
//! - empty list-named elements (`*Set`, `*List`, plurals) become `[]`,
//!   other empty elements `null`

use anyhow::{bail, Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

struct Frame {
    name: String,
    children: Vec<(String, Value)>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Vec::new(),
            text: String::new(),
        }
    }

    fn into_value(self) -> (String, Value) {
        let value = if self.children.is_empty() {
            if !self.text.is_empty() {
                scalar(&self.name, self.text)
            } else if is_list_name(&self.name) {
                Value::Array(Vec::new())
            } else {
                Value::Null
            }
        } else if is_list_wrapper(&self.name, &self.children) {
            Value::Array(self.children.into_iter().map(|(_, v)| v).collect())
        } else {
            group_children(self.children)
        };
        (self.name, value)
    }
}

/// Element names whose text is opaque even when it looks numeric
const OPAQUE_SUFFIXES: &[&str] = &[
    "Id", "ID", "Ids", "Arn", "Account", "Owner", "Name", "Value", "Key", "Token", "Marker",
    "Version", "Number", "Description",
];

fn is_opaque(name: &str) -> bool {
    if name == "member" || name == "item" {
        return true;
    }
    let name = capitalize(name);
    OPAQUE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Typed value of a text leaf
fn scalar(name: &str, text: String) -> Value {
    if is_opaque(name) {
        return Value::String(text);
    }
    match text.as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    // leading zeros and long digit runs are identifiers, not quantities
    let digits = text.trim_start_matches('-');
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    if leading_zero || digits.len() > 15 {
        return Value::String(text);
    }
    if let Ok(n) = text.parse::<i64>() {
        return Value::from(n);
    }
    if digits.chars().all(|c| c.is_ascii_digit() || c == '.') && digits.contains('.') {
        if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(text)
}

/// Empty elements named like a collection stand for an empty list
fn is_list_name(name: &str) -> bool {
    if name.ends_with("Set") || name.ends_with("List") || name == "Items" {
        return true;
    }
    name.ends_with('s')
        && !["ss", "us", "is", "as"].iter().any(|s| name.ends_with(s))
}

fn is_list_wrapper(name: &str, children: &[(String, Value)]) -> bool {
    let first = &children[0].0;
    if !children.iter().all(|(n, _)| n == first) {
        return false;
    }
    first == "member"
        || first == "item"
        || name == "Items"
        || name == format!("{}s", first)
        || name == format!("{}es", first)
        || first
            .strip_suffix('y')
            .map(|stem| name == format!("{}ies", stem))
            .unwrap_or(false)
}

fn group_children(children: Vec<(String, Value)>) -> Value {
    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for (name, value) in children {
        match grouped.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => grouped.push((name, vec![value])),
        }
    }

    let map: Map<String, Value> = grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            (name, value)
        })
        .collect();
    Value::Object(map)
}

fn local_name(raw: &[u8]) -> Result<String> {
    let name = std::str::from_utf8(raw).context("Element name is not valid UTF-8")?;
    Ok(name.rsplit(':').next().unwrap_or(name).to_string())
}

/// Convert an XML document into its root element name and JSON value
pub fn to_json(body: &str) -> Result<(String, Value)> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Value)> = None;

    loop {
        match reader.read_event().context("Malformed XML response")? {
            Event::Start(e) => {
                stack.push(Frame::new(local_name(e.name().as_ref())?));
            }
            Event::Empty(e) => {
                let element = Frame::new(local_name(e.name().as_ref())?).into_value();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(e) => {
                if let Some(frame) = stack.last_mut() {
                    let text = e.unescape().context("Invalid XML text")?;
                    frame.text.push_str(&text);
                }
            }
            Event::CData(e) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                let frame = match stack.pop() {
                    Some(frame) => frame,
                    None => bail!("Unbalanced XML end tag"),
                };
                let element = frame.into_value();
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.context("Empty XML document")
}

/// Extract `(code, message)` from an AWS XML error document.
///
/// Handles `ErrorResponse/Error`, ec2 `Response/Errors/Error` and the bare
/// `Error` root used by rest-xml services.
pub fn error_details(body: &str) -> Option<(String, String)> {
    let (name, value) = to_json(body).ok()?;
    let mut wrapped = Map::new();
    wrapped.insert(name, value);
    find_error(&Value::Object(wrapped))
}

fn find_error(value: &Value) -> Option<(String, String)> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(code)) = map.get("Code") {
                let message = map
                    .get("Message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Some((code.clone(), message));
            }
            map.values().find_map(find_error)
        }
        Value::Array(items) => items.iter().find_map(find_error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_response_members() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListUsersResponse xmlns="https://iam.amazonaws.com/doc/2010-05-08/">
  <ListUsersResult>
    <IsTruncated>false</IsTruncated>
    <Users>
      <member><UserName>alice</UserName><Path>/</Path></member>
      <member><UserName>bob</UserName><Path>/ops/</Path></member>
    </Users>
  </ListUsersResult>
  <ResponseMetadata><RequestId>req-1</RequestId></ResponseMetadata>
</ListUsersResponse>"#;

        let (root, value) = to_json(body).unwrap();
        assert_eq!(root, "ListUsersResponse");
        assert_eq!(
            value,
            json!({
                "ListUsersResult": {
                    "IsTruncated": false,
                    "Users": [
                        {"UserName": "alice", "Path": "/"},
                        {"UserName": "bob", "Path": "/ops/"}
                    ]
                },
                "ResponseMetadata": {"RequestId": "req-1"}
            })
        );
    }

    #[test]
    fn test_ec2_items_and_empty_sets() {
        let body = r#"<DescribeInstancesResponse xmlns="http://ec2.amazonaws.com/doc/2016-11-15/">
  <requestId>abc</requestId>
  <reservationSet>
    <item>
      <reservationId>r-1</reservationId>
      <groupSet/>
      <instancesSet><item><instanceId>i-1</instanceId></item></instancesSet>
    </item>
  </reservationSet>
  <nextToken/>
</DescribeInstancesResponse>"#;

        let (_, value) = to_json(body).unwrap();
        assert_eq!(value["requestId"], "abc");
        assert_eq!(value["reservationSet"][0]["groupSet"], json!([]));
        assert_eq!(
            value["reservationSet"][0]["instancesSet"],
            json!([{"instanceId": "i-1"}])
        );
        assert_eq!(value["nextToken"], Value::Null);
    }

    #[test]
    fn test_plural_wrappers_and_repeated_siblings() {
        let body = r#"<ListAllMyBucketsResult>
  <Buckets><Bucket><Name>logs</Name></Bucket></Buckets>
  <Tag>a</Tag><Tag>b</Tag><Tag>c</Tag>
  <Owner><ID>1</ID></Owner>
</ListAllMyBucketsResult>"#;

        let (_, value) = to_json(body).unwrap();
        assert_eq!(value["Buckets"], json!([{"Name": "logs"}]));
        assert_eq!(value["Tag"], json!(["a", "b", "c"]));
        assert_eq!(value["Owner"], json!({"ID": "1"}));
    }

    #[test]
    fn test_typed_leaves() {
        let body = r#"<R>
  <Quantity>3</Quantity>
  <Ratio>0.25</Ratio>
  <Enabled>true</Enabled>
  <AccountId>000123456789</AccountId>
  <EngineVersion>5.7</EngineVersion>
  <Zip>01234</Zip>
  <Size>-1</Size>
  <Addresses/>
  <Status/>
  <Policies><Policy><Name>p</Name></Policy></Policies>
  <Zones><member>1</member></Zones>
</R>"#;

        let (_, value) = to_json(body).unwrap();
        assert_eq!(value["Quantity"], 3);
        assert_eq!(value["Ratio"], 0.25);
        assert_eq!(value["Enabled"], true);
        assert_eq!(value["AccountId"], "000123456789");
        assert_eq!(value["EngineVersion"], "5.7");
        assert_eq!(value["Zip"], "01234");
        assert_eq!(value["Size"], -1);
        assert_eq!(value["Addresses"], json!([]));
        assert_eq!(value["Status"], Value::Null);
        assert_eq!(value["Policies"], json!([{"Name": "p"}]));
        assert_eq!(value["Zones"], json!(["1"]));
    }

    #[test]
    fn test_escaped_text() {
        let (_, value) = to_json("<R><Policy>a &amp; b</Policy></R>").unwrap();
        assert_eq!(value["Policy"], "a & b");
    }

    #[test]
    fn test_error_details() {
        let query = r#"<ErrorResponse><Error><Type>Sender</Type><Code>Throttling</Code><Message>Rate exceeded</Message></Error><RequestId>x</RequestId></ErrorResponse>"#;
        assert_eq!(
            error_details(query),
            Some(("Throttling".to_string(), "Rate exceeded".to_string()))
        );

        let ec2 = r#"<Response><Errors><Error><Code>UnauthorizedOperation</Code><Message>no</Message></Error></Errors><RequestID>y</RequestID></Response>"#;
        assert_eq!(error_details(ec2).unwrap().0, "UnauthorizedOperation");

        let s3 = r#"<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>"#;
        assert_eq!(error_details(s3).unwrap().0, "AccessDenied");

        assert!(error_details("not xml at all").is_none());
    }

    #[test]
    fn test_malformed_document() {
        assert!(to_json("<a><b></a>").is_err());
        assert!(to_json("").is_err());
    }
}
