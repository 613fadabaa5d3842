//! AWS Wire Protocols
//!
//! Request encoding and response normalisation for the five protocol
//! families the catalog uses. Every normalised object response carries a
//! `ResponseMetadata` entry, like the SDK responses the result selectors
//! were written against.

use serde_json::{Map, Value};

use super::xml;
use crate::error::CallError;

/// Wire protocol spoken by a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Form-encoded `Action`/`Version`, XML responses, `Name.member.N` lists
    Query,
    /// Like query, but `Name.N` lists and camelCase `item` responses
    Ec2,
    /// POST with `X-Amz-Target`, JSON in and out
    Json {
        target_prefix: &'static str,
        json_version: &'static str,
    },
    /// GET on an operation path, JSON responses
    RestJson,
    /// GET on an operation path, XML responses
    RestXml,
}

/// HTTP request parts before signing
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRequest {
    pub method: &'static str,
    pub path: String,
    /// Canonical query string (sorted, percent-encoded)
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Encode one operation call for the given protocol.
///
/// `path` is only used by the rest protocols and may contain `{Name}`
/// placeholders filled from the parameters of the same name.
pub fn encode(
    protocol: Protocol,
    api_version: &str,
    action: &str,
    path: &str,
    parameters: Option<&Map<String, Value>>,
) -> Result<EncodedRequest, CallError> {
    let empty = Map::new();
    let parameters = parameters.unwrap_or(&empty);

    match protocol {
        Protocol::Query | Protocol::Ec2 => {
            let mut pairs = vec![
                ("Action".to_string(), action.to_string()),
                ("Version".to_string(), api_version.to_string()),
            ];
            for (name, value) in parameters {
                flatten(name, value, protocol == Protocol::Ec2, &mut pairs);
            }
            Ok(EncodedRequest {
                method: "POST",
                path: "/".to_string(),
                query: String::new(),
                headers: vec![("content-type".to_string(), FORM_CONTENT_TYPE.to_string())],
                body: canonical_query(pairs).into_bytes(),
            })
        }
        Protocol::Json {
            target_prefix,
            json_version,
        } => {
            let body = serde_json::to_vec(parameters)
                .map_err(|e| CallError::validation(format!("Unserializable parameters: {}", e)))?;
            Ok(EncodedRequest {
                method: "POST",
                path: "/".to_string(),
                query: String::new(),
                headers: vec![
                    (
                        "content-type".to_string(),
                        format!("application/x-amz-json-{}", json_version),
                    ),
                    (
                        "x-amz-target".to_string(),
                        format!("{}.{}", target_prefix, action),
                    ),
                ],
                body,
            })
        }
        Protocol::RestJson | Protocol::RestXml => {
            let mut path = path.to_string();
            let mut pairs = Vec::new();
            for (name, value) in parameters {
                let rendered = scalar(value).ok_or_else(|| {
                    CallError::validation(format!(
                        "Parameter {} must be a scalar for {}",
                        name, action
                    ))
                })?;
                let placeholder = format!("{{{}}}", name);
                if path.contains(&placeholder) {
                    path = path.replace(&placeholder, &urlencoding::encode(&rendered));
                } else {
                    pairs.push((name.clone(), rendered));
                }
            }
            if path.contains('{') {
                return Err(CallError::validation(format!(
                    "Missing path parameter for {} in {}",
                    action, path
                )));
            }
            Ok(EncodedRequest {
                method: "GET",
                path,
                query: canonical_query(pairs),
                headers: Vec::new(),
                body: Vec::new(),
            })
        }
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flatten(name: &str, value: &Value, ec2: bool, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, inner) in map {
                flatten(&format!("{}.{}", name, key), inner, ec2, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let entry = if ec2 {
                    // ec2 names list entries by the singular: Filters -> Filter.1
                    format!("{}.{}", name.strip_suffix('s').unwrap_or(name), i + 1)
                } else {
                    format!("{}.member.{}", name, i + 1)
                };
                flatten(&entry, item, ec2, out);
            }
        }
        other => {
            if let Some(rendered) = scalar(other) {
                out.push((name.to_string(), rendered));
            }
        }
    }
}

/// Percent-encode and sort key/value pairs into a SigV4 canonical query
pub fn canonical_query(mut pairs: Vec<(String, String)>) -> String {
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Turn a successful response body into the normalised JSON value
pub fn decode(protocol: Protocol, action: &str, body: &str, request_id: Option<&str>) -> Result<Value, CallError> {
    let mut value = match protocol {
        Protocol::Json { .. } | Protocol::RestJson => {
            if body.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(body).map_err(|e| {
                    CallError::unexpected(format!("Invalid JSON response for {}: {}", action, e))
                })?
            }
        }
        Protocol::Query | Protocol::Ec2 | Protocol::RestXml => {
            let (root, value) = xml::to_json(body).map_err(|e| {
                CallError::unexpected(format!("Invalid XML response for {}: {:#}", action, e))
            })?;
            // rest-xml payload members keep their element name: {"DistributionList": {...}}
            if protocol == Protocol::RestXml && !root.ends_with("Response") && !root.ends_with("Result") {
                let mut map = Map::new();
                map.insert(root, value);
                Value::Object(map)
            } else {
                value
            }
        }
    };

    if protocol == Protocol::Query {
        value = unwrap_query_result(value, action);
    }
    if protocol == Protocol::Ec2 {
        value = ec2_keys(value);
    }

    if let Value::Object(map) = &mut value {
        let request_id = match map.remove("RequestId") {
            Some(Value::String(id)) => Some(id),
            _ => request_id.map(str::to_string),
        };
        if !map.contains_key("ResponseMetadata") {
            let mut metadata = Map::new();
            if let Some(id) = request_id {
                metadata.insert("RequestId".to_string(), Value::String(id));
            }
            map.insert("ResponseMetadata".to_string(), Value::Object(metadata));
        }
    }

    Ok(value)
}

/// `{Action}Response/{Action}Result` becomes the result content plus metadata
fn unwrap_query_result(value: Value, action: &str) -> Value {
    let mut outer = match value {
        Value::Object(outer) => outer,
        other => return other,
    };

    let metadata = outer.remove("ResponseMetadata");
    let mut result = match outer.remove(&format!("{}Result", action)) {
        Some(Value::Object(inner)) => inner,
        // results without content come back as an empty element
        Some(Value::Null) | None => Map::new(),
        Some(other) => {
            let mut map = Map::new();
            map.insert(format!("{}Result", action), other);
            map
        }
    };
    if let Some(metadata) = metadata {
        result.insert("ResponseMetadata".to_string(), metadata);
    }
    Value::Object(result)
}

/// SDK name of an ec2 response key. List members are plural whether or
/// not the wire name carries a `Set` suffix (`blockDeviceMapping`).
fn ec2_key(key: &str, list: bool) -> String {
    match key {
        "requestId" => return "RequestId".to_string(),
        "regionInfo" => return "Regions".to_string(),
        "availabilityZoneInfo" => return "AvailabilityZones".to_string(),
        "securityGroupInfo" => return "SecurityGroups".to_string(),
        "keySet" => return "KeyPairs".to_string(),
        _ => {}
    }

    let (stem, list) = match key.strip_suffix("Set") {
        Some(stem) if !stem.is_empty() => (stem, true),
        _ => (key, list),
    };
    let mut name = xml::capitalize(stem);
    if list && !name.ends_with('s') {
        name.push('s');
    }
    name
}

/// Rename ec2's camelCase keys to the SDK's PascalCase names
fn ec2_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (ec2_key(&k, v.is_array()), ec2_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(ec2_keys).collect()),
        other => other,
    }
}

/// Convert an SDK-style PascalCase action name into its snake_case
/// operation name (`DescribeDBInstances` -> `describe_db_instances`)
pub fn operation_name(action: &str) -> String {
    let chars: Vec<char> = action.chars().collect();
    let mut out = String::with_capacity(action.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).map(|n| n.is_lowercase()).unwrap_or(false);
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}
