//! Media-type classification and form/query helpers shared by the codec,
//! the matcher and the anonymizer.

use http::header::{self, HeaderMap, HeaderName};
use url::form_urlencoded;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// How a body is written into an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Base64 text with an explicit `base64` encoding marker.
    Binary,
    /// Decomposed into ordered name/value pairs.
    Form,
    /// UTF-8 text, no marker.
    Text,
}

pub fn classify(mime_type: Option<&str>) -> BodyKind {
    let Some(essence) = mime_type.map(media_type_essence) else {
        return BodyKind::Text;
    };
    if essence == FORM_URLENCODED {
        return BodyKind::Form;
    }
    let binary = essence.starts_with("image/")
        || essence.starts_with("audio/")
        || essence.starts_with("video/")
        || essence.starts_with("multipart/")
        || essence == "application/octet-stream";
    if binary {
        BodyKind::Binary
    } else {
        BodyKind::Text
    }
}

/// `type/subtype` lowercased, parameters dropped.
pub fn media_type_essence(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Headers that describe the body rather than the message.
pub fn is_content_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("content-") || name == "allow" || name == "expires" || name == "last-modified"
}

/// Moves content headers out of `headers`, returning them as a separate map.
pub fn split_content_headers(headers: &HeaderMap) -> (HeaderMap, HeaderMap) {
    let mut message = HeaderMap::new();
    let mut content = HeaderMap::new();
    for (name, value) in headers {
        if is_content_header(name) {
            content.append(name.clone(), value.clone());
        } else {
            message.append(name.clone(), value.clone());
        }
    }
    (message, content)
}

/// Every value of `name` across the given header sets, joined with `,`.
pub fn joined_header_value(name: &str, sets: &[&HeaderMap]) -> String {
    sets.iter()
        .flat_map(|headers| headers.get_all(name).iter())
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    form_urlencoded::parse(body)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect()
}

pub fn encode_form<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn classifies_binary_form_and_text_media_types() {
        assert_eq!(classify(Some("image/png")), BodyKind::Binary);
        assert_eq!(classify(Some("Application/Octet-Stream")), BodyKind::Binary);
        assert_eq!(
            classify(Some("multipart/form-data; boundary=xyz")),
            BodyKind::Binary
        );
        assert_eq!(
            classify(Some("application/x-www-form-urlencoded; charset=utf-8")),
            BodyKind::Form
        );
        assert_eq!(classify(Some("application/json")), BodyKind::Text);
        assert_eq!(classify(None), BodyKind::Text);
    }

    #[test]
    fn split_keeps_body_headers_apart() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(header::EXPIRES, HeaderValue::from_static("0"));

        let (message, content) = split_content_headers(&headers);
        assert_eq!(message.len(), 1);
        assert!(content.contains_key(header::CONTENT_TYPE));
        assert!(content.contains_key(header::EXPIRES));
    }

    #[test]
    fn joins_values_from_both_header_sets() {
        let mut message = HeaderMap::new();
        message.append("accept", HeaderValue::from_static("text/html"));
        message.append("accept", HeaderValue::from_static("application/json"));
        let empty = HeaderMap::new();

        assert_eq!(
            joined_header_value("Accept", &[&message, &empty]),
            "text/html,application/json"
        );
        assert_eq!(joined_header_value("missing", &[&message, &empty]), "");
    }

    #[test]
    fn form_pairs_survive_encoding() {
        let encoded = encode_form([("name", "a b"), ("tag", "x&y")]);
        assert_eq!(encoded, "name=a+b&tag=x%26y");
        assert_eq!(
            parse_form(encoded.as_bytes()),
            vec![
                ("name".to_string(), "a b".to_string()),
                ("tag".to_string(), "x&y".to_string())
            ]
        );
    }
}
