//! XML payloads of the HTTP File Upload protocol.
//!
//! Two incompatible schemas exist on the wire. `urn:xmpp:http:upload:0`
//! (`Version::V0_3`) carries request fields as attributes and allows extra
//! request headers on the `put` element. The legacy `urn:xmpp:http:upload`
//! (`Version::V0_2`) carries everything as element text and has no headers.
//! Responses are recognised by the namespace of their root element.

use std::fmt::Write as _;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use url::Url;

use crate::error::UploadError;

/// Namespace of protocol revisions 0.3 and later.
pub const NAMESPACE: &str = "urn:xmpp:http:upload:0";

/// Namespace of protocol revisions up to 0.2.
pub const NAMESPACE_0_2: &str = "urn:xmpp:http:upload";

const REQUEST: &str = "request";
const SLOT: &str = "slot";
const FILE_TOO_LARGE: &str = "file-too-large";
const MAX_FILE_SIZE: &str = "max-file-size";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Version {
    #[serde(rename = "0.2")]
    V0_2,
    #[serde(rename = "0.3")]
    V0_3,
}

impl Version {
    pub fn namespace(self) -> &'static str {
        match self {
            Version::V0_2 => NAMESPACE_0_2,
            Version::V0_3 => NAMESPACE,
        }
    }

    pub fn from_namespace(ns: &str) -> Option<Self> {
        match ns {
            NAMESPACE => Some(Version::V0_3),
            NAMESPACE_0_2 => Some(Version::V0_2),
            _ => None,
        }
    }
}

/// Request for an upload slot, addressed to one upload service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRequest {
    service_address: String,
    filename: String,
    size: u64,
    content_type: Option<String>,
}

impl SlotRequest {
    pub fn new(
        service_address: impl Into<String>,
        filename: impl Into<String>,
        size: u64,
        content_type: Option<String>,
    ) -> Result<Self, UploadError> {
        if size == 0 {
            return Err(UploadError::InvalidArgument(
                "file size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            service_address: service_address.into(),
            filename: filename.into(),
            size,
            content_type,
        })
    }

    pub fn service_address(&self) -> &str {
        &self.service_address
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// A one-time pair of URLs issued for a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    put_url: Url,
    get_url: Url,
    headers: Vec<(String, String)>,
}

impl Slot {
    pub fn new(put_url: Url, get_url: Url) -> Self {
        Self {
            put_url,
            get_url,
            headers: Vec::new(),
        }
    }

    /// Adds a header the uploader must send with the PUT. A repeated name
    /// replaces the earlier value in place.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_header(name.into(), value.into());
        self
    }

    fn insert_header(&mut self, name: String, value: String) {
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn put_url(&self) -> &Url {
        &self.put_url
    }

    pub fn get_url(&self) -> &Url {
        &self.get_url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

/// Service reply telling the client its file exceeds the accepted size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTooLarge {
    pub version: Version,
    pub max_file_size: u64,
}

pub fn encode_request(version: Version, req: &SlotRequest) -> String {
    let mut xml = String::new();
    match version {
        Version::V0_3 => {
            let _ = write!(
                xml,
                "<{REQUEST} xmlns='{}' filename='{}' size='{}'",
                NAMESPACE,
                escape(&req.filename),
                req.size
            );
            if let Some(ct) = &req.content_type {
                let _ = write!(xml, " content-type='{}'", escape(ct));
            }
            xml.push_str("/>");
        }
        Version::V0_2 => {
            let _ = write!(xml, "<{REQUEST} xmlns='{}'>", NAMESPACE_0_2);
            push_text_element(&mut xml, "filename", &req.filename);
            push_text_element(&mut xml, "size", &req.size.to_string());
            if let Some(ct) = &req.content_type {
                push_text_element(&mut xml, "content-type", ct);
            }
            let _ = write!(xml, "</{REQUEST}>");
        }
    }
    xml
}

/// Parses a slot request element, as an upload service would.
pub fn decode_request(
    service_address: &str,
    xml: &str,
) -> Result<(Version, SlotRequest), UploadError> {
    let root = Element::parse(xml)?;
    let version = root.version()?;
    let (filename, size, content_type) = match version {
        Version::V0_3 => (
            root.attr("filename").map(str::to_string),
            root.attr("size").map(str::to_string),
            root.attr("content-type").map(str::to_string),
        ),
        Version::V0_2 => (
            root.child("filename").map(|c| c.text.clone()),
            root.child("size").map(|c| c.text.clone()),
            root.child("content-type").map(|c| c.text.clone()),
        ),
    };
    let filename = filename.ok_or_else(|| UploadError::malformed("request without filename"))?;
    let size = parse_u64(size.as_deref(), "size")?;
    let req = SlotRequest::new(service_address, filename, size, content_type)?;
    Ok((version, req))
}

pub fn encode_slot(version: Version, slot: &Slot) -> String {
    let mut xml = String::new();
    let _ = write!(xml, "<{SLOT} xmlns='{}'>", version.namespace());
    match version {
        Version::V0_3 => {
            let _ = write!(xml, "<put url='{}'", escape(slot.put_url.as_str()));
            if slot.headers.is_empty() {
                xml.push_str("/>");
            } else {
                xml.push('>');
                for (name, value) in &slot.headers {
                    let _ = write!(
                        xml,
                        "<header name='{}'>{}</header>",
                        escape(name),
                        escape(value)
                    );
                }
                xml.push_str("</put>");
            }
            let _ = write!(xml, "<get url='{}'/>", escape(slot.get_url.as_str()));
        }
        Version::V0_2 => {
            push_text_element(&mut xml, "put", slot.put_url.as_str());
            push_text_element(&mut xml, "get", slot.get_url.as_str());
        }
    }
    let _ = write!(xml, "</{SLOT}>");
    xml
}

/// Decodes a slot reply, picking the schema from the root namespace.
pub fn decode_slot(xml: &str) -> Result<Slot, UploadError> {
    let root = Element::parse(xml)?;
    match root.version()? {
        Version::V0_3 => slot_v0_3(&root),
        Version::V0_2 => slot_v0_2(&root),
    }
}

fn slot_v0_3(root: &Element) -> Result<Slot, UploadError> {
    let put = root
        .child("put")
        .ok_or_else(|| UploadError::malformed("missing put element"))?;
    let get = root
        .child("get")
        .ok_or_else(|| UploadError::malformed("missing get element"))?;
    let put_url = parse_url(put.attr("url"), "put")?;
    let get_url = parse_url(get.attr("url"), "get")?;
    let mut slot = Slot::new(put_url, get_url);
    for header in put.children.iter().filter(|c| c.name == "header") {
        let name = header
            .attr("name")
            .ok_or_else(|| UploadError::malformed("header without name"))?;
        slot.insert_header(name.to_string(), header.text.clone());
    }
    Ok(slot)
}

fn slot_v0_2(root: &Element) -> Result<Slot, UploadError> {
    let put = root
        .child("put")
        .ok_or_else(|| UploadError::malformed("missing put element"))?;
    let get = root
        .child("get")
        .ok_or_else(|| UploadError::malformed("missing get element"))?;
    let put_url = parse_url(Some(put.text.as_str()), "put")?;
    let get_url = parse_url(Some(get.text.as_str()), "get")?;
    Ok(Slot::new(put_url, get_url))
}

pub fn encode_file_too_large(version: Version, max_file_size: u64) -> String {
    let mut xml = String::new();
    let _ = write!(xml, "<{FILE_TOO_LARGE} xmlns='{}'>", version.namespace());
    push_text_element(&mut xml, MAX_FILE_SIZE, &max_file_size.to_string());
    let _ = write!(xml, "</{FILE_TOO_LARGE}>");
    xml
}

/// Looks for a `file-too-large` payload anywhere in an error reply.
///
/// Returns `Ok(None)` when the reply is some other error.
pub fn decode_file_too_large(xml: &str) -> Result<Option<FileTooLarge>, UploadError> {
    let root = Element::parse(xml)?;
    let Some(found) = root.find(&|e| {
        e.name == FILE_TOO_LARGE && e.ns.as_deref().and_then(Version::from_namespace).is_some()
    }) else {
        return Ok(None);
    };
    let version = found.version()?;
    let max = found.child(MAX_FILE_SIZE).map(|c| c.text.as_str());
    let max_file_size = parse_u64(max, MAX_FILE_SIZE)?;
    Ok(Some(FileTooLarge {
        version,
        max_file_size,
    }))
}

fn push_text_element(xml: &mut String, name: &str, text: &str) {
    let _ = write!(xml, "<{name}>{}</{name}>", escape(text));
}

fn parse_url(raw: Option<&str>, what: &str) -> Result<Url, UploadError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| UploadError::malformed(format!("missing {what} url")))?;
    Url::parse(raw).map_err(|e| UploadError::malformed(format!("invalid {what} url {raw:?}: {e}")))
}

fn parse_u64(raw: Option<&str>, what: &str) -> Result<u64, UploadError> {
    let raw = raw.ok_or_else(|| UploadError::malformed(format!("missing {what}")))?;
    raw.trim()
        .parse()
        .map_err(|_| UploadError::malformed(format!("invalid {what}: {raw:?}")))
}

/// Minimal element tree; namespaces are inherited from the parent unless an
/// element declares its own default `xmlns`.
#[derive(Debug, Default)]
struct Element {
    name: String,
    ns: Option<String>,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn parse(xml: &str) -> Result<Element, UploadError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let parent_ns = stack.last().and_then(|p| p.ns.clone());
                    stack.push(Element::open(&start, parent_ns)?);
                }
                Event::Empty(start) => {
                    let parent_ns = stack.last().and_then(|p| p.ns.clone());
                    let el = Element::open(&start, parent_ns)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(el),
                        None => return Ok(el),
                    }
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    // Indentation between elements.
                    if text.trim().is_empty() {
                        continue;
                    }
                    if let Some(cur) = stack.last_mut() {
                        cur.text.push_str(&text);
                    }
                }
                Event::CData(data) => {
                    if let Some(cur) = stack.last_mut() {
                        cur.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Event::End(_) => {
                    let Some(done) = stack.pop() else {
                        return Err(UploadError::malformed("unbalanced end tag"));
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => return Ok(done),
                    }
                }
                Event::Eof => return Err(UploadError::malformed("unexpected end of document")),
                _ => {}
            }
        }
    }

    fn open(start: &BytesStart<'_>, parent_ns: Option<String>) -> Result<Element, UploadError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
        let mut el = Element {
            name,
            ns: parent_ns,
            ..Default::default()
        };
        for attr in start.attributes() {
            let attr = attr.map_err(|e| UploadError::malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            if key == "xmlns" {
                el.ns = Some(value);
            } else {
                el.attrs.push((key, value));
            }
        }
        Ok(el)
    }

    fn version(&self) -> Result<Version, UploadError> {
        let ns = self.ns.as_deref().unwrap_or_default();
        Version::from_namespace(ns)
            .ok_or_else(|| UploadError::malformed(format!("unknown namespace {ns:?}")))
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn find(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        if pred(self) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(pred))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn request_round_trips_for_both_versions() {
        for version in [Version::V0_3, Version::V0_2] {
            let req = SlotRequest::new(
                "upload.example.org",
                "my <holiday> & \"pics\".jpg",
                123_456,
                Some("image/jpeg".to_string()),
            )
            .unwrap();
            let xml = encode_request(version, &req);
            let (decoded_version, decoded) = decode_request("upload.example.org", &xml).unwrap();
            assert_eq!(decoded_version, version);
            assert_eq!(decoded, req);
        }
    }

    #[test]
    fn v0_3_request_uses_attributes() {
        let req = SlotRequest::new("upload.example.org", "a.txt", 10, None).unwrap();
        let xml = encode_request(Version::V0_3, &req);
        assert_eq!(
            xml,
            "<request xmlns='urn:xmpp:http:upload:0' filename='a.txt' size='10'/>"
        );
    }

    #[test]
    fn v0_2_request_uses_child_elements() {
        let req =
            SlotRequest::new("upload.example.org", "a.txt", 10, Some("text/plain".into())).unwrap();
        let xml = encode_request(Version::V0_2, &req);
        assert_eq!(
            xml,
            "<request xmlns='urn:xmpp:http:upload'><filename>a.txt</filename>\
             <size>10</size><content-type>text/plain</content-type></request>"
        );
    }

    #[test]
    fn zero_size_request_is_rejected() {
        let err = SlotRequest::new("upload.example.org", "a.txt", 0, None).unwrap_err();
        assert!(matches!(err, UploadError::InvalidArgument(_)));
    }

    #[test]
    fn v0_3_slot_keeps_header_order() {
        let slot = Slot::new(url("https://h/up/x"), url("https://h/down/x"))
            .with_header("Authorization", "Basic Base64String==")
            .with_header("Cookie", "foo=bar; user=romeo")
            .with_header("Expires", "Tue, 1 Jan 2030 00:00:00 GMT");
        let decoded = decode_slot(&encode_slot(Version::V0_3, &slot)).unwrap();
        assert_eq!(decoded, slot);
        let names: Vec<&str> = decoded.headers().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["Authorization", "Cookie", "Expires"]);
    }

    #[test]
    fn header_values_keep_surrounding_spaces() {
        let slot = Slot::new(url("https://h/up/x"), url("https://h/down/x"))
            .with_header("X-Pad", "  padded value  ")
            .with_header("Cookie", "a=b ");
        let decoded = decode_slot(&encode_slot(Version::V0_3, &slot)).unwrap();
        assert_eq!(
            decoded.headers(),
            [
                ("X-Pad".to_string(), "  padded value  ".to_string()),
                ("Cookie".to_string(), "a=b ".to_string()),
            ]
        );
    }

    #[test]
    fn v0_2_filename_keeps_spaces_and_urls_are_trimmed() {
        let req = SlotRequest::new("upload.h", " my file .txt", 12, None).unwrap();
        let (_, decoded) =
            decode_request("upload.h", &encode_request(Version::V0_2, &req)).unwrap();
        assert_eq!(decoded.filename(), " my file .txt");

        let xml = "<slot xmlns='urn:xmpp:http:upload'>\n  <put>\n    http://h/up\n  </put>\n  <get> http://h/down </get>\n</slot>";
        let slot = decode_slot(xml).unwrap();
        assert_eq!(slot.put_url().as_str(), "http://h/up");
        assert_eq!(slot.get_url().as_str(), "http://h/down");
    }

    #[test]
    fn v0_2_slot_from_element_text() {
        let xml = "<slot xmlns='urn:xmpp:http:upload'><put>http://h/up</put><get>http://h/down</get></slot>";
        let slot = decode_slot(xml).unwrap();
        assert_eq!(slot.put_url().as_str(), "http://h/up");
        assert_eq!(slot.get_url().as_str(), "http://h/down");
        assert!(slot.headers().is_empty());
    }

    #[test]
    fn v0_2_encoding_drops_headers() {
        let slot = Slot::new(url("http://h/up"), url("http://h/down")).with_header("A", "b");
        let decoded = decode_slot(&encode_slot(Version::V0_2, &slot)).unwrap();
        assert!(decoded.headers().is_empty());
    }

    #[test]
    fn unknown_elements_and_attributes_are_ignored() {
        let xml = r#"<slot xmlns="urn:xmpp:http:upload:0" extra="1">
            <note>hello</note>
            <put url="https://h/up" method="PUT"><header name="X-A">1</header><junk/></put>
            <get url="https://h/down"/>
        </slot>"#;
        let slot = decode_slot(xml).unwrap();
        assert_eq!(slot.headers(), [("X-A".to_string(), "1".to_string())]);
        assert_eq!(slot.get_url().as_str(), "https://h/down");
    }

    #[test]
    fn missing_fields_are_malformed() {
        let cases = [
            "<slot xmlns='urn:xmpp:http:upload:0'><get url='https://h/down'/></slot>",
            "<slot xmlns='urn:xmpp:http:upload:0'><put url='https://h/up'/></slot>",
            "<slot xmlns='urn:xmpp:http:upload:0'><put/><get url='https://h/down'/></slot>",
            "<slot xmlns='urn:xmpp:http:upload'><put></put><get>http://h/down</get></slot>",
            "<slot xmlns='urn:xmpp:http:upload'><put>not a url</put><get>http://h/down</get></slot>",
        ];
        for xml in cases {
            let err = decode_slot(xml).unwrap_err();
            assert!(matches!(err, UploadError::MalformedResponse(_)), "{xml}: {err}");
        }
    }

    #[test]
    fn unknown_namespace_is_malformed() {
        let xml = "<slot xmlns='urn:example:other'><put>http://h/up</put><get>http://h/down</get></slot>";
        assert!(matches!(
            decode_slot(xml),
            Err(UploadError::MalformedResponse(_))
        ));
    }

    #[test]
    fn file_too_large_inside_error_reply() {
        for version in [Version::V0_3, Version::V0_2] {
            let xml = format!(
                "<error type='modify'><not-acceptable xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>{}</error>",
                encode_file_too_large(version, 20_000)
            );
            let err = decode_file_too_large(&xml).unwrap().unwrap();
            assert_eq!(err.version, version);
            assert_eq!(err.max_file_size, 20_000);
        }
    }

    #[test]
    fn other_errors_are_not_file_too_large() {
        let xml = "<error type='cancel'><item-not-found xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/></error>";
        assert_eq!(decode_file_too_large(xml).unwrap(), None);
    }

    #[test]
    fn file_too_large_without_limit_is_malformed() {
        let xml = "<file-too-large xmlns='urn:xmpp:http:upload:0'/>";
        assert!(decode_file_too_large(xml).is_err());
    }
}
