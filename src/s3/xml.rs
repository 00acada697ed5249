//! XML response parsing and request body building
//!
//! Every S3 XML document the client reads is flat enough to handle with one
//! streaming pass over quick-xml events. [`visit`] drives that pass and hands
//! each element's unescaped text to the parser at its closing tag; the parsers
//! themselves only match on local names, so entity-encoded keys (`&amp;`,
//! `&lt;`, ...) come back decoded.

use crate::s3::error::{Result, S3Error};
use crate::s3::types::{
    CompleteMultipartUploadOutput, CompletedPart, CopyObjectOutput, InitiateMultipartUploadOutput,
    ListPage, ObjectDescriptor,
};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt::Write as FmtWrite;

/// Types that can be decoded from an S3 XML response body.
pub trait FromXml: Sized {
    fn from_xml(xml: &[u8]) -> Result<Self>;
}

/// One step of the streaming pass.
#[derive(Debug)]
pub(crate) enum Node<'a> {
    Open(&'a [u8]),
    /// Closing tag with the text collected since the element opened
    Close { name: &'a [u8], text: &'a str },
}

/// Walk `xml`, calling `on_node` for every element open and close.
///
/// Leaf text is passed through untrimmed so keys with surrounding spaces
/// survive; numeric fields trim before parsing.
pub(crate) fn visit<F>(xml: &[u8], mut on_node: F) -> Result<()>
where
    F: FnMut(Node<'_>) -> Result<()>,
{
    let mut reader = Reader::from_reader(xml);
    let mut text = String::with_capacity(256);

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                text.clear();
                on_node(Node::Open(e.local_name().as_ref()))?;
            }
            Event::Empty(e) => {
                text.clear();
                let name = e.local_name();
                on_node(Node::Open(name.as_ref()))?;
                on_node(Node::Close { name: name.as_ref(), text: "" })?;
            }
            Event::Text(e) => text.push_str(&e.unescape()?),
            Event::CData(e) => text.push_str(&String::from_utf8_lossy(&e.into_inner())),
            Event::End(e) => {
                on_node(Node::Close { name: e.local_name().as_ref(), text: &text })?;
                text.clear();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(field: &str, text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| S3Error::XmlParse(format!("invalid {} value {:?}", field, text)))
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// ETags arrive quoted (`"abc"`); the client stores them bare.
pub(crate) fn trim_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

impl FromXml for ListPage {
    fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut page = ListPage::default();
        let mut current: Option<ObjectDescriptor> = None;
        let mut in_common_prefixes = false;

        visit(xml, |node| {
            match node {
                Node::Open(b"Contents") => current = Some(ObjectDescriptor::new(String::new(), 0)),
                Node::Open(b"CommonPrefixes") => in_common_prefixes = true,
                Node::Open(_) => {}
                Node::Close { name: b"Contents", .. } => {
                    if let Some(object) = current.take() {
                        page.objects.push(object);
                    }
                }
                Node::Close { name, text } => match (name, current.as_mut()) {
                    (b"Key", Some(object)) => object.key = text.to_string(),
                    (b"Size", Some(object)) => object.size = parse_number("Size", text)?,
                    (b"ETag", Some(object)) => object.etag = trim_etag(text),
                    (b"LastModified", Some(object)) => object.last_modified = parse_timestamp(text),
                    (b"StorageClass", Some(object)) => {
                        object.storage_class = Some(text.to_string())
                    }
                    (b"CommonPrefixes", _) => in_common_prefixes = false,
                    (b"Prefix", None) if in_common_prefixes => {
                        page.common_prefixes.push(text.to_string())
                    }
                    (b"IsTruncated", None) => page.is_truncated = text.trim() == "true",
                    (b"NextContinuationToken", None) if !text.is_empty() => {
                        page.continuation_token = Some(text.to_string())
                    }
                    (b"KeyCount", None) => page.key_count = Some(parse_number("KeyCount", text)?),
                    _ => {}
                },
            }
            Ok(())
        })?;

        Ok(page)
    }
}

impl FromXml for InitiateMultipartUploadOutput {
    fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut bucket = String::new();
        let mut key = String::new();
        let mut upload_id = String::new();

        visit(xml, |node| {
            if let Node::Close { name, text } = node {
                match name {
                    b"Bucket" => bucket = text.to_string(),
                    b"Key" => key = text.to_string(),
                    b"UploadId" => upload_id = text.trim().to_string(),
                    _ => {}
                }
            }
            Ok(())
        })?;

        if upload_id.is_empty() {
            return Err(S3Error::InvalidResponse("Missing UploadId in response".to_string()));
        }

        Ok(Self { bucket, key, upload_id })
    }
}

impl FromXml for CompleteMultipartUploadOutput {
    fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut output = CompleteMultipartUploadOutput::default();

        visit(xml, |node| {
            if let Node::Close { name, text } = node {
                match name {
                    b"Location" => output.location = Some(text.to_string()),
                    b"Bucket" => output.bucket = text.to_string(),
                    b"Key" => output.key = text.to_string(),
                    b"ETag" => output.etag = trim_etag(text),
                    _ => {}
                }
            }
            Ok(())
        })?;

        Ok(output)
    }
}

impl FromXml for CopyObjectOutput {
    fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut output = CopyObjectOutput::default();

        visit(xml, |node| {
            if let Node::Close { name, text } = node {
                match name {
                    b"ETag" => output.etag = trim_etag(text),
                    b"LastModified" => output.last_modified = parse_timestamp(text),
                    _ => {}
                }
            }
            Ok(())
        })?;

        Ok(output)
    }
}

/// S3 `<Error>` document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl FromXml for ErrorResponse {
    fn from_xml(xml: &[u8]) -> Result<Self> {
        let mut root: Option<Vec<u8>> = None;
        let mut error = ErrorResponse::default();

        visit(xml, |node| {
            match node {
                Node::Open(name) => {
                    if root.is_none() {
                        root = Some(name.to_vec());
                    }
                }
                Node::Close { name, text } => match name {
                    b"Code" => error.code = text.trim().to_string(),
                    b"Message" => error.message = text.to_string(),
                    b"RequestId" => error.request_id = Some(text.trim().to_string()),
                    _ => {}
                },
            }
            Ok(())
        })?;

        if root.as_deref() != Some(b"Error".as_slice()) {
            return Err(S3Error::XmlParse("not an <Error> document".to_string()));
        }

        Ok(error)
    }
}

/// Returns the error carried by a body whose root element is `<Error>`.
///
/// S3 can answer CopyObject and CompleteMultipartUpload with `200 OK` and still
/// fail; the failure is only visible in the body.
pub fn error_document(xml: &[u8]) -> Option<ErrorResponse> {
    ErrorResponse::from_xml(xml).ok()
}

/// Escape XML special characters into an existing buffer (no intermediate allocation)
pub fn xml_escape_into(buf: &mut String, s: &str) {
    for ch in s.chars() {
        match ch {
            '&' => buf.push_str("&amp;"),
            '<' => buf.push_str("&lt;"),
            '>' => buf.push_str("&gt;"),
            '"' => buf.push_str("&quot;"),
            '\'' => buf.push_str("&apos;"),
            _ => buf.push(ch),
        }
    }
}

/// Build the CompleteMultipartUpload body. `parts` must already be sorted.
pub fn complete_multipart_body(parts: &[CompletedPart]) -> String {
    let mut xml = String::with_capacity(parts.len() * 100 + 100);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<CompleteMultipartUpload>");
    for part in parts {
        xml.push_str("<Part><PartNumber>");
        let _ = write!(xml, "{}", part.part_number);
        xml.push_str("</PartNumber><ETag>&quot;");
        xml_escape_into(&mut xml, part.etag.trim_matches('"'));
        xml.push_str("&quot;</ETag></Part>");
    }
    xml.push_str("</CompleteMultipartUpload>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_OBJECTS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <Prefix>photos/</Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <Contents>
    <Key>photos/a.jpg</Key>
    <LastModified>2024-03-01T12:00:00.000Z</LastModified>
    <ETag>&quot;9b2cf535f27731c974343645a3985328&quot;</ETag>
    <Size>1024</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>photos/b.jpg</Key>
    <LastModified>2024-03-02T12:00:00.000Z</LastModified>
    <ETag>"d41d8cd98f00b204e9800998ecf8427e"</ETag>
    <Size>0</Size>
  </Contents>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
</ListBucketResult>"#;

    #[test]
    fn test_list_two_objects_truncated() {
        let page = ListPage::from_xml(TWO_OBJECTS.as_bytes()).unwrap();
        assert_eq!(page.objects.len(), 2);
        assert!(page.is_truncated);
        assert_eq!(
            page.continuation_token.as_deref(),
            Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=")
        );
        assert_eq!(page.key_count, Some(2));

        let first = &page.objects[0];
        assert_eq!(first.key, "photos/a.jpg");
        assert_eq!(first.size, 1024);
        assert_eq!(first.etag, "9b2cf535f27731c974343645a3985328");
        assert_eq!(first.storage_class.as_deref(), Some("STANDARD"));
        assert_eq!(
            first.last_modified.unwrap().to_rfc3339(),
            "2024-03-01T12:00:00+00:00"
        );
        assert_eq!(page.objects[1].storage_class, None);
    }

    #[test]
    fn test_empty_listing() {
        let xml = r#"<ListBucketResult><Name>bucket</Name><KeyCount>0</KeyCount><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = ListPage::from_xml(xml.as_bytes()).unwrap();
        assert!(page.objects.is_empty());
        assert!(!page.is_truncated);
        assert_eq!(page.continuation_token, None);

        let page = ListPage::from_xml(b"<ListBucketResult/>").unwrap();
        assert!(page.objects.is_empty());
    }

    #[test]
    fn test_entity_encoded_keys_are_decoded() {
        let xml = r#"<ListBucketResult><Contents><Key>R&amp;D/a &lt;1&gt;.txt</Key><Size>3</Size></Contents>
<Contents><Key><![CDATA[raw & literal]]></Key><Size>4</Size></Contents></ListBucketResult>"#;
        let page = ListPage::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(page.objects[0].key, "R&D/a <1>.txt");
        assert_eq!(page.objects[1].key, "raw & literal");
    }

    #[test]
    fn test_common_prefixes() {
        let xml = r#"<ListBucketResult><Prefix>logs/</Prefix><Delimiter>/</Delimiter>
<CommonPrefixes><Prefix>logs/2023/</Prefix></CommonPrefixes>
<CommonPrefixes><Prefix>logs/2024/</Prefix></CommonPrefixes></ListBucketResult>"#;
        let page = ListPage::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(page.common_prefixes, vec!["logs/2023/", "logs/2024/"]);
        assert!(page.objects.is_empty());
    }

    #[test]
    fn test_invalid_size_is_parse_error() {
        let xml = "<ListBucketResult><Contents><Key>a</Key><Size>big</Size></Contents></ListBucketResult>";
        assert!(matches!(
            ListPage::from_xml(xml.as_bytes()),
            Err(S3Error::XmlParse(_))
        ));
    }

    #[test]
    fn test_initiate_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult><Bucket>bucket</Bucket><Key>big.bin</Key><UploadId>VXBsb2FkIElE</UploadId></InitiateMultipartUploadResult>"#;
        let output = InitiateMultipartUploadOutput::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(output.upload_id, "VXBsb2FkIElE");
        assert_eq!(output.key, "big.bin");

        let xml = "<InitiateMultipartUploadResult><Bucket>bucket</Bucket></InitiateMultipartUploadResult>";
        assert!(matches!(
            InitiateMultipartUploadOutput::from_xml(xml.as_bytes()),
            Err(S3Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_error_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>InternalError</Code><Message>We encountered an internal error.</Message><RequestId>4442587FB7D0A2F9</RequestId></Error>"#;
        let error = error_document(xml.as_bytes()).unwrap();
        assert_eq!(error.code, "InternalError");
        assert_eq!(error.request_id.as_deref(), Some("4442587FB7D0A2F9"));

        let ok = "<CopyObjectResult><ETag>\"abc\"</ETag></CopyObjectResult>";
        assert!(error_document(ok.as_bytes()).is_none());
        assert!(error_document(b"").is_none());
    }

    #[test]
    fn test_copy_result() {
        let xml = "<CopyObjectResult><LastModified>2024-01-01T00:00:00.000Z</LastModified><ETag>&quot;abc&quot;</ETag></CopyObjectResult>";
        let output = CopyObjectOutput::from_xml(xml.as_bytes()).unwrap();
        assert_eq!(output.etag, "abc");
        assert!(output.last_modified.is_some());
    }

    #[test]
    fn test_complete_body() {
        let parts = vec![
            CompletedPart::new(1, "\"etag-1\"".to_string()),
            CompletedPart::new(2, "etag-2".to_string()),
        ];
        let body = complete_multipart_body(&parts);
        assert!(body.starts_with("<?xml"));
        assert!(body.contains(
            "<Part><PartNumber>1</PartNumber><ETag>&quot;etag-1&quot;</ETag></Part><Part><PartNumber>2</PartNumber>"
        ));
        assert!(body.ends_with("</CompleteMultipartUpload>"));
    }

    #[test]
    fn test_xml_escape() {
        let mut buf = String::new();
        xml_escape_into(&mut buf, "a&b<c>");
        assert_eq!(buf, "a&amp;b&lt;c&gt;");
    }
}
