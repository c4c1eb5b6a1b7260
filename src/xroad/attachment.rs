use std::io::Read;

use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CollectorError;
use crate::schema::FetchBatch;

// ------------------------------------------------------------
// Multipart response markers
// ------------------------------------------------------------
//
// The SOAP response is a MIME multipart message. The records
// travel in a separate gzip part; the continuation position is
// an element of the SOAP body.
//
static ATTACHMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s-u)content-id: <operational-monitoring-data\.json\.gz>\r\n\r\n(.+)\r\n--xroad")
        .expect("static regex")
});

static NEXT_RECORDS_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)<om:nextRecordsFrom>(\d+)</om:nextRecordsFrom>").expect("static regex")
});

static FAULT_STRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<faultstring>(.*?)</faultstring>").expect("static regex")
});

#[derive(Deserialize)]
struct Payload {
    records: Vec<Value>,
}

/// Decodes a raw monitoring-data response body.
///
/// FAILS WITH `Decode` WHEN:
/// - the gzip attachment is missing (the SOAP fault, if any, is reported)
/// - the attachment is not valid gzip
/// - the JSON has no `records` array
pub fn decode_response(body: &[u8]) -> Result<FetchBatch, CollectorError> {
    let Some(caps) = ATTACHMENT.captures(body) else {
        let cause = match FAULT_STRING.captures(body) {
            Some(fault) => format!("SOAP fault: {}", String::from_utf8_lossy(&fault[1]).trim()),
            None => "no monitoring data attachment".to_string(),
        };
        return Err(CollectorError::Decode(cause));
    };

    let mut json = Vec::new();
    GzDecoder::new(&caps[1])
        .read_to_end(&mut json)
        .map_err(|e| CollectorError::Decode(format!("gzip: {}", e)))?;

    let payload: Payload = serde_json::from_slice(&json)
        .map_err(|e| CollectorError::Decode(format!("json: {}", e)))?;

    let continuation = NEXT_RECORDS_FROM
        .captures(body)
        .map(|c| String::from_utf8_lossy(&c[1]).into_owned());

    Ok(FetchBatch {
        records: payload.records,
        continuation,
    })
}

/// Builds a response body the way a security server frames it.
#[cfg(test)]
pub(crate) fn encode_response(records: &[Value], next_records_from: Option<i64>) -> Vec<u8> {
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    let payload = serde_json::json!({ "records": records });
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(payload.to_string().as_bytes()).unwrap();
    let gz = gz.finish().unwrap();

    let next = next_records_from
        .map(|n| format!("<om:nextRecordsFrom>{}</om:nextRecordsFrom>", n))
        .unwrap_or_default();

    let mut body = Vec::new();
    body.extend_from_slice(b"--xroad-boundary\r\ncontent-type: text/xml; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(
        format!(
            "<SOAP-ENV:Envelope><SOAP-ENV:Body><om:getSecurityServerOperationalDataResponse>\
             <om:recordsCount>{}</om:recordsCount>{}\
             </om:getSecurityServerOperationalDataResponse></SOAP-ENV:Body></SOAP-ENV:Envelope>",
            records.len(),
            next
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"\r\n--xroad-boundary\r\ncontent-type: application/gzip\r\n");
    body.extend_from_slice(b"content-id: <operational-monitoring-data.json.gz>\r\n\r\n");
    body.extend_from_slice(&gz);
    body.extend_from_slice(b"\r\n--xroad-boundary--\r\n");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_records_and_continuation() {
        let records = vec![json!({"messageId": "a"}), json!({"messageId": "b"})];
        let batch = decode_response(&encode_response(&records, Some(1_500_000_123))).unwrap();
        assert_eq!(batch.records, records);
        assert_eq!(batch.continuation.as_deref(), Some("1500000123"));
    }

    #[test]
    fn continuation_is_optional() {
        let batch = decode_response(&encode_response(&[], None)).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.continuation, None);
    }

    #[test]
    fn missing_attachment_reports_fault() {
        let body = b"<SOAP-ENV:Fault><faultcode>Server</faultcode>\
                     <faultstring> Access denied </faultstring></SOAP-ENV:Fault>";
        match decode_response(body) {
            Err(CollectorError::Decode(cause)) => assert_eq!(cause, "SOAP fault: Access denied"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn corrupt_gzip_is_decode_error() {
        let body = b"content-id: <operational-monitoring-data.json.gz>\r\n\r\nnot-gzip\r\n--xroad--";
        assert!(matches!(decode_response(body), Err(CollectorError::Decode(_))));
    }
}
