//! Message codec: encodes one object as an RFC-822-shaped byte string
//! and parses it back, in either plaintext or encrypted mode.
//!
//! Mirrors `original_source`'s `encode_object`/`_reflow` exactly in
//! shape: the `X-IFAP` header carries the metadata blob folded onto
//! continuation lines (one leading space per physical line, in both
//! modes — the source's fold and strip happen in the same operator
//! precedence for `preserve` and non-`preserve` reflow), the body
//! carries the base64-or-sealed payload folded with no indent. The
//! 148/2048-byte padding block sizes are preserved bit-exactly.

use crate::crypto::EncryptionKey;
use crate::error::{Error, Result};
use crate::metadata::ObjectMetadata;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;

/// Metadata blocks are padded to a multiple of this many bytes before
/// encryption, in encrypted mode.
pub const METADATA_PAD_BLOCK: usize = 148;

/// Payloads are padded with spaces to a multiple of this many bytes
/// before encryption, in encrypted mode.
pub const PAYLOAD_PAD_BLOCK: usize = 2048;

/// Header/body lines are folded to at most this many characters.
pub const REFLOW_WIDTH: usize = 78;

/// How many leading bytes of a message the Synchronizer fetches per
/// scan step.
pub const HEADER_PREFIX_BYTES: usize = 1024;

const ENCRYPTED_SUBJECT: &str = "...";
const ENCRYPTED_FILENAME: &str = "ifap.enc";
const ENCRYPTED_CTE: &str = "7bit";
const PLAINTEXT_CTE: &str = "base64";

/// A fully decoded object: its metadata (with transport-only keys
/// already stripped) and, when the body section was present, its
/// payload.
#[derive(Debug, Clone)]
pub struct DecodedObject {
    pub metadata: ObjectMetadata,
    pub payload: Vec<u8>,
}

/// Fold `data` the way the source's `_reflow` does: `indent` is
/// prepended to the whole result, and — in `preserve` mode — every
/// embedded `\n` becomes `\r\n` + `indent`; otherwise `data` is
/// stripped of whitespace first and re-chunked into `linelen`-`indent`
/// sized groups separated by `\r\n` + `indent`.
fn reflow(data: &str, indent: &str, linelen: usize, preserve: bool) -> String {
    let body = if preserve {
        data.replace('\n', &format!("\r\n{indent}"))
    } else {
        let compact: Vec<char> = data.chars().filter(|c| !c.is_whitespace()).collect();
        let chunk_len = linelen.saturating_sub(indent.chars().count()).max(1);
        let mut out = String::new();
        let mut i = 0;
        while i + chunk_len <= compact.len() {
            out.extend(&compact[i..i + chunk_len]);
            out.push_str("\r\n");
            out.push_str(indent);
            i += chunk_len;
        }
        out.extend(&compact[i..]);
        out
    };
    format!("{indent}{}", body.trim())
}

/// A raw header line, as scanned from the message bytes: the key for
/// a new header, or a continuation of the previously seen header if
/// it starts with a single leading space.
struct ScannedHeaders {
    subject: Option<String>,
    content_transfer_encoding: Option<String>,
    xifap_lines: Vec<String>,
    body_start: Option<usize>,
}

fn scan_headers(text: &str) -> ScannedHeaders {
    let mut subject = None;
    let mut content_transfer_encoding = None;
    let mut xifap_lines = Vec::new();
    let mut in_xifap = false;
    let mut consumed = 0usize;
    let mut body_start = None;

    for line in text.split("\r\n") {
        consumed += line.len() + 2;
        if line.is_empty() {
            body_start = Some(consumed.min(text.len()));
            break;
        }
        if let Some(rest) = line.strip_prefix(' ') {
            if in_xifap {
                xifap_lines.push(rest.to_string());
            }
            continue;
        }
        in_xifap = false;
        let Some(colon) = line.find(':') else {
            continue;
        };
        let key = &line[..colon];
        let value = line[colon + 1..].trim().to_string();
        match key.to_ascii_lowercase().as_str() {
            "x-ifap" => in_xifap = true,
            "subject" => subject = Some(value),
            "content-transfer-encoding" => content_transfer_encoding = Some(value),
            _ => {}
        }
    }

    ScannedHeaders {
        subject,
        content_transfer_encoding,
        xifap_lines,
        body_start,
    }
}

/// Encode `metadata` (whose `path`/`bytes` fields the caller has
/// already set) and `payload` into one IFAP object message.
pub fn encode(metadata: &ObjectMetadata, payload: &[u8], key: Option<&EncryptionKey>) -> Result<Vec<u8>> {
    let mut metadata = metadata.clone();
    metadata.pad = None;

    let (subject, filename, cte, xifap_block, body_block) = if let Some(key) = key {
        let base_json = serde_json::to_vec(&metadata)
            .map_err(|e| Error::AppendFailed(format!("metadata encode: {e}")))?;
        let pad_len = METADATA_PAD_BLOCK - (base_json.len() % METADATA_PAD_BLOCK);
        metadata.pad = Some("_".repeat(pad_len));

        let final_json = serde_json::to_vec(&metadata)
            .map_err(|e| Error::AppendFailed(format!("metadata encode: {e}")))?;
        let sealed_meta = key.seal(&final_json)?;
        let meta_b64 = B64.encode(sealed_meta);
        let xifap_block = reflow(&meta_b64, " ", REFLOW_WIDTH, false);

        let mut padded_payload = payload.to_vec();
        let pad_len = PAYLOAD_PAD_BLOCK - (padded_payload.len() % PAYLOAD_PAD_BLOCK);
        padded_payload.extend(std::iter::repeat(b' ').take(pad_len));
        let sealed_payload = key.seal(&padded_payload)?;
        let payload_b64 = B64.encode(sealed_payload);
        let body_block = reflow(&payload_b64, "", REFLOW_WIDTH, false);

        (
            ENCRYPTED_SUBJECT.to_string(),
            ENCRYPTED_FILENAME.to_string(),
            ENCRYPTED_CTE.to_string(),
            xifap_block,
            body_block,
        )
    } else {
        let pretty = serde_json::to_string_pretty(&metadata)
            .map_err(|e| Error::AppendFailed(format!("metadata encode: {e}")))?;
        let xifap_block = reflow(&pretty, " ", REFLOW_WIDTH, true);
        let payload_b64 = B64.encode(payload);
        let body_block = reflow(&payload_b64, "", REFLOW_WIDTH, false);

        (
            metadata.path.clone(),
            crate::path::basename(&metadata.path).to_string(),
            PLAINTEXT_CTE.to_string(),
            xifap_block,
            body_block,
        )
    };

    let message = [
        "To: ifap <to@ifap.invalid>".to_string(),
        "From: ifap <from@ifap.invalid>".to_string(),
        format!("Subject: {subject}"),
        "X-IFAP:".to_string(),
        xifap_block,
        "Content-Type: application/x-ifap".to_string(),
        format!("Content-Transfer-Encoding: {cte}"),
        format!("Content-Disposition: attachment; filename=\"{filename}\""),
        String::new(),
        body_block,
    ]
    .join("\r\n");

    Ok(message.into_bytes())
}

/// Parse a message — or just its header prefix — into metadata and,
/// when the body section was present in `bytes`, the payload.
///
/// Per the parse contract, this never panics or propagates an
/// unexpected error type: any malformed input yields an `Err` that
/// the Synchronizer classifies as a broken message.
pub fn parse(bytes: &[u8], key: Option<&EncryptionKey>) -> Result<DecodedObject> {
    let text = String::from_utf8_lossy(bytes);
    let headers = scan_headers(&text);

    let encrypted = headers.content_transfer_encoding.as_deref() == Some(ENCRYPTED_CTE);

    let xifap_text = if encrypted {
        headers.xifap_lines.concat()
    } else {
        headers.xifap_lines.join("\n")
    };

    let mut metadata: ObjectMetadata = if encrypted {
        let key = key.ok_or_else(|| Error::DecryptFailed {
            seq: 0,
            reason: "no encryption key configured".to_string(),
        })?;
        let sealed = B64
            .decode(xifap_text.as_bytes())
            .map_err(|e| Error::ParseFailed { seq: 0, reason: format!("metadata base64: {e}") })?;
        let plaintext = key.unseal(&sealed)?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| Error::ParseFailed { seq: 0, reason: format!("metadata json: {e}") })?
    } else {
        serde_json::from_str(&xifap_text)
            .map_err(|e| Error::ParseFailed { seq: 0, reason: format!("metadata json: {e}") })?
    };
    metadata.strip_transport_keys();

    let Some(body_start) = headers.body_start else {
        return Ok(DecodedObject {
            metadata,
            payload: Vec::new(),
        });
    };

    let body_text: String = text[body_start..].chars().filter(|c| !c.is_whitespace()).collect();
    if body_text.is_empty() {
        return Ok(DecodedObject { metadata, payload: Vec::new() });
    }

    let decoded = B64
        .decode(body_text.as_bytes())
        .map_err(|e| Error::ParseFailed { seq: 0, reason: format!("body base64: {e}") })?;

    let payload = if encrypted {
        let key = key.ok_or_else(|| Error::DecryptFailed {
            seq: 0,
            reason: "no encryption key configured".to_string(),
        })?;
        let mut padded = key.unseal(&decoded)?;
        padded.truncate(metadata.bytes as usize);
        padded
    } else {
        decoded
    };

    Ok(DecodedObject { metadata, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_round_trip() {
        let metadata = ObjectMetadata::file("a/b.txt", 5);
        let encoded = encode(&metadata, b"hello", None).unwrap();
        let decoded = parse(&encoded, None).unwrap();
        assert_eq!(decoded.metadata.path, "a/b.txt");
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn encrypted_round_trip() {
        let key = EncryptionKey::derive("hunter2");
        let metadata = ObjectMetadata::file("a/b.txt", 5);
        let encoded = encode(&metadata, b"hello", Some(&key)).unwrap();
        let decoded = parse(&encoded, Some(&key)).unwrap();
        assert_eq!(decoded.metadata.path, "a/b.txt");
        assert_eq!(decoded.payload, b"hello");
        assert!(decoded.metadata.pad.is_none());
    }

    #[test]
    fn encrypted_round_trip_with_large_payload_spanning_multiple_reflow_lines() {
        let key = EncryptionKey::derive("hunter2");
        let payload = vec![b'x'; 5000];
        let metadata = ObjectMetadata::file("big.bin", payload.len() as u64);
        let encoded = encode(&metadata, &payload, Some(&key)).unwrap();
        let decoded = parse(&encoded, Some(&key)).unwrap();
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn header_prefix_only_yields_metadata_without_payload() {
        let metadata = ObjectMetadata::file("a/b.txt", 5);
        let encoded = encode(&metadata, b"hello", None).unwrap();
        let prefix = &encoded[..encoded.len().min(HEADER_PREFIX_BYTES).min(80)];
        let decoded = parse(prefix, None).unwrap();
        assert_eq!(decoded.metadata.path, "a/b.txt");
    }

    #[test]
    fn decrypt_without_key_is_an_error_not_a_panic() {
        let key = EncryptionKey::derive("hunter2");
        let metadata = ObjectMetadata::file("a/b.txt", 5);
        let encoded = encode(&metadata, b"hello", Some(&key)).unwrap();
        assert!(parse(&encoded, None).is_err());
    }

    #[test]
    fn mangled_header_is_rejected_not_panicking() {
        let mangled = b"To: x\r\nFrom: y\r\nSubject: z\r\nX-IFAP:\r\n not json\r\nContent-Type: application/x-ifap\r\nContent-Transfer-Encoding: base64\r\n\r\n";
        assert!(parse(mangled, None).is_err());
    }

    #[test]
    fn encrypted_metadata_padding_is_a_multiple_of_block_size() {
        let key = EncryptionKey::derive("hunter2");
        let metadata = ObjectMetadata::file("a", 1);
        let base_json = serde_json::to_vec(&metadata).unwrap();
        let pad_len = METADATA_PAD_BLOCK - (base_json.len() % METADATA_PAD_BLOCK);
        assert!(pad_len > 0 && pad_len <= METADATA_PAD_BLOCK);
        let _ = key; // padding formula exercised directly; full path covered above
    }
}
