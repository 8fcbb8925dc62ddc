use crate::config::OcrConfig;
use crate::types::{DetectionKind, TextDetection};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use log::debug;
use ring::{digest, hmac};
use serde::Deserialize;
use serde_json::json;
use url::Url;

const SERVICE: &str = "rekognition";
const TARGET: &str = "RekognitionService.DetectText";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, Fail)]
pub enum OcrError {
    #[fail(display = "OCR request failed: {}", _0)]
    Transport(#[cause] reqwest::Error),
    #[fail(display = "OCR service returned {}: {}", status, body)]
    Status { status: u16, body: String },
    #[fail(display = "Unreadable OCR response: {}", _0)]
    Decode(#[cause] serde_json::Error),
}

/// Text detection service. One call per image; no retries.
pub trait TextDetector: Send + Sync {
    fn detect_text(&self, image: Vec<u8>) -> BoxFuture<'_, Result<Vec<TextDetection>, OcrError>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectTextResponse {
    #[serde(default)]
    text_detections: Vec<RawDetection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDetection {
    #[serde(default)]
    detected_text: String,
    #[serde(rename = "Type")]
    kind: DetectionKind,
}

pub struct RekognitionClient {
    client: reqwest::Client,
    config: OcrConfig,
}

impl RekognitionClient {
    pub fn new(config: OcrConfig) -> Self {
        RekognitionClient {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn detect(&self, image: Vec<u8>) -> Result<Vec<TextDetection>, OcrError> {
        let payload = json!({ "Image": { "Bytes": STANDARD.encode(&image) } }).to_string();
        let headers = signed_headers(&self.config, Utc::now(), payload.as_bytes());

        let mut request = self.client.post(self.config.endpoint.clone());
        for (name, value) in headers {
            if name != "host" {
                request = request.header(name, value);
            }
        }
        let response = request
            .body(payload)
            .send()
            .await
            .map_err(OcrError::Transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(OcrError::Transport)?;
        if !status.is_success() {
            return Err(OcrError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        let detections = parse_response(&body)?;
        debug!("Rekognition returned {} detections", detections.len());
        Ok(detections)
    }
}

impl TextDetector for RekognitionClient {
    fn detect_text(&self, image: Vec<u8>) -> BoxFuture<'_, Result<Vec<TextDetection>, OcrError>> {
        self.detect(image).boxed()
    }
}

fn parse_response(body: &[u8]) -> Result<Vec<TextDetection>, OcrError> {
    let response: DetectTextResponse = serde_json::from_slice(body).map_err(OcrError::Decode)?;
    Ok(response
        .text_detections
        .into_iter()
        .map(|d| TextDetection {
            text: d.detected_text,
            kind: d.kind,
        })
        .collect())
}

fn host_header(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data))
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::sign(&key, data.as_bytes()).as_ref().to_vec()
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, service);
    hmac_sha256(&k_service, "aws4_request")
}

/// Signature Version 4 headers for one DetectText call, in canonical
/// (sorted) order followed by `authorization`.
fn signed_headers(config: &OcrConfig, now: DateTime<Utc>, payload: &[u8]) -> Vec<(String, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers = vec![
        ("content-type".to_string(), CONTENT_TYPE.to_string()),
        ("host".to_string(), host_header(&config.endpoint)),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &config.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    headers.push(("x-amz-target".to_string(), TARGET.to_string()));

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_names = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_request = format!(
        "POST\n{}\n\n{}\n{}\n{}",
        config.endpoint.path(),
        canonical_headers,
        signed_names,
        sha256_hex(payload)
    );

    let scope = format!("{}/{}/{}/aws4_request", date, config.region, SERVICE);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );
    let key = signing_key(&config.secret_access_key, &date, &config.region, SERVICE);
    let signature = hex::encode(hmac_sha256(&key, &string_to_sign));

    headers.push((
        "authorization".to_string(),
        format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, config.access_key_id, scope, signed_names, signature
        ),
    ));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use warp::http::{HeaderMap, StatusCode};
    use warp::Filter;

    type Seen = Arc<Mutex<Option<(HeaderMap, Bytes)>>>;

    /// Serves a canned reply on an ephemeral port and records the request.
    fn fake_rekognition(status: StatusCode, reply: &'static str) -> (Url, Seen) {
        let seen: Seen = Arc::new(Mutex::new(None));
        let record = seen.clone();
        let route = warp::post()
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .map(move |headers: HeaderMap, body: Bytes| {
                *record.lock().unwrap() = Some((headers, body));
                warp::reply::with_status(reply, status)
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        (Url::parse(&format!("http://{}/", addr)).unwrap(), seen)
    }

    fn client_for(endpoint: Url) -> RekognitionClient {
        let mut settings = config(None);
        settings.endpoint = endpoint;
        RekognitionClient::new(settings)
    }

    fn config(session_token: Option<&str>) -> OcrConfig {
        OcrConfig {
            region: "us-east-1".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
            session_token: session_token.map(str::to_string),
            endpoint: Url::parse("https://rekognition.us-east-1.amazonaws.com/").unwrap(),
        }
    }

    #[test]
    fn derives_published_signing_key() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn signs_with_scope_and_sorted_headers() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let headers = signed_headers(&config(Some("session")), now, b"{}");
        let names: Vec<_> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "content-type",
                "host",
                "x-amz-date",
                "x-amz-security-token",
                "x-amz-target",
                "authorization"
            ]
        );
        assert_eq!(headers[1].1, "rekognition.us-east-1.amazonaws.com");
        assert_eq!(headers[2].1, "20250304T050607Z");

        let auth = &headers[5].1;
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20250304/us-east-1/rekognition/aws4_request, "
        ));
        assert!(auth.contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target, "
        ));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn signature_depends_on_payload() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let a = signed_headers(&config(None), now, b"one");
        let b = signed_headers(&config(None), now, b"two");
        assert_eq!(a.len(), 5);
        assert_ne!(a.last(), b.last());
        assert_eq!(signed_headers(&config(None), now, b"one"), a);
    }

    #[test]
    fn host_keeps_explicit_port() {
        let url = Url::parse("http://localhost:4566/").unwrap();
        assert_eq!(host_header(&url), "localhost:4566");
    }

    #[test]
    fn parses_detections_in_order() {
        let body = br#"{
            "TextDetections": [
                {"DetectedText": "CALIFORNIA", "Type": "LINE", "Id": 0, "Confidence": 99.1},
                {"DetectedText": "7ABC123", "Type": "LINE", "Id": 1, "Confidence": 98.0},
                {"DetectedText": "CALIFORNIA", "Type": "WORD", "Id": 2, "ParentId": 0}
            ],
            "TextModelVersion": "3.0"
        }"#;
        let detections = parse_response(body).unwrap();
        assert_eq!(
            detections,
            vec![
                TextDetection::line("CALIFORNIA"),
                TextDetection::line("7ABC123"),
                TextDetection::word("CALIFORNIA"),
            ]
        );
    }

    #[test]
    fn missing_detections_is_empty() {
        assert!(parse_response(b"{}").unwrap().is_empty());
    }

    #[test]
    fn garbage_body_is_a_decode_error() {
        match parse_response(b"<html>") {
            Err(OcrError::Decode(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn sends_signed_detect_text_request() {
        let (endpoint, seen) = fake_rekognition(
            StatusCode::OK,
            r#"{"TextDetections": [
                {"DetectedText": "LGX 137", "Type": "LINE"},
                {"DetectedText": "LGX", "Type": "WORD"}
            ]}"#,
        );
        let port = endpoint.port().unwrap();
        let client = client_for(endpoint);

        let detections = client.detect_text(b"img".to_vec()).await.unwrap();
        assert_eq!(
            detections,
            vec![TextDetection::line("LGX 137"), TextDetection::word("LGX")]
        );

        let (headers, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(headers["x-amz-target"], TARGET);
        assert_eq!(headers["content-type"], CONTENT_TYPE);
        assert_eq!(headers["host"], format!("127.0.0.1:{}", port).as_str());
        assert_eq!(headers["x-amz-date"].len(), "20250304T050607Z".len());
        assert!(headers["authorization"]
            .to_str()
            .unwrap()
            .starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"Image": {"Bytes": "aW1n"}}));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (endpoint, _) = fake_rekognition(StatusCode::BAD_REQUEST, "boom");
        match client_for(endpoint).detect_text(b"img".to_vec()).await {
            Err(OcrError::Status { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let endpoint = Url::parse(&format!("http://{}/", addr)).unwrap();
        match client_for(endpoint).detect_text(b"img".to_vec()).await {
            Err(OcrError::Transport(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn undecodable_success_body_is_a_decode_error() {
        let (endpoint, _) = fake_rekognition(StatusCode::OK, "<html>");
        match client_for(endpoint).detect_text(b"img".to_vec()).await {
            Err(OcrError::Decode(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
