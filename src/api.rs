use crate::config::HttpConfig;
use crate::extract::extract_plate;
use crate::ocr::TextDetector;
use crate::permits::PermitDirectory;
use crate::policy::PlatePolicy;
use crate::types::{DetectionResult, PermitRecord};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;
use futures::{pin_mut, Stream, StreamExt};
use log::{error, info, warn};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::{HeaderMap, StatusCode};
use warp::reply::{Json, WithStatus};
use warp::{Filter, Rejection, Reply};

const LIVENESS: &str = "License Plate API is running.";
const NO_IMAGE: &str = "No image provided.";
const INVALID_PLATE: &str = "A valid plate string must be provided.";
const OCR_FAILED: &str = "Failed to process image.";

/// Accepts unpadded payloads as well as padded ones.
const DATA_URL_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Shared, read-only state handed to every request.
pub struct AppState {
    pub detector: Arc<dyn TextDetector>,
    pub permits: PermitDirectory,
    pub policy: PlatePolicy,
}

#[derive(Debug)]
struct Forbidden;

impl warp::reject::Reject for Forbidden {}

#[derive(Debug)]
struct BodyTooLarge;

impl warp::reject::Reject for BodyTooLarge {}

#[derive(Debug)]
struct UnreadableBody;

impl warp::reject::Reject for UnreadableBody {}

pub async fn run(config: HttpConfig, state: Arc<AppState>) {
    let port = config.port;
    let routes = routes(&config, state);
    info!("Listening on port {}", port);
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}

pub fn routes(
    config: &HttpConfig,
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_state = warp::any().map(move || state.clone());
    let body = request_body(config.body_limit);

    let permits = warp::path!("permits")
        .and(warp::get())
        .and(with_state.clone())
        .map(|state: Arc<AppState>| warp::reply::json(&state.permits.all()));
    let lookup = warp::path!("lookup-plate")
        .and(warp::post())
        .and(body.clone())
        .and(with_state.clone())
        .map(lookup_plate);
    let detect = warp::path!("detect-plate")
        .and(warp::post())
        .and(body)
        .and(with_state)
        .and_then(detect_plate);

    let api = warp::path("api")
        .and(client_guard(config))
        .and(permits.or(lookup).or(detect));
    let root = warp::path::end().and(warp::get()).map(|| LIVENESS);

    root.or(api).recover(handle_rejection).with(cors(config))
}

/// Rejects `/api` requests that do not carry the configured client id.
fn client_guard(config: &HttpConfig) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    let header = config.client_header.clone();
    let expected = config.client_id.clone();
    warp::header::headers_cloned()
        .and_then(move |headers: HeaderMap| {
            let allowed = match &expected {
                None => true,
                Some(id) => {
                    headers
                        .get(header.as_str())
                        .and_then(|v| v.to_str().ok())
                        .map(str::trim)
                        == Some(id.as_str())
                }
            };
            async move {
                if allowed {
                    Ok(())
                } else {
                    Err(warp::reject::custom(Forbidden))
                }
            }
        })
        .untuple_one()
}

/// Request body capped at `limit` bytes. Requests without a Content-Length
/// (chunked or empty) are read as a stream under the same cap.
fn request_body(limit: u64) -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    let sized = warp::body::content_length_limit(limit).and(warp::body::bytes());
    let unsized_body = warp::header::optional::<u64>("content-length")
        .and_then(|length: Option<u64>| async move {
            match length {
                None => Ok(()),
                Some(_) => Err(warp::reject::not_found()),
            }
        })
        .untuple_one()
        .and(warp::body::stream())
        .and(warp::any().map(move || limit))
        .and_then(read_bounded);
    sized.or(unsized_body).unify()
}

async fn read_bounded<S, B>(stream: S, limit: u64) -> Result<Bytes, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    pin_mut!(stream);
    let mut data = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Error reading request body: {}", e);
            warp::reject::custom(UnreadableBody)
        })?;
        if (data.len() + chunk.remaining()) as u64 > limit {
            return Err(warp::reject::custom(BodyTooLarge));
        }
        data.put(chunk);
    }
    Ok(data.freeze())
}

fn cors(config: &HttpConfig) -> warp::cors::Cors {
    let cors = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type".to_string(), config.client_header.clone()]);
    let cors = if config.allowed_origins.is_empty() {
        cors.allow_any_origin()
    } else {
        cors.allow_origins(config.allowed_origins.iter().map(String::as_str))
    };
    cors.build()
}

fn error_reply(status: StatusCode, message: &str) -> WithStatus<Json> {
    warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status)
}

fn authorized(permit: Option<&PermitRecord>) -> bool {
    permit.map_or(false, |p| p.is_active(Utc::now()))
}

fn lookup_plate(body: Bytes, state: Arc<AppState>) -> WithStatus<Json> {
    let plate = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("plate").and_then(Value::as_str).map(str::to_string))
        .filter(|p| !p.trim().is_empty());
    let plate = match plate {
        Some(p) => p,
        None => return error_reply(StatusCode::BAD_REQUEST, INVALID_PLATE),
    };

    let permit = state.permits.lookup(&plate).cloned();
    let result = DetectionResult {
        plate: Some(permit.as_ref().map_or(plate, |p| p.plate.clone())),
        is_authorized: authorized(permit.as_ref()),
        permit,
    };
    info!(
        "Lookup for plate {:?}: authorized={}",
        result.plate, result.is_authorized
    );
    warp::reply::with_status(warp::reply::json(&result), StatusCode::OK)
}

/// Pulls the image bytes out of `{"image": "data:<mime>;base64,<payload>"}`.
fn decode_image(body: &[u8]) -> Option<Vec<u8>> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let data_url = value.get("image")?.as_str()?;
    let (_, payload) = data_url.split_once(',')?;
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if payload.is_empty() {
        return None;
    }
    DATA_URL_BASE64.decode(payload).ok()
}

async fn detect_plate(
    body: Bytes,
    state: Arc<AppState>,
) -> Result<WithStatus<Json>, Infallible> {
    let image = match decode_image(&body) {
        Some(image) => image,
        None => return Ok(error_reply(StatusCode::BAD_REQUEST, NO_IMAGE)),
    };

    let detections = match state.detector.detect_text(image).await {
        Ok(detections) => detections,
        Err(e) => {
            error!("Rekognition error: {}", e);
            return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, OCR_FAILED));
        }
    };

    let plate = extract_plate(&detections, &state.policy);
    let permit = plate
        .as_deref()
        .and_then(|p| state.permits.lookup(p))
        .cloned();
    let result = DetectionResult {
        plate,
        is_authorized: authorized(permit.as_ref()),
        permit,
    };
    info!(
        "Detected plate {:?} from {} detections: authorized={}",
        result.plate,
        detections.len(),
        result.is_authorized
    );
    Ok(warp::reply::with_status(
        warp::reply::json(&result),
        StatusCode::OK,
    ))
}

async fn handle_rejection(err: Rejection) -> Result<WithStatus<Json>, Infallible> {
    let (status, message) = if err.find::<Forbidden>().is_some() {
        warn!("Rejecting request without a valid client header");
        (StatusCode::FORBIDDEN, "Forbidden.")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some()
        || err.find::<BodyTooLarge>().is_some()
    {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large.")
    } else if err.find::<UnreadableBody>().is_some() {
        (StatusCode::BAD_REQUEST, "Unreadable request body.")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed.")
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found.")
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error.")
    };
    Ok(error_reply(status, message))
}
