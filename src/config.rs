use std::env;
use std::fmt;
use std::path::PathBuf;
use url::Url;
use warp::http::header::HeaderName;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_CLIENT_HEADER: &str = "x-app-client";
const DEFAULT_CLIENT_ID: &str = "lpr-client";
const DEFAULT_BODY_LIMIT: u64 = 5 * 1024 * 1024;
const DEFAULT_PERMITS_PATH: &str = "permits.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub ocr: OcrConfig,
    pub permits_path: PathBuf,
    pub policy_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub port: u16,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
    pub client_header: String,
    /// `None` turns the client header check off.
    pub client_id: Option<String>,
    pub body_limit: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            port: DEFAULT_PORT,
            allowed_origins: vec![],
            client_header: DEFAULT_CLIENT_HEADER.to_string(),
            client_id: Some(DEFAULT_CLIENT_ID.to_string()),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

#[derive(Clone)]
pub struct OcrConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub endpoint: Url,
}

impl fmt::Debug for OcrConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OcrConfig")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, failure::Error> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self, failure::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| format_err!("PORT must be a port number, got '{}'", p))?,
            None => DEFAULT_PORT,
        };
        let body_limit = match get("BODY_LIMIT_BYTES") {
            Some(b) => b
                .parse()
                .map_err(|_| format_err!("BODY_LIMIT_BYTES must be a byte count, got '{}'", b))?,
            None => DEFAULT_BODY_LIMIT,
        };
        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty() && *o != "*")
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let client_header = get("CLIENT_HEADER")
            .unwrap_or_else(|| DEFAULT_CLIENT_HEADER.to_string())
            .to_ascii_lowercase();
        HeaderName::from_bytes(client_header.as_bytes())
            .map_err(|_| format_err!("CLIENT_HEADER '{}' is not a header name", client_header))?;
        let client_id = match var("CLIENT_ID") {
            None => Some(DEFAULT_CLIENT_ID.to_string()),
            Some(id) if id.trim().is_empty() => None,
            Some(id) => Some(id.trim().to_string()),
        };

        let region = get("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let access_key_id =
            get("AWS_ACCESS_KEY_ID").ok_or_else(|| format_err!("AWS_ACCESS_KEY_ID is not set"))?;
        let secret_access_key = get("AWS_SECRET_ACCESS_KEY")
            .ok_or_else(|| format_err!("AWS_SECRET_ACCESS_KEY is not set"))?;
        let endpoint = match get("OCR_ENDPOINT") {
            Some(e) => e,
            None => format!("https://rekognition.{}.amazonaws.com/", region),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| format_err!("Invalid OCR endpoint '{}': {}", endpoint, e))?;

        Ok(Config {
            http: HttpConfig {
                port,
                allowed_origins,
                client_header,
                client_id,
                body_limit,
            },
            ocr: OcrConfig {
                region,
                access_key_id,
                secret_access_key,
                session_token: get("AWS_SESSION_TOKEN"),
                endpoint,
            },
            permits_path: get("PERMITS_PATH")
                .unwrap_or_else(|| DEFAULT_PERMITS_PATH.to_string())
                .into(),
            policy_path: get("PLATE_POLICY").map(PathBuf::from),
        })
    }
}
