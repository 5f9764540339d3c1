// Google Sheets v4 vote store.
//
// Rows are appended with `values:append` and read back with `values.get`.
// Requests are blocking: call from a blocking thread when inside the runtime.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::{debug, warn};
use poll_flow::store::{rows_to_records, StoreError, VoteStore};
use poll_flow::VoteRecord;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::poll::*;

pub const DEFAULT_API_BASE_URL: &str = "https://sheets.googleapis.com";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_RANGE: &str = "A:B";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const TOKEN_LIFETIME_SECS: u64 = 3600;
// Tokens are refreshed this long before they expire.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service account key file that are needed here.
#[derive(Eq, PartialEq, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum SheetsCredentials {
    ServiceAccount(ServiceAccountKey),
    /// An OAuth access token obtained elsewhere.
    AccessToken(String),
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

enum Auth {
    Static(String),
    ServiceAccount {
        client_email: String,
        token_uri: String,
        key: EncodingKey,
        cached: Mutex<Option<CachedToken>>,
    },
}

pub struct SheetsStore {
    client: Client,
    append_url: Url,
    read_url: Url,
    auth: Auth,
}

impl SheetsStore {
    /// Validates the credentials and prepares the client. No request is made.
    pub fn new(
        spreadsheet_id: &str,
        range: &str,
        credentials: SheetsCredentials,
        api_base_url: Option<&str>,
    ) -> PollResult<SheetsStore> {
        let auth = match credentials {
            SheetsCredentials::AccessToken(token) => Auth::Static(token),
            SheetsCredentials::ServiceAccount(sa) => {
                let key = EncodingKey::from_rsa_pem(sa.private_key.as_bytes())
                    .context(InvalidCredentialsSnafu {})?;
                Auth::ServiceAccount {
                    client_email: sa.client_email,
                    token_uri: sa.token_uri,
                    key,
                    cached: Mutex::new(None),
                }
            }
        };
        let base = api_base_url.unwrap_or(DEFAULT_API_BASE_URL);
        let read_url = values_url(base, spreadsheet_id, range.to_string())?;
        let mut append_url = values_url(base, spreadsheet_id, format!("{}:append", range))?;
        append_url
            .query_pairs_mut()
            .append_pair("valueInputOption", "RAW");
        let client = Client::builder().build().context(HttpClientSnafu {})?;
        Ok(SheetsStore {
            client,
            append_url,
            read_url,
            auth,
        })
    }

    fn access_token(&self) -> Result<String, StoreError> {
        match &self.auth {
            Auth::Static(token) => Ok(token.clone()),
            Auth::ServiceAccount {
                client_email,
                token_uri,
                key,
                cached,
            } => {
                let mut cached = cached
                    .lock()
                    .map_err(|_| StoreError::Unauthorized("token cache poisoned".to_string()))?;
                if let Some(c) = cached.as_ref() {
                    if Instant::now() < c.refresh_at {
                        return Ok(c.token.clone());
                    }
                }
                let fetched = self.fetch_token(client_email, token_uri, key)?;
                let token = fetched.token.clone();
                *cached = Some(fetched);
                Ok(token)
            }
        }
    }

    // JWT bearer grant (RFC 7523) with the service account key.
    fn fetch_token(
        &self,
        client_email: &str,
        token_uri: &str,
        key: &EncodingKey,
    ) -> Result<CachedToken, StoreError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let claims = Claims {
            iss: client_email,
            scope: SCOPE,
            aud: token_uri,
            iat,
            exp: iat + TOKEN_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
            .map_err(|e| StoreError::Unauthorized(e.to_string()))?;
        debug!("fetch_token: requesting access token from {}", token_uri);
        let resp = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().unwrap_or_default();
            warn!("fetch_token: token endpoint answered {}: {}", status, message);
            return Err(StoreError::Unauthorized(format!("{}: {}", status, message)));
        }
        let body: TokenResponse = resp
            .json()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(TOKEN_LIFETIME_SECS));
        Ok(CachedToken {
            token: body.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_MARGIN),
        })
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        let token = self.access_token()?;
        let resp = req
            .bearer_auth(token)
            .send()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let message = resp.text().unwrap_or_default();
            Err(StoreError::Rejected { status, message })
        }
    }
}

fn values_url(base: &str, spreadsheet_id: &str, range: String) -> PollResult<Url> {
    let mut url = Url::parse(base).context(InvalidUrlSnafu { url: base })?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)
        .context(InvalidUrlSnafu { url: base })?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet_id, "values", range.as_str()]);
    Ok(url)
}

impl VoteStore for SheetsStore {
    fn append(&self, record: &VoteRecord) -> Result<(), StoreError> {
        let body = json!({ "values": [[record.timestamp, record.option]] });
        debug!("append: {:?}", body);
        self.send(self.client.post(self.append_url.clone()).json(&body))?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<VoteRecord>, StoreError> {
        let resp = self.send(self.client.get(self.read_url.clone()))?;
        let range: ValueRange = resp
            .json()
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        debug!("read_all: {} raw rows", range.values.len());
        Ok(rows_to_records(&range.values))
    }
}
