use log::{debug, info};

use poll_flow::store::{MemoryStore, VoteStore};
use poll_flow::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::poll::config_reader::*;
use crate::poll::io_sheets::{ServiceAccountKey, SheetsCredentials, SheetsStore};

pub mod config_reader;
pub mod io_qr;
pub mod io_sheets;
pub mod web;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PollError {
    #[snafu(display("Error opening configuration file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing configuration file {path}"))]
    ParsingJson {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Invalid poll: {source}"))]
    InvalidPoll { source: FlowErrors },
    #[snafu(display("Missing configuration entry {key}"))]
    MissingKey { key: String },
    #[snafu(display("Unknown store provider {provider:?} (expected sheets or memory)"))]
    UnknownProvider { provider: String },
    #[snafu(display("Error reading credentials file {path}"))]
    ReadingCredentials {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing credentials file {path}"))]
    ParsingCredentials {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Invalid service account private key"))]
    InvalidCredentials {
        source: jsonwebtoken::errors::Error,
    },
    #[snafu(display("Invalid URL {url}"))]
    InvalidUrl {
        source: url::ParseError,
        url: String,
    },
    #[snafu(display("Error building the HTTP client"))]
    HttpClient { source: reqwest::Error },
    #[snafu(display("Error rendering the QR code for {url}"))]
    RenderingQr {
        source: qrcode::types::QrError,
        url: String,
    },
    #[snafu(display("Error binding to {address}"))]
    Binding {
        source: std::io::Error,
        address: String,
    },
    #[snafu(display("Server stopped"))]
    Serving { source: std::io::Error },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type PollResult<T> = Result<T, PollError>;

/// Default QR target, the address of a local run.
pub const DEFAULT_SHARE_URL: &str = "http://localhost:8501";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8501";

/// Builds the store named in the configuration.
///
/// Relative credential paths are resolved against `config_dir`.
fn build_store(source: &StoreSource, config_dir: &Path) -> PollResult<Arc<dyn VoteStore>> {
    match source.provider.as_str() {
        "memory" => {
            info!("Votes are kept in memory and lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        "sheets" => {
            let spreadsheet_id = source
                .spreadsheet_id
                .clone()
                .filter(|s| !s.trim().is_empty())
                .context(MissingKeySnafu {
                    key: "store.spreadsheetId",
                })?;
            let credentials = match (&source.credentials_path, &source.access_token) {
                (Some(p), _) => {
                    let p: PathBuf = [config_dir, Path::new(p)].iter().collect();
                    let path = p.display().to_string();
                    debug!("build_store: reading credentials from {}", path);
                    let contents =
                        fs::read_to_string(&p).context(ReadingCredentialsSnafu { path: &path })?;
                    let key: ServiceAccountKey = serde_json::from_str(&contents)
                        .context(ParsingCredentialsSnafu { path: &path })?;
                    SheetsCredentials::ServiceAccount(key)
                }
                (None, Some(token)) => SheetsCredentials::AccessToken(token.clone()),
                (None, None) => {
                    return MissingKeySnafu {
                        key: "store.credentialsPath",
                    }
                    .fail()
                }
            };
            let store = SheetsStore::new(
                spreadsheet_id.as_str(),
                source.range.as_deref().unwrap_or(io_sheets::DEFAULT_RANGE),
                credentials,
                source.api_base_url.as_deref(),
            )?;
            info!("Votes are recorded in spreadsheet {}", spreadsheet_id);
            Ok(Arc::new(store))
        }
        x => UnknownProviderSnafu { provider: x }.fail(),
    }
}

/// Loads the configuration, then serves the page until the server stops.
pub fn run_app(config_path: String) -> PollResult<()> {
    let config_p = Path::new(config_path.as_str());
    let config = read_config(&config_path)?;
    info!(
        "Loaded {} ({} options, store provider {:?})",
        config_path,
        config.options.len(),
        config.store.provider
    );

    let poll = build_poll(&config)?;
    let config_dir = config_p.parent().unwrap_or_else(|| Path::new(""));
    let store = build_store(&config.store, config_dir)?;

    let share_url = config
        .share_url
        .clone()
        .unwrap_or_else(|| DEFAULT_SHARE_URL.to_string());
    let qr_svg = io_qr::render_qr_svg(&share_url)?;
    let address = config
        .bind_address
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

    let page = web::PageSettings {
        title: config.title.clone(),
        share_url,
        qr_svg,
    };
    let state = web::AppState::new(poll, store.clone(), Arc::new(web::SystemClock), page);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .whatever_context("Error starting the async runtime")?;
    let res = runtime.block_on(web::serve(state, &address));
    drop(runtime);
    // The blocking HTTP client must be dropped outside of the runtime.
    drop(store);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, contents: &str) -> String {
        let p = dir.join("vota_facil.json");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        p.display().to_string()
    }

    #[test]
    fn memory_store_from_config() {
        let source = StoreSource {
            provider: "memory".to_string(),
            ..StoreSource::default()
        };
        let store = build_store(&source, Path::new(".")).unwrap();
        assert!(store.read_all().unwrap().is_empty());
    }

    #[test]
    fn sheets_store_requires_spreadsheet_id() {
        let source = StoreSource {
            provider: "sheets".to_string(),
            access_token: Some("tok".to_string()),
            ..StoreSource::default()
        };
        let err = build_store(&source, Path::new(".")).err().unwrap();
        assert!(matches!(err, PollError::MissingKey { .. }), "{:?}", err);
    }

    #[test]
    fn sheets_store_requires_credentials() {
        let source = StoreSource {
            provider: "sheets".to_string(),
            spreadsheet_id: Some("sheet-1".to_string()),
            ..StoreSource::default()
        };
        let err = build_store(&source, Path::new(".")).err().unwrap();
        assert!(matches!(err, PollError::MissingKey { .. }), "{:?}", err);
    }

    #[test]
    fn missing_credentials_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = StoreSource {
            provider: "sheets".to_string(),
            spreadsheet_id: Some("sheet-1".to_string()),
            credentials_path: Some("nope.json".to_string()),
            ..StoreSource::default()
        };
        let err = build_store(&source, dir.path()).err().unwrap();
        assert!(matches!(err, PollError::ReadingCredentials { .. }), "{:?}", err);
    }

    #[test]
    fn malformed_private_key_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let key = r#"{"client_email": "poll@example.iam.gserviceaccount.com", "private_key": "not a key"}"#;
        fs::write(dir.path().join("sa.json"), key).unwrap();
        let source = StoreSource {
            provider: "sheets".to_string(),
            spreadsheet_id: Some("sheet-1".to_string()),
            credentials_path: Some("sa.json".to_string()),
            ..StoreSource::default()
        };
        let err = build_store(&source, dir.path()).err().unwrap();
        assert!(matches!(err, PollError::InvalidCredentials { .. }), "{:?}", err);
    }

    #[test]
    fn unknown_provider_is_fatal() {
        let source = StoreSource {
            provider: "postgres".to_string(),
            ..StoreSource::default()
        };
        let err = build_store(&source, Path::new(".")).err().unwrap();
        assert!(matches!(err, PollError::UnknownProvider { .. }), "{:?}", err);
    }

    #[test]
    fn run_app_stops_on_invalid_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"title": "t", "options": [], "store": {"provider": "memory"}}"#,
        );
        let err = run_app(path).err().unwrap();
        assert!(matches!(err, PollError::InvalidPoll { .. }), "{:?}", err);
    }
}
