//! The voting page.
//!
//! Every visitor gets a `vota_session` cookie naming their session. The page
//! is rendered on the server; option buttons and the confirmation dialog are
//! plain forms that post back and get redirected to `/`.
//!
//! A session is only stored once its visitor picks an option. Stored
//! sessions not seen for [`SESSION_IDLE_SECONDS`] (or the cooldown, if
//! longer) are forgotten.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info, warn};
use poll_flow::flow::{Outcome, SessionState};
use poll_flow::store::{StoreError, VoteStore};
use poll_flow::{compute_tally, FlowErrors, Poll, Tally, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::poll::*;

pub const SESSION_COOKIE: &str = "vota_session";
pub const SESSION_IDLE_SECONDS: u64 = 3600;

/// Source of "now" for the cooldown gate.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Static page content.
#[derive(Debug, Clone)]
pub struct PageSettings {
    pub title: String,
    pub share_url: String,
    pub qr_svg: String,
}

// Shown once, on the next page render.
#[derive(Debug, Clone, PartialEq)]
enum Notice {
    Voted(String),
    Failed(String),
}

#[derive(Debug, Default)]
struct WebSession {
    flow: SessionState,
    notice: Option<Notice>,
    // A confirm is waiting on the store.
    confirming: bool,
}

struct SessionEntry {
    session: Arc<Mutex<WebSession>>,
    last_seen: Timestamp,
}

type Sessions = Mutex<HashMap<String, SessionEntry>>;

#[derive(Clone)]
pub struct AppState {
    poll: Arc<Poll>,
    store: Arc<dyn VoteStore>,
    clock: Arc<dyn Clock>,
    page: Arc<PageSettings>,
    sessions: Arc<Sessions>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    pub fn new(
        poll: Poll,
        store: Arc<dyn VoteStore>,
        clock: Arc<dyn Clock>,
        page: PageSettings,
    ) -> AppState {
        AppState {
            poll: Arc::new(poll),
            store,
            clock,
            page: Arc::new(page),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn idle_limit(&self) -> f64 {
        SESSION_IDLE_SECONDS.max(self.poll.rules().cooldown_seconds) as f64
    }

    /// The stored session for `id`, if it is still live. Marks it as seen.
    fn find_session(&self, id: &str, now: Timestamp) -> Option<Arc<Mutex<WebSession>>> {
        let limit = self.idle_limit();
        let mut sessions = lock(&self.sessions);
        match sessions.get_mut(id) {
            None => return None,
            Some(entry) if now.seconds_since(entry.last_seen) < limit => {
                entry.last_seen = now;
                return Some(entry.session.clone());
            }
            Some(_) => {}
        }
        sessions.remove(id);
        debug!("find_session: session {} expired", id);
        None
    }

    /// The stored session for `id`, created if missing.
    ///
    /// Idle sessions are swept each time one is created.
    fn session_or_insert(&self, id: &str, now: Timestamp) -> Arc<Mutex<WebSession>> {
        if let Some(s) = self.find_session(id, now) {
            return s;
        }
        let limit = self.idle_limit();
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, e| now.seconds_since(e.last_seen) < limit);
        if sessions.len() < before {
            debug!("session_or_insert: forgot {} idle sessions", before - sessions.len());
        }
        debug!("session_or_insert: new session {}", id);
        let entry = sessions
            .entry(id.to_string())
            .or_insert_with(|| SessionEntry {
                session: Arc::new(Mutex::new(WebSession::default())),
                last_seen: now,
            });
        entry.last_seen = now;
        entry.session.clone()
    }

    async fn read_tally(&self) -> Result<Tally, StoreError> {
        let store = self.store.clone();
        let rows = tokio::task::spawn_blocking(move || store.read_all())
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))??;
        Ok(compute_tally(&rows, self.poll.options()))
    }
}

/// Who is asking: the session id from the cookie, or a fresh one to hand out.
struct Visitor {
    id: String,
    new_cookie: bool,
}

impl Visitor {
    fn from_headers(headers: &HeaderMap) -> Visitor {
        match session_id(headers).filter(|id| Uuid::parse_str(id).is_ok()) {
            Some(id) => Visitor {
                id,
                new_cookie: false,
            },
            None => Visitor {
                id: Uuid::new_v4().to_string(),
                new_cookie: true,
            },
        }
    }

    /// The id to set as a cookie on the response, if any.
    fn cookie(&self) -> Option<String> {
        if self.new_cookie {
            Some(self.id.clone())
        } else {
            None
        }
    }
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

fn with_cookie(mut resp: Response, new_id: Option<String>) -> Response {
    if let Some(id) = new_id {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
        if let Ok(v) = HeaderValue::from_str(&cookie) {
            resp.headers_mut().insert(header::SET_COOKIE, v);
        }
    }
    resp
}

fn back_to_page(new_id: Option<String>) -> Response {
    with_cookie(Redirect::to("/").into_response(), new_id)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/select", post(select_handler))
        .route("/confirm", post(confirm_handler))
        .route("/cancel", post(cancel_handler))
        .route("/results", get(results_handler))
        .route("/qr", get(qr_page_handler))
        .route("/qr.svg", get(qr_image_handler))
        .with_state(state)
}

pub async fn serve(state: AppState, address: &str) -> PollResult<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .context(BindingSnafu { address })?;
    info!("Serving the poll on http://{}", address);
    axum::serve(listener, router(state))
        .await
        .context(ServingSnafu {})
}

#[derive(Debug, Deserialize)]
struct SelectForm {
    option: String,
}

async fn select_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SelectForm>,
) -> Response {
    let visitor = Visitor::from_headers(&headers);
    if state.poll.option(&form.option).is_none() {
        let e = FlowErrors::UnknownOption(form.option.clone());
        warn!("select: rejected {:?}: {}", form.option, e);
        return with_cookie(
            (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            visitor.cookie(),
        );
    }
    let now = state.clock.now();
    let session = state.session_or_insert(&visitor.id, now);
    let res = lock(&session).flow.activate(&state.poll, &form.option, now);
    match res {
        Ok(_) => back_to_page(visitor.cookie()),
        Err(e) => {
            warn!("select: rejected {:?}: {}", form.option, e);
            with_cookie(
                (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
                visitor.cookie(),
            )
        }
    }
}

async fn confirm_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let now = state.clock.now();
    let session = match state.find_session(&visitor.id, now) {
        Some(session) => session,
        None => return back_to_page(visitor.cookie()),
    };
    // The session is not locked while the append runs.
    let mut flow = {
        let mut s = lock(&session);
        if s.confirming {
            debug!("confirm: session {} already waiting on the store", visitor.id);
            return back_to_page(visitor.cookie());
        }
        s.confirming = true;
        s.flow.clone()
    };
    let poll = state.poll.clone();
    let store = state.store.clone();
    let res = tokio::task::spawn_blocking(move || {
        let res = flow.confirm(&poll, store.as_ref(), now);
        (flow, res)
    })
    .await;

    let done = {
        let mut s = lock(&session);
        s.confirming = false;
        match res {
            Ok((flow, Ok(Outcome::Voted(record)))) => {
                // Anything picked during the append is dropped with the vote in.
                s.flow = flow;
                s.notice = Some(Notice::Voted(record.option));
                true
            }
            Ok((_, Ok(_))) => true,
            Ok((_, Err(e))) => {
                s.notice = Some(Notice::Failed(e.to_string()));
                true
            }
            Err(e) => {
                warn!("confirm: worker failed: {}", e);
                false
            }
        }
    };
    if done {
        back_to_page(visitor.cookie())
    } else {
        with_cookie(
            StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            visitor.cookie(),
        )
    }
}

async fn cancel_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    if let Some(session) = state.find_session(&visitor.id, state.clock.now()) {
        lock(&session).flow.cancel();
    }
    back_to_page(visitor.cookie())
}

// Everything the page shows about one session, taken under the lock.
struct SessionView {
    selected: Option<String>,
    remaining_seconds: Option<i64>,
    notice: Option<Notice>,
}

impl SessionView {
    fn new(flow: &SessionState, notice: Option<Notice>, poll: &Poll, now: Timestamp) -> SessionView {
        SessionView {
            selected: flow.selected_option().map(|o| o.to_string()),
            remaining_seconds: if flow.is_blocked(poll, now) {
                Some(flow.remaining_seconds(poll, now))
            } else {
                None
            },
            notice,
        }
    }
}

async fn index_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let now = state.clock.now();
    let view = match state.find_session(&visitor.id, now) {
        Some(session) => {
            let mut s = lock(&session);
            let notice = s.notice.take();
            SessionView::new(&s.flow, notice, &state.poll, now)
        }
        None => SessionView::new(&SessionState::new(), None, &state.poll, now),
    };
    let tally = state.read_tally().await;
    if let Err(e) = &tally {
        warn!("index: could not read the tally: {}", e);
    }
    let body = render_page(&state.page, &state.poll, &view, &tally);
    with_cookie(Html(body).into_response(), visitor.cookie())
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ResultEntry {
    pub option: String,
    pub count: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ResultsBody {
    pub total: u64,
    pub tally: Vec<ResultEntry>,
}

async fn results_handler(State(state): State<AppState>) -> Response {
    match state.read_tally().await {
        Ok(t) => Json(ResultsBody {
            total: t.total(),
            tally: t
                .counts
                .into_iter()
                .map(|(option, count)| ResultEntry { option, count })
                .collect(),
        })
        .into_response(),
        Err(e) => {
            warn!("results: could not read the tally: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn qr_image_handler(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "image/svg+xml")],
        state.page.qr_svg.clone(),
    )
        .into_response()
}

async fn qr_page_handler(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>QR code: {title}</title>{style}</head><body class=\"qr\">\
         <h2>&#128241; Point your phone camera here to vote</h2>\
         <img src=\"/qr.svg\" alt=\"{url}\">\
         <p><a href=\"/\">Back to the poll</a></p></body></html>",
        title = escape_html(&state.page.title),
        style = STYLE,
        url = escape_html(&state.page.share_url),
    ))
}

// ********* Rendering **********

const STYLE: &str = "<style>\
body { font-family: sans-serif; max-width: 42rem; margin: 2rem auto; padding: 0 1rem; }\
button { width: 100%; height: 70px; padding: 10px 0; margin: 4px 0; font-size: 1.1rem; }\
.info { background: #e8f0fe; padding: .75rem; }\
.success { background: #e6f4ea; padding: .75rem; }\
.error { background: #fce8e6; padding: .75rem; }\
.bar { background: #4c78a8; color: white; padding: 2px 6px; white-space: nowrap; }\
dialog { width: 90%; max-width: 32rem; }\
.qr img { width: 100%; }\
</style>";

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn render_page(
    page: &PageSettings,
    poll: &Poll,
    view: &SessionView,
    tally: &Result<Tally, StoreError>,
) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title>{style}</head><body>\n<h1>{title}</h1>\n",
        title = escape_html(&page.title),
        style = STYLE,
    );

    match &view.notice {
        Some(Notice::Voted(option)) => {
            let _ = writeln!(
                html,
                "<p class=\"success\">Vote confirmed for <strong>{}</strong>!</p>",
                escape_html(option)
            );
        }
        Some(Notice::Failed(message)) => {
            let _ = writeln!(
                html,
                "<p class=\"error\">Your vote could not be recorded: {}. Please try again.</p>",
                escape_html(message)
            );
        }
        None => {}
    }

    html.push_str("<h2>Choose your option:</h2>\n");
    if let Some(remaining) = view.remaining_seconds {
        let _ = writeln!(
            html,
            "<p class=\"info\">Wait {} seconds to vote again.</p>",
            remaining
        );
    }
    let disabled = if view.remaining_seconds.is_some() {
        " disabled"
    } else {
        ""
    };
    html.push_str("<form method=\"post\" action=\"/select\">\n");
    for o in poll.options() {
        let _ = writeln!(
            html,
            "<button type=\"submit\" name=\"option\" value=\"{name}\"{disabled}>{name}</button>",
            name = escape_html(&o.name),
            disabled = disabled,
        );
    }
    html.push_str("</form>\n");

    if let Some(option) = &view.selected {
        let description = poll
            .option(option)
            .map(|o| o.description.as_str())
            .unwrap_or("");
        let _ = writeln!(
            html,
            "<dialog open><h2>Confirm vote</h2>\
             <h3>You chose: <strong>{name}</strong></h3><p>{description}</p>\
             <p>If you are sure, confirm your vote below.</p>\
             <form method=\"post\" action=\"/confirm\"><button type=\"submit\">&#10004;&#65039; Confirm</button></form>\
             <form method=\"post\" action=\"/cancel\"><button type=\"submit\">&#10060; Choose another</button></form>\
             </dialog>",
            name = escape_html(option),
            description = escape_html(description),
        );
    }

    html.push_str("<hr>\n<h2>&#128202; Partial results</h2>\n");
    match tally {
        Ok(t) if t.is_empty() => html.push_str("<p>No votes yet.</p>\n"),
        Ok(t) => {
            let max = t.counts.iter().map(|(_, c)| *c).max().unwrap_or(1).max(1);
            html.push_str("<table class=\"tally\">\n");
            for (name, count) in t.counts.iter() {
                let width = (*count * 100) / max;
                let _ = writeln!(
                    html,
                    "<tr><td>{name}</td><td style=\"width:100%\">\
                     <div class=\"bar\" style=\"width:{width}%\">{count}</div></td></tr>",
                    name = escape_html(name),
                    width = width,
                    count = count,
                );
            }
            html.push_str("</table>\n");
        }
        Err(e) => {
            let _ = writeln!(
                html,
                "<p class=\"error\">Results are unavailable right now: {}</p>",
                escape_html(&e.to_string())
            );
        }
    }

    let _ = write!(
        html,
        "<hr>\n<h2>&#128241; Share with the audience</h2>\n\
         <p><a href=\"/qr\"><button type=\"button\">Show QR code full screen</button></a></p>\n\
         <p>{url}</p>\n</body></html>\n",
        url = escape_html(&page.share_url),
    );
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use poll_flow::builder::Builder;
    use poll_flow::store::MemoryStore;
    use poll_flow::{PollRules, VoteRecord};
    use std::sync::mpsc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct ManualClock(Mutex<f64>);

    impl ManualClock {
        fn set(&self, t: f64) {
            *lock(&self.0) = t;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Timestamp {
            Timestamp(*lock(&self.0))
        }
    }

    struct DownStore;

    impl VoteStore for DownStore {
        fn append(&self, _record: &VoteRecord) -> Result<(), StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }

        fn read_all(&self) -> Result<Vec<VoteRecord>, StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }
    }

    fn poll() -> Poll {
        Builder::new(&PollRules::DEFAULT_RULES)
            .and_then(|b| b.option("Alumia", "<Descricao Alumia>"))
            .and_then(|b| b.option("Lumia", "Light"))
            .and_then(|b| b.option("Luzia", "Glow"))
            .and_then(|b| b.build())
            .unwrap()
    }

    // Holds every append until `release` is signalled.
    struct GatedStore {
        inner: MemoryStore,
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl VoteStore for GatedStore {
        fn append(&self, record: &VoteRecord) -> Result<(), StoreError> {
            let _ = lock(&self.started).send(());
            let _ = lock(&self.release).recv();
            self.inner.append(record)
        }

        fn read_all(&self) -> Result<Vec<VoteRecord>, StoreError> {
            self.inner.read_all()
        }
    }

    fn app_state(store: Arc<dyn VoteStore>, clock: Arc<ManualClock>) -> AppState {
        let page = PageSettings {
            title: "Name the project".to_string(),
            share_url: "http://localhost:8501".to_string(),
            qr_svg: "<svg></svg>".to_string(),
        };
        AppState::new(poll(), store, clock, page)
    }

    fn app(store: Arc<dyn VoteStore>, clock: Arc<ManualClock>) -> Router {
        router(app_state(store, clock))
    }

    fn stored_sessions(state: &AppState) -> usize {
        lock(&state.sessions).len()
    }

    fn cookie_of(resp: &Response) -> String {
        resp.headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.to_string())
            .unwrap()
    }

    async fn body_of(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get_page(app: &Router, cookie: &str) -> String {
        let req = Request::get("/")
            .header(header::COOKIE, cookie)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        body_of(resp).await
    }

    async fn post(app: &Router, uri: &str, cookie: &str, form: &str) -> Response {
        let req = Request::post(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    async fn new_session(app: &Router) -> String {
        let req = Request::get("/").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        cookie_of(&resp)
    }

    #[tokio::test]
    async fn first_visit_gets_a_session_and_empty_results() {
        let app = app(Arc::new(MemoryStore::new()), Arc::new(ManualClock(Mutex::new(100.0))));
        let req = Request::get("/").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(cookie_of(&resp).starts_with("vota_session="));
        let body = body_of(resp).await;
        assert!(body.contains("<h1>Name the project</h1>"));
        assert!(body.contains("value=\"Lumia\">Lumia</button>"));
        assert!(body.contains("No votes yet."));
        assert!(!body.contains("<dialog"));
        assert!(!body.contains(" disabled"));
    }

    #[tokio::test]
    async fn select_confirm_then_cooldown() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock(Mutex::new(100.0)));
        let app = app(store.clone(), clock.clone());
        let cookie = new_session(&app).await;

        let resp = post(&app, "/select", &cookie, "option=Lumia").await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let body = get_page(&app, &cookie).await;
        assert!(body.contains("You chose: <strong>Lumia</strong>"));
        assert!(body.contains("<p>Light</p>"));
        assert!(store.is_empty());

        let resp = post(&app, "/confirm", &cookie, "").await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let rows = store.read_all().unwrap();
        assert_eq!(rows, vec![VoteRecord::new(Timestamp(100.0), "Lumia").unwrap()]);

        clock.set(105.0);
        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Vote confirmed for <strong>Lumia</strong>!"));
        assert!(body.contains("Wait 5 seconds to vote again."));
        assert!(body.contains("value=\"Alumia\" disabled>"));
        assert!(!body.contains("<dialog"));
        assert!(body.contains("<div class=\"bar\" style=\"width:100%\">1</div>"));

        // The notice is shown once.
        let body = get_page(&app, &cookie).await;
        assert!(!body.contains("Vote confirmed"));

        // Pressing a button while blocked does nothing.
        post(&app, "/select", &cookie, "option=Luzia").await;
        let body = get_page(&app, &cookie).await;
        assert!(!body.contains("<dialog"));

        clock.set(111.0);
        let body = get_page(&app, &cookie).await;
        assert!(!body.contains("Wait "));
        assert!(!body.contains(" disabled"));
    }

    #[tokio::test]
    async fn cancel_closes_the_dialog_without_voting() {
        let store = Arc::new(MemoryStore::new());
        let app = app(store.clone(), Arc::new(ManualClock(Mutex::new(100.0))));
        let cookie = new_session(&app).await;
        post(&app, "/select", &cookie, "option=Alumia").await;
        let resp = post(&app, "/cancel", &cookie, "").await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        let body = get_page(&app, &cookie).await;
        assert!(!body.contains("<dialog"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let app = app(store.clone(), Arc::new(ManualClock(Mutex::new(100.0))));
        let a = new_session(&app).await;
        let b = new_session(&app).await;
        assert_ne!(a, b);
        post(&app, "/select", &a, "option=Alumia").await;
        post(&app, "/confirm", &a, "").await;

        let body = get_page(&app, &b).await;
        assert!(!body.contains("Wait "));
        post(&app, "/select", &b, "option=Luzia").await;
        post(&app, "/confirm", &b, "").await;
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn unknown_option_is_a_bad_request() {
        let app = app(Arc::new(MemoryStore::new()), Arc::new(ManualClock(Mutex::new(100.0))));
        let cookie = new_session(&app).await;
        let resp = post(&app, "/select", &cookie, "option=Nobody").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = get_page(&app, &cookie).await;
        assert!(!body.contains("<dialog"));
    }

    #[tokio::test]
    async fn store_failure_keeps_the_dialog_open() {
        let app = app(Arc::new(DownStore), Arc::new(ManualClock(Mutex::new(100.0))));
        let cookie = new_session(&app).await;
        post(&app, "/select", &cookie, "option=Lumia").await;
        let resp = post(&app, "/confirm", &cookie, "").await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Your vote could not be recorded"));
        assert!(body.contains("You chose: <strong>Lumia</strong>"));
        assert!(!body.contains("Wait "));
        // A read failure is not an empty poll.
        assert!(body.contains("Results are unavailable right now"));
        assert!(!body.contains("No votes yet."));
    }

    #[tokio::test]
    async fn visitors_without_a_choice_store_nothing() {
        let state = app_state(Arc::new(MemoryStore::new()), Arc::new(ManualClock(Mutex::new(100.0))));
        let app = router(state.clone());
        for _ in 0..100 {
            let req = Request::get("/").body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            for uri in ["/cancel", "/confirm"] {
                let req = Request::post(uri).body(Body::empty()).unwrap();
                let resp = app.clone().oneshot(req).await.unwrap();
                assert_eq!(resp.status(), StatusCode::SEE_OTHER);
            }
            let resp = post(&app, "/select", "vota_session=not-a-uuid", "option=Nobody").await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert_eq!(stored_sessions(&state), 0);

        // A cookie that is not a session id is replaced.
        let resp = post(&app, "/cancel", "vota_session=not-a-uuid", "").await;
        assert!(cookie_of(&resp).starts_with("vota_session="));
        assert_ne!(cookie_of(&resp), "vota_session=not-a-uuid");
    }

    #[tokio::test]
    async fn idle_sessions_are_forgotten() {
        let clock = Arc::new(ManualClock(Mutex::new(100.0)));
        let state = app_state(Arc::new(MemoryStore::new()), clock.clone());
        let app = router(state.clone());
        let mut cookies = Vec::new();
        for _ in 0..50 {
            let cookie = new_session(&app).await;
            post(&app, "/select", &cookie, "option=Lumia").await;
            cookies.push(cookie);
        }
        assert_eq!(stored_sessions(&state), 50);

        // One visitor keeps coming back.
        clock.set(3000.0);
        let body = get_page(&app, &cookies[0]).await;
        assert!(body.contains("You chose: <strong>Lumia</strong>"));

        clock.set(100.0 + SESSION_IDLE_SECONDS as f64);
        let newcomer = new_session(&app).await;
        post(&app, "/select", &newcomer, "option=Luzia").await;
        assert_eq!(stored_sessions(&state), 2);

        let body = get_page(&app, &cookies[0]).await;
        assert!(body.contains("You chose: <strong>Lumia</strong>"));
        let body = get_page(&app, &cookies[1]).await;
        assert!(!body.contains("<dialog"));
    }

    #[tokio::test]
    async fn page_stays_usable_while_a_vote_is_being_recorded() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        let app = app(store.clone(), Arc::new(ManualClock(Mutex::new(100.0))));
        let cookie = new_session(&app).await;
        post(&app, "/select", &cookie, "option=Lumia").await;

        let confirm = tokio::spawn({
            let app = app.clone();
            let cookie = cookie.clone();
            async move { post(&app, "/confirm", &cookie, "").await.status() }
        });
        tokio::task::spawn_blocking(move || started_rx.recv())
            .await
            .unwrap()
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(5), get_page(&app, &cookie))
            .await
            .unwrap();
        assert!(body.contains("You chose: <strong>Lumia</strong>"));
        // A second confirm does not append again.
        let resp = tokio::time::timeout(Duration::from_secs(5), post(&app, "/confirm", &cookie, ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);

        release_tx.send(()).unwrap();
        drop(release_tx);
        assert_eq!(confirm.await.unwrap(), StatusCode::SEE_OTHER);
        assert_eq!(store.inner.len(), 1);
        let body = get_page(&app, &cookie).await;
        assert!(body.contains("Vote confirmed for <strong>Lumia</strong>!"));
        assert!(body.contains("Wait 10 seconds to vote again."));
    }

    #[tokio::test]
    async fn rows_for_unknown_options_show_an_empty_chart() {
        let store = Arc::new(MemoryStore::with_rows(vec![
            VoteRecord::new(Timestamp(1.0), "Zed").unwrap(),
        ]));
        let app = app(store, Arc::new(ManualClock(Mutex::new(100.0))));
        let cookie = new_session(&app).await;
        let body = get_page(&app, &cookie).await;
        assert!(!body.contains("No votes yet."));
        assert!(body.contains("<table class=\"tally\">"));
        assert!(body.contains("<div class=\"bar\" style=\"width:0%\">0</div>"));
    }

    #[tokio::test]
    async fn results_as_json() {
        let store = Arc::new(MemoryStore::with_rows(vec![
            VoteRecord::new(Timestamp(1.0), "Luzia").unwrap(),
            VoteRecord::new(Timestamp(2.0), "Alumia").unwrap(),
            VoteRecord::new(Timestamp(3.0), "Luzia").unwrap(),
        ]));
        let app = app(store, Arc::new(ManualClock(Mutex::new(100.0))));
        let req = Request::get("/results").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: ResultsBody = serde_json::from_str(&body_of(resp).await).unwrap();
        assert_eq!(body.total, 3);
        let counts: Vec<(&str, u64)> = body
            .tally
            .iter()
            .map(|e| (e.option.as_str(), e.count))
            .collect();
        assert_eq!(counts, vec![("Alumia", 1), ("Lumia", 0), ("Luzia", 2)]);
    }

    #[tokio::test]
    async fn results_report_store_errors() {
        let app = app(Arc::new(DownStore), Arc::new(ManualClock(Mutex::new(100.0))));
        let req = Request::get("/results").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn qr_image_and_page() {
        let app = app(Arc::new(MemoryStore::new()), Arc::new(ManualClock(Mutex::new(100.0))));
        let req = Request::get("/qr.svg").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/svg+xml"
        );
        assert_eq!(body_of(resp).await, "<svg></svg>");

        let req = Request::get("/qr").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let body = body_of(resp).await;
        assert!(body.contains("<img src=\"/qr.svg\""));
    }

    #[test]
    fn cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; vota_session=abc-123"),
        );
        assert_eq!(session_id(&headers), Some("abc-123".to_string()));
        assert_eq!(session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(
            escape_html("<b>\"A&B\"</b>"),
            "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;"
        );
    }
}
