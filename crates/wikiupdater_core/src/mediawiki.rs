//! Blocking MediaWiki API client and the read/write traits the runner talks to.

use std::env;
use std::str::FromStr;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::UpdaterConfig;

pub const NS_MAIN: i32 = 0;

/// Titles per `prop=revisions` query; larger lists are split.
const TITLES_PER_QUERY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveResult {
    pub title: String,
    pub new_revision_id: Option<i64>,
    pub no_change: bool,
}

pub trait WikiReadApi {
    /// Every non-redirect title in `namespace`.
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>>;
    /// Current text of the pages that exist among `titles`.
    fn get_page_contents(&mut self, titles: &[String]) -> Result<Vec<RemotePage>>;
    fn request_count(&self) -> usize;

    /// Text of one page, `None` when it does not exist.
    fn fetch_page(&mut self, title: &str) -> Result<Option<String>> {
        let pages = self.get_page_contents(&[title.to_string()])?;
        Ok(pages.into_iter().next().map(|page| page.content))
    }

    fn page_exists(&mut self, title: &str) -> Result<bool> {
        Ok(self.fetch_page(title)?.is_some())
    }
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn save_page(&mut self, title: &str, content: &str, summary: &str, tag: &str)
    -> Result<SaveResult>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub read_interval_ms: u64,
    pub write_interval_ms: u64,
    pub read_retries: usize,
    pub write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    /// Endpoint from the config file, HTTP tuning from `WIKI_HTTP_*` / `WIKI_RATE_LIMIT_*`.
    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_number("WIKI_HTTP_TIMEOUT_MS", 30_000),
            read_interval_ms: env_number("WIKI_RATE_LIMIT_READ", 300),
            write_interval_ms: env_number("WIKI_RATE_LIMIT_WRITE", 1_000),
            read_retries: env_number("WIKI_HTTP_RETRIES", 2),
            write_retries: env_number("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_number("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

/// Bot credentials from `WIKI_BOT_USER` / `WIKI_BOT_PASS`, when both are set.
pub fn bot_credentials() -> Option<(String, String)> {
    let user = env::var("WIKI_BOT_USER").ok()?.trim().to_string();
    let pass = env::var("WIKI_BOT_PASS").ok()?;
    if user.is_empty() || pass.is_empty() {
        return None;
    }
    Some((user, pass))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

pub struct MediaWikiClient {
    http: Client,
    endpoint: Url,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            http,
            endpoint,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn query<T: DeserializeOwned>(&mut self, params: &[(&str, &str)], what: &str) -> Result<T> {
        let payload = self.send(params, Access::Read)?;
        serde_json::from_value(payload).with_context(|| format!("failed to decode {what} response"))
    }

    fn post<T: DeserializeOwned>(&mut self, params: &[(&str, &str)], what: &str) -> Result<T> {
        let payload = self.send(params, Access::Write)?;
        serde_json::from_value(payload).with_context(|| format!("failed to decode {what} response"))
    }

    /// Reads go out as GET query strings and writes as POST forms. Both share
    /// the rate limiter and retry transient HTTP failures with backoff.
    fn send(&mut self, params: &[(&str, &str)], access: Access) -> Result<Value> {
        let form = with_format(params);
        let retries = match access {
            Access::Read => self.config.read_retries,
            Access::Write => self.config.write_retries,
        };

        let mut attempt = 0;
        loop {
            self.throttle(access);
            let request: RequestBuilder = match access {
                Access::Read => self.http.get(self.endpoint.clone()).query(&form),
                Access::Write => self.http.post(self.endpoint.clone()).form(&form),
            };
            match request.send() {
                Ok(response) if response.status().is_success() => {
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return api_payload(payload);
                }
                Ok(response) => {
                    let status = response.status();
                    if attempt >= retries || !is_transient_status(status) {
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                }
                Err(error) => {
                    if attempt >= retries || !is_transient_error(&error) {
                        return Err(error).context("failed to call MediaWiki API");
                    }
                }
            }
            self.backoff(attempt, access);
            attempt += 1;
        }
    }

    fn throttle(&mut self, access: Access) {
        let interval = Duration::from_millis(match access {
            Access::Read => self.config.read_interval_ms,
            Access::Write => self.config.write_interval_ms,
        });
        if let Some(last) = self.last_request_at
            && let Some(remaining) = interval.checked_sub(last.elapsed())
        {
            sleep(remaining);
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn backoff(&self, attempt: usize, access: Access) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let factor = if access == Access::Write { 2 } else { 1 };
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|now| u64::from(now.subsec_millis() % 100))
            .unwrap_or(0);
        let delay = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .saturating_mul(factor)
            .saturating_add(jitter);
        debug!(attempt, delay_ms = delay, "retrying MediaWiki request");
        sleep(Duration::from_millis(delay));
    }

    fn token(&mut self, kind: &str) -> Result<String> {
        let reply: TokensReply = self.query(
            &[("action", "query"), ("meta", "tokens"), ("type", kind)],
            "token",
        )?;
        let tokens = reply.query.tokens;
        let token = match kind {
            "login" => tokens.logintoken,
            _ => tokens.csrftoken,
        };
        token.ok_or_else(|| anyhow!("failed to get MediaWiki {kind} token"))
    }

    fn csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let token = self.token("csrf")?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_all_pages(&mut self, namespace: i32) -> Result<Vec<String>> {
        let namespace = namespace.to_string();
        let mut titles = Vec::new();
        let mut from: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query"),
                ("list", "allpages"),
                ("apnamespace", namespace.as_str()),
                ("apfilterredir", "nonredirects"),
                ("aplimit", "500"),
            ];
            if let Some(from) = from.as_deref() {
                params.push(("apcontinue", from));
            }
            let reply: AllPagesReply = self.query(&params, "allpages")?;
            titles.extend(reply.query.allpages.into_iter().map(|entry| entry.title));
            from = reply.continuation.and_then(|next| next.apcontinue);
            if from.is_none() {
                return Ok(titles);
            }
        }
    }

    fn get_page_contents(&mut self, titles: &[String]) -> Result<Vec<RemotePage>> {
        let mut pages = Vec::with_capacity(titles.len());
        for chunk in titles.chunks(TITLES_PER_QUERY) {
            let joined = chunk.join("|");
            let reply: RevisionsReply = self.query(
                &[
                    ("action", "query"),
                    ("titles", joined.as_str()),
                    ("prop", "revisions"),
                    ("rvprop", "content"),
                    ("rvslots", "main"),
                ],
                "page content",
            )?;
            pages.extend(reply.into_pages());
        }
        Ok(pages)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token = self.token("login")?;
        let reply: LoginReply = self.post(
            &[
                ("action", "login"),
                ("lgname", username),
                ("lgpassword", password),
                ("lgtoken", token.as_str()),
            ],
            "login",
        )?;
        if reply.login.result.as_deref() == Some("Success") {
            self.csrf_token = None;
            return Ok(());
        }
        let reason = reply
            .login
            .reason
            .or(reply.login.result)
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("MediaWiki login failed: {reason}")
    }

    fn save_page(
        &mut self,
        title: &str,
        content: &str,
        summary: &str,
        tag: &str,
    ) -> Result<SaveResult> {
        let token = self.csrf_token()?;
        let reply: EditReply = self.post(
            &[
                ("action", "edit"),
                ("title", title),
                ("text", content),
                ("summary", summary),
                ("tags", tag),
                ("bot", "1"),
                ("token", token.as_str()),
            ],
            "edit",
        )?;
        reply.into_save_result(title)
    }
}

fn with_format(params: &[(&str, &str)]) -> Vec<(String, String)> {
    [("format", "json"), ("formatversion", "2")]
        .iter()
        .chain(params.iter().filter(|(_, value)| !value.is_empty()))
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

/// Turn an `{"error": {...}}` body into an `Err`.
fn api_payload(payload: Value) -> Result<Value> {
    let Some(error) = payload.get("error") else {
        return Ok(payload);
    };
    let field = |name: &str, fallback: &'static str| {
        error
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };
    bail!(
        "MediaWiki API error [{}]: {}",
        field("code", "unknown_error"),
        field("info", "unknown info")
    )
}

fn env_number<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::INTERNAL_SERVER_ERROR)
}

fn is_transient_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct AllPagesReply {
    #[serde(default)]
    query: AllPagesQuery,
    #[serde(default, rename = "continue")]
    continuation: Option<AllPagesContinue>,
}

#[derive(Debug, Deserialize, Default)]
struct AllPagesQuery {
    #[serde(default)]
    allpages: Vec<TitleEntry>,
}

#[derive(Debug, Deserialize)]
struct AllPagesContinue {
    apcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleEntry {
    title: String,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionsReply {
    #[serde(default)]
    query: RevisionsQuery,
}

#[derive(Debug, Deserialize, Default)]
struct RevisionsQuery {
    #[serde(default)]
    pages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<Revision>,
}

#[derive(Debug, Deserialize)]
struct Revision {
    slots: Option<Slots>,
}

#[derive(Debug, Deserialize)]
struct Slots {
    main: Option<MainSlot>,
}

#[derive(Debug, Deserialize)]
struct MainSlot {
    content: String,
}

impl RevisionsReply {
    /// Existing pages with a main slot; missing titles are dropped.
    fn into_pages(self) -> impl Iterator<Item = RemotePage> {
        self.query
            .pages
            .into_iter()
            .filter(|page| !page.missing)
            .filter_map(|page| {
                let slot = page.revisions.into_iter().next()?.slots?.main?;
                Some(RemotePage {
                    title: page.title,
                    content: slot.content,
                })
            })
    }
}

#[derive(Debug, Deserialize, Default)]
struct TokensReply {
    #[serde(default)]
    query: TokensQuery,
}

#[derive(Debug, Deserialize, Default)]
struct TokensQuery {
    #[serde(default)]
    tokens: Tokens,
}

#[derive(Debug, Deserialize, Default)]
struct Tokens {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginReply {
    #[serde(default)]
    login: LoginOutcome,
}

#[derive(Debug, Deserialize, Default)]
struct LoginOutcome {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditReply {
    edit: Option<EditOutcome>,
}

#[derive(Debug, Deserialize, Default)]
struct EditOutcome {
    result: Option<String>,
    newrevid: Option<i64>,
    #[serde(default)]
    nochange: bool,
}

impl EditReply {
    fn into_save_result(self, title: &str) -> Result<SaveResult> {
        let edit = self
            .edit
            .ok_or_else(|| anyhow!("missing edit payload in API response"))?;
        match edit.result.as_deref() {
            Some("Success") => Ok(SaveResult {
                title: title.to_string(),
                new_revision_id: edit.newrevid,
                no_change: edit.nochange,
            }),
            other => bail!(
                "MediaWiki edit failed for {title}: {}",
                other.unwrap_or("unknown")
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use serde_json::json;

    use super::mock::MockApi;
    use super::{
        EditReply, RevisionsReply, WikiReadApi, api_payload, is_transient_status, with_format,
    };

    #[test]
    fn revisions_reply_skips_missing_and_slotless_pages() {
        let reply: RevisionsReply = serde_json::from_value(json!({
            "query": {
                "pages": [
                    {
                        "pageid": 1,
                        "ns": 0,
                        "title": "Axe",
                        "revisions": [{"slots": {"main": {"content": "{{Infobox item}}"}}}]
                    },
                    {"ns": 0, "title": "Ghost", "missing": true},
                    {"pageid": 3, "ns": 0, "title": "Empty", "revisions": []}
                ]
            }
        }))
        .expect("decode");
        let pages = reply.into_pages().collect::<Vec<_>>();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].title, "Axe");
        assert_eq!(pages[0].content, "{{Infobox item}}");
    }

    #[test]
    fn error_bodies_become_errors() {
        let error = api_payload(json!({
            "error": {"code": "badtoken", "info": "Invalid CSRF token."}
        }))
        .expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "MediaWiki API error [badtoken]: Invalid CSRF token."
        );
        assert!(api_payload(json!({"query": {}})).is_ok());
    }

    #[test]
    fn edit_reply_reports_nochange_and_failures() {
        let decode = |value| serde_json::from_value::<EditReply>(value).expect("decode");

        let result = decode(json!({"edit": {"result": "Success", "nochange": true}}))
            .into_save_result("Axe")
            .expect("saved");
        assert!(result.no_change);
        assert_eq!(result.new_revision_id, None);

        let result = decode(json!({"edit": {"result": "Success", "newrevid": 42}}))
            .into_save_result("Axe")
            .expect("saved");
        assert!(!result.no_change);
        assert_eq!(result.new_revision_id, Some(42));

        let error = decode(json!({"edit": {"result": "Failure"}}))
            .into_save_result("Axe")
            .expect_err("must fail");
        assert!(error.to_string().contains("MediaWiki edit failed for Axe"));
    }

    #[test]
    fn format_params_lead_and_empty_values_drop() {
        let form = with_format(&[("action", "query"), ("apcontinue", "")]);
        let keys = form.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["format", "formatversion", "action"]);
    }

    #[test]
    fn only_transient_statuses_are_retried() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::BAD_GATEWAY));
        assert!(is_transient_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }

    #[test]
    fn fetch_page_reads_through_page_contents() {
        let mut api = MockApi::with_pages(&[("Axe", "text")]);
        assert_eq!(api.fetch_page("Axe").expect("fetch").as_deref(), Some("text"));
        assert_eq!(api.fetch_page("Missing").expect("fetch"), None);
        assert!(api.page_exists("Axe").expect("exists"));
        assert_eq!(api.request_count(), 3);
    }
}
