use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method, Url};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::debug;

use crate::canvas::model::{DiscussionKind, EndTask, EnrollmentParams};
use crate::config::Config;
use crate::pagination::{LinkRelations, ListRequest};
use crate::progress::{Message, ProgressSink};

pub mod model;

/// One item returned by a listing endpoint. Field semantics belong to the
/// caller; the client only ever lifts out an `id`.
pub type Record = Map<String, Value>;

/// HTTP client for one Canvas instance. Authentication rides on the host
/// session cookie; mutations additionally need the CSRF token Canvas stores
/// in the `_csrf_token` cookie.
#[derive(Clone)]
pub struct CanvasClient {
    http: Client,
    base_url: Url,
    cookie: String,
    csrf_token: Option<String>,
    per_page: u32,
}

impl fmt::Debug for CanvasClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanvasClient")
            .field("base_url", &self.base_url)
            .field("per_page", &self.per_page)
            .finish_non_exhaustive()
    }
}

static CSRF_COOKIE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|;)\s*_csrf_token=([^;]*)").expect("valid cookie regex"));

/// Extract and percent-decode the CSRF token from a session cookie string.
pub fn csrf_token_from_cookie(cookie: &str) -> Option<String> {
    let raw = CSRF_COOKIE.captures(cookie)?.get(1)?.as_str();
    if raw.is_empty() {
        return None;
    }
    Some(percent_decode(raw))
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| value.to_string())
}

impl CanvasClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.canvas.base_url).context("invalid canvas.base_url")?;
        Ok(Self::new(base_url, cfg.canvas.cookie.clone(), cfg.app.per_page))
    }

    pub fn new(base_url: Url, cookie: String, per_page: u32) -> Self {
        let http = Client::builder()
            .user_agent("canvas-batch/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        let csrf_token = csrf_token_from_cookie(&cookie);
        Self {
            http,
            base_url,
            cookie,
            csrf_token,
            per_page,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetch an entire collection, following `next` links until the server
    /// stops offering one (or offers a self-loop). Best-effort: any failure
    /// reports one `Error` message and returns whatever was accumulated so
    /// far instead of bubbling up.
    pub async fn fetch_all(
        &self,
        request: &ListRequest,
        sink: &mut dyn ProgressSink,
    ) -> Vec<Record> {
        let mut url = match request.resolve(&self.base_url, self.per_page) {
            Ok(url) => url,
            Err(err) => {
                sink.report(Message::error(format!("ERROR: {err:#}")));
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            sink.report(Message::info(format!("Getting page {page}...")));
            let links = match self.fetch_page(&url, &mut records).await {
                Ok(links) => links,
                Err(err) => {
                    sink.report(Message::error(format!(
                        "ERROR: failed to fetch {url}: {err:#}"
                    )));
                    return records;
                }
            };
            if !links.has_next() {
                break;
            }
            let next = links.next.as_deref().unwrap_or_default();
            url = match Url::parse(next) {
                Ok(url) => url,
                Err(err) => {
                    sink.report(Message::error(format!(
                        "ERROR: invalid next link '{next}': {err}"
                    )));
                    return records;
                }
            };
            page += 1;
        }
        sink.report(Message::success(format!(
            "Finished loading {} records",
            records.len()
        )));
        records
    }

    async fn fetch_page(&self, url: &Url, records: &mut Vec<Record>) -> Result<LinkRelations> {
        debug!(%url, "fetching page");
        let res = self
            .http
            .get(url.clone())
            .header("Accept", "application/json")
            .header("Cookie", &self.cookie)
            .send()
            .await
            .context("request failed")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("status {status}: {body}");
        }
        let links = res
            .headers()
            .get("link")
            .and_then(|value| value.to_str().ok())
            .map(|header| LinkRelations::parse(header, url))
            .unwrap_or_default();
        let page: Vec<Record> = res.json().await.context("invalid JSON page body")?;
        records.extend(page);
        Ok(links)
    }

    /// Publish one course (`{"course":{"event":"offer"}}`).
    pub async fn publish_course(&self, course_id: &str) -> Result<()> {
        let url = self.api_url(&format!("api/v1/courses/{course_id}"))?;
        self.mutate(Method::PUT, url, Some(json!({ "course": { "event": "offer" } })))
            .await
    }

    /// Switch a discussion topic between threaded and not-threaded replies.
    pub async fn update_discussion_type(
        &self,
        course_id: &str,
        topic_id: &str,
        kind: DiscussionKind,
    ) -> Result<()> {
        let url = self.api_url(&format!(
            "api/v1/courses/{course_id}/discussion_topics/{topic_id}"
        ))?;
        self.mutate(
            Method::PUT,
            url,
            Some(json!({ "discussion_type": kind.as_str() })),
        )
        .await
    }

    /// Conclude, delete, or inactivate an active enrollment.
    pub async fn end_enrollment(
        &self,
        course_id: &str,
        enrollment_id: &str,
        task: EndTask,
    ) -> Result<()> {
        let url = self.api_url(&format!(
            "api/v1/courses/{course_id}/enrollments/{enrollment_id}"
        ))?;
        self.mutate(Method::DELETE, url, Some(json!({ "task": task.as_str() })))
            .await
    }

    /// Reactivate an inactive enrollment.
    pub async fn reactivate_enrollment(&self, course_id: &str, enrollment_id: &str) -> Result<()> {
        let url = self.api_url(&format!(
            "api/v1/courses/{course_id}/enrollments/{enrollment_id}/reactivate"
        ))?;
        self.mutate(Method::PUT, url, None).await
    }

    /// Re-enroll a user whose enrollment was completed or deleted.
    pub async fn add_enrollment(&self, course_id: &str, params: &EnrollmentParams) -> Result<()> {
        let url = self.api_url(&format!("api/v1/courses/{course_id}/enrollments"))?;
        self.mutate(
            Method::POST,
            url,
            Some(json!({ "enrollment": params })),
        )
        .await
    }

    /// Fetch one user's profile record.
    pub async fn user_profile(&self, user_id: &str) -> Result<Record> {
        let url = self.api_url(&format!("api/v1/users/{user_id}/profile"))?;
        let res = self
            .http
            .get(url.clone())
            .header("Accept", "application/json")
            .header("Cookie", &self.cookie)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("request failed: {url} status: {status} {body}");
        }
        res.json().await.context("invalid profile JSON")
    }

    async fn mutate(&self, method: Method, url: Url, body: Option<Value>) -> Result<()> {
        let token = self
            .csrf_token
            .as_deref()
            .ok_or_else(|| anyhow!("no _csrf_token cookie available; mutations require one"))?;
        let mut request = self
            .http
            .request(method, url.clone())
            .header("X-CSRF-Token", token)
            .header("Accept", "application/json")
            .header("Cookie", &self.cookie);
        if let Some(body) = &body {
            request = request
                .header("Content-Type", "application/json")
                .json(body);
        }
        let res = request
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("request failed: {url} status: {status} {body}");
        }
        Ok(())
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid request path '{path}'"))
    }
}

/// Unpublished courses of an account, filtered by the course search UI's
/// criteria.
pub fn account_courses(account_id: &str) -> ListRequest {
    ListRequest::new(format!("api/v1/accounts/{account_id}/courses"))
        .query("published", "false")
}

/// All discussion topics of a course.
pub fn course_discussions(course_id: &str) -> ListRequest {
    ListRequest::new(format!("api/v1/courses/{course_id}/discussion_topics"))
}

/// Enrollments of one role and state in a course.
pub fn course_enrollments(course_id: &str, role_type: &str, state: &str) -> ListRequest {
    ListRequest::new(format!("api/v1/courses/{course_id}/enrollments"))
        .query("type[]", role_type)
        .query("state[]", state)
        .query("include[]", "email")
}

/// Enrollments of one role and state in a section.
pub fn section_enrollments(section_id: &str, role_type: &str, state: &str) -> ListRequest {
    ListRequest::new(format!("api/v1/sections/{section_id}/enrollments"))
        .query("type[]", role_type)
        .query("state[]", state)
        .query("include[]", "email")
}
