//! Link-relation pagination primitives for the Canvas REST API.
//!
//! Canvas paginates every listing endpoint through a `Link` response header
//! whose relations (`next`, `prev`, `current`, `first`, `last`) carry
//! absolute URLs. [`LinkRelations`] parses one header value;
//! [`ListRequest`] builds the first request URL with the query
//! normalization the API expects.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

/// Relation-name-to-URL mapping parsed from a `Link` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkRelations {
    pub next: Option<String>,
    pub prev: Option<String>,
    pub current: Option<String>,
    pub first: Option<String>,
    pub last: Option<String>,
}

impl LinkRelations {
    /// Parse a header value of comma-separated `<url>; rel="name"` tokens.
    /// Unknown relation names are ignored. When the request URL's path uses
    /// the `.json` format-suffix convention, the suffix is re-applied to any
    /// parsed link that lost it, so every page keeps the same response
    /// format.
    pub fn parse(header: &str, request_url: &Url) -> Self {
        let mut relations = Self::default();
        for token in header.split(',') {
            let mut parts = token.split(';');
            let url = match parts.next() {
                Some(url) => url.trim().trim_start_matches('<').trim_end_matches('>'),
                None => continue,
            };
            let rel = match parts.next() {
                Some(rel) => rel.trim().trim_start_matches("rel=").trim_matches('"'),
                None => continue,
            };
            let slot = match rel {
                "next" => &mut relations.next,
                "prev" => &mut relations.prev,
                "current" => &mut relations.current,
                "first" => &mut relations.first,
                "last" => &mut relations.last,
                _ => continue,
            };
            *slot = Some(url.to_string());
        }
        if request_url.path().contains(".json") {
            relations.reapply_json_suffix();
        }
        relations
    }

    /// True when another page should be fetched: a `next` link exists and is
    /// not a self-loop back to `current`.
    pub fn has_next(&self) -> bool {
        match &self.next {
            Some(next) => self.current.as_ref() != Some(next),
            None => false,
        }
    }

    fn reapply_json_suffix(&mut self) {
        for slot in [
            &mut self.next,
            &mut self.prev,
            &mut self.current,
            &mut self.first,
            &mut self.last,
        ] {
            if let Some(url) = slot {
                let (path, query) = match url.split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (url.as_str(), None),
                };
                if !path.contains(".json") {
                    *slot = Some(match query {
                        Some(query) => format!("{path}.json?{query}"),
                        None => format!("{path}.json"),
                    });
                }
            }
        }
    }
}

static INDEXED_ARRAY_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\d+\]$").expect("valid indexed-param regex"));

/// One listing request: an API path plus query parameters, resolved against
/// the configured base URL right before the first page fetch.
#[derive(Debug, Clone)]
pub struct ListRequest {
    path: String,
    query: Vec<(String, String)>,
}

impl ListRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Build the first-page URL. Normalization mirrors what the listing
    /// endpoints expect:
    /// - empty-valued parameters are dropped,
    /// - any `page` parameter is dropped (it would conflict with the
    ///   cursor-driven paging of the `Link` header),
    /// - indexed array parameters (`state[0]`, `state[1]`, ...) become
    ///   repeated `state[]` parameters,
    /// - `per_page` is set last.
    ///
    /// The resolved URL must stay on the base URL's origin; anything else is
    /// a precondition failure, reported before any network call is made.
    pub fn resolve(&self, base: &Url, per_page: u32) -> Result<Url> {
        let mut url = base
            .join(&self.path)
            .with_context(|| format!("invalid request path '{}'", self.path))?;
        if url.scheme() != base.scheme()
            || url.host_str() != base.host_str()
            || url.port_or_known_default() != base.port_or_known_default()
        {
            bail!(
                "request URL {} is not same-origin with {}",
                url,
                base.as_str()
            );
        }

        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.extend(self.query.iter().cloned());

        url.query_pairs_mut().clear();
        {
            let mut serializer = url.query_pairs_mut();
            for (key, value) in &pairs {
                if value.is_empty() || key == "page" || key == "per_page" {
                    continue;
                }
                let key = INDEXED_ARRAY_PARAM.replace(key, "[]");
                serializer.append_pair(&key, value);
            }
            serializer.append_pair("per_page", &per_page.to_string());
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_url(path: &str) -> Url {
        Url::parse(&format!("https://school.instructure.com{path}")).unwrap()
    }

    #[test]
    fn parses_next_and_current() {
        let header = r#"<https://x/a?page=2>; rel="next", <https://x/a?page=1>; rel="current""#;
        let links = LinkRelations::parse(header, &request_url("/api/v1/a"));
        assert_eq!(links.next.as_deref(), Some("https://x/a?page=2"));
        assert_eq!(links.current.as_deref(), Some("https://x/a?page=1"));
        assert_eq!(links.prev, None);
        assert!(links.has_next());
    }

    #[test]
    fn parses_all_known_relations_and_skips_unknown() {
        let header = concat!(
            r#"<https://x/a?page=1>; rel="first", "#,
            r#"<https://x/a?page=3>; rel="last", "#,
            r#"<https://x/a?page=1>; rel="prev", "#,
            r#"<https://x/a?page=2>; rel="current", "#,
            r#"<https://x/a?page=9>; rel="bogus""#
        );
        let links = LinkRelations::parse(header, &request_url("/api/v1/a"));
        assert_eq!(links.first.as_deref(), Some("https://x/a?page=1"));
        assert_eq!(links.last.as_deref(), Some("https://x/a?page=3"));
        assert_eq!(links.prev.as_deref(), Some("https://x/a?page=1"));
        assert_eq!(links.current.as_deref(), Some("https://x/a?page=2"));
        assert_eq!(links.next, None);
        assert!(!links.has_next());
    }

    #[test]
    fn self_loop_next_is_not_a_next_page() {
        let header = r#"<https://x/a?page=1>; rel="next", <https://x/a?page=1>; rel="current""#;
        let links = LinkRelations::parse(header, &request_url("/api/v1/a"));
        assert!(!links.has_next());
    }

    #[test]
    fn next_without_current_counts_as_next_page() {
        let header = r#"<https://x/a?page=2>; rel="next""#;
        let links = LinkRelations::parse(header, &request_url("/api/v1/a"));
        assert!(links.has_next());
    }

    #[test]
    fn reapplies_json_suffix_when_request_used_it() {
        let header = r#"<https://x/a?page=2>; rel="next", <https://x/a.json?page=1>; rel="current""#;
        let links = LinkRelations::parse(header, &request_url("/api/v1/a.json"));
        assert_eq!(links.next.as_deref(), Some("https://x/a.json?page=2"));
        assert_eq!(links.current.as_deref(), Some("https://x/a.json?page=1"));
    }

    #[test]
    fn leaves_links_alone_without_json_suffix_convention() {
        let header = r#"<https://x/a?page=2>; rel="next""#;
        let links = LinkRelations::parse(header, &request_url("/api/v1/a"));
        assert_eq!(links.next.as_deref(), Some("https://x/a?page=2"));
    }

    #[test]
    fn resolve_appends_per_page() {
        let base = Url::parse("https://school.instructure.com/").unwrap();
        let url = ListRequest::new("api/v1/accounts/1/courses")
            .resolve(&base, 100)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://school.instructure.com/api/v1/accounts/1/courses?per_page=100"
        );
    }

    #[test]
    fn resolve_drops_empty_and_page_params() {
        let base = Url::parse("https://school.instructure.com/").unwrap();
        let url = ListRequest::new("api/v1/accounts/1/courses?search_term=&page=7")
            .query("published", "false")
            .resolve(&base, 50)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://school.instructure.com/api/v1/accounts/1/courses?published=false&per_page=50"
        );
    }

    #[test]
    fn resolve_rewrites_indexed_array_params() {
        let base = Url::parse("https://school.instructure.com/").unwrap();
        let url = ListRequest::new("api/v1/accounts/1/courses?enrollment_type[0]=teacher&enrollment_type[1]=ta")
            .resolve(&base, 100)
            .unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("enrollment_type[]".to_string(), "teacher".to_string()),
                ("enrollment_type[]".to_string(), "ta".to_string()),
                ("per_page".to_string(), "100".to_string()),
            ]
        );
    }

    #[test]
    fn resolve_rejects_cross_origin() {
        let base = Url::parse("https://school.instructure.com/").unwrap();
        let err = ListRequest::new("https://elsewhere.example.com/api/v1/courses")
            .resolve(&base, 100)
            .unwrap_err();
        assert!(err.to_string().contains("same-origin"));

        // same host on another port is a different origin
        let err = ListRequest::new("https://school.instructure.com:8443/api/v1/courses")
            .resolve(&base, 100)
            .unwrap_err();
        assert!(err.to_string().contains("same-origin"));

        let err = ListRequest::new("http://school.instructure.com/api/v1/courses")
            .resolve(&base, 100)
            .unwrap_err();
        assert!(err.to_string().contains("same-origin"));
    }

    #[test]
    fn resolve_accepts_explicit_default_port() {
        let base = Url::parse("https://school.instructure.com/").unwrap();
        let url = ListRequest::new("https://school.instructure.com:443/api/v1/courses")
            .resolve(&base, 100)
            .unwrap();
        assert_eq!(url.path(), "/api/v1/courses");
    }
}
