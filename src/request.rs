use std::collections::BTreeMap;

use reqwest::{Method, Url};

use crate::{HttpClientError, Result};

/// Content type of [`Request::post_form`] bodies.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// One logical outbound request. The executor never mutates it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: String,
    headers: BTreeMap<String, String>,
    body: Option<Vec<u8>>,
    content_type: Option<String>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            content_type: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Builds a `POST` with a body and content type.
    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        Self::new(Method::POST, url).with_body(body, content_type)
    }

    /// Builds a form-encoded `POST` from key/value pairs.
    pub fn post_form<I, K, V>(url: impl Into<String>, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let body = encode_pairs(pairs);
        Self::post(url, body, FORM_URLENCODED)
    }

    /// Sets a header, replacing any earlier value under the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>, content_type: &str) -> Self {
        self.body = Some(body.into());
        self.content_type = Some(content_type.to_owned());
        self
    }

    /// Appends URL-encoded query parameters to the target URL.
    pub fn with_query<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let query = encode_pairs(params);
        if query.is_empty() {
            return self;
        }
        let fragment_at = self.url.find('#').unwrap_or(self.url.len());
        let separator = if self.url[..fragment_at].contains('?') {
            '&'
        } else {
            '?'
        };
        self.url
            .insert_str(fragment_at, &format!("{separator}{query}"));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Copy of this request with `defaults` added under names it does not set.
    /// Header names compare case-insensitively.
    pub(crate) fn with_defaults<'a, I>(&self, defaults: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut merged = self.clone();
        for (name, value) in defaults {
            let present = merged
                .headers
                .keys()
                .any(|existing| existing.eq_ignore_ascii_case(name));
            if !present {
                merged.headers.insert(name.to_owned(), value.to_owned());
            }
        }
        merged
    }

    /// Resolves the target against `base`, if one is configured.
    pub(crate) fn resolve_url(&self, base: Option<&Url>) -> Result<Url> {
        let parsed = match base {
            Some(base) if Url::parse(&self.url).is_err() => {
                let mut base = base.clone();
                if !base.path().ends_with('/') {
                    let path = format!("{}/", base.path());
                    base.set_path(&path);
                }
                base.join(self.url.trim_start_matches('/'))
            }
            _ => Url::parse(&self.url),
        };
        parsed.map_err(|err| HttpClientError::Transport(format!("invalid url '{}': {err}", self.url)))
    }
}

fn encode_pairs<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut scratch = Url::parse("http://localhost/").unwrap_or_else(|_| unreachable!());
    scratch.query_pairs_mut().extend_pairs(pairs);
    scratch.query().unwrap_or_default().to_owned()
}
