//! Session state and the manager that builds it
//!
//! A [`Session`] is a plain value (cookie jar, optional anti-forgery token,
//! header set) owned by one caller and passed explicitly to every fetch.
//! Sessions are rebuilt per batch rather than mutated from several places.

use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use scraper::{Html, Selector};

use crate::error::{FetchError, SessionError};
use crate::transport::{FetchRequest, FetchResponse, Transport, snippet};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Where the anti-forgery token lives and how it is echoed back
#[derive(Debug, Clone)]
pub struct TokenSpec {
    /// `<meta name=…>` carrying the token
    pub meta_name: String,
    /// Request header the token is echoed in
    pub header: HeaderName,
}

impl Default for TokenSpec {
    fn default() -> Self {
        Self {
            meta_name: "csrf-token".to_string(),
            header: HeaderName::from_static("x-csrf-token"),
        }
    }
}

/// Standard header set sent with every request of a session
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    headers: HeaderMap,
}

impl HeaderProfile {
    /// Browser navigation headers (HTML pages)
    pub fn document() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            HeaderValue::from_static("1"),
        );
        headers.insert(header::DNT, HeaderValue::from_static("1"));
        Self { headers }
    }

    /// Same-origin XHR headers (JSON listing endpoints)
    pub fn xhr() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.5"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("empty"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("cors"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("same-origin"),
        );
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("XMLHttpRequest"),
        );
        Self { headers }
    }

    /// Send `Referer: <origin>/` of the given URL
    pub fn with_referer(mut self, url: &Url) -> Self {
        let origin = format!("{}/", url.origin().ascii_serialization());
        if let Ok(value) = HeaderValue::from_str(&origin) {
            self.headers.insert(header::REFERER, value);
        }
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// One logical session against a site
#[derive(Debug)]
pub struct Session {
    entry: Option<Url>,
    headers: HeaderMap,
    token: Option<String>,
    spec: TokenSpec,
    jar: Jar,
}

impl Session {
    pub fn new(profile: HeaderProfile, spec: TokenSpec) -> Self {
        Self {
            entry: None,
            headers: profile.headers,
            token: None,
            spec,
            jar: Jar::default(),
        }
    }

    pub fn entry(&self) -> Option<&Url> {
        self.entry.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// Build a GET carrying session headers, token (if any) and cookies.
    pub fn request(&self, url: Url) -> FetchRequest {
        let mut headers = self.headers.clone();
        if let Some(token) = &self.token {
            match HeaderValue::from_str(token) {
                Ok(value) => {
                    headers.insert(self.spec.header.clone(), value);
                }
                Err(_) => log::debug!("token is not a valid header value, omitting"),
            }
        }
        if let Some(cookies) = self.jar.cookies(&url) {
            headers.insert(header::COOKIE, cookies);
        }
        FetchRequest { url, headers }
    }

    /// Store any `Set-Cookie` headers of a response.
    pub fn absorb_cookies(&mut self, response: &FetchResponse) {
        let mut set_cookies = response.headers.get_all(header::SET_COOKIE).iter();
        self.jar.set_cookies(&mut set_cookies, &response.url);
    }

    /// Pick up a rotated token from a page body. Returns true when found.
    pub fn refresh_token(&mut self, body: &str) -> bool {
        match extract_token(body, &self.spec.meta_name) {
            Some(token) => {
                if self.token.as_deref() != Some(token.as_str()) {
                    log::debug!(
                        "anti-forgery token refreshed: {}...",
                        token.chars().take(20).collect::<String>()
                    );
                }
                self.token = Some(token);
                true
            }
            None => false,
        }
    }

    /// Cookie header that would be sent to `url`
    pub fn cookie_header(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

/// Extract `<meta name="{meta_name}" content="…">` from an HTML page.
pub fn extract_token(html: &str, meta_name: &str) -> Option<String> {
    // Cheap pre-filter: most JSON bodies never mention the meta name
    if !html.contains(meta_name) {
        return None;
    }
    let selector = Selector::parse("meta[name][content]").ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .find(|meta| meta.value().attr("name") == Some(meta_name))
        .and_then(|meta| meta.value().attr("content"))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
}

/// Builds sessions against one transport
pub struct SessionManager<'a, T: Transport> {
    transport: &'a T,
    profile: HeaderProfile,
    spec: TokenSpec,
}

impl<'a, T: Transport> SessionManager<'a, T> {
    pub fn new(transport: &'a T, profile: HeaderProfile, spec: TokenSpec) -> Self {
        Self {
            transport,
            profile,
            spec,
        }
    }

    /// Session without an entry fetch: no cookies, no token yet.
    pub fn fresh(&self) -> Session {
        Session::new(self.profile.clone(), self.spec.clone())
    }

    /// Fetch the entry page once, keep its cookies and anti-forgery token.
    ///
    /// A missing token is tolerated; a failed fetch is not.
    pub fn establish(&self, entry: &str) -> Result<Session, SessionError> {
        let url = Url::parse(entry).map_err(|_| SessionError::InvalidUrl(entry.to_string()))?;
        let mut session = Session::new(self.profile.clone().with_referer(&url), self.spec.clone());
        session.entry = Some(url.clone());

        log::info!("Connecting to {url}");
        let response = self
            .transport
            .send(&session.request(url.clone()))
            .map_err(|source| SessionError::Entry {
                url: url.to_string(),
                source,
            })?;
        session.absorb_cookies(&response);

        if !response.is_success() {
            return Err(SessionError::Entry {
                url: url.to_string(),
                source: FetchError::Status {
                    status: response.status,
                    challenge: false,
                    snippet: snippet(&response.body),
                },
            });
        }

        if session.refresh_token(&response.body) {
            log::info!("Session established, anti-forgery token obtained");
        } else {
            log::warn!("Session established without anti-forgery token");
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlError;
    use std::cell::RefCell;

    const PAGE: &str = r#"<html><head>
        <meta charset="utf-8">
        <meta name="csrf-token" content="tok-123">
        </head><body></body></html>"#;

    #[test]
    fn extract_token_from_meta() {
        assert_eq!(extract_token(PAGE, "csrf-token"), Some("tok-123".to_string()));
    }

    #[test]
    fn extract_token_absent() {
        assert_eq!(extract_token("<html></html>", "csrf-token"), None);
        assert_eq!(
            extract_token(r#"<meta name="csrf-token" content="  ">"#, "csrf-token"),
            None
        );
    }

    #[test]
    fn extract_token_other_meta_name() {
        let html = r#"<meta name="_token" content="abc">"#;
        assert_eq!(extract_token(html, "_token"), Some("abc".to_string()));
        assert_eq!(extract_token(html, "csrf-token"), None);
    }

    #[test]
    fn request_omits_token_header_when_absent() {
        let session = Session::new(HeaderProfile::document(), TokenSpec::default());
        let req = session.request(Url::parse("http://site.onion/a").unwrap());
        assert!(req.headers.get("x-csrf-token").is_none());
        assert!(req.headers.get(header::USER_AGENT).is_some());
    }

    #[test]
    fn request_carries_token() {
        let mut session = Session::new(HeaderProfile::xhr(), TokenSpec::default());
        session.set_token(Some("tok".into()));
        let req = session.request(Url::parse("http://site.onion/a").unwrap());
        assert_eq!(req.headers.get("x-csrf-token").unwrap(), "tok");
        assert_eq!(req.headers.get("x-requested-with").unwrap(), "XMLHttpRequest");
    }

    #[test]
    fn referer_is_origin() {
        let url = Url::parse("http://site.onion/n?page=2").unwrap();
        let profile = HeaderProfile::xhr().with_referer(&url);
        assert_eq!(
            profile.headers().get(header::REFERER).unwrap(),
            "http://site.onion/"
        );
    }

    struct EntryTransport {
        status: u16,
        body: &'static str,
        sent: RefCell<Vec<FetchRequest>>,
    }

    impl Transport for EntryTransport {
        fn send(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
            self.sent.borrow_mut().push(request.clone());
            let mut headers = HeaderMap::new();
            headers.append(
                header::SET_COOKIE,
                HeaderValue::from_static("sid=abc; Path=/"),
            );
            Ok(FetchResponse {
                url: request.url.clone(),
                status: self.status,
                headers,
                body: self.body.to_string(),
            })
        }

        fn rotate_identity(&self) -> Result<(), ControlError> {
            Ok(())
        }
    }

    #[test]
    fn establish_captures_cookie_and_token() {
        let transport = EntryTransport {
            status: 200,
            body: PAGE,
            sent: RefCell::new(Vec::new()),
        };
        let manager = SessionManager::new(&transport, HeaderProfile::xhr(), TokenSpec::default());
        let session = manager.establish("http://site.onion/").unwrap();
        assert_eq!(session.token(), Some("tok-123"));

        let url = Url::parse("http://site.onion/n").unwrap();
        let cookie = session.cookie_header(&url).unwrap();
        assert_eq!(cookie, "sid=abc");

        let next = session.request(url);
        assert_eq!(next.headers.get(header::COOKIE).unwrap(), "sid=abc");
        assert_eq!(next.headers.get("x-csrf-token").unwrap(), "tok-123");
    }

    #[test]
    fn establish_without_token_is_ok() {
        let transport = EntryTransport {
            status: 200,
            body: "<html><body>hello</body></html>",
            sent: RefCell::new(Vec::new()),
        };
        let manager =
            SessionManager::new(&transport, HeaderProfile::document(), TokenSpec::default());
        let session = manager.establish("http://site.onion/").unwrap();
        assert!(session.token().is_none());
    }

    #[test]
    fn establish_fails_on_error_status() {
        let transport = EntryTransport {
            status: 503,
            body: "down",
            sent: RefCell::new(Vec::new()),
        };
        let manager =
            SessionManager::new(&transport, HeaderProfile::document(), TokenSpec::default());
        let err = manager.establish("http://site.onion/").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Entry {
                source: FetchError::Status { status: 503, .. },
                ..
            }
        ));
    }

    #[test]
    fn establish_rejects_bad_url() {
        let transport = EntryTransport {
            status: 200,
            body: "",
            sent: RefCell::new(Vec::new()),
        };
        let manager =
            SessionManager::new(&transport, HeaderProfile::document(), TokenSpec::default());
        assert!(matches!(
            manager.establish("not a url"),
            Err(SessionError::InvalidUrl(_))
        ));
        assert!(transport.sent.borrow().is_empty());
    }
}
