//! Intercepted requests and the responses stored for them.

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

/// Body of the synthetic response returned when neither network nor cache
/// can answer.
pub const OFFLINE_MESSAGE: &str = "Resource not available offline";

/// Connection-scoped headers that must not cross the proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHORIZATION,
];

// == Destination ==
/// What the requester intends to do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Document,
    Image,
    Video,
    Audio,
    Style,
    Script,
    Font,
    Other,
}

impl Destination {
    /// Maps a `Sec-Fetch-Dest` header value. `empty` and unknown values
    /// give `None` so the caller can fall back to the path.
    pub fn from_fetch_dest(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Some(Self::Document),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" | "track" => Some(Self::Audio),
            "style" => Some(Self::Style),
            "script" | "worker" | "sharedworker" => Some(Self::Script),
            "font" => Some(Self::Font),
            _ => None,
        }
    }

    /// Guesses from the file extension of a URL path.
    pub fn from_path(path: &str) -> Self {
        let extension = path
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("jpg" | "jpeg" | "png" | "gif" | "webp" | "avif" | "svg" | "ico") => Self::Image,
            Some("mp4" | "webm" | "ogv" | "mov") => Self::Video,
            Some("mp3" | "ogg" | "wav" | "m4a") => Self::Audio,
            Some("css") => Self::Style,
            Some("js" | "mjs") => Self::Script,
            Some("woff" | "woff2" | "ttf" | "otf") => Self::Font,
            Some("html" | "htm") => Self::Document,
            _ => Self::Other,
        }
    }

    /// Images and video are served cache-first.
    pub fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Top-level page navigation
    Navigate,
    Subresource,
}

// == Fetch Request ==
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub mode: RequestMode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    /// A GET subresource request, destination guessed from the path.
    pub fn get(url: Url) -> Self {
        let destination = Destination::from_path(url.path());
        Self {
            method: Method::GET,
            url,
            destination,
            mode: RequestMode::Subresource,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A top-level page navigation.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Whether the request carries cookies or an `authorization` header.
    pub fn has_credentials(&self) -> bool {
        self.headers.contains_key(header::COOKIE)
            || self.headers.contains_key(header::AUTHORIZATION)
    }

    /// The same request without a `range` header.
    pub fn without_range(&self) -> Self {
        let mut request = self.clone();
        request.headers.remove(header::RANGE);
        request
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate || self.destination == Destination::Document
    }

    /// Identity under which the response is stored.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }
}

/// The URL without its fragment.
pub fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

// == Fetch Response ==
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Synthetic 404 for resources neither the network nor the cache has.
    pub fn offline() -> Self {
        let mut response = Self::new(StatusCode::NOT_FOUND, OFFLINE_MESSAGE);
        response.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    /// Sets the `date` header.
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        let formatted = date.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        if let Ok(value) = HeaderValue::from_str(&formatted) {
            self.headers.insert(header::DATE, value);
        }
        self
    }

    /// Copy fit for the shared partitions: complete `200` responses only,
    /// without `set-cookie`.
    pub fn storable(&self) -> Option<Self> {
        if self.status != StatusCode::OK {
            return None;
        }
        let mut copy = self.clone();
        copy.headers.remove(header::SET_COOKIE);
        Some(copy)
    }

    /// Parses the `date` header, if present and well formed.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        let raw = self.headers.get(header::DATE)?.to_str().ok()?;
        DateTime::parse_from_rfc2822(raw)
            .ok()
            .map(|date| date.with_timezone(&Utc))
    }
}

impl IntoResponse for FetchResponse {
    fn into_response(self) -> Response {
        let mut headers = self.headers;
        strip_hop_by_hop(&mut headers);
        (self.status, headers, self.body).into_response()
    }
}

/// Removes connection-scoped headers in place.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}
