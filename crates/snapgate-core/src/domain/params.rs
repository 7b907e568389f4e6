//! Capture parameters: the typed request that reaches the capture engine.
//!
//! Every field that changes the rendered artifact lives here, so the cache
//! fingerprint can be computed from this one struct.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MIN_WIDTH: u32 = 100;
pub const MAX_WIDTH: u32 = 3840;
pub const MIN_HEIGHT: u32 = 100;
pub const MAX_HEIGHT: u32 = 2160;

/// Query keys read into typed fields (or consumed by admission) by
/// [`CaptureParams::from_query`]. Anything else becomes an extension.
const TYPED_QUERY_KEYS: &[&str] = &[
    "url",
    "width",
    "height",
    "quality",
    "delay",
    "format",
    "fullpage",
    "full_page",
    "selector",
    "device",
    "user_agent",
    "dark_mode",
    "wait_for_selector",
    "block_ads",
    "scroll_page",
    "media_type",
    "timezone",
    "api_key",
];

/// Output format of a capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
    Pdf,
}

impl ImageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            "pdf" => Ok(ImageFormat::Pdf),
            _ => Err(ParamsError::InvalidFormat(s.to_string())),
        }
    }
}

/// CSS media emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Screen,
    Print,
}

impl FromStr for MediaType {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "screen" => Ok(MediaType::Screen),
            "print" => Ok(MediaType::Print),
            _ => Err(ParamsError::InvalidMediaType(s.to_string())),
        }
    }
}

/// Secondary rendering options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedOptions {
    pub selector: Option<String>,
    pub device: Option<String>,
    pub user_agent: Option<String>,
    pub dark_mode: bool,
    pub wait_for_selector: Option<String>,
    pub block_ads: bool,
    pub scroll_page: bool,
    pub media_type: Option<MediaType>,
    pub timezone: Option<String>,
}

/// A validated-on-demand capture request.
///
/// Unknown keys in a JSON body (custom headers, cookies, scripts, ...) are
/// collected into `extensions` and passed through to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default, alias = "fullpage")]
    pub full_page: bool,

    #[serde(default)]
    pub format: ImageFormat,

    #[serde(default = "default_quality")]
    pub quality: u32,

    #[serde(default, alias = "delay")]
    pub delay_ms: u64,

    #[serde(flatten)]
    pub advanced: AdvancedOptions,

    #[serde(flatten)]
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_quality() -> u32 {
    80
}

/// Validation failures for capture parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamsError {
    #[error("URL parameter is required")]
    MissingUrl,

    #[error("URL must start with http:// or https://")]
    InvalidUrl,

    #[error("Format must be \"png\", \"jpeg\", or \"pdf\" (got {0:?})")]
    InvalidFormat(String),

    #[error("Media type must be \"screen\" or \"print\" (got {0:?})")]
    InvalidMediaType(String),

    #[error(
        "Width must be between {MIN_WIDTH}-{MAX_WIDTH} and height between {MIN_HEIGHT}-{MAX_HEIGHT}"
    )]
    InvalidDimensions,

    #[error("Quality must be between 1-100")]
    InvalidQuality,

    #[error("Parameter {name} must be {expected}")]
    Malformed {
        name: &'static str,
        expected: &'static str,
    },

    #[error("Invalid parameters: {0}")]
    InvalidBody(String),
}

impl CaptureParams {
    /// Parameters for `url` with every other field at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: default_width(),
            height: default_height(),
            full_page: false,
            format: ImageFormat::default(),
            quality: default_quality(),
            delay_ms: 0,
            advanced: AdvancedOptions::default(),
            extensions: serde_json::Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.url.trim().is_empty() {
            return Err(ParamsError::MissingUrl);
        }
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ParamsError::InvalidUrl);
        }
        if !(MIN_WIDTH..=MAX_WIDTH).contains(&self.width)
            || !(MIN_HEIGHT..=MAX_HEIGHT).contains(&self.height)
        {
            return Err(ParamsError::InvalidDimensions);
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ParamsError::InvalidQuality);
        }
        Ok(())
    }

    /// Build parameters from a JSON object (POST bodies).
    ///
    /// Does not validate ranges, call [`CaptureParams::validate`] afterwards.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ParamsError> {
        if !value.is_object() {
            return Err(ParamsError::InvalidBody("expected a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|e| ParamsError::InvalidBody(e.to_string()))
    }

    /// Build parameters from query-string pairs (GET requests).
    ///
    /// Booleans accept `true`, `1` and `yes`; everything else is false.
    /// Other non-empty keys (`browser`, `script`, ...) are kept as string
    /// extensions, the same place a JSON body puts them.
    /// Does not validate ranges, call [`CaptureParams::validate`] afterwards.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, ParamsError> {
        let text = |key: &str| query.get(key).filter(|v| !v.is_empty()).cloned();
        let flag = |key: &str| {
            query
                .get(key)
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false)
        };

        let mut params = Self::new(text("url").unwrap_or_default());
        if let Some(v) = query.get("width") {
            params.width = parse_number(v, "width")?;
        }
        if let Some(v) = query.get("height") {
            params.height = parse_number(v, "height")?;
        }
        if let Some(v) = query.get("quality") {
            params.quality = parse_number(v, "quality")?;
        }
        if let Some(v) = query.get("delay") {
            params.delay_ms = parse_number(v, "delay")?;
        }
        if let Some(v) = query.get("format") {
            params.format = v.parse()?;
        }
        params.full_page = flag("fullpage") || flag("full_page");
        params.advanced = AdvancedOptions {
            selector: text("selector"),
            device: text("device"),
            user_agent: text("user_agent"),
            dark_mode: flag("dark_mode"),
            wait_for_selector: text("wait_for_selector"),
            block_ads: flag("block_ads"),
            scroll_page: flag("scroll_page"),
            media_type: text("media_type").map(|v| v.parse()).transpose()?,
            timezone: text("timezone"),
        };
        params.extensions = query
            .iter()
            .filter(|(k, v)| !v.is_empty() && !TYPED_QUERY_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        Ok(params)
    }
}

fn parse_number<T: FromStr>(raw: &str, name: &'static str) -> Result<T, ParamsError> {
    raw.trim().parse().map_err(|_| ParamsError::Malformed {
        name,
        expected: "a non-negative integer",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn json_body_uses_defaults() {
        let p: CaptureParams = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert_eq!(p, CaptureParams::new("https://example.com"));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn json_body_accepts_legacy_names_and_collects_extensions() {
        let p: CaptureParams = serde_json::from_str(
            r#"{
                "url": "https://example.com",
                "fullpage": true,
                "delay": 250,
                "format": "jpg",
                "dark_mode": true,
                "media_type": "print",
                "headers": {"X-Test": "1"}
            }"#,
        )
        .unwrap();
        assert!(p.full_page);
        assert_eq!(p.delay_ms, 250);
        assert_eq!(p.format, ImageFormat::Jpeg);
        assert!(p.advanced.dark_mode);
        assert_eq!(p.advanced.media_type, Some(MediaType::Print));
        assert_eq!(p.extensions.len(), 1);
        assert_eq!(p.extensions["headers"]["X-Test"], "1");
    }

    #[rstest]
    #[case::missing_url("", 1920, 1080, 80, ParamsError::MissingUrl)]
    #[case::bad_scheme("ftp://example.com", 1920, 1080, 80, ParamsError::InvalidUrl)]
    #[case::narrow("https://a.test", 99, 1080, 80, ParamsError::InvalidDimensions)]
    #[case::wide("https://a.test", 3841, 1080, 80, ParamsError::InvalidDimensions)]
    #[case::tall("https://a.test", 1920, 2161, 80, ParamsError::InvalidDimensions)]
    #[case::zero_quality("https://a.test", 1920, 1080, 0, ParamsError::InvalidQuality)]
    #[case::high_quality("https://a.test", 1920, 1080, 101, ParamsError::InvalidQuality)]
    fn validate_rejects(
        #[case] url: &str,
        #[case] width: u32,
        #[case] height: u32,
        #[case] quality: u32,
        #[case] expected: ParamsError,
    ) {
        let mut p = CaptureParams::new(url);
        p.width = width;
        p.height = height;
        p.quality = quality;
        assert_eq!(p.validate(), Err(expected));
    }

    #[test]
    fn query_parsing_handles_flags_and_numbers() {
        let query: HashMap<String, String> = [
            ("url", "https://example.com"),
            ("width", "1280"),
            ("height", "720"),
            ("fullpage", "yes"),
            ("block_ads", "1"),
            ("dark_mode", "no"),
            ("format", "PDF"),
            ("timezone", "Europe/Paris"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let p = CaptureParams::from_query(&query).unwrap();
        assert_eq!(p.width, 1280);
        assert_eq!(p.height, 720);
        assert!(p.full_page);
        assert!(p.advanced.block_ads);
        assert!(!p.advanced.dark_mode);
        assert_eq!(p.format, ImageFormat::Pdf);
        assert_eq!(p.advanced.timezone.as_deref(), Some("Europe/Paris"));
    }

    #[test]
    fn query_keeps_untyped_keys_as_extensions() {
        let query: HashMap<String, String> = [
            ("url", "https://a.test"),
            ("browser", "firefox"),
            ("script", "document.body.remove()"),
            ("disable_animations", "true"),
            ("api_key", "sk_secret"),
            ("empty", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let p = CaptureParams::from_query(&query).unwrap();
        assert_eq!(p.extensions.len(), 3);
        assert_eq!(p.extensions["browser"], "firefox");
        assert_eq!(p.extensions["disable_animations"], "true");
        assert!(!p.extensions.contains_key("api_key"));
        assert!(!p.extensions.contains_key("url"));
    }

    #[test]
    fn json_type_errors_are_invalid_body() {
        let err = CaptureParams::from_json(serde_json::json!({"url": "https://a.test", "width": "wide"}))
            .unwrap_err();
        assert!(matches!(err, ParamsError::InvalidBody(_)));
        assert!(CaptureParams::from_json(serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn query_parsing_reports_malformed_numbers() {
        let query: HashMap<String, String> =
            [("url".to_string(), "https://a.test".to_string()), ("width".to_string(), "wide".to_string())]
                .into_iter()
                .collect();
        assert!(matches!(
            CaptureParams::from_query(&query),
            Err(ParamsError::Malformed { name: "width", .. })
        ));
    }
}
