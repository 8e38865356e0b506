use ::cookie::SameSite;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
/// Attributes applied to the session cookie.
///
/// The cookie *name* is not part of this struct: it lives on
/// [`ServerSessionState`][crate::ServerSessionState], behind a validating
/// setter.
pub struct CookieOptions {
    /// Set the `Path` attribute on the session cookie.
    ///
    /// By default, the attribute is set to `/`.
    #[serde(default = "default_cookie_path")]
    pub path: Option<String>,
    /// Set the `Domain` attribute on the session cookie.
    ///
    /// By default, the attribute is not set.
    #[serde(default)]
    pub domain: Option<String>,
    /// Override the computed `Max-Age` attribute, in seconds.
    ///
    /// By default, `Max-Age` follows the session's next expiry: the remaining
    /// seconds until it, no attribute at all when the session never expires.
    #[serde(default)]
    pub max_age: Option<i64>,
    /// Set the `Secure` attribute on the session cookie.
    ///
    /// If the cookie is marked as `Secure`, it will only be transmitted when
    /// the connection is secure (e.g. over HTTPS).
    ///
    /// Default is `false`.
    #[serde(default)]
    pub secure: bool,
    /// Set the `HttpOnly` attribute on the session cookie.
    ///
    /// If the cookie is marked as `HttpOnly`, it will not be visible to
    /// JavaScript snippets running in the browser.
    ///
    /// Default is `true`.
    #[serde(default = "default_cookie_http_only")]
    pub http_only: bool,
    /// Set the [`SameSite`] attribute on the session cookie.
    ///
    /// By default, the attribute is set to [`SameSite::Lax`].
    #[serde(default = "default_cookie_same_site")]
    #[serde(with = "same_site")]
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: default_cookie_path(),
            domain: None,
            max_age: None,
            secure: false,
            http_only: default_cookie_http_only(),
            same_site: default_cookie_same_site(),
        }
    }
}

fn default_cookie_path() -> Option<String> {
    Some("/".to_string())
}

fn default_cookie_http_only() -> bool {
    true
}

fn default_cookie_same_site() -> Option<SameSite> {
    Some(SameSite::Lax)
}

#[derive(Debug, thiserror::Error)]
#[error("invalid character in cookie name: `{name}`")]
/// The error returned when a cookie name is not a valid RFC 6265 token.
pub struct InvalidCookieName {
    /// The rejected name.
    pub name: String,
}

/// Whether `name` is a valid cookie name, i.e. an RFC 6265 token: US-ASCII
/// visual characters minus separators.
pub(crate) fn is_valid_cookie_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_byte)
}

fn is_token_byte(b: u8) -> bool {
    match b {
        b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/' | b'['
        | b']' | b'?' | b'=' | b'{' | b'}' | b' ' | b'\t' => false,
        0x21..=0x7e => true,
        _ => false,
    }
}

// Deserialization and serialization routines for the `same_site` attribute.
mod same_site {
    use ::cookie::SameSite;
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(value: &Option<SameSite>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(same_site) => {
                let same_site = match same_site {
                    SameSite::Strict => "Strict",
                    SameSite::Lax => "Lax",
                    SameSite::None => "None",
                };
                serializer.serialize_some(same_site)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SameSite>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SameSiteVisitor;

        impl<'de> de::Visitor<'de> for SameSiteVisitor {
            type Value = Option<SameSite>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or null")
            }

            fn visit_str<E>(self, value: &str) -> Result<Option<SameSite>, E>
            where
                E: de::Error,
            {
                match value {
                    "Strict" | "strict" => Ok(Some(SameSite::Strict)),
                    "Lax" | "lax" => Ok(Some(SameSite::Lax)),
                    "None" | "none" => Ok(Some(SameSite::None)),
                    _ => Err(de::Error::unknown_variant(
                        value,
                        &["Strict", "Lax", "None"],
                    )),
                }
            }

            fn visit_none<E>(self) -> Result<Option<SameSite>, E>
            where
                E: de::Error,
            {
                Ok(None)
            }
        }

        deserializer.deserialize_option(SameSiteVisitor)
    }
}
