//! Route templates and rate-limit bucket identity.
//!
//! A route is a method plus a path template such as
//! `/channels/{channel_id}/messages/{message_id}`. The server assigns rate
//! limits per template and per *major parameter*: the guild, channel or
//! webhook id in the path. Two requests with the same method, template and
//! major parameter always share a bucket.

use std::fmt;

use crate::error::{RestError, RestResult};

/// Path parameters that partition rate-limit buckets, in priority order.
const MAJOR_PARAMETERS: &[&str] = &["guild_id", "channel_id", "webhook_id"];

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the per-route rate-limit state for a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    method: Method,
    template: String,
    major: Option<String>,
}

impl BucketKey {
    /// Route template this key was derived from.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Value of the major parameter, if the route has one.
    #[must_use]
    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.template)?;
        if let Some(major) = &self.major {
            write!(f, " [{major}]")?;
        }
        Ok(())
    }
}

/// A method, path template and bound parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: String,
    params: Vec<(String, String)>,
}

impl Route {
    /// Create a route from a template with `{name}` placeholders.
    pub fn new(method: Method, template: impl Into<String>) -> Self {
        Self {
            method,
            template: template.into(),
            params: Vec::new(),
        }
    }

    /// Bind a path parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    /// HTTP method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Unexpanded path template.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    fn param_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Rate-limit identity of this route.
    #[must_use]
    pub fn bucket_key(&self) -> BucketKey {
        let major = MAJOR_PARAMETERS
            .iter()
            .filter(|name| self.template.contains(&format!("{{{name}}}")))
            .find_map(|name| self.param_value(name))
            .map(str::to_string);
        BucketKey {
            method: self.method,
            template: self.template.clone(),
            major,
        }
    }

    /// Expand the template into a concrete path.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::InvalidRequest`] if a placeholder has no bound
    /// value or the template is malformed.
    pub fn compile(&self) -> RestResult<String> {
        let mut path = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(open) = rest.find('{') {
            let (literal, tail) = rest.split_at(open);
            path.push_str(literal);
            let close = tail.find('}').ok_or_else(|| {
                RestError::InvalidRequest(format!("unclosed placeholder in {}", self.template))
            })?;
            let name = tail.get(1..close).unwrap_or_default();
            let value = self.param_value(name).ok_or_else(|| {
                RestError::InvalidRequest(format!(
                    "missing parameter `{name}` for {}",
                    self.template
                ))
            })?;
            path.push_str(&percent_encode(value));
            rest = tail.get(close.saturating_add(1)..).unwrap_or_default();
        }
        path.push_str(rest);
        Ok(path)
    }
}

/// Percent-encode a path segment or header value.
pub(crate) fn percent_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_substitutes_parameters() {
        let route = Route::new(Method::Get, "/channels/{channel_id}/messages/{message_id}")
            .param("channel_id", 10)
            .param("message_id", 20);
        assert_eq!(route.compile().unwrap(), "/channels/10/messages/20");
    }

    #[test]
    fn compile_encodes_segments() {
        let route = Route::new(
            Method::Put,
            "/channels/{channel_id}/messages/{message_id}/reactions/{emoji}/@me",
        )
        .param("channel_id", 1)
        .param("message_id", 2)
        .param("emoji", "name:123 x");
        assert_eq!(
            route.compile().unwrap(),
            "/channels/1/messages/2/reactions/name%3A123%20x/@me"
        );
    }

    #[test]
    fn compile_rejects_missing_parameter() {
        let route = Route::new(Method::Get, "/guilds/{guild_id}/roles");
        assert!(matches!(
            route.compile(),
            Err(RestError::InvalidRequest(msg)) if msg.contains("guild_id")
        ));
    }

    #[test]
    fn bucket_key_uses_major_parameter() {
        let a = Route::new(Method::Get, "/guilds/{guild_id}/roles").param("guild_id", 123);
        let b = Route::new(Method::Get, "/guilds/{guild_id}/roles").param("guild_id", 456);
        assert_ne!(a.bucket_key(), b.bucket_key());
        assert_eq!(a.bucket_key().major(), Some("123"));
    }

    #[test]
    fn bucket_key_ignores_minor_parameters() {
        let a = Route::new(Method::Get, "/channels/{channel_id}/messages/{message_id}")
            .param("channel_id", 1)
            .param("message_id", 2);
        let b = Route::new(Method::Get, "/channels/{channel_id}/messages/{message_id}")
            .param("channel_id", 1)
            .param("message_id", 3);
        assert_eq!(a.bucket_key(), b.bucket_key());
    }

    #[test]
    fn bucket_key_distinguishes_methods() {
        let get = Route::new(Method::Get, "/channels/{channel_id}").param("channel_id", 1);
        let del = Route::new(Method::Delete, "/channels/{channel_id}").param("channel_id", 1);
        assert_ne!(get.bucket_key(), del.bucket_key());
    }

    #[test]
    fn routes_without_major_have_none() {
        let route = Route::new(Method::Get, "/gateway/bot");
        assert_eq!(route.bucket_key().major(), None);
        assert_eq!(route.bucket_key().to_string(), "GET /gateway/bot");
    }
}
