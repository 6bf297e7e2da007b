use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    time::Duration,
};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Expiry applied to signed links when the caller does not pick one.
pub const DEFAULT_LINK_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Content type given to text values without an explicit override.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Per-call request attributes for a put.
///
/// Bucket, key and body are never part of this structure: they come from the
/// call's own arguments, so no option can redirect a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub storage_class: Option<String>,
    /// Canned ACL, e.g. `public-read`.
    pub acl: Option<String>,
    /// Server-side encryption algorithm, e.g. `AES256` or `aws:kms`.
    pub server_side_encryption: Option<String>,
    pub sse_kms_key_id: Option<String>,
    /// Object tags, sent as one URL-encoded tag set.
    pub tags: BTreeMap<String, String>,
    /// User metadata stored alongside the object.
    pub metadata: HashMap<String, String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn content_disposition(mut self, content_disposition: impl Into<String>) -> Self {
        self.content_disposition = Some(content_disposition.into());
        self
    }

    pub fn content_encoding(mut self, content_encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(content_encoding.into());
        self
    }

    pub fn content_language(mut self, content_language: impl Into<String>) -> Self {
        self.content_language = Some(content_language.into());
        self
    }

    pub fn storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }

    pub fn acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    pub fn server_side_encryption(mut self, algorithm: impl Into<String>) -> Self {
        self.server_side_encryption = Some(algorithm.into());
        self
    }

    pub fn sse_kms_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.sse_kms_key_id = Some(key_id.into());
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Tags in the `k1=v1&k2=v2` form S3 expects, or `None` without tags.
    pub fn tagging(&self) -> Option<String> {
        if self.tags.is_empty() {
            return None;
        }

        let pairs: Vec<String> = self
            .tags
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(name, UNRESERVED),
                    utf8_percent_encode(value, UNRESERVED)
                )
            })
            .collect();
        Some(pairs.join("&"))
    }

    pub fn metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const PATH_SEGMENT: &AsciiSet = &UNRESERVED.remove(b'/');

/// Percent-encode `key` for use as a URL path, keeping its `/` separators.
pub fn key_url_path(key: &str) -> String {
    utf8_percent_encode(key, PATH_SEGMENT).to_string()
}

/// The single HTTP verb a signed link authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Read,
    Write,
    Delete,
}

impl Verb {
    pub fn http_method(&self) -> &'static str {
        match self {
            Verb::Read => "GET",
            Verb::Write => "PUT",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.http_method())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub expires_in: Duration,
    /// Bound into the signature of write links; ignored for other verbs.
    pub content_type: Option<String>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            expires_in: DEFAULT_LINK_EXPIRY,
            content_type: None,
        }
    }
}

impl LinkOptions {
    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}
