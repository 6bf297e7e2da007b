use std::fmt;

use aws_sdk_s3::config::Credentials;

use crate::s3::S3Error;

/// Region used when neither the caller nor the environment names one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Provider name recorded on credentials passed in explicitly.
const CREDENTIALS_PROVIDER: &str = "bucketkv";

/// Connection settings for an S3-compatible backend.
///
/// Every field is optional. A field left unset falls back to what
/// `aws-config` loads from the environment and profile files
/// (`AWS_ENDPOINT_URL`, `AWS_REGION`, `AWS_ACCESS_KEY_ID`, ...), and
/// otherwise to nothing. The fallback is resolved once, when the client is
/// built.
#[derive(Clone, Default)]
pub struct S3Config {
    /// Custom endpoint such as `http://localhost:9000`.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`.
    /// Defaults to on when a custom endpoint is in use.
    pub force_path_style: Option<bool>,
    /// Page size requested from the listing endpoint. The backend's own maximum applies when unset.
    pub max_keys: Option<i32>,
}

impl S3Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `http://host:port/bucket-name/` into an endpoint config and a bucket name.
    pub fn from_url(url: &str) -> Result<(Self, String), S3Error> {
        let url = url.trim_end_matches('/');
        let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
        let last_slash = url
            .rfind('/')
            .filter(|&i| i >= scheme_end)
            .ok_or_else(|| S3Error::Config(format!("no bucket in S3 URL {url:?}")))?;

        let (endpoint, bucket) = url.split_at(last_slash);
        let bucket = &bucket[1..];

        if bucket.is_empty() {
            return Err(S3Error::Config(format!("no bucket in S3 URL {url:?}")));
        }

        Ok((Self::new().with_endpoint(endpoint), bucket.to_string()))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    pub fn with_force_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = Some(force_path_style);
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    /// Reject settings no client could be built from.
    pub fn validate(&self, bucket: &str) -> Result<(), S3Error> {
        if bucket.trim().is_empty() {
            return Err(S3Error::Config("bucket name must not be empty".into()));
        }

        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(S3Error::Config(format!(
                    "endpoint {endpoint:?} must start with http:// or https://"
                )));
            }
        }

        match (&self.access_key_id, &self.secret_access_key) {
            (Some(_), None) => {
                return Err(S3Error::Config(
                    "access key id given without a secret access key".into(),
                ))
            }
            (None, Some(_)) => {
                return Err(S3Error::Config(
                    "secret access key given without an access key id".into(),
                ))
            }
            _ => {}
        }

        if self.session_token.is_some() && self.access_key_id.is_none() {
            return Err(S3Error::Config(
                "session token given without an access key pair".into(),
            ));
        }

        if let Some(max_keys) = self.max_keys {
            if max_keys <= 0 {
                return Err(S3Error::Config(format!(
                    "max keys must be positive, got {max_keys}"
                )));
            }
        }

        Ok(())
    }

    /// Static credentials, when both halves of the key pair are set.
    pub(crate) fn credentials(&self) -> Option<Credentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(Credentials::new(
                access_key_id,
                secret_access_key,
                self.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER,
            )),
            _ => None,
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "** redacted **"),
            )
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .field("force_path_style", &self.force_path_style)
            .field("max_keys", &self.max_keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let (config, bucket) = S3Config::from_url("http://localhost:9000/avatars/").unwrap();

        assert_eq!(bucket, "avatars");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_from_url_without_bucket() {
        assert!(S3Config::from_url("http://localhost:9000/").is_err());
        assert!(S3Config::from_url("http://localhost:9000").is_err());
    }

    #[test]
    fn test_validate_accepts_empty_config() {
        assert!(S3Config::new().validate("bucket").is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        assert!(S3Config::new().validate("").is_err());
        assert!(S3Config::new()
            .with_endpoint("localhost:9000")
            .validate("bucket")
            .is_err());
        assert!(S3Config::new().with_max_keys(0).validate("bucket").is_err());
        assert!(S3Config::new()
            .with_session_token("token")
            .validate("bucket")
            .is_err());

        let half_pair = S3Config {
            access_key_id: Some("minio".into()),
            ..S3Config::default()
        };
        assert!(half_pair.validate("bucket").is_err());
        assert!(half_pair.credentials().is_none());
    }

    #[test]
    fn test_credentials_from_pair() {
        let config = S3Config::new().with_credentials("minio", "minio123");

        let credentials = config.credentials().unwrap();

        assert_eq!(credentials.access_key_id(), "minio");
        assert_eq!(credentials.secret_access_key(), "minio123");
        assert_eq!(credentials.session_token(), None);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = S3Config::new()
            .with_credentials("minio", "minio123")
            .with_session_token("session");

        let debug = format!("{config:?}");

        assert!(debug.contains("minio"));
        assert!(!debug.contains("minio123"));
        assert!(!debug.contains("session\""));
    }
}
