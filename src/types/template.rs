// ABOUTME: Template location inside the deployment bucket.
// ABOUTME: Pairs the object key checked during pre-flight with the URL sent on update.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a stack template lives: the object key inside the deployment bucket
/// and the URL the provider fetches it from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateLocation {
    path: String,
    url: String,
}

impl TemplateLocation {
    pub fn new(path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
        }
    }

    /// Resolve a template stored in `bucket` to its virtual-hosted URL.
    ///
    /// Each path segment is percent-encoded; the separators are kept.
    pub fn in_bucket(bucket: &str, region: &str, path: &str) -> Self {
        let path = path.trim_start_matches('/');
        let encoded = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Self {
            url: format!("https://{bucket}.s3.{region}.amazonaws.com/{encoded}"),
            path: path.to_string(),
        }
    }

    /// Object key inside the deployment bucket.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for TemplateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_bucket_builds_virtual_hosted_url() {
        let location = TemplateLocation::in_bucket(
            "deploy-bucket",
            "eu-west-1",
            "/amplify-cfn-templates/api/cloudformation-template.json",
        );

        assert_eq!(
            location.path(),
            "amplify-cfn-templates/api/cloudformation-template.json"
        );
        assert_eq!(
            location.url(),
            "https://deploy-bucket.s3.eu-west-1.amazonaws.com/amplify-cfn-templates/api/cloudformation-template.json"
        );
    }

    #[test]
    fn in_bucket_encodes_segments() {
        let location = TemplateLocation::in_bucket("b", "us-east-1", "previous build/api.json");
        assert_eq!(
            location.url(),
            "https://b.s3.us-east-1.amazonaws.com/previous%20build/api.json"
        );
    }
}
