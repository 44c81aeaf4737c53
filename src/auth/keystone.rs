//! Password authentication against the identity service.
//!
//! The identity API version is inferred from the auth URL: URLs ending in
//! `/v2.0` use the legacy tenant tokens, anything else uses v3 project-scoped
//! tokens in the `Default` domain.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{AuthError, Session};
use crate::credentials::Credentials;

const DEFAULT_DOMAIN: &str = "Default";
const PUBLIC_INTERFACE: &str = "public";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// Identity API flavour.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdentityVersion {
    /// Legacy `/v2.0/tokens`.
    V2,
    /// `/v3/auth/tokens`.
    V3,
}

/// Validated username/password credentials.
#[derive(Clone, Eq, PartialEq)]
pub struct PasswordAuth {
    username: String,
    password: String,
    tenant_name: String,
    auth_url: String,
    api_version: String,
}

impl std::fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuth")
            .field("username", &self.username)
            .field("tenant_name", &self.tenant_name)
            .field("auth_url", &self.auth_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl PasswordAuth {
    /// Builds password auth from resolved credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingParameter`] when a required field is
    /// absent.
    pub fn from_credentials(credentials: &Credentials) -> Result<Self, AuthError> {
        credentials.validate()?;
        Ok(Self {
            username: credentials.username.clone().unwrap_or_default(),
            password: credentials.password.clone().unwrap_or_default(),
            tenant_name: credentials.tenant_name.clone().unwrap_or_default(),
            auth_url: credentials.auth_url.clone().unwrap_or_default(),
            api_version: credentials.api_version_or_default().to_owned(),
        })
    }

    /// Identity API version implied by the auth URL.
    #[must_use]
    pub fn identity_version(&self) -> IdentityVersion {
        if self.auth_url.trim_end_matches('/').ends_with("/v2.0") {
            IdentityVersion::V2
        } else {
            IdentityVersion::V3
        }
    }

    /// URL of the token endpoint.
    #[must_use]
    pub fn token_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        match self.identity_version() {
            IdentityVersion::V2 => format!("{base}/tokens"),
            IdentityVersion::V3 if base.ends_with("/v3") => format!("{base}/auth/tokens"),
            IdentityVersion::V3 => format!("{base}/v3/auth/tokens"),
        }
    }

    /// JSON body of the token request.
    #[must_use]
    pub fn request_body(&self) -> Value {
        match self.identity_version() {
            IdentityVersion::V2 => json!({
                "auth": {
                    "passwordCredentials": {
                        "username": self.username,
                        "password": self.password,
                    },
                    "tenantName": self.tenant_name,
                }
            }),
            IdentityVersion::V3 => json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": self.username,
                                "domain": {"name": DEFAULT_DOMAIN},
                                "password": self.password,
                            }
                        }
                    },
                    "scope": {
                        "project": {
                            "name": self.tenant_name,
                            "domain": {"name": DEFAULT_DOMAIN},
                        }
                    }
                }
            }),
        }
    }

    /// Requests a token and resolves the block-storage endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the request fails, is rejected, or the
    /// catalog has no matching endpoint.
    pub fn authenticate(&self, http: &reqwest::blocking::Client) -> Result<Session, AuthError> {
        let url = self.token_url();
        debug!(%url, user = %self.username, tenant = %self.tenant_name, "requesting identity token");
        let response = http
            .post(&url)
            .json(&self.request_body())
            .send()
            .map_err(|err| AuthError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Identity {
                status: status.as_u16(),
                message: response.text().unwrap_or_default(),
            });
        }

        let subject_token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .map_err(|err| AuthError::Http(err.to_string()))?;

        let (token, catalog) = match self.identity_version() {
            IdentityVersion::V3 => {
                let parsed = parse_v3(&body)?;
                let token = subject_token.ok_or_else(|| {
                    AuthError::Http(format!("response is missing the {SUBJECT_TOKEN_HEADER} header"))
                })?;
                (token, parsed)
            }
            IdentityVersion::V2 => parse_v2(&body)?,
        };

        let endpoint = select_endpoint(&catalog, &self.api_version)?;
        debug!(%endpoint, "resolved block-storage endpoint");
        Ok(Session::new(token, endpoint))
    }
}

/// A catalog entry reduced to what endpoint selection needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CatalogService {
    /// Service type such as `volumev3`.
    pub service_type: String,
    /// Public endpoint URLs.
    pub public_urls: Vec<String>,
}

/// Service types searched for an API version, most specific first.
#[must_use]
pub fn service_types_for(api_version: &str) -> [&'static str; 3] {
    if api_version.trim().starts_with('2') {
        ["volumev2", "block-storage", "volume"]
    } else {
        ["volumev3", "block-storage", "volume"]
    }
}

/// Picks the first public endpoint of the preferred service types.
///
/// # Errors
///
/// Returns [`AuthError::EndpointNotFound`] when no entry matches.
pub fn select_endpoint(catalog: &[CatalogService], api_version: &str) -> Result<String, AuthError> {
    let wanted = service_types_for(api_version);
    wanted
        .iter()
        .find_map(|service_type| {
            catalog
                .iter()
                .filter(|entry| entry.service_type == *service_type)
                .find_map(|entry| entry.public_urls.first().cloned())
        })
        .ok_or_else(|| AuthError::EndpointNotFound {
            service_types: wanted.join(", "),
        })
}

#[derive(Deserialize)]
struct V3Response {
    token: V3Token,
}

#[derive(Deserialize)]
struct V3Token {
    #[serde(default)]
    catalog: Vec<V3Service>,
}

#[derive(Deserialize)]
struct V3Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V3Endpoint>,
}

#[derive(Deserialize)]
struct V3Endpoint {
    interface: String,
    url: String,
}

#[derive(Deserialize)]
struct V2Response {
    access: V2Access,
}

#[derive(Deserialize)]
struct V2Access {
    token: V2Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<V2Service>,
}

#[derive(Deserialize)]
struct V2Token {
    id: String,
}

#[derive(Deserialize)]
struct V2Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V2Endpoint>,
}

#[derive(Deserialize)]
struct V2Endpoint {
    #[serde(rename = "publicURL")]
    public_url: String,
}

/// Extracts the catalog from a v3 token response body.
///
/// # Errors
///
/// Returns [`AuthError::Http`] when the body is not a token response.
pub fn parse_v3(body: &str) -> Result<Vec<CatalogService>, AuthError> {
    let response: V3Response =
        serde_json::from_str(body).map_err(|err| AuthError::Http(err.to_string()))?;
    Ok(response
        .token
        .catalog
        .into_iter()
        .map(|service| CatalogService {
            service_type: service.service_type,
            public_urls: service
                .endpoints
                .into_iter()
                .filter(|endpoint| endpoint.interface == PUBLIC_INTERFACE)
                .map(|endpoint| endpoint.url)
                .collect(),
        })
        .collect())
}

/// Extracts the token id and catalog from a v2.0 token response body.
///
/// # Errors
///
/// Returns [`AuthError::Http`] when the body is not a token response.
pub fn parse_v2(body: &str) -> Result<(String, Vec<CatalogService>), AuthError> {
    let response: V2Response =
        serde_json::from_str(body).map_err(|err| AuthError::Http(err.to_string()))?;
    let catalog = response
        .access
        .service_catalog
        .into_iter()
        .map(|service| CatalogService {
            service_type: service.service_type,
            public_urls: service
                .endpoints
                .into_iter()
                .map(|endpoint| endpoint.public_url)
                .collect(),
        })
        .collect();
    Ok((response.access.token.id, catalog))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn credentials(auth_url: &str) -> Credentials {
        Credentials {
            username: Some(String::from("demo")),
            password: Some(String::from("secret")),
            tenant_name: Some(String::from("demo-project")),
            auth_url: Some(auth_url.to_owned()),
            api_version: None,
        }
    }

    #[rstest]
    #[case("http://keystone:5000/v3", IdentityVersion::V3, "http://keystone:5000/v3/auth/tokens")]
    #[case("http://keystone:5000/", IdentityVersion::V3, "http://keystone:5000/v3/auth/tokens")]
    #[case("http://keystone:5000/v2.0/", IdentityVersion::V2, "http://keystone:5000/v2.0/tokens")]
    fn token_url_follows_identity_version(
        #[case] auth_url: &str,
        #[case] version: IdentityVersion,
        #[case] expected: &str,
    ) {
        let auth = PasswordAuth::from_credentials(&credentials(auth_url)).expect("valid creds");
        assert_eq!(auth.identity_version(), version);
        assert_eq!(auth.token_url(), expected);
    }

    #[test]
    fn v3_body_scopes_to_project_by_name() {
        let auth = PasswordAuth::from_credentials(&credentials("http://k/v3")).expect("valid");
        let body = auth.request_body();
        assert_eq!(
            body.pointer("/auth/scope/project/name"),
            Some(&json!("demo-project"))
        );
        assert_eq!(
            body.pointer("/auth/identity/password/user/password"),
            Some(&json!("secret"))
        );
    }

    #[test]
    fn v2_body_uses_tenant_name() {
        let auth = PasswordAuth::from_credentials(&credentials("http://k/v2.0")).expect("valid");
        assert_eq!(
            auth.request_body().pointer("/auth/tenantName"),
            Some(&json!("demo-project"))
        );
    }

    #[test]
    fn from_credentials_rejects_missing_password() {
        let mut creds = credentials("http://k/v3");
        creds.password = None;
        let err = PasswordAuth::from_credentials(&creds).expect_err("password required");
        assert!(matches!(err, AuthError::MissingParameter { ref parameter, .. } if parameter == "password"));
    }

    #[test]
    fn debug_hides_password() {
        let auth = PasswordAuth::from_credentials(&credentials("http://k/v3")).expect("valid");
        assert!(!format!("{auth:?}").contains("secret"));
    }

    #[test]
    fn v3_catalog_keeps_public_endpoints_only() {
        let body = r#"{"token": {"catalog": [
            {"type": "volumev3", "endpoints": [
                {"interface": "internal", "url": "http://internal:8776/v3/p"},
                {"interface": "public", "url": "http://public:8776/v3/p"}
            ]},
            {"type": "compute", "endpoints": []}
        ]}}"#;
        let catalog = parse_v3(body).expect("parse");
        assert_eq!(
            select_endpoint(&catalog, "3").expect("endpoint"),
            "http://public:8776/v3/p"
        );
    }

    #[test]
    fn v2_catalog_yields_token_and_endpoint() {
        let body = r#"{"access": {"token": {"id": "tok"}, "serviceCatalog": [
            {"type": "volumev2", "endpoints": [{"publicURL": "http://cinder:8776/v2/p"}]}
        ]}}"#;
        let (token, catalog) = parse_v2(body).expect("parse");
        assert_eq!(token, "tok");
        assert_eq!(
            select_endpoint(&catalog, "2").expect("endpoint"),
            "http://cinder:8776/v2/p"
        );
    }

    #[test]
    fn select_endpoint_falls_back_to_generic_service_type() {
        let catalog = vec![CatalogService {
            service_type: String::from("block-storage"),
            public_urls: vec![String::from("http://bs/v3")],
        }];
        assert_eq!(select_endpoint(&catalog, "3").expect("endpoint"), "http://bs/v3");
    }

    #[test]
    fn select_endpoint_reports_missing_service() {
        let err = select_endpoint(&[], "3").expect_err("no endpoint");
        assert!(err.to_string().contains("volumev3"));
    }
}
