//! REST platform adapter
//!
//! One adapter serves OpenStack, Kubernetes and Rancher. Differences between
//! the APIs (paths, body wrapping, version placement, auth header) come from
//! the [`EndpointTable`]; HTTP status codes are folded into [`PlatformError`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::endpoints::has_next_page;
use super::{
    set_pointer, Endpoint, EndpointTable, Platform, PlatformError, PlatformFamily, RemoteObject,
    ResourceKind, VersionPlacement,
};
use crate::context::{Context, KeystoneAuth};

/// Default request timeout for control plane calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP implementation of [`Platform`]
#[derive(Clone)]
pub struct HttpPlatform {
    name: String,
    family: PlatformFamily,
    client: Client,
    base_url: String,
    services: HashMap<String, String>,
    token: Option<String>,
    endpoints: EndpointTable,
}

impl HttpPlatform {
    /// Create an adapter with the default endpoint table for `family`
    pub fn new(
        name: impl Into<String>,
        family: PlatformFamily,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            family,
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            services: HashMap::new(),
            token: None,
            endpoints: EndpointTable::for_family(family),
        })
    }

    /// Build an authenticated adapter from a configured context.
    ///
    /// A static token wins; otherwise Keystone password credentials are
    /// exchanged for a token.
    pub async fn connect(ctx: &Context) -> Result<Self, PlatformError> {
        let mut platform = Self::new(
            &ctx.name,
            ctx.platform,
            &ctx.url,
            Duration::from_secs(ctx.timeout_secs),
        )?;

        for (service, url) in &ctx.services {
            platform = platform.with_service(service, url);
        }
        for (kind, endpoint) in &ctx.endpoints.endpoints {
            platform.endpoints.insert(*kind, endpoint.clone());
        }

        let token = ctx
            .resolved_token()
            .map_err(|e| PlatformError::Unauthorized(e.to_string()))?;
        platform.token = match (token, &ctx.keystone) {
            (Some(token), _) => Some(token),
            (None, Some(auth)) => {
                let auth = auth
                    .resolved()
                    .map_err(|e| PlatformError::Unauthorized(e.to_string()))?;
                Some(keystone_token(&platform.client, &auth).await?)
            }
            (None, None) => None,
        };

        debug!(
            context = %ctx.name,
            platform = %ctx.platform,
            authenticated = platform.token.is_some(),
            "Connected platform"
        );
        Ok(platform)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Route a service (`network`, `compute`, ...) to its own base URL
    pub fn with_service(mut self, service: impl Into<String>, url: impl Into<String>) -> Self {
        self.services.insert(
            service.into(),
            url.into().trim_end_matches('/').to_string(),
        );
        self
    }

    pub fn with_endpoint(mut self, kind: ResourceKind, endpoint: Endpoint) -> Self {
        self.endpoints.insert(kind, endpoint);
        self
    }

    pub fn family(&self) -> PlatformFamily {
        self.family
    }

    fn endpoint(&self, kind: ResourceKind) -> Result<&Endpoint, PlatformError> {
        self.endpoints
            .get(kind)
            .ok_or_else(|| PlatformError::Unsupported(kind, self.name.clone()))
    }

    fn base_for(&self, endpoint: &Endpoint) -> &str {
        endpoint
            .service
            .as_ref()
            .and_then(|s| self.services.get(s))
            .map(String::as_str)
            .unwrap_or(&self.base_url)
    }

    fn collection_url(
        &self,
        kind: ResourceKind,
        endpoint: &Endpoint,
        namespace: Option<&str>,
        for_list: bool,
    ) -> Result<Url, PlatformError> {
        let segments = endpoint
            .collection_segments(namespace, for_list)
            .ok_or(PlatformError::MissingNamespace(kind))?;
        join_segments(self.base_for(endpoint), segments)
    }

    fn object_url(
        &self,
        kind: ResourceKind,
        endpoint: &Endpoint,
        namespace: Option<&str>,
        id: &str,
    ) -> Result<Url, PlatformError> {
        let collection = self.collection_url(kind, endpoint, namespace, false)?;
        join_segments(collection.as_str(), [id])
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match (&self.token, self.family) {
            (Some(token), PlatformFamily::OpenStack) => req.header("X-Auth-Token", token),
            (Some(token), _) => req.bearer_auth(token),
            (None, _) => req,
        }
    }

    /// Send a request and decode the JSON body (`None` for empty bodies)
    async fn execute(
        &self,
        req: RequestBuilder,
        versioned_write: bool,
    ) -> Result<Option<Value>, PlatformError> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        trace!(%status, body = %text, "Platform response");

        if !status.is_success() {
            return Err(classify_status(status, &text, versioned_write));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PlatformError::Decode(e.to_string()))
    }

    fn normalize(
        &self,
        kind: ResourceKind,
        endpoint: &Endpoint,
        body: Option<Value>,
    ) -> Result<RemoteObject, PlatformError> {
        let body = body.ok_or_else(|| PlatformError::Decode(format!("empty {} response", kind)))?;
        RemoteObject::from_raw(kind, endpoint.unwrap_item(body), &endpoint.fields)
    }
}

#[async_trait]
impl Platform for HttpPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
    ) -> Result<Vec<RemoteObject>, PlatformError> {
        let endpoint = self.endpoint(kind)?;
        let url = self.collection_url(kind, endpoint, namespace, true)?;
        debug!(%kind, %url, "List");

        let body = self
            .execute(self.client.get(url), false)
            .await?
            .unwrap_or(Value::Null);

        if has_next_page(self.family, &endpoint.list_key, &body) {
            return Err(PlatformError::Paginated(kind));
        }

        let items = body
            .get(&endpoint.list_key)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                PlatformError::Decode(format!(
                    "{} list response has no '{}' array",
                    kind, endpoint.list_key
                ))
            })?;

        items
            .into_iter()
            .map(|item| RemoteObject::from_raw(kind, item, &endpoint.fields))
            .collect()
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
    ) -> Result<RemoteObject, PlatformError> {
        let endpoint = self.endpoint(kind)?;
        let url = self.object_url(kind, endpoint, namespace, id)?;
        let body = self.execute(self.client.get(url), false).await?;
        self.normalize(kind, endpoint, body)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        body: &Value,
    ) -> Result<RemoteObject, PlatformError> {
        let endpoint = self.endpoint(kind)?;
        let url = self.collection_url(kind, endpoint, namespace, false)?;
        debug!(%kind, %url, "Create");

        let response = self
            .execute(self.client.post(url).json(&endpoint.wrap_item(body)), false)
            .await?;
        self.normalize(kind, endpoint, response)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
        body: &Value,
        version: Option<&str>,
    ) -> Result<RemoteObject, PlatformError> {
        let endpoint = self.endpoint(kind)?;
        let url = self.object_url(kind, endpoint, namespace, id)?;
        debug!(%kind, %url, version = ?version, "Replace");

        let mut body = body.clone();
        let mut request = self.client.put(url);
        match (&endpoint.version, version) {
            (VersionPlacement::Body { pointer }, Some(token)) => {
                set_pointer(&mut body, pointer, Value::from(token));
            }
            (VersionPlacement::IfMatch { prefix }, Some(token)) => {
                request = request.header("If-Match", format!("{}{}", prefix, token));
            }
            _ => {}
        }

        let response = self
            .execute(request.json(&endpoint.wrap_item(&body)), version.is_some())
            .await?;
        self.normalize(kind, endpoint, response)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
    ) -> Result<(), PlatformError> {
        let endpoint = self.endpoint(kind)?;
        let url = self.object_url(kind, endpoint, namespace, id)?;
        debug!(%kind, %url, "Delete");
        self.execute(self.client.delete(url), false).await?;
        Ok(())
    }

    async fn add_tag(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        id: &str,
        tag: &str,
    ) -> Result<(), PlatformError> {
        let endpoint = self.endpoint(kind)?;
        if !endpoint.taggable {
            return Err(PlatformError::Unsupported(kind, self.name.clone()));
        }
        let object = self.object_url(kind, endpoint, namespace, id)?;
        let url = join_segments(object.as_str(), ["tags", tag])?;
        debug!(%kind, %url, "Tag");
        self.execute(self.client.put(url), false).await?;
        Ok(())
    }
}

/// Append path segments to `base`, percent-encoding each one
fn join_segments<I, S>(base: &str, segments: I) -> Result<Url, PlatformError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut url =
        Url::parse(base).map_err(|e| PlatformError::Decode(format!("bad URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| PlatformError::Decode(format!("'{}' cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Fold a non-success HTTP status into the platform error taxonomy
pub fn classify_status(status: StatusCode, body: &str, versioned_write: bool) -> PlatformError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound(message),
        StatusCode::PRECONDITION_FAILED => PlatformError::VersionConflict(message),
        StatusCode::CONFLICT if versioned_write => PlatformError::VersionConflict(message),
        StatusCode::CONFLICT => PlatformError::Conflict(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Unauthorized(message),
        _ => PlatformError::Unavailable(message),
    }
}

/// Exchange Keystone password credentials for a scoped token
pub async fn keystone_token(client: &Client, auth: &KeystoneAuth) -> Result<String, PlatformError> {
    let url = format!("{}/v3/auth/tokens", auth.auth_url.trim_end_matches('/'));
    let body = json!({
        "auth": {
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": auth.username,
                        "domain": {"name": auth.domain},
                        "password": auth.password,
                    }
                }
            },
            "scope": {
                "project": {
                    "name": auth.project,
                    "domain": {"name": auth.domain},
                }
            }
        }
    });

    let response = client.post(&url).json(&body).send().await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                PlatformError::Unauthorized(format!("keystone rejected credentials: {}", text))
            }
            _ => classify_status(status, &text, false),
        });
    }

    response
        .headers()
        .get("X-Subject-Token")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .ok_or_else(|| PlatformError::Decode("keystone response has no X-Subject-Token".into()))
}
