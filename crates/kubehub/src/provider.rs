//! Credential resolver: `providerConfigRef.name` -> authenticated [`ForgeClient`].
//!
//! Clients are built fresh for every reconciliation; nothing is cached here.

use std::time::Duration;

use async_trait::async_trait;
use forgeplane_core::ProviderConfigRef;
use forgeplane_forge::{ClientConfig, ForgeClient, ForgeError};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Forge connection profile.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "forgeplane.io", version = "v1alpha1", kind = "ProviderConfig")]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigSpec {
    /// Forge root, e.g. `https://git.example.com` (the `/api/v1` suffix is optional).
    pub base_url: String,
    pub credentials: Credentials,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
    /// Extra PEM-encoded CA certificates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CredentialSource {
    Inline,
    Environment,
    Secret,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub source: CredentialSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnvSelector {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecretKeySelector {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("provider config {0:?} not found")]
    ConfigNotFound(String),
    #[error("provider config invalid: {0}")]
    InvalidConfig(String),
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("kube api: {0}")]
    Kube(#[from] kube::Error),
    #[error("building forge client: {0}")]
    Client(#[from] ForgeError),
}

/// Produces an authenticated forge client for a provider reference.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, reference: &ProviderConfigRef) -> Result<ForgeClient, ConnectError>;
}

/// Reads one key of a Kubernetes secret.
#[async_trait]
pub trait SecretReader: Send + Sync {
    async fn read(&self, selector: &SecretKeySelector) -> Result<Option<String>, ConnectError>;
}

#[async_trait]
impl SecretReader for Client {
    async fn read(&self, selector: &SecretKeySelector) -> Result<Option<String>, ConnectError> {
        let api: Api<Secret> = Api::namespaced(self.clone(), &selector.namespace);
        let Some(secret) = api.get_opt(&selector.name).await? else {
            return Ok(None);
        };
        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(&selector.key)) {
            let s = String::from_utf8(bytes.0.clone())
                .map_err(|_| ConnectError::Credentials(format!("secret key {} is not UTF-8", selector.key)))?;
            return Ok(Some(s));
        }
        Ok(secret.string_data.as_ref().and_then(|d| d.get(&selector.key)).cloned())
    }
}

/// Dereference the credential source into a token.
pub async fn resolve_token(creds: &Credentials, secrets: &dyn SecretReader) -> Result<String, ConnectError> {
    let raw = match creds.source {
        CredentialSource::Inline => creds
            .token
            .clone()
            .ok_or_else(|| ConnectError::InvalidConfig("credentials.token is required for Inline".into()))?,
        CredentialSource::Environment => {
            let sel = creds
                .env
                .as_ref()
                .ok_or_else(|| ConnectError::InvalidConfig("credentials.env is required for Environment".into()))?;
            std::env::var(&sel.name)
                .map_err(|_| ConnectError::Credentials(format!("environment variable {} is not set", sel.name)))?
        }
        CredentialSource::Secret => {
            let sel = creds
                .secret_ref
                .as_ref()
                .ok_or_else(|| ConnectError::InvalidConfig("credentials.secretRef is required for Secret".into()))?;
            secrets.read(sel).await?.ok_or_else(|| {
                ConnectError::Credentials(format!("secret {}/{} has no key {}", sel.namespace, sel.name, sel.key))
            })?
        }
    };
    let token = raw.trim().to_string();
    if token.is_empty() {
        return Err(ConnectError::Credentials("resolved token is empty".into()));
    }
    Ok(token)
}

/// Build a client bound to the base URL, the token, and the TLS policy of `spec`.
pub fn build_client(spec: &ProviderConfigSpec, token: String) -> Result<ForgeClient, ConnectError> {
    if spec.base_url.trim().is_empty() {
        return Err(ConnectError::InvalidConfig("baseUrl is empty".into()));
    }
    let mut cfg = ClientConfig::new(spec.base_url.clone(), token);
    if let Some(secs) = spec.timeout_seconds {
        cfg.timeout = Duration::from_secs(secs.max(1));
    }
    cfg.insecure_skip_tls_verify = spec.insecure_skip_tls_verify.unwrap_or(false);
    cfg.ca_bundle_pem = spec.ca_bundle.clone();
    Ok(ForgeClient::new(cfg)?)
}

/// [`Connector`] that reads `ProviderConfig` objects and secrets from the cluster.
#[derive(Clone)]
pub struct KubeConnector {
    client: Client,
}

impl KubeConnector {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl Connector for KubeConnector {
    async fn connect(&self, reference: &ProviderConfigRef) -> Result<ForgeClient, ConnectError> {
        let api: Api<ProviderConfig> = Api::all(self.client.clone());
        let pc = api
            .get_opt(&reference.name)
            .await?
            .ok_or_else(|| ConnectError::ConfigNotFound(reference.name.clone()))?;
        let token = resolve_token(&pc.spec.credentials, &self.client).await?;
        let forge = build_client(&pc.spec, token)?;
        debug!(provider = %reference.name, api = %forge.api_base(), "kubehub: forge client ready");
        Ok(forge)
    }
}
