//! Read-only access to objects in the live cluster.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;
use tracing::debug;

use crate::error::LookupError;
use crate::template::CapiManifest;

/// Fetches a single object by identity.
///
/// Not-found is `Ok(None)`; every other failure is a [`LookupError`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectLookup: Send + Sync {
    async fn get_object(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CapiManifest>, LookupError>;
}

/// [`ObjectLookup`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeObjectLookup {
    client: Client,
}

impl KubeObjectLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster config.
    ///
    /// # Errors
    ///
    /// Returns the client error if no configuration can be inferred.
    pub async fn try_default() -> Result<Self, kube::Error> {
        Ok(Self::new(Client::try_default().await?))
    }
}

fn api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
    ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind))
}

#[async_trait]
impl ObjectLookup for KubeObjectLookup {
    async fn get_object(
        &self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CapiManifest>, LookupError> {
        let error = |message: String| LookupError {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            message,
        };

        let api: Api<DynamicObject> = Api::namespaced_with(
            self.client.clone(),
            namespace,
            &api_resource(api_version, kind),
        );
        match api.get(name).await {
            Ok(object) => {
                let value = serde_json::to_value(&object).map_err(|e| error(e.to_string()))?;
                let manifest = serde_json::from_value(value).map_err(|e| error(e.to_string()))?;
                Ok(Some(manifest))
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("{} {}/{} not found", kind, namespace, name);
                Ok(None)
            }
            Err(e) => Err(error(e.to_string())),
        }
    }
}
