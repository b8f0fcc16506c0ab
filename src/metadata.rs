//! Protocol metadata attached to requests before dispatch.
//!
//! Providers are registered per action namespace. At send time the
//! facade asks the provider for the request's namespace to describe the
//! action, then stamps the resolved addressing onto the result. Requests
//! in a namespace without a provider get an empty bag.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::message::Action;

/// Structured bag describing a request as it would appear on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Metadata {
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub dst_service: Option<String>,
    /// Provider-defined event name, e.g. the traffic class an action produces.
    pub event: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Metadata {
    pub fn empty() -> Self {
        Metadata::default()
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// `true` when no provider contributed anything beyond addressing.
    pub fn is_bare(&self) -> bool {
        self.event.is_none() && self.attributes.is_empty()
    }
}

/// Produces metadata for the actions of one namespace.
///
/// Providers must not send messages; they only describe the action
/// they are handed.
pub trait MetadataProvider {
    fn get_metadata(&self, action: &Action) -> Metadata;
}

/// A provider backed by a closure — handy for tests and small scenarios.
impl<F> MetadataProvider for F
where
    F: Fn(&Action) -> Metadata,
{
    fn get_metadata(&self, action: &Action) -> Metadata {
        (self)(action)
    }
}

/// Providers keyed by action namespace. One provider per namespace.
#[derive(Default)]
pub struct MetadataRegistry {
    providers: BTreeMap<String, Box<dyn MetadataProvider>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        MetadataRegistry {
            providers: BTreeMap::new(),
        }
    }

    /// Register `provider` for `namespace`.
    ///
    /// The first registration wins; a duplicate is skipped with a warning
    /// and `false` is returned.
    pub fn register(
        &mut self,
        namespace: impl Into<String>,
        provider: Box<dyn MetadataProvider>,
    ) -> bool {
        let namespace = namespace.into();
        if self.providers.contains_key(&namespace) {
            tracing::warn!(%namespace, "metadata provider already registered, skipping");
            return false;
        }
        self.providers.insert(namespace, provider);
        true
    }

    pub fn get(&self, namespace: &str) -> Option<&dyn MetadataProvider> {
        self.providers.get(namespace).map(|p| p.as_ref())
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.providers.contains_key(namespace)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Build the metadata for `action`, falling back to an empty bag.
    pub fn describe(&self, action: &Action) -> Metadata {
        match self.get(action.namespace()) {
            Some(provider) => provider.get_metadata(action),
            None => Metadata::empty(),
        }
    }
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("namespaces", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
