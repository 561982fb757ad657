//! Sink resolution: turning a destination into a URI.

use std::sync::Arc;

use async_trait::async_trait;
use fnflow_api::{Destination, Function};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::store::AddressableLookup;

/// Resolves a function's sink destination.
#[async_trait]
pub trait SinkResolver: Send + Sync {
    /// Absolute URI events should be delivered to.
    ///
    /// A reference without a namespace is looked up in `owner`'s namespace.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkResolution`] when the destination is empty, the
    /// URI is relative without a reference, or the referenced object is
    /// missing or has no address.
    async fn resolve_uri(&self, destination: &Destination, owner: &Function) -> Result<Url>;
}

/// Resolves references through the store's addressable lookup.
pub struct StoreSinkResolver {
    lookup: Arc<dyn AddressableLookup>,
}

impl StoreSinkResolver {
    pub fn new(lookup: Arc<dyn AddressableLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl SinkResolver for StoreSinkResolver {
    async fn resolve_uri(&self, destination: &Destination, owner: &Function) -> Result<Url> {
        let Some(reference) = &destination.reference else {
            let uri = destination
                .uri
                .as_deref()
                .ok_or_else(|| Error::sink_resolution("destination has neither ref nor uri"))?;
            return Url::parse(uri)
                .map_err(|e| Error::sink_resolution(format!("uri {uri:?} is not absolute: {e}")));
        };

        let mut reference = reference.clone();
        if reference.namespace.is_none() {
            reference.namespace = Some(owner.metadata.namespace.clone());
        }

        let address = self
            .lookup
            .address_of(&reference)
            .await
            .map_err(|e| Error::sink_resolution(format!("{reference}: {e}")))?
            .ok_or_else(|| Error::sink_resolution(format!("{reference} has no address")))?;
        debug!(reference = %reference, address = %address, "Resolved sink reference");

        match destination.uri.as_deref() {
            Some(uri) => address
                .join(uri)
                .map_err(|e| Error::sink_resolution(format!("cannot resolve {uri:?} against {address}: {e}"))),
            None => Ok(address),
        }
    }
}
