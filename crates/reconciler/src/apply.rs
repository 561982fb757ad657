//! Diff and apply for managed children.
//!
//! Children are discovered by label selector, compared over only the fields
//! the controller owns, and created, updated or left alone accordingly.

use std::cmp::Ordering;

use fnflow_api::{CodeArtifact, ComputeUnit, LabelSelector, Resource};
use itertools::Itertools;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::ResourceClient;

/// Characters used for generated name suffixes.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Length of generated name suffixes.
const SUFFIX_LEN: usize = 6;

/// A child kind whose controller-owned fields can be compared and copied.
pub trait ManagedResource: Resource + Clone + Send + Sync + 'static {
    /// Whether the controller-owned fields of `self` and `other` agree.
    fn managed_eq(&self, other: &Self) -> bool;

    /// Copy the controller-owned fields of `expected` into `self`.
    fn adopt_managed(&mut self, expected: &Self);
}

impl ManagedResource for CodeArtifact {
    fn managed_eq(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn adopt_managed(&mut self, expected: &Self) {
        self.data.clone_from(&expected.data);
    }
}

impl ManagedResource for ComputeUnit {
    fn managed_eq(&self, other: &Self) -> bool {
        self.spec == other.spec
    }

    fn adopt_managed(&mut self, expected: &Self) {
        self.spec.clone_from(&expected.spec);
    }
}

/// What `ensure_resource` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// The object as stored after applying, and how it got there.
#[derive(Debug, Clone)]
pub struct Applied<K> {
    pub resource: K,
    pub outcome: ApplyOutcome,
}

impl<K> Applied<K> {
    /// Whether a write was issued.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.outcome != ApplyOutcome::Unchanged
    }
}

/// Make the single child matching `selector` agree with `expected`.
///
/// `expected.metadata.name` is used as the base for a generated name when
/// nothing matches. When several objects match, the oldest (by creation
/// time, then name) is kept and the others are deleted.
///
/// # Errors
///
/// Returns [`Error::Store`] if listing, creating, updating or deleting fails.
pub async fn ensure_resource<K, C>(
    client: &C,
    expected: K,
    selector: &LabelSelector,
) -> Result<Applied<K>>
where
    K: ManagedResource,
    C: ResourceClient<K> + ?Sized,
{
    let namespace = expected.meta().namespace.clone();
    let mut matches = client
        .list(&namespace, selector)
        .await
        .map_err(|e| Error::store_failed(format!("list {}", K::KIND), e))?
        .into_iter()
        .sorted_by(oldest_first);

    let Some(mut current) = matches.next() else {
        return create(client, expected).await;
    };

    for duplicate in matches {
        let key = duplicate.key();
        warn!(
            kind = K::KIND,
            kept = %current.key(),
            deleted = %key,
            "Deleting duplicate child"
        );
        client
            .delete(&key)
            .await
            .map_err(|e| Error::store_failed(format!("delete {}", K::KIND), e))?;
    }

    if current.managed_eq(&expected) {
        debug!(kind = K::KIND, name = %current.key(), "Child up to date");
        return Ok(Applied {
            resource: current,
            outcome: ApplyOutcome::Unchanged,
        });
    }

    current.adopt_managed(&expected);
    let updated = client
        .update(current)
        .await
        .map_err(|e| Error::store_failed(format!("update {}", K::KIND), e))?;

    info!(kind = K::KIND, name = %updated.key(), "Updated child");
    Ok(Applied {
        resource: updated,
        outcome: ApplyOutcome::Updated,
    })
}

async fn create<K, C>(client: &C, mut expected: K) -> Result<Applied<K>>
where
    K: ManagedResource,
    C: ResourceClient<K> + ?Sized,
{
    let name = generate_name(&expected.meta().name);
    expected.meta_mut().name = name;

    let created = client
        .create(expected)
        .await
        .map_err(|e| Error::store_failed(format!("create {}", K::KIND), e))?;

    info!(kind = K::KIND, name = %created.key(), "Created child");
    Ok(Applied {
        resource: created,
        outcome: ApplyOutcome::Created,
    })
}

fn oldest_first<K: Resource>(a: &K, b: &K) -> Ordering {
    // Objects without a timestamp have not been persisted; sort them last.
    let by_age = match (a.meta().creation_timestamp, b.meta().creation_timestamp) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_age.then_with(|| a.meta().name.cmp(&b.meta().name))
}

/// `<base>-<6 random characters>`.
#[must_use]
pub fn generate_name(base: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .filter_map(|_| SUFFIX_ALPHABET.choose(&mut rng).copied().map(char::from))
        .collect();
    format!("{base}-{suffix}")
}
