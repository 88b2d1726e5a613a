//! Typed access over the raw JSON hashes the [`StateStore`] trait deals in.
//!
//! Operators and handlers work with domain structs; these helpers do the
//! (de)serialization at the store boundary so the trait itself stays
//! object-safe.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::kinds::Kind;
use crate::store::StateStore;

pub async fn get_as<T: DeserializeOwned>(
    store: &dyn StateStore,
    kind: Kind,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(kind, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn put_as<T: Serialize>(
    store: &dyn StateStore,
    kind: Kind,
    key: &str,
    record: &T,
) -> Result<(), StoreError> {
    store.put(kind, key, serde_json::to_value(record)?).await
}

/// Atomic typed patch: deserialize the snapshot, apply `f`, serialize back.
/// `f` must be pure with respect to its input — the store may re-run it.
pub async fn patch_as<T, F>(
    store: &dyn StateStore,
    kind: Kind,
    key: &str,
    f: F,
) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(T) -> T + Send + Sync,
{
    let value = store
        .patch(kind, key, &|value| {
            let record: T = serde_json::from_value(value)?;
            Ok(serde_json::to_value(f(record))?)
        })
        .await?;
    Ok(serde_json::from_value(value)?)
}

/// Like [`patch_as`] but the mutator may reject the update.
pub async fn try_patch_as<T, F>(
    store: &dyn StateStore,
    kind: Kind,
    key: &str,
    f: F,
) -> Result<T, StoreError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(T) -> Result<T, StoreError> + Send + Sync,
{
    let value = store
        .patch(kind, key, &|value| {
            let record: T = serde_json::from_value(value)?;
            Ok(serde_json::to_value(f(record)?)?)
        })
        .await?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use bosd_domain::Component;

    #[tokio::test]
    async fn typed_round_trip() {
        let store = InMemoryStore::new();
        let c = Component::new("x1", "");
        put_as(&store, Kind::Components, "/x1", &c).await.unwrap();

        let got: Component = get_as(&store, Kind::Components, "/x1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.id, "x1");
    }

    #[tokio::test]
    async fn typed_patch_applies_pure_function() {
        let store = InMemoryStore::new();
        put_as(&store, Kind::Components, "/x1", &Component::new("x1", ""))
            .await
            .unwrap();

        let updated: Component = patch_as(&store, Kind::Components, "/x1", |mut c: Component| {
            c.session = "s1".into();
            c
        })
        .await
        .unwrap();
        assert_eq!(updated.session, "s1");

        // Idempotent: applying the same patch again yields the same state.
        let again: Component = patch_as(&store, Kind::Components, "/x1", |mut c: Component| {
            c.session = "s1".into();
            c
        })
        .await
        .unwrap();
        assert_eq!(again, updated);
    }
}
