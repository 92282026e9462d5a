//! Reverse lookup: from an approximate object back to the code that yields it.

use crate::backing::BackingStore;
use crate::category::Catalogued;
use crate::code::{split_candidates, Authority};
use crate::error::StoreError;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Find-cache key: objects that [`match`](Catalogued::matches) are the same key.
pub struct FindKey<T>(pub Arc<T>);

impl<T> Clone for FindKey<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Catalogued> std::fmt::Debug for FindKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FindKey").field(&self.0).finish()
    }
}

impl<T: Catalogued> PartialEq for FindKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.matches(&other.0)
    }
}

impl<T: Catalogued> Eq for FindKey<T> {}

impl<T: Catalogued> Hash for FindKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.fingerprint());
    }
}

/// Code carried by `object` when its scope names `authority`, trimmed of that scope.
pub fn owned_identifier<'a, T: Catalogued>(authority: &Authority, object: &'a T) -> Option<&'a str> {
    let identifier = object.identifier()?;
    split_candidates(identifier)
        .find(|split| authority.matches(split.authority))
        .map(|split| split.local)
}

/// Generate every code of `approximate`'s category on `store` and return the first whose object
/// matches. Rejected candidates are dropped immediately.
pub async fn scan<T, S>(store: &mut S, approximate: &T) -> Result<Option<String>, StoreError>
where
    T: Catalogued,
    S: BackingStore<T> + ?Sized,
{
    let codes = store.list_codes(approximate.category()).await?;
    for code in codes {
        match store.generate(&code).await {
            Ok(candidate) if candidate.matches(approximate) => return Ok(Some(code)),
            Ok(_) | Err(StoreError::NotFound) => {}
            Err(StoreError::Failed(err)) => {
                tracing::debug!(target: "codebroker::cache", code = %code, error = %err, "skipping candidate");
            }
        }
    }
    Ok(None)
}
