//! Live-reference collection.
//!
//! The entity layer is an external collaborator consulted only for the
//! reference strings it currently holds. [`ReferenceSource`] is the
//! seam: the db crate reads `Member.photo` and every attachment record
//! of Item, Location and Event in one consistent pass and hands back
//! raw strings; [`collect_live`] runs them through the codec and keeps
//! only stored keys. External references never enter the live set
//! because they are never garbage-collected.

use std::collections::HashSet;

use tracing::debug;

use crate::error::MediaError;
use crate::reference::{AttachmentRef, ObjectKey};

/// Read access to the reference strings held by the entity layer.
///
/// One call must observe a logically consistent snapshot (a single
/// transaction is sufficient; strict consistency across concurrent
/// writers is absorbed by the GC grace window).
pub trait ReferenceSource: Send + Sync {
    /// Every reference string currently persisted by any entity.
    fn live_references(
        &self,
    ) -> impl std::future::Future<Output = Result<HashSet<String>, MediaError>> + Send;
}

/// Collect the live set of stored object keys.
///
/// Unparseable references are skipped: an entity pointing at an unsafe
/// string cannot keep an object alive.
///
/// # Errors
///
/// Propagates reference-source failures.
pub async fn collect_live<S: ReferenceSource>(
    source: &S,
) -> Result<HashSet<ObjectKey>, MediaError> {
    let raw = source.live_references().await?;
    let mut live = HashSet::with_capacity(raw.len());
    for reference in &raw {
        match AttachmentRef::parse(reference) {
            Ok(AttachmentRef::Stored(key)) => {
                live.insert(key);
            }
            Ok(AttachmentRef::External(_)) | Err(_) => {}
        }
    }
    debug!(raw = raw.len(), live = live.len(), "collected live reference set");
    Ok(live)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory reference source for tests.
    pub struct FixedSource(pub std::sync::Mutex<HashSet<String>>);

    impl FixedSource {
        pub fn new<I: IntoIterator<Item = &'static str>>(refs: I) -> Self {
            Self(std::sync::Mutex::new(
                refs.into_iter().map(str::to_string).collect(),
            ))
        }

        pub fn set<I: IntoIterator<Item = String>>(&self, refs: I) {
            *self.0.lock().unwrap() = refs.into_iter().collect();
        }
    }

    impl ReferenceSource for FixedSource {
        async fn live_references(&self) -> Result<HashSet<String>, MediaError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedSource;
    use super::*;

    #[tokio::test]
    async fn externals_and_garbage_are_excluded() {
        let source = FixedSource::new([
            "media/a.jpg",
            "b.png",
            "https://cdn.example.com/x.png",
            "//cdn.example.com/y.png",
            "../../etc/passwd",
            "",
        ]);

        let live = collect_live(&source).await.unwrap();
        assert_eq!(live.len(), 2);
        assert!(live.contains(&ObjectKey::parse("media/a.jpg").unwrap()));
        assert!(live.contains(&ObjectKey::parse("b.png").unwrap()));
    }

    #[tokio::test]
    async fn duplicates_collapse() {
        let source = FixedSource::new(["a.png", "/a.png", "a.png"]);
        let live = collect_live(&source).await.unwrap();
        assert_eq!(live.len(), 1);
    }
}
