use super::{Conversation, ConversationStore, ConversationSummary};
use crate::providers::Message;
use crate::core::error::EspejoError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Local store first, remote store best effort.
///
/// Remote failures are logged and never fail a write; reads prefer the
/// remote copy and fall back to the local one.
pub struct TieredStore {
    local: Arc<dyn ConversationStore>,
    remote: Option<Arc<dyn ConversationStore>>,
}

impl TieredStore {
    pub fn new(local: Arc<dyn ConversationStore>, remote: Option<Arc<dyn ConversationStore>>) -> Self {
        Self { local, remote }
    }

    pub fn local_only(local: Arc<dyn ConversationStore>) -> Self {
        Self::new(local, None)
    }
}

#[async_trait]
impl ConversationStore for TieredStore {
    async fn save(&self, conversation: &Conversation) -> Result<(), EspejoError> {
        self.local.save(conversation).await?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.save(conversation).await {
                warn!(id = %conversation.id, "Remote save failed, kept local copy: {}", e);
            }
        }
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Conversation, EspejoError> {
        if let Some(remote) = &self.remote {
            match remote.load(id).await {
                Ok(conversation) => return Ok(conversation),
                Err(EspejoError::NotFound(_)) => {}
                Err(e) => warn!(id, "Remote load failed, using local copy: {}", e),
            }
        }
        self.local.load(id).await
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<ConversationSummary>, EspejoError> {
        if let Some(remote) = &self.remote {
            match remote.list(owner_id).await {
                Ok(summaries) => return Ok(summaries),
                Err(e) => warn!("Remote list failed, using local history: {}", e),
            }
        }
        self.local.list(owner_id).await
    }

    /// Appends to the local record, then mirrors the whole record so a
    /// remote that missed earlier writes catches up.
    async fn append(&self, id: &str, message: &Message) -> Result<(), EspejoError> {
        let remote = match (&self.remote, self.local.append(id, message).await) {
            (Some(remote), Ok(())) => remote,
            (None, result) => return result,
            // Only the remote knows this record; seed the local copy from it.
            (Some(remote), Err(EspejoError::NotFound(_))) => {
                let mut conversation = remote.load(id).await?;
                conversation.push(message.clone());
                return self.save(&conversation).await;
            }
            (Some(_), Err(e)) => return Err(e),
        };
        let conversation = self.local.load(id).await?;
        if let Err(e) = remote.save(&conversation).await {
            warn!(id, "Remote append failed, kept local copy: {}", e);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), EspejoError> {
        self.local.delete(id).await?;
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(id).await {
                warn!(id, "Remote delete failed: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Message;
    use crate::store::LocalStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Unreachable;

    #[async_trait]
    impl ConversationStore for Unreachable {
        async fn save(&self, _: &Conversation) -> Result<(), EspejoError> {
            Err(EspejoError::Storage("offline".into()))
        }
        async fn load(&self, _: &str) -> Result<Conversation, EspejoError> {
            Err(EspejoError::Storage("offline".into()))
        }
        async fn list(&self, _: Option<&str>) -> Result<Vec<ConversationSummary>, EspejoError> {
            Err(EspejoError::Storage("offline".into()))
        }
        async fn delete(&self, _: &str) -> Result<(), EspejoError> {
            Err(EspejoError::Storage("offline".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_remote_degrades_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = TieredStore::new(
            Arc::new(LocalStore::new(dir.path())),
            Some(Arc::new(Unreachable) as Arc<dyn ConversationStore>),
        );
        let mut c = Conversation::new(Some("me".into()), None);
        c.push(Message::user("hola"));

        store.save(&c).await.unwrap();
        store.append(&c.id, &Message::model("buenas")).await.unwrap();

        assert_eq!(store.load(&c.id).await.unwrap().messages.len(), 2);
        assert_eq!(store.list(Some("me")).await.unwrap().len(), 1);
        store.delete(&c.id).await.unwrap();
        assert!(store.list(Some("me")).await.unwrap().is_empty());
    }

    /// Remote that can be taken offline mid-test.
    struct Flaky {
        inner: LocalStore,
        offline: AtomicBool,
    }

    impl Flaky {
        fn check(&self) -> Result<(), EspejoError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(EspejoError::Storage("offline".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ConversationStore for Flaky {
        async fn save(&self, c: &Conversation) -> Result<(), EspejoError> {
            self.check()?;
            self.inner.save(c).await
        }
        async fn load(&self, id: &str) -> Result<Conversation, EspejoError> {
            self.check()?;
            self.inner.load(id).await
        }
        async fn list(&self, owner: Option<&str>) -> Result<Vec<ConversationSummary>, EspejoError> {
            self.check()?;
            self.inner.list(owner).await
        }
        async fn delete(&self, id: &str) -> Result<(), EspejoError> {
            self.check()?;
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn turns_written_during_an_outage_survive_the_remote_returning() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalStore::new(local_dir.path()));
        let remote = Arc::new(Flaky {
            inner: LocalStore::new(remote_dir.path()),
            offline: AtomicBool::new(false),
        });
        let store = TieredStore::new(
            local.clone() as Arc<dyn ConversationStore>,
            Some(remote.clone() as Arc<dyn ConversationStore>),
        );

        let mut c = Conversation::new(None, None);
        c.push(Message::user("turn1"));
        store.save(&c).await.unwrap();

        remote.offline.store(true, Ordering::SeqCst);
        store.append(&c.id, &Message::model("turn2")).await.unwrap();
        remote.offline.store(false, Ordering::SeqCst);
        store.append(&c.id, &Message::user("turn3")).await.unwrap();

        let texts = |c: Conversation| c.messages.iter().map(Message::text).collect::<Vec<_>>();
        let expected = vec!["turn1", "turn2", "turn3"];
        assert_eq!(texts(local.load(&c.id).await.unwrap()), expected);
        assert_eq!(texts(remote.inner.load(&c.id).await.unwrap()), expected);
        assert_eq!(texts(store.load(&c.id).await.unwrap()), expected);
    }

    #[tokio::test]
    async fn appending_to_a_remote_only_record_seeds_the_local_copy() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        let local = Arc::new(LocalStore::new(local_dir.path()));
        let remote = Arc::new(LocalStore::new(remote_dir.path()));
        let store = TieredStore::new(
            local.clone() as Arc<dyn ConversationStore>,
            Some(remote.clone() as Arc<dyn ConversationStore>),
        );

        let mut c = Conversation::new(None, None);
        c.push(Message::user("from another device"));
        remote.save(&c).await.unwrap();

        store.append(&c.id, &Message::model("reply")).await.unwrap();

        assert_eq!(local.load(&c.id).await.unwrap().messages.len(), 2);
        assert_eq!(remote.load(&c.id).await.unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn remote_copy_is_preferred_when_reachable() {
        let local_dir = tempfile::tempdir().unwrap();
        let remote_dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(LocalStore::new(remote_dir.path()));
        let store = TieredStore::new(
            Arc::new(LocalStore::new(local_dir.path())),
            Some(remote.clone() as Arc<dyn ConversationStore>),
        );

        let mut c = Conversation::new(None, None);
        c.push(Message::user("only remote knows the reply"));
        store.save(&c).await.unwrap();
        remote.append(&c.id, &Message::model("remote reply")).await.unwrap();

        assert_eq!(store.load(&c.id).await.unwrap().messages.len(), 2);
    }
}
