use crate::config::TOKEN_STORAGE_KEY;
use crate::misc::Typename;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

/// One storage scope for the bearer token
#[async_trait]
pub trait TokenTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;
    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;
    async fn remove(&self, key: &str) -> Result<(), Error>;
}

/// Durable tier, one file per key under the work folder
pub struct FileTier {
    root: PathBuf,
}

impl FileTier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl TokenTier for FileTier {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path(key)).await {
            Ok(raw) => {
                let token = raw.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        fs::create_dir_all(&self.root).await?;
        let path = self.path(key);

        // owner-only from creation
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&path).await?;

        // open keeps the mode of an existing file
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
        }

        file.write_all(value.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        match fs::remove_file(self.path(key)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Session tier, gone with the process
#[derive(Default)]
pub struct MemoryTier {
    entries: tokio::sync::RwLock<HashMap<String, String>>,
}

#[async_trait]
impl TokenTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

pub struct CredentialStore {
    durable: Arc<dyn TokenTier>,
    session: Arc<dyn TokenTier>,
    key: String,
}

impl CredentialStore {
    pub fn new(durable: Arc<dyn TokenTier>, session: Arc<dyn TokenTier>) -> Self {
        Self { durable, session, key: TOKEN_STORAGE_KEY.to_string() }
    }

    /// File-backed durable tier in `work_folder`, in-memory session tier
    pub fn with_work_folder(work_folder: &str) -> Self {
        Self::new(Arc::new(FileTier::new(work_folder)), Arc::new(MemoryTier::default()))
    }

    pub async fn load(&self) -> Result<Option<String>, Error> {
        Ok(self.load_with_tier().await?.map(|(token, _)| token))
    }

    /// Token plus whether it came from the durable tier
    pub async fn load_with_tier(&self) -> Result<Option<(String, bool)>, Error> {
        if let Some(token) = self.durable.get(&self.key).await? {
            return Ok(Some((token, true)));
        }
        Ok(self.session.get(&self.key).await?.map(|token| (token, false)))
    }

    /// Writes one tier and clears the other so precedence stays unambiguous
    pub async fn save(&self, token: &str, remember: bool) -> Result<(), Error> {
        if remember {
            self.durable.set(&self.key, token).await?;
            self.session.remove(&self.key).await
        } else {
            self.session.set(&self.key, token).await?;
            self.durable.remove(&self.key).await
        }
    }

    pub async fn clear(&self) -> Result<(), Error> {
        let durable = self.durable.remove(&self.key).await;
        let session = self.session.remove(&self.key).await;
        durable.and(session)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl Identity {
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.username)
    }
}

struct Live {
    token: String,
    identity: Option<Identity>,
    remember: bool,
}

type TeardownHook = Box<dyn Fn() + Send + Sync>;

/// Current authenticated identity, shared by every component that talks to the backend.
///
/// Every login and every teardown bumps the epoch, so work started under one
/// session can tell that it must not touch the view of the next one.
pub struct Session {
    store: CredentialStore,
    live: RwLock<Option<Live>>,
    epoch: AtomicU64,
    hooks: Mutex<Vec<TeardownHook>>,
    /// Held across begin and teardown so storage writes never interleave
    transition: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(store: CredentialStore) -> Self {
        Self {
            store,
            live: RwLock::new(None),
            epoch: AtomicU64::new(0),
            hooks: Mutex::new(Vec::new()),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Restores a stored token, identity stays unknown until probed
    pub async fn init(&self) -> Result<bool, Error> {
        let Some((token, remember)) = self.store.load_with_tier().await? else {
            debug!("no stored token");
            return Ok(false);
        };
        debug!(remember, "restored stored token");
        self.replace(Live { token, identity: None, remember });
        Ok(true)
    }

    /// Persists the token first, then makes it the live session
    pub async fn begin(&self, token: String, identity: Identity, remember: bool) -> Result<u64, Error> {
        let _transition = self.transition.lock().await;
        self.store.save(&token, remember).await?;
        info!(user = %identity.username, remember, "session started");
        Ok(self.replace(Live { token, identity: Some(identity), remember }))
    }

    fn replace(&self, live: Live) -> u64 {
        let mut slot = self.live.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(live);
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_identity(&self, identity: Identity) {
        if let Some(live) = self.live.write().unwrap_or_else(PoisonError::into_inner).as_mut() {
            live.identity = Some(identity);
        }
    }

    pub fn token(&self) -> Option<String> {
        self.live.read().unwrap_or_else(PoisonError::into_inner).as_ref().map(|l| l.token.clone())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.live.read().unwrap_or_else(PoisonError::into_inner).as_ref().and_then(|l| l.identity.clone())
    }

    pub fn remembered(&self) -> bool {
        self.live.read().unwrap_or_else(PoisonError::into_inner).as_ref().is_some_and(|l| l.remember)
    }

    pub fn is_authenticated(&self) -> bool {
        self.live.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// True while the session observed at `epoch` is still the live one
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch && self.is_authenticated()
    }

    /// Registers a callback run once per executed teardown
    pub fn on_teardown(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).push(Box::new(hook));
    }

    /// Explicit logout. Always clears both tiers; hooks run only if a session was live.
    pub async fn teardown(&self) -> bool {
        self.teardown_inner(None).await
    }

    /// Teardown on behalf of work started at `epoch`. A no-op once that
    /// session is gone, so concurrent 401s tear down exactly once.
    pub async fn teardown_if_current(&self, epoch: u64) -> bool {
        self.teardown_inner(Some(epoch)).await
    }

    /// Drops the live session but keeps the stored token for a later retry.
    /// No hooks run.
    pub fn forget(&self) {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        if live.take().is_some() {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn teardown_inner(&self, epoch: Option<u64>) -> bool {
        let transition = self.transition.lock().await;
        let taken = {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            if epoch.is_some_and(|e| e != self.epoch.load(Ordering::SeqCst)) {
                return false;
            }
            let taken = live.take();
            if taken.is_some() {
                self.epoch.fetch_add(1, Ordering::SeqCst);
            }
            taken
        };

        if epoch.is_some() && taken.is_none() {
            return false;
        }

        if let Err(e) = self.store.clear().await {
            warn!("failed to clear stored token: {e}");
        }
        drop(transition);

        let Some(live) = taken else {
            return false;
        };

        info!(user = ?live.identity.map(|i| i.username), "session torn down");
        for hook in self.hooks.lock().unwrap_or_else(PoisonError::into_inner).iter() {
            hook();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::type_name_of_val;
    use std::sync::atomic::AtomicUsize;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TmpTestDir {
        path: PathBuf,
    }

    impl TmpTestDir {
        fn for_test<F: ?Sized>(f: &F) -> std::io::Result<Self> {
            let fq = type_name_of_val(f);
            let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
            let path = std::path::Path::new("/tmp").join(format!("{}{}", fq, nanos));
            std::fs::create_dir_all(&path)?;
            Ok(Self { path })
        }
    }

    impl Drop for TmpTestDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    fn memory_store() -> (CredentialStore, Arc<MemoryTier>, Arc<MemoryTier>) {
        let durable = Arc::new(MemoryTier::default());
        let session = Arc::new(MemoryTier::default());
        (CredentialStore::new(durable.clone(), session.clone()), durable, session)
    }

    fn alice() -> Identity {
        Identity { username: "alice".into(), role: Some("analyst".into()), full_name: Some("Alice A".into()) }
    }

    #[tokio::test]
    async fn test_save_then_load_for_both_tiers() {
        for remember in [true, false] {
            for token in ["tok-1", "eyJhbGciOiJIUzI1NiJ9.e30.sig"] {
                let (store, durable, session) = memory_store();
                store.save(token, remember).await.unwrap();
                assert_eq!(store.load().await.unwrap().as_deref(), Some(token));

                // exactly one tier holds the token
                let in_durable = durable.get(TOKEN_STORAGE_KEY).await.unwrap().is_some();
                let in_session = session.get(TOKEN_STORAGE_KEY).await.unwrap().is_some();
                assert_eq!((in_durable, in_session), (remember, !remember));

                store.clear().await.unwrap();
                assert_eq!(store.load().await.unwrap(), None);
            }
        }
    }

    #[tokio::test]
    async fn test_switching_tiers_clears_the_other() {
        let (store, durable, session) = memory_store();
        store.save("t", true).await.unwrap();
        store.save("t2", false).await.unwrap();

        assert_eq!(durable.get(TOKEN_STORAGE_KEY).await.unwrap(), None);
        assert_eq!(session.get(TOKEN_STORAGE_KEY).await.unwrap().as_deref(), Some("t2"));
        assert_eq!(store.load_with_tier().await.unwrap(), Some(("t2".to_string(), false)));
    }

    #[tokio::test]
    async fn test_durable_wins_over_session() {
        let (store, durable, session) = memory_store();
        session.set(TOKEN_STORAGE_KEY, "from-session").await.unwrap();
        durable.set(TOKEN_STORAGE_KEY, "from-durable").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("from-durable"));
    }

    #[tokio::test]
    async fn test_file_tier_survives_new_store() {
        let tmp = TmpTestDir::for_test(&test_file_tier_survives_new_store).unwrap();
        let root = tmp.path.join("nested");
        let store = CredentialStore::new(Arc::new(FileTier::new(&root)), Arc::new(MemoryTier::default()));
        store.save("durable-token", true).await.unwrap();

        // a fresh process sees the durable token but not the session one
        let reopened = CredentialStore::new(Arc::new(FileTier::new(&root)), Arc::new(MemoryTier::default()));
        assert_eq!(reopened.load().await.unwrap().as_deref(), Some("durable-token"));

        reopened.clear().await.unwrap();
        assert!(!root.join(TOKEN_STORAGE_KEY).exists());
        // clearing twice is fine
        reopened.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_epochs() {
        let (store, _, _) = memory_store();
        let session = Session::new(store);
        assert!(!session.init().await.unwrap());
        assert!(!session.is_authenticated());

        let epoch = session.begin("tok".into(), alice(), false).await.unwrap();
        assert!(session.is_current(epoch));
        assert_eq!(session.token().as_deref(), Some("tok"));
        assert_eq!(session.identity().unwrap().display_name(), "Alice A");
        assert!(!session.remembered());

        assert!(session.teardown().await);
        assert!(!session.is_current(epoch));
        assert_eq!(session.token(), None);
        assert_eq!(session.store().load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_init_restores_durable_token() {
        let (store, durable, _) = memory_store();
        durable.set(TOKEN_STORAGE_KEY, "kept").await.unwrap();
        let session = Session::new(store);
        assert!(session.init().await.unwrap());
        assert_eq!(session.token().as_deref(), Some("kept"));
        assert!(session.remembered());
        assert_eq!(session.identity(), None);
    }

    #[tokio::test]
    async fn test_concurrent_teardowns_run_hooks_once() {
        let (store, _, _) = memory_store();
        let session = Session::new(store);
        let runs = Arc::new(AtomicUsize::new(0));
        session.on_teardown({
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });

        let epoch = session.begin("tok".into(), alice(), true).await.unwrap();
        let (a, b) = tokio::join!(session.teardown_if_current(epoch), session.teardown_if_current(epoch));
        assert!(a ^ b);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // a plain logout afterwards is a no-op for hooks
        assert!(!session.teardown().await);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_teardown_spares_new_session() {
        let (store, _, _) = memory_store();
        let session = Session::new(store);
        let old = session.begin("old".into(), alice(), false).await.unwrap();
        let new = session.begin("new".into(), alice(), false).await.unwrap();

        assert!(!session.teardown_if_current(old).await);
        assert!(session.is_current(new));
        assert_eq!(session.store().load().await.unwrap().as_deref(), Some("new"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_tier_writes_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TmpTestDir::for_test(&test_file_tier_writes_owner_only).unwrap();
        let tier = FileTier::new(&tmp.path);
        let path = tmp.path.join(TOKEN_STORAGE_KEY);

        tier.set(TOKEN_STORAGE_KEY, "fresh").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        tier.set(TOKEN_STORAGE_KEY, "rewritten").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(tier.get(TOKEN_STORAGE_KEY).await.unwrap().as_deref(), Some("rewritten"));
    }

    /// Memory tier whose removals take a while
    #[derive(Default)]
    struct SlowTier {
        inner: MemoryTier,
    }

    #[async_trait]
    impl TokenTier for SlowTier {
        async fn get(&self, key: &str) -> Result<Option<String>, Error> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), Error> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_login_during_teardown_keeps_new_token() {
        let store = CredentialStore::new(Arc::new(SlowTier::default()), Arc::new(SlowTier::default()));
        let session = Arc::new(Session::new(store));
        session.begin("t1".into(), alice(), true).await.unwrap();

        let teardown = tokio::spawn({
            let session = session.clone();
            async move { session.teardown().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let epoch = session.begin("t2".into(), alice(), true).await.unwrap();

        assert!(teardown.await.unwrap());
        assert!(session.is_current(epoch));
        assert_eq!(session.token().as_deref(), Some("t2"));
        assert_eq!(session.store().load().await.unwrap().as_deref(), Some("t2"));
    }
}
