use crate::core::{Error, ErrorClass, Result, StoreError};
use crate::loader::{BatchingLoader, LoaderConfig};
use crate::store::Datastore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Authenticated caller attached to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub claims: serde_json::Map<String, Value>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: BTreeSet::new(),
            claims: serde_json::Map::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }
}

/// Request-scoped state threaded through every data-access call.
///
/// A context owns the loader (and therefore the read cache) for one request
/// or job. Clones share that loader. Entering a transaction produces a new
/// context with a transaction-bound loader; the principal and the property
/// bag carry over.
#[derive(Clone)]
pub struct Context {
    loader: BatchingLoader,
    user: Option<Arc<Principal>>,
    props: Arc<RwLock<HashMap<String, Value>>>,
}

impl Context {
    pub fn new(store: Arc<dyn Datastore>, config: LoaderConfig) -> Self {
        Self::from_loader(BatchingLoader::new(store, config))
    }

    pub fn from_loader(loader: BatchingLoader) -> Self {
        Self {
            loader,
            user: None,
            props: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Same principal and property bag, different loader.
    pub(crate) fn with_loader(&self, loader: BatchingLoader) -> Self {
        Self {
            loader,
            user: self.user.clone(),
            props: Arc::clone(&self.props),
        }
    }

    pub fn loader(&self) -> &BatchingLoader {
        &self.loader
    }

    pub fn is_transactional(&self) -> bool {
        self.loader.is_transactional()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.loader.transaction_id()
    }

    // ------------------------------------------------------------------------
    // Principal
    // ------------------------------------------------------------------------

    pub fn user(&self) -> Option<&Principal> {
        self.user.as_deref()
    }

    /// Attaches the authenticated principal. Allowed once per context.
    pub fn attach_user(&mut self, user: Principal) -> Result<()> {
        if self.user.is_some() {
            return Err(Error::PrincipalAlreadyAttached);
        }
        self.user = Some(Arc::new(user));
        Ok(())
    }

    pub fn with_user(mut self, user: Principal) -> Result<Self> {
        self.attach_user(user)?;
        Ok(self)
    }

    // ------------------------------------------------------------------------
    // Property bag
    // ------------------------------------------------------------------------

    pub fn prop(&self, name: &str) -> Result<Option<Value>> {
        let props = self.props.read()?;
        Ok(props.get(name).cloned())
    }

    pub fn prop_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.prop(name)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn set_prop(&self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut props = self.props.write()?;
        props.insert(name.into(), value);
        Ok(())
    }

    pub fn remove_prop(&self, name: &str) -> Result<Option<Value>> {
        let mut props = self.props.write()?;
        Ok(props.remove(name))
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Runs `op` inside a transaction, joining the current one if this
    /// context is already transaction-bound.
    pub async fn transactional<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError> + ErrorClass + std::fmt::Display,
    {
        crate::transaction::transactional(self, op).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("loader", &self.loader)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn context() -> Context {
        Context::new(Arc::new(MemoryStore::new()), LoaderConfig::default())
    }

    #[test]
    fn test_user_attaches_once() {
        let mut ctx = context();
        assert!(ctx.user().is_none());

        ctx.attach_user(Principal::new("u1").with_role("admin")).unwrap();
        assert!(ctx.user().unwrap().has_role("admin"));

        let second = ctx.attach_user(Principal::new("u2"));
        assert!(matches!(second, Err(Error::PrincipalAlreadyAttached)));
        assert_eq!(ctx.user().unwrap().id, "u1");
    }

    #[test]
    fn test_props_are_shared_between_clones() {
        let ctx = context();
        let clone = ctx.clone();

        ctx.set_prop("locale", "en-GB").unwrap();
        assert_eq!(clone.prop("locale").unwrap(), Some(json!("en-GB")));

        clone.set_prop("limits", json!({"max": 3})).unwrap();
        let max: Option<serde_json::Map<String, Value>> = ctx.prop_as("limits").unwrap();
        assert_eq!(max.unwrap()["max"], json!(3));

        assert!(ctx.remove_prop("locale").unwrap().is_some());
        assert!(clone.prop("locale").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_context_keeps_user_and_props() {
        let ctx = context().with_user(Principal::new("u1")).unwrap();
        ctx.set_prop("request_id", "r-1").unwrap();

        let seen = ctx
            .transactional(|tx| async move {
                assert!(tx.is_transactional());
                tx.set_prop("touched", true)?;
                Ok::<_, Error>((tx.user().map(|u| u.id.clone()), tx.prop("request_id")?))
            })
            .await
            .unwrap();

        assert_eq!(seen.0.as_deref(), Some("u1"));
        assert_eq!(seen.1, Some(json!("r-1")));
        assert_eq!(ctx.prop("touched").unwrap(), Some(json!(true)));
        assert!(!ctx.is_transactional());
    }
}
