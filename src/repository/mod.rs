// ============================================================================
// Repository Module
// ============================================================================
//
// Typed CRUD over one document kind. Every read is checked against the
// repository's schema before it is decoded, and every write is checked before
// anything is sent to the store.
//
// - `schema`: field-level document schema, programmatic or from JSON Schema
// - `options`: defaults, index policy and id field
// - `hooks`: `before_persist` transformation applied to each write batch
//
// ============================================================================

pub mod hooks;
pub mod options;
pub mod schema;

pub use hooks::{NoopHook, PersistHook};
pub use options::RepositoryOptions;
pub use schema::{DocumentSchema, FieldDef, FieldType};

use crate::context::Context;
use crate::core::{Document, Error, FieldError, Key, LoadError, Payload, Result, SaveError};
use crate::index::exclude_from_indexes;
use crate::store::{Query, QueryMeta, WriteMode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Types a [`Repository`] can store.
///
/// The id lives in the serialized form under the repository's id field and
/// must be a non-empty string.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Model for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Typed access to the documents of one kind.
///
/// Repositories hold no request state; every call takes the [`Context`] whose
/// loader (and therefore cache and transaction) it should use.
///
/// # Example
///
/// ```ignore
/// let users = Repository::<User>::new("User", DocumentSchema::new()
///     .field("id", FieldType::String)
///     .field("email", FieldType::String));
///
/// let ctx = client.context();
/// users.save(&ctx, User { id: "u1".into(), email: "a@b.c".into() }).await?;
/// let user = users.get_required(&ctx, "u1").await?;
/// ```
pub struct Repository<T: Model> {
    kind: String,
    schema: DocumentSchema,
    options: RepositoryOptions,
    ancestor: Option<Key>,
    hook: Arc<dyn PersistHook<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Repository<T> {
    pub fn new(kind: impl Into<String>, schema: DocumentSchema) -> Self {
        Self {
            kind: kind.into(),
            schema,
            options: RepositoryOptions::default(),
            ancestor: None,
            hook: Arc::new(NoopHook),
            _marker: PhantomData,
        }
    }

    pub fn with_options(mut self, options: RepositoryOptions) -> Result<Self> {
        options.validate().map_err(Error::Config)?;
        self.options = options;
        Ok(self)
    }

    pub fn with_hook(mut self, hook: impl PersistHook<T> + 'static) -> Self {
        self.hook = Arc::new(hook);
        self
    }

    /// Places every document of this repository under `ancestor`.
    pub fn with_ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn schema(&self) -> &DocumentSchema {
        &self.schema
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn key(&self, id: &str) -> Key {
        match &self.ancestor {
            Some(ancestor) => ancestor.child(self.kind.as_str(), id),
            None => Key::new(self.kind.as_str(), id),
        }
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn get(&self, ctx: &Context, id: &str) -> Result<Option<T>> {
        let mut found = self.get_many(ctx, &[id]).await?;
        Ok(found.pop().flatten())
    }

    /// Loads `ids` in one coalesced batch. Results follow the input order.
    pub async fn get_many<S: AsRef<str>>(&self, ctx: &Context, ids: &[S]) -> Result<Vec<Option<T>>> {
        let keys: Vec<Key> = ids.iter().map(|id| self.key(id.as_ref())).collect();
        let docs = ctx.loader().get_many(&keys).await?;
        keys.iter()
            .zip(docs)
            .map(|(key, doc)| doc.map(|doc| self.decode(key, doc)).transpose())
            .collect()
    }

    pub async fn get_required(&self, ctx: &Context, id: &str) -> Result<T> {
        self.get(ctx, id).await?.ok_or_else(|| {
            LoadError::NotFound {
                kind: self.kind.clone(),
                id: id.to_string(),
            }
            .into()
        })
    }

    /// Runs `query` against this repository's kind and decodes every row.
    ///
    /// The query's kind is replaced with the repository's, the repository's
    /// ancestor applies unless the query names one, and `keys_only` is
    /// ignored.
    pub async fn query(&self, ctx: &Context, mut query: Query) -> Result<(Vec<T>, QueryMeta)> {
        query.kind = self.kind.clone();
        query.keys_only = false;
        if query.ancestor.is_none() {
            query.ancestor = self.ancestor.clone();
        }

        let (rows, meta) = ctx.loader().run_query(&query).await?;
        let entities = rows
            .into_iter()
            .map(|row| self.decode(&row.key, row.data))
            .collect::<Result<Vec<_>>>()?;
        Ok((entities, meta))
    }

    fn decode(&self, key: &Key, mut doc: Document) -> Result<T> {
        self.options.apply_defaults(&mut doc);
        doc.insert(
            self.options.id_field.clone(),
            Value::String(key.id().to_string()),
        );

        let errors = self.schema.validate(&doc);
        if !errors.is_empty() {
            warn!(kind = %self.kind, id = key.id(), errors = errors.len(), "stored document failed validation");
            return Err(self.invalid(key, errors));
        }

        serde_json::from_value(Value::Object(doc))
            .map_err(|err| self.invalid(key, vec![FieldError::new("", err.to_string())]))
    }

    fn invalid(&self, key: &Key, errors: Vec<FieldError>) -> Error {
        LoadError::Invalid {
            kind: self.kind.clone(),
            id: key.id().to_string(),
            errors,
        }
        .into()
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    pub async fn save(&self, ctx: &Context, entity: T) -> Result<T> {
        self.write_one(ctx, WriteMode::Save, entity).await
    }

    pub async fn save_many(&self, ctx: &Context, entities: Vec<T>) -> Result<Vec<T>> {
        self.write(ctx, WriteMode::Save, entities).await
    }

    pub async fn update(&self, ctx: &Context, entity: T) -> Result<T> {
        self.write_one(ctx, WriteMode::Update, entity).await
    }

    pub async fn update_many(&self, ctx: &Context, entities: Vec<T>) -> Result<Vec<T>> {
        self.write(ctx, WriteMode::Update, entities).await
    }

    pub async fn upsert(&self, ctx: &Context, entity: T) -> Result<T> {
        self.write_one(ctx, WriteMode::Upsert, entity).await
    }

    pub async fn upsert_many(&self, ctx: &Context, entities: Vec<T>) -> Result<Vec<T>> {
        self.write(ctx, WriteMode::Upsert, entities).await
    }

    pub async fn insert(&self, ctx: &Context, entity: T) -> Result<T> {
        self.write_one(ctx, WriteMode::Insert, entity).await
    }

    pub async fn insert_many(&self, ctx: &Context, entities: Vec<T>) -> Result<Vec<T>> {
        self.write(ctx, WriteMode::Insert, entities).await
    }

    async fn write_one(&self, ctx: &Context, mode: WriteMode, entity: T) -> Result<T> {
        let mut written = self.write(ctx, mode, vec![entity]).await?;
        written.pop().ok_or_else(|| {
            SaveError {
                kind: self.kind.clone(),
                id: String::new(),
                errors: vec![FieldError::new("", "persist hook returned no entity")],
            }
            .into()
        })
    }

    /// Hook, then validate the whole batch, then write it through the loader.
    ///
    /// Nothing reaches the store unless every entity is valid.
    pub async fn write(&self, ctx: &Context, mode: WriteMode, entities: Vec<T>) -> Result<Vec<T>> {
        let entities = self.hook.before_persist(ctx, entities).await?;
        let payloads = entities
            .iter()
            .map(|entity| self.encode(entity))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            kind = %self.kind,
            mode = mode.as_str(),
            count = payloads.len(),
            "writing documents"
        );
        ctx.loader().write(mode, payloads).await?;
        Ok(entities)
    }

    fn encode(&self, entity: &T) -> Result<Payload> {
        let mut doc = match serde_json::to_value(entity) {
            Ok(Value::Object(doc)) => doc,
            Ok(other) => {
                return Err(self.rejected("", vec![FieldError::new(
                    "",
                    format!("expected object, found {}", value_kind(&other)),
                )]));
            }
            Err(err) => {
                return Err(self.rejected("", vec![FieldError::new("", err.to_string())]));
            }
        };
        self.options.apply_defaults(&mut doc);

        let id_field = &self.options.id_field;
        let id = match doc.get(id_field) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => String::new(),
        };

        let mut errors = self.schema.validate(&doc);
        if id.is_empty() && !errors.iter().any(|e| &e.path == id_field) {
            errors.push(FieldError::new(id_field, "must be a non-empty string"));
        }
        if !errors.is_empty() {
            return Err(self.rejected(&id, errors));
        }

        doc.remove(id_field);
        let exclusions = exclude_from_indexes(&doc, &self.options.index);
        Ok(Payload::new(self.key(&id), doc).with_exclusions(exclusions))
    }

    fn rejected(&self, id: &str, errors: Vec<FieldError>) -> Error {
        SaveError {
            kind: self.kind.clone(),
            id: id.to_string(),
            errors,
        }
        .into()
    }

    /// Rewrites every stored document so its index exclusions match the
    /// current policy.
    pub async fn reindex(&self, ctx: &Context) -> Result<Vec<T>> {
        self.reindex_with(ctx, |entity| entity).await
    }

    /// Like [`reindex`](Self::reindex), passing every entity through
    /// `transform` first.
    pub async fn reindex_with<F>(&self, ctx: &Context, transform: F) -> Result<Vec<T>>
    where
        F: FnMut(T) -> T + Send,
    {
        let (entities, _) = self.query(ctx, Query::new(self.kind.as_str())).await?;
        let entities: Vec<T> = entities.into_iter().map(transform).collect();
        debug!(kind = %self.kind, count = entities.len(), "reindexing documents");
        self.update_many(ctx, entities).await
    }

    // ------------------------------------------------------------------------
    // Deletes
    // ------------------------------------------------------------------------

    pub async fn delete<S: AsRef<str>>(&self, ctx: &Context, ids: &[S]) -> Result<()> {
        let keys = ids.iter().map(|id| self.key(id.as_ref())).collect();
        ctx.loader().delete(keys).await
    }

    /// Deletes every document of this kind and returns how many there were.
    ///
    /// Runs a keys-only query followed by a delete, so documents written in
    /// between are not removed unless the context is transaction-bound.
    pub async fn delete_all(&self, ctx: &Context) -> Result<usize> {
        let mut query = Query::new(self.kind.as_str()).keys_only();
        query.ancestor = self.ancestor.clone();

        let (rows, _) = ctx.loader().run_query(&query).await?;
        let keys: Vec<Key> = rows.into_iter().map(|row| row.key).collect();
        let count = keys.len();
        if count > 0 {
            ctx.loader().delete(keys).await?;
        }
        debug!(kind = %self.kind, count, "deleted all documents");
        Ok(count)
    }
}

impl<T: Model> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            schema: self.schema.clone(),
            options: self.options.clone(),
            ancestor: self.ancestor.clone(),
            hook: Arc::clone(&self.hook),
            _marker: PhantomData,
        }
    }
}

impl<T: Model> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("kind", &self.kind)
            .field("ancestor", &self.ancestor)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
