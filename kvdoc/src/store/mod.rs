use crate::config::StoreConfig;
use crate::document::{Document, Value, CREATED_FIELD, ID_FIELD};
use crate::error::{KvDocError, Result};
use crate::kv::{KvStore, Tx};
use crate::schema::{parse_schema, Schema, SchemaHandle, Table};
use crate::validation::{self, RuleRegistry};
use crate::watcher::SchemaWatcher;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};

const BUCKETS_INDEX: &str = "buckets";
const BUCKETS_PREFIX: &str = "BUCKETS:";
const UNIQUE_PREFIX: &str = "unique_";

/// Iteration direction for [`Store::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

/// The embedded document store.
///
/// Documents live in the substrate under `<collection>:<id>`. Each
/// collection gets an iteration index (`idx:<collection>`) and a uniqueness
/// index (`idx_unique:<collection>`) whose entries
/// `unique_<collection>:<field>:<value>` name the owning document. Every
/// write runs in one substrate transaction, so documents and their index
/// entries change together or not at all.
pub struct Store {
    kv: KvStore,
    schema: SchemaHandle,
    rules: RuleRegistry,
    model_file: Option<std::path::PathBuf>,
    ids: Mutex<ulid::Generator>,
    _watcher: Option<SchemaWatcher>,
}

impl Store {
    /// Open a store as described by `config`. `rules` are merged over the
    /// built-in validators.
    pub fn open(config: StoreConfig, rules: RuleRegistry) -> Result<Self> {
        config.check()?;

        let schema = match &config.model_file {
            Some(path) => parse_schema(path)?,
            None => Schema::default(),
        };
        let kv = match &config.path {
            Some(path) => KvStore::open(path)?,
            None => KvStore::open_in_memory()?,
        };
        let handle = SchemaHandle::new(schema);

        let watcher = match (&config.model_file, config.watch_model) {
            (Some(path), true) => Some(SchemaWatcher::start(
                path,
                handle.clone(),
                config.watch_debounce(),
            )?),
            _ => None,
        };

        let store = Store::assemble(kv, handle, rules, config.model_file.clone(), watcher);
        store.generate_indexes()?;

        log::debug!(
            "Opened store at {} with {} declared tables",
            config
                .path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".into()),
            store.schema().tables.len()
        );
        Ok(store)
    }

    /// Open an in-memory store governed by `schema`.
    pub fn open_in_memory(schema: Schema, rules: RuleRegistry) -> Result<Self> {
        let store = Store::assemble(
            KvStore::open_in_memory()?,
            SchemaHandle::new(schema),
            rules,
            None,
            None,
        );
        store.generate_indexes()?;
        Ok(store)
    }

    fn assemble(
        kv: KvStore,
        schema: SchemaHandle,
        extra_rules: RuleRegistry,
        model_file: Option<std::path::PathBuf>,
        watcher: Option<SchemaWatcher>,
    ) -> Self {
        let mut rules = RuleRegistry::builtin();
        rules.merge(extra_rules);
        Store {
            kv,
            schema,
            rules,
            model_file,
            ids: Mutex::new(ulid::Generator::new()),
            _watcher: watcher,
        }
    }

    /// Make sure the bucket index exists and every known collection has its
    /// iteration and uniqueness indexes.
    fn generate_indexes(&self) -> Result<()> {
        self.kv.update(|tx| {
            let indexes = tx.indexes()?;
            if !indexes.iter().any(|i| i == BUCKETS_INDEX) {
                tx.create_index(BUCKETS_INDEX, &format!("{BUCKETS_PREFIX}*"))?;
            }

            let mut buckets = Vec::new();
            tx.ascend(BUCKETS_INDEX, |_, collection| {
                buckets.push(collection.to_string());
                Ok(true)
            })?;

            for collection in &buckets {
                ensure_collection_indexes(tx, &indexes, collection)?;
            }
            Ok(())
        })
    }

    // ── Schema ──────────────────────────────────────────────────────

    /// Snapshot of the active schema.
    pub fn schema(&self) -> Arc<Schema> {
        self.schema.current()
    }

    pub fn schema_version(&self) -> u64 {
        self.schema.version()
    }

    /// Re-read the configured descriptor and install it. On error the
    /// active schema is left untouched. Returns the new schema version.
    pub fn reload_schema(&self) -> Result<u64> {
        let path = self.model_file.as_deref().ok_or_else(|| {
            KvDocError::Config("store was opened without a model_file".into())
        })?;
        let schema = parse_schema(path)?;
        Ok(self.schema.install(schema))
    }

    /// Install a schema directly, bypassing the descriptor file.
    pub fn install_schema(&self, schema: Schema) -> u64 {
        self.schema.install(schema)
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    // ── Documents ───────────────────────────────────────────────────

    /// Insert a new document. The store assigns `_id` and `_created`
    /// (overwriting any caller-supplied values), validates, reserves unique
    /// values and writes, all in one transaction. Returns the stored form.
    pub fn create(&self, collection: &str, mut data: Document) -> Result<Document> {
        check_collection_name(collection)?;

        let id = self.next_id();
        data.insert(ID_FIELD, id.clone());
        data.insert(CREATED_FIELD, Utc::now());

        let schema = self.schema.current();
        let data = validation::validate_and_prepare(&schema, collection, data, &self.rules)?;
        let uniques = unique_values(schema.table(collection), &data)?;
        let encoded = data.encode()?;
        let key = document_key(collection, &id);

        self.kv.update(|tx| {
            tx.set(&format!("{BUCKETS_PREFIX}{collection}"), collection)?;
            let indexes = tx.indexes()?;
            ensure_collection_indexes(tx, &indexes, collection)?;

            for (field, value) in &uniques {
                let ukey = unique_key(collection, field, value);
                if tx.get(&ukey)?.is_some() {
                    return Err(KvDocError::UniqueConstraintViolation {
                        field: field.clone(),
                        value: value.clone(),
                    });
                }
                tx.set(&ukey, &id)?;
            }

            tx.set(&key, &encoded)?;
            Ok(())
        })?;

        log::debug!("Created {collection}/{id}");
        Ok(data)
    }

    /// Get a document by ID
    pub fn get_by_id(&self, collection: &str, id: &str) -> Result<Document> {
        check_collection_name(collection)?;
        let key = document_key(collection, id);
        let raw = self
            .kv
            .view(|tx| tx.get(&key))?
            .ok_or_else(|| not_found(collection, id))?;
        Document::decode(&raw)
    }

    /// Replace an existing document. `_id` identifies the target and must
    /// be present. Uniqueness entries move from old to new values inside the
    /// same transaction as the overwrite. A missing `_created` is carried
    /// over from the stored document.
    pub fn update(&self, collection: &str, data: Document) -> Result<()> {
        check_collection_name(collection)?;

        let id = match data.get(ID_FIELD) {
            None | Some(Value::Null) => return Err(KvDocError::MissingIdentifier),
            Some(v) => v.to_display_string(),
        };

        let schema = self.schema.current();
        let mut data = validation::validate_and_prepare(&schema, collection, data, &self.rules)?;
        let table = schema.table(collection);
        let key = document_key(collection, &id);

        self.kv.update(|tx| {
            let existing = tx
                .get(&key)?
                .ok_or_else(|| not_found(collection, &id))?;
            let existing = Document::decode(&existing)?;

            for field in table.into_iter().flat_map(Table::unique_fields) {
                let stored = field.stored_name();
                let new_value = match data.get(stored) {
                    None | Some(Value::Null) => {
                        return Err(KvDocError::NullUniqueField {
                            field: field.name.clone(),
                        })
                    }
                    Some(v) => v.to_display_string(),
                };
                let new_key = unique_key(collection, &field.name, &new_value);

                if let Some(owner) = tx.get(&new_key)? {
                    if owner != id {
                        return Err(KvDocError::UniqueConstraintViolation {
                            field: field.name.clone(),
                            value: new_value,
                        });
                    }
                }

                if let Some(old) = existing.get(stored).filter(|v| !v.is_null()) {
                    let old_key = unique_key(collection, &field.name, &old.to_display_string());
                    if old_key != new_key && tx.get(&old_key)?.as_deref() == Some(id.as_str()) {
                        tx.delete(&old_key)?;
                    }
                }
                tx.set(&new_key, &id)?;
            }

            if data.is_absent(CREATED_FIELD) {
                if let Some(created) = existing.get(CREATED_FIELD) {
                    data.insert(CREATED_FIELD, created.clone());
                }
            }

            tx.set(&key, &data.encode()?)?;
            Ok(())
        })?;

        log::debug!("Updated {collection}/{id}");
        Ok(())
    }

    /// Delete a document and every uniqueness entry it owns.
    pub fn delete(&self, collection: &str, id: &str) -> Result<()> {
        check_collection_name(collection)?;
        let released = self.kv.update(|tx| {
            if tx.delete(&document_key(collection, id))?.is_none() {
                return Err(not_found(collection, id));
            }

            let mut owned = Vec::new();
            tx.ascend(&unique_index(collection), |key, owner| {
                if owner == id {
                    owned.push(key.to_string());
                }
                Ok(true)
            })?;
            for key in &owned {
                tx.delete(key)?;
            }
            Ok(owned.len())
        })?;

        log::debug!("Deleted {collection}/{id} ({released} unique entries released)");
        Ok(())
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        check_collection_name(collection)?;
        let prefix = format!("{collection}:");
        self.kv.view(|tx| {
            let mut count = 0;
            tx.ascend(&iteration_index(collection), |key, _| {
                if key.starts_with(&prefix) {
                    count += 1;
                }
                Ok(true)
            })?;
            Ok(count)
        })
    }

    /// One page of a collection in index order.
    ///
    /// `offset` is a 1-based page number: the first `offset * limit - limit`
    /// entries are skipped, then up to `limit` are returned. `offset = 0` or
    /// `limit = 0` yield an empty page.
    pub fn list(
        &self,
        collection: &str,
        offset: usize,
        limit: usize,
        order: Order,
    ) -> Result<Vec<Document>> {
        check_collection_name(collection)?;
        if offset == 0 || limit == 0 {
            return Ok(Vec::new());
        }
        let skip = offset.saturating_mul(limit) - limit;
        let index = iteration_index(collection);

        self.kv.view(|tx| {
            let mut docs = Vec::new();
            let mut skipped = 0;
            let visit = |_: &str, value: &str| -> Result<bool> {
                if skipped < skip {
                    skipped += 1;
                    return Ok(true);
                }
                docs.push(Document::decode(value)?);
                Ok(docs.len() < limit)
            };
            match order {
                Order::Ascending => tx.ascend(&index, visit)?,
                Order::Descending => tx.descend(&index, visit)?,
            }
            Ok(docs)
        })
    }

    /// First document, in index order, whose encoded text contains `query`
    /// verbatim. This is a raw text scan, not a structured query.
    pub fn find_one(&self, collection: &str, query: &str) -> Result<Option<Document>> {
        check_collection_name(collection)?;
        self.kv.view(|tx| {
            let mut found = None;
            tx.ascend(&iteration_index(collection), |_, value| {
                if value.contains(query) {
                    found = Some(Document::decode(value)?);
                    return Ok(false);
                }
                Ok(true)
            })?;
            Ok(found)
        })
    }

    /// Names of every collection that has received a write.
    pub fn collections(&self) -> Result<Vec<String>> {
        self.kv.view(|tx| {
            let mut names = Vec::new();
            tx.ascend(BUCKETS_INDEX, |_, collection| {
                names.push(collection.to_string());
                Ok(true)
            })?;
            Ok(names)
        })
    }

    /// Close the store, stopping the schema watcher if one is running.
    pub fn close(self) -> Result<()> {
        self.kv.close()
    }

    fn next_id(&self) -> String {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ids.generate().unwrap_or_else(|_| ulid::Ulid::new());
        id.to_string().to_lowercase()
    }
}

fn check_collection_name(collection: &str) -> Result<()> {
    let reserved = collection.starts_with(UNIQUE_PREFIX)
        || collection == BUCKETS_PREFIX.trim_end_matches(':');
    if collection.is_empty() || collection.contains(':') || reserved {
        return Err(KvDocError::InvalidCollection(collection.to_string()));
    }
    Ok(())
}

/// Collect `(field, value)` for every unique field, failing on nulls.
fn unique_values(table: Option<&Table>, data: &Document) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for field in table.into_iter().flat_map(Table::unique_fields) {
        match data.get(field.stored_name()) {
            None | Some(Value::Null) => {
                return Err(KvDocError::NullUniqueField {
                    field: field.name.clone(),
                })
            }
            Some(v) => pairs.push((field.name.clone(), v.to_display_string())),
        }
    }
    Ok(pairs)
}

fn ensure_collection_indexes(tx: &Tx<'_>, existing: &[String], collection: &str) -> Result<()> {
    let iteration = iteration_index(collection);
    if !existing.contains(&iteration) {
        tx.create_index(&iteration, &format!("{collection}:*"))?;
    }
    let unique = unique_index(collection);
    if !existing.contains(&unique) {
        tx.create_index(&unique, &format!("{UNIQUE_PREFIX}{collection}:*"))?;
    }
    Ok(())
}

fn not_found(collection: &str, id: &str) -> KvDocError {
    KvDocError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn document_key(collection: &str, id: &str) -> String {
    format!("{collection}:{id}")
}

// `:` never appears in a collection name, so these cannot collide.
fn iteration_index(collection: &str) -> String {
    format!("idx:{collection}")
}

fn unique_index(collection: &str) -> String {
    format!("idx_unique:{collection}")
}

fn unique_key(collection: &str, field: &str, value: &str) -> String {
    format!("{UNIQUE_PREFIX}{collection}:{field}:{value}")
}
