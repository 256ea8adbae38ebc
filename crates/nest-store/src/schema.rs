//! Schema declaration and the immutable store registry.
//!
//! A [`SchemaBuilder`] collects store, field, index and link declarations;
//! [`SchemaBuilder::build`] validates every cross reference and freezes
//! them into a [`Schema`]. Stores refer to each other by [`StoreId`], never
//! by pointer, so parent/child and link relationships need no shared
//! ownership.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use nest_codec::{decode_i64, encode, Tag, Value};
use nest_kv::{BucketPath, Database, KvRead, ReadTx};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::constraint::{
    Constraint, FkDeleteGuard, ForeignKeyIndex, SetIndex, SetListener, SystemEntityGuard,
    UniqueIndex,
};
use crate::context::MutateContext;
use crate::error::{StoreError, StoreResult};
use crate::events::{EntityEvent, EventBus, EventKind, ListenerId};
use crate::integrity::IntegritySink;
use crate::link::LinkCollection;
use crate::record::Entity;
use crate::store::Store;
use crate::symbol::{EntitySymbol, SymbolKind};

/// Index of a store within its [`Schema`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(pub(crate) usize);

/// Handler run when a root row is deleted, before constraints veto.
pub type CascadeHandler =
    Arc<dyn Fn(&mut MutateContext<'_>, &str) -> StoreResult<()> + Send + Sync>;

/// Migration step run once per component version.
pub type MigrationFn = Arc<dyn Fn(&mut MutateContext<'_>) -> StoreResult<()> + Send + Sync>;

/// What a delete of a referenced row does to rows pointing at it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnDelete {
    /// Refuse the delete while references remain.
    #[default]
    Restrict,
    /// Clear the referencing field. Requires a nullable key.
    Nullify,
}

/// Options for a foreign-key index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FkOptions {
    /// Allow the key to be empty.
    pub nullable: bool,
    pub on_delete: OnDelete,
}

pub(crate) enum Cascade {
    Nullify {
        referencing: StoreId,
        field: String,
        inverse: String,
    },
    Custom(CascadeHandler),
}

pub(crate) struct StoreDef {
    pub(crate) entity_type: String,
    pub(crate) parent: Option<StoreId>,
    pub(crate) children: Vec<StoreId>,
    pub(crate) symbols: BTreeMap<String, EntitySymbol>,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) links: Vec<LinkCollection>,
    pub(crate) cascades: Vec<Cascade>,
}

struct Migration {
    component: String,
    version: i64,
    run: MigrationFn,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct FieldDecl {
    name: String,
    tag: Tag,
    kind: SymbolKind,
    link: Option<String>,
}

enum ConstraintDecl {
    Unique { field: String, nullable: bool },
    Set { field: String },
    ForeignKey { field: String, inverse: String, options: FkOptions },
    System { field: String },
}

struct LinkDecl {
    field: String,
    target: String,
    inverse: String,
}

/// Declarations for one store.
pub struct StoreBuilder {
    entity_type: String,
    parent: Option<String>,
    fields: Vec<FieldDecl>,
    private: Vec<String>,
    constraints: Vec<ConstraintDecl>,
    links: Vec<LinkDecl>,
}

impl StoreBuilder {
    fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            parent: None,
            fields: Vec::new(),
            private: Vec::new(),
            constraints: Vec::new(),
            links: Vec::new(),
        }
    }

    fn field(&mut self, name: &str, tag: Tag, kind: SymbolKind, link: Option<&str>) -> &mut Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            tag,
            kind,
            link: link.map(str::to_string),
        });
        self
    }

    /// Nest this store's rows inside rows of `parent` with the same id.
    pub fn child_of(&mut self, parent: &str) -> &mut Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn scalar(&mut self, name: &str, tag: Tag) -> &mut Self {
        self.field(name, tag, SymbolKind::Scalar, None)
    }

    pub fn set(&mut self, name: &str, tag: Tag) -> &mut Self {
        self.field(name, tag, SymbolKind::Set, None)
    }

    /// A string-keyed map stored as a bucket tree; `name.key.sub` resolves
    /// to a leaf.
    pub fn map(&mut self, name: &str) -> &mut Self {
        self.field(name, Tag::Nil, SymbolKind::Map, None)
    }

    /// A scalar holding the id of a row in `target`. Chains through it
    /// resolve (`manager.name`).
    pub fn link(&mut self, name: &str, target: &str) -> &mut Self {
        self.field(name, Tag::String, SymbolKind::Scalar, Some(target))
    }

    /// Hide a field from untrusted queries.
    pub fn private(&mut self, name: &str) -> &mut Self {
        self.private.push(name.to_string());
        self
    }

    pub fn unique(&mut self, field: &str) -> &mut Self {
        self.constraints.push(ConstraintDecl::Unique {
            field: field.to_string(),
            nullable: false,
        });
        self
    }

    /// Unique index that leaves empty values unindexed.
    pub fn unique_nullable(&mut self, field: &str) -> &mut Self {
        self.constraints.push(ConstraintDecl::Unique {
            field: field.to_string(),
            nullable: true,
        });
        self
    }

    pub fn set_index(&mut self, field: &str) -> &mut Self {
        self.constraints.push(ConstraintDecl::Set {
            field: field.to_string(),
        });
        self
    }

    /// Index the link field `field`, mirroring it into an `inverse` set on
    /// the linked store. Deletes of referenced rows are refused.
    pub fn foreign_key(&mut self, field: &str, inverse: &str) -> &mut Self {
        self.foreign_key_with(field, inverse, FkOptions::default())
    }

    pub fn foreign_key_with(&mut self, field: &str, inverse: &str, options: FkOptions) -> &mut Self {
        self.constraints.push(ConstraintDecl::ForeignKey {
            field: field.to_string(),
            inverse: inverse.to_string(),
            options,
        });
        self
    }

    /// Gate mutations of rows whose boolean `field` is true.
    pub fn system_flag(&mut self, field: &str) -> &mut Self {
        self.constraints.push(ConstraintDecl::System {
            field: field.to_string(),
        });
        self
    }

    /// Declare a many-to-many link set `field` to `target`, mirrored by
    /// `target.inverse`. The other side must declare the mirror.
    pub fn link_set(&mut self, field: &str, target: &str, inverse: &str) -> &mut Self {
        self.links.push(LinkDecl {
            field: field.to_string(),
            target: target.to_string(),
            inverse: inverse.to_string(),
        });
        self
    }
}

/// Collects declarations and builds a [`Schema`].
pub struct SchemaBuilder {
    config: StoreConfig,
    stores: Vec<StoreBuilder>,
    cascades: Vec<(String, CascadeHandler)>,
    set_listeners: Vec<(String, String, SetListener)>,
    migrations: Vec<Migration>,
}

impl SchemaBuilder {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            stores: Vec::new(),
            cascades: Vec::new(),
            set_listeners: Vec::new(),
            migrations: Vec::new(),
        }
    }

    /// Declarations for `entity_type`, created on first use.
    pub fn store(&mut self, entity_type: &str) -> &mut StoreBuilder {
        let pos = match self.stores.iter().position(|s| s.entity_type == entity_type) {
            Some(pos) => pos,
            None => {
                self.stores.push(StoreBuilder::new(entity_type));
                self.stores.len() - 1
            }
        };
        &mut self.stores[pos]
    }

    /// Run `handler` with the id of every row deleted from `entity_type`.
    pub fn on_delete(
        &mut self,
        entity_type: &str,
        handler: impl Fn(&mut MutateContext<'_>, &str) -> StoreResult<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.cascades
            .push((entity_type.to_string(), Arc::new(handler)));
        self
    }

    /// Observe before/after values whenever the set index on
    /// `entity_type.field` changes.
    pub fn on_set_change(
        &mut self,
        entity_type: &str,
        field: &str,
        listener: impl Fn(&mut MutateContext<'_>, &crate::constraint::SetChange) -> StoreResult<()>
            + Send
            + Sync
            + 'static,
    ) -> &mut Self {
        self.set_listeners
            .push((entity_type.to_string(), field.to_string(), Arc::new(listener)));
        self
    }

    /// Register a migration for `component` at `version`.
    pub fn migration(
        &mut self,
        component: &str,
        version: i64,
        run: impl Fn(&mut MutateContext<'_>) -> StoreResult<()> + Send + Sync + 'static,
    ) -> &mut Self {
        self.migrations.push(Migration {
            component: component.to_string(),
            version,
            run: Arc::new(run),
        });
        self
    }

    pub fn build(self) -> StoreResult<Schema> {
        self.config.validate()?;
        let by_name: HashMap<String, StoreId> = self
            .stores
            .iter()
            .enumerate()
            .map(|(i, s)| (s.entity_type.clone(), StoreId(i)))
            .collect();
        let lookup = |name: &str| {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| StoreError::Schema(format!("unknown store {name}")))
        };

        let mut defs: Vec<StoreDef> = Vec::with_capacity(self.stores.len());
        for decl in &self.stores {
            if decl.entity_type.is_empty() || decl.entity_type.contains('/') {
                return Err(StoreError::Schema(format!(
                    "invalid entity type {:?}",
                    decl.entity_type
                )));
            }
            defs.push(StoreDef {
                entity_type: decl.entity_type.clone(),
                parent: decl.parent.as_deref().map(lookup).transpose()?,
                children: Vec::new(),
                symbols: BTreeMap::new(),
                constraints: Vec::new(),
                links: Vec::new(),
                cascades: Vec::new(),
            });
        }

        // Parent chains must terminate.
        for (i, def) in defs.iter().enumerate() {
            let mut seen = 0;
            let mut cursor = def.parent;
            while let Some(p) = cursor {
                seen += 1;
                if p.0 == i || seen > defs.len() {
                    return Err(StoreError::Schema(format!(
                        "parent cycle through {}",
                        def.entity_type
                    )));
                }
                cursor = defs[p.0].parent;
            }
        }
        for i in 0..defs.len() {
            if let Some(p) = defs[i].parent {
                defs[p.0].children.push(StoreId(i));
            }
        }

        // Declared fields.
        for (i, decl) in self.stores.iter().enumerate() {
            let store = StoreId(i);
            add_symbol(&mut defs[i], EntitySymbol::id(store))?;
            for field in &decl.fields {
                if field.name.is_empty() || field.name.contains('.') || field.name == "id" {
                    return Err(StoreError::Schema(format!(
                        "invalid field name {:?} on {}",
                        field.name, decl.entity_type
                    )));
                }
                let link = field.link.as_deref().map(lookup).transpose()?;
                let symbol = EntitySymbol {
                    name: field.name.clone(),
                    store,
                    path: vec![field.name.clone()],
                    tag: field.tag,
                    kind: field.kind,
                    link,
                    public: !decl.private.contains(&field.name),
                    managed: false,
                };
                add_symbol(&mut defs[i], symbol)?;
            }
            for name in &decl.private {
                if !defs[i].symbols.contains_key(name) {
                    return Err(StoreError::Schema(format!(
                        "private field {name} not declared on {}",
                        decl.entity_type
                    )));
                }
            }
        }

        // Link collections: each side contributes a managed set symbol.
        for (i, decl) in self.stores.iter().enumerate() {
            let store = StoreId(i);
            for link in &decl.links {
                let target = lookup(&link.target)?;
                let symbol = EntitySymbol {
                    name: link.field.clone(),
                    store,
                    path: vec![link.field.clone()],
                    tag: Tag::String,
                    kind: SymbolKind::Set,
                    link: Some(target),
                    public: true,
                    managed: true,
                };
                add_symbol(&mut defs[i], symbol)?;
                defs[i].links.push(LinkCollection {
                    store,
                    field: link.field.clone(),
                    target,
                    inverse: link.inverse.clone(),
                });
            }
        }

        // Indexes and guards.
        for (i, decl) in self.stores.iter().enumerate() {
            let store = StoreId(i);
            for c in &decl.constraints {
                let constraint = match c {
                    ConstraintDecl::Unique { field, nullable } => {
                        let sym = own_symbol(&defs[i], field)?;
                        expect_kind(&defs[i], sym, SymbolKind::Scalar)?;
                        Constraint::Unique(UniqueIndex {
                            symbol: field.clone(),
                            nullable: *nullable,
                        })
                    }
                    ConstraintDecl::Set { field } => {
                        let sym = own_symbol(&defs[i], field)?;
                        expect_kind(&defs[i], sym, SymbolKind::Set)?;
                        Constraint::Set(SetIndex {
                            symbol: field.clone(),
                            listeners: Vec::new(),
                        })
                    }
                    ConstraintDecl::System { field } => {
                        let sym = own_symbol(&defs[i], field)?;
                        expect_kind(&defs[i], sym, SymbolKind::Scalar)?;
                        if sym.tag != Tag::Bool {
                            return Err(StoreError::Schema(format!(
                                "system flag {}.{field} must be bool",
                                decl.entity_type
                            )));
                        }
                        Constraint::SystemEntity(SystemEntityGuard {
                            symbol: field.clone(),
                        })
                    }
                    ConstraintDecl::ForeignKey {
                        field,
                        inverse,
                        options,
                    } => {
                        let sym = own_symbol(&defs[i], field)?;
                        expect_kind(&defs[i], sym, SymbolKind::Scalar)?;
                        let target = sym.link.ok_or_else(|| {
                            StoreError::Schema(format!(
                                "foreign key {}.{field} is not a link field",
                                decl.entity_type
                            ))
                        })?;
                        if options.on_delete == OnDelete::Nullify && !options.nullable {
                            return Err(StoreError::Schema(format!(
                                "foreign key {}.{field} nullifies on delete but is not nullable",
                                decl.entity_type
                            )));
                        }
                        add_symbol(
                            &mut defs[target.0],
                            EntitySymbol {
                                name: inverse.clone(),
                                store: target,
                                path: vec![inverse.clone()],
                                tag: Tag::String,
                                kind: SymbolKind::Set,
                                link: Some(store),
                                public: true,
                                managed: true,
                            },
                        )?;
                        match options.on_delete {
                            OnDelete::Restrict => {
                                defs[target.0]
                                    .constraints
                                    .push(Constraint::FkDelete(FkDeleteGuard {
                                        referencing: store,
                                        symbol: field.clone(),
                                        inverse: inverse.clone(),
                                    }))
                            }
                            OnDelete::Nullify => defs[target.0].cascades.push(Cascade::Nullify {
                                referencing: store,
                                field: field.clone(),
                                inverse: inverse.clone(),
                            }),
                        }
                        Constraint::ForeignKey(ForeignKeyIndex {
                            symbol: field.clone(),
                            target,
                            inverse: inverse.clone(),
                            nullable: options.nullable,
                        })
                    }
                };
                defs[i].constraints.push(constraint);
            }
        }

        for (entity_type, field, listener) in self.set_listeners {
            let id = lookup(&entity_type)?;
            let index = defs[id.0]
                .constraints
                .iter_mut()
                .find_map(|c| match c {
                    Constraint::Set(idx) if idx.symbol == field => Some(idx),
                    _ => None,
                })
                .ok_or_else(|| {
                    StoreError::Schema(format!("no set index on {entity_type}.{field}"))
                })?;
            index.listeners.push(listener);
        }

        for (entity_type, handler) in self.cascades {
            let id = lookup(&entity_type)?;
            defs[id.0].cascades.push(Cascade::Custom(handler));
        }

        let mut migrations = self.migrations;
        migrations.sort_by(|a, b| (&a.component, a.version).cmp(&(&b.component, b.version)));

        let events = EventBus::new(self.config.event_queue_capacity)?;
        debug!(stores = defs.len(), "schema built");
        Ok(Schema {
            config: self.config,
            stores: defs,
            by_name,
            migrations,
            events,
        })
    }
}

fn add_symbol(def: &mut StoreDef, symbol: EntitySymbol) -> StoreResult<()> {
    if def.symbols.contains_key(&symbol.name) {
        return Err(StoreError::Schema(format!(
            "duplicate symbol {}.{}",
            def.entity_type, symbol.name
        )));
    }
    def.symbols.insert(symbol.name.clone(), symbol);
    Ok(())
}

fn own_symbol<'a>(def: &'a StoreDef, field: &str) -> StoreResult<&'a EntitySymbol> {
    def.symbols
        .get(field)
        .filter(|s| !s.managed && s.kind != SymbolKind::Id)
        .ok_or_else(|| {
            StoreError::Schema(format!(
                "index on undeclared field {}.{field}",
                def.entity_type
            ))
        })
}

fn expect_kind(def: &StoreDef, sym: &EntitySymbol, kind: SymbolKind) -> StoreResult<()> {
    if sym.kind == kind {
        Ok(())
    } else {
        Err(StoreError::Schema(format!(
            "{}.{} is {:?}, expected {kind:?}",
            def.entity_type, sym.name, sym.kind
        )))
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// The immutable registry of every store, plus the event bus.
pub struct Schema {
    config: StoreConfig,
    stores: Vec<StoreDef>,
    by_name: HashMap<String, StoreId>,
    migrations: Vec<Migration>,
    events: EventBus,
}

impl Schema {
    pub fn builder(config: StoreConfig) -> SchemaBuilder {
        SchemaBuilder::new(config)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Handle for the store named `entity_type`.
    pub fn store(&self, entity_type: &str) -> StoreResult<Store<'_>> {
        self.by_name
            .get(entity_type)
            .map(|&id| Store::new(self, id))
            .ok_or_else(|| StoreError::UnknownStore(entity_type.to_string()))
    }

    /// All stores in declaration order.
    pub fn stores(&self) -> impl Iterator<Item = Store<'_>> {
        (0..self.stores.len()).map(move |i| Store::new(self, StoreId(i)))
    }

    pub(crate) fn def(&self, id: StoreId) -> &StoreDef {
        &self.stores[id.0]
    }

    pub(crate) fn root_of(&self, mut id: StoreId) -> StoreId {
        while let Some(p) = self.def(id).parent {
            id = p;
        }
        id
    }

    /// Ancestors first, then `id` itself.
    pub(crate) fn lineage(&self, id: StoreId) -> Vec<StoreId> {
        let mut chain = vec![id];
        let mut cursor = self.def(id).parent;
        while let Some(p) = cursor {
            chain.push(p);
            cursor = self.def(p).parent;
        }
        chain.reverse();
        chain
    }

    /// `id` and every store nested beneath it, parents before children.
    pub(crate) fn subtree(&self, id: StoreId) -> Vec<StoreId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.def(out[i]).children.iter().copied());
            i += 1;
        }
        out
    }

    /// Find `name` on the store or, failing that, on its ancestors.
    pub(crate) fn lookup_symbol(&self, store: StoreId, name: &str) -> Option<&EntitySymbol> {
        let mut cursor = Some(store);
        while let Some(id) = cursor {
            let def = self.def(id);
            if let Some(sym) = def.symbols.get(name) {
                return Some(sym);
            }
            cursor = def.parent;
        }
        None
    }

    // ── Layout ──────────────────────────────────────────────────────────

    /// `{base}/{entity_type}` for root stores.
    pub(crate) fn container_path(&self, root: StoreId) -> BucketPath {
        self.config.base().child(&self.def(root).entity_type)
    }

    /// The bucket holding one row's fields.
    pub(crate) fn row_path(&self, store: StoreId, id: &str) -> BucketPath {
        let def = self.def(store);
        match def.parent {
            None => self.container_path(store).child(id),
            Some(parent) => self.row_path(parent, id).child(&def.entity_type).child(id),
        }
    }

    pub(crate) fn index_path(&self, store: StoreId, symbol: &str) -> BucketPath {
        self.config
            .indexes()
            .child(&self.def(store).entity_type)
            .child(symbol)
    }

    pub(crate) fn row_exists(&self, tx: &dyn KvRead, store: StoreId, id: &str) -> bool {
        !id.is_empty() && tx.contains_bucket(&self.row_path(store, id))
    }

    /// Every row id of `store` in key order. Child stores list the parent
    /// rows that carry a child row.
    pub(crate) fn row_ids(&self, tx: &dyn KvRead, store: StoreId) -> Vec<String> {
        let root = self.root_of(store);
        let Some(container) = tx.bucket(&self.container_path(root)) else {
            return Vec::new();
        };
        container
            .iter()
            .filter(|(_, entry)| entry.bucket().is_some())
            .filter_map(|(key, _)| std::str::from_utf8(key).ok())
            .filter(|id| root == store || self.row_exists(tx, store, id))
            .map(str::to_string)
            .collect()
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Run `f` in a write transaction and commit if it succeeds.
    pub fn mutate<'db, T>(
        &'db self,
        db: &'db Database,
        f: impl FnOnce(&mut MutateContext<'db>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut ctx = MutateContext::new(self, db);
        let out = f(&mut ctx)?;
        ctx.commit()?;
        Ok(out)
    }

    /// Like [`mutate`](Self::mutate), with system-entity protection lifted.
    pub fn mutate_system<'db, T>(
        &'db self,
        db: &'db Database,
        f: impl FnOnce(&mut MutateContext<'db>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut ctx = MutateContext::new_system(self, db);
        let out = f(&mut ctx)?;
        ctx.commit()?;
        Ok(out)
    }

    /// Run `f` against a read snapshot.
    pub fn view<T>(&self, db: &Database, f: impl FnOnce(&ReadTx) -> StoreResult<T>) -> StoreResult<T> {
        let tx = db.begin_read();
        f(&tx)
    }

    /// Create containers and index buckets, then run pending migrations.
    pub fn initialize(&self, db: &Database) -> StoreResult<()> {
        self.mutate_system(db, |ctx| {
            let tx = ctx.tx_mut();
            tx.create_bucket_all(&self.config.versions())?;
            for (i, def) in self.stores.iter().enumerate() {
                if def.parent.is_none() {
                    tx.create_bucket_all(&self.container_path(StoreId(i)))?;
                }
                for constraint in &def.constraints {
                    constraint.initialize(self, StoreId(i), tx)?;
                }
            }
            Ok(())
        })?;

        for migration in &self.migrations {
            let current = self.view(db, |tx| Ok(self.version(tx, &migration.component)))?;
            if current >= migration.version {
                continue;
            }
            info!(
                component = %migration.component,
                from = current,
                to = migration.version,
                "running migration"
            );
            self.mutate_system(db, |ctx| {
                (migration.run)(ctx)?;
                ctx.set_version(&migration.component, migration.version)
            })?;
        }
        info!(stores = self.stores.len(), "schema initialized");
        Ok(())
    }

    /// Stored schema version of `component`, 0 when never set.
    pub fn version(&self, tx: &dyn KvRead, component: &str) -> i64 {
        tx.get(&self.config.versions(), component.as_bytes())
            .and_then(decode_i64)
            .unwrap_or(0)
    }

    pub(crate) fn encode_version(version: i64) -> Vec<u8> {
        encode(&Value::Int64(version))
    }

    /// Check every store in declaration order.
    pub fn check_integrity(
        &self,
        ctx: &mut MutateContext<'_>,
        fix: bool,
        sink: &mut dyn IntegritySink,
    ) -> StoreResult<()> {
        for store in self.stores() {
            store.check_integrity(ctx, fix, sink)?;
        }
        Ok(())
    }

    /// Register a post-commit listener for all entity types.
    pub fn add_listener(
        &self,
        kind: EventKind,
        handler: impl Fn(&EntityEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.events.add_listener(kind, None, handler)
    }

    // ── Typed entities ──────────────────────────────────────────────────

    pub fn insert<E: Entity>(&self, ctx: &mut MutateContext<'_>, entity: &E) -> StoreResult<()> {
        self.store(E::entity_type())?.create(ctx, &entity.to_record())
    }

    pub fn save<E: Entity>(&self, ctx: &mut MutateContext<'_>, entity: &E) -> StoreResult<()> {
        self.store(E::entity_type())?
            .update(ctx, &entity.to_record(), None)
    }

    pub fn load<E: Entity>(&self, tx: &dyn KvRead, id: &str) -> StoreResult<E> {
        E::from_record(self.store(E::entity_type())?.load_one_by_id(tx, id)?)
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("stores", &self.by_name.len())
            .field("migrations", &self.migrations.len())
            .finish()
    }
}
