//! Provider facade implementing [`TableDataBackend`] over a [`TableStore`].

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::watcher::current_size;
use crate::{
    BackendRegistry, BridgeError, BridgeResult, ColumnPager, LocationKey, ProviderConfig,
    SchemaResolver, SizeSubscription, TableDataBackend, TableKey, TableSchema, TableStore,
};

/// Handle returned by location subscriptions. Tables have a single fixed
/// location, so there is nothing to stop.
#[derive(Debug, Clone)]
pub struct LocationSubscription {
    table: TableKey,
}

impl LocationSubscription {
    pub fn table(&self) -> &TableKey {
        &self.table
    }

    pub fn unsubscribe(&self) {
        debug!("Unsubscribed from locations of '{}'", self.table);
    }
}

pub struct WalTableProvider<S: TableStore> {
    store: Arc<S>,
    resolver: SchemaResolver<S>,
    pager: ColumnPager<S>,
    registry: Arc<BackendRegistry<S>>,
    schemas: RwLock<HashMap<TableKey, TableSchema>>,
}

impl<S: TableStore + 'static> WalTableProvider<S> {
    /// Build a provider with its own registry.
    pub fn new(store: Arc<S>, config: ProviderConfig) -> BridgeResult<Self> {
        let registry = Arc::new(BackendRegistry::new(store.clone(), config.watch.clone()));
        Self::with_registry(store, registry, config)
    }

    /// Build a provider sharing an existing registry.
    pub fn with_registry(
        store: Arc<S>,
        registry: Arc<BackendRegistry<S>>,
        config: ProviderConfig,
    ) -> BridgeResult<Self> {
        Ok(Self {
            resolver: SchemaResolver::new(store.clone()),
            pager: ColumnPager::new(store.clone(), config.pager)?,
            store,
            registry,
            schemas: RwLock::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<BackendRegistry<S>> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Schema of `table`, resolved once and then served from cache.
    async fn cached_schema(&self, table: &TableKey) -> BridgeResult<TableSchema> {
        let cached = self
            .schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .cloned();
        if let Some(schema) = cached {
            return Ok(schema);
        }
        let schema = self.resolver.resolve(table.name()).await?;
        self.schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.clone(), schema.clone());
        Ok(schema)
    }

    /// Drop the cached schema so the next call re-reads store metadata.
    pub fn invalidate_schema(&self, table: &TableKey) {
        self.schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(table);
    }

    fn check_location(location: &LocationKey) -> BridgeResult<()> {
        if location.is_main() {
            Ok(())
        } else {
            Err(BridgeError::UnknownLocation(location.id().to_string()))
        }
    }

    /// Stop every watcher and clear the registry.
    pub async fn shutdown(&self) {
        info!("Shutting down provider");
        self.registry.cleanup_all().await;
    }
}

#[async_trait]
impl<S: TableStore + 'static> TableDataBackend for WalTableProvider<S> {
    async fn schema(&self, table: &TableKey) -> BridgeResult<TableSchema> {
        self.cached_schema(table).await
    }

    async fn locations(&self, _table: &TableKey) -> BridgeResult<Vec<LocationKey>> {
        Ok(vec![LocationKey::main()])
    }

    async fn subscribe_locations(
        &self,
        table: &TableKey,
    ) -> BridgeResult<(Vec<LocationKey>, LocationSubscription)> {
        debug!("Location subscription for '{}'", table);
        Ok((
            vec![LocationKey::main()],
            LocationSubscription {
                table: table.clone(),
            },
        ))
    }

    async fn location_size(&self, table: &TableKey, location: &LocationKey) -> BridgeResult<u64> {
        Self::check_location(location)?;
        current_size(self.store.as_ref(), table.name()).await
    }

    async fn subscribe_location_size(
        &self,
        table: &TableKey,
        location: &LocationKey,
    ) -> BridgeResult<SizeSubscription> {
        Self::check_location(location)?;
        self.registry.subscribe(table).await
    }

    async fn column_values(
        &self,
        table: &TableKey,
        location: &LocationKey,
        column: &str,
        offset: u64,
        min_rows: usize,
        max_rows: usize,
    ) -> BridgeResult<RecordBatch> {
        Self::check_location(location)?;
        if min_rows > max_rows {
            return Err(BridgeError::Config(format!(
                "min_rows {} exceeds max_rows {}",
                min_rows, max_rows
            )));
        }
        let schema = self.cached_schema(table).await?;
        self.pager
            .fetch(table.name(), &schema, column, offset, max_rows)
            .await
    }
}
