//! Record service: store mutations followed by hook dispatch.
//!
//! Both transports (HTTP and CLI) go through `Backroom`, so hooks fire the
//! same way regardless of how a record was changed. A hook failure does not
//! undo the mutation; it is reported as `HookFailed`.

use crate::core::config::Config;
use crate::core::error::BackroomError;
use crate::core::store::{Payload, Record, RecordId, RecordStore, SqliteRecordStore};
use crate::core::time;
use crate::hooks::{Action, AdapterSet, Dispatcher, HookRegistry};
use std::sync::Arc;

pub struct Backroom {
    store: Arc<dyn RecordStore>,
    dispatcher: Dispatcher,
}

impl Backroom {
    pub fn new(store: Arc<dyn RecordStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Opens the configured database and compiles the configured hooks.
    pub fn from_config(config: &Config) -> Result<Self, BackroomError> {
        let store = SqliteRecordStore::open(&config.database.path)?;
        let registry = HookRegistry::from_configs(&config.hooks)?;
        let adapters = AdapterSet::from_config(config)?;
        registry.check_targets(&adapters)?;
        Ok(Self::new(
            Arc::new(store),
            Dispatcher::new(Arc::new(registry), Arc::new(adapters)),
        ))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn fire(&self, action: Action, record: &Record) -> Result<(), BackroomError> {
        self.dispatcher
            .dispatch(action, record)
            .map(|_| ())
            .map_err(|e| {
                tracing::warn!(
                    record_id = %record.id,
                    cage = %record.cage,
                    action = %action,
                    error = %e,
                    "hook dispatch failed"
                );
                BackroomError::HookFailed {
                    action,
                    record_id: record.id.to_string(),
                    source: Box::new(e),
                }
            })
    }

    pub fn create_record(&self, cage: &str, data: Payload) -> Result<Record, BackroomError> {
        let record = Record::new(cage, data)?;
        self.store.create(&record)?;
        tracing::info!(record_id = %record.id, cage = %record.cage, "record created");
        self.fire(Action::Create, &record)?;
        Ok(record)
    }

    pub fn get_record(&self, id: &str) -> Result<Record, BackroomError> {
        self.store.get(id.parse::<RecordId>()?)
    }

    pub fn list_records(&self, cage: &str) -> Result<Vec<Record>, BackroomError> {
        self.store.list_by_cage(cage)
    }

    pub fn list_cages(&self) -> Result<Vec<String>, BackroomError> {
        self.store.list_cages()
    }

    /// Replaces a record's payload. When `cage` is given it must match the
    /// record's cage; records never move between cages.
    pub fn update_record(
        &self,
        id: &str,
        cage: Option<&str>,
        data: Payload,
    ) -> Result<Record, BackroomError> {
        let mut record = self.store.get(id.parse::<RecordId>()?)?;
        if let Some(cage) = cage.map(str::trim).filter(|c| !c.is_empty())
            && cage != record.cage
        {
            return Err(BackroomError::ValidationError(format!(
                "Record {} belongs to cage '{}', not '{}'",
                record.id, record.cage, cage
            )));
        }
        record.data = data;
        record.updated_at = time::now_epoch_z();
        self.store.update(&record)?;
        tracing::info!(record_id = %record.id, cage = %record.cage, "record updated");
        self.fire(Action::Update, &record)?;
        Ok(record)
    }

    /// Deletes a record. Hooks see the record as it was when it was removed.
    pub fn delete_record(&self, id: &str) -> Result<Record, BackroomError> {
        let record = self.store.delete(id.parse::<RecordId>()?)?;
        tracing::info!(record_id = %record.id, cage = %record.cage, "record deleted");
        self.fire(Action::Delete, &record)?;
        Ok(record)
    }

    /// Deletes every record in `cage`, then fires `delete` hooks for exactly
    /// the removed records, most recent first. Returns the number removed.
    pub fn delete_cage(&self, cage: &str) -> Result<usize, BackroomError> {
        let removed = self.store.delete_cage(cage)?;
        tracing::info!(cage = %cage, deleted = removed.len(), "cage deleted");
        for record in &removed {
            self.fire(Action::Delete, record)?;
        }
        Ok(removed.len())
    }
}
