//! Transactional save and delete of entities.

use std::collections::BTreeMap;

use futures::future::try_join_all;

use crate::firestore::api::DocumentReference;
use crate::firestore::backend::{run_transaction, Transaction};
use crate::firestore::error::FirestoreResult;
use crate::firestore::model::Timestamp;
use crate::firestore::value::{FirestoreValue, MapValue};
use crate::logger::log_arg;
use crate::store::difference;

use super::database::Database;
use super::model::{Model, BOOKKEEPING_FIELDS, CREATED_AT_FIELD, UPDATED_AT_FIELD};
use super::relations::{RelationLinks, RelationSlot};
use super::LOGGER;

/// How [`Database::save`] writes an entity that already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaveMode {
    /// Overwrite the whole document.
    #[default]
    Replace,
    /// Write only the fields that differ from the stored document.
    Update,
}

/// What a save did to the backend document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Replaced,
    Updated,
    /// `Update` found nothing to write.
    Unchanged,
}

#[derive(Clone)]
struct SavePlan {
    reference: DocumentReference,
    data: BTreeMap<String, FirestoreValue>,
    mode: SaveMode,
    created_at: Timestamp,
    server_timestamp: FirestoreValue,
}

impl Database {
    /// Persists `model` in a transaction.
    ///
    /// Unsaved belongs-to targets are saved first, one level deep. A failed relation save
    /// aborts this save; relation writes that already landed stay.
    pub async fn save<M: Model>(
        &self,
        model: &mut M,
        mode: SaveMode,
    ) -> FirestoreResult<SaveOutcome> {
        self.save_entity(model, mode, true).await
    }

    /// Same as `save(model, SaveMode::Update)`.
    pub async fn update_or_create<M: Model>(&self, model: &mut M) -> FirestoreResult<SaveOutcome> {
        self.save(model, SaveMode::Update).await
    }

    /// Deletes the entity's document. Backend errors are logged and otherwise ignored.
    pub async fn delete<M: Model>(&self, model: &M) {
        let result = match model.reference() {
            Ok(reference) => self.backend().delete_document(&reference).await,
            Err(error) => Err(error),
        };
        if let Err(error) = result {
            LOGGER.debug_with([
                log_arg("delete ignored"),
                log_arg(model.id()),
                log_arg(error.to_string()),
            ]);
        }
    }

    pub(crate) async fn save_without_relations<M: Model>(
        &self,
        model: &mut M,
        mode: SaveMode,
    ) -> FirestoreResult<SaveOutcome> {
        self.save_entity(model, mode, false).await
    }

    async fn save_entity<M: Model>(
        &self,
        model: &mut M,
        mode: SaveMode,
        cascade: bool,
    ) -> FirestoreResult<SaveOutcome> {
        let mut data = model.to_fields();
        for field in BOOKKEEPING_FIELDS {
            data.remove(field);
        }
        let links = model.meta().relations().clone();
        data.extend(self.relation_fields(&links, cascade).await?);

        let backend = self.backend();
        let plan = SavePlan {
            reference: model.reference()?,
            data,
            mode,
            created_at: model.meta().created_at(),
            server_timestamp: backend.server_timestamp(),
        };
        let outcome = run_transaction(backend.as_ref(), |transaction| {
            Box::pin(write_entity(transaction, plan.clone()))
        })
        .await?;

        let meta = model.meta_mut();
        match outcome {
            SaveOutcome::Created => meta.mark_created(),
            SaveOutcome::Replaced | SaveOutcome::Updated => meta.mark_updated(),
            SaveOutcome::Unchanged => meta.mark_persisted(),
        }
        LOGGER.debug_with([
            log_arg("saved"),
            log_arg(plan.reference.path().canonical_string()),
            log_arg(format!("{outcome:?}")),
        ]);
        Ok(outcome)
    }

    /// Reference values for every belongs-to field, saving drafts first when `cascade`.
    async fn relation_fields(
        &self,
        links: &RelationLinks,
        cascade: bool,
    ) -> FirestoreResult<BTreeMap<String, FirestoreValue>> {
        let mut fields = BTreeMap::new();
        let mut drafts = Vec::new();
        for (field, slot) in links.entries() {
            match slot {
                RelationSlot::Linked(reference) => {
                    fields.insert(field, reference.to_value());
                }
                RelationSlot::Draft(draft) if cascade => drafts.push((field, draft)),
                RelationSlot::Draft(_) => {}
            }
        }

        let resolved = try_join_all(drafts.into_iter().map(|(field, draft)| {
            let pending = draft.resolve(self.clone());
            async move {
                match pending.await {
                    Ok(reference) => Ok((field, reference)),
                    Err(error) => {
                        LOGGER.warn_with([
                            log_arg("relation save failed"),
                            log_arg(field.as_str()),
                            log_arg(error.to_string()),
                        ]);
                        Err(error)
                    }
                }
            }
        }))
        .await?;

        for (field, reference) in resolved {
            fields.insert(field.clone(), reference.to_value());
            links.link(&field, reference);
        }
        Ok(fields)
    }
}

async fn write_entity(
    transaction: &mut dyn Transaction,
    plan: SavePlan,
) -> FirestoreResult<SaveOutcome> {
    let snapshot = transaction.get(&plan.reference).await?;
    let mut data = plan.data;
    let Some(existing) = snapshot.into_data() else {
        data.insert(CREATED_AT_FIELD.to_string(), plan.server_timestamp);
        data.insert(UPDATED_AT_FIELD.to_string(), FirestoreValue::null());
        transaction.set(&plan.reference, MapValue::new(data));
        return Ok(SaveOutcome::Created);
    };

    match plan.mode {
        SaveMode::Replace => {
            let created_at = existing
                .get(CREATED_AT_FIELD)
                .cloned()
                .unwrap_or_else(|| FirestoreValue::from(plan.created_at));
            data.insert(CREATED_AT_FIELD.to_string(), created_at);
            data.insert(UPDATED_AT_FIELD.to_string(), plan.server_timestamp);
            transaction.set(&plan.reference, MapValue::new(data));
            Ok(SaveOutcome::Replaced)
        }
        SaveMode::Update => {
            let mut patch = difference(&data, &existing);
            if patch.is_empty() {
                return Ok(SaveOutcome::Unchanged);
            }
            patch.insert(UPDATED_AT_FIELD.to_string(), plan.server_timestamp);
            transaction.update(&plan.reference, MapValue::new(patch));
            Ok(SaveOutcome::Updated)
        }
    }
}
