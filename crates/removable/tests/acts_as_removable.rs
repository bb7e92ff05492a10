use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use removable::orm::{
    error::{ModelError, ValidationError, ValidationErrors},
    model::{CrudOperations, Model, QueryMethods, SaveOptions},
    MemoryPool,
};
use removable::{
    is_removable, HookError, HookTiming, Removable, RemovableOptions, RemovableScopes, RemovalError,
    RemovalEvent, RemovalHook,
};
use serde::{Deserialize, Serialize};

/// Declares a removable model with an `id`, a `name` and a marker column.
/// The registry is process-wide, so every test uses its own model type.
macro_rules! removable_model {
    ($model:ident, $table:literal, $marker:ident) => {
        #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
        struct $model {
            id: Option<i64>,
            name: Option<String>,
            $marker: Option<DateTime<Utc>>,
        }

        impl Model for $model {
            type PrimaryKey = i64;

            fn table_name() -> &'static str {
                $table
            }

            fn primary_key(&self) -> Option<Self::PrimaryKey> {
                self.id
            }
        }

        impl Removable for $model {}
    };
}

/// Model requiring a name, like the `invalids` table
macro_rules! invalid_model {
    ($model:ident) => {
        #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
        struct $model {
            id: Option<i64>,
            name: Option<String>,
            removed_at: Option<DateTime<Utc>>,
        }

        impl Model for $model {
            type PrimaryKey = i64;

            fn table_name() -> &'static str {
                "invalids"
            }

            fn primary_key(&self) -> Option<Self::PrimaryKey> {
                self.id
            }

            fn validate(&self) -> Result<(), ValidationErrors> {
                let mut errors = ValidationErrors::new();
                if self.name.as_deref().map_or(true, |name| name.trim().is_empty()) {
                    errors.add(ValidationError::new("name", "can't be blank").code("presence"));
                }
                errors.into_result()
            }
        }

        impl Removable for $model {}
    };
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct OtherModel {
    id: Option<i64>,
    name: Option<String>,
    removed_at: Option<DateTime<Utc>>,
}

impl Model for OtherModel {
    type PrimaryKey = i64;

    fn table_name() -> &'static str {
        "other_models"
    }

    fn primary_key(&self) -> Option<Self::PrimaryKey> {
        self.id
    }
}

#[derive(Debug, Clone)]
struct HookTracker {
    events: Arc<Mutex<Vec<String>>>,
}

impl HookTracker {
    fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn track(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    fn get_events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn recorder<T: 'static>(
        &self,
        event: &'static str,
    ) -> impl Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static {
        let tracker = self.clone();
        move |_: &mut T| {
            tracker.track(event);
            Ok(())
        }
    }
}

fn setup() -> MemoryPool {
    let pool = MemoryPool::new();
    pool.create_table("first_models", &["name", "removed_at"]);
    pool.create_table("second_models", &["name", "use_this_column"]);
    pool.create_table("invalids", &["name", "removed_at"]);
    pool.create_table("other_models", &["name", "removed_at"]);
    pool
}

fn stored_marker(pool: &MemoryPool, table: &str, column: &str) -> serde_json::Value {
    pool.rows(table).unwrap()[0][column].clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registered_model_is_removable() {
        removable_model!(FirstModel, "first_models", removed_at);
        FirstModel::register(RemovableOptions::default()).unwrap();

        assert!(FirstModel::is_removable());
        assert!(FirstModel::default().removable());
        assert!(is_removable::<FirstModel>());
    }

    #[tokio::test]
    async fn test_other_models_are_not_removable() {
        removable_model!(NeverRegistered, "other_models", removed_at);

        assert!(!is_removable::<OtherModel>());
        assert!(!NeverRegistered::is_removable());
        assert!(!NeverRegistered::default().removable());
    }

    #[tokio::test]
    async fn test_remove_sets_marker_column() {
        removable_model!(FirstModel, "first_models", removed_at);
        removable_model!(SecondModel, "second_models", use_this_column);
        FirstModel::register(RemovableOptions::default()).unwrap();
        SecondModel::register(RemovableOptions::new().with_column_name("use_this_column")).unwrap();

        let pool = setup();
        let mut first = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        let mut second = SecondModel::create(&pool, SecondModel::default()).await.unwrap();

        assert!(!first.is_removed());
        assert!(first.remove(&pool, None).await.unwrap());
        assert!(first.is_removed());
        assert!(first.removed_at.is_some());
        assert!(first.removed_at().is_some());

        assert!(second.remove(&pool, None).await.unwrap());
        assert!(second.is_removed());
        assert!(second.use_this_column.is_some());

        let stored = stored_marker(&pool, "second_models", "use_this_column");
        let stored: DateTime<Utc> = serde_json::from_value(stored).unwrap();
        assert_eq!(Some(stored), second.use_this_column);

        first.reload(&pool).await.unwrap();
        assert!(first.is_removed());
    }

    #[tokio::test]
    async fn test_unremove_clears_marker() {
        removable_model!(FirstModel, "first_models", removed_at);
        FirstModel::register(RemovableOptions::default()).unwrap();

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.remove_strict(&pool, None).await.unwrap();
        record.unremove_strict(&pool, None).await.unwrap();

        assert!(!record.is_removed());
        assert!(record.removed_at.is_none());
        assert!(stored_marker(&pool, "first_models", "removed_at").is_null());

        record.reload(&pool).await.unwrap();
        assert!(!record.is_removed());
        assert!(record.unremove(&pool, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_scopes() {
        removable_model!(FirstModel, "first_models", removed_at);
        removable_model!(SecondModel, "second_models", use_this_column);
        FirstModel::register(RemovableOptions::default()).unwrap();
        SecondModel::register(RemovableOptions::new().with_column_name("use_this_column")).unwrap();

        let pool = setup();
        FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        FirstModel::create(&pool, FirstModel::default())
            .await
            .unwrap()
            .remove_strict(&pool, None)
            .await
            .unwrap();
        SecondModel::create(&pool, SecondModel::default()).await.unwrap();
        SecondModel::create(&pool, SecondModel::default())
            .await
            .unwrap()
            .remove_strict(&pool, None)
            .await
            .unwrap();

        assert_eq!(FirstModel::present().unwrap().count(&pool).await.unwrap(), 1);
        assert_eq!(FirstModel::removed().unwrap().count(&pool).await.unwrap(), 1);
        assert_eq!(FirstModel::query().count(&pool).await.unwrap(), 2);

        assert_eq!(SecondModel::present().unwrap().count(&pool).await.unwrap(), 1);
        assert_eq!(SecondModel::removed().unwrap().count(&pool).await.unwrap(), 1);

        let removed = FirstModel::removed().unwrap().get(&pool).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].is_removed());
    }

    #[tokio::test]
    async fn test_scopes_compose_with_filters_and_ordering() {
        removable_model!(FirstModel, "first_models", removed_at);
        FirstModel::register(RemovableOptions::default()).unwrap();

        let pool = setup();
        for name in ["a", "b", "c"] {
            FirstModel::create(
                &pool,
                FirstModel {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }
        let mut b = FirstModel::find_or_fail(&pool, 2).await.unwrap();
        b.remove_strict(&pool, None).await.unwrap();

        let present = FirstModel::present()
            .unwrap()
            .order_by_desc("id")
            .limit(1)
            .get(&pool)
            .await
            .unwrap();
        assert_eq!(present[0].name.as_deref(), Some("c"));

        let filtered = FirstModel::query()
            .where_in("name", vec!["a", "b"])
            .present()
            .unwrap()
            .get(&pool)
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_callbacks_without_call() {
        removable_model!(FirstModel, "first_models", removed_at);
        let tracker = HookTracker::new();
        FirstModel::register(RemovableOptions::default())
            .unwrap()
            .before_remove(tracker.recorder("before_remove"))
            .after_remove(tracker.recorder("after_remove"));

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.name = Some("renamed".to_string());
        record.save_strict(&pool, None).await.unwrap();

        assert!(tracker.get_events().is_empty());
    }

    #[tokio::test]
    async fn test_callbacks_with_remove_call() {
        removable_model!(FirstModel, "first_models", removed_at);
        let tracker = HookTracker::new();
        FirstModel::register(RemovableOptions::default())
            .unwrap()
            .before_remove(tracker.recorder("before_remove"))
            .after_remove(tracker.recorder("after_remove"))
            .before_unremove(tracker.recorder("before_unremove"))
            .after_unremove(tracker.recorder("after_unremove"));

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.remove(&pool, None).await.unwrap();

        assert_eq!(tracker.get_events(), vec!["before_remove", "after_remove"]);
    }

    #[tokio::test]
    async fn test_callbacks_with_both_calls() {
        removable_model!(FirstModel, "first_models", removed_at);
        let tracker = HookTracker::new();
        FirstModel::register(RemovableOptions::default())
            .unwrap()
            .before_remove(tracker.recorder("before_remove"))
            .after_remove(tracker.recorder("after_remove"))
            .before_unremove(tracker.recorder("before_unremove"))
            .after_unremove(tracker.recorder("after_unremove"));

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.remove(&pool, None).await.unwrap();
        record.unremove(&pool, None).await.unwrap();

        assert_eq!(
            tracker.get_events(),
            vec!["before_remove", "after_remove", "before_unremove", "after_unremove"]
        );
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order_and_see_state() {
        removable_model!(FirstModel, "first_models", removed_at);
        let tracker = HookTracker::new();
        FirstModel::register(RemovableOptions::default()).unwrap();

        let before = tracker.clone();
        FirstModel::before_remove(move |record: &mut FirstModel| {
            before.track(&format!("before: removed={}", record.is_removed()));
            record.name = Some("archived".to_string());
            Ok(())
        })
        .unwrap();
        FirstModel::before_remove(tracker.recorder("before: second")).unwrap();
        let after = tracker.clone();
        FirstModel::after_remove(move |record: &mut FirstModel| {
            after.track(&format!("after: removed={}", record.is_removed()));
            Ok(())
        })
        .unwrap();

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.remove_strict(&pool, None).await.unwrap();

        assert_eq!(
            tracker.get_events(),
            vec!["before: removed=false", "before: second", "after: removed=true"]
        );
        // Changes made by before hooks are saved together with the marker
        record.reload(&pool).await.unwrap();
        assert_eq!(record.name.as_deref(), Some("archived"));
    }

    #[tokio::test]
    async fn test_before_hook_abort_short_circuits() {
        removable_model!(FirstModel, "first_models", removed_at);
        let tracker = HookTracker::new();
        FirstModel::register(RemovableOptions::default())
            .unwrap()
            .before_remove(|_: &mut FirstModel| Err(HookError::halt("record is locked")))
            .before_remove(tracker.recorder("second before_remove"))
            .after_remove(tracker.recorder("after_remove"));

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();

        assert!(!record.remove(&pool, None).await.unwrap());
        assert!(tracker.get_events().is_empty());
        assert!(!record.is_removed());
        assert!(stored_marker(&pool, "first_models", "removed_at").is_null());

        let err = record.remove_strict(&pool, None).await.unwrap_err();
        match err {
            RemovalError::HookAborted { event, timing, source } => {
                assert_eq!(event, RemovalEvent::Remove);
                assert_eq!(timing, HookTiming::Before);
                assert_eq!(source, HookError::halt("record is locked"));
            }
            other => panic!("Expected hook abort, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_after_hook_failure_rolls_back() {
        removable_model!(FirstModel, "first_models", removed_at);
        FirstModel::register(RemovableOptions::default())
            .unwrap()
            .after_unremove(|_: &mut FirstModel| Err(HookError::failed("mailer unavailable")));

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.remove_strict(&pool, None).await.unwrap();

        assert!(!record.unremove(&pool, None).await.unwrap());
        // The in-memory marker keeps the assigned value, storage keeps the old one
        assert!(!record.is_removed());
        assert!(!stored_marker(&pool, "first_models", "removed_at").is_null());

        record.reload(&pool).await.unwrap();
        assert!(record.is_removed());
    }

    #[tokio::test]
    async fn test_marker_assignment_overrides_before_hook() {
        removable_model!(FirstModel, "first_models", removed_at);
        FirstModel::register(RemovableOptions::default())
            .unwrap()
            .before_unremove(|record: &mut FirstModel| {
                record.removed_at = Some(Utc::now());
                Ok(())
            });

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.remove_strict(&pool, None).await.unwrap();
        record.unremove_strict(&pool, None).await.unwrap();

        assert!(!record.is_removed());
        assert!(stored_marker(&pool, "first_models", "removed_at").is_null());
    }

    #[tokio::test]
    async fn test_async_hook() {
        removable_model!(FirstModel, "first_models", removed_at);

        struct Notifier {
            tracker: HookTracker,
        }

        #[async_trait]
        impl RemovalHook<FirstModel> for Notifier {
            async fn call(&self, record: &mut FirstModel) -> Result<(), HookError> {
                tokio::task::yield_now().await;
                self.tracker.track(&format!("notified {:?}", record.id));
                Ok(())
            }
        }

        let tracker = HookTracker::new();
        FirstModel::register(RemovableOptions::default()).unwrap().hook(
            RemovalEvent::Remove,
            HookTiming::After,
            Notifier {
                tracker: tracker.clone(),
            },
        );

        let pool = setup();
        let mut record = FirstModel::create(&pool, FirstModel::default()).await.unwrap();
        record.remove_strict(&pool, None).await.unwrap();

        assert_eq!(tracker.get_events(), vec!["notified Some(1)"]);
    }

    #[tokio::test]
    async fn test_validate_option_blocks_remove() {
        invalid_model!(Invalid);
        Invalid::register(RemovableOptions::new().with_validation(true)).unwrap();

        let pool = setup();
        let mut invalid = Invalid::default();
        assert!(invalid
            .save(&pool, Some(SaveOptions::new().with_validation(false)))
            .await
            .unwrap());

        assert!(!invalid.remove(&pool, None).await.unwrap());
        invalid.reload(&pool).await.unwrap();
        assert!(invalid.removed_at.is_none());
        assert!(!invalid.is_removed());
    }

    #[tokio::test]
    async fn test_validate_option_raises_on_strict_remove() {
        invalid_model!(Invalid);
        Invalid::register(RemovableOptions::new().with_validation(true)).unwrap();

        let pool = setup();
        let mut invalid = Invalid::default();
        invalid
            .save_strict(&pool, Some(SaveOptions::new().with_validation(false)))
            .await
            .unwrap();

        let err = invalid.remove_strict(&pool, None).await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.validation_errors().unwrap().has_field_errors("name"));

        invalid.reload(&pool).await.unwrap();
        assert!(invalid.removed_at.is_none());
        assert!(!invalid.is_removed());
    }

    #[tokio::test]
    async fn test_validation_skipped_by_default() {
        invalid_model!(Lenient);
        Lenient::register(RemovableOptions::default()).unwrap();

        let pool = setup();
        let mut record = Lenient::default();
        record
            .save_strict(&pool, Some(SaveOptions::new().with_validation(false)))
            .await
            .unwrap();

        assert!(record.remove(&pool, None).await.unwrap());
        record.reload(&pool).await.unwrap();
        assert!(record.is_removed());
    }

    #[tokio::test]
    async fn test_caller_save_options_win() {
        invalid_model!(Invalid);
        Invalid::register(RemovableOptions::new().with_validation(true)).unwrap();

        let pool = setup();
        let mut invalid = Invalid::default();
        invalid
            .save_strict(&pool, Some(SaveOptions::new().with_validation(false)))
            .await
            .unwrap();

        let skip = Some(SaveOptions::new().with_validation(false));
        assert!(invalid.remove(&pool, skip).await.unwrap());
        invalid.reload(&pool).await.unwrap();
        assert!(invalid.is_removed());
    }

    #[tokio::test]
    async fn test_unregistered_model_operations_fail() {
        removable_model!(Unregistered, "other_models", removed_at);

        let pool = setup();
        let mut record = Unregistered::create(&pool, Unregistered::default()).await.unwrap();

        assert!(matches!(
            record.remove(&pool, None).await,
            Err(RemovalError::NotRegistered { .. })
        ));
        assert!(matches!(
            Unregistered::removed(),
            Err(RemovalError::NotRegistered { .. })
        ));
        assert!(stored_marker(&pool, "other_models", "removed_at").is_null());
    }

    #[tokio::test]
    async fn test_missing_marker_column_is_an_error() {
        removable_model!(Misconfigured, "first_models", removed_at);
        Misconfigured::register(RemovableOptions::new().with_column_name("deleted_at")).unwrap();

        let pool = setup();
        let mut record = Misconfigured::create(&pool, Misconfigured::default()).await.unwrap();

        let result = record.remove(&pool, None).await;
        assert!(matches!(
            result,
            Err(RemovalError::Model(ModelError::ColumnNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_reregistration_merges_options_and_resets_hooks() {
        removable_model!(Reconfigured, "second_models", use_this_column);
        let tracker = HookTracker::new();
        Reconfigured::register(RemovableOptions::new().with_column_name("use_this_column"))
            .unwrap()
            .before_remove(tracker.recorder("before_remove"));
        Reconfigured::register(RemovableOptions::new().with_validation(true))
            .unwrap()
            .after_remove(tracker.recorder("after_remove"));

        let options = Reconfigured::removable_options().unwrap();
        assert_eq!(options.column_name(), "use_this_column");
        assert!(options.validate());

        let pool = setup();
        let mut record = Reconfigured::create(&pool, Reconfigured::default()).await.unwrap();
        assert!(record.remove(&pool, None).await.unwrap());
        assert!(record.use_this_column.is_some());
        assert_eq!(tracker.get_events(), vec!["after_remove"]);
        assert_eq!(Reconfigured::removed().unwrap().count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hook_state_outside_the_row_survives_remove() {
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        struct Flagged {
            id: Option<i64>,
            name: Option<String>,
            removed_at: Option<DateTime<Utc>>,
            #[serde(skip)]
            callback_before_remove: Option<bool>,
            #[serde(skip)]
            callback_after_remove: Option<bool>,
        }

        impl Model for Flagged {
            type PrimaryKey = i64;

            fn table_name() -> &'static str {
                "first_models"
            }

            fn primary_key(&self) -> Option<Self::PrimaryKey> {
                self.id
            }
        }

        impl Removable for Flagged {
            fn set_removal_marker(
                &mut self,
                _column: &str,
                marker: Option<DateTime<Utc>>,
            ) -> Result<(), RemovalError> {
                self.removed_at = marker;
                Ok(())
            }
        }

        Flagged::register(RemovableOptions::default())
            .unwrap()
            .before_remove(|record: &mut Flagged| {
                record.callback_before_remove = Some(true);
                Ok(())
            })
            .after_remove(|record: &mut Flagged| {
                assert_eq!(record.callback_before_remove, Some(true));
                record.callback_after_remove = Some(true);
                Ok(())
            });

        let pool = setup();
        let mut record = Flagged::create(&pool, Flagged::default()).await.unwrap();
        assert!(record.remove(&pool, None).await.unwrap());

        assert!(record.is_removed());
        assert_eq!(record.callback_before_remove, Some(true));
        assert_eq!(record.callback_after_remove, Some(true));
        assert!(!stored_marker(&pool, "first_models", "removed_at").is_null());
    }

    #[tokio::test]
    async fn test_invalid_column_name_is_rejected() {
        removable_model!(BadColumn, "first_models", removed_at);

        let result = BadColumn::register(RemovableOptions::new().with_column_name("removed_at; --"));
        assert!(matches!(result, Err(RemovalError::InvalidOptions(_))));
        assert!(!BadColumn::is_removable());
    }

    #[tokio::test]
    async fn test_options_from_config() {
        removable_model!(Configured, "second_models", use_this_column);
        let options: RemovableOptions =
            serde_json::from_str(r#"{ "column_name": "use_this_column" }"#).unwrap();
        Configured::register(options).unwrap();

        let pool = setup();
        let mut record = Configured::create(&pool, Configured::default()).await.unwrap();
        assert!(record.remove(&pool, None).await.unwrap());
        assert_eq!(Configured::removed().unwrap().count(&pool).await.unwrap(), 1);
    }
}
