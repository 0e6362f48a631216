// src/models/common.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping shared by every entity: surrogate id, audit timestamps and the
/// soft-delete marker.
///
/// All mutators take `now` from the caller so entity state is a pure function
/// of its inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn before_create(&mut self, now: DateTime<Utc>) {
        self.created_at = now;
        self.updated_at = now;
    }

    /// Touch `updated_at`. Deletion state is left alone; use `undelete` to resurrect.
    pub fn before_update(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    pub fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    pub fn undelete(&mut self, now: DateTime<Utc>) {
        self.deleted_at = None;
        self.updated_at = now;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Access to the shared record of an entity, so stores can filter soft-deleted
/// rows without knowing the concrete type.
pub trait SoftDelete {
    fn record(&self) -> &Record;
    fn record_mut(&mut self) -> &mut Record;

    fn is_deleted(&self) -> bool {
        self.record().is_deleted()
    }
}

macro_rules! impl_soft_delete {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::models::common::SoftDelete for $ty {
                fn record(&self) -> &$crate::models::common::Record {
                    &self.record
                }
                fn record_mut(&mut self) -> &mut $crate::models::common::Record {
                    &mut self.record
                }
            }
        )*
    };
}
pub(crate) use impl_soft_delete;
