//! # Pipeline
//!
//! The owner of pipeline runs. Pipelines are soft-deleted only: the row stays
//! in storage with `is_deleted = true` and every run it owns disappears from
//! "find" queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Pipeline {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New Pipeline for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPipeline {
    pub name: String,
    pub description: String,
}

impl Pipeline {
    pub fn new(new_pipeline: NewPipeline) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            name: new_pipeline.name,
            description: new_pipeline.description,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this pipeline shows up in queries that exclude deleted rows
    pub fn is_visible(&self, include_deleted: bool) -> bool {
        include_deleted || !self.is_deleted
    }
}
