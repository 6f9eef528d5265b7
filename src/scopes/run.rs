//! # Run Scopes
//!
//! Query scopes shared by pipeline runs and workflow runs. Both kinds join
//! their owner table so owner soft-deletion can hide runs.

use crate::models::RunKind;
use crate::state_machine::RunState;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

/// Query builder for run scopes
pub struct RunScope {
    kind: RunKind,
    query: QueryBuilder<'static, Postgres>,
    has_conditions: bool,
}

impl RunScope {
    /// Scope over `runflow_pipeline_runs`
    pub fn pipeline_runs(include_deleted: bool) -> Self {
        Self::new(RunKind::Pipeline, include_deleted)
    }

    /// Scope over `runflow_workflow_runs`
    pub fn workflow_runs(include_deleted: bool) -> Self {
        Self::new(RunKind::Workflow, include_deleted)
    }

    fn new(kind: RunKind, include_deleted: bool) -> Self {
        let (table, owner_table, owner_column) = Self::tables(kind);
        let query = QueryBuilder::new(format!(
            "SELECT {table}.* FROM {table} \
             INNER JOIN {owner_table} ON {owner_table}.uuid = {table}.{owner_column}"
        ));

        let mut scope = Self {
            kind,
            query,
            has_conditions: false,
        };

        if !include_deleted {
            scope.add_condition(&format!(
                "NOT {table}.is_deleted AND NOT {owner_table}.is_deleted"
            ));
        }

        scope
    }

    fn tables(kind: RunKind) -> (&'static str, &'static str, &'static str) {
        match kind {
            RunKind::Pipeline => (
                "runflow_pipeline_runs",
                "runflow_pipelines",
                "pipeline_uuid",
            ),
            RunKind::Workflow => (
                "runflow_workflow_runs",
                "runflow_workflows",
                "workflow_uuid",
            ),
        }
    }

    fn table(&self) -> &'static str {
        Self::tables(self.kind).0
    }

    /// Add WHERE clause helper
    fn add_condition(&mut self, condition: &str) {
        if self.has_conditions {
            self.query.push(" AND ");
        } else {
            self.query.push(" WHERE ");
            self.has_conditions = true;
        }
        self.query.push(condition);
    }

    /// Scope to a single run
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        let condition = format!("{}.uuid = ", self.table());
        self.add_condition(&condition);
        self.query.push_bind(uuid);
        self
    }

    /// Scope to runs of one pipeline or workflow
    pub fn for_owner(mut self, owner_uuid: Uuid) -> Self {
        let (table, _, owner_column) = Self::tables(self.kind);
        self.add_condition(&format!("{table}.{owner_column} = "));
        self.query.push_bind(owner_uuid);
        self
    }

    pub fn in_state(mut self, state: RunState) -> Self {
        let condition = format!("{}.state = ", self.table());
        self.add_condition(&condition);
        self.query.push_bind(state.as_str().to_string());
        self
    }

    /// Match the client idempotency key. Pipeline runs only.
    pub fn with_idempotency_key(mut self, idempotency_key: impl Into<String>) -> Self {
        let condition = format!("{}.idempotency_key = ", self.table());
        self.add_condition(&condition);
        self.query.push_bind(idempotency_key.into());
        self
    }

    /// Order results; must be the last scope applied.
    /// Pipeline runs order by `sequence`, workflow runs by creation time.
    pub fn ordered(mut self) -> Self {
        let table = self.table();
        match self.kind {
            RunKind::Pipeline => self.query.push(format!(" ORDER BY {table}.sequence ASC")),
            RunKind::Workflow => self
                .query
                .push(format!(" ORDER BY {table}.created_at ASC, {table}.uuid ASC")),
        };
        self
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    /// SQL generated so far, with `$n` placeholders
    pub fn sql(&self) -> &str {
        self.query.sql()
    }

    /// Hand the builder to a store for execution
    pub fn into_builder(self) -> QueryBuilder<'static, Postgres> {
        self.query
    }
}
