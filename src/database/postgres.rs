//! # PostgreSQL Run Store
//!
//! [`RunStore`] over the schema in `migrations/`. Run updates are a single
//! `UPDATE ... WHERE uuid = $1 AND version = $2` inside a transaction that
//! also appends the transition row, so the row lock taken by the update
//! serializes concurrent writers of the same run.

use super::connection::DatabaseConnection;
use super::{PersistenceError, PersistenceResult, RunStore, WorkflowRunMember};
use crate::config::DatabaseConfig;
use crate::models::{
    ConsoleOutput, NewRunTransition, Pipeline, PipelineRun, RunArtifact, RunInput, RunKind,
    RunTransition, Workflow, WorkflowPipeline, WorkflowPipelineDependency, WorkflowPipelineRun,
    WorkflowRun,
};
use crate::scopes::RunScope;
use crate::state_machine::RunState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct PipelineRunRow {
    uuid: Uuid,
    pipeline_uuid: Uuid,
    sequence: i32,
    state: String,
    inputs: Json<Vec<RunInput>>,
    outputs: Json<Vec<RunArtifact>>,
    stdout: String,
    stderr: String,
    callback_url: String,
    status_update_token: String,
    status_update_token_expires_at: DateTime<Utc>,
    executor_token: Option<String>,
    idempotency_key: Option<String>,
    version: i64,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PipelineRunRow> for PipelineRun {
    type Error = PersistenceError;

    fn try_from(row: PipelineRunRow) -> PersistenceResult<Self> {
        Ok(PipelineRun {
            uuid: row.uuid,
            pipeline_uuid: row.pipeline_uuid,
            sequence: row.sequence,
            state: parse_state("runflow_pipeline_runs.state", &row.state)?,
            inputs: row.inputs.0,
            outputs: row.outputs.0,
            console: ConsoleOutput {
                stdout: row.stdout,
                stderr: row.stderr,
            },
            callback_url: row.callback_url,
            status_update_token: row.status_update_token,
            status_update_token_expires_at: row.status_update_token_expires_at,
            executor_token: row.executor_token,
            idempotency_key: row.idempotency_key,
            version: row.version,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WorkflowRunRow {
    uuid: Uuid,
    workflow_uuid: Uuid,
    state: String,
    version: i64,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowRunRow> for WorkflowRun {
    type Error = PersistenceError;

    fn try_from(row: WorkflowRunRow) -> PersistenceResult<Self> {
        Ok(WorkflowRun {
            uuid: row.uuid,
            workflow_uuid: row.workflow_uuid,
            state: parse_state("runflow_workflow_runs.state", &row.state)?,
            version: row.version,
            is_deleted: row.is_deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunTransitionRow {
    run_uuid: Uuid,
    run_kind: String,
    from_state: String,
    to_state: String,
    sort_key: i32,
    most_recent: bool,
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<RunTransitionRow> for RunTransition {
    type Error = PersistenceError;

    fn try_from(row: RunTransitionRow) -> PersistenceResult<Self> {
        let run_kind = row
            .run_kind
            .parse::<RunKind>()
            .map_err(|reason| PersistenceError::InvalidData {
                field: "runflow_run_transitions.run_kind",
                reason,
            })?;

        Ok(RunTransition {
            run_uuid: row.run_uuid,
            run_kind,
            from_state: parse_state("runflow_run_transitions.from_state", &row.from_state)?,
            to_state: parse_state("runflow_run_transitions.to_state", &row.to_state)?,
            sort_key: row.sort_key,
            most_recent: row.most_recent,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

fn parse_state(field: &'static str, raw: &str) -> PersistenceResult<RunState> {
    raw.parse::<RunState>()
        .map_err(|reason| PersistenceError::InvalidData { field, reason })
}

/// Turn unique-constraint violations into `Duplicate`
fn map_unique_violation(error: sqlx::Error, entity: &'static str, key: String) -> PersistenceError {
    match &error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => {
            PersistenceError::Duplicate { entity, key }
        }
        _ => PersistenceError::Database(error),
    }
}

/// PostgreSQL implementation of [`RunStore`]
#[derive(Debug, Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the configured pool settings and apply pending migrations
    pub async fn connect(config: &DatabaseConfig) -> PersistenceResult<Self> {
        let connection = DatabaseConnection::new(config).await?;
        let store = Self::new(connection.pool().clone());
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_connection(connection: &DatabaseConnection) -> Self {
        Self::new(connection.pool().clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> PersistenceResult<()> {
        super::migrations::run_migrations(&self.pool).await
    }

    async fn fetch_pipeline_runs(&self, scope: RunScope) -> PersistenceResult<Vec<PipelineRun>> {
        let mut query = scope.into_builder();
        let rows = query
            .build_query_as::<PipelineRunRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(PipelineRun::try_from).collect()
    }

    async fn fetch_workflow_runs(&self, scope: RunScope) -> PersistenceResult<Vec<WorkflowRun>> {
        let mut query = scope.into_builder();
        let rows = query
            .build_query_as::<WorkflowRunRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkflowRun::try_from).collect()
    }

    /// Insert a pipeline run on an open transaction, assigning its sequence.
    /// Locks the owning pipeline row so concurrent inserts number runs in turn.
    async fn insert_pipeline_run_in(
        conn: &mut PgConnection,
        run: &PipelineRun,
    ) -> PersistenceResult<PipelineRun> {
        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT uuid FROM runflow_pipelines WHERE uuid = $1 FOR UPDATE")
                .bind(run.pipeline_uuid)
                .fetch_optional(&mut *conn)
                .await?;
        if owner.is_none() {
            return Err(PersistenceError::RecordNotFound {
                entity: "pipeline",
                uuid: run.pipeline_uuid,
            });
        }

        let sequence: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM runflow_pipeline_runs \
             WHERE pipeline_uuid = $1",
        )
        .bind(run.pipeline_uuid)
        .fetch_one(&mut *conn)
        .await?;

        let duplicate_key = run
            .idempotency_key
            .clone()
            .unwrap_or_else(|| run.uuid.to_string());

        let row = sqlx::query_as::<_, PipelineRunRow>(
            r#"
            INSERT INTO runflow_pipeline_runs (
                uuid, pipeline_uuid, sequence, state, inputs, outputs, stdout, stderr,
                callback_url, status_update_token, status_update_token_expires_at,
                executor_token, idempotency_key, version, is_deleted,
                created_at, updated_at, started_at, completed_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            RETURNING *
            "#,
        )
        .bind(run.uuid)
        .bind(run.pipeline_uuid)
        .bind(sequence)
        .bind(run.state.as_str())
        .bind(Json(&run.inputs))
        .bind(Json(&run.outputs))
        .bind(&run.console.stdout)
        .bind(&run.console.stderr)
        .bind(&run.callback_url)
        .bind(&run.status_update_token)
        .bind(run.status_update_token_expires_at)
        .bind(&run.executor_token)
        .bind(&run.idempotency_key)
        .bind(run.version)
        .bind(run.is_deleted)
        .bind(run.created_at)
        .bind(run.updated_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_unique_violation(e, "pipeline_run", duplicate_key))?;

        PipelineRun::try_from(row)
    }

    /// Append a history row, moving `most_recent` to it
    async fn insert_transition_in(
        conn: &mut PgConnection,
        transition: &NewRunTransition,
    ) -> PersistenceResult<()> {
        sqlx::query(
            "UPDATE runflow_run_transitions SET most_recent = FALSE \
             WHERE run_uuid = $1 AND most_recent",
        )
        .bind(transition.run_uuid)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO runflow_run_transitions (
                run_uuid, run_kind, from_state, to_state, sort_key, most_recent,
                metadata, created_at
            )
            SELECT $1, $2, $3, $4, COALESCE(MAX(sort_key), 0) + 1, TRUE, $5, $6
            FROM runflow_run_transitions
            WHERE run_uuid = $1
            "#,
        )
        .bind(transition.run_uuid)
        .bind(transition.run_kind.to_string())
        .bind(transition.from_state.as_str())
        .bind(transition.to_state.as_str())
        .bind(&transition.metadata)
        .bind(transition.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Distinguish a missing row from a stale version after a CAS miss
    async fn cas_failure(
        conn: &mut PgConnection,
        table: &'static str,
        entity: &'static str,
        uuid: Uuid,
        expected_version: i64,
    ) -> PersistenceError {
        let exists: Result<bool, sqlx::Error> =
            sqlx::query_scalar(&format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE uuid = $1)"))
                .bind(uuid)
                .fetch_one(&mut *conn)
                .await;

        match exists {
            Ok(true) => PersistenceError::ConcurrentModification {
                entity,
                uuid,
                expected_version,
            },
            Ok(false) => PersistenceError::RecordNotFound { entity, uuid },
            Err(e) => PersistenceError::Database(e),
        }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn insert_pipeline(&self, pipeline: &Pipeline) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runflow_pipelines
                (uuid, name, description, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(pipeline.uuid)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(pipeline.is_deleted)
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "pipeline", pipeline.uuid.to_string()))?;
        Ok(())
    }

    async fn find_pipeline(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<Pipeline>> {
        let pipeline = sqlx::query_as::<_, Pipeline>(
            r#"
            SELECT uuid, name, description, is_deleted, created_at, updated_at
            FROM runflow_pipelines
            WHERE uuid = $1 AND ($2 OR NOT is_deleted)
            "#,
        )
        .bind(uuid)
        .bind(include_deleted)
        .fetch_optional(&self.pool)
        .await?;
        Ok(pipeline)
    }

    async fn soft_delete_pipeline(&self, uuid: Uuid) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE runflow_pipelines SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1",
        )
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runflow_workflows
                (uuid, name, description, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(workflow.uuid)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.is_deleted)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "workflow", workflow.uuid.to_string()))?;
        Ok(())
    }

    async fn find_workflow(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<Workflow>> {
        let workflow = sqlx::query_as::<_, Workflow>(
            r#"
            SELECT uuid, name, description, is_deleted, created_at, updated_at
            FROM runflow_workflows
            WHERE uuid = $1 AND ($2 OR NOT is_deleted)
            "#,
        )
        .bind(uuid)
        .bind(include_deleted)
        .fetch_optional(&self.pool)
        .await?;
        Ok(workflow)
    }

    async fn soft_delete_workflow(&self, uuid: Uuid) -> PersistenceResult<bool> {
        let result = sqlx::query(
            "UPDATE runflow_workflows SET is_deleted = TRUE, updated_at = NOW() WHERE uuid = $1",
        )
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_workflow_pipeline(
        &self,
        workflow_pipeline: &WorkflowPipeline,
    ) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runflow_workflow_pipelines
                (uuid, workflow_uuid, pipeline_uuid, is_deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(workflow_pipeline.uuid)
        .bind(workflow_pipeline.workflow_uuid)
        .bind(workflow_pipeline.pipeline_uuid)
        .bind(workflow_pipeline.is_deleted)
        .bind(workflow_pipeline.created_at)
        .bind(workflow_pipeline.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_unique_violation(e, "workflow_pipeline", workflow_pipeline.uuid.to_string())
        })?;
        Ok(())
    }

    async fn find_workflow_pipelines(
        &self,
        workflow_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<WorkflowPipeline>> {
        let pipelines = sqlx::query_as::<_, WorkflowPipeline>(
            r#"
            SELECT uuid, workflow_uuid, pipeline_uuid, is_deleted, created_at, updated_at
            FROM runflow_workflow_pipelines
            WHERE workflow_uuid = $1 AND ($2 OR NOT is_deleted)
            ORDER BY created_at ASC, uuid ASC
            "#,
        )
        .bind(workflow_uuid)
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await?;
        Ok(pipelines)
    }

    async fn insert_workflow_pipeline_dependency(
        &self,
        dependency: &WorkflowPipelineDependency,
    ) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO runflow_workflow_pipeline_dependencies
                (from_workflow_pipeline_uuid, to_workflow_pipeline_uuid)
            VALUES ($1, $2)
            "#,
        )
        .bind(dependency.from_workflow_pipeline_uuid)
        .bind(dependency.to_workflow_pipeline_uuid)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_unique_violation(
                e,
                "workflow_pipeline_dependency",
                format!(
                    "{}->{}",
                    dependency.from_workflow_pipeline_uuid, dependency.to_workflow_pipeline_uuid
                ),
            )
        })?;
        Ok(())
    }

    async fn find_workflow_pipeline_dependencies(
        &self,
        workflow_uuid: Uuid,
    ) -> PersistenceResult<Vec<WorkflowPipelineDependency>> {
        let dependencies = sqlx::query_as::<_, WorkflowPipelineDependency>(
            r#"
            SELECT d.from_workflow_pipeline_uuid, d.to_workflow_pipeline_uuid
            FROM runflow_workflow_pipeline_dependencies d
            INNER JOIN runflow_workflow_pipelines source
                ON source.uuid = d.from_workflow_pipeline_uuid
            INNER JOIN runflow_workflow_pipelines dest
                ON dest.uuid = d.to_workflow_pipeline_uuid
            WHERE source.workflow_uuid = $1 AND dest.workflow_uuid = $1
            ORDER BY d.created_at ASC
            "#,
        )
        .bind(workflow_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(dependencies)
    }

    async fn insert_pipeline_run(&self, run: &PipelineRun) -> PersistenceResult<PipelineRun> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::insert_pipeline_run_in(&mut *tx, run).await?;
        tx.commit().await?;

        debug!(run_uuid = %stored.uuid, sequence = stored.sequence, "Inserted pipeline run");
        Ok(stored)
    }

    async fn find_pipeline_run(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<PipelineRun>> {
        let scope = RunScope::pipeline_runs(include_deleted).with_uuid(uuid);
        Ok(self.fetch_pipeline_runs(scope).await?.into_iter().next())
    }

    async fn find_pipeline_runs(
        &self,
        pipeline_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<PipelineRun>> {
        let scope = RunScope::pipeline_runs(include_deleted)
            .for_owner(pipeline_uuid)
            .ordered();
        self.fetch_pipeline_runs(scope).await
    }

    async fn find_pipeline_run_by_idempotency_key(
        &self,
        pipeline_uuid: Uuid,
        idempotency_key: &str,
    ) -> PersistenceResult<Option<PipelineRun>> {
        let scope = RunScope::pipeline_runs(false)
            .for_owner(pipeline_uuid)
            .with_idempotency_key(idempotency_key);
        Ok(self.fetch_pipeline_runs(scope).await?.into_iter().next())
    }

    async fn update_pipeline_run(
        &self,
        run: &PipelineRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<PipelineRun> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PipelineRunRow>(
            r#"
            UPDATE runflow_pipeline_runs
            SET state = $3,
                inputs = $4,
                outputs = $5,
                stdout = $6,
                stderr = $7,
                callback_url = $8,
                status_update_token = $9,
                status_update_token_expires_at = $10,
                executor_token = $11,
                is_deleted = $12,
                updated_at = $13,
                started_at = $14,
                completed_at = $15,
                version = $2 + 1
            WHERE uuid = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(run.uuid)
        .bind(expected_version)
        .bind(run.state.as_str())
        .bind(Json(&run.inputs))
        .bind(Json(&run.outputs))
        .bind(&run.console.stdout)
        .bind(&run.console.stderr)
        .bind(&run.callback_url)
        .bind(&run.status_update_token)
        .bind(run.status_update_token_expires_at)
        .bind(&run.executor_token)
        .bind(run.is_deleted)
        .bind(run.updated_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let error = Self::cas_failure(
                &mut *tx,
                "runflow_pipeline_runs",
                "pipeline_run",
                run.uuid,
                expected_version,
            )
            .await;
            tx.rollback().await?;
            return Err(error);
        };

        if let Some(transition) = &transition {
            Self::insert_transition_in(&mut *tx, transition).await?;
        }
        tx.commit().await?;

        PipelineRun::try_from(row)
    }

    async fn soft_delete_pipeline_run(&self, uuid: Uuid) -> PersistenceResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE runflow_pipeline_runs
            SET is_deleted = TRUE, updated_at = NOW(), version = version + 1
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_workflow_run(
        &self,
        run: &WorkflowRun,
        members: &[WorkflowRunMember],
    ) -> PersistenceResult<Vec<PipelineRun>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO runflow_workflow_runs (
                uuid, workflow_uuid, state, version, is_deleted,
                created_at, updated_at, started_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.uuid)
        .bind(run.workflow_uuid)
        .bind(run.state.as_str())
        .bind(run.version)
        .bind(run.is_deleted)
        .bind(run.created_at)
        .bind(run.updated_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "workflow_run", run.uuid.to_string()))?;

        let mut inserted = Vec::with_capacity(members.len());
        for member in members {
            let stored = Self::insert_pipeline_run_in(&mut *tx, &member.pipeline_run).await?;

            sqlx::query(
                r#"
                INSERT INTO runflow_workflow_pipeline_runs
                    (workflow_run_uuid, workflow_pipeline_uuid, pipeline_run_uuid)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(run.uuid)
            .bind(member.workflow_pipeline_uuid)
            .bind(stored.uuid)
            .execute(&mut *tx)
            .await?;

            inserted.push(stored);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_workflow_run(
        &self,
        uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Option<WorkflowRun>> {
        let scope = RunScope::workflow_runs(include_deleted).with_uuid(uuid);
        Ok(self.fetch_workflow_runs(scope).await?.into_iter().next())
    }

    async fn find_workflow_runs(
        &self,
        workflow_uuid: Uuid,
        include_deleted: bool,
    ) -> PersistenceResult<Vec<WorkflowRun>> {
        let scope = RunScope::workflow_runs(include_deleted)
            .for_owner(workflow_uuid)
            .ordered();
        self.fetch_workflow_runs(scope).await
    }

    async fn find_workflow_pipeline_runs(
        &self,
        workflow_run_uuid: Uuid,
    ) -> PersistenceResult<Vec<WorkflowPipelineRun>> {
        let links = sqlx::query_as::<_, WorkflowPipelineRun>(
            r#"
            SELECT workflow_run_uuid, workflow_pipeline_uuid, pipeline_run_uuid
            FROM runflow_workflow_pipeline_runs
            WHERE workflow_run_uuid = $1
            "#,
        )
        .bind(workflow_run_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    async fn find_workflow_pipeline_run_for(
        &self,
        pipeline_run_uuid: Uuid,
    ) -> PersistenceResult<Option<WorkflowPipelineRun>> {
        let link = sqlx::query_as::<_, WorkflowPipelineRun>(
            r#"
            SELECT workflow_run_uuid, workflow_pipeline_uuid, pipeline_run_uuid
            FROM runflow_workflow_pipeline_runs
            WHERE pipeline_run_uuid = $1
            "#,
        )
        .bind(pipeline_run_uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    async fn update_workflow_run(
        &self,
        run: &WorkflowRun,
        expected_version: i64,
        transition: Option<NewRunTransition>,
    ) -> PersistenceResult<WorkflowRun> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, WorkflowRunRow>(
            r#"
            UPDATE runflow_workflow_runs
            SET state = $3,
                is_deleted = $4,
                updated_at = $5,
                started_at = $6,
                completed_at = $7,
                version = $2 + 1
            WHERE uuid = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(run.uuid)
        .bind(expected_version)
        .bind(run.state.as_str())
        .bind(run.is_deleted)
        .bind(run.updated_at)
        .bind(run.started_at)
        .bind(run.completed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            let error = Self::cas_failure(
                &mut *tx,
                "runflow_workflow_runs",
                "workflow_run",
                run.uuid,
                expected_version,
            )
            .await;
            tx.rollback().await?;
            return Err(error);
        };

        if let Some(transition) = &transition {
            Self::insert_transition_in(&mut *tx, transition).await?;
        }
        tx.commit().await?;

        WorkflowRun::try_from(row)
    }

    async fn find_run_transitions(&self, run_uuid: Uuid) -> PersistenceResult<Vec<RunTransition>> {
        let rows = sqlx::query_as::<_, RunTransitionRow>(
            r#"
            SELECT run_uuid, run_kind, from_state, to_state, sort_key, most_recent,
                   metadata, created_at
            FROM runflow_run_transitions
            WHERE run_uuid = $1
            ORDER BY sort_key ASC
            "#,
        )
        .bind(run_uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RunTransition::try_from).collect()
    }
}
