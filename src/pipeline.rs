//! The question → SQL → result pipeline.
//!
//! ```text
//! Start → SchemaResolved → QueryGenerated → Executed → (ReasoningGenerated) → Done
//!                                 │              │
//!                                 └──── Failed ◀─┘
//! ```
//!
//! Schema resolution never fails (an empty schema list still generates).
//! Generation and execution failures end the run in `Failed` and are
//! returned to the caller. Reasoning failures are absorbed by the
//! reasoning stage. Each transition is reported to the [`StatusSink`];
//! sink errors are logged and ignored.

use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use nl_query_core::models::{DataSourceId, NlQueryResult, TableRef, Timing};

use crate::error::QueryError;
use crate::execute::QueryExecutor;
use crate::generate::QueryGenerator;
use crate::llm::CompletionOptions;
use crate::reasoning::ReasoningGenerator;
use crate::schema::{ResolveOptions, SchemaResolver};
use crate::traits::{PipelineStatus, StatusEvent, StatusSink};

/// Pipeline state. `Failed` is terminal and reachable from generation
/// and execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    SchemaResolved,
    QueryGenerated,
    Executed,
    ReasoningGenerated,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::SchemaResolved => "schema_resolved",
            Stage::QueryGenerated => "query_generated",
            Stage::Executed => "executed",
            Stage::ReasoningGenerated => "reasoning_generated",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Start, SchemaResolved)
                | (SchemaResolved, QueryGenerated)
                | (QueryGenerated, Executed)
                | (Executed, ReasoningGenerated)
                | (Executed, Done)
                | (ReasoningGenerated, Done)
                | (SchemaResolved, Failed)
                | (QueryGenerated, Failed)
        )
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub resolve: ResolveOptions,
    /// `None` uses the configured default.
    pub include_reasoning: Option<bool>,
    pub completion: CompletionOptions,
}

pub struct QueryPipeline {
    resolver: Arc<SchemaResolver>,
    generator: Arc<QueryGenerator>,
    executor: Arc<QueryExecutor>,
    reasoning: Arc<ReasoningGenerator>,
    status: Arc<dyn StatusSink>,
    organization_id: i64,
    include_reasoning: bool,
}

struct Run<'a> {
    id: DataSourceId,
    stage: Stage,
    pipeline: &'a QueryPipeline,
}

impl Run<'_> {
    async fn advance(&mut self, next: Stage) {
        debug_assert!(self.stage.can_advance_to(next), "{:?} -> {:?}", self.stage, next);
        tracing::debug!(from = self.stage.as_str(), to = next.as_str(), "pipeline transition");
        self.stage = next;
        let status = match next {
            Stage::SchemaResolved => PipelineStatus::GeneratingQuery,
            Stage::QueryGenerated => PipelineStatus::Executing,
            _ => return,
        };
        self.pipeline.notify(self.id, status, None, None).await;
    }

    async fn fail(&mut self, err: QueryError) -> QueryError {
        self.advance(Stage::Failed).await;
        self.pipeline
            .notify(self.id, PipelineStatus::Failed, None, Some(err.to_string()))
            .await;
        err
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl QueryPipeline {
    pub fn new(
        resolver: Arc<SchemaResolver>,
        generator: Arc<QueryGenerator>,
        executor: Arc<QueryExecutor>,
        reasoning: Arc<ReasoningGenerator>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            resolver,
            generator,
            executor,
            reasoning,
            status,
            organization_id: 0,
            include_reasoning: false,
        }
    }

    pub fn with_organization(mut self, organization_id: i64) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn with_reasoning(mut self, include: bool) -> Self {
        self.include_reasoning = include;
        self
    }

    async fn notify(
        &self,
        id: DataSourceId,
        status: PipelineStatus,
        metrics: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        let mut event = StatusEvent::new(id, self.organization_id, status);
        if let Some(m) = metrics {
            event = event.with_metrics(m);
        }
        if let Some(e) = error {
            event = event.with_error(e);
        }
        if let Err(e) = self.status.emit(event).await {
            tracing::warn!(error = %format!("{:#}", e), "status notification failed");
        }
    }

    /// Answer `question` against data source `id` by generating and
    /// running a query.
    ///
    /// An empty question is rejected with [`QueryError::InvalidInput`]
    /// before any collaborator is called.
    pub async fn run(
        &self,
        id: DataSourceId,
        question: &str,
        options: &PipelineOptions,
    ) -> Result<NlQueryResult, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidInput("Question is required".to_string()));
        }
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("nl_query", %request_id, data_source = %id);
        self.run_inner(id, question, options).instrument(span).await
    }

    async fn run_inner(
        &self,
        id: DataSourceId,
        question: &str,
        options: &PipelineOptions,
    ) -> Result<NlQueryResult, QueryError> {
        let started = Instant::now();
        let mut run = Run {
            id,
            stage: Stage::Start,
            pipeline: self,
        };
        self.notify(id, PipelineStatus::ResolvingSchema, None, None).await;

        let schemas = self.resolver.resolve_with(id, &options.resolve).await;
        tracing::info!(tables = schemas.len(), "schema context ready");
        run.advance(Stage::SchemaResolved).await;

        let generation_started = Instant::now();
        let sql = match self
            .generator
            .generate(
                question,
                &schemas,
                self.executor.dialect(),
                &|t: &TableRef| self.executor.qualify(t),
                &options.completion,
            )
            .await
        {
            Ok(sql) => sql,
            Err(e) => return Err(run.fail(e).await),
        };
        let sql_generation = elapsed_ms(generation_started);
        run.advance(Stage::QueryGenerated).await;

        let execution_started = Instant::now();
        let result = match self.executor.execute(id, &sql).await {
            Ok(r) => r,
            Err(e) => return Err(run.fail(e).await),
        };
        let execution = elapsed_ms(execution_started);
        run.advance(Stage::Executed).await;

        let (reasoning, reasoning_ms) = if options.include_reasoning.unwrap_or(self.include_reasoning) {
            let reasoning_started = Instant::now();
            let text = self.reasoning.explain(question, &sql, &result).await;
            run.advance(Stage::ReasoningGenerated).await;
            (Some(text), Some(elapsed_ms(reasoning_started)))
        } else {
            (None, None)
        };

        run.advance(Stage::Done).await;
        let timing = Timing {
            total: elapsed_ms(started).max(sql_generation + execution + reasoning_ms.unwrap_or(0)),
            sql_generation,
            execution,
            reasoning: reasoning_ms,
        };
        self.notify(
            id,
            PipelineStatus::Completed,
            Some(json!({ "rowCount": result.row_count, "timing": timing })),
            None,
        )
        .await;
        tracing::info!(rows = result.row_count, total_ms = timing.total, "query answered");

        Ok(NlQueryResult {
            sql,
            result,
            reasoning,
            timing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::GenerationDefaults;
    use crate::schema::ResolverSettings;
    use crate::testing::{column, RecordingSink, ScriptedModel, StubConnector, StubTable};
    use crate::traits::NativeResult;
    use nl_query_core::models::TableRef;
    use nl_query_core::prompt::REASONING_FALLBACK;
    use nl_query_core::store::memory::InMemoryKnowledgeStore;
    use serde_json::Map;

    struct Fixture {
        connector: Arc<StubConnector>,
        model: Arc<ScriptedModel>,
        sink: Arc<RecordingSink>,
        pipeline: QueryPipeline,
    }

    fn fixture(replies: Vec<Result<&str, &str>>, connector: StubConnector) -> Fixture {
        let connector = Arc::new(connector);
        let model = Arc::new(ScriptedModel::new(replies));
        let sink = Arc::new(RecordingSink::default());
        let resolver = Arc::new(SchemaResolver::new(
            connector.clone(),
            Arc::new(InMemoryKnowledgeStore::new()),
            ResolverSettings::default(),
        ));
        let pipeline = QueryPipeline::new(
            resolver,
            Arc::new(QueryGenerator::new(
                model.clone(),
                GenerationDefaults {
                    model: "gpt-4".into(),
                    temperature: 0.1,
                },
            )),
            Arc::new(QueryExecutor::new(connector.clone())),
            Arc::new(ReasoningGenerator::new(model.clone(), CompletionOptions::new("gpt-4", 0.3))),
            sink.clone(),
        )
        .with_organization(9);
        Fixture {
            connector,
            model,
            sink,
            pipeline,
        }
    }

    fn sales() -> StubConnector {
        let mut row = Map::new();
        row.insert("total".into(), serde_json::json!(1234.5));
        StubConnector {
            answer: NativeResult {
                columns: vec!["total".into()],
                rows: Some(vec![row]),
                metadata: serde_json::Value::Null,
            },
            ..StubConnector::with_tables(vec![StubTable {
                table: TableRef::new("SALES", "PUBLIC", "ORDERS"),
                columns: vec![column("amount", "NUMBER")],
                rows: 3,
            }])
        }
    }

    fn statuses(sink: &RecordingSink) -> Vec<PipelineStatus> {
        sink.events.lock().unwrap().iter().map(|e| e.status).collect()
    }

    #[test]
    fn failed_is_only_reachable_from_generation_and_execution() {
        assert!(Stage::SchemaResolved.can_advance_to(Stage::Failed));
        assert!(Stage::QueryGenerated.can_advance_to(Stage::Failed));
        assert!(!Stage::Start.can_advance_to(Stage::Failed));
        assert!(!Stage::Done.can_advance_to(Stage::Failed));
        assert!(!Stage::Start.can_advance_to(Stage::Executed));
    }

    #[tokio::test]
    async fn empty_question_calls_nothing() {
        let f = fixture(vec![], sales());
        for q in ["", "  \n"] {
            let err = f
                .pipeline
                .run(DataSourceId(1), q, &PipelineOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, QueryError::InvalidInput(_)));
        }
        assert_eq!(f.connector.calls(), 0);
        assert_eq!(f.model.calls(), 0);
        assert!(f.sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn successful_run_reports_each_stage() {
        let f = fixture(vec![Ok("SELECT SUM(amount) AS total FROM ORDERS"), Ok("Total is 1234.5")], sales());
        let options = PipelineOptions {
            include_reasoning: Some(true),
            ..PipelineOptions::default()
        };
        let r = f.pipeline.run(DataSourceId(1), "total sales?", &options).await.unwrap();

        assert_eq!(r.sql, "SELECT SUM(amount) AS total FROM ORDERS");
        assert_eq!(r.result.row_count, 1);
        assert_eq!(r.reasoning.as_deref(), Some("Total is 1234.5"));
        assert!(r.timing.total >= r.timing.sql_generation + r.timing.execution);
        assert!(r.timing.reasoning.is_some());
        assert_eq!(
            statuses(&f.sink),
            vec![
                PipelineStatus::ResolvingSchema,
                PipelineStatus::GeneratingQuery,
                PipelineStatus::Executing,
                PipelineStatus::Completed,
            ]
        );
        assert!(f.sink.events.lock().unwrap().iter().all(|e| e.room() == "org_9"));
    }

    #[tokio::test]
    async fn reasoning_failure_is_absorbed() {
        let f = fixture(vec![Ok("SELECT 1"), Err("overloaded")], sales());
        let options = PipelineOptions {
            include_reasoning: Some(true),
            ..PipelineOptions::default()
        };
        let r = f.pipeline.run(DataSourceId(1), "q", &options).await.unwrap();
        assert_eq!(r.reasoning.as_deref(), Some(REASONING_FALLBACK));
    }

    #[tokio::test]
    async fn execution_failure_propagates_and_reports() {
        let mut connector = sales();
        connector.fail_queries = true;
        let f = fixture(vec![Ok("SELEC 1")], connector);
        let err = f
            .pipeline
            .run(
                DataSourceId(1),
                "q",
                &PipelineOptions {
                    resolve: ResolveOptions {
                        filter_tables: None,
                        use_knowledge: false,
                    },
                    ..PipelineOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal");
        assert_eq!(statuses(&f.sink).last(), Some(&PipelineStatus::Failed));
        let events = f.sink.events.lock().unwrap();
        assert!(events.last().and_then(|e| e.error.as_ref()).is_some());
    }

    #[tokio::test]
    async fn generation_failure_skips_execution() {
        let f = fixture(vec![Err("model down")], sales());
        let err = f
            .pipeline
            .run(DataSourceId(1), "q", &PipelineOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal");
        let queries = f.connector.queries.lock().unwrap();
        assert!(queries.iter().all(|q| q.starts_with("SELECT * FROM") || q.starts_with("SELECT COUNT(*)")));
    }
}
