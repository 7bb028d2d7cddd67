//! Routing decisions and dual-path dispatch.
//!
//! A [`Classifier`] picks one [`ProcessingPath`] per question. The
//! [`Router`] times that decision and then answers through the chosen
//! path:
//!
//! | Path | Answered by |
//! |------|-------------|
//! | `rag` | [`RagResponder`] |
//! | `code_execution` | [`QueryPipeline`] |
//! | `hybrid` | both, concurrently; whichever succeed are returned |

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

use nl_query_core::entities;
use nl_query_core::models::{
    CodeExecutionResult, DataSourceId, HybridResult, ProcessingPath, QueryResponse, QueryResult,
    RagResult, RoutingDecision,
};
use nl_query_core::prompt::{build_routing_prompt, ROUTING_SYSTEM_PROMPT};
use nl_query_core::routing::{self, Classification, RoutingHints};

use crate::error::QueryError;
use crate::llm::{ChatMessage, CompletionOptions, LanguageModel};
use crate::pipeline::{PipelineOptions, QueryPipeline};
use crate::rag::RagResponder;

/// Chooses a processing path for a question.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, question: &str, hints: &RoutingHints) -> Classification;
}

/// Rule-table scoring from the core crate. Pure and synchronous.
pub struct HeuristicClassifier;

#[async_trait]
impl Classifier for HeuristicClassifier {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn classify(&self, question: &str, hints: &RoutingHints) -> Classification {
        routing::classify(question, hints)
    }
}

/// Asks the language model; falls back to [`HeuristicClassifier`] when
/// the call fails or the reply cannot be parsed.
pub struct ModelClassifier {
    model: Arc<dyn LanguageModel>,
    options: CompletionOptions,
}

#[derive(Deserialize)]
struct ModelVerdict {
    path: String,
    confidence: Option<f64>,
}

impl ModelClassifier {
    pub fn new(model: Arc<dyn LanguageModel>, options: CompletionOptions) -> Self {
        Self { model, options }
    }

    async fn ask(&self, question: &str) -> Result<(ProcessingPath, f64)> {
        let messages = [
            ChatMessage::system(ROUTING_SYSTEM_PROMPT),
            ChatMessage::user(build_routing_prompt(question)),
        ];
        let reply = self.model.complete(&messages, &self.options).await?;
        parse_verdict(&reply)
    }
}

fn parse_verdict(reply: &str) -> Result<(ProcessingPath, f64)> {
    let start = reply.find('{').ok_or_else(|| anyhow!("no JSON object in reply"))?;
    let end = reply.rfind('}').ok_or_else(|| anyhow!("no JSON object in reply"))?;
    if end < start {
        return Err(anyhow!("no JSON object in reply"));
    }
    let verdict: ModelVerdict = serde_json::from_str(&reply[start..=end])?;
    let path = verdict.path.parse::<ProcessingPath>().map_err(|e| anyhow!(e))?;
    let confidence = verdict.confidence.unwrap_or(0.5);
    if !confidence.is_finite() {
        return Err(anyhow!("confidence is not a number"));
    }
    Ok((path, confidence.clamp(0.0, 1.0)))
}

#[async_trait]
impl Classifier for ModelClassifier {
    fn name(&self) -> &str {
        "model"
    }

    async fn classify(&self, question: &str, hints: &RoutingHints) -> Classification {
        let heuristic = routing::classify(question, hints);
        match self.ask(question).await {
            Ok((path, confidence))
                if path != ProcessingPath::Rag && hints.schema_available == Some(false) =>
            {
                Classification {
                    path: ProcessingPath::Rag,
                    confidence: confidence.min(0.6),
                    ..heuristic
                }
            }
            Ok((path, confidence)) => Classification {
                path,
                confidence,
                ..heuristic
            },
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "model routing failed, using heuristic");
                heuristic
            }
        }
    }
}

/// Build the configured classifier: `"heuristic"` or `"model"`.
pub fn create_classifier(
    name: &str,
    model: Arc<dyn LanguageModel>,
    options: CompletionOptions,
) -> Result<Arc<dyn Classifier>> {
    match name {
        "heuristic" => Ok(Arc::new(HeuristicClassifier)),
        "model" => Ok(Arc::new(ModelClassifier::new(model, options))),
        other => Err(anyhow!("Unknown classifier: {}", other)),
    }
}

/// Per-request routing options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Skip classification and answer through this path.
    pub force_path: Option<ProcessingPath>,
    pub schema_available: Option<bool>,
    pub pipeline: PipelineOptions,
}

pub struct Router {
    classifier: Arc<dyn Classifier>,
    pipeline: Arc<QueryPipeline>,
    rag: Arc<RagResponder>,
}

impl Router {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        pipeline: Arc<QueryPipeline>,
        rag: Arc<RagResponder>,
    ) -> Self {
        Self {
            classifier,
            pipeline,
            rag,
        }
    }

    /// Decide the processing path for `question`.
    pub async fn route(&self, question: &str, hints: &RoutingHints) -> RoutingDecision {
        let started = Instant::now();
        let hints = RoutingHints {
            entities: Some(
                hints
                    .entities
                    .clone()
                    .unwrap_or_else(|| entities::extract(question)),
            ),
            schema_available: hints.schema_available,
        };
        let c = self.classifier.classify(question, &hints).await;
        let decision = RoutingDecision {
            path: c.path,
            confidence: c.confidence.clamp(0.0, 1.0),
            processing_time_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            classifier = self.classifier.name(),
            path = %decision.path,
            confidence = decision.confidence,
            "question routed"
        );
        decision
    }

    /// Route `question` and answer it through the chosen path.
    pub async fn answer(
        &self,
        id: DataSourceId,
        question: &str,
        options: &RouteOptions,
    ) -> Result<QueryResponse, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidInput("Question is required".to_string()));
        }
        let decision = match options.force_path {
            Some(path) => RoutingDecision {
                path,
                confidence: 1.0,
                processing_time_ms: 0,
            },
            None => {
                let hints = RoutingHints {
                    entities: None,
                    schema_available: options.schema_available,
                };
                self.route(question, &hints).await
            }
        };

        let result = match decision.path {
            ProcessingPath::Rag => QueryResult::Rag(self.rag.answer(id, question).await?),
            ProcessingPath::CodeExecution => QueryResult::CodeExecution(
                self.code_execution(id, question, &options.pipeline).await?,
            ),
            ProcessingPath::Hybrid => {
                let (rag, code) = tokio::join!(
                    self.rag.answer(id, question),
                    self.code_execution(id, question, &options.pipeline)
                );
                QueryResult::Hybrid(merge_hybrid(rag, code)?)
            }
        };
        Ok(QueryResponse::new(&decision, result))
    }

    async fn code_execution(
        &self,
        id: DataSourceId,
        question: &str,
        options: &PipelineOptions,
    ) -> Result<CodeExecutionResult, QueryError> {
        let data = self.pipeline.run(id, question, options).await?;
        Ok(CodeExecutionResult {
            content: data.reasoning.clone(),
            data,
        })
    }
}

/// Keep whichever sub-path succeeded. Fails only when both did, with the
/// code-execution error.
fn merge_hybrid(
    rag: Result<RagResult, QueryError>,
    code: Result<CodeExecutionResult, QueryError>,
) -> Result<HybridResult, QueryError> {
    match (rag, code) {
        (Err(rag_err), Err(code_err)) => {
            tracing::warn!(error = %rag_err, "hybrid rag path failed");
            Err(code_err)
        }
        (rag, code) => {
            if let Err(e) = &rag {
                tracing::warn!(error = %e, "hybrid rag path failed");
            }
            if let Err(e) = &code {
                tracing::warn!(error = %e, "hybrid code path failed");
            }
            Ok(HybridResult {
                rag_result: rag.ok(),
                code_execution_result: code.ok(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    #[test]
    fn verdicts_are_parsed_and_clamped() {
        let (p, c) = parse_verdict(r#"{"path": "hybrid", "confidence": 0.7}"#).unwrap();
        assert_eq!((p, c), (ProcessingPath::Hybrid, 0.7));
        let (p, c) = parse_verdict("Sure! ```json\n{\"path\":\"code_execution\",\"confidence\":3}\n```").unwrap();
        assert_eq!((p, c), (ProcessingPath::CodeExecution, 1.0));
        assert!(parse_verdict("rag").is_err());
        assert!(parse_verdict(r#"{"path": "graph"}"#).is_err());
    }

    #[tokio::test]
    async fn model_classifier_falls_back_to_heuristic() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("I think SQL"), Err("boom")]));
        let classifier = ModelClassifier::new(model, CompletionOptions::default());
        let question = "What was total revenue last month?";
        let expected = routing::classify(question, &RoutingHints::default());
        for _ in 0..2 {
            let c = classifier.classify(question, &RoutingHints::default()).await;
            assert_eq!(c, expected);
        }
    }

    #[tokio::test]
    async fn model_classifier_respects_missing_schema() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(r#"{"path":"code_execution","confidence":0.95}"#)]));
        let classifier = ModelClassifier::new(model, CompletionOptions::default());
        let hints = RoutingHints {
            entities: None,
            schema_available: Some(false),
        };
        let c = classifier.classify("sum of sales", &hints).await;
        assert_eq!(c.path, ProcessingPath::Rag);
        assert!(c.confidence <= 0.6);
    }

    #[test]
    fn hybrid_keeps_partial_results() {
        let merged = merge_hybrid(
            Ok(Default::default()),
            Err(QueryError::InvalidInput("x".into())),
        )
        .unwrap();
        assert!(merged.rag_result.is_some());
        assert!(merged.code_execution_result.is_none());

        let err = merge_hybrid(
            Err(QueryError::NotFound("not indexed".into())),
            Err(QueryError::InvalidInput("bad".into())),
        )
        .unwrap_err();
        assert_eq!(err.code(), "bad_request");
    }
}
