//! The evaluation pipeline: three sequential stages per job, with a
//! whole-sequence restart on the fallback provider when a provider fails.
//!
//! Stage order is fixed (CV, then project, then summary) because the
//! summary prompt consumes the first two stages' text. The restart always
//! begins again at the CV stage so that all three outputs come from a single
//! provider; mixing providers mid-job trades consistency of tone and scale
//! for saved work, and we do not make that trade.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::evaluation::parse::{extract_score, ScoredFeedback};
use crate::evaluation::prompts::{
    CASE_BRIEF_QUERY, CV_EVAL_PROMPT_TEMPLATE, CV_RUBRIC_QUERY, JOB_DESCRIPTION_QUERY,
    PROJECT_EVAL_PROMPT_TEMPLATE, PROJECT_RUBRIC_QUERY, SUMMARY_PROMPT_TEMPLATE,
};
use crate::evaluation::repo::{DocumentStore, EvaluationRepo, RepoError};
use crate::llm::{CompletionClient, GenerationParams, ProviderError};
use crate::metrics::{provider_failures, provider_fallbacks, Metrics};
use crate::models::evaluation::{EvaluationJobRow, EvaluationOutcome};
use crate::queue::{DispatchError, Dispatcher};
use crate::retrieval::{RetrievalError, Retriever};

/// Why a single evaluation sequence stopped.
#[derive(Debug, Error)]
enum StageError {
    /// The provider is unavailable or rejected the request. Either way the
    /// sequence restarts on the fallback provider if one is configured.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The model answered but no score could be read out of the response.
    /// Terminal for the job: the provider itself worked, so a restart on the
    /// fallback would only spend quota on the same ambiguity.
    #[error("{stage} stage returned no usable score: \"{response}\"")]
    Unscorable {
        stage: &'static str,
        response: String,
    },
}

pub struct Orchestrator {
    repo: Arc<dyn EvaluationRepo>,
    documents: Arc<dyn DocumentStore>,
    retriever: Arc<dyn Retriever>,
    /// Absent in fallback-only mode; then a provider failure is terminal.
    primary: Option<Arc<dyn CompletionClient>>,
    fallback: Arc<dyn CompletionClient>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn EvaluationRepo>,
        documents: Arc<dyn DocumentStore>,
        retriever: Arc<dyn Retriever>,
        primary: Option<Arc<dyn CompletionClient>>,
        fallback: Arc<dyn CompletionClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            documents,
            retriever,
            primary,
            fallback,
            metrics,
        }
    }

    /// Runs one delivery of a job id to a terminal state.
    ///
    /// Only repository unavailability escapes as an error (for queue-level
    /// redelivery). Every other failure ends inside the job record.
    pub async fn run(&self, job_id: Uuid) -> Result<(), RepoError> {
        let job = match self.repo.claim(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                info!("job {job_id}: already terminal, skipping duplicate delivery");
                return Ok(());
            }
            Err(RepoError::NotFound(_)) => {
                warn!("job {job_id}: unknown id delivered, skipping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let cv_text = match self.documents.content(job.cv_id).await {
            Ok(text) => text,
            Err(RepoError::NotFound(id)) => {
                self.repo
                    .fail(job_id, &format!("CV document {id} is missing"))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let project_text = match self.documents.content(job.project_report_id).await {
            Ok(text) => text,
            Err(RepoError::NotFound(id)) => {
                self.repo
                    .fail(job_id, &format!("Project report document {id} is missing"))
                    .await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let first = self.primary.as_deref().unwrap_or(self.fallback.as_ref());

        match self.run_sequence(first, &job, &cv_text, &project_text).await {
            Ok(outcome) => {
                self.repo.complete(job_id, &outcome).await?;
                info!("job {job_id}: completed via {}", first.provider());
            }
            Err(StageError::Provider(primary_err)) => {
                self.metrics.incr(&provider_failures(first.provider()));

                if self.primary.is_some() {
                    warn!(
                        "job {job_id}: {} failed ({primary_err}), restarting all stages on {}",
                        first.provider(),
                        self.fallback.provider()
                    );
                    self.metrics
                        .incr(&provider_fallbacks(self.fallback.provider()));

                    match self
                        .run_sequence(self.fallback.as_ref(), &job, &cv_text, &project_text)
                        .await
                    {
                        Ok(outcome) => {
                            self.repo.complete(job_id, &outcome).await?;
                            info!("job {job_id}: completed via fallback {}", self.fallback.provider());
                        }
                        Err(fallback_err) => {
                            if matches!(fallback_err, StageError::Provider(_)) {
                                self.metrics
                                    .incr(&provider_failures(self.fallback.provider()));
                            }
                            let summary = format!(
                                "primary provider {} failed: {primary_err}; fallback provider {} failed: {fallback_err}",
                                first.provider(),
                                self.fallback.provider()
                            );
                            self.repo.fail(job_id, &summary).await?;
                        }
                    }
                } else {
                    self.repo
                        .fail(
                            job_id,
                            &format!("provider {} failed: {primary_err}", first.provider()),
                        )
                        .await?;
                }
            }
            Err(unscorable) => {
                self.repo.fail(job_id, &unscorable.to_string()).await?;
            }
        }

        Ok(())
    }

    /// One full pass of all three stages against a single provider.
    async fn run_sequence(
        &self,
        client: &dyn CompletionClient,
        job: &EvaluationJobRow,
        cv_text: &str,
        project_text: &str,
    ) -> Result<EvaluationOutcome, StageError> {
        let cv = self.cv_stage(client, job, cv_text).await?;
        let project = self.project_stage(client, project_text).await?;
        let overall_summary = self
            .summary_stage(client, &cv.feedback, &project.feedback)
            .await?;

        Ok(EvaluationOutcome {
            cv_match_rate: cv.score,
            cv_feedback: cv.feedback,
            project_score: project.score,
            project_feedback: project.feedback,
            overall_summary,
        })
    }

    async fn cv_stage(
        &self,
        client: &dyn CompletionClient,
        job: &EvaluationJobRow,
        cv_text: &str,
    ) -> Result<ScoredFeedback, StageError> {
        let (context, rubric) = tokio::join!(
            self.context_for(JOB_DESCRIPTION_QUERY, "cv"),
            self.context_for(CV_RUBRIC_QUERY, "cv"),
        );

        let prompt = CV_EVAL_PROMPT_TEMPLATE
            .replace("{job_title}", &job.job_title)
            .replace("{context}", &context)
            .replace("{rubric}", &rubric)
            .replace("{cv_text}", cv_text);

        let response = client.generate(&prompt, &GenerationParams::default()).await?;
        extract_score(&response, 0.0, 1.0).ok_or_else(|| StageError::Unscorable {
            stage: "cv",
            response: snippet(&response),
        })
    }

    async fn project_stage(
        &self,
        client: &dyn CompletionClient,
        project_text: &str,
    ) -> Result<ScoredFeedback, StageError> {
        let (context, rubric) = tokio::join!(
            self.context_for(CASE_BRIEF_QUERY, "project"),
            self.context_for(PROJECT_RUBRIC_QUERY, "project"),
        );

        let prompt = PROJECT_EVAL_PROMPT_TEMPLATE
            .replace("{context}", &context)
            .replace("{rubric}", &rubric)
            .replace("{project_text}", project_text);

        let response = client.generate(&prompt, &GenerationParams::default()).await?;
        extract_score(&response, 1.0, 5.0).ok_or_else(|| StageError::Unscorable {
            stage: "project",
            response: snippet(&response),
        })
    }

    async fn summary_stage(
        &self,
        client: &dyn CompletionClient,
        cv_evaluation: &str,
        project_evaluation: &str,
    ) -> Result<String, StageError> {
        let prompt = SUMMARY_PROMPT_TEMPLATE
            .replace("{cv_evaluation}", cv_evaluation)
            .replace("{project_evaluation}", project_evaluation);

        let params = GenerationParams {
            max_tokens: 512,
            ..GenerationParams::default()
        };
        let response = client.generate(&prompt, &params).await?;
        let summary = response.trim();
        if summary.is_empty() {
            return Err(StageError::Unscorable {
                stage: "summary",
                response: snippet(&response),
            });
        }
        Ok(summary.to_string())
    }

    /// Retrieval context for one query. An unreachable index degrades to an
    /// empty context: a missing rubric should lower quality, not block the
    /// evaluation.
    async fn context_for(&self, query: &str, topic: &str) -> String {
        match self.retriever.retrieve(query, topic).await {
            Ok(passages) => passages
                .iter()
                .map(|p| p.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            Err(RetrievalError::Unavailable(reason)) => {
                warn!("retrieval unavailable for {query:?} ({reason}), continuing with empty context");
                String::new()
            }
        }
    }
}

#[async_trait]
impl Dispatcher for Orchestrator {
    async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError> {
        self.run(job_id)
            .await
            .map_err(|e| DispatchError::Retryable(e.to_string()))
    }
}

fn snippet(text: &str) -> String {
    const MAX_CHARS: usize = 160;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(MAX_CHARS).collect();
        format!("{}...", head.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::models::evaluation::JobStatus;
    use crate::retrieval::Passage;

    const CV_TEXT: &str = "5 years backend experience, Python, distributed systems";
    const PROJECT_TEXT: &str = "Implemented a job queue with retries";

    const GOOD_CV: &str =
        "Match Rate: 0.82\nFeedback: Strong backend profile with real distributed-systems work.";
    const GOOD_PROJECT: &str =
        "Score: 4.5\nFeedback: Retry design is solid; observability could go deeper.";
    const GOOD_SUMMARY: &str = "A capable backend engineer. The CV shows depth in distributed \
        systems. The project demonstrates sound failure handling.";

    // ── test doubles ────────────────────────────────────────────────────────

    struct InMemoryStore {
        jobs: Mutex<HashMap<Uuid, EvaluationJobRow>>,
        documents: Mutex<HashMap<Uuid, String>>,
        transitions: Mutex<Vec<&'static str>>,
        unavailable: AtomicBool,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self {
                jobs: Mutex::new(HashMap::new()),
                documents: Mutex::new(HashMap::new()),
                transitions: Mutex::new(Vec::new()),
                unavailable: AtomicBool::new(false),
            }
        }

        fn seed_job(&self) -> Uuid {
            let cv_id = Uuid::new_v4();
            let project_id = Uuid::new_v4();
            self.documents
                .lock()
                .unwrap()
                .extend([(cv_id, CV_TEXT.to_string()), (project_id, PROJECT_TEXT.to_string())]);

            let job = EvaluationJobRow {
                id: Uuid::new_v4(),
                job_title: "Backend Engineer".to_string(),
                cv_id,
                project_report_id: project_id,
                status: "queued".to_string(),
                cv_match_rate: None,
                cv_feedback: None,
                project_score: None,
                project_feedback: None,
                overall_summary: None,
                failure_reason: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let id = job.id;
            self.jobs.lock().unwrap().insert(id, job);
            id
        }

        fn job(&self, id: Uuid) -> EvaluationJobRow {
            self.jobs.lock().unwrap().get(&id).unwrap().clone()
        }

        fn transitions(&self) -> Vec<&'static str> {
            self.transitions.lock().unwrap().clone()
        }

        fn check_available(&self) -> Result<(), RepoError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(RepoError::Unavailable(sqlx::Error::PoolTimedOut));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EvaluationRepo for InMemoryStore {
        async fn get(&self, id: Uuid) -> Result<EvaluationJobRow, RepoError> {
            self.check_available()?;
            self.jobs
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepoError::NotFound(id))
        }

        async fn claim(&self, id: Uuid) -> Result<Option<EvaluationJobRow>, RepoError> {
            self.check_available()?;
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).ok_or(RepoError::NotFound(id))?;
            if job.job_status().is_terminal() {
                return Ok(None);
            }
            job.status = JobStatus::Processing.as_str().to_string();
            self.transitions.lock().unwrap().push("processing");
            Ok(Some(job.clone()))
        }

        async fn complete(&self, id: Uuid, outcome: &EvaluationOutcome) -> Result<(), RepoError> {
            self.check_available()?;
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).ok_or(RepoError::NotFound(id))?;
            if job.job_status() != JobStatus::Processing {
                return Ok(());
            }
            job.status = JobStatus::Completed.as_str().to_string();
            job.cv_match_rate = Some(outcome.cv_match_rate);
            job.cv_feedback = Some(outcome.cv_feedback.clone());
            job.project_score = Some(outcome.project_score);
            job.project_feedback = Some(outcome.project_feedback.clone());
            job.overall_summary = Some(outcome.overall_summary.clone());
            job.failure_reason = None;
            self.transitions.lock().unwrap().push("completed");
            Ok(())
        }

        async fn fail(&self, id: Uuid, summary: &str) -> Result<(), RepoError> {
            self.check_available()?;
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs.get_mut(&id).ok_or(RepoError::NotFound(id))?;
            if job.job_status() != JobStatus::Processing {
                return Ok(());
            }
            job.status = JobStatus::Failed.as_str().to_string();
            job.failure_reason = Some(summary.to_string());
            self.transitions.lock().unwrap().push("failed");
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentStore for InMemoryStore {
        async fn content(&self, id: Uuid) -> Result<String, RepoError> {
            self.check_available()?;
            self.documents
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or(RepoError::NotFound(id))
        }
    }

    enum Script {
        Text(&'static str),
        Unavailable,
        Rejected,
    }

    /// Pops one scripted result per generate call; panics when over-called so
    /// a test can assert "this client was never used".
    struct ScriptedClient {
        name: &'static str,
        script: Mutex<VecDeque<Script>>,
        calls: AtomicU32,
    }

    impl ScriptedClient {
        fn new(name: &'static str, script: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn good(name: &'static str) -> Arc<Self> {
            Self::new(
                name,
                vec![
                    Script::Text(GOOD_CV),
                    Script::Text(GOOD_PROJECT),
                    Script::Text(GOOD_SUMMARY),
                ],
            )
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn provider(&self) -> &'static str {
            self.name
        }

        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Script::Text(text)) => Ok(text.to_string()),
                Some(Script::Unavailable) => Err(ProviderError::Unavailable {
                    provider: self.name,
                    attempts: 3,
                    last_error: "connection refused".to_string(),
                }),
                Some(Script::Rejected) => Err(ProviderError::Rejected {
                    provider: self.name,
                    status: 400,
                    message: "invalid request".to_string(),
                }),
                None => panic!("unexpected generate call on provider {}", self.name),
            }
        }
    }

    struct StubRetriever {
        passages: Vec<&'static str>,
        unavailable: bool,
    }

    #[async_trait]
    impl Retriever for StubRetriever {
        async fn retrieve(&self, query: &str, _topic: &str) -> Result<Vec<Passage>, RetrievalError> {
            if self.unavailable {
                return Err(RetrievalError::Unavailable("index down".to_string()));
            }
            Ok(self
                .passages
                .iter()
                .map(|text| Passage {
                    text: text.to_string(),
                    query: query.to_string(),
                })
                .collect())
        }
    }

    fn orchestrator(
        store: &Arc<InMemoryStore>,
        primary: Option<Arc<ScriptedClient>>,
        fallback: Arc<ScriptedClient>,
        retriever: StubRetriever,
    ) -> (Orchestrator, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let orchestrator = Orchestrator::new(
            Arc::clone(store) as Arc<dyn EvaluationRepo>,
            Arc::clone(store) as Arc<dyn DocumentStore>,
            Arc::new(retriever),
            primary.map(|c| c as Arc<dyn CompletionClient>),
            fallback as Arc<dyn CompletionClient>,
            Arc::clone(&metrics),
        );
        (orchestrator, metrics)
    }

    fn rubric_retriever() -> StubRetriever {
        StubRetriever {
            passages: vec!["Backend role, Python and distributed systems required."],
            unavailable: false,
        }
    }

    // ── scenarios ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_nominal_run_completes_with_results_in_range() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::good("groq");
        let fallback = ScriptedClient::new("gemini", vec![]);
        let (orchestrator, metrics) =
            orchestrator(&store, Some(primary.clone()), fallback, rubric_retriever());

        orchestrator.run(job_id).await.unwrap();

        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Completed);
        let rate = job.cv_match_rate.unwrap();
        assert!((0.0..=1.0).contains(&rate));
        let score = job.project_score.unwrap();
        assert!((1.0..=5.0).contains(&score));
        assert!(!job.cv_feedback.unwrap().is_empty());
        assert!(!job.project_feedback.unwrap().is_empty());
        assert!(!job.overall_summary.unwrap().is_empty());
        assert!(job.failure_reason.is_none());
        assert_eq!(store.transitions(), vec!["processing", "completed"]);
        assert_eq!(primary.calls(), 3);
        assert_eq!(metrics.get("llm.groq.failures"), 0);
        assert_eq!(metrics.get("llm.gemini.fallbacks"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_after_completion_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::good("groq");
        let fallback = ScriptedClient::new("gemini", vec![]);
        let (orchestrator, metrics) =
            orchestrator(&store, Some(primary), fallback, rubric_retriever());

        orchestrator.run(job_id).await.unwrap();
        let first_result = store.job(job_id);

        // Second delivery: the scripted clients are exhausted, so any model
        // call here would panic.
        orchestrator.run(job_id).await.unwrap();

        let second_result = store.job(job_id);
        assert_eq!(first_result.cv_match_rate, second_result.cv_match_rate);
        assert_eq!(first_result.overall_summary, second_result.overall_summary);
        assert_eq!(second_result.job_status(), JobStatus::Completed);
        assert_eq!(store.transitions(), vec!["processing", "completed"]);
        assert_eq!(metrics.get("llm.gemini.fallbacks"), 0);
    }

    #[tokio::test]
    async fn test_primary_outage_restarts_whole_sequence_on_fallback() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::new("groq", vec![Script::Unavailable]);
        let fallback = ScriptedClient::new(
            "gemini",
            vec![
                Script::Text("Match Rate: 0.7\nFeedback: fallback cv read."),
                Script::Text("Score: 3.5\nFeedback: fallback project read."),
                Script::Text("Fallback summary of the candidate."),
            ],
        );
        let (orchestrator, metrics) = orchestrator(
            &store,
            Some(primary.clone()),
            fallback.clone(),
            rubric_retriever(),
        );

        orchestrator.run(job_id).await.unwrap();

        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Completed);
        // All three outputs come from the fallback provider.
        assert!(job.cv_feedback.unwrap().contains("fallback cv read"));
        assert!(job.project_feedback.unwrap().contains("fallback project read"));
        assert!(job.overall_summary.unwrap().contains("Fallback summary"));
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 3);
        assert_eq!(metrics.get("llm.groq.failures"), 1);
        assert_eq!(metrics.get("llm.gemini.fallbacks"), 1);
    }

    #[tokio::test]
    async fn test_mid_sequence_failure_restarts_from_stage_one() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        // Primary survives the CV stage, dies on the project stage.
        let primary =
            ScriptedClient::new("groq", vec![Script::Text(GOOD_CV), Script::Unavailable]);
        let fallback = ScriptedClient::good("gemini");
        let (orchestrator, _) = orchestrator(
            &store,
            Some(primary.clone()),
            fallback.clone(),
            rubric_retriever(),
        );

        orchestrator.run(job_id).await.unwrap();

        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Completed);
        assert_eq!(primary.calls(), 2);
        // Fallback re-ran all three stages, not just the failed one.
        assert_eq!(fallback.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_rejection_moves_straight_to_fallback() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::new("groq", vec![Script::Rejected]);
        let fallback = ScriptedClient::good("gemini");
        let (orchestrator, metrics) =
            orchestrator(&store, Some(primary), fallback, rubric_retriever());

        orchestrator.run(job_id).await.unwrap();

        assert_eq!(store.job(job_id).job_status(), JobStatus::Completed);
        assert_eq!(metrics.get("llm.gemini.fallbacks"), 1);
    }

    #[tokio::test]
    async fn test_both_providers_failing_fails_the_job_naming_both() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::new("groq", vec![Script::Unavailable]);
        let fallback = ScriptedClient::new("gemini", vec![Script::Unavailable]);
        let (orchestrator, metrics) =
            orchestrator(&store, Some(primary), fallback, rubric_retriever());

        orchestrator.run(job_id).await.unwrap();

        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Failed);
        let reason = job.failure_reason.unwrap();
        assert!(reason.contains("groq"));
        assert!(reason.contains("gemini"));
        assert!(job.cv_match_rate.is_none());
        assert!(job.project_score.is_none());
        assert!(job.overall_summary.is_none());
        assert_eq!(metrics.get("llm.groq.failures"), 1);
        assert_eq!(metrics.get("llm.gemini.failures"), 1);
    }

    #[tokio::test]
    async fn test_fallback_only_mode_fails_terminally_without_restart() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let fallback = ScriptedClient::new("gemini", vec![Script::Unavailable]);
        let (orchestrator, metrics) =
            orchestrator(&store, None, fallback.clone(), rubric_retriever());

        orchestrator.run(job_id).await.unwrap();

        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("gemini"));
        assert_eq!(fallback.calls(), 1);
        assert_eq!(metrics.get("llm.gemini.fallbacks"), 0);
    }

    #[tokio::test]
    async fn test_unavailable_retrieval_degrades_but_still_completes() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::good("groq");
        let fallback = ScriptedClient::new("gemini", vec![]);
        let retriever = StubRetriever {
            passages: vec![],
            unavailable: true,
        };
        let (orchestrator, _) = orchestrator(&store, Some(primary), fallback, retriever);

        orchestrator.run(job_id).await.unwrap();

        assert_eq!(store.job(job_id).job_status(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_unscorable_response_fails_the_job_without_fallback() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::new(
            "groq",
            vec![Script::Text("I am unable to assess this CV.")],
        );
        // Empty script: a fallback call would panic the test.
        let fallback = ScriptedClient::new("gemini", vec![]);
        let (orchestrator, metrics) =
            orchestrator(&store, Some(primary), fallback, rubric_retriever());

        orchestrator.run(job_id).await.unwrap();

        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("no usable score"));
        assert!(job.cv_match_rate.is_none());
        assert_eq!(metrics.get("llm.gemini.fallbacks"), 0);
    }

    #[tokio::test]
    async fn test_missing_document_fails_without_redelivery() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        store.documents.lock().unwrap().clear();
        let primary = ScriptedClient::new("groq", vec![]);
        let fallback = ScriptedClient::new("gemini", vec![]);
        let (orchestrator, _) =
            orchestrator(&store, Some(primary), fallback, rubric_retriever());

        orchestrator.run(job_id).await.unwrap();

        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Failed);
        assert!(job.failure_reason.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_repository_outage_escalates_as_retryable_dispatch_error() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        store.unavailable.store(true, Ordering::SeqCst);
        let primary = ScriptedClient::new("groq", vec![]);
        let fallback = ScriptedClient::new("gemini", vec![]);
        let (orchestrator, _) =
            orchestrator(&store, Some(primary), fallback, rubric_retriever());

        let result = orchestrator.dispatch(job_id).await;
        assert!(matches!(result, Err(DispatchError::Retryable(_))));
    }

    #[tokio::test]
    async fn test_stale_failure_cannot_overwrite_a_completed_job() {
        let store = Arc::new(InMemoryStore::new());
        let job_id = store.seed_job();
        let primary = ScriptedClient::good("groq");
        let fallback = ScriptedClient::new("gemini", vec![]);
        let (orchestrator, _) =
            orchestrator(&store, Some(primary), fallback, rubric_retriever());

        orchestrator.run(job_id).await.unwrap();
        assert_eq!(store.job(job_id).job_status(), JobStatus::Completed);

        // A stale worker writing a failure after completion is discarded.
        store.fail(job_id, "stale failure").await.unwrap();
        let job = store.job(job_id);
        assert_eq!(job.job_status(), JobStatus::Completed);
        assert!(job.failure_reason.is_none());
    }
}
