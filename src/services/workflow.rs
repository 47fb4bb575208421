//! Iteration Engine
//!
//! The writer → reviewer round state machine. Round 1 generates a draft from
//! the base context; rounds 2..N revise the previous draft against the
//! previous review; every round ends with a reviewer critique. Round records
//! are persisted as they complete, and the final draft is written to the
//! output directory.
//!
//! Cancellation is a flag checked before each round, after each LLM call and
//! before each store write; an in-flight response arriving after the signal
//! is discarded without a round record.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AnalysisSettings;
use crate::models::conversation::RoundRole;
use crate::models::job::{InputMode, JobInput, JobResultData};
use crate::services::analyzer::summarize_project;
use crate::services::llm::{CallMeta, LlmGateway};
use crate::services::prompts::{EngineRole, PromptEngine, PromptVars};
use crate::services::tasks::{JobRunner, ProgressFn};
use crate::services::templates::TemplateRegistry;
use crate::storage::ConversationStore;
use crate::utils::error::{AppError, AppResult};

/// Executes the multi-round generation pipeline for one job.
pub struct WorkflowEngine {
    gateway: Arc<LlmGateway>,
    prompts: Arc<PromptEngine>,
    store: ConversationStore,
    registry: Arc<TemplateRegistry>,
    analysis: AnalysisSettings,
    output_dir: PathBuf,
}

impl WorkflowEngine {
    pub fn new(
        gateway: Arc<LlmGateway>,
        prompts: Arc<PromptEngine>,
        store: ConversationStore,
        registry: Arc<TemplateRegistry>,
        analysis: AnalysisSettings,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            gateway,
            prompts,
            store,
            registry,
            analysis,
            output_dir,
        }
    }

    /// Run the full pipeline: context construction, N rounds, output file.
    pub async fn execute(
        &self,
        job_id: Uuid,
        input: JobInput,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> AppResult<JobResultData> {
        let total = input.iterations.max(1);
        let task_id = job_id.to_string();

        // The engine promises monotone progress regardless of how individual
        // phases interleave their reports.
        let progress = monotone(progress);

        progress(2, &format!("开始专利生成流程，共 {} 轮迭代", total));

        let context = self.build_context(&input, &progress).await?;
        self.check_cancelled(&task_id, &cancel).await?;

        let title = input
            .output_name
            .clone()
            .unwrap_or_else(|| "专利生成任务".to_string());
        self.store
            .create_task(
                task_id.clone(),
                title,
                input.mode.to_string(),
                total,
                input.output_name.clone(),
            )
            .await?;

        let outcome = self
            .run_rounds(&task_id, &input, &context, total, &progress, &cancel)
            .await;

        match outcome {
            Ok((draft, review)) => {
                progress(96, "正在生成最终文档并保存文件");
                let output_path = self.write_output(&input, total, &draft).await?;
                self.store
                    .update_task_status(task_id.clone(), "completed".to_string())
                    .await?;
                progress(100, &format!("专利生成完成，文件已保存到: {}", output_path));

                let template_used = input.template_id.as_ref().map(|id| {
                    self.registry
                        .get(id)
                        .map(|t| t.name)
                        .unwrap_or_else(|| id.clone())
                });

                Ok(JobResultData {
                    output_path,
                    docx_path: None,
                    iterations: total,
                    last_review: review,
                    template_used,
                    task_id,
                })
            }
            Err(e) => {
                let terminal = if e.is_cancelled() { "cancelled" } else { "failed" };
                if let Err(store_err) = self
                    .store
                    .update_task_status(task_id.clone(), terminal.to_string())
                    .await
                {
                    warn!(task_id = %task_id, error = %store_err, "更新任务状态失败");
                }
                Err(e)
            }
        }
    }

    /// The round loop. Returns the final draft and last review.
    async fn run_rounds(
        &self,
        task_id: &str,
        input: &JobInput,
        context: &str,
        total: u32,
        progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> AppResult<(String, Option<String>)> {
        let share = 100 / total;
        let mut draft: Option<String> = None;
        let mut review: Option<String> = None;

        for round in 1..=total {
            self.check_cancelled(task_id, cancel).await?;

            let base = share * (round - 1);
            progress(base as u8, &format!("第 {}/{} 轮：准备撰写阶段", round, total));

            // Writer phase in round 1, modifier from round 2 onward.
            let (role, store_role) = if round == 1 {
                (EngineRole::Writer, RoundRole::Writer)
            } else {
                (EngineRole::Modifier, RoundRole::Modifier)
            };

            let vars = PromptVars {
                context: context.to_string(),
                previous_draft: draft.clone(),
                previous_review: review.clone(),
                current_draft: None,
                iteration: round,
                total_iterations: total,
                template_id: input.template_id.clone(),
            };
            let writer_prompt = self.prompts.build(role, &vars)?;

            progress(
                (base + share / 4) as u8,
                &format!("第 {}/{} 轮：调用 LLM 撰写专利", round, total),
            );
            let new_draft = self
                .gateway
                .call(
                    &writer_prompt,
                    CallMeta {
                        role: role.as_str(),
                        round,
                    },
                )
                .await?;

            // A response arriving after cancellation is discarded unrecorded.
            self.check_cancelled(task_id, cancel).await?;
            self.store
                .log_round(
                    task_id.to_string(),
                    round,
                    store_role,
                    writer_prompt,
                    new_draft.clone(),
                )
                .await?;
            progress(
                (base + share * 45 / 100) as u8,
                &format!("第 {}/{} 轮：专利撰写完成", round, total),
            );
            draft = Some(new_draft);

            // Reviewer phase.
            let vars = PromptVars {
                context: context.to_string(),
                previous_draft: None,
                previous_review: None,
                current_draft: draft.clone(),
                iteration: round,
                total_iterations: total,
                template_id: input.template_id.clone(),
            };
            let reviewer_prompt = self.prompts.build(EngineRole::Reviewer, &vars)?;

            progress(
                (base + share * 60 / 100) as u8,
                &format!("第 {}/{} 轮：调用 LLM 进行评审", round, total),
            );
            let new_review = self
                .gateway
                .call(
                    &reviewer_prompt,
                    CallMeta {
                        role: "reviewer",
                        round,
                    },
                )
                .await?;

            self.check_cancelled(task_id, cancel).await?;
            self.store
                .log_round(
                    task_id.to_string(),
                    round,
                    RoundRole::Reviewer,
                    reviewer_prompt,
                    new_review.clone(),
                )
                .await?;
            review = Some(new_review);

            // Each round contributes ⌊100/N⌋; the remainder lands on the last
            // round so a full run reaches 100.
            let done = if round == total { 100 } else { share * round };
            progress(done as u8, &format!("第 {}/{} 轮：评审完成", round, total));
        }

        Ok((draft.unwrap_or_default(), review))
    }

    /// Build the base context once; it is carried verbatim into every round.
    async fn build_context(&self, input: &JobInput, progress: &ProgressFn) -> AppResult<String> {
        match input.mode {
            InputMode::Code => {
                let path = PathBuf::from(
                    input
                        .project_path
                        .clone()
                        .ok_or_else(|| AppError::validation("代码模式下必须提供项目路径"))?,
                );
                progress(4, "正在分析项目源代码");
                let settings = self.analysis.clone();
                tokio::task::spawn_blocking(move || summarize_project(&path, &settings))
                    .await
                    .map_err(|e| AppError::internal(format!("analysis task join error: {}", e)))?
            }
            InputMode::Idea => {
                let idea = input
                    .idea_text
                    .clone()
                    .ok_or_else(|| AppError::validation("创意模式下必须提供创意文本"))?;
                Ok([
                    "# Idea Based Context",
                    "",
                    "User provided idea / requirement:",
                    "",
                    idea.as_str(),
                    "",
                    "Goal: Extract key technical innovations and write a full \
                     Chinese invention patent based on this idea.",
                ]
                .join("\n"))
            }
        }
    }

    /// Write the final draft under the output directory and return its path.
    async fn write_output(&self, input: &JobInput, total: u32, draft: &str) -> AppResult<String> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let base = input.output_name.as_deref().unwrap_or("patent").trim();
        let base = if base.is_empty() { "patent" } else { base };
        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S-%3f");
        let path = self.output_dir.join(format!("{}-{}.md", base, timestamp));

        let header = format!(
            "<!--\n  Generated by multi-round patent generator\n  Iterations: {}\n  Generated at: {}\n-->\n\n",
            total,
            Utc::now().to_rfc3339()
        );
        tokio::fs::write(&path, format!("{}{}", header, draft)).await?;

        info!(path = %path.display(), "专利文档已保存");
        Ok(path.to_string_lossy().to_string())
    }

    async fn check_cancelled(&self, task_id: &str, cancel: &CancellationToken) -> AppResult<()> {
        if cancel.is_cancelled() {
            info!(task_id, "检测到取消信号，终止流程");
            return Err(AppError::Cancelled);
        }
        Ok(())
    }
}

/// Wrap a progress callback so reported values never decrease.
fn monotone(inner: ProgressFn) -> ProgressFn {
    use std::sync::atomic::{AtomicU8, Ordering};
    let last = Arc::new(AtomicU8::new(0));
    Arc::new(move |value, message| {
        let prev = last.fetch_max(value, Ordering::Relaxed);
        inner(value.max(prev), message);
    })
}

#[async_trait]
impl JobRunner for WorkflowEngine {
    async fn run(
        &self,
        job_id: Uuid,
        input: JobInput,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> AppResult<JobResultData> {
        self.execute(job_id, input, progress, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::llm::{LlmError, LlmProvider, LlmResult};
    use crate::services::prompts::{PromptStore, UserPromptStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: returns canned drafts/reviews, optionally failing
    /// or cancelling a token at a given call index.
    struct ScriptedProvider {
        calls: AtomicU32,
        fail_at: Option<(u32, LlmError)>,
        cancel_at: Option<(u32, CancellationToken)>,
        prompts_seen: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_at: None,
                cancel_at: None,
                prompts_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "mock"
        }
        fn model(&self) -> &str {
            "mock-model"
        }
        async fn complete(&self, prompt: &str) -> LlmResult<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts_seen.lock().unwrap().push(prompt.to_string());
            if let Some((at, err)) = &self.fail_at {
                if n >= *at {
                    return Err(err.clone());
                }
            }
            if let Some((at, token)) = &self.cancel_at {
                if n == *at {
                    token.cancel();
                }
            }
            // Even call indices are writer/modifier turns, odd are reviews.
            if n % 2 == 0 {
                Ok(format!("# 专利草案 v{}\n\n权利要求书……", n / 2 + 1))
            } else {
                Ok(format!("评审意见 v{}：权利要求保护范围偏窄。", n / 2 + 1))
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: WorkflowEngine,
        store: ConversationStore,
        output_dir: PathBuf,
    }

    fn fixture(provider: Arc<ScriptedProvider>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();

        let mut llm = config.llm.clone();
        llm.retry_attempts = 1;
        llm.retry_delay = std::time::Duration::from_millis(1);
        let gateway = Arc::new(LlmGateway::new(provider, &llm));

        let user_prompts = Arc::new(UserPromptStore::new(dir.path().join("user_prompts.json")));
        let prompt_store = Arc::new(PromptStore::new(dir.path().join("prompts")));
        let registry = Arc::new(TemplateRegistry::new(dir.path().join("templates")));
        let prompts = Arc::new(PromptEngine::new(
            user_prompts,
            prompt_store,
            registry.clone(),
            llm.max_input_length,
        ));

        let store = ConversationStore::in_memory().unwrap();
        let output_dir = dir.path().join("output");
        let engine = WorkflowEngine::new(
            gateway,
            prompts,
            store.clone(),
            registry,
            config.analysis,
            output_dir.clone(),
        );
        Fixture {
            _dir: dir,
            engine,
            store,
            output_dir,
        }
    }

    fn idea_input(iterations: u32) -> JobInput {
        JobInput {
            mode: InputMode::Idea,
            project_path: None,
            idea_text: Some("一种基于访问新近度并按键大小加权的缓存淘汰策略。".to_string()),
            iterations,
            output_name: Some("cache-patent".to_string()),
            template_id: None,
        }
    }

    fn noop_progress() -> ProgressFn {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn test_single_round_run() {
        let f = fixture(Arc::new(ScriptedProvider::new()));
        let id = Uuid::new_v4();

        let result = f
            .engine
            .execute(id, idea_input(1), noop_progress(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.iterations, 1);
        assert_eq!(result.task_id, id.to_string());
        assert!(result.last_review.as_ref().unwrap().contains("评审意见"));
        assert!(result.output_path.ends_with(".md"));

        // Exactly one writer and one reviewer record, no modifier.
        let view = f.store.round_view_sync(&id.to_string(), 1).unwrap();
        assert!(view.writer.is_some());
        assert!(view.reviewer.is_some());
        assert!(view.modifier.is_none());
        assert_eq!(f.store.rounds_for_sync(&id.to_string()).unwrap(), vec![1]);

        // The final draft landed on disk under the metadata header.
        let content = std::fs::read_to_string(&result.output_path).unwrap();
        assert!(content.starts_with("<!--"));
        assert!(content.contains("# 专利草案 v1"));
        assert!(std::path::Path::new(&f.output_dir).exists());

        // The conversation task row is terminal.
        let task = f.store.task_sync(&id.to_string()).unwrap().unwrap();
        assert_eq!(task.status, "completed");
        assert_eq!(task.iterations, 1);
    }

    #[tokio::test]
    async fn test_three_round_run_uses_modifier_from_round_two() {
        let provider = Arc::new(ScriptedProvider::new());
        let f = fixture(provider.clone());
        let id = Uuid::new_v4();

        let result = f
            .engine
            .execute(id, idea_input(3), noop_progress(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.iterations, 3);

        let task_id = id.to_string();
        assert_eq!(f.store.rounds_for_sync(&task_id).unwrap(), vec![1, 2, 3]);

        let round1 = f.store.round_view_sync(&task_id, 1).unwrap();
        assert!(round1.writer.is_some() && round1.modifier.is_none());
        let round2 = f.store.round_view_sync(&task_id, 2).unwrap();
        assert!(round2.modifier.is_some() && round2.writer.is_none());
        assert!(round2.reviewer.is_some());
        let round3 = f.store.round_view_sync(&task_id, 3).unwrap();
        assert!(round3.modifier.is_some() && round3.reviewer.is_some());

        // The modifier prompt carries the previous draft and review.
        let modifier_prompt = &round2.modifier.unwrap().prompt;
        assert!(modifier_prompt.contains("# 专利草案 v1"));
        assert!(modifier_prompt.contains("评审意见 v1"));

        // The final draft is the round-3 revision.
        let content = std::fs::read_to_string(&result.output_path).unwrap();
        assert!(content.contains("# 专利草案 v3"));
    }

    #[tokio::test]
    async fn test_ten_round_boundary() {
        let f = fixture(Arc::new(ScriptedProvider::new()));
        let id = Uuid::new_v4();

        f.engine
            .execute(id, idea_input(10), noop_progress(), CancellationToken::new())
            .await
            .unwrap();

        let task_id = id.to_string();
        let rounds = f.store.rounds_for_sync(&task_id).unwrap();
        assert_eq!(rounds, (1..=10).collect::<Vec<u32>>());

        let mut writers = 0;
        let mut modifiers = 0;
        let mut reviewers = 0;
        for round in rounds {
            let view = f.store.round_view_sync(&task_id, round).unwrap();
            writers += view.writer.is_some() as u32;
            modifiers += view.modifier.is_some() as u32;
            reviewers += view.reviewer.is_some() as u32;
        }
        assert_eq!(writers, 1);
        assert_eq!(modifiers, 9);
        assert_eq!(reviewers, 10);
    }

    #[tokio::test]
    async fn test_cancellation_between_rounds_keeps_completed_rounds() {
        let token = CancellationToken::new();
        let mut provider = ScriptedProvider::new();
        // The signal arrives during round 1's reviewer call; the engine must
        // notice at the next check and stop before round 2.
        provider.cancel_at = Some((1, token.clone()));
        let f = fixture(Arc::new(provider));
        let id = Uuid::new_v4();

        let err = f
            .engine
            .execute(id, idea_input(10), noop_progress(), token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());

        let task_id = id.to_string();
        // The reviewer response arrived after the signal: discarded.
        let view = f.store.round_view_sync(&task_id, 1).unwrap();
        assert!(view.writer.is_some());
        assert!(view.reviewer.is_none());
        assert_eq!(f.store.task_sync(&task_id).unwrap().unwrap().status, "cancelled");
    }

    #[tokio::test]
    async fn test_llm_failure_marks_run_failed() {
        let mut provider = ScriptedProvider::new();
        provider.fail_at = Some((
            1,
            LlmError::AuthenticationFailed {
                message: "invalid key".to_string(),
            },
        ));
        let f = fixture(Arc::new(provider));
        let id = Uuid::new_v4();

        let err = f
            .engine
            .execute(id, idea_input(2), noop_progress(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));

        let task_id = id.to_string();
        let view = f.store.round_view_sync(&task_id, 1).unwrap();
        assert!(view.writer.is_some(), "partial rounds stay persisted");
        assert!(view.reviewer.is_none());
        assert_eq!(f.store.task_sync(&task_id).unwrap().unwrap().status, "failed");
    }

    #[tokio::test]
    async fn test_progress_is_monotone_and_reaches_100() {
        let f = fixture(Arc::new(ScriptedProvider::new()));
        let id = Uuid::new_v4();

        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let progress: ProgressFn = {
            let seen = seen.clone();
            Arc::new(move |p, _| seen.lock().unwrap().push(p))
        };

        f.engine
            .execute(id, idea_input(3), progress, CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress must be monotone: {:?}", seen);
        assert_eq!(*seen.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_code_mode_builds_summary_context() {
        let provider = Arc::new(ScriptedProvider::new());
        let f = fixture(provider.clone());

        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("main.rs"), "fn main() {}\n").unwrap();

        let input = JobInput {
            mode: InputMode::Code,
            project_path: Some(project.path().to_string_lossy().to_string()),
            idea_text: None,
            iterations: 1,
            output_name: None,
            template_id: None,
        };

        f.engine
            .execute(Uuid::new_v4(), input, noop_progress(), CancellationToken::new())
            .await
            .unwrap();

        let prompts = provider.prompts_seen.lock().unwrap();
        assert!(
            prompts[0].contains("FILE: main.rs"),
            "writer prompt must embed the source summary"
        );
    }
}
