//! C14 — pipeline: the two-phase orchestrator (§4.4). Phase 1 runs on the
//! caller's task (searches are I/O-bound but cheap); phase 2 runs inside a
//! worker acquired from the scheduler (C13).
//!
//! Grounded on the teacher's `download/engine.rs` for the worker-acquires-
//! permit-then-downloads shape, generalised to a search phase that precedes
//! it and a fallback-candidate loop the teacher's single-source engine has
//! no counterpart for.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::budget::{BudgetAccountant, ContentClass};
use crate::config::{Config, DownloadStrategy, SelectionStrategy};
use crate::context::WorkContext;
use crate::deferred::DeferredQueue;
use crate::net::HttpRequester;
use crate::provider::{Downloaded, ProviderCtx, ProviderError, ProviderRegistry, SearchResult};
use crate::quota::{QuotaDecision, QuotaTracker};
use crate::selector::{collect_and_select, rank_candidates, sequential_first_hit, RankedCandidate, SelectionOutcome};
use crate::state::StateStore;
use crate::work::{
    DownloadRecord, ResumeDecision, SelectedRecord, WorkError, WorkInput, WorkManager, WorkRecord, WorkStatus,
};

/// One line appended to `index.csv` after phase 2 finishes (§4.4 step 6,
/// §6 CSV columns). Core stays output-format-agnostic; the CLI crate
/// implements [`IndexSink`] over its own CSV writer.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub work_id: String,
    pub entry_id: Option<String>,
    pub work_dir: PathBuf,
    pub title: String,
    pub creator: Option<String>,
    pub status: WorkStatus,
    pub provider: Option<String>,
    pub provider_key: Option<String>,
    pub source_id: Option<String>,
    pub item_url: Option<String>,
    pub detail: Option<String>,
}

/// Process-wide single lock point for `index.csv` (§4.4 step 6, §5).
pub trait IndexSink: Send + Sync {
    fn record(&self, record: IndexRecord);
}

/// Everything phase 1 decided, carried into phase 2. Not persisted itself —
/// `work.json` is the durable record; this is the in-memory handoff.
pub struct DownloadTask {
    pub work_dir: PathBuf,
    pub work_id: String,
    pub input: WorkInput,
    pub ranked: Vec<RankedCandidate>,
    pub chosen_index: usize,
}

pub enum SearchAndSelectOutcome {
    Task(DownloadTask),
    NoTask,
}

pub struct Pipeline {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    requester: Arc<HttpRequester>,
    work_manager: WorkManager,
    budget: Arc<BudgetAccountant>,
    state: Arc<StateStore>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<ProviderRegistry>,
        requester: Arc<HttpRequester>,
        work_manager: WorkManager,
        budget: Arc<BudgetAccountant>,
        state: Arc<StateStore>,
    ) -> Self {
        Pipeline {
            config,
            registry,
            requester,
            work_manager,
            budget,
            state,
        }
    }

    fn provider_ctx(&self, provider_key: &str) -> ProviderCtx {
        let settings = self.config.provider_settings(provider_key);
        let api_key = self
            .registry
            .get(provider_key)
            .and_then(|p| p.required_env_var())
            .and_then(|var| std::env::var(var).ok());
        ProviderCtx {
            requester: Arc::clone(&self.requester),
            settings,
            api_key,
            allow_manifest_renderings: self.config.download.download_manifest_renderings,
            prefer_pdf_over_images: self.config.download.prefer_pdf_over_images,
        }
    }

    /// §4.4 phase 1.
    pub async fn search_and_select(
        &self,
        title: &str,
        creator: Option<&str>,
        entry_id: Option<&str>,
        base_dir: &str,
    ) -> Result<SearchAndSelectOutcome, WorkError> {
        let work_manager = WorkManager::new(base_dir, crate::work::DEFAULT_TITLE_SLUG_MAX_LEN);
        let work_dir = work_manager.work_dir(entry_id, title);

        if let ResumeDecision::Skip { reason } = work_manager.check_resume(&work_dir, self.config.download.resume_mode) {
            debug!(work_dir = %work_dir.display(), %reason, "skipping work per resume policy");
            return Ok(SearchAndSelectOutcome::NoTask);
        }

        let providers = self.config.ordered_enabled_providers();
        let mut collected: Vec<SearchResult> = Vec::new();
        let mut sequential_hit: Option<SelectionOutcome> = None;

        for provider_key in &providers {
            let Some(provider) = self.registry.get(provider_key) else {
                continue;
            };
            let settings = self.config.provider_settings(provider_key);
            let ctx = self.provider_ctx(provider_key);
            let results = match provider.search(title, creator, settings.max_results, &ctx).await {
                Ok(results) => results,
                Err(error) => {
                    warn!(provider = %provider_key, %error, "search failed");
                    Vec::new()
                }
            };
            let downloadable: Vec<SearchResult> = results.into_iter().filter(SearchResult::is_downloadable).collect();

            if self.config.selection.strategy == SelectionStrategy::SequentialFirstHit {
                let outcome = sequential_first_hit(title, creator, downloadable, &self.config);
                if let SelectionOutcome::Selected { .. } = outcome {
                    sequential_hit = Some(outcome);
                    break;
                }
            } else {
                collected.extend(downloadable);
            }
        }

        let outcome = match sequential_hit {
            Some(outcome) => outcome,
            None => {
                if self.config.selection.strategy == SelectionStrategy::SequentialFirstHit {
                    SelectionOutcome::NoMatch { all: Vec::new() }
                } else {
                    let ranked = rank_candidates(title, creator, collected, &self.config);
                    collect_and_select(ranked)
                }
            }
        };

        let input = WorkInput {
            title: title.to_string(),
            creator: creator.map(str::to_string),
            entry_id: entry_id.map(str::to_string),
        };
        let snapshot = config_snapshot(&self.config);

        match outcome {
            SelectionOutcome::Selected { chosen_index, all } => {
                let mut record = work_manager.create_pending(&work_dir, input.clone(), snapshot)?;
                record.set_candidates(all.iter().map(|c| c.result.clone()).collect());
                record.set_selected(SelectedRecord {
                    provider_key: all[chosen_index].result.provider_key.clone(),
                    source_id: all[chosen_index].result.source_id.clone(),
                    title: all[chosen_index].result.title.clone(),
                });
                record.write(&work_manager.work_json_path(&work_dir))?;

                let work_id = work_manager.work_id(title, creator);
                Ok(SearchAndSelectOutcome::Task(DownloadTask {
                    work_dir,
                    work_id,
                    input,
                    ranked: all,
                    chosen_index,
                }))
            }
            SelectionOutcome::NoMatch { all } => {
                let mut record = work_manager.create_pending(&work_dir, input, snapshot)?;
                record.set_candidates(all.iter().map(|c| c.result.clone()).collect());
                record.transition(WorkStatus::NoMatch, Utc::now())?;
                record.write(&work_manager.work_json_path(&work_dir))?;
                Ok(SearchAndSelectOutcome::NoTask)
            }
        }
    }

    /// §4.4 phase 2, run inside a scheduler worker.
    pub async fn execute_download(&self, task: DownloadTask, sink: &dyn IndexSink) -> Result<(), WorkError> {
        let work_json_path = self.work_manager.work_json_path(&task.work_dir);
        let mut record = WorkRecord::read(&work_json_path)?;

        let primary = &task.ranked[task.chosen_index];
        let work_ctx = WorkContext::new(task.work_id.clone(), task.input.entry_id.clone(), primary.result.provider_key.clone(), work_stem(&task.work_dir));

        match self.try_download(&primary.result, &task, &work_ctx).await {
            Ok(downloaded) => {
                self.apply_secondary_downloads(&task, &work_ctx).await;
                record.transition(WorkStatus::Completed, Utc::now())?;
                record.set_download(DownloadRecord {
                    provider: primary.result.provider_key.clone(),
                    source_id: primary.result.source_id.clone(),
                });
                record.write(&work_json_path)?;
                sink.record(IndexRecord {
                    work_id: task.work_id.clone(),
                    entry_id: task.input.entry_id.clone(),
                    work_dir: task.work_dir.clone(),
                    title: task.input.title.clone(),
                    creator: task.input.creator.clone(),
                    status: WorkStatus::Completed,
                    provider: Some(primary.result.provider_display.clone()),
                    provider_key: Some(primary.result.provider_key.clone()),
                    source_id: primary.result.source_id.clone(),
                    item_url: primary.result.item_url.clone(),
                    detail: None,
                });
                info!(work_id = %task.work_id, files = downloaded.files_written, "download completed");
                Ok(())
            }
            Err(ProviderError::QuotaDeferred { provider_key, reset_time }) => {
                let deferred = DeferredQueue::new(&self.state);
                if let Err(error) = deferred.add(
                    task.input.title.clone(),
                    task.input.creator.clone(),
                    task.input.entry_id.clone(),
                    provider_key.clone(),
                    primary.result.provider_display.clone(),
                    primary.result.source_id.clone(),
                    task.work_dir.display().to_string(),
                    task.work_dir
                        .parent()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    primary.result.item_url.clone(),
                    reset_time,
                    None,
                    serde_json::json!({}),
                    Utc::now(),
                ) {
                    warn!(work_id = %task.work_id, %error, "failed to enqueue deferred item, state not persisted");
                }

                record.transition(WorkStatus::Deferred, Utc::now())?;
                record.write(&work_json_path)?;
                sink.record(IndexRecord {
                    work_id: task.work_id.clone(),
                    entry_id: task.input.entry_id.clone(),
                    work_dir: task.work_dir.clone(),
                    title: task.input.title.clone(),
                    creator: task.input.creator.clone(),
                    status: WorkStatus::Deferred,
                    provider: Some(primary.result.provider_display.clone()),
                    provider_key: Some(provider_key),
                    source_id: primary.result.source_id.clone(),
                    item_url: primary.result.item_url.clone(),
                    detail: Some("quota exhausted".to_string()),
                });
                Ok(())
            }
            Err(primary_error) => {
                match self.try_fallbacks(&task, &work_ctx).await {
                    Some((candidate, downloaded)) => {
                        self.apply_secondary_downloads(&task, &work_ctx).await;
                        record.transition(WorkStatus::Partial, Utc::now())?;
                        record.set_download(DownloadRecord {
                            provider: candidate.provider_key.clone(),
                            source_id: candidate.source_id.clone(),
                        });
                        record.write(&work_json_path)?;
                        sink.record(IndexRecord {
                            work_id: task.work_id.clone(),
                            entry_id: task.input.entry_id.clone(),
                            work_dir: task.work_dir.clone(),
                            title: task.input.title.clone(),
                            creator: task.input.creator.clone(),
                            status: WorkStatus::Partial,
                            provider: Some(candidate.provider_display.clone()),
                            provider_key: Some(candidate.provider_key.clone()),
                            source_id: candidate.source_id.clone(),
                            item_url: candidate.item_url.clone(),
                            detail: Some(format!("primary failed: {primary_error}")),
                        });
                        info!(work_id = %task.work_id, files = downloaded.files_written, provider = %candidate.provider_key, "fallback download completed");
                        Ok(())
                    }
                    None => {
                        record.transition(WorkStatus::Failed, Utc::now())?;
                        record.write(&work_json_path)?;
                        sink.record(IndexRecord {
                            work_id: task.work_id.clone(),
                            entry_id: task.input.entry_id.clone(),
                            work_dir: task.work_dir.clone(),
                            title: task.input.title.clone(),
                            creator: task.input.creator.clone(),
                            status: WorkStatus::Failed,
                            provider: Some(primary.result.provider_display.clone()),
                            provider_key: Some(primary.result.provider_key.clone()),
                            source_id: primary.result.source_id.clone(),
                            item_url: primary.result.item_url.clone(),
                            detail: Some(primary_error.to_string()),
                        });
                        warn!(work_id = %task.work_id, error = %primary_error, "all candidates failed");
                        Ok(())
                    }
                }
            }
        }
    }

    async fn try_download(&self, candidate: &SearchResult, task: &DownloadTask, work_ctx: &WorkContext) -> Result<Downloaded, ProviderError> {
        let provider = self
            .registry
            .get(&candidate.provider_key)
            .ok_or_else(|| ProviderError::Misconfigured {
                provider_key: candidate.provider_key.clone(),
                detail: "provider not present in registry".to_string(),
            })?;

        let quota_settings = self.config.provider_settings(&candidate.provider_key).quota;
        let tracker = QuotaTracker::new(&self.state);
        if tracker.check(&candidate.provider_key, &quota_settings, Utc::now()) == QuotaDecision::Exhausted {
            return Err(ProviderError::quota_deferred(candidate.provider_key.clone(), tracker.reset_time(&candidate.provider_key)));
        }

        let ctx = self.provider_ctx(&candidate.provider_key);
        let downloaded = provider.download(candidate, &task.work_dir, work_ctx, &ctx).await?;

        if !self.budget.allows(&task.work_id, ContentClass::Pdfs, downloaded.bytes_pdfs)
            || !self.budget.allows(&task.work_id, ContentClass::Images, downloaded.bytes_images)
            || !self.budget.allows(&task.work_id, ContentClass::Metadata, downloaded.bytes_metadata)
        {
            warn!(work_id = %task.work_id, "download exceeded configured byte budget");
        }
        self.budget.record(&task.work_id, ContentClass::Pdfs, downloaded.bytes_pdfs);
        self.budget.record(&task.work_id, ContentClass::Images, downloaded.bytes_images);
        self.budget.record(&task.work_id, ContentClass::Metadata, downloaded.bytes_metadata);

        if settings_enabled(&quota_settings) {
            let _ = tracker.record_download(&candidate.provider_key, &quota_settings, Utc::now());
        }

        Ok(downloaded)
    }

    /// §4.4 step 4: iterate fallback candidates in rank order, skipping only
    /// the exact (provider_key, source_id) pair that already failed;
    /// `QuotaDeferred` on a fallback skips that candidate only.
    async fn try_fallbacks(&self, task: &DownloadTask, work_ctx: &WorkContext) -> Option<(SearchResult, Downloaded)> {
        let primary = &task.ranked[task.chosen_index].result;
        for (index, candidate) in task.ranked.iter().enumerate() {
            if index == task.chosen_index {
                continue;
            }
            if !candidate.eligible {
                continue;
            }
            if candidate.result.provider_key == primary.provider_key && candidate.result.source_id == primary.source_id {
                continue;
            }
            let fallback_ctx = work_ctx.with_provider(candidate.result.provider_key.clone());
            match self.try_download(&candidate.result, task, &fallback_ctx).await {
                Ok(downloaded) => return Some((candidate.result.clone(), downloaded)),
                Err(ProviderError::QuotaDeferred { .. }) => continue,
                Err(error) => {
                    debug!(provider = %candidate.result.provider_key, %error, "fallback candidate failed");
                    continue;
                }
            }
        }
        None
    }

    /// §4.4 step 5: `download_strategy=all` best-effort secondary downloads
    /// of every other above-threshold candidate into the same work dir.
    async fn apply_secondary_downloads(&self, task: &DownloadTask, work_ctx: &WorkContext) {
        if self.config.selection.download_strategy != DownloadStrategy::All {
            return;
        }
        for (index, candidate) in task.ranked.iter().enumerate() {
            if index == task.chosen_index || !candidate.eligible {
                continue;
            }
            let secondary_ctx = work_ctx.with_provider(candidate.result.provider_key.clone());
            if let Err(error) = self.try_download(&candidate.result, task, &secondary_ctx).await {
                debug!(provider = %candidate.result.provider_key, %error, "secondary download failed, not fatal");
            }
        }
    }
}

fn settings_enabled(settings: &crate::config::QuotaSettings) -> bool {
    settings.enabled && settings.daily_limit > 0
}

fn work_stem(work_dir: &std::path::Path) -> String {
    work_dir.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}

fn config_snapshot(config: &Config) -> Value {
    serde_json::json!({
        "strategy": config.selection.strategy,
        "min_title_score": config.selection.min_title_score,
        "creator_weight": config.selection.creator_weight,
        "download_strategy": config.selection.download_strategy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_snapshot_is_serialisable_object() {
        let config = Config::default();
        let snapshot = config_snapshot(&config);
        assert!(snapshot.is_object());
    }

    #[test]
    fn work_stem_uses_final_path_component() {
        let path = std::path::Path::new("/tmp/output/e_0001_the_art_of_cooking");
        assert_eq!(work_stem(path), "e_0001_the_art_of_cooking");
    }
}
