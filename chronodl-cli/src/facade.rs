//! C15 — execution façade: ties config, registry, state, budget, pipeline,
//! and scheduler together into one CSV-driven run (§4.7).
//!
//! Grounded on the teacher's `app/runtime.rs` `run_downloader` flow (parse
//! → dispatch → resolve config → process input → dry-run early return →
//! queue → Ctrl-C flag → download → completion summary → exit outcome),
//! generalised from a queue-backed single-source download manager to the
//! CSV-row / two-phase-pipeline shape this system has. Sequential and
//! parallel execution (§4.7) are unified into one code path: both submit
//! through [`chronodl_core::Scheduler`], which already enforces a global
//! concurrency cap — setting that cap to 1 *is* sequential mode, so no
//! separate loop is needed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chronodl_core::config::OnExceed;
use chronodl_core::{
    build_default_registry, selector, BudgetAccountant, Config, DeferredItem, DeferredQueue, HttpRequester,
    Pipeline, ProviderCtx, ProviderRegistry, RetryCallback, SearchAndSelectOutcome, Scheduler, StateStore,
    WorkManager,
};
use tracing::{debug, info, warn};

use crate::csv_io::{CsvIndexSink, InputRow, RowStatus};

#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub submitted: usize,
    pub interrupted: bool,
    pub budget_stopped: bool,
}

/// One line of dry-run output: the row that was searched, plus what would
/// have been selected (or why nothing was).
pub struct DryRunPreview {
    pub entry_id: String,
    pub title: String,
    pub chosen: Option<String>,
}

pub struct Facade {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    requester: Arc<HttpRequester>,
    state: Arc<StateStore>,
    budget: Arc<BudgetAccountant>,
    pipeline: Arc<Pipeline>,
    scheduler: Arc<Scheduler>,
    output_dir: PathBuf,
}

impl Facade {
    pub fn build(output_dir: PathBuf) -> anyhow::Result<Self> {
        let config = Arc::new(Config::load());
        let registry = Arc::new(build_default_registry(&config));
        let requester = Arc::new(HttpRequester::new());

        std::fs::create_dir_all(&output_dir)?;
        let state_path = output_dir.join(&config.deferred.state_file);
        let legacy_quota_path = output_dir.join("quota_state.json");
        let legacy_queue_path = output_dir.join("deferred_queue.json");
        let state = Arc::new(StateStore::load(state_path, &legacy_quota_path, &legacy_queue_path)?);

        let budget = Arc::new(BudgetAccountant::new(
            config.download_limits.total,
            config.download_limits.per_work,
            config.download_limits.on_exceed,
        ));

        let work_manager = WorkManager::new(&output_dir, 0);
        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&requester),
            work_manager,
            Arc::clone(&budget),
            Arc::clone(&state),
        ));

        let scheduler = Arc::new(Scheduler::new(
            config.download.max_parallel_downloads,
            config.download.provider_concurrency.clone(),
            config.download.default_provider_concurrency,
        ));

        Ok(Facade {
            config,
            registry,
            requester,
            state,
            budget,
            pipeline,
            scheduler,
            output_dir,
        })
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Spawns the background retry sweep (§4.5, C12) unless disabled in
    /// config. A ready item is re-searched and re-submitted through the
    /// same scheduler a fresh row would use, rather than resurrecting its
    /// stale candidate list — the quota or network condition that deferred
    /// it may have changed, so a full re-search is the honest retry.
    pub fn spawn_retry_scheduler(&self, sink: Arc<CsvIndexSink>) -> Option<chronodl_core::RetrySchedulerHandle> {
        if !self.config.deferred.background_enabled {
            return None;
        }
        let pipeline = Arc::clone(&self.pipeline);
        let scheduler = Arc::clone(&self.scheduler);
        let state = Arc::clone(&self.state);
        let output_dir = self.output_dir.display().to_string();

        let callback: RetryCallback = Arc::new(move |item: DeferredItem| {
            let pipeline = Arc::clone(&pipeline);
            let sink = Arc::clone(&sink);
            let state = Arc::clone(&state);
            let output_dir = output_dir.clone();
            let provider_key = item.provider_key.clone();

            scheduler.submit(&provider_key, async move {
                let queue = DeferredQueue::new(&state);
                match pipeline
                    .search_and_select(&item.title, item.creator.as_deref(), item.entry_id.as_deref(), &output_dir)
                    .await
                {
                    Ok(SearchAndSelectOutcome::Task(task)) => {
                        let succeeded = pipeline.execute_download(task, sink.as_ref()).await;
                        if let Err(error) = &succeeded {
                            warn!(entry_id = ?item.entry_id, %error, "retry download failed");
                        }
                        let _ = queue.mark_completed(item.id);
                        succeeded.is_ok()
                    }
                    Ok(SearchAndSelectOutcome::NoTask) => {
                        let _ = queue.mark_completed(item.id);
                        true
                    }
                    Err(error) => {
                        warn!(entry_id = ?item.entry_id, %error, "retry search failed");
                        let _ = queue.mark_failed(item.id, Some(error.to_string()));
                        false
                    }
                }
            });
        });

        let interval = Duration::from_secs_f64((self.config.deferred.check_interval_minutes * 60.0).max(1.0));
        Some(chronodl_core::spawn_retry_scheduler(Arc::clone(&self.state), interval, callback))
    }

    /// Runs every processable row through the two-phase pipeline (§4.7).
    /// `completed → skip, failed/empty → process` per the `retrievable`
    /// column; resume policy is then applied per-row inside phase 1.
    pub async fn run(&self, rows: Vec<InputRow>, sink: Arc<CsvIndexSink>, interrupted: Arc<AtomicBool>) -> RunSummary {
        let mut summary = RunSummary::default();
        let base_dir = self.output_dir.to_string_lossy().into_owned();

        for row in rows {
            summary.total += 1;

            if interrupted.load(Ordering::SeqCst) {
                info!("interrupt requested, halting further row submission");
                summary.interrupted = true;
                break;
            }
            if self.budget.is_exhausted() && self.budget.on_exceed() == OnExceed::Stop {
                warn!("budget exhausted under on_exceed=stop, halting further row submission");
                summary.budget_stopped = true;
                break;
            }
            if row.status == RowStatus::Completed {
                debug!(entry_id = %row.entry_id, "already retrievable, skipping");
                summary.skipped += 1;
                continue;
            }

            let outcome = self
                .pipeline
                .search_and_select(&row.title, row.creator.as_deref(), Some(row.entry_id.as_str()), &base_dir)
                .await;

            match outcome {
                Ok(SearchAndSelectOutcome::Task(task)) => {
                    summary.submitted += 1;
                    let provider_key = task.ranked[task.chosen_index].result.provider_key.clone();
                    let pipeline = Arc::clone(&self.pipeline);
                    let sink = Arc::clone(&sink);
                    self.scheduler.submit(&provider_key, async move {
                        match pipeline.execute_download(task, sink.as_ref()).await {
                            Ok(()) => true,
                            Err(error) => {
                                warn!(%error, "execute_download failed");
                                false
                            }
                        }
                    });
                }
                Ok(SearchAndSelectOutcome::NoTask) => {
                    debug!(entry_id = %row.entry_id, "no task produced (resume-skip or no eligible candidate)");
                }
                Err(error) => {
                    warn!(entry_id = %row.entry_id, %error, "search_and_select failed");
                }
            }
        }

        self.scheduler.wait_all(None).await;
        summary
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

    /// `--dry-run`: searches and ranks every row's candidates without
    /// writing `work.json`, touching the budget, or downloading anything.
    /// Grounded on the teacher's `commands::run_dry_run_preview`'s
    /// search-then-print-without-side-effects shape.
    pub async fn run_dry_run(&self, rows: &[InputRow]) -> Vec<DryRunPreview> {
        let mut previews = Vec::with_capacity(rows.len());
        for row in rows {
            if row.status == RowStatus::Completed {
                continue;
            }
            let mut collected = Vec::new();
            for provider_key in self.config.ordered_enabled_providers() {
                let Some(provider) = self.registry.get(&provider_key) else {
                    continue;
                };
                let settings = self.config.provider_settings(&provider_key);
                let ctx = self.provider_ctx(&provider_key);
                match provider.search(&row.title, row.creator.as_deref(), settings.max_results, &ctx).await {
                    Ok(results) => collected.extend(results.into_iter().filter(chronodl_core::SearchResult::is_downloadable)),
                    Err(error) => warn!(provider = %provider_key, %error, "dry-run search failed"),
                }
            }

            let ranked = selector::rank_candidates(&row.title, row.creator.as_deref(), collected, &self.config);
            let chosen = match selector::collect_and_select(ranked) {
                selector::SelectionOutcome::Selected { chosen_index, all } => {
                    Some(format!("{} ({})", all[chosen_index].result.provider_display, all[chosen_index].result.provider_key))
                }
                selector::SelectionOutcome::NoMatch { .. } => None,
            };

            previews.push(DryRunPreview {
                entry_id: row.entry_id.clone(),
                title: row.title.clone(),
                chosen,
            });
        }
        previews
    }
}
