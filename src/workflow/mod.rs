//! Workflow orchestrator (C9): staged pilot/full pruning over a batch of
//! loadouts, backed by the cache store (C7) and fed into ranking (C10).
//!
//! When `settings.efficiency_enabled` and more than one loadout is supplied,
//! the run walks `settings.stages` in order: each stage evaluates every
//! surviving candidate at that stage's pilot fidelity, then
//! [`filter_survivors`] prunes down before the next stage. A single stage
//! (or the plan's last row) always runs at the settings' own fidelity, so
//! the final reported results are never pilot-quality.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::cache::{CacheEntry, CacheKind, CacheStore};
use crate::cancel::CancellationToken;
use crate::dice::Catalog;
use crate::error::{EngineError, Result};
use crate::evaluate;
use crate::key;
use crate::loadout::CountVector;
use crate::rank::rank_key;
use crate::settings::{EfficiencyPlanValidator, Objective, OptimizationSettings};
use crate::simulate::SimulationResult;

/// One stage's kind, mirrored onto the cache entries it produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StageKind {
    Pilot,
    Full,
}

impl From<StageKind> for CacheKind {
    fn from(kind: StageKind) -> Self {
        match kind {
            StageKind::Pilot => CacheKind::Pilot,
            StageKind::Full => CacheKind::Full,
        }
    }
}

/// A progress snapshot, reported at most once every `progress_interval_ms`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressEvent {
    /// Zero-based index of the stage currently running.
    pub stage_index: usize,
    /// Total number of stages in this run (1 when efficiency is disabled).
    pub stage_count: usize,
    /// Whether this stage is evaluating at pilot or full fidelity.
    pub kind: &'static str,
    /// Loadouts evaluated so far this stage.
    pub processed: u64,
    /// Total loadouts scheduled this stage.
    pub total: u64,
    /// Cache hits observed so far this stage.
    pub cache_hits: u64,
    /// Cache misses (freshly evaluated) so far this stage.
    pub cache_misses: u64,
    /// Milliseconds elapsed since this stage began.
    pub elapsed_ms: u64,
}

/// Receives periodic [`ProgressEvent`]s during a workflow run.
pub trait ProgressSink: Send + Sync {
    /// Called from the orchestrating thread; must not block meaningfully.
    fn report(&self, event: ProgressEvent);
}

impl<F: Fn(ProgressEvent) + Send + Sync> ProgressSink for F {
    fn report(&self, event: ProgressEvent) {
        self(event);
    }
}

/// Per-stage telemetry, retained in [`OptimizationTelemetry`].
#[derive(Clone, Debug, PartialEq)]
pub struct StageTelemetry {
    /// Zero-based stage index.
    pub stage_index: usize,
    /// Whether this stage ran at pilot or full fidelity.
    pub kind: &'static str,
    /// Candidates entering this stage.
    pub candidate_count: usize,
    /// Candidates surviving into the next stage (or, for the last stage, the
    /// final result count).
    pub survivor_count: usize,
    /// Cache hits.
    pub cache_hits: u64,
    /// Cache misses (freshly evaluated and written back).
    pub cache_misses: u64,
    /// Wall-clock milliseconds spent in this stage.
    pub wall_ms: u64,
}

/// Aggregated telemetry for a full workflow run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OptimizationTelemetry {
    /// One entry per stage actually executed (skipped stages are absent).
    pub stages: Vec<StageTelemetry>,
}

impl OptimizationTelemetry {
    /// Sum of `cache_hits` across every executed stage.
    pub fn total_cache_hits(&self) -> u64 {
        self.stages.iter().map(|s| s.cache_hits).sum()
    }

    /// Sum of `cache_misses` across every executed stage.
    pub fn total_cache_misses(&self) -> u64 {
        self.stages.iter().map(|s| s.cache_misses).sum()
    }
}

/// The final output of a workflow run: every surviving loadout's result,
/// in the order they were first supplied, plus aggregated telemetry.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowOutput {
    /// Final-stage results, input order preserved.
    pub results: Vec<(CountVector, SimulationResult)>,
    /// Per-stage and aggregate telemetry for this run.
    pub telemetry: OptimizationTelemetry,
}

const MIN_PROGRESS_INTERVAL_MS: u64 = 10;
const MAX_PROGRESS_INTERVAL_MS: u64 = 5000;

/// Runs the full staged-pruning workflow over `loadouts`.
///
/// Cancellation is checked at entry, at every stage boundary, and before each
/// individual loadout evaluation; a canceled token raises [`EngineError::Canceled`]
/// without persisting any in-flight work for the stage that was interrupted.
#[allow(clippy::too_many_arguments)]
pub fn run(
    loadouts: &[CountVector],
    catalog: &Catalog,
    settings: &OptimizationSettings,
    cache: &CacheStore,
    worker_count: Option<usize>,
    progress: Option<&dyn ProgressSink>,
    progress_interval_ms: u64,
    cancellation: &CancellationToken,
) -> Result<WorkflowOutput> {
    if cancellation.is_canceled() {
        return Err(EngineError::Canceled);
    }

    if settings.efficiency_enabled {
        EfficiencyPlanValidator::validate(&settings.stages)?;
    }

    let progress_interval_ms = progress_interval_ms.clamp(MIN_PROGRESS_INTERVAL_MS, MAX_PROGRESS_INTERVAL_MS);
    let mut telemetry = OptimizationTelemetry::default();

    if !settings.efficiency_enabled || loadouts.len() <= 1 {
        let (results, stage_telemetry) = evaluate_stage(
            loadouts,
            catalog,
            settings,
            None,
            StageKind::Full,
            cache,
            worker_count,
            progress,
            progress_interval_ms,
            0,
            1,
            cancellation,
        )?;
        telemetry.stages.push(stage_telemetry);
        return Ok(WorkflowOutput { results, telemetry });
    }

    let mut candidates: Vec<CountVector> = loadouts.to_vec();
    let mut last_results: Vec<(CountVector, SimulationResult)> = Vec::new();
    let stage_count = settings.stages.len();
    let mut any_stage_ran = false;

    for (stage_index, stage) in settings.stages.iter().enumerate() {
        if (candidates.len() as u64) < stage.min_total {
            continue;
        }
        any_stage_ran = true;
        if cancellation.is_canceled() {
            return Err(EngineError::Canceled);
        }

        let is_final = stage_index == stage_count - 1;
        let kind = if is_final { StageKind::Full } else { StageKind::Pilot };
        let seed_base = if is_final {
            None
        } else {
            Some(settings.efficiency_seed.wrapping_add(stage_index as u64))
        };

        let mut stage_settings = settings.clone();
        stage_settings.num_turns = stage.pilot_turns;

        let (results, stage_telemetry) = evaluate_stage(
            &candidates,
            catalog,
            &stage_settings,
            seed_base,
            kind,
            cache,
            worker_count,
            progress,
            progress_interval_ms,
            stage_index,
            stage_count,
            cancellation,
        )?;

        let survivors = filter_survivors(&results, settings.objective, stage.keep_percent, stage.epsilon, stage.min_survivors);

        let mut final_telemetry = stage_telemetry;
        final_telemetry.survivor_count = survivors.len();
        telemetry.stages.push(final_telemetry);

        last_results = results;
        candidates = survivors;

        if candidates.len() <= 1 {
            break;
        }
    }

    if !any_stage_ran {
        let (results, stage_telemetry) = evaluate_stage(
            loadouts,
            catalog,
            settings,
            None,
            StageKind::Full,
            cache,
            worker_count,
            progress,
            progress_interval_ms,
            0,
            1,
            cancellation,
        )?;
        telemetry.stages.push(stage_telemetry);
        return Ok(WorkflowOutput { results, telemetry });
    }

    let survivor_set: std::collections::HashSet<&CountVector> = candidates.iter().collect();
    let final_results: Vec<(CountVector, SimulationResult)> = last_results
        .into_iter()
        .filter(|(counts, _)| survivor_set.contains(counts))
        .collect();

    Ok(WorkflowOutput {
        results: final_results,
        telemetry,
    })
}

/// Evaluates every loadout in `candidates` at `stage_settings`' fidelity,
/// loading hits from `cache` and dispatching misses across a worker pool.
#[allow(clippy::too_many_arguments)]
fn evaluate_stage(
    candidates: &[CountVector],
    catalog: &Catalog,
    stage_settings: &OptimizationSettings,
    seed_base: Option<u64>,
    kind: StageKind,
    cache: &CacheStore,
    worker_count: Option<usize>,
    progress: Option<&dyn ProgressSink>,
    progress_interval_ms: u64,
    stage_index: usize,
    stage_count: usize,
    cancellation: &CancellationToken,
) -> Result<(Vec<(CountVector, SimulationResult)>, StageTelemetry)> {
    let started = Instant::now();
    if cancellation.is_canceled() {
        return Err(EngineError::Canceled);
    }

    let signature = key::dice_signature(catalog);
    let ctx = key::context(
        &signature,
        stage_settings.target,
        stage_settings.risk_profile,
        stage_settings.num_turns,
        stage_settings.turn_cap,
        seed_base,
    );

    let keys: Vec<String> = candidates.iter().map(|c| key::key(&ctx, c)).collect();
    let cached = cache.load(&keys);

    let mut results: Vec<Option<SimulationResult>> = vec![None; candidates.len()];
    let mut misses: Vec<(usize, CountVector)> = Vec::new();

    for (idx, (counts, k)) in candidates.iter().zip(keys.iter()).enumerate() {
        match cached.get(k) {
            Some(payload) => match serde_json::from_slice::<SimulationResult>(payload) {
                Ok(result) => results[idx] = Some(result),
                Err(_) => misses.push((idx, counts.clone())),
            },
            None => misses.push((idx, counts.clone())),
        }
    }

    let cache_hits = (candidates.len() - misses.len()) as u64;
    let total = candidates.len() as u64;

    let hardware_parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let effective_workers = worker_count.unwrap_or(1).clamp(1, hardware_parallelism);

    let processed = AtomicU64::new(cache_hits);
    let last_report = AtomicU64::new(0);
    let report_progress = |processed_now: u64, force: bool| {
        let Some(sink) = progress else { return };
        let elapsed = started.elapsed().as_millis() as u64;
        let prev = last_report.load(Ordering::Relaxed);
        if !force && elapsed.saturating_sub(prev) < progress_interval_ms {
            return;
        }
        last_report.store(elapsed, Ordering::Relaxed);
        sink.report(ProgressEvent {
            stage_index,
            stage_count,
            kind: match kind {
                StageKind::Pilot => "pilot",
                StageKind::Full => "full",
            },
            processed: processed_now,
            total,
            cache_hits,
            cache_misses: misses.len() as u64,
            elapsed_ms: elapsed,
        });
    };
    report_progress(cache_hits, true);

    if !misses.is_empty() {
        let chunk_size = (misses.len() / (8 * effective_workers)).max(16);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(effective_workers)
            .build()
            .map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        let outcomes: Vec<Result<(usize, CountVector, SimulationResult)>> = pool.install(|| {
            misses
                .par_iter()
                .with_min_len(chunk_size)
                .map(|(idx, counts)| {
                    if cancellation.is_canceled() {
                        return Err(EngineError::Canceled);
                    }
                    let result = evaluate::evaluate_single(counts, catalog, stage_settings, seed_base)?;
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    report_progress(done, false);
                    Ok((*idx, counts.clone(), result))
                })
                .collect()
        });

        let mut fresh_entries: Vec<CacheEntry> = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let (idx, _counts, result) = outcome?;
            let k = &keys[idx];
            if let Ok(payload) = serde_json::to_vec(&result) {
                fresh_entries.push(CacheEntry::new(k.clone(), kind.into(), payload));
            }
            results[idx] = Some(result);
        }
        cache.save(&fresh_entries)?;
    }

    report_progress(total, true);

    let final_results: Vec<(CountVector, SimulationResult)> = candidates
        .iter()
        .cloned()
        .zip(results.into_iter().map(|r| r.expect("every candidate resolved to a result")))
        .collect();

    let stage_telemetry = StageTelemetry {
        stage_index,
        kind: match kind {
            StageKind::Pilot => "pilot",
            StageKind::Full => "full",
        },
        candidate_count: candidates.len(),
        survivor_count: final_results.len(),
        cache_hits,
        cache_misses: misses.len() as u64,
        wall_ms: started.elapsed().as_millis() as u64,
    };

    Ok((final_results, stage_telemetry))
}

/// Ranks `results` under `objective`, keeps
/// `clamp(min_survivors, ceil(len*keep_percent/100), len)` of them, then
/// widens the cutoff by `epsilon` on the primary rank dimension. Falls back
/// to the single best survivor if the computed set is somehow empty.
fn filter_survivors(
    results: &[(CountVector, SimulationResult)],
    objective: Objective,
    keep_percent: f64,
    epsilon: f64,
    min_survivors: u64,
) -> Vec<CountVector> {
    let len = results.len();
    if len == 0 {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..len).collect();
    indices.sort_by(|&a, &b| {
        rank_key(&results[a].1, objective)
            .partial_cmp(&rank_key(&results[b].1, objective))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let target_keep = ((len as f64 * keep_percent / 100.0).ceil() as u64).max(min_survivors);
    let keep = (target_keep as usize).clamp(1, len);
    let cutoff_key = rank_key(&results[indices[keep - 1]].1, objective);

    let mut survivors: Vec<usize> = Vec::new();
    for &idx in &indices {
        let k = rank_key(&results[idx].1, objective);
        let accept = k.0 <= cutoff_key.0 + epsilon;
        if accept {
            survivors.push(idx);
        }
    }

    if survivors.is_empty() {
        survivors.push(indices[0]);
    }

    survivors.into_iter().map(|idx| results[idx].0.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::DieType;
    use crate::settings::RiskProfile;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            DieType::new("Lucky", [0.0, 0.30, 0.10, 0.10, 0.10, 0.20, 0.20]).unwrap(),
            DieType::new("Steady", [0.0, 0.15, 0.15, 0.20, 0.20, 0.15, 0.15]).unwrap(),
        ])
        .unwrap()
    }

    fn temp_cache(name: &str) -> (CacheStore, std::path::PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!("dicesmith-workflow-test-{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        (CacheStore::open(&dir, false, 1000, 50).unwrap(), dir)
    }

    fn small_settings() -> OptimizationSettings {
        let mut settings = OptimizationSettings::new(500, 30, RiskProfile::Balanced, Objective::MaxScore);
        settings.efficiency_enabled = false;
        settings
    }

    #[test]
    fn single_stage_run_covers_every_loadout() {
        let catalog = catalog();
        let (cache, dir) = temp_cache("single");
        let settings = small_settings();
        let loadouts = vec![vec![6u32, 0], vec![3u32, 3]];
        let token = CancellationToken::new();
        let output = run(&loadouts, &catalog, &settings, &cache, Some(2), None, 50, &token).unwrap();
        assert_eq!(output.results.len(), 2);
        assert_eq!(output.telemetry.stages.len(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn p7_rerun_with_populated_cache_reports_full_hits() {
        let catalog = catalog();
        let (cache, dir) = temp_cache("rerun");
        let settings = small_settings();
        let loadouts = vec![vec![6u32, 0], vec![3u32, 3]];
        let token = CancellationToken::new();

        let first = run(&loadouts, &catalog, &settings, &cache, Some(2), None, 50, &token).unwrap();
        let second = run(&loadouts, &catalog, &settings, &cache, Some(2), None, 50, &token).unwrap();

        assert_eq!(second.telemetry.total_cache_hits(), 2);
        assert_eq!(second.telemetry.total_cache_misses(), 0);
        for ((counts_a, result_a), (counts_b, result_b)) in first.results.iter().zip(second.results.iter()) {
            assert_eq!(counts_a, counts_b);
            assert_eq!(result_a.mean_points, result_b.mean_points);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalid_plan_is_rejected_before_any_stage_runs() {
        let catalog = catalog();
        let (cache, dir) = temp_cache("invalid-plan");
        let mut settings = OptimizationSettings::new(500, 10, RiskProfile::Balanced, Objective::MaxScore);
        settings.efficiency_enabled = true;
        settings.stages = vec![crate::settings::EfficiencyStage {
            min_total: 0,
            pilot_turns: 5,
            keep_percent: 0.0,
            epsilon: 0.0,
            min_survivors: 1,
        }];
        let loadouts = vec![vec![6u32, 0], vec![3u32, 3]];
        let token = CancellationToken::new();
        let result = run(&loadouts, &catalog, &settings, &cache, Some(2), None, 50, &token);
        assert!(matches!(result, Err(EngineError::InvalidPlan { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn all_stages_skipped_falls_back_to_a_full_evaluation() {
        let catalog = catalog();
        let (cache, dir) = temp_cache("all-skipped");
        let mut settings = OptimizationSettings::new(500, 10, RiskProfile::Balanced, Objective::MaxScore);
        settings.efficiency_enabled = true;
        settings.stages = vec![crate::settings::EfficiencyStage {
            min_total: 1000,
            pilot_turns: 5,
            keep_percent: 50.0,
            epsilon: 0.0,
            min_survivors: 1,
        }];
        let loadouts = vec![vec![6u32, 0], vec![3u32, 3]];
        let token = CancellationToken::new();
        let output = run(&loadouts, &catalog, &settings, &cache, Some(2), None, 50, &token).unwrap();
        assert_eq!(output.results.len(), 2);
        assert_eq!(output.telemetry.stages.len(), 1);
        assert_eq!(output.telemetry.stages[0].kind, "full");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn p12_precanceled_token_stops_run_immediately() {
        let catalog = catalog();
        let (cache, dir) = temp_cache("canceled");
        let settings = small_settings();
        let loadouts = vec![vec![6u32, 0]];
        let token = CancellationToken::new();
        token.cancel();
        let result = run(&loadouts, &catalog, &settings, &cache, Some(1), None, 50, &token);
        assert!(matches!(result, Err(EngineError::Canceled)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn staged_run_prunes_down_to_a_single_survivor() {
        let catalog = catalog();
        let (cache, dir) = temp_cache("staged");
        let mut settings = OptimizationSettings::new(500, 10, RiskProfile::Balanced, Objective::MaxScore);
        settings.efficiency_enabled = true;
        settings.stages = vec![
            crate::settings::EfficiencyStage {
                min_total: 0,
                pilot_turns: 5,
                keep_percent: 50.0,
                epsilon: 0.0,
                min_survivors: 1,
            },
            crate::settings::EfficiencyStage {
                min_total: 0,
                pilot_turns: 10,
                keep_percent: 100.0,
                epsilon: 0.0,
                min_survivors: 1,
            },
        ];
        let loadouts = vec![vec![6u32, 0], vec![3u32, 3], vec![0u32, 6]];
        let token = CancellationToken::new();
        let output = run(&loadouts, &catalog, &settings, &cache, Some(2), None, 50, &token).unwrap();
        assert!(!output.results.is_empty());
        assert!(output.telemetry.stages.len() >= 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn progress_sink_receives_at_least_one_event() {
        let catalog = catalog();
        let (cache, dir) = temp_cache("progress");
        let settings = small_settings();
        let loadouts = vec![vec![6u32, 0], vec![3u32, 3]];
        let token = CancellationToken::new();
        let events = parking_lot::Mutex::new(Vec::new());
        let sink: &dyn ProgressSink = &|event: ProgressEvent| events.lock().push(event);
        let output = run(&loadouts, &catalog, &settings, &cache, Some(2), Some(sink), 10, &token).unwrap();
        assert!(!events.lock().is_empty());
        assert_eq!(output.results.len(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn filter_survivors_respects_min_survivors_floor() {
        let results: Vec<(CountVector, SimulationResult)> = (0..10)
            .map(|i| {
                let counts = vec![i as u32];
                let result = SimulationResult {
                    counts: counts.clone(),
                    metrics: crate::metrics::TurnMetrics {
                        ev_turns: i as f64,
                        p_within: std::collections::BTreeMap::new(),
                        ev_points: 0.0,
                        p50_turns: 1.0,
                        p90_turns: 1.0,
                        ev_points_se: 0.0,
                    },
                    mean_points: 0.0,
                    std: 0.0,
                    tag_counts: std::collections::HashMap::new(),
                    total_groups: 0,
                    scoring_turns: 0,
                };
                (counts, result)
            })
            .collect();
        let survivors = filter_survivors(&results, Objective::MaxScore, 10.0, 0.0, 5);
        assert_eq!(survivors.len(), 5);
        assert!(survivors.contains(&vec![0u32]));
    }
}
