//! # DiceSmith Engine
//!
//! Evaluation and optimization engine for weighted six-sided dice loadouts
//! under Farkle-style scoring: given a catalog of die types and an inventory
//! of how many of each a player owns, find the 6-die loadout (or loadouts)
//! that best serve a chosen objective.
//!
//! ## Architecture
//!
//! The engine is organized bottom-up, each layer consumed by the one above:
//!
//! - [`dice`] / [`scoring`]: the catalog of weighted die types and the
//!   precomputed scoring lattice over rolled face counts (C1).
//! - [`policy`]: exact bust/EV estimation for `k` dice drawn from an averaged
//!   face distribution (C2).
//! - [`metrics`]: folds a per-turn score distribution into expected-turns and
//!   reach-probability metrics via Markov propagation (C3).
//! - [`simulate`]: Monte Carlo turn campaigns for one loadout under a risk
//!   policy (C4).
//! - [`loadout`]: expands count vectors into loadouts and enumerates/samples
//!   the inventory's combinatorial space (C5).
//! - [`evaluate`]: the single entry point from a count vector to a result,
//!   plus an ordered, cancellable batch driver (C6).
//! - [`cache`]: a persistent, keyed result cache backed by SQLite (C7).
//! - [`key`]: deterministic cache keys over a catalog and run settings (C8).
//! - [`settings`]: run configuration, risk profiles, and the staged-pruning
//!   efficiency plan (C11).
//! - [`workflow`]: the staged pilot/full pruning orchestrator tying C5-C8 and
//!   C10-C11 together (C9).
//! - [`rank`]: objective scoring, sort keys, and the grouped hand-frequency
//!   breakdown (C10).
//! - [`seed`]: deterministic per-loadout RNG seeding.
//! - [`cancel`]: cooperative cancellation threaded through the workflow.
//! - [`perf`]: a pluggable, zero-cost-by-default observation capability.
//! - [`error`]: the crate's error type and `Result` alias.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::similar_names)]

pub mod cache;
pub mod cancel;
pub mod dice;
pub mod error;
pub mod evaluate;
pub mod key;
pub mod loadout;
pub mod metrics;
pub mod perf;
pub mod policy;
pub mod rank;
pub mod scoring;
pub mod seed;
pub mod settings;
pub mod simulate;
pub mod workflow;

pub use error::{EngineError, Result};
