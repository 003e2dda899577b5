//! # workpool
//!
//! Runs external worker agents against items from a shared work tracker,
//! with a bounded pool, per-invocation deadlines, crash-safe lock cleanup,
//! and a retry-next-run failure policy.
//!
//! The [`engine::Orchestrator`] pulls ready items from a [`tracker::Tracker`],
//! claims them, and hands each to an [`engine::WorkerRunner`], which drives a
//! [`worker::Worker`] and reports a [`model::WorkerOutcome`]. The
//! [`locks::LockRegistry`] is cleaned per invocation and again at the end of
//! every run.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod journal;
pub mod locks;
pub mod model;
pub mod telemetry;
pub mod tracker;
pub mod worker;
