// taskflow-core
// Workflow engine, request pipeline, and dashboard fan-out core.
//
//! # taskflow-core
//!
//! This crate is the hard-engineering core of a multi-domain personal
//! productivity backend: a persisted, typed workflow engine; a resiliency
//! middleware pipeline (auth, rate limiting, caching, circuit breaking,
//! metrics); and a Redis-backed dashboard fan-out bus. The simple CRUD
//! domains (tasks, todos, habits, calendar, ...) and AI/LLM orchestration
//! are treated as external collaborators and are not implemented here.

pub mod config;
pub mod context;
pub mod dashboard;
pub mod error;
pub mod pipeline;
pub mod substrate;
pub mod workflow;

pub mod api;

pub use error::{CoreError, Result};
