#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Completion Core
//!
//! Orchestration engine that drives tenant tasks through a remote completion
//! provider (an Assistants-style API) without blocking the caller.
//!
//! ## Overview
//!
//! A task binds a configuration to a remote session and thread and holds an
//! ordered list of messages. Submitting a question persists it, enqueues a
//! dispatch job and returns. A worker then claims the job and, under the
//! task's keyed lock, posts the question, triggers a run, polls it to a
//! terminal status and stores the answer. Every local mutation commits in a
//! unit of work; remote side effects that cannot be committed are
//! compensated when an attempt aborts.
//!
//! ## Module Organization
//!
//! - [`locks`] - Keyed asynchronous mutual exclusion
//! - [`database`] - Unit of work and the in-memory/PostgreSQL stores
//! - [`provider`] - Completion provider trait and HTTP adapter
//! - [`state_machine`] - `Queued -> Processing -> {Active | Error} -> Archived`
//! - [`models`] - Tasks, messages and configurations
//! - [`messaging`] - Durable dispatch queue
//! - [`orchestration`] - Workflow, dispatcher and task service
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-wide error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use completion_core::config::CoreConfig;
//! use completion_core::database::InMemoryStore;
//! use completion_core::messaging::InMemoryDispatchQueue;
//! use completion_core::models::Actor;
//! use completion_core::orchestration::{CreateTaskRequest, OrchestrationSystem};
//! use completion_core::provider::CompletionProvider;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn example(provider: Arc<dyn CompletionProvider>) -> completion_core::CoreResult<()> {
//! let system = OrchestrationSystem::new(
//!     &CoreConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(InMemoryDispatchQueue::new()),
//!     provider,
//! );
//! system.start().await?;
//!
//! let task = system
//!     .service()
//!     .create_task(CreateTaskRequest {
//!         tenant_id: Uuid::new_v4(),
//!         configuration_id: Uuid::new_v4(),
//!         question: "What is the return policy?".to_string(),
//!         actor: Actor::new(Uuid::new_v4()),
//!     })
//!     .await?;
//! println!("task {} queued", task.public_id);
//!
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod locks;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod provider;
pub mod state_machine;

pub use config::{ConfigManager, CoreConfig};
pub use error::{CoreError, CoreResult};
pub use locks::KeyedLockManager;
pub use orchestration::{OrchestrationSystem, TaskService};
pub use state_machine::{ResourceEvent, ResourceStatus};
