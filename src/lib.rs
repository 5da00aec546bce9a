//! # RAG Harness
//!
//! Local toolchain provisioning and document extraction for a retrieval
//! pipeline.
//!
//! RAG Harness downloads and installs the third-party binaries a RAG
//! setup needs (a local model runtime and a document converter) from
//! their release pages, generates a launcher script that runs the model
//! runtime against a private model store, pulls the configured models, and
//! turns heterogeneous documents into uniform content units ready for
//! chunking and embedding.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Release index│──▶│  Installer   │──▶│  Launcher +  │
//! │ (GitHub API) │   │ backup/extract│  │ model pulls  │
//! └──────────────┘   └──────────────┘   └──────────────┘
//!
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Files / dirs │──▶│ Router       │──▶│ Content units│
//! │   (scan)     │   │ classify+size│   │ (+ chunking) │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag setup --os linux            # install runtime + converter, pull models
//! rag models list                 # talk to the runtime through the launcher
//! rag extract ./docs --json       # extract every file under ./docs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error types for provisioning, extraction and the launcher |
//! | [`models`] | Core data types |
//! | [`platform`] | Host OS / architecture detection |
//! | [`release`] | Release index lookup and asset matching |
//! | [`archive`] | Safe archive extraction |
//! | [`install`] | Download + install with backup and rollback |
//! | [`progress`] | Download and extraction progress reporting |
//! | [`runtime`] | Model runtime environment |
//! | [`launcher`] | Launcher scripts and the model install protocol |
//! | [`provision`] | End-to-end provisioning |
//! | [`workers`] | Background tasks with a status queue |
//! | [`classify`] | File type detection |
//! | [`extract`] | Per-format extraction strategies |
//! | [`chunk`] | Text chunking |
//! | [`router`] | File-type to strategy dispatch |
//! | [`batch`] | Concurrent batch extraction |
//! | [`scan`] | Input path expansion |

pub mod archive;
pub mod batch;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod install;
pub mod launcher;
pub mod models;
pub mod platform;
pub mod progress;
pub mod provision;
pub mod release;
pub mod router;
pub mod runtime;
pub mod scan;
pub mod workers;
