//! # Multiclient Core
//!
//! Dispatch and liveness engine for a pool of blockchain lite-client connections.
//!
//! Callers submit one logical JSON request together with a dispatch mode. The engine
//! decides which underlying connections receive it, executes the calls concurrently with
//! per-call deadlines, and reconciles the outcomes into a single payload or a per-engine
//! result set.
//!
//! - **[`engine`]**: engine handles, the health monitor, the engine pool, the dispatcher and
//!   the result aggregator.
//! - **[`config`]**: layered configuration (defaults, TOML file, environment overrides).
//! - **[`metrics`]**: Prometheus metrics for dispatches, call attempts and engine health.
//! - **[`types`]**: request/response types shared by every layer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         MultiClient                          │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐  │
//! │  │  Dispatcher  │──►│  EnginePool  │◄──│  HealthMonitor   │  │
//! │  └──────┬───────┘   └──────┬───────┘   └────────┬─────────┘  │
//! │         │                  │ snapshot           │ probes     │
//! │         ▼                  ▼                    ▼            │
//! │  ┌──────────────┐   ┌──────────────────────────────────────┐ │
//! │  │  Aggregator  │   │  EngineHandle ── EngineTransport     │ │
//! │  └──────────────┘   └──────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! ```text
//! submit(payload, mode)
//!       │
//!       ▼
//! routing snapshot ── empty ──► PoolEmpty
//!       │
//!   ┌───┴──────────────┬─────────────────────┐
//!   ▼                  ▼                     ▼
//! Single           RoundRobin            Broadcast
//! (rank order,     (cursor over          (one task per engine,
//!  retry next)      healthy subset)       firstSuccess | allResults)
//!   │                  │                     │
//!   └──────────┬───────┴─────────────────────┘
//!              ▼
//!         Aggregator ──► Response | DispatchError
//! ```

pub mod config;
pub mod engine;
pub mod metrics;
pub mod types;
