// src/runtime/mod.rs
//! Runtime facade
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── AgentRuntime ────────────────────────────┐
//! │  spawn / signal / terminate     await / channel / quorum / shard     │
//! │           │                     lease / broadcast                    │
//! │           ▼                                                          │
//! │      Supervisor ── registry, failure policy, timer                   │
//! │           │                                                          │
//! │           ▼                                                          │
//! │  Work-stealing scheduler                                             │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                            │
//! │  │ worker 0 │  │ worker 1 │  │ worker N │ ◄── steal half from tail   │
//! │  │ next|deq │  │ next|deq │  │ next|deq │                            │
//! │  └──────────┘  └──────────┘  └──────────┘                            │
//! │           ▲             global injector                              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Performance
//!
//! Latency goals (spawn and signal in the sub-microsecond range) are
//! tracked by the criterion benches, not asserted in tests.

pub mod agent_runtime;

pub use agent_runtime::{AgentRuntime, RuntimeStats};
