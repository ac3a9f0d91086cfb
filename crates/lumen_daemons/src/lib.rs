//! # Lumen Daemons
//!
//! The independently scheduled workers around the shared state store:
//!
//! - **MessageIntake / FileIntake**: queue consumers that classify or parse
//!   inbound items and push them into the store
//! - **FolderWatcher**: drop-zone producer for the file intake queue
//! - **TriggerWatcher**: keyword rules that mutate mood/scene from memory
//! - **PulseCoordinator**: periodic status broadcast plus idle maintenance
//!
//! Every worker is a tokio task behind a `WorkerHandle`, which is also the
//! `Daemon` the pulse polls for liveness.

pub mod file;
pub mod folder;
pub mod message;
pub mod pulse;
pub mod queue;
pub mod trigger;

pub use file::{ExtensionParser, FileIntake, MemoryInjector, StoreInjector};
pub use folder::FolderWatcher;
pub use message::{classify_intent, BackgroundContext, Detected, Intent, MessageIntake};
pub use pulse::{MaintenanceReport, PulseCoordinator};
pub use queue::{intake_queue, Dequeued, IntakeReceiver, IntakeSender};
pub use trigger::{load_rules, TriggerWatcher};
