//! crowdctl-core: external control of a running crowd simulation.
//!
//! A controller process connects to the engine, subscribes to per-step
//! entity state and issues commands back, once per activation it asks for.
//!
//! LAYERS (each only calls the ones below it):
//!   manager              → session lifecycle and the step loop
//!   controller           → Controller trait, StepContext, built-in controllers
//!   subscription/command → what the controller reads and writes
//!   channel/protocol     → one request in flight over a Transport

pub mod channel;
pub mod command;
pub mod config;
pub mod controller;
pub mod corridor_controller;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod scenario;
pub mod scheduler;
pub mod subscription;
pub mod types;
