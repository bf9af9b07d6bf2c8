//! Server-side services: trigger validation, stage runner, deploy
//! backend, notifications, and the background run loop.

pub mod deploy_backend;
pub mod notify_service;
pub mod run_loop;
pub mod stage_runner;
pub mod trigger_service;
