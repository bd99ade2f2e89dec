//! FM tuner control service.
//!
//! A [`tuner::TunerController`] owns a [`backend::TunerBackend`], tracks the
//! tuner state and configuration, persists settings in SQLite and publishes
//! confirmed changes to an [`sink::EventSink`].

pub mod backend;
pub mod channel;
pub mod command;
pub mod config;
pub mod database;
pub mod logging;
pub mod sink;
pub mod status;
pub mod tuner;
