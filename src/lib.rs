//! docflow-platform: asynchronous OCR ingestion and collaborative
//! document editing backbone. See each module for the component it
//! implements; the four `src/bin/*` binaries wire these into running
//! processes (HTTP+gateway server, OCR worker, change-capture listener,
//! lifecycle reaper).

pub mod bus;
pub mod capabilities;
pub mod cdc;
pub mod config;
pub mod db;
pub mod domain;
pub mod download;
pub mod error;
pub mod gateway;
pub mod http;
pub mod ids;
pub mod ingestion;
pub mod metrics;
pub mod permissions;
pub mod queue;
pub mod reaper;
pub mod store;
pub mod versioning;
pub mod worker;
