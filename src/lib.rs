pub mod action;
pub mod assemble;
pub mod buildgraph;
pub mod cache;
pub mod config;
pub mod context;
mod db;
pub mod densemap;
pub mod error;
pub mod fs;
pub mod graph;
pub mod manifest;
pub mod part;
pub mod process;
pub mod progress;
pub mod repo;
pub mod retry;
pub mod run;
pub mod sched;
pub mod task;
pub mod weight;
pub mod work;
