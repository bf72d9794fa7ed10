pub mod annotate;
pub mod app;
pub mod batch;
pub mod benchmark;
pub mod classify;
pub mod clickhouse;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod finalize;
pub mod fs_util;
pub mod http;
pub mod llm;
pub mod nxml;
pub mod ontology;
pub mod output;
pub mod prompts;
pub mod providers;
pub mod rounds;
pub mod scale_bar;
pub mod scoring;
pub mod sheet;
pub mod store;
