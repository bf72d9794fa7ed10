use std::time::Duration;

use camino::Utf8Path;
use tracing::info;

use crate::batch::{BatchOptions, BatchReport, run_batch};
use crate::classify::Classifier;
use crate::domain::{RoundNumber, TagDomain};
use crate::error::MinerError;
use crate::finalize::{FinalizeReport, finalize};
use crate::llm::ChatClient;
use crate::rounds::{
    AdvanceReport, InitReport, MergeReport, RoundFile, RoundStatus, RunReport, advance, init,
    merge_round, run, status,
};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

pub struct TagApp<C: ChatClient> {
    store: Store,
    classifier: Classifier<C>,
    options: BatchOptions,
    max_rounds: RoundNumber,
}

impl<C: ChatClient> TagApp<C> {
    pub fn new(
        store: Store,
        classifier: Classifier<C>,
        options: BatchOptions,
        max_rounds: RoundNumber,
    ) -> Self {
        Self {
            store,
            classifier,
            options,
            max_rounds,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn init(
        &self,
        domain: TagDomain,
        master: Option<&Utf8Path>,
        force: bool,
    ) -> Result<InitReport, MinerError> {
        init(&self.store, domain, master, force)
    }

    pub fn classify(
        &self,
        domain: TagDomain,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, MinerError> {
        let round = RoundFile::for_domain(&self.store, domain).read()?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {domain} round {round}"),
            elapsed: None,
        });
        run_batch(&self.store, domain, round, &self.classifier, self.options, sink)
    }

    pub fn merge(&self, domain: TagDomain) -> Result<MergeReport, MinerError> {
        let round = RoundFile::for_domain(&self.store, domain).read()?;
        merge_round(&self.store, domain, round)
    }

    pub fn advance(&self, domain: TagDomain) -> Result<AdvanceReport, MinerError> {
        advance(&self.store, domain, self.max_rounds)
    }

    pub fn run(&self, domain: TagDomain, sink: &dyn ProgressSink) -> Result<RunReport, MinerError> {
        run(
            &self.store,
            domain,
            &self.classifier,
            self.options,
            self.max_rounds,
            sink,
        )
    }

    pub fn status(&self, domain: TagDomain) -> Result<RoundStatus, MinerError> {
        status(&self.store, domain)
    }

    pub fn finalize(
        &self,
        domain: TagDomain,
        master: Option<&Utf8Path>,
    ) -> Result<FinalizeReport, MinerError> {
        finalize(&self.store, domain, master)
    }
}
