//! Retrieval engine tying a feature provider, a vocabulary tree and its index together.

use std::time::Instant;

use ndarray::ArrayView2;
use tracing::info;

use crate::builder::TreeBuilder;
use crate::config::CbirConfig;
use crate::encoder::score;
use crate::error::{CbirError, Result};
use crate::indexer::{CancelToken, IndexReport, Indexer};
use crate::metrics::MetricsCollector;
use crate::provider::{collect_training_features, FeatureProvider};
use crate::retriever::{QueryMode, RetrievalResult, Retriever};
use crate::tree::VocabularyTree;

/// Content-based image retrieval over the corpus of a [`FeatureProvider`].
#[derive(Debug)]
pub struct Cbir<P: FeatureProvider> {
    provider: P,
    config: CbirConfig,
    tree: Option<VocabularyTree>,
    metrics: MetricsCollector,
    cancel: CancelToken,
}

impl<P: FeatureProvider> Cbir<P> {
    pub fn new(provider: P, config: CbirConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            config,
            tree: None,
            metrics: MetricsCollector::new(),
            cancel: CancelToken::new(),
        })
    }

    /// Build the tree from the whole corpus and index it in one go.
    pub fn initialise(provider: P, config: CbirConfig) -> Result<(Self, IndexReport<P::ImageRef>)> {
        let mut cbir = Self::new(provider, config)?;
        cbir.fit()?;
        let report = cbir.index()?;
        Ok((cbir, report))
    }

    /// Build the tree from the pooled descriptors of every corpus image.
    pub fn fit(&mut self) -> Result<&VocabularyTree> {
        let features = collect_training_features(&self.provider)?;
        self.fit_features(features.view())
    }

    /// Build the tree from an explicit training set. Any previous index is discarded.
    pub fn fit_features(&mut self, features: ArrayView2<f32>) -> Result<&VocabularyTree> {
        let mut builder = TreeBuilder::with_kmeans(self.config.tree, self.config.kmeans.clone());
        let tree: &VocabularyTree = self.tree.insert(builder.fit(features)?);
        Ok(tree)
    }

    /// Index every image the provider lists and recompute weights.
    ///
    /// A cancellation is consumed by the pass that observes it: the token is cleared once the
    /// pass returns, so the next call runs normally.
    pub fn index(&mut self) -> Result<IndexReport<P::ImageRef>> {
        let corpus = self.provider.all_images();
        let indexer = Indexer::new(self.config.route_mode).with_cancel_token(self.cancel.clone());
        let tree = self.tree.as_mut().ok_or(CbirError::TreeNotBuilt)?;
        let result = indexer.index(tree, &self.provider, &corpus);
        self.cancel.reset();
        let report = result?;
        self.metrics
            .record_index_pass(report.indexed.len(), report.failures.len());
        Ok(report)
    }

    /// Rank the corpus against `query`, returning at most `n` results when given.
    pub fn retrieve(&mut self, query: &P::ImageRef, n: Option<usize>) -> Result<Vec<RetrievalResult>> {
        let start = Instant::now();
        let corpus = self.provider.all_images();
        let mut retriever = Retriever::new(self.config.encoder(), self.config.route_mode);
        if let Some(n) = n {
            retriever = retriever.with_limit(n);
        }
        let tree = self.tree.as_mut().ok_or(CbirError::TreeNotBuilt)?;
        let results = match self.config.query_mode {
            QueryMode::Transient => retriever.retrieve(tree, &self.provider, query, &corpus)?,
            QueryMode::AddToCorpus => {
                retriever.retrieve_and_add(tree, &self.provider, query, &corpus)?
            }
        };
        let elapsed = start.elapsed();
        self.metrics.record_query(elapsed);
        info!(
            query = %self.provider.image_id(query),
            results = results.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "retrieved"
        );
        Ok(results)
    }

    /// Score two indexed images against each other.
    pub fn score(&self, first: &P::ImageRef, second: &P::ImageRef) -> Result<f64> {
        let tree = self.tree()?;
        let encoder = self.config.encoder();
        let a = encoder.encode(tree, &self.provider.image_id(first))?;
        let b = encoder.encode(tree, &self.provider.image_id(second))?;
        score(&a, &b)
    }

    pub fn tree(&self) -> Result<&VocabularyTree> {
        self.tree.as_ref().ok_or(CbirError::TreeNotBuilt)
    }

    /// Clear every visit, including those left by [`QueryMode::AddToCorpus`] queries.
    pub fn reset_index(&mut self) -> Result<()> {
        self.tree.as_mut().ok_or(CbirError::TreeNotBuilt)?.reset_index();
        Ok(())
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &CbirConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Token that stops an in-flight [`Cbir::index`] call from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
