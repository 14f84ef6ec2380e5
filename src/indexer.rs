//! Corpus indexing: parallel propagation of every image followed by idf weighting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{CbirError, Result};
use crate::inverted::VisitDelta;
use crate::provider::FeatureProvider;
use crate::tree::{ImageId, RouteMode, VocabularyTree};

/// Shared flag used to stop an in-flight [`Indexer::index`] pass.
///
/// Images not yet started when the flag is raised are skipped; images already being propagated
/// run to completion and are merged.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another pass.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// An image that could not be propagated, and why.
#[derive(Debug)]
pub struct PropagationFailure<R> {
    pub image: R,
    pub error: CbirError,
}

/// Outcome of an indexing pass.
#[derive(Debug)]
pub struct IndexReport<R> {
    /// Images whose visits were merged, in corpus order.
    pub indexed: Vec<ImageId>,
    /// Images that failed extraction or routing.
    pub failures: Vec<PropagationFailure<R>>,
    /// Images never started because the pass was cancelled.
    pub skipped: Vec<R>,
    pub cancelled: bool,
    /// Whether node weights were recomputed at the end of the pass.
    pub weights_updated: bool,
}

impl<R> IndexReport<R> {
    /// True when every image was indexed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    pub fn total(&self) -> usize {
        self.indexed.len() + self.failures.len() + self.skipped.len()
    }
}

enum Outcome {
    Done(VisitDelta),
    Failed(CbirError),
    Skipped,
}

/// Propagates images into a tree's inverted index.
#[derive(Debug, Clone, Default)]
pub struct Indexer {
    route_mode: RouteMode,
    cancel: CancelToken,
}

impl Indexer {
    pub fn new(route_mode: RouteMode) -> Self {
        Self {
            route_mode,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn route_mode(&self) -> RouteMode {
        self.route_mode
    }

    /// Route one image's descriptors and return its visits without touching the index.
    pub fn propagate<P: FeatureProvider>(
        &self,
        tree: &VocabularyTree,
        provider: &P,
        image: &P::ImageRef,
    ) -> Result<VisitDelta> {
        let features = provider.extract_features(image)?;
        let image_id = provider.image_id(image);
        if features.nrows() == 0 {
            warn!(image_id = %image_id, "image has no descriptors");
        }
        tree.propagate_features(image_id, features.view(), self.route_mode)
    }

    /// Propagate one image and merge its visits straight into the index. Weights are left as is.
    pub fn add_image<P: FeatureProvider>(
        &self,
        tree: &mut VocabularyTree,
        provider: &P,
        image: &P::ImageRef,
    ) -> Result<VisitDelta> {
        let delta = self.propagate(tree, provider, image)?;
        tree.apply_delta(&delta)?;
        Ok(delta)
    }

    /// Index a corpus and recompute node weights.
    ///
    /// Images are propagated in parallel into private deltas; all of them are collected before
    /// anything is merged, and weights are computed only after every merge. Per-image failures
    /// end up in the report instead of aborting the pass. Weights use `N = corpus.len()`, so
    /// failed, skipped and descriptor-less images still count as corpus members.
    pub fn index<P: FeatureProvider>(
        &self,
        tree: &mut VocabularyTree,
        provider: &P,
        corpus: &[P::ImageRef],
    ) -> Result<IndexReport<P::ImageRef>> {
        if corpus.is_empty() {
            return Err(CbirError::EmptyCorpus);
        }
        info!(images = corpus.len(), mode = ?self.route_mode, "generating index");

        let shared: &VocabularyTree = &*tree;
        let outcomes: Vec<Outcome> = corpus
            .par_iter()
            .map(|image| {
                if self.cancel.is_cancelled() {
                    return Outcome::Skipped;
                }
                match self.propagate(shared, provider, image) {
                    Ok(delta) => Outcome::Done(delta),
                    Err(error) => Outcome::Failed(error),
                }
            })
            .collect();

        let mut report = IndexReport {
            indexed: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            cancelled: self.cancel.is_cancelled(),
            weights_updated: false,
        };
        for (image, outcome) in corpus.iter().zip(outcomes) {
            match outcome {
                Outcome::Done(delta) => {
                    tree.apply_delta(&delta)?;
                    report.indexed.push(delta.image_id().to_string());
                }
                Outcome::Failed(error) => {
                    warn!(?image, error = %error, "failed to index image");
                    report.failures.push(PropagationFailure {
                        image: image.clone(),
                        error,
                    });
                }
                Outcome::Skipped => report.skipped.push(image.clone()),
            }
        }
        debug!(
            indexed = report.indexed.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "propagation finished"
        );

        let corpus_ids: Vec<ImageId> = corpus.iter().map(|image| provider.image_id(image)).collect();
        if corpus_ids.iter().any(|id| tree.root().visits().contains_key(id)) {
            info!(n_images = corpus_ids.len(), "calculating weights");
            tree.compute_corpus_weights(&corpus_ids)?;
            report.weights_updated = true;
        } else {
            warn!("no corpus image left any visit, weights unchanged");
        }
        info!(
            indexed = report.indexed.len(),
            cancelled = report.cancelled,
            "inverted index generated"
        );
        Ok(report)
    }
}

/// Index `corpus` into `tree` with path routing.
pub fn index_corpus<P: FeatureProvider>(
    tree: &mut VocabularyTree,
    provider: &P,
    corpus: &[P::ImageRef],
) -> Result<IndexReport<P::ImageRef>> {
    Indexer::default().index(tree, provider, corpus)
}
