//! Ranking a corpus against a query image.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::encoder::{score, Encoder, ImageVector};
use crate::error::{CbirError, Result};
use crate::indexer::Indexer;
use crate::provider::FeatureProvider;
use crate::tree::{ImageId, RouteMode, VocabularyTree};

/// A ranked corpus image. Lower scores are more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub image_id: ImageId,
    pub score: f64,
}

/// Whether a query's visits stay out of the index or are merged like any corpus image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// The query is encoded from private visits; repeated queries are idempotent.
    #[default]
    Transient,
    /// The query's visits are merged into the index before scoring. Repeating the same query
    /// keeps incrementing its counts until [`VocabularyTree::reset_index`] is called.
    AddToCorpus,
}

/// Scores every corpus image against a query.
#[derive(Debug, Clone, Default)]
pub struct Retriever {
    encoder: Encoder,
    route_mode: RouteMode,
    limit: Option<usize>,
}

impl Retriever {
    pub fn new(encoder: Encoder, route_mode: RouteMode) -> Self {
        Self {
            encoder,
            route_mode,
            limit: None,
        }
    }

    /// Keep only the `n` best results.
    pub fn with_limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn encoder(&self) -> Encoder {
        self.encoder
    }

    /// Rank `corpus` against `query` without touching the index.
    pub fn retrieve<P: FeatureProvider>(
        &self,
        tree: &VocabularyTree,
        provider: &P,
        query: &P::ImageRef,
        corpus: &[P::ImageRef],
    ) -> Result<Vec<RetrievalResult>> {
        if corpus.is_empty() {
            return Err(CbirError::EmptyCorpus);
        }
        let delta = Indexer::new(self.route_mode).propagate(tree, provider, query)?;
        let query_vector = self.encoder.encode_visits(tree, &delta)?;
        self.rank(tree, &query_vector, &corpus_ids(provider, corpus))
    }

    /// Merge the query into the index like a corpus image, then rank `corpus` against it.
    pub fn retrieve_and_add<P: FeatureProvider>(
        &self,
        tree: &mut VocabularyTree,
        provider: &P,
        query: &P::ImageRef,
        corpus: &[P::ImageRef],
    ) -> Result<Vec<RetrievalResult>> {
        if corpus.is_empty() {
            return Err(CbirError::EmptyCorpus);
        }
        let delta = Indexer::new(self.route_mode).add_image(tree, provider, query)?;
        let query_vector = self.encoder.encode(tree, delta.image_id())?;
        self.rank(tree, &query_vector, &corpus_ids(provider, corpus))
    }

    /// Score each corpus image against an encoded query and sort ascending.
    ///
    /// The sort is stable, so equal scores keep corpus order. Images without visits are left out.
    pub fn rank(
        &self,
        tree: &VocabularyTree,
        query: &ImageVector,
        corpus: &[ImageId],
    ) -> Result<Vec<RetrievalResult>> {
        let scored: Vec<Option<RetrievalResult>> = corpus
            .par_iter()
            .map(|image_id| match self.encoder.encode(tree, image_id) {
                Ok(vector) => score(&vector, query).map(|score| {
                    Some(RetrievalResult {
                        image_id: image_id.clone(),
                        score,
                    })
                }),
                Err(CbirError::UnindexedImage { .. } | CbirError::UninformativeImage { .. }) => {
                    warn!(image_id = %image_id, "skipping image without usable visits");
                    Ok(None)
                }
                Err(e) => Err(e),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut results: Vec<RetrievalResult> = scored.into_iter().flatten().collect();
        results.sort_by(|a, b| a.score.total_cmp(&b.score));
        if let Some(n) = self.limit {
            results.truncate(n);
        }
        debug!(candidates = corpus.len(), returned = results.len(), "ranked corpus");
        Ok(results)
    }
}

fn corpus_ids<P: FeatureProvider>(provider: &P, corpus: &[P::ImageRef]) -> Vec<ImageId> {
    corpus.iter().map(|image| provider.image_id(image)).collect()
}

/// Rank `corpus` against `query` with default settings.
pub fn retrieve<P: FeatureProvider>(
    tree: &VocabularyTree,
    provider: &P,
    query: &P::ImageRef,
    corpus: &[P::ImageRef],
) -> Result<Vec<RetrievalResult>> {
    Retriever::default().retrieve(tree, provider, query, corpus)
}

/// Pairwise score between two indexed images.
pub fn score_images(tree: &VocabularyTree, encoder: Encoder, a: &str, b: &str) -> Result<f64> {
    score(&encoder.encode(tree, a)?, &encoder.encode(tree, b)?)
}
