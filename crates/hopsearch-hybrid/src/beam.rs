//! Multi-hop beam search over a triple index.
//!
//! Seeds are scored by cosine similarity to the query. Each round looks up
//! neighbours of every beam's last triple with a lexical search on its
//! entities, scores each continuation as `prior + cos(query, path)` and keeps
//! the best `num_beams` paths overall. A beam with no neighbour competes with
//! its own path re-scored and, if kept, keeps its previous score.

use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use hopsearch_core::config::TripleSettings;
use hopsearch_core::similarity::cosine_similarity;
use hopsearch_core::traits::Embedder;
use hopsearch_core::types::{QueryMode, Triple};
use hopsearch_core::{Error, Result};

use crate::offload;
use crate::retriever::HybridRetriever;

/// Separator between the statements of a path when it is embedded.
pub const STATEMENT_SEPARATOR: &str = "; ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeamConfig {
    pub num_beams: usize,
    pub num_candidates_per_beam: usize,
    /// Longest path in triples. `max_length - 1` expansion rounds run.
    pub max_length: usize,
    pub encoder_batch_size: usize,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            num_beams: 10,
            num_candidates_per_beam: 100,
            max_length: 2,
            encoder_batch_size: 256,
        }
    }
}

impl BeamConfig {
    pub fn from_settings(settings: &TripleSettings) -> Self {
        Self {
            num_beams: settings.num_beams,
            num_candidates_per_beam: settings.num_candidates_per_beam,
            max_length: settings.max_length,
            encoder_batch_size: settings.encoder_batch_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_length < 1 {
            return Err(Error::InvalidConfig(format!("expected max_length >= 1, got {}", self.max_length)));
        }
        if self.num_beams == 0 {
            return Err(Error::InvalidConfig("num_beams must be positive".into()));
        }
        Ok(())
    }
}

/// A scored path of triples. No two triples of a path share a surface text.
#[derive(Debug, Clone, PartialEq)]
pub struct TripleBeam {
    triples: Vec<Triple>,
    score: f32,
    seen: HashSet<String>,
}

impl TripleBeam {
    fn new(triple: Triple, score: f32) -> Self {
        let seen = HashSet::from([triple.surface_text()]);
        Self {
            triples: vec![triple],
            score,
            seen,
        }
    }

    /// This path followed by `triple`, or `None` if the triple is already on it.
    fn extended(&self, triple: Triple, score: f32) -> Option<Self> {
        if self.contains(&triple) {
            return None;
        }
        let mut next = self.clone();
        next.seen.insert(triple.surface_text());
        next.triples.push(triple);
        next.score = score;
        Some(next)
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.seen.contains(&triple.surface_text())
    }

    pub fn last(&self) -> &Triple {
        // A beam is created with one triple and only grows.
        &self.triples[self.triples.len() - 1]
    }

    /// Statements of the path joined by [`STATEMENT_SEPARATOR`].
    pub fn text(&self) -> String {
        self.triples
            .iter()
            .map(Triple::statement)
            .collect::<Vec<_>>()
            .join(STATEMENT_SEPARATOR)
    }

    fn text_with(&self, next: &Triple) -> String {
        format!("{}{}{}", self.text(), STATEMENT_SEPARATOR, next.statement())
    }
}

pub struct TripleBeamSearch {
    retriever: Arc<HybridRetriever>,
    embedder: Arc<dyn Embedder>,
    config: BeamConfig,
}

impl TripleBeamSearch {
    /// `retriever` serves the triple index and must carry an embedder.
    pub fn new(retriever: Arc<HybridRetriever>, config: BeamConfig) -> Result<Self> {
        config.validate()?;
        let embedder = retriever.embedder().cloned().ok_or(Error::EmbeddingRequired)?;
        Ok(Self {
            retriever,
            embedder,
            config,
        })
    }

    pub fn config(&self) -> &BeamConfig {
        &self.config
    }

    /// Best paths for `query` starting from `seeds`, highest score first.
    pub async fn search(&self, query: &str, seeds: Vec<Triple>) -> Result<Vec<TripleBeam>> {
        if seeds.is_empty() {
            warn!(query, "beam search got no seed triples");
            return Ok(vec![]);
        }

        let mut texts: Vec<String> = seeds.iter().map(Triple::statement).collect();
        texts.push(query.to_string());
        let mut vectors = offload::embed_many(&self.embedder, texts, self.config.encoder_batch_size).await?;
        let query_vec = vectors
            .pop()
            .ok_or_else(|| Error::Operation("embedder returned no query vector".into()))?;

        let mut scored: Vec<(Triple, f32)> = seeds
            .into_iter()
            .zip(&vectors)
            .map(|(t, v)| (t, cosine_similarity(&query_vec, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(self.config.num_beams);
        let mut beams: Vec<TripleBeam> = scored.into_iter().map(|(t, s)| TripleBeam::new(t, s)).collect();

        for round in 1..self.config.max_length {
            let candidates = try_join_all(beams.iter().map(|b| self.candidates(b))).await?;
            beams = self.expand(&query_vec, beams, candidates).await?;
            debug!(round, beams = beams.len(), "expansion round done");
        }

        beams.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(beams)
    }

    /// Neighbours of the beam's last triple: triples sharing one of its
    /// entities that are not on the beam yet.
    async fn candidates(&self, beam: &TripleBeam) -> Result<Vec<Triple>> {
        let last = beam.last();
        let query_text = last.entities().join(" ");
        let hits = self
            .retriever
            .retrieve(&query_text, self.config.num_candidates_per_beam, QueryMode::Lexical)
            .await?;

        let mut texts = HashSet::new();
        let mut out = Vec::new();
        for entry in hits.iter() {
            let triple = match Triple::from_chunk(&entry.item) {
                Ok(t) => t,
                Err(e) => {
                    warn!(id = %entry.item.id, error = %e, "skipping malformed triple document");
                    continue;
                }
            };
            if beam.contains(&triple) || !triple.shares_entity_with(last) {
                continue;
            }
            if texts.insert(triple.surface_text()) {
                out.push(triple);
            }
        }
        if out.is_empty() {
            warn!(beam = %beam.text(), "no candidates for beam");
        }
        Ok(out)
    }

    async fn expand(&self, query_vec: &[f32], beams: Vec<TripleBeam>, candidates: Vec<Vec<Triple>>) -> Result<Vec<TripleBeam>> {
        // Continuations grouped by beam, in beam order. `None` carries the
        // beam forward unchanged.
        let mut paths: Vec<(usize, Option<Triple>)> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        for (i, (beam, cands)) in beams.iter().zip(candidates).enumerate() {
            if cands.is_empty() {
                texts.push(beam.text());
                paths.push((i, None));
                continue;
            }
            for triple in cands {
                texts.push(beam.text_with(&triple));
                paths.push((i, Some(triple)));
            }
        }
        if texts.is_empty() {
            return Ok(beams);
        }

        let vectors = offload::embed_many(&self.embedder, texts, self.config.encoder_batch_size).await?;
        let scores: Vec<f32> = paths
            .iter()
            .zip(&vectors)
            .map(|((i, _), v)| beams[*i].score + cosine_similarity(query_vec, v))
            .collect();

        let mut order: Vec<usize> = (0..paths.len()).collect();
        order.sort_by(|&a, &b| paths[a].0.cmp(&paths[b].0).then(scores[b].total_cmp(&scores[a])));
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(self.config.num_beams);

        let mut slots: Vec<Option<(usize, Option<Triple>)>> = paths.into_iter().map(Some).collect();
        let mut next = Vec::with_capacity(order.len());
        for idx in order {
            let Some((i, triple)) = slots[idx].take() else {
                continue;
            };
            match triple {
                None => next.push(beams[i].clone()),
                Some(t) => {
                    if let Some(b) = beams[i].extended(t, scores[idx]) {
                        next.push(b);
                    }
                }
            }
        }
        Ok(next)
    }
}
