mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hopsearch_core::similarity::cosine_similarity;
use hopsearch_core::traits::Embedder;
use hopsearch_core::types::{Embedding, Triple};
use hopsearch_core::{Error, Result};
use hopsearch_hybrid::{BeamConfig, HybridRetriever, RetrieverConfig, TripleBeam, TripleBeamSearch};

use common::{embedder, triple, triple_index, MemoryEngine};

fn facts() -> Vec<Triple> {
    vec![
        triple(&["Paris", "capital_of", "France"], "c:0"),
        triple(&["France", "member_of", "European Union"], "c:1"),
        triple(&["Paris", "located_on", "Seine"], "c:2"),
        triple(&["Seine", "flows_into", "English Channel"], "c:3"),
        triple(&["Berlin", "capital_of", "Germany"], "c:4"),
        triple(&["Germany", "member_of", "European Union"], "c:5"),
    ]
}

async fn search(triples: Vec<Triple>, config: BeamConfig) -> TripleBeamSearch {
    let engine = MemoryEngine::new();
    triple_index(engine.clone(), "triples", triples).await;
    let retriever = HybridRetriever::new(engine, RetrieverConfig::new("triples")).with_embedder(embedder());
    TripleBeamSearch::new(Arc::new(retriever), config).unwrap()
}

/// Embeds `QUERY` as the x axis and every scripted text at the cosine it is
/// given against it. Unknown texts are orthogonal to the query.
struct ScriptedEmbedder {
    cosines: HashMap<String, f32>,
}

const QUERY: &str = "scripted query";

impl ScriptedEmbedder {
    fn new(cosines: &[(String, f32)]) -> Arc<Self> {
        Arc::new(Self {
            cosines: cosines.iter().cloned().collect(),
        })
    }
}

impl Embedder for ScriptedEmbedder {
    fn model_id(&self) -> &str {
        "scripted"
    }

    fn embed_many(&self, texts: &[String], _batch_size: usize) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|t| {
                if t == QUERY {
                    return vec![1.0, 0.0];
                }
                let c = self.cosines.get(t).copied().unwrap_or(0.0);
                vec![c, (1.0 - c * c).sqrt()]
            })
            .collect())
    }

    fn known_dimension(&self) -> Option<usize> {
        Some(2)
    }
}

fn alpha() -> Triple {
    triple(&["alpha", "r", "beta"], "s:0")
}

fn gamma() -> Triple {
    triple(&["gamma", "r", "delta"], "s:1")
}

fn beta_one() -> Triple {
    triple(&["beta", "s", "one"], "s:2")
}

fn beta_two() -> Triple {
    triple(&["beta", "s", "two"], "s:3")
}

fn delta_three() -> Triple {
    triple(&["delta", "s", "three"], "s:4")
}

fn path(steps: &[Triple]) -> String {
    steps.iter().map(Triple::statement).collect::<Vec<_>>().join("; ")
}

/// A search over alpha, gamma and their neighbours whose scores come from
/// `cosines`.
async fn scripted(cosines: &[(String, f32)], config: BeamConfig) -> TripleBeamSearch {
    let engine = MemoryEngine::new();
    let triples = vec![alpha(), gamma(), beta_one(), beta_two(), delta_three()];
    triple_index(engine.clone(), "triples", triples).await;
    let retriever = HybridRetriever::new(engine, RetrieverConfig::new("triples")).with_embedder(ScriptedEmbedder::new(cosines));
    TripleBeamSearch::new(Arc::new(retriever), config).unwrap()
}

fn paths_of(beams: &[TripleBeam]) -> Vec<Vec<Triple>> {
    beams.iter().map(|b| b.triples().to_vec()).collect()
}

fn cosine(a: &str, b: &str) -> f32 {
    let e = embedder();
    cosine_similarity(&e.embed_one(a).unwrap(), &e.embed_one(b).unwrap())
}

#[tokio::test]
async fn single_seed_without_expansion() {
    let paris = triple(&["Paris", "capital_of", "France"], "c:0");
    let config = BeamConfig {
        num_beams: 1,
        max_length: 1,
        ..BeamConfig::default()
    };
    let beam_search = search(vec![paris.clone()], config).await;
    let query = "What is the capital of France?";
    let beams = beam_search.search(query, vec![paris.clone()]).await.unwrap();
    assert_eq!(beams.len(), 1);
    assert_eq!(beams[0].triples(), &[paris.clone()]);
    assert_eq!(paris.statement(), "('Paris', 'capital_of', 'France')");
    let expected = cosine(query, &paris.statement());
    assert!((beams[0].score() - expected).abs() < 1e-5);
}

#[tokio::test]
async fn beams_grow_along_shared_entities() {
    let config = BeamConfig {
        num_beams: 3,
        max_length: 3,
        ..BeamConfig::default()
    };
    let beam_search = search(facts(), config).await;
    let query = "Which river flows through the capital of France?";
    let seeds = vec![facts()[0].clone(), facts()[4].clone()];
    let beams = beam_search.search(query, seeds).await.unwrap();

    assert!(!beams.is_empty() && beams.len() <= 3);
    for pair in beams.windows(2) {
        assert!(pair[0].score() >= pair[1].score());
    }
    for beam in &beams {
        assert!(beam.len() <= 3);
        let texts: HashSet<String> = beam.triples().iter().map(Triple::surface_text).collect();
        assert_eq!(texts.len(), beam.len(), "duplicate triple in {}", beam.text());
        for step in beam.triples().windows(2) {
            assert!(step[1].shares_entity_with(&step[0]));
        }
        let seed_score = cosine(query, &beam.triples()[0].statement());
        assert!(beam.score() >= seed_score - 1e-5);
    }
    assert!(beams.iter().any(|b| b.len() > 1));
}

#[tokio::test]
async fn beam_without_neighbours_is_carried_forward() {
    let berlin = triple(&["Berlin", "capital_of", "Germany"], "c:4");
    let config = BeamConfig {
        num_beams: 2,
        max_length: 2,
        ..BeamConfig::default()
    };
    let beam_search = search(vec![berlin.clone()], config).await;
    let query = "capital of Germany";
    let beams = beam_search.search(query, vec![berlin.clone()]).await.unwrap();
    assert_eq!(beams.len(), 1);
    assert_eq!(beams[0].triples(), &[berlin.clone()]);
    assert!((beams[0].score() - cosine(query, &berlin.statement())).abs() < 1e-5);
}

#[tokio::test]
async fn beam_count_is_bounded_every_round() {
    for max_length in 1..=3 {
        let config = BeamConfig {
            num_beams: 2,
            max_length,
            ..BeamConfig::default()
        };
        let beam_search = search(facts(), config).await;
        let beams = beam_search.search("European Union members", facts()).await.unwrap();
        assert_eq!(beams.len(), 2);
        assert!(beams.iter().all(|b| b.len() <= max_length));
    }
}

#[tokio::test]
async fn no_seeds_means_no_beams() {
    let beam_search = search(facts(), BeamConfig::default()).await;
    assert!(beam_search.search("anything", vec![]).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_configuration_is_rejected() {
    let engine = MemoryEngine::new();
    let retriever = Arc::new(HybridRetriever::new(engine.clone(), RetrieverConfig::new("triples")).with_embedder(embedder()));
    let zero_length = BeamConfig {
        max_length: 0,
        ..BeamConfig::default()
    };
    assert!(matches!(
        TripleBeamSearch::new(retriever.clone(), zero_length),
        Err(Error::InvalidConfig(_))
    ));
    let zero_beams = BeamConfig {
        num_beams: 0,
        ..BeamConfig::default()
    };
    assert!(matches!(TripleBeamSearch::new(retriever, zero_beams), Err(Error::InvalidConfig(_))));

    let bare = Arc::new(HybridRetriever::new(engine, RetrieverConfig::new("triples")));
    assert!(matches!(
        TripleBeamSearch::new(bare, BeamConfig::default()),
        Err(Error::EmbeddingRequired)
    ));
}

#[tokio::test]
async fn tied_seeds_keep_their_input_order() {
    let seeds = vec![
        triple(&["a", "r", "b"], "t:0"),
        triple(&["c", "r", "d"], "t:1"),
        triple(&["e", "r", "f"], "t:2"),
        triple(&["g", "r", "h"], "t:3"),
    ];
    let cosines: Vec<(String, f32)> = vec![
        (seeds[0].statement(), 0.3),
        (seeds[1].statement(), 0.7),
        (seeds[2].statement(), 0.7),
        (seeds[3].statement(), 0.7),
    ];
    let config = BeamConfig {
        num_beams: 2,
        max_length: 1,
        ..BeamConfig::default()
    };
    let beams = scripted(&cosines, config).await.search(QUERY, seeds.clone()).await.unwrap();
    assert_eq!(paths_of(&beams), vec![vec![seeds[1].clone()], vec![seeds[2].clone()]]);
}

#[tokio::test]
async fn selection_is_global_not_per_beam() {
    let cosines = vec![
        (alpha().statement(), 0.9),
        (gamma().statement(), 0.8),
        (path(&[alpha(), beta_one()]), 0.5),
        (path(&[alpha(), beta_two()]), 0.4),
        (path(&[gamma(), delta_three()]), 0.1),
    ];
    let config = BeamConfig {
        num_beams: 2,
        max_length: 2,
        ..BeamConfig::default()
    };
    let beams = scripted(&cosines, config).await.search(QUERY, vec![alpha(), gamma()]).await.unwrap();
    assert_eq!(
        paths_of(&beams),
        vec![vec![alpha(), beta_one()], vec![alpha(), beta_two()]]
    );
    assert!((beams[0].score() - 1.4).abs() < 1e-5);
    assert!((beams[1].score() - 1.3).abs() < 1e-5);
}

#[tokio::test]
async fn tied_continuations_follow_beam_then_candidate_order() {
    let cosines = vec![
        (alpha().statement(), 0.5),
        (gamma().statement(), 0.5),
        (path(&[alpha(), beta_one()]), 0.4),
        (path(&[alpha(), beta_two()]), 0.4),
        (path(&[gamma(), delta_three()]), 0.4),
    ];
    let config = BeamConfig {
        num_beams: 2,
        max_length: 2,
        ..BeamConfig::default()
    };

    let beams = scripted(&cosines, config).await.search(QUERY, vec![alpha(), gamma()]).await.unwrap();
    assert_eq!(
        paths_of(&beams),
        vec![vec![alpha(), beta_one()], vec![alpha(), beta_two()]]
    );

    let beams = scripted(&cosines, config).await.search(QUERY, vec![gamma(), alpha()]).await.unwrap();
    assert_eq!(
        paths_of(&beams),
        vec![vec![gamma(), delta_three()], vec![alpha(), beta_one()]]
    );
}
