use super::*;
use crate::RagError;

fn chunk(id: &str, text: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: id.to_string(),
        text: text.to_string(),
        embedding,
        metadata: BTreeMap::new(),
    }
}

fn three_chunk_index() -> VectorIndex {
    VectorIndex::from_records(vec![
        chunk("c1", "first passage", vec![1.0, 0.0, 0.0]),
        chunk("c2", "second passage", vec![0.0, 1.0, 0.0]),
        chunk("c3", "third passage", vec![0.0, 0.8, 0.6]),
    ])
    .expect("index should build")
}

#[test]
fn empty_corpus_rejected() {
    let result = VectorIndex::from_records(vec![]);
    assert!(matches!(result, Err(IngestError::Empty)));
}

#[test]
fn inconsistent_dimensions_rejected() {
    let result = VectorIndex::from_records(vec![
        chunk("a", "one", vec![1.0, 0.0]),
        chunk("b", "two", vec![1.0, 0.0, 0.0]),
    ]);

    match result {
        Err(IngestError::DimensionMismatch {
            id,
            expected,
            found,
        }) => {
            assert_eq!(id, "b");
            assert_eq!(expected, 2);
            assert_eq!(found, 3);
        }
        other => panic!("expected dimension mismatch, got {:?}", other),
    }
}

#[test]
fn duplicate_ids_rejected() {
    let result = VectorIndex::from_records(vec![
        chunk("same", "one", vec![1.0, 0.0]),
        chunk("same", "two", vec![0.0, 1.0]),
    ]);
    assert!(matches!(result, Err(IngestError::DuplicateId(id)) if id == "same"));
}

#[test]
fn zero_length_embedding_rejected() {
    let result = VectorIndex::from_records(vec![chunk("a", "one", vec![])]);
    assert!(matches!(result, Err(IngestError::Malformed(_))));
}

#[test]
fn malformed_json_rejected() {
    let result = VectorIndex::from_slice(b"{\"not\": \"an array\"}");
    assert!(matches!(result, Err(IngestError::Malformed(_))));

    let missing_field = br#"[{"id": "a", "embedding": [1.0]}]"#;
    let result = VectorIndex::from_slice(missing_field);
    assert!(matches!(result, Err(IngestError::Malformed(_))));
}

#[test]
fn corpus_parses_with_metadata() {
    let corpus = br#"[
        {
            "id": "eo-14067-p1",
            "text": "Ensuring responsible development of digital assets.",
            "embedding": [0.1, 0.2, 0.3],
            "metadata": {"title": "EO 14067", "eo_number": "14067", "page_number": 1}
        }
    ]"#;

    let index = VectorIndex::from_slice(corpus).expect("corpus should parse");
    assert_eq!(index.len(), 1);
    assert_eq!(index.dimension(), 3);

    let chunk = index.get("eo-14067-p1").expect("chunk should exist");
    assert_eq!(
        chunk.metadata.get("title"),
        Some(&MetadataValue::Text("EO 14067".to_string()))
    );
    assert_eq!(
        chunk.metadata.get("page_number"),
        Some(&MetadataValue::Number(1.0))
    );
}

#[test]
fn exact_match_scores_one() {
    let index = three_chunk_index();

    let hits = index
        .query(&[0.0, 1.0, 0.0], 2, 0.5)
        .expect("query should succeed");

    assert!(!hits.is_empty());
    assert_eq!(hits[0].chunk_id, "c2");
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    // c3 is the next closest (cos = 0.8) and clears the threshold.
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[1].chunk_id, "c3");
    assert!((hits[1].score - 0.8).abs() < 1e-6);
}

#[test]
fn threshold_filters_results() {
    let index = three_chunk_index();

    let hits = index
        .query(&[0.0, 1.0, 0.0], 3, 0.9)
        .expect("query should succeed");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "c2");
}

#[test]
fn no_chunk_clears_threshold() {
    let index = three_chunk_index();

    let hits = index
        .query(&[1.0, 0.0, 0.0], 3, 1.5)
        .expect("query should succeed");

    assert!(hits.is_empty());
}

#[test]
fn results_sorted_and_bounded() {
    let index = three_chunk_index();

    let hits = index
        .query(&[0.0, 0.7, 0.7], 2, -1.0)
        .expect("query should succeed");

    assert_eq!(hits.len(), 2);
    for pair in hits.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn ties_keep_insertion_order() {
    let index = VectorIndex::from_records(vec![
        chunk("first", "a", vec![1.0, 0.0]),
        chunk("second", "b", vec![1.0, 0.0]),
        chunk("third", "c", vec![1.0, 0.0]),
    ])
    .expect("index should build");

    let hits = index
        .query(&[1.0, 0.0], 3, 0.0)
        .expect("query should succeed");

    let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[test]
fn zero_k_is_invalid() {
    let index = three_chunk_index();
    let result = index.query(&[1.0, 0.0, 0.0], 0, 0.0);
    assert!(matches!(result, Err(RagError::InvalidArgument(_))));
}

#[test]
fn dimension_mismatch_is_invalid() {
    let index = three_chunk_index();
    let result = index.query(&[1.0, 0.0], 2, 0.0);
    assert!(matches!(result, Err(RagError::InvalidArgument(_))));
}

#[test]
fn zero_norm_query_scores_nothing() {
    let index = three_chunk_index();

    let hits = index
        .query(&[0.0, 0.0, 0.0], 3, 0.5)
        .expect("query should succeed");

    assert!(hits.is_empty());
}

#[test]
fn reload_is_deterministic() {
    let corpus = br#"[
        {"id": "a", "text": "alpha", "embedding": [0.9, 0.1]},
        {"id": "b", "text": "beta", "embedding": [0.1, 0.9]},
        {"id": "c", "text": "gamma", "embedding": [0.7, 0.7]}
    ]"#;

    let first = VectorIndex::from_slice(corpus).expect("first load");
    let second = VectorIndex::from_slice(corpus).expect("second load");

    let query = [0.8, 0.3];
    let hits_a = first.query(&query, 3, 0.0).expect("first query");
    let hits_b = second.query(&query, 3, 0.0).expect("second query");

    assert_eq!(hits_a, hits_b);
}

#[test]
fn store_cold_start_is_empty() {
    let store = IndexStore::new();
    assert!(store.get("corpus").is_none());
}

#[test]
fn store_swap_replaces_snapshot() {
    let store = IndexStore::new();

    let first = store.swap(
        "corpus",
        VectorIndex::from_records(vec![chunk("a", "one", vec![1.0])]).expect("build"),
    );
    assert_eq!(first.len(), 1);

    let old_handle = store.get("corpus").expect("snapshot should exist");

    store.swap(
        "corpus",
        VectorIndex::from_records(vec![
            chunk("a", "one", vec![1.0]),
            chunk("b", "two", vec![0.5]),
        ])
        .expect("build"),
    );

    // A reader holding the previous snapshot still sees consistent data.
    assert_eq!(old_handle.len(), 1);
    assert_eq!(store.get("corpus").expect("snapshot").len(), 2);
}

#[test]
fn failed_reload_keeps_previous_snapshot() {
    let store = IndexStore::new();
    store.swap(
        "corpus",
        VectorIndex::from_records(vec![chunk("a", "one", vec![1.0])]).expect("build"),
    );

    let result = store.load_from_reader("corpus", &b"[]"[..]);
    assert!(result.is_err());
    assert_eq!(store.get("corpus").expect("snapshot").len(), 1);
}

#[test]
fn metadata_value_display() {
    assert_eq!(MetadataValue::Text("EO 14067".to_string()).to_string(), "EO 14067");
    assert_eq!(MetadataValue::Number(3.0).to_string(), "3");
    assert_eq!(MetadataValue::Number(2.5).to_string(), "2.5");
}
