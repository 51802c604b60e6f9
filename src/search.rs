use std::{cmp::Ordering, collections::BTreeSet};

use serde::Serialize;

use crate::{
    error::Result,
    memory::{LongTermMemory, normalize_tag},
    processor::FileCategory,
    text_util,
    vector_store::{VectorHit, VectorStore},
};

pub const DEFAULT_TAG_MATCH_BOOST: f32 = 0.2;
pub const DEFAULT_TAG_ONLY_SCORE: f32 = 0.5;

/// Constants used when merging semantic and tag results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    /// Added to the similarity of a semantic hit that also matches the tags.
    pub tag_match_boost: f32,
    /// Similarity assigned to files found only through tags.
    pub tag_only_score: f32,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            tag_match_boost: DEFAULT_TAG_MATCH_BOOST,
            tag_only_score: DEFAULT_TAG_ONLY_SCORE,
        }
    }
}

/// One search result, from either search path.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub category: FileCategory,
    pub similarity: f32,
    /// Cosine distance; absent for tag-only results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub tags: Vec<String>,
    pub tag_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Parameters for [`combined_search`].
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub top_k: Option<usize>,
}

impl SearchParams {
    fn query(&self) -> Option<&str> {
        self.query.as_deref().filter(|q| !q.trim().is_empty())
    }
}

fn from_vector_hit(
    memory: &LongTermMemory,
    query: &str,
    hit: VectorHit,
) -> Result<SearchHit> {
    let tags = memory.get_file_tags(&hit.id)?;
    let snippet = text_util::extract_snippet(&hit.text, query).map(|(s, _)| s);
    Ok(SearchHit {
        file_path: hit.id,
        file_name: hit.metadata.file_name,
        file_type: hit.metadata.file_type,
        category: hit.metadata.category,
        similarity: hit.similarity,
        distance: Some(hit.distance),
        tags,
        tag_match: false,
        snippet,
    })
}

/// Vector search, each hit enriched with its tags.
pub fn semantic_search(
    memory: &LongTermMemory,
    vectors: &VectorStore,
    query: &str,
    top_k: Option<usize>,
) -> Result<Vec<SearchHit>> {
    vectors
        .search(query, top_k)?
        .into_iter()
        .map(|hit| from_vector_hit(memory, query, hit))
        .collect()
}

/// Files carrying every one of `tags`, ordered by path.
///
/// Files without a metadata record are left out. An empty tag list matches
/// nothing.
pub fn search_by_tags<S: AsRef<str>>(
    memory: &LongTermMemory,
    tags: &[S],
    score: f32,
) -> Result<Vec<SearchHit>> {
    let mut matching: Option<BTreeSet<String>> = None;
    for tag in tags {
        let tag = normalize_tag(tag.as_ref())?;
        let files: BTreeSet<String> =
            memory.get_files_by_tag(&tag)?.into_iter().collect();
        matching = Some(match matching {
            Some(acc) => acc.intersection(&files).cloned().collect(),
            None => files,
        });
    }

    let mut hits = Vec::new();
    for path in matching.unwrap_or_default() {
        let Some(meta) = memory.get_file_metadata(&path)? else {
            tracing::debug!(path = %path, "tagged file has no metadata");
            continue;
        };
        let tags = memory.get_file_tags(&path)?;
        hits.push(SearchHit {
            file_path: meta.file_path,
            file_name: meta.file_name,
            file_type: meta.file_type,
            category: meta.category,
            similarity: score,
            distance: None,
            tags,
            tag_match: true,
            snippet: meta
                .text_sample
                .as_deref()
                .and_then(|t| text_util::extract_snippet(t, ""))
                .map(|(s, _)| s),
        });
    }
    Ok(hits)
}

/// Merge semantic and tag search.
///
/// Semantic hits that also carry all the tags get `tag_match` and a boost;
/// files found only through tags score `tag_only_score`. Results are sorted
/// by descending similarity and cut to `top_k`.
pub fn combined_search(
    memory: &LongTermMemory,
    vectors: &VectorStore,
    params: &SearchParams,
    weights: RankingWeights,
) -> Result<Vec<SearchHit>> {
    let query = params.query();
    let has_tags = !params.tags.is_empty();
    let top_k = params.top_k.unwrap_or(vectors.default_k());

    let mut results = match query {
        Some(q) => semantic_search(memory, vectors, q, Some(top_k))?,
        None => Vec::new(),
    };

    if has_tags {
        let tagged =
            search_by_tags(memory, &params.tags, weights.tag_only_score)?;
        let tagged_paths: BTreeSet<&str> =
            tagged.iter().map(|h| h.file_path.as_str()).collect();

        for hit in &mut results {
            if tagged_paths.contains(hit.file_path.as_str()) {
                hit.tag_match = true;
                hit.similarity += weights.tag_match_boost;
            }
        }

        let semantic_paths: BTreeSet<String> =
            results.iter().map(|h| h.file_path.clone()).collect();
        results.extend(
            tagged
                .into_iter()
                .filter(|h| !semantic_paths.contains(&h.file_path)),
        );
    }

    // Stable sort keeps vector order (then path order) among equal scores.
    results.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    results.truncate(top_k);

    tracing::debug!(
        query = query.unwrap_or(""),
        tags = ?params.tags,
        results = results.len(),
        "combined search"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::HashedEmbedder,
        memory::FileMetadata,
        vector_store::DocumentMetadata,
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        memory: LongTermMemory,
        vectors: VectorStore,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let memory =
                LongTermMemory::open(&tmp.path().join("memory.redb")).unwrap();
            let vectors = VectorStore::open(
                &tmp.path().join("vectors.redb"),
                Box::new(HashedEmbedder::default()),
            )
            .unwrap();
            Self {
                _tmp: tmp,
                memory,
                vectors,
            }
        }

        fn add(&self, path: &str, text: &str, tags: &[&str]) {
            let name = path.rsplit('/').next().unwrap().to_string();
            self.memory
                .store_file_metadata(&FileMetadata {
                    file_path: path.to_string(),
                    file_name: name.clone(),
                    file_type: "text/plain".to_string(),
                    category: FileCategory::Document,
                    file_size: text.len() as u64,
                    created_at: 1,
                    modified_at: 1,
                    indexed_at: 1,
                    text_sample: Some(text.to_string()),
                })
                .unwrap();
            self.vectors
                .add_document(
                    path,
                    text,
                    &DocumentMetadata {
                        file_name: name,
                        file_type: "text/plain".to_string(),
                        category: FileCategory::Document,
                    },
                )
                .unwrap();
            self.memory.tag_file_many(path, tags).unwrap();
        }
    }

    fn paths(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.file_path.as_str()).collect()
    }

    #[test]
    fn semantic_hits_carry_tags() {
        let fx = Fixture::new();
        fx.add("a.txt", "rust ownership rules", &["rust"]);
        fx.add("b.txt", "baking sourdough bread", &[]);

        let hits =
            semantic_search(&fx.memory, &fx.vectors, "rust ownership", None)
                .unwrap();
        assert_eq!(hits[0].file_path, "a.txt");
        assert_eq!(hits[0].tags, vec!["rust"]);
        assert!(!hits[0].tag_match);
        assert!(hits[0].distance.is_some());
        assert!(hits[0].snippet.as_deref().unwrap().contains("ownership"));
    }

    #[test]
    fn tag_search_is_an_intersection() {
        let fx = Fixture::new();
        fx.add("both.txt", "x", &["a", "b"]);
        fx.add("only_a.txt", "y", &["a"]);
        fx.add("only_b.txt", "z", &["b"]);

        let hits = search_by_tags(&fx.memory, &["a", "B"], 0.5).unwrap();
        assert_eq!(paths(&hits), vec!["both.txt"]);
        assert!(hits[0].tag_match);
        assert_eq!(hits[0].similarity, 0.5);
        assert_eq!(hits[0].tags, vec!["a", "b"]);
    }

    #[test]
    fn tag_search_sorted_and_skips_unindexed() {
        let fx = Fixture::new();
        fx.add("z.txt", "z", &["t"]);
        fx.add("a.txt", "a", &["t"]);
        fx.memory.tag_file("ghost.txt", "t").unwrap();

        let hits = search_by_tags(&fx.memory, &["t"], 0.5).unwrap();
        assert_eq!(paths(&hits), vec!["a.txt", "z.txt"]);
    }

    #[test]
    fn empty_tag_list_matches_nothing() {
        let fx = Fixture::new();
        fx.add("a.txt", "a", &["t"]);
        let none: [&str; 0] = [];
        assert!(search_by_tags(&fx.memory, &none, 0.5).unwrap().is_empty());
    }

    #[test]
    fn tag_match_raises_rank() {
        let fx = Fixture::new();
        // Identical text, so identical similarity before boosting.
        fx.add("plain.txt", "quarterly budget report", &[]);
        fx.add("tagged.txt", "quarterly budget report", &["finance"]);

        let params = SearchParams {
            query: Some("quarterly budget".to_string()),
            tags: vec!["finance".to_string()],
            top_k: None,
        };
        let hits = combined_search(
            &fx.memory,
            &fx.vectors,
            &params,
            RankingWeights::default(),
        )
        .unwrap();

        assert_eq!(paths(&hits), vec!["tagged.txt", "plain.txt"]);
        assert!(hits[0].tag_match);
        assert!(!hits[1].tag_match);
        assert!((hits[0].similarity - hits[1].similarity - 0.2).abs() < 1e-5);
    }

    #[test]
    fn boosted_similarity_is_not_capped() {
        let fx = Fixture::new();
        fx.add("exact.txt", "tax return receipts", &["finance"]);

        let params = SearchParams {
            query: Some("tax return receipts".to_string()),
            tags: vec!["finance".to_string()],
            top_k: None,
        };
        let hits = combined_search(
            &fx.memory,
            &fx.vectors,
            &params,
            RankingWeights::default(),
        )
        .unwrap();

        assert_eq!(paths(&hits), vec!["exact.txt"]);
        assert!(hits[0].tag_match);
        assert!(hits[0].similarity > 1.0);
        assert!((hits[0].similarity - 1.2).abs() < 1e-4);
    }

    #[test]
    fn tag_only_results_are_merged() {
        let fx = Fixture::new();
        fx.add("semantic.txt", "garden tomato planting", &[]);
        fx.add("tag_only.txt", "unrelated words entirely", &["garden"]);

        let params = SearchParams {
            query: Some("tomato planting".to_string()),
            tags: vec!["garden".to_string()],
            top_k: Some(1),
        };
        let weights = RankingWeights {
            tag_match_boost: 0.2,
            tag_only_score: 2.0,
        };
        let hits = combined_search(&fx.memory, &fx.vectors, &params, weights)
            .unwrap();

        assert_eq!(paths(&hits), vec!["tag_only.txt"]);
        assert_eq!(hits[0].similarity, 2.0);
        assert!(hits[0].distance.is_none());
    }

    #[test]
    fn combined_with_only_tags() {
        let fx = Fixture::new();
        fx.add("a.txt", "a", &["t"]);
        let params = SearchParams {
            query: None,
            tags: vec!["t".to_string()],
            top_k: None,
        };
        let hits = combined_search(
            &fx.memory,
            &fx.vectors,
            &params,
            RankingWeights::default(),
        )
        .unwrap();
        assert_eq!(paths(&hits), vec!["a.txt"]);
        assert_eq!(hits[0].similarity, DEFAULT_TAG_ONLY_SCORE);
    }

    #[test]
    fn combined_with_nothing_is_empty() {
        let fx = Fixture::new();
        fx.add("a.txt", "a", &["t"]);
        let params = SearchParams {
            query: Some("   ".to_string()),
            ..Default::default()
        };
        let hits = combined_search(
            &fx.memory,
            &fx.vectors,
            &params,
            RankingWeights::default(),
        )
        .unwrap();
        assert!(hits.is_empty());
    }
}
