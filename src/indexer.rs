use serde::Serialize;

use crate::{
    error::Result,
    memory::{FileMetadata, LongTermMemory, now_secs},
    processor::FileProcessor,
    sandbox::Sandbox,
    vector_store::{DocumentMetadata, VectorStore},
    walker::{DiscoveredFile, discover_files},
};

/// Where a per-file failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Processing the file or writing its metadata record.
    Metadata,
    /// Embedding or writing the vector record. The metadata record exists.
    Embedding,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub path: String,
    pub stage: FailureStage,
    pub error: String,
}

/// What happened to one file during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped,
    Indexed { embedded: bool },
    Failed(FailureStage),
}

/// Progress notification, sent once per discovered file.
#[derive(Debug, Clone)]
pub struct IndexEvent<'a> {
    /// 1-based position in the pass.
    pub position: usize,
    pub total: usize,
    pub path: &'a str,
    pub outcome: FileOutcome,
}

/// Summary of one indexing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub discovered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub embedded: usize,
    pub failures: Vec<IndexFailure>,
    /// Metadata records after the pass.
    pub total_files: u64,
    /// Vector records after the pass.
    pub vector_count: u64,
}

/// Walks the sandbox and feeds each file through processing, the long-term
/// memory and the vector store.
///
/// The pass is strictly sequential. Without `force`, files that already
/// have a metadata record are skipped without being read, so modified files
/// keep their old records until a forced pass.
#[derive(Debug)]
pub struct Indexer<'a> {
    sandbox: &'a Sandbox,
    processor: &'a FileProcessor,
    memory: &'a LongTermMemory,
    vectors: &'a VectorStore,
}

impl<'a> Indexer<'a> {
    pub fn new(
        sandbox: &'a Sandbox,
        processor: &'a FileProcessor,
        memory: &'a LongTermMemory,
        vectors: &'a VectorStore,
    ) -> Self {
        Self {
            sandbox,
            processor,
            memory,
            vectors,
        }
    }

    pub fn index_all(&self, force: bool) -> Result<IndexReport> {
        self.index_all_with(force, |_| {})
    }

    /// Run a pass, calling `on_progress` after every file.
    ///
    /// Only a failure to walk the sandbox aborts the pass; per-file errors
    /// are logged and collected in the report.
    pub fn index_all_with<F>(
        &self,
        force: bool,
        mut on_progress: F,
    ) -> Result<IndexReport>
    where
        F: FnMut(&IndexEvent<'_>),
    {
        let files = discover_files(self.sandbox.root())?;
        let total = files.len();
        let mut report = IndexReport {
            discovered: total,
            ..Default::default()
        };
        tracing::info!(files = total, force, "indexing sandbox");

        for (i, file) in files.iter().enumerate() {
            let key = file.key();
            let outcome = self.index_one(file, &key, force, &mut report);
            on_progress(&IndexEvent {
                position: i + 1,
                total,
                path: &key,
                outcome,
            });
        }

        report.total_files = self.memory.count_files()?;
        report.vector_count = self.vectors.count()?;
        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            embedded = report.embedded,
            failed = report.failures.len(),
            "indexing complete"
        );
        Ok(report)
    }

    fn index_one(
        &self,
        file: &DiscoveredFile,
        key: &str,
        force: bool,
        report: &mut IndexReport,
    ) -> FileOutcome {
        if !force {
            match self.memory.has_file(key) {
                Ok(true) => {
                    tracing::debug!(path = key, "already indexed");
                    report.skipped += 1;
                    return FileOutcome::Skipped;
                }
                Ok(false) => {}
                Err(e) => {
                    return fail(report, key, FailureStage::Metadata, &e);
                }
            }
        }

        let processed = match self.processor.process(&file.absolute_path, false)
        {
            Ok(p) => p,
            Err(e) => return fail(report, key, FailureStage::Metadata, &e),
        };
        if let Some(err) = &processed.text_error {
            tracing::warn!(path = key, error = %err, "could not read text");
        }

        let meta = FileMetadata::from_processed(key, &processed, now_secs());
        if let Err(e) = self.memory.store_file_metadata(&meta) {
            return fail(report, key, FailureStage::Metadata, &e);
        }
        report.processed += 1;

        let mut embedded = false;
        if let Some(text) = processed.non_empty_text() {
            let doc_meta = DocumentMetadata {
                file_name: processed.file_name.clone(),
                file_type: processed.file_type.clone(),
                category: processed.category,
            };
            match self.vectors.add_document(key, text, &doc_meta) {
                Ok(added) => embedded = added,
                Err(e) => {
                    return fail(report, key, FailureStage::Embedding, &e);
                }
            }
        } else if self.vectors.delete(key) {
            tracing::debug!(path = key, "dropped vector for file without text");
        }
        if embedded {
            report.embedded += 1;
        }

        tracing::debug!(
            path = key,
            category = %processed.category,
            embedded,
            "indexed"
        );
        FileOutcome::Indexed { embedded }
    }
}

fn fail(
    report: &mut IndexReport,
    path: &str,
    stage: FailureStage,
    error: &crate::error::Error,
) -> FileOutcome {
    tracing::warn!(path, ?stage, error = %error, "failed to index file");
    report.failures.push(IndexFailure {
        path: path.to_string(),
        stage,
        error: error.to_string(),
    });
    FileOutcome::Failed(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;

    struct Fixture {
        _tmp: tempfile::TempDir,
        sandbox: Sandbox,
        processor: FileProcessor,
        memory: LongTermMemory,
        vectors: VectorStore,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let sandbox = Sandbox::new(tmp.path().join("sandbox"));
            sandbox.bootstrap().unwrap();
            let memory =
                LongTermMemory::open(&tmp.path().join("memory.redb")).unwrap();
            let vectors = VectorStore::open(
                &tmp.path().join("vectors.redb"),
                Box::new(HashedEmbedder::default()),
            )
            .unwrap();
            Self {
                _tmp: tmp,
                sandbox,
                processor: FileProcessor::default(),
                memory,
                vectors,
            }
        }

        fn write(&self, rel: &str, content: &[u8]) {
            let path = self.sandbox.root().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        fn indexer(&self) -> Indexer<'_> {
            Indexer::new(
                &self.sandbox,
                &self.processor,
                &self.memory,
                &self.vectors,
            )
        }
    }

    #[test]
    fn indexes_text_and_binary_files() {
        let fx = Fixture::new();
        fx.write("notes/a.md", b"# Rust notes\nownership");
        fx.write("code/main.py", b"print('hello')");
        fx.write("images/cat.png", &[0x89, b'P', b'N', b'G']);

        let report = fx.indexer().index_all(false).unwrap();
        assert_eq!(report.discovered, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.embedded, 2);
        assert!(report.failures.is_empty());
        assert_eq!(report.total_files, 3);
        assert_eq!(report.vector_count, 2);

        let meta =
            fx.memory.get_file_metadata("code/main.py").unwrap().unwrap();
        assert_eq!(meta.category, crate::processor::FileCategory::Code);
        assert_eq!(meta.text_sample.as_deref(), Some("print('hello')"));
        assert!(fx.vectors.get("images/cat.png").is_none());
    }

    #[test]
    fn second_pass_skips_everything() {
        let fx = Fixture::new();
        fx.write("notes/a.md", b"alpha");
        fx.write("notes/b.md", b"beta");

        let first = fx.indexer().index_all(false).unwrap();
        let second = fx.indexer().index_all(false).unwrap();

        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.total_files, first.total_files);
        assert_eq!(second.vector_count, first.vector_count);
    }

    #[test]
    fn force_reprocesses_changed_files() {
        let fx = Fixture::new();
        fx.write("notes/a.md", b"old text");
        fx.indexer().index_all(false).unwrap();

        fx.write("notes/a.md", b"new text");
        fx.indexer().index_all(false).unwrap();
        assert_eq!(fx.vectors.get("notes/a.md").unwrap().text, "old text");

        let report = fx.indexer().index_all(true).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.vector_count, 1);
        assert_eq!(fx.vectors.get("notes/a.md").unwrap().text, "new text");
    }

    #[test]
    fn whitespace_file_gets_metadata_only() {
        let fx = Fixture::new();
        fx.write("notes/blank.txt", b"   \n\n  ");

        let report = fx.indexer().index_all(false).unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.embedded, 0);
        assert!(fx.memory.has_file("notes/blank.txt").unwrap());
        assert_eq!(fx.vectors.count().unwrap(), 0);
    }

    #[test]
    fn forced_pass_drops_vector_of_emptied_file() {
        let fx = Fixture::new();
        fx.write("notes/a.txt", b"secret salary figures");
        fx.indexer().index_all(false).unwrap();
        assert!(fx.vectors.get("notes/a.txt").is_some());

        fx.write("notes/a.txt", b"   ");
        let report = fx.indexer().index_all(true).unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.embedded, 0);
        assert_eq!(report.vector_count, 0);
        assert!(fx.vectors.get("notes/a.txt").is_none());
        assert!(fx.vectors.search("salary figures", None).unwrap().is_empty());
        assert!(fx.memory.has_file("notes/a.txt").unwrap());
    }

    #[test]
    fn progress_reports_every_file() {
        let fx = Fixture::new();
        fx.write("a.txt", b"one");
        fx.write("b.txt", b"two");
        fx.indexer().index_all(false).unwrap();
        fx.write("c.txt", b"three");

        let mut events = Vec::new();
        fx.indexer()
            .index_all_with(false, |e| {
                events.push((
                    e.position,
                    e.total,
                    e.path.to_string(),
                    e.outcome.clone(),
                ))
            })
            .unwrap();

        assert_eq!(
            events,
            vec![
                (1, 3, "a.txt".to_string(), FileOutcome::Skipped),
                (2, 3, "b.txt".to_string(), FileOutcome::Skipped),
                (
                    3,
                    3,
                    "c.txt".to_string(),
                    FileOutcome::Indexed { embedded: true }
                ),
            ]
        );
    }

    #[test]
    fn missing_sandbox_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(tmp.path().join("nope"));
        let memory = LongTermMemory::open(&tmp.path().join("m.redb")).unwrap();
        let vectors = VectorStore::open(
            &tmp.path().join("v.redb"),
            Box::new(HashedEmbedder::default()),
        )
        .unwrap();
        let processor = FileProcessor::default();

        let indexer = Indexer::new(&sandbox, &processor, &memory, &vectors);
        assert!(indexer.index_all(false).is_err());
    }
}
