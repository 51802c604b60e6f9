use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::{EmbedderKind, Overrides, Settings},
    data_dir::DataDir,
    embedding::{Embedder, HashedEmbedder},
    error::Result,
    indexer::{IndexEvent, IndexReport, Indexer},
    llm::{LlmProvider, OpenAiCompatProvider},
    memory::LongTermMemory,
    model_manager::ModelManager,
    orchestrator::Orchestrator,
    processor::FileProcessor,
    sandbox::Sandbox,
    tools::Toolbox,
    vector_store::VectorStore,
};

/// Counts and configuration shown by `stats`.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub data_dir: String,
    pub sandbox_dir: String,
    pub total_files: u64,
    pub vector_count: u64,
    pub tag_count: usize,
    pub collection_count: usize,
    pub embedding_model: String,
    pub llm_model: Option<String>,
}

/// Owns every service and hands out the tool and conversation layers.
pub struct Concierge {
    settings: Settings,
    sandbox: Sandbox,
    processor: FileProcessor,
    memory: Arc<LongTermMemory>,
    vectors: Arc<VectorStore>,
    llm: Option<Arc<dyn LlmProvider>>,
    conversation: Option<Orchestrator>,
}

impl Concierge {
    /// Open the stores under `data_dir` and resolve settings against the
    /// process environment.
    pub fn open(data_dir: DataDir, overrides: &Overrides) -> Result<Self> {
        let memory = LongTermMemory::open(&data_dir.memory_db())?;
        let settings = Settings::resolve(data_dir, &memory, overrides)?;
        Self::with_settings(settings, memory)
    }

    /// Build from already resolved settings. Creates the sandbox layout if
    /// it is missing.
    pub fn with_settings(
        settings: Settings,
        memory: LongTermMemory,
    ) -> Result<Self> {
        let sandbox = Sandbox::new(&settings.sandbox_dir);
        sandbox.bootstrap()?;

        let embedder: Box<dyn Embedder> = match settings.embedder {
            EmbedderKind::Colbert => Box::new(ModelManager::with_model_id(
                settings.embedding_model.clone(),
            )),
            EmbedderKind::Hashed => Box::new(HashedEmbedder::default()),
        };
        let vectors =
            VectorStore::open(&settings.data_dir.vectors_db(), embedder)?
                .with_default_k(settings.top_k);

        let llm = OpenAiCompatProvider::from_settings(&settings.llm)
            .map(|p| Arc::new(p) as Arc<dyn LlmProvider>);
        if llm.is_none() {
            tracing::debug!("no language model key configured");
        }

        tracing::debug!(
            sandbox = %sandbox.root().display(),
            embedder = %settings.embedder,
            "concierge ready"
        );

        Ok(Self {
            processor: FileProcessor::new(settings.text_sample_size),
            sandbox,
            memory: Arc::new(memory),
            vectors: Arc::new(vectors),
            llm,
            conversation: None,
            settings,
        })
    }

    /// Replace the language model, e.g. with a local endpoint or a test
    /// double. Drops the current conversation.
    pub fn with_llm(mut self, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        self.llm = llm;
        self.conversation = None;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn memory(&self) -> &LongTermMemory {
        &self.memory
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub fn toolbox(&self) -> Toolbox {
        Toolbox::new(
            Arc::clone(&self.memory),
            Arc::clone(&self.vectors),
            self.sandbox.clone(),
            self.processor.clone(),
            self.settings.ranking,
        )
        .with_llm(self.llm.clone())
    }

    /// A fresh conversation. Fails when no language model is configured.
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        Orchestrator::from_toolbox(self.toolbox())
    }

    pub fn index_all_files(&self, force: bool) -> Result<IndexReport> {
        self.index_all_files_with(force, |_| {})
    }

    pub fn index_all_files_with<F>(
        &self,
        force: bool,
        on_progress: F,
    ) -> Result<IndexReport>
    where
        F: FnMut(&IndexEvent<'_>),
    {
        let indexer = Indexer::new(
            &self.sandbox,
            &self.processor,
            &self.memory,
            &self.vectors,
        );
        indexer.index_all_with(force, on_progress)
    }

    /// Send a message in the ongoing conversation, starting one if needed.
    pub async fn query(&mut self, text: &str) -> Result<String> {
        let orchestrator = match self.conversation.take() {
            Some(o) => o,
            None => self.orchestrator()?,
        };
        let orchestrator = self.conversation.insert(orchestrator);
        orchestrator.query(text).await
    }

    /// Forget the ongoing conversation.
    pub fn reset_conversation(&mut self) {
        self.conversation = None;
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            data_dir: self.settings.data_dir.root().display().to_string(),
            sandbox_dir: self.sandbox.root().display().to_string(),
            total_files: self.memory.count_files()?,
            vector_count: self.vectors.count()?,
            tag_count: self.memory.get_all_tags()?.len(),
            collection_count: self.memory.get_all_collections()?.len(),
            embedding_model: self.vectors.model_id(),
            llm_model: self.llm.as_ref().map(|l| l.model().to_string()),
        })
    }
}

impl std::fmt::Debug for Concierge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Concierge")
            .field("sandbox", &self.sandbox)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
