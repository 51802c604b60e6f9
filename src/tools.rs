//! The closed set of operations offered to the language model, the MCP
//! server and the CLI.
//!
//! Arguments are typed structs parsed once at the boundary into a
//! [`ToolCall`]. Every outcome is rendered as a [`ToolResponse`], so errors
//! never escape this layer.

use std::{fmt, path::Path, str::FromStr, sync::Arc};

use globset::GlobBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{Error, ErrorKind, Result},
    llm::{self, LlmProvider},
    memory::{Collection, LongTermMemory},
    processor::{FileCategory, FileProcessor},
    sandbox::{Sandbox, path_key},
    search::{self, RankingWeights, SearchHit, SearchParams},
    vector_store::VectorStore,
    walker::discover_files,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SearchFiles,
    SuggestTags,
    ApplyTags,
    GetFileTags,
    CreateCollection,
    AddToCollection,
    GetCollectionFiles,
    ListFiles,
    ReadFile,
    ListTags,
    ListCollections,
}

impl ToolName {
    pub const ALL: [ToolName; 11] = [
        Self::SearchFiles,
        Self::SuggestTags,
        Self::ApplyTags,
        Self::GetFileTags,
        Self::CreateCollection,
        Self::AddToCollection,
        Self::GetCollectionFiles,
        Self::ListFiles,
        Self::ReadFile,
        Self::ListTags,
        Self::ListCollections,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SearchFiles => "search_files",
            Self::SuggestTags => "suggest_tags",
            Self::ApplyTags => "apply_tags",
            Self::GetFileTags => "get_file_tags",
            Self::CreateCollection => "create_collection",
            Self::AddToCollection => "add_to_collection",
            Self::GetCollectionFiles => "get_collection_files",
            Self::ListFiles => "list_files",
            Self::ReadFile => "read_file",
            Self::ListTags => "list_tags",
            Self::ListCollections => "list_collections",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::SearchFiles => {
                "Search files semantically by query and/or filter by tags. Files carrying all tags rank higher."
            }
            Self::SuggestTags => {
                "Suggest descriptive tags for a file based on its content."
            }
            Self::ApplyTags => "Apply one or more tags to a file.",
            Self::GetFileTags => "Get the tags applied to a file.",
            Self::CreateCollection => {
                "Create a named collection for grouping related files."
            }
            Self::AddToCollection => "Add files to an existing collection.",
            Self::GetCollectionFiles => "List the files in a collection.",
            Self::ListFiles => {
                "List files in a sandbox directory, optionally filtered by a glob pattern."
            }
            Self::ReadFile => "Read the full text content of a file.",
            Self::ListTags => "List every tag in use.",
            Self::ListCollections => "List every collection.",
        }
    }

    /// JSON schema of the tool's arguments.
    pub fn parameters_schema(&self) -> Value {
        let schema = match self {
            Self::SearchFiles => schemars::schema_for!(SearchFilesArgs),
            Self::SuggestTags | Self::GetFileTags | Self::ReadFile => {
                schemars::schema_for!(FilePathArgs)
            }
            Self::ApplyTags => schemars::schema_for!(ApplyTagsArgs),
            Self::CreateCollection => {
                schemars::schema_for!(CreateCollectionArgs)
            }
            Self::AddToCollection => schemars::schema_for!(AddToCollectionArgs),
            Self::GetCollectionFiles => {
                schemars::schema_for!(CollectionNameArgs)
            }
            Self::ListFiles => schemars::schema_for!(ListFilesArgs),
            Self::ListTags | Self::ListCollections => {
                schemars::schema_for!(NoArgs)
            }
        };
        let mut value = serde_json::to_value(&schema)
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }));
        if let Some(obj) = value.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
        }
        value
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown tool: {s}")))
    }
}

/// Function declarations in the OpenAI `tools` format.
pub fn declarations() -> Vec<Value> {
    ToolName::ALL
        .iter()
        .map(|tool| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.as_str(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema(),
                }
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SearchFilesArgs {
    /// Natural language query matched against file contents.
    pub query: Option<String>,
    /// Only files carrying all of these tags are boosted or returned.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Maximum number of results.
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FilePathArgs {
    /// Path relative to the sandbox root, e.g. "notes/todo.md".
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApplyTagsArgs {
    /// Path relative to the sandbox root.
    pub file_path: String,
    /// Tags to apply; they are lowercased.
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreateCollectionArgs {
    /// Unique collection name.
    pub name: String,
    /// What the collection is for.
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AddToCollectionArgs {
    /// Name of an existing collection.
    pub collection_name: String,
    /// Paths relative to the sandbox root.
    pub file_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CollectionNameArgs {
    /// Name of the collection.
    pub collection_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Directory relative to the sandbox root; the root when omitted.
    pub directory: Option<String>,
    /// Glob such as "*.py". Patterns containing "/" match the path below
    /// the directory, others match the file name.
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoArgs {}

/// A parsed tool invocation.
#[derive(Debug, Clone)]
pub enum ToolCall {
    SearchFiles(SearchFilesArgs),
    SuggestTags(FilePathArgs),
    ApplyTags(ApplyTagsArgs),
    GetFileTags(FilePathArgs),
    CreateCollection(CreateCollectionArgs),
    AddToCollection(AddToCollectionArgs),
    GetCollectionFiles(CollectionNameArgs),
    ListFiles(ListFilesArgs),
    ReadFile(FilePathArgs),
    ListTags,
    ListCollections,
}

fn parse_args<T: serde::de::DeserializeOwned>(
    tool: ToolName,
    args: Value,
) -> Result<T> {
    let args = match args {
        Value::Null => Value::Object(Map::new()),
        obj @ Value::Object(_) => obj,
        other => {
            return Err(Error::Validation(format!(
                "arguments for {tool} must be an object, got {other}"
            )));
        }
    };
    serde_json::from_value(args).map_err(|e| {
        Error::Validation(format!("invalid arguments for {tool}: {e}"))
    })
}

impl ToolCall {
    pub fn parse(name: &str, args: Value) -> Result<Self> {
        let tool: ToolName = name.parse()?;
        Ok(match tool {
            ToolName::SearchFiles => Self::SearchFiles(parse_args(tool, args)?),
            ToolName::SuggestTags => Self::SuggestTags(parse_args(tool, args)?),
            ToolName::ApplyTags => Self::ApplyTags(parse_args(tool, args)?),
            ToolName::GetFileTags => Self::GetFileTags(parse_args(tool, args)?),
            ToolName::CreateCollection => {
                Self::CreateCollection(parse_args(tool, args)?)
            }
            ToolName::AddToCollection => {
                Self::AddToCollection(parse_args(tool, args)?)
            }
            ToolName::GetCollectionFiles => {
                Self::GetCollectionFiles(parse_args(tool, args)?)
            }
            ToolName::ListFiles => Self::ListFiles(parse_args(tool, args)?),
            ToolName::ReadFile => Self::ReadFile(parse_args(tool, args)?),
            ToolName::ListTags => {
                parse_args::<NoArgs>(tool, args)?;
                Self::ListTags
            }
            ToolName::ListCollections => {
                parse_args::<NoArgs>(tool, args)?;
                Self::ListCollections
            }
        })
    }

    pub fn name(&self) -> ToolName {
        match self {
            Self::SearchFiles(_) => ToolName::SearchFiles,
            Self::SuggestTags(_) => ToolName::SuggestTags,
            Self::ApplyTags(_) => ToolName::ApplyTags,
            Self::GetFileTags(_) => ToolName::GetFileTags,
            Self::CreateCollection(_) => ToolName::CreateCollection,
            Self::AddToCollection(_) => ToolName::AddToCollection,
            Self::GetCollectionFiles(_) => ToolName::GetCollectionFiles,
            Self::ListFiles(_) => ToolName::ListFiles,
            Self::ReadFile(_) => ToolName::ReadFile,
            Self::ListTags => ToolName::ListTags,
            Self::ListCollections => ToolName::ListCollections,
        }
    }
}

/// Uniform tool result: `{"status":"success", ...}` or
/// `{"status":"error","error_kind":...,"error_message":...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolResponse {
    Success(Map<String, Value>),
    Error {
        error_kind: ErrorKind,
        error_message: String,
    },
}

impl ToolResponse {
    pub fn from_result<T: Serialize>(result: Result<T>) -> Self {
        let value = result.and_then(|v| Ok(serde_json::to_value(v)?));
        match value {
            Ok(Value::Object(map)) => Self::Success(map),
            Ok(other) => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                Self::Success(map)
            }
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            error_kind: error.kind(),
            error_message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "status": "error",
                "error_kind": ErrorKind::Storage,
                "error_message": e.to_string(),
            })
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchFilesOutput {
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub results: Vec<SearchHit>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestTagsOutput {
    pub file_path: String,
    pub suggested_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTagsOutput {
    pub file_path: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyTagsOutput {
    pub file_path: String,
    pub applied: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveTagOutput {
    pub file_path: String,
    pub removed: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionOutput {
    pub collection: Collection,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddToCollectionOutput {
    pub collection_name: String,
    pub added: Vec<String>,
    pub file_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionFilesOutput {
    pub collection_name: String,
    pub files: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedFile {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub category: FileCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListFilesOutput {
    pub directory: String,
    pub pattern: String,
    pub files: Vec<ListedFile>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadFileOutput {
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub category: FileCategory,
    pub file_size: u64,
    pub modified_at: u64,
    /// Full text; absent for binary files.
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListTagsOutput {
    pub tags: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListCollectionsOutput {
    pub collections: Vec<Collection>,
    pub count: usize,
}

/// Executes tools against shared services.
#[derive(Clone)]
pub struct Toolbox {
    memory: Arc<LongTermMemory>,
    vectors: Arc<VectorStore>,
    sandbox: Sandbox,
    processor: FileProcessor,
    ranking: RankingWeights,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl Toolbox {
    pub fn new(
        memory: Arc<LongTermMemory>,
        vectors: Arc<VectorStore>,
        sandbox: Sandbox,
        processor: FileProcessor,
        ranking: RankingWeights,
    ) -> Self {
        Self {
            memory,
            vectors,
            sandbox,
            processor,
            ranking,
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: Option<Arc<dyn LlmProvider>>) -> Self {
        self.llm = llm;
        self
    }

    pub fn llm(&self) -> Option<&Arc<dyn LlmProvider>> {
        self.llm.as_ref()
    }

    pub fn memory(&self) -> &LongTermMemory {
        &self.memory
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Parse and execute a call by name. Never fails; errors become
    /// error responses.
    pub async fn execute_named(&self, name: &str, args: Value) -> ToolResponse {
        match ToolCall::parse(name, args) {
            Ok(call) => self.execute(call).await,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "rejected tool call");
                ToolResponse::from_error(&e)
            }
        }
    }

    pub async fn execute(&self, call: ToolCall) -> ToolResponse {
        let tool = call.name();
        tracing::debug!(%tool, "executing tool");
        let response = match call {
            ToolCall::SearchFiles(args) => {
                ToolResponse::from_result(self.search_files(args))
            }
            ToolCall::SuggestTags(args) => ToolResponse::from_result(
                self.suggest_tags(&args.file_path).await,
            ),
            ToolCall::ApplyTags(args) => ToolResponse::from_result(
                self.apply_tags(&args.file_path, &args.tags),
            ),
            ToolCall::GetFileTags(args) => {
                ToolResponse::from_result(self.get_file_tags(&args.file_path))
            }
            ToolCall::CreateCollection(args) => {
                ToolResponse::from_result(self.create_collection(
                    &args.name,
                    args.description.as_deref().unwrap_or_default(),
                ))
            }
            ToolCall::AddToCollection(args) => ToolResponse::from_result(
                self.add_to_collection(&args.collection_name, &args.file_paths),
            ),
            ToolCall::GetCollectionFiles(args) => ToolResponse::from_result(
                self.get_collection_files(&args.collection_name),
            ),
            ToolCall::ListFiles(args) => ToolResponse::from_result(
                self.list_files(
                    args.directory.as_deref().unwrap_or_default(),
                    args.pattern.as_deref().unwrap_or("*"),
                ),
            ),
            ToolCall::ReadFile(args) => {
                ToolResponse::from_result(self.read_file(&args.file_path))
            }
            ToolCall::ListTags => ToolResponse::from_result(self.list_tags()),
            ToolCall::ListCollections => {
                ToolResponse::from_result(self.list_collections())
            }
        };
        if let ToolResponse::Error { error_message, .. } = &response {
            tracing::warn!(%tool, error = %error_message, "tool failed");
        }
        response
    }

    /// Validate a sandbox-relative path and return its store key.
    fn file_key(&self, file_path: &str) -> Result<String> {
        self.sandbox.resolve(file_path)?;
        let key = path_key(Path::new(file_path));
        if key.is_empty() {
            return Err(Error::Validation("file path must not be empty".into()));
        }
        Ok(key)
    }

    /// Like [`Self::file_key`], but the file must exist.
    fn existing_file_key(&self, file_path: &str) -> Result<String> {
        let key = self.file_key(file_path)?;
        self.sandbox.resolve_file(&key)?;
        Ok(key)
    }

    pub fn search_files(
        &self,
        args: SearchFilesArgs,
    ) -> Result<SearchFilesOutput> {
        let params = SearchParams {
            query: args.query.clone(),
            tags: args.tags.clone(),
            top_k: args.top_k,
        };
        let results = search::combined_search(
            &self.memory,
            &self.vectors,
            &params,
            self.ranking,
        )?;
        Ok(SearchFilesOutput {
            query: args.query,
            tags: args.tags,
            count: results.len(),
            results,
        })
    }

    pub async fn suggest_tags(
        &self,
        file_path: &str,
    ) -> Result<SuggestTagsOutput> {
        let llm = self.llm.as_ref().ok_or_else(|| {
            Error::Validation("language model not configured".into())
        })?;
        let key = self.existing_file_key(file_path)?;
        let processed =
            self.processor.process(&self.sandbox.resolve(&key)?, true)?;
        let content = processed.non_empty_text().ok_or_else(|| {
            Error::Validation(format!("{key} has no readable text"))
        })?;
        let existing = self.memory.get_all_tags()?;
        let suggested_tags =
            llm::suggest_tags(llm.as_ref(), &key, content, &existing).await?;
        Ok(SuggestTagsOutput {
            file_path: key,
            suggested_tags,
        })
    }

    pub fn apply_tags(
        &self,
        file_path: &str,
        tags: &[String],
    ) -> Result<ApplyTagsOutput> {
        if tags.is_empty() {
            return Err(Error::Validation(
                "at least one tag is required".into(),
            ));
        }
        let key = self.existing_file_key(file_path)?;
        let applied = self.memory.tag_file_many(&key, tags)?;
        let tags = self.memory.get_file_tags(&key)?;
        Ok(ApplyTagsOutput {
            file_path: key,
            applied,
            tags,
        })
    }

    pub fn get_file_tags(&self, file_path: &str) -> Result<FileTagsOutput> {
        let key = self.file_key(file_path)?;
        let tags = self.memory.get_file_tags(&key)?;
        Ok(FileTagsOutput {
            file_path: key,
            tags,
        })
    }

    /// Remove one tag from a file; the file need not exist anymore.
    pub fn remove_tag(
        &self,
        file_path: &str,
        tag: &str,
    ) -> Result<RemoveTagOutput> {
        let key = self.file_key(file_path)?;
        let removed = self.memory.untag_file(&key, tag)?;
        let tags = self.memory.get_file_tags(&key)?;
        Ok(RemoveTagOutput {
            file_path: key,
            removed,
            tags,
        })
    }

    pub fn create_collection(
        &self,
        name: &str,
        description: &str,
    ) -> Result<CollectionOutput> {
        let collection = self.memory.create_collection(name, description)?;
        Ok(CollectionOutput { collection })
    }

    pub fn add_to_collection(
        &self,
        collection_name: &str,
        file_paths: &[String],
    ) -> Result<AddToCollectionOutput> {
        let collection_name = collection_name.trim();
        if file_paths.is_empty() {
            return Err(Error::Validation(
                "at least one file path is required".into(),
            ));
        }
        let keys = file_paths
            .iter()
            .map(|p| self.existing_file_key(p))
            .collect::<Result<Vec<_>>>()?;
        self.memory.add_files_to_collection(collection_name, &keys)?;
        let file_count =
            self.memory.get_collection_files(collection_name)?.len();
        Ok(AddToCollectionOutput {
            collection_name: collection_name.to_string(),
            added: keys,
            file_count,
        })
    }

    pub fn get_collection_files(
        &self,
        collection_name: &str,
    ) -> Result<CollectionFilesOutput> {
        let collection_name = collection_name.trim();
        let files = self.memory.get_collection_files(collection_name)?;
        Ok(CollectionFilesOutput {
            collection_name: collection_name.to_string(),
            count: files.len(),
            files,
        })
    }

    pub fn list_files(
        &self,
        directory: &str,
        pattern: &str,
    ) -> Result<ListFilesOutput> {
        let dir = self.sandbox.resolve(directory)?;
        if !dir.is_dir() {
            return Err(Error::not_found("directory", directory));
        }
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::Validation(format!("invalid pattern: {e}")))?
            .compile_matcher();
        let match_full_path = pattern.contains('/');

        let mut files = Vec::new();
        for file in discover_files(&dir)? {
            let matched = if match_full_path {
                matcher.is_match(&file.relative_path)
            } else {
                file.relative_path
                    .file_name()
                    .is_some_and(|name| matcher.is_match(name))
            };
            if !matched {
                continue;
            }
            let size = std::fs::metadata(&file.absolute_path)?.len();
            let relative = Path::new(directory).join(&file.relative_path);
            files.push(ListedFile {
                path: path_key(&relative),
                name: file
                    .relative_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                size,
                category: FileCategory::of(&file.relative_path),
            });
        }

        Ok(ListFilesOutput {
            directory: directory.to_string(),
            pattern: pattern.to_string(),
            count: files.len(),
            files,
        })
    }

    pub fn read_file(&self, file_path: &str) -> Result<ReadFileOutput> {
        let key = self.existing_file_key(file_path)?;
        let processed =
            self.processor.process(&self.sandbox.resolve(&key)?, true)?;
        Ok(ReadFileOutput {
            file_path: key,
            file_name: processed.file_name,
            file_type: processed.file_type,
            category: processed.category,
            file_size: processed.file_size,
            modified_at: processed.modified_at,
            content: processed.text,
        })
    }

    pub fn list_tags(&self) -> Result<ListTagsOutput> {
        let tags = self.memory.get_all_tags()?;
        Ok(ListTagsOutput {
            count: tags.len(),
            tags,
        })
    }

    pub fn list_collections(&self) -> Result<ListCollectionsOutput> {
        let collections = self.memory.get_all_collections()?;
        Ok(ListCollectionsOutput {
            count: collections.len(),
            collections,
        })
    }
}

impl fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolbox")
            .field("sandbox", &self.sandbox)
            .field("ranking", &self.ranking)
            .field("llm", &self.llm.as_ref().map(|l| l.model().to_string()))
            .finish_non_exhaustive()
    }
}
