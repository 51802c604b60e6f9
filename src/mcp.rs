use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};

use crate::{
    concierge::Concierge,
    error,
    tools::{
        AddToCollectionArgs,
        ApplyTagsArgs,
        CollectionNameArgs,
        CreateCollectionArgs,
        FilePathArgs,
        ListFilesArgs,
        SearchFilesArgs,
        ToolCall,
        ToolName,
        ToolResponse,
        Toolbox,
    },
};

/// Exposes the concierge tools over MCP.
///
/// Every tool answers with the same `status` payload the language model
/// sees, both as structured content and as JSON text.
#[derive(Clone)]
pub struct ConciergeMcpServer {
    toolbox: Toolbox,
    tool_router: ToolRouter<Self>,
}

impl ConciergeMcpServer {
    pub fn new(toolbox: Toolbox) -> Self {
        let mut tool_router = Self::tool_router();
        // Same descriptions as the orchestrator's tool declarations.
        for name in ToolName::ALL {
            if let Some(route) = tool_router.map.get_mut(name.as_str()) {
                route.attr.description = Some(name.description().into());
            }
        }
        Self {
            toolbox,
            tool_router,
        }
    }

    async fn run(
        &self,
        call: ToolCall,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        Ok(to_call_result(self.toolbox.execute(call).await))
    }
}

fn to_call_result(response: ToolResponse) -> CallToolResult {
    let value = response.to_value();
    let mut result = CallToolResult::default();
    result.content = vec![Content::text(value.to_string())];
    result.structured_content = Some(value);
    result.is_error = Some(!response.is_success());
    result.meta = None;
    result
}

#[tool_router(router = tool_router)]
impl ConciergeMcpServer {
    #[tool(name = "search_files")]
    pub async fn search_files(
        &self,
        params: Parameters<SearchFilesArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::SearchFiles(params.0)).await
    }

    #[tool(name = "suggest_tags")]
    pub async fn suggest_tags(
        &self,
        params: Parameters<FilePathArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::SuggestTags(params.0)).await
    }

    #[tool(name = "apply_tags")]
    pub async fn apply_tags(
        &self,
        params: Parameters<ApplyTagsArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::ApplyTags(params.0)).await
    }

    #[tool(name = "get_file_tags")]
    pub async fn get_file_tags(
        &self,
        params: Parameters<FilePathArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::GetFileTags(params.0)).await
    }

    #[tool(name = "create_collection")]
    pub async fn create_collection(
        &self,
        params: Parameters<CreateCollectionArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::CreateCollection(params.0)).await
    }

    #[tool(name = "add_to_collection")]
    pub async fn add_to_collection(
        &self,
        params: Parameters<AddToCollectionArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::AddToCollection(params.0)).await
    }

    #[tool(name = "get_collection_files")]
    pub async fn get_collection_files(
        &self,
        params: Parameters<CollectionNameArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::GetCollectionFiles(params.0)).await
    }

    #[tool(name = "list_files")]
    pub async fn list_files(
        &self,
        params: Parameters<ListFilesArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::ListFiles(params.0)).await
    }

    #[tool(name = "read_file")]
    pub async fn read_file(
        &self,
        params: Parameters<FilePathArgs>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::ReadFile(params.0)).await
    }

    #[tool(name = "list_tags")]
    pub async fn list_tags(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::ListTags).await
    }

    #[tool(name = "list_collections")]
    pub async fn list_collections(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.run(ToolCall::ListCollections).await
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ConciergeMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::new(
            "file-concierge",
            env!("CARGO_PKG_VERSION"),
        );
        server_info.title = Some("file-concierge MCP".to_string());
        server_info.icons = None;
        server_info.website_url = None;

        let mut info =
            ServerInfo::new(ServerCapabilities::builder().enable_tools().build());
        info.server_info = server_info;
        info.instructions = Some(
            "Paths are relative to the sandbox root. Use search_files to \
             find files by meaning or tags, read_file to inspect them, \
             and apply_tags or add_to_collection to organize them."
                .to_string(),
        );
        info
    }
}

pub fn run_mcp(concierge: Concierge) -> error::Result<()> {
    let server = ConciergeMcpServer::new(concierge.toolbox());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        embedding::HashedEmbedder,
        memory::LongTermMemory,
        processor::FileProcessor,
        sandbox::Sandbox,
        search::RankingWeights,
        vector_store::VectorStore,
    };

    fn server(tmp: &std::path::Path) -> ConciergeMcpServer {
        let sandbox = Sandbox::new(tmp.join("sandbox"));
        sandbox.bootstrap().unwrap();
        std::fs::write(sandbox.root().join("notes/plan.md"), "weekly plan")
            .unwrap();
        let toolbox = Toolbox::new(
            Arc::new(LongTermMemory::open(&tmp.join("memory.redb")).unwrap()),
            Arc::new(
                VectorStore::open(
                    &tmp.join("vectors.redb"),
                    Box::new(HashedEmbedder::default()),
                )
                .unwrap(),
            ),
            sandbox,
            FileProcessor::default(),
            RankingWeights::default(),
        );
        ConciergeMcpServer::new(toolbox)
    }

    #[tokio::test]
    async fn apply_tags_returns_structured_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path());

        let result = server
            .apply_tags(Parameters(ApplyTagsArgs {
                file_path: "notes/plan.md".into(),
                tags: vec!["Planning".into()],
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(false));
        let structured = result.structured_content.expect("structured");
        assert_eq!(structured["status"], "success");
        assert_eq!(structured["tags"], serde_json::json!(["planning"]));

        let result = server.list_tags().await.unwrap();
        assert_eq!(result.structured_content.unwrap()["count"], 1);
    }

    #[tokio::test]
    async fn tool_errors_are_flagged() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path());

        let result = server
            .read_file(Parameters(FilePathArgs {
                file_path: "../outside.txt".into(),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        assert_eq!(
            result.structured_content.unwrap()["error_kind"],
            "validation"
        );
    }

    #[test]
    fn listed_tools_match_tool_names() {
        let tmp = tempfile::tempdir().unwrap();
        let tools = server(tmp.path()).tool_router.list_all();
        assert_eq!(tools.len(), ToolName::ALL.len());

        for name in ToolName::ALL {
            let tool = tools
                .iter()
                .find(|t| t.name == name.as_str())
                .unwrap_or_else(|| panic!("{} not listed", name.as_str()));
            assert_eq!(tool.description.as_deref(), Some(name.description()));
        }
    }

    #[test]
    fn server_info_enables_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let info = server(tmp.path()).get_info();
        assert!(info.capabilities.tools.is_some());
        assert_eq!(info.server_info.name, "file-concierge");
    }
}
