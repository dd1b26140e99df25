//! MCP tools endpoint for the MAKER orchestrator.
//!
//! Exposes the code service (C3) over `tools/list`/`tools/call` on stdio —
//! the one wire surface from the orchestrator that is itself part of the
//! core, rather than an external collaborator reached over HTTP. A
//! `.maker.json` permissions layer (project + global) gates which tools a
//! given client may call.
//!
//! ```bash
//! maker-orchestrator
//! maker-orchestrator --workspace /path/to/project
//! ```

use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::Result;
use clap::Parser;
use rmcp::{
    handler::server::wrapper::Parameters,
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_router, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use tokio::io::{stdin, stdout};

use maker_orchestrator::code_service::CodeService;
use maker_orchestrator::config;
use maker_orchestrator::graph::CodeGraph;
use maker_orchestrator::kv::{KvStore, RocksDbBackend};
use maker_orchestrator::permissions::ToolPermissions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Project root the code service operates over (defaults to the current directory)
    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ReadFileRequest {
    #[schemars(description = "Path to the file, relative to the workspace root")]
    path: String,
    #[schemars(description = "Return tree-sitter/line chunks instead of the full file body")]
    chunked: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct PathRequest {
    #[schemars(description = "Path, relative to the workspace root")]
    path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SearchDocsRequest {
    #[schemars(description = "Case-insensitive substring to search for in README.md and docs/*.md")]
    query: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct SymbolRequest {
    #[schemars(description = "Fully- or partially-qualified symbol name")]
    symbol: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GitDiffRequest {
    #[schemars(description = "Restrict the diff to a single file, relative to the workspace root")]
    file: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RunTestsRequest {
    #[schemars(description = "Restrict the test run to a single test file")]
    test_file: Option<String>,
}

/// The MCP tool surface, one tool per [`CodeService`] operation.
struct CodeServiceTools {
    code_service: CodeService,
    /// Loaded from the KV-persisted snapshot (`code_graph:state`, see
    /// `graph::CodeGraph::persist`/`load`) at startup; populated further by
    /// an indexing pass elsewhere in the orchestrator. Absent here just
    /// means `find_callers`/`impact_analysis` report a diagnostic instead of
    /// failing the call.
    graph: RwLock<Option<CodeGraph>>,
    permissions: ToolPermissions,
}

impl CodeServiceTools {
    fn new(workspace: PathBuf, graph_kv: &KvStore) -> Result<Self> {
        let permissions = ToolPermissions::load(&workspace);
        let graph = CodeGraph::load(graph_kv)?;
        if graph.is_some() {
            tracing::info!("loaded persisted code graph");
        }
        Ok(Self { code_service: CodeService::new(workspace), graph: RwLock::new(graph), permissions })
    }

    fn check(&self, tool: &str) -> Result<(), String> {
        if self.permissions.is_allowed(tool) {
            Ok(())
        } else {
            Err(format!("tool '{tool}' is blocked by this workspace's .maker.json permissions"))
        }
    }
}

#[tool_router]
impl CodeServiceTools {
    #[tool(description = "Read a file's contents, optionally as AST-aware chunks for large files")]
    async fn read_file(&self, Parameters(req): Parameters<ReadFileRequest>) -> Result<String, String> {
        self.check("read_file")?;
        let result = self
            .code_service
            .read_file(&req.path, req.chunked.unwrap_or(false))
            .map_err(|e| e.format_for_user())?;
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    }

    #[tool(description = "Analyze one file: language, size, line count, and extracted dependencies")]
    async fn analyze_file(&self, Parameters(req): Parameters<PathRequest>) -> Result<String, String> {
        self.check("analyze_file")?;
        let result = self.code_service.analyze_file(&req.path).map_err(|e| e.format_for_user())?;
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    }

    #[tool(description = "Analyze the whole codebase: file/language counts, directories, total LOC, dependencies")]
    async fn analyze_codebase(&self) -> Result<String, String> {
        self.check("analyze_codebase")?;
        let result = self.code_service.analyze_codebase().map_err(|e| e.format_for_user())?;
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    }

    #[tool(description = "Search README.md and docs/*.md for a substring, case-insensitively")]
    async fn search_docs(&self, Parameters(req): Parameters<SearchDocsRequest>) -> Result<String, String> {
        self.check("search_docs")?;
        let result = self.code_service.search_docs(&req.query).map_err(|e| e.format_for_user())?;
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    }

    #[tool(description = "Find where a symbol is defined and referenced across the codebase")]
    async fn find_references(&self, Parameters(req): Parameters<SymbolRequest>) -> Result<String, String> {
        self.check("find_references")?;
        let result = self.code_service.find_references(&req.symbol).map_err(|e| e.format_for_user())?;
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    }

    #[tool(description = "List callers of a symbol, using the in-memory call graph if one has been built")]
    async fn find_callers(&self, Parameters(req): Parameters<SymbolRequest>) -> Result<String, String> {
        self.check("find_callers")?;
        let graph = self.graph.read().map_err(|_| "call graph lock poisoned".to_string())?;
        let callers = self.code_service.find_callers(graph.as_ref(), &req.symbol);
        serde_json::to_string_pretty(&callers).map_err(|e| e.to_string())
    }

    #[tool(description = "List every symbol transitively reachable from a change to the given symbol")]
    async fn impact_analysis(&self, Parameters(req): Parameters<SymbolRequest>) -> Result<String, String> {
        self.check("impact_analysis")?;
        let graph = self.graph.read().map_err(|_| "call graph lock poisoned".to_string())?;
        let impacted = self.code_service.impact_analysis(graph.as_ref(), &req.symbol);
        serde_json::to_string_pretty(&impacted).map_err(|e| e.to_string())
    }

    #[tool(description = "Show `git diff`, optionally scoped to a single file")]
    async fn git_diff(&self, Parameters(req): Parameters<GitDiffRequest>) -> Result<String, String> {
        self.check("git_diff")?;
        let result = self.code_service.git_diff(req.file.as_deref()).map_err(|e| e.format_for_user())?;
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    }

    #[tool(description = "Run the project's test suite (pytest, falling back to unittest)")]
    async fn run_tests(&self, Parameters(req): Parameters<RunTestsRequest>) -> Result<String, String> {
        self.check("run_tests")?;
        let result = self.code_service.run_tests(req.test_file.as_deref()).map_err(|e| e.format_for_user())?;
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
    }
}

impl ServerHandler for CodeServiceTools {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Code service tools for the MAKER orchestrator: read_file, analyze_file, \
                 analyze_codebase, search_docs, find_references, find_callers, impact_analysis, \
                 git_diff, run_tests. Tool availability is gated by this workspace's .maker.json \
                 allow/block lists."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("maker_orchestrator=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let workspace = args.workspace.unwrap_or_else(|| PathBuf::from("."));
    let loaded = config::load_config(&workspace)?;
    tracing::info!(workspace = %workspace.display(), log_level = %loaded.log_level, "starting MCP tools endpoint");

    let kv_backend = std::sync::Arc::new(RocksDbBackend::open(workspace.join(&loaded.kv_path))?);
    let graph_kv = KvStore::new(kv_backend, "maker");

    let server = CodeServiceTools::new(workspace, &graph_kv)?;
    let transport = (stdin(), stdout());
    let service = server.serve(transport).await?;
    service.waiting().await?;

    Ok(())
}
