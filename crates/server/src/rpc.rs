//! JSON-RPC 2.0 tool endpoint for machine callers.
//!
//! One POST endpoint, three methods: `initialize`, `tools/list`,
//! `tools/call`. Tool results are wrapped as
//! `{content: [{type: "text", text: <stringified JSON>}], isError?}` so
//! agent frameworks can consume them uniformly.

use axum::extract::State;
use axum::Json;
use serde_json::{Value, json};

use revline_backend::DiffSide;
use revline_core::ServiceError;
use revline_engine::Engine;
use revline_engine::session::AddComment;
use revline_git_cli::ops;

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// POST /mcp
pub async fn handle(State(engine): State<Engine>, body: String) -> Json<Value> {
    let Ok(request) = serde_json::from_str::<Value>(&body) else {
        return Json(rpc_error(Value::Null, PARSE_ERROR, "Parse error"));
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Json(rpc_error(id, INVALID_REQUEST, "Invalid Request"));
    }
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return Json(rpc_error(id, INVALID_REQUEST, "Invalid Request"));
    };
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

    let response = match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": { "name": "revline", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {} },
            }),
        ),
        "tools/list" => rpc_result(id, json!({ "tools": tool_definitions() })),
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Json(rpc_error(id, INVALID_PARAMS, "tool name is required"));
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            match call_tool(&engine, name, &arguments).await {
                Ok(result) => rpc_result(
                    id,
                    json!({ "content": [{ "type": "text", "text": result.to_string() }] }),
                ),
                Err(ToolError::UnknownTool) => {
                    rpc_error(id, INVALID_PARAMS, &format!("unknown tool: {name}"))
                }
                Err(ToolError::BadParams(msg)) => rpc_error(id, INVALID_PARAMS, &msg),
                Err(ToolError::Service(e)) => {
                    if matches!(e, ServiceError::Internal(_)) {
                        tracing::error!("tool {name}: {e}");
                        rpc_error(id, INTERNAL_ERROR, "Internal error")
                    } else {
                        // Domain failures come back as tool output, not
                        // protocol errors, so agents can read them.
                        rpc_result(
                            id,
                            json!({
                                "content": [{ "type": "text",
                                    "text": json!({ "error": e.message(), "code": e.code() }).to_string() }],
                                "isError": true,
                            }),
                        )
                    }
                }
            }
        }
        _ => rpc_error(id, METHOD_NOT_FOUND, "Method not found"),
    };
    Json(response)
}

enum ToolError {
    UnknownTool,
    BadParams(String),
    Service(ServiceError),
}

impl From<ServiceError> for ToolError {
    fn from(e: ServiceError) -> Self {
        Self::Service(e)
    }
}

fn req_str(args: &Value, key: &str) -> Result<String, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ToolError::BadParams(format!("{key} is required")))
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(String::from)
}

fn req_str_list(args: &Value, key: &str) -> Result<Vec<String>, ToolError> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .ok_or_else(|| ToolError::BadParams(format!("{key} is required")))
}

async fn call_tool(engine: &Engine, name: &str, args: &Value) -> Result<Value, ToolError> {
    match name {
        "list_sessions" => {
            let sessions = engine.list_sessions()?;
            Ok(json!({ "sessions": sessions }))
        }
        "get_or_create_session" => {
            let row = match (opt_str(args, "repo_path"), opt_str(args, "pr")) {
                (Some(path), None) => engine.get_or_create_local(
                    std::path::Path::new(&path),
                    opt_str(args, "target_branch"),
                )?,
                (None, Some(pr)) => {
                    engine.get_or_create_hosted(&pr, opt_str(args, "auth_token_ref"))?
                }
                _ => {
                    return Err(ToolError::BadParams(
                        "exactly one of repo_path or pr is required".into(),
                    ));
                }
            };
            Ok(json!({ "session": engine.session_view(&row)? }))
        }
        "register_files" => {
            let session_id = req_str(args, "session_id")?;
            let paths = req_str_list(args, "paths")?;
            let agent_id = req_str(args, "agent_id")?;
            let added = engine.register_files(&session_id, &paths, &agent_id)?;
            Ok(json!({ "registered": added }))
        }
        "unregister_files" => {
            let session_id = req_str(args, "session_id")?;
            let paths = req_str_list(args, "paths")?;
            let agent_id = req_str(args, "agent_id")?;
            let removed = engine.unregister_files(&session_id, &paths, &agent_id)?;
            Ok(json!({ "unregistered": removed }))
        }
        "get_review_state" => {
            let session = engine.session(&req_str(args, "session_id")?)?;
            let state = engine.review_state(&session).await?;
            Ok(serde_json::to_value(state).map_err(|e| ServiceError::Internal(e.to_string()))?)
        }
        "get_pending_feedback" => {
            let session = engine.session(&req_str(args, "session_id")?)?;
            let pending = engine.pending_feedback(&session).await?;
            Ok(json!({ "pending": pending }))
        }
        "add_comment" => {
            let session_id = req_str(args, "session_id")?;
            let text = req_str(args, "text")?;
            let author = req_str(args, "author")?;
            let row = engine
                .add_comment(
                    &session_id,
                    AddComment {
                        file: opt_str(args, "file"),
                        line: args.get("line").and_then(Value::as_i64),
                        side: opt_str(args, "side"),
                        text,
                        author,
                        parent_id: opt_str(args, "parent_id"),
                        line_content: opt_str(args, "line_content"),
                        context_before: None,
                        context_after: None,
                    },
                )
                .await?;
            Ok(json!({ "comment": { "id": row.id, "file": row.file, "line": row.line } }))
        }
        "resolve_comment" | "unresolve_comment" => {
            let comment_id = req_str(args, "comment_id")?;
            let resolved = name == "resolve_comment";
            match opt_str(args, "session_id") {
                Some(session_id) => {
                    engine
                        .set_resolved_in_session(&session_id, &comment_id, resolved)
                        .await?
                }
                None => engine.set_resolved(&comment_id, resolved).await?,
            }
            Ok(json!({ "ok": true, "resolved": resolved }))
        }
        "submit_review" => {
            let session = engine.session(&req_str(args, "session_id")?)?;
            let repo = match &session.backend {
                revline_core::BackendKind::Local { repo_path, .. } => repo_path.clone(),
                _ => {
                    return Err(ToolError::BadParams(
                        "submit_review requires a local session".into(),
                    ));
                }
            };
            let client = std::env::var(revline_core::config::ENV_DEFAULT_API_TOKEN)
                .ok()
                .map(|token| engine.github_client(&token));
            let outcome = revline_backend::publish::submit_review(
                &repo,
                opt_str(args, "remote").as_deref().unwrap_or("origin"),
                &engine.config.push_whitelist,
                client.as_ref(),
                &session.target_branch,
                opt_str(args, "title").as_deref().unwrap_or(""),
                opt_str(args, "body").as_deref().unwrap_or(""),
            )
            .await?;
            Ok(serde_json::to_value(outcome).map_err(|e| ServiceError::Internal(e.to_string()))?)
        }
        "get_context" => {
            let session = engine.session(&req_str(args, "session_id")?)?;
            let file = crate::routes::guard_path(&session, &req_str(args, "file")?)
                .map_err(|e| ToolError::BadParams(e.0.message()))?;
            let from = args.get("from").and_then(Value::as_u64).unwrap_or(1) as u32;
            let to = args
                .get("to")
                .and_then(Value::as_u64)
                .ok_or_else(|| ToolError::BadParams("to is required".into()))?
                as u32;
            if from > to {
                return Err(ToolError::BadParams("from must be <= to".into()));
            }
            let backend = engine.backend_for(&session)?;
            let content = backend
                .file_content(&file, DiffSide::Head, None)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("file {file} not found")))?;
            let snippet = revline_backend::extract_lines(&content, from.max(1), to);
            Ok(json!({ "file": file, "from": from.max(1), "to": to, "content": snippet }))
        }
        "list_directory" => {
            let session = engine.session(&req_str(args, "session_id")?)?;
            let rel = opt_str(args, "path").unwrap_or_default();
            let repo = match &session.backend {
                revline_core::BackendKind::Local { repo_path, .. } => repo_path.clone(),
                _ => {
                    return Err(ToolError::BadParams(
                        "list_directory requires a local session".into(),
                    ));
                }
            };
            let dir = if rel.is_empty() {
                repo
            } else {
                ops::resolve_in_repo(&repo, &rel)
                    .ok_or_else(|| ToolError::BadParams("path traversal rejected".into()))?
            };
            let mut entries = Vec::new();
            if let Ok(read) = std::fs::read_dir(&dir) {
                for entry in read.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                    entries.push(json!({ "name": name, "dir": is_dir }));
                }
            }
            entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
            Ok(json!({ "path": rel, "entries": entries }))
        }
        "get_file_content" => {
            let session = engine.session(&req_str(args, "session_id")?)?;
            let file = crate::routes::guard_path(&session, &req_str(args, "file")?)
                .map_err(|e| ToolError::BadParams(e.0.message()))?;
            let side = match opt_str(args, "side").as_deref() {
                Some("base") => DiffSide::Base,
                _ => DiffSide::Head,
            };
            let backend = engine.backend_for(&session)?;
            let content = backend.file_content(&file, side, None).await?;
            Ok(json!({ "file": file, "content": content }))
        }
        "get_history" => {
            let session = engine.session(&req_str(args, "session_id")?)?;
            let repo = match &session.backend {
                revline_core::BackendKind::Local { repo_path, .. } => repo_path.clone(),
                _ => {
                    return Err(ToolError::BadParams(
                        "get_history requires a local session".into(),
                    ));
                }
            };
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(20) as u32;
            Ok(json!({ "commits": ops::log_entries(&repo, limit) }))
        }
        _ => Err(ToolError::UnknownTool),
    }
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

fn tool_definitions() -> Vec<Value> {
    let session_id = json!({ "type": "string", "description": "Review session id" });
    vec![
        json!({
            "name": "list_sessions",
            "description": "List all review sessions",
            "inputSchema": schema(json!({}), &[]),
        }),
        json!({
            "name": "get_or_create_session",
            "description": "Get or create a review session for a repo path or PR reference",
            "inputSchema": schema(json!({
                "repo_path": { "type": "string" },
                "target_branch": { "type": "string" },
                "pr": { "type": "string", "description": "PR reference (URL, owner/repo#N, owner/repo/pull/N)" },
            }), &[]),
        }),
        json!({
            "name": "register_files",
            "description": "Register files into the review on behalf of an agent",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "paths": { "type": "array", "items": { "type": "string" } },
                "agent_id": { "type": "string" },
            }), &["session_id", "paths", "agent_id"]),
        }),
        json!({
            "name": "unregister_files",
            "description": "Unregister files previously registered by the same agent",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "paths": { "type": "array", "items": { "type": "string" } },
                "agent_id": { "type": "string" },
            }), &["session_id", "paths", "agent_id"]),
        }),
        json!({
            "name": "get_review_state",
            "description": "Full review snapshot: files, diff, threads, staleness",
            "inputSchema": schema(json!({ "session_id": session_id }), &["session_id"]),
        }),
        json!({
            "name": "get_pending_feedback",
            "description": "Unresolved comment threads grouped by file",
            "inputSchema": schema(json!({ "session_id": session_id }), &["session_id"]),
        }),
        json!({
            "name": "add_comment",
            "description": "Add a line comment or a reply (replies inherit file/line from the parent)",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "text": { "type": "string" },
                "author": { "type": "string" },
                "file": { "type": "string" },
                "line": { "type": "integer" },
                "side": { "type": "string", "enum": ["new", "old"] },
                "parent_id": { "type": "string" },
                "line_content": { "type": "string" },
            }), &["session_id", "text", "author"]),
        }),
        json!({
            "name": "resolve_comment",
            "description": "Mark a comment thread resolved",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "comment_id": { "type": "string" },
            }), &["comment_id"]),
        }),
        json!({
            "name": "unresolve_comment",
            "description": "Reopen a resolved comment thread",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "comment_id": { "type": "string" },
            }), &["comment_id"]),
        }),
        json!({
            "name": "submit_review",
            "description": "Push the current branch through the permission gate and ensure a PR",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "title": { "type": "string" },
                "body": { "type": "string" },
                "remote": { "type": "string" },
            }), &["session_id"]),
        }),
        json!({
            "name": "get_context",
            "description": "Lines from..to of a file (1-indexed, clamped)",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "file": { "type": "string" },
                "from": { "type": "integer" },
                "to": { "type": "integer" },
            }), &["session_id", "file", "to"]),
        }),
        json!({
            "name": "list_directory",
            "description": "List a directory inside the session's repository",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "path": { "type": "string" },
            }), &["session_id"]),
        }),
        json!({
            "name": "get_file_content",
            "description": "Full file content from the base or head side",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "file": { "type": "string" },
                "side": { "type": "string", "enum": ["base", "head"] },
            }), &["session_id", "file"]),
        }),
        json!({
            "name": "get_history",
            "description": "Recent commits of the session's repository",
            "inputSchema": schema(json!({
                "session_id": session_id,
                "limit": { "type": "integer" },
            }), &["session_id"]),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use revline_core::ServerConfig;
    use revline_git_cli::test_utils::{init_test_repo, write_file};
    use revline_store::Db;

    fn engine() -> Engine {
        Engine::new(Db::open_in_memory().unwrap(), ServerConfig::default())
    }

    async fn call(engine: &Engine, body: serde_json::Value) -> Value {
        handle(State(engine.clone()), body.to_string()).await.0
    }

    #[tokio::test]
    async fn unknown_method_is_32601() {
        let resp = call(
            &engine(),
            json!({ "jsonrpc": "2.0", "id": 7, "method": "x" }),
        )
        .await;
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(resp["error"]["message"], "Method not found");
    }

    #[tokio::test]
    async fn parse_and_invalid_request_errors() {
        let resp = handle(State(engine()), "{not json".to_string()).await.0;
        assert_eq!(resp["error"]["code"], PARSE_ERROR);
        assert_eq!(resp["id"], Value::Null);

        let resp = call(&engine(), json!({ "id": 1, "method": "initialize" })).await;
        assert_eq!(resp["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn initialize_and_tools_list() {
        let resp = call(
            &engine(),
            json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }),
        )
        .await;
        assert_eq!(resp["result"]["serverInfo"]["name"], "revline");

        let resp = call(
            &engine(),
            json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
        )
        .await;
        let tools = resp["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        for expected in [
            "list_sessions",
            "get_or_create_session",
            "register_files",
            "unregister_files",
            "get_review_state",
            "get_pending_feedback",
            "add_comment",
            "resolve_comment",
            "unresolve_comment",
            "submit_review",
            "get_context",
            "list_directory",
            "get_file_content",
            "get_history",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn tools_call_validates_params() {
        let resp = call(
            &engine(),
            json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                    "params": { "name": "register_files", "arguments": { "paths": ["a"] } } }),
        )
        .await;
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);

        let resp = call(
            &engine(),
            json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                    "params": { "name": "no_such_tool" } }),
        )
        .await;
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn session_and_comment_flow_through_tools() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        write_file(tmp.path(), "README.md", "hello\nworld\nhi\n");
        let engine = engine();

        let resp = call(
            &engine,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": { "name": "get_or_create_session",
                                "arguments": { "repo_path": tmp.path() } } }),
        )
        .await;
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let session: Value = serde_json::from_str(text).unwrap();
        let sid = session["session"]["id"].as_str().unwrap().to_string();
        assert_eq!(sid.len(), 64);

        let resp = call(
            &engine,
            json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                    "params": { "name": "register_files",
                                "arguments": { "session_id": sid, "paths": ["docs/spec.txt"],
                                               "agent_id": "bot" } } }),
        )
        .await;
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["registered"][0], "docs/spec.txt");

        let resp = call(
            &engine,
            json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                    "params": { "name": "add_comment",
                                "arguments": { "session_id": sid, "text": "why?", "author": "u",
                                               "file": "README.md", "line": 3,
                                               "line_content": "hi" } } }),
        )
        .await;
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let comment: Value = serde_json::from_str(text).unwrap();
        assert_eq!(comment["comment"]["line"], 3);

        // a domain failure is a tool result, not a protocol error
        let resp = call(
            &engine,
            json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/call",
                    "params": { "name": "get_review_state",
                                "arguments": { "session_id": "missing" } } }),
        )
        .await;
        assert_eq!(resp["result"]["isError"], true);
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("not_found"));
    }

    #[tokio::test]
    async fn get_context_and_history_tools() {
        let tmp = tempfile::tempdir().unwrap();
        init_test_repo(tmp.path());
        let engine = engine();
        let session = engine.get_or_create_local(tmp.path(), None).unwrap();

        let resp = call(
            &engine,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                    "params": { "name": "get_context",
                                "arguments": { "session_id": session.id, "file": "README.md",
                                               "from": 1, "to": 99 } } }),
        )
        .await;
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let ctx: Value = serde_json::from_str(text).unwrap();
        assert_eq!(ctx["content"], "hello\nworld");

        let resp = call(
            &engine,
            json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                    "params": { "name": "get_history",
                                "arguments": { "session_id": session.id } } }),
        )
        .await;
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        let hist: Value = serde_json::from_str(text).unwrap();
        assert_eq!(hist["commits"][0]["subject"], "initial");

        // traversal is rejected at the tool boundary too
        let resp = call(
            &engine,
            json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/call",
                    "params": { "name": "get_file_content",
                                "arguments": { "session_id": session.id,
                                               "file": "../../etc/passwd" } } }),
        )
        .await;
        assert_eq!(resp["error"]["code"], INVALID_PARAMS);
    }
}
