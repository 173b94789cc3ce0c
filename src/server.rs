use std::io::{self, BufRead, Write};
use std::sync::OnceLock;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::Config;
use crate::document::{MutationRequest, Outcome};
use crate::error::{StoreError, TreeError};
use crate::service::TreeService;
use crate::store::TreeStore;
use crate::xml::{self, Layout};

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0".into(), id: Some(id), result: Some(result), error: None }
    }
    fn err(id: Value, code: i64, message: String) -> Self {
        Self { jsonrpc: "2.0".into(), id: Some(id), result: None, error: Some(JsonRpcError { code, message }) }
    }
}

// ---------------------------------------------------------------------------
// Tool errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
enum ToolError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Arguments(String),
}

impl From<TreeError> for ToolError {
    fn from(e: TreeError) -> Self {
        Self::Store(StoreError::Tree(e))
    }
}

impl ToolError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Store(e) => e.kind(),
            Self::Arguments(_) => "InvalidArguments",
        }
    }
}

// ---------------------------------------------------------------------------
// MCP notifications
// ---------------------------------------------------------------------------

fn notification(level: &str, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": { "level": level, "logger": "orgtree-mcp", "data": message }
    })
}

fn tool_notification(name: &str, args: &Value) -> String {
    let id = args.get("id").map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let path = args.get("path").and_then(|v| v.as_str()).filter(|p| !p.is_empty());

    let mut msg = match name {
        "tree_list" => return "Listing trees".into(),
        "tree_get" => "Loading tree".to_string(),
        "tree_create" => return "Creating tree".into(),
        "tree_update" => "Replacing tree".to_string(),
        "tree_delete" => "Deleting tree".to_string(),
        "node_add" => "Adding node".to_string(),
        "node_remove" => "Removing node".to_string(),
        "node_report" => "Reporting subtree".to_string(),
        "xml_validate" => return "Validating XML".into(),
        _ => return format!("Running {name}"),
    };
    if let Some(p) = path {
        msg.push_str(&format!(" at {p}"));
    }
    if let Some(i) = id {
        msg.push_str(&format!(" in tree {i}"));
    }
    msg
}

// ---------------------------------------------------------------------------
// Tool definitions: computed once via OnceLock
// ---------------------------------------------------------------------------

static TOOL_DEFS: OnceLock<Value> = OnceLock::new();

fn tool_definitions() -> &'static Value {
    TOOL_DEFS.get_or_init(|| {
        let id_prop = json!({ "type": ["integer", "string"], "description": "Tree id as returned by tree_create or tree_list" });
        let path_prop = json!({
            "type": "string",
            "description": "Path below Root, e.g. /Dept[2]/Team or person[@id='1']/children. Omit for the root."
        });
        json!({
            "tools": [
                // ═══════════════════════════════════════════════════════════════
                // TREES: whole-document operations
                // ═══════════════════════════════════════════════════════════════
                {
                    "name": "tree_list",
                    "description": "List every stored tree (id, treeName, treeData), ordered by id.",
                    "inputSchema": { "type": "object", "properties": {} }
                },
                {
                    "name": "tree_get",
                    "description": "Fetch one stored tree by id.",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "id": id_prop },
                        "required": ["id"]
                    }
                },
                {
                    "name": "tree_create",
                    "description": concat!(
                        "Create a tree from a submission document.\n\n",
                        "INPUT: <AnyWrapper><TreeName>Acme</TreeName><Dept id=\"eng\"/>...</AnyWrapper>\n",
                        "STORED: <Root><Dept id=\"eng\"/>...</Root> named 'Acme'\n\n",
                        "The wrapper is discarded, TreeName becomes the name (default 'Unnamed Tree')."
                    ),
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "xml_data": { "type": "string", "description": "Inline submission XML" },
                            "xml_file": { "type": "string", "description": "Absolute path to submission XML file" }
                        }
                    }
                },
                {
                    "name": "tree_update",
                    "description": concat!(
                        "Replace a tree's whole body with a submission's elements under a new Root.\n",
                        "A TreeName element renames the tree."
                    ),
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "id": id_prop,
                            "xml_data": { "type": "string", "description": "Inline submission XML" },
                            "xml_file": { "type": "string", "description": "Absolute path to submission XML file" }
                        },
                        "required": ["id"]
                    }
                },
                {
                    "name": "tree_delete",
                    "description": "Delete a stored tree.",
                    "inputSchema": {
                        "type": "object",
                        "properties": { "id": id_prop },
                        "required": ["id"]
                    }
                },

                // ═══════════════════════════════════════════════════════════════
                // NODES: path-addressed graft, prune, report
                // ═══════════════════════════════════════════════════════════════
                {
                    "name": "node_add",
                    "description": concat!(
                        "Append a subtree as the last child of the node at a path.\n\n",
                        "EITHER request_xml: <NewNode parent=\"PATH\"><Team name=\"infra\"/></NewNode>\n",
                        "OR     path + node_xml\n\n",
                        "OUTPUT: updated tree body"
                    ),
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "id": id_prop,
                            "request_xml": { "type": "string", "description": "NewNode wrapper; parent attribute is the path" },
                            "path": path_prop,
                            "node_xml": { "type": "string", "description": "Single-root subtree to insert" }
                        },
                        "required": ["id"]
                    }
                },
                {
                    "name": "node_remove",
                    "description": concat!(
                        "Remove the node at a path together with its subtree. The root cannot be removed.\n\n",
                        "EITHER request_xml: <RemoveNode path=\"PATH\"/>\n",
                        "OR     path\n\n",
                        "OUTPUT: updated tree body"
                    ),
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "id": id_prop,
                            "request_xml": { "type": "string", "description": "RemoveNode wrapper; path attribute is the path" },
                            "path": path_prop
                        },
                        "required": ["id"]
                    }
                },
                {
                    "name": "node_report",
                    "description": "Serialize only the subtree at a path (the whole tree when path is omitted).",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "id": id_prop,
                            "path": path_prop,
                            "pretty": { "type": "boolean", "description": "Indent the output (default from server config)" }
                        },
                        "required": ["id"]
                    }
                },
                {
                    "name": "xml_validate",
                    "description": "Check that a text is a well-formed single-root XML document.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "xml_data": { "type": "string", "description": "Inline XML string" },
                            "xml_file": { "type": "string", "description": "Absolute path to XML file" }
                        }
                    }
                }
            ]
        })
    })
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn load_xml_str(args: &Value, data_key: &str, file_key: &str) -> Result<String, ToolError> {
    if let Some(s) = args.get(data_key).and_then(|v| v.as_str()) {
        Ok(s.to_string())
    } else if let Some(path) = args.get(file_key).and_then(|v| v.as_str()) {
        std::fs::read_to_string(path)
            .map_err(|e| ToolError::Arguments(format!("Cannot read '{file_key}' {path}: {e}")))
    } else {
        Err(ToolError::Arguments(format!(
            "Provide '{data_key}' (inline string) or '{file_key}' (absolute file path)."
        )))
    }
}

fn tree_id(args: &Value) -> Result<u64, ToolError> {
    let id = match args.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => return Err(ToolError::Arguments("Missing 'id'".into())),
    };
    id.ok_or_else(|| ToolError::Arguments("'id' must be a non-negative integer".into()))
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn text_result(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

fn error_result(err: &ToolError) -> Value {
    json!({
        "content": [{ "type": "text", "text": format!("{}: {err}", err.kind()) }],
        "isError": true
    })
}

fn json_result<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ToolError::Arguments(format!("Failed to serialize result: {e}")))?;
    Ok(text_result(&text))
}

fn validate_xml(xml: &str) -> Result<String, ToolError> {
    let root = xml::parse(xml)?;
    Ok(format!(
        "Valid XML. Root element: <{}> ({} attribute(s), {} child element(s))",
        root.name,
        root.attributes.len(),
        root.child_element_count()
    ))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server<S> {
    trees: TreeService<S>,
    config: Config,
    outbox: Vec<Value>,
}

impl<S: TreeStore> Server<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self { trees: TreeService::new(store), config, outbox: Vec::new() }
    }

    pub fn trees(&self) -> &TreeService<S> {
        &self.trees
    }

    /// Notifications queued while handling the last request.
    pub fn take_notifications(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.outbox)
    }

    fn handle_tool_call(&mut self, params: &Value) -> Result<Value, ToolError> {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let summary = tool_notification(name, &args);
        info!("{summary}");
        self.outbox.push(notification("info", &summary));

        match name {
            // --- Trees ---
            "tree_list" => json_result(&self.trees.list()?),

            "tree_get" => json_result(&self.trees.get(tree_id(&args)?)?),

            "tree_create" => {
                let xml = load_xml_str(&args, "xml_data", "xml_file")?;
                json_result(&self.trees.create(&xml)?)
            }

            "tree_update" => {
                let id = tree_id(&args)?;
                let xml = load_xml_str(&args, "xml_data", "xml_file")?;
                self.trees.update(id, &xml)?;
                Ok(text_result(&format!("updated:{id}")))
            }

            "tree_delete" => {
                let id = tree_id(&args)?;
                self.trees.delete(id)?;
                Ok(text_result(&format!("deleted:{id}")))
            }

            // --- Nodes ---
            "node_add" => {
                let id = tree_id(&args)?;
                let request = match str_arg(&args, "request_xml") {
                    Some(wrapper) => MutationRequest::from_add_node_xml(wrapper)?,
                    None => MutationRequest::insert(str_arg(&args, "path"), str_arg(&args, "node_xml").unwrap_or(""))?,
                };
                let body = self.mutate(id, &request)?;
                Ok(text_result(&format!("added\n{body}")))
            }

            "node_remove" => {
                let id = tree_id(&args)?;
                let request = match str_arg(&args, "request_xml") {
                    Some(wrapper) => MutationRequest::from_remove_node_xml(wrapper)?,
                    None => MutationRequest::remove(str_arg(&args, "path"))?,
                };
                let body = self.mutate(id, &request)?;
                Ok(text_result(&format!("removed\n{body}")))
            }

            "node_report" => {
                let id = tree_id(&args)?;
                let pretty = args.get("pretty").and_then(|v| v.as_bool()).unwrap_or(self.config.pretty_reports);
                let layout = if pretty { Layout::Pretty } else { Layout::Compact };
                Ok(text_result(&self.trees.report(id, str_arg(&args, "path"), layout)?))
            }

            // --- Validation ---
            "xml_validate" => {
                let xml = load_xml_str(&args, "xml_data", "xml_file")?;
                Ok(text_result(&validate_xml(&xml)?))
            }

            _ => Err(ToolError::Arguments(format!(
                "Unknown tool: {name}. Available tools: tree_list, tree_get, tree_create, tree_update, tree_delete, node_add, node_remove, node_report, xml_validate"
            ))),
        }
    }

    fn mutate(&mut self, id: u64, request: &MutationRequest) -> Result<String, ToolError> {
        match self.trees.apply(id, request)? {
            Outcome::Updated(envelope) => Ok(envelope.body),
            Outcome::Extracted(text) => Ok(text),
        }
    }

    pub fn handle_request(&mut self, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = req.id.as_ref()?.clone();

        let resp = match req.method.as_str() {
            "initialize" => JsonRpcResponse::ok(
                id,
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {}, "logging": {} },
                    "serverInfo": { "name": "orgtree-mcp", "version": env!("CARGO_PKG_VERSION") },
                    "instructions": concat!(
                        "# orgtree-mcp: Organization Tree Store\n\n",
                        "**TREES**\n",
                        "- `tree_create`: <Wrapper><TreeName>Acme</TreeName>...</Wrapper> → stored under <Root>\n",
                        "- `tree_list`, `tree_get`, `tree_update`, `tree_delete`\n\n",
                        "**NODES**\n",
                        "- `node_add`: append a subtree under the node at a path\n",
                        "- `node_remove`: prune the node at a path (never the root)\n",
                        "- `node_report`: serialize the subtree at a path\n\n",
                        "## Paths\n",
                        "- Steps below Root: `/Dept/Team`, leading `/` optional, empty = Root\n",
                        "- `[n]` picks the n-th match, counting from 1\n",
                        "- `[@id='x']` filters by attribute\n",
                        "- A step matching several nodes without `[n]` fails as AmbiguousPath"
                    )
                }),
            ),
            "tools/list" => JsonRpcResponse::ok(id, tool_definitions().clone()),
            "tools/call" => {
                let params = req.params.clone().unwrap_or(json!({}));
                match self.handle_tool_call(&params) {
                    Ok(content) => JsonRpcResponse::ok(id, content),
                    Err(e) => {
                        warn!("tool call failed: {} {e}", e.kind());
                        JsonRpcResponse::ok(id, error_result(&e))
                    }
                }
            }
            "ping" => JsonRpcResponse::ok(id, json!({})),
            _ => JsonRpcResponse::err(id, -32601, format!("Method not found: {}", req.method)),
        };

        Some(resp)
    }

    /// Line-delimited JSON-RPC over any reader/writer pair.
    pub fn serve<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("failed to parse request: {e}");
                    continue;
                }
            };

            let response = self.handle_request(&request);
            for note in self.take_notifications() {
                write_line(&mut output, &note)?;
            }
            if let Some(response) = response {
                write_line(&mut output, &response)?;
            }
        }
        Ok(())
    }
}

fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn server() -> Server<MemoryStore> {
        Server::new(MemoryStore::new(), Config::default())
    }

    fn call(server: &mut Server<MemoryStore>, name: &str, args: Value) -> (String, bool) {
        let req = JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id: Some(json!(1)),
            method: "tools/call".into(),
            params: Some(json!({ "name": name, "arguments": args })),
        };
        let resp = server.handle_request(&req).unwrap();
        let result = resp.result.unwrap();
        let text = result["content"][0]["text"].as_str().unwrap().to_string();
        (text, result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false))
    }

    #[test]
    fn test_tools_list_names() {
        let defs = tool_definitions();
        let names: Vec<&str> = defs["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            ["tree_list", "tree_get", "tree_create", "tree_update", "tree_delete", "node_add", "node_remove", "node_report", "xml_validate"]
        );
    }

    #[test]
    fn test_create_and_get() {
        let mut s = server();
        let (text, is_error) = call(
            &mut s,
            "tree_create",
            json!({ "xml_data": "<Tree><TreeName>TestTree</TreeName><person id=\"1\"><name>Franciszek</name></person></Tree>" }),
        );
        assert!(!is_error, "{text}");
        let record: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(record["id"], 1);
        assert_eq!(record["treeName"], "TestTree");

        let (text, _) = call(&mut s, "tree_get", json!({ "id": "1" }));
        assert!(text.contains("Franciszek"));
    }

    #[test]
    fn test_errors_carry_kind() {
        let mut s = server();
        let (text, is_error) = call(&mut s, "tree_list", json!({}));
        assert!(is_error);
        assert_eq!(text, "NotFound: No trees found.");

        call(&mut s, "tree_create", json!({ "xml_data": "<T><Dept/><Dept/></T>" }));
        let (text, is_error) = call(&mut s, "node_add", json!({ "id": 1, "path": "/Dept", "node_xml": "<Team/>" }));
        assert!(is_error);
        assert!(text.starts_with("AmbiguousPath: "), "{text}");

        let (text, _) = call(&mut s, "node_add", json!({ "id": 1, "path": "/Dept[1]" }));
        assert!(text.starts_with("MissingPayload: "), "{text}");

        let (text, _) = call(&mut s, "node_remove", json!({ "id": 1 }));
        assert!(text.starts_with("InvalidOperation: "), "{text}");

        let (text, _) = call(&mut s, "node_report", json!({ "id": 1, "path": "//Dept" }));
        assert!(text.starts_with("BadPath: "), "{text}");

        let (text, _) = call(&mut s, "tree_create", json!({ "xml_data": "<T>" }));
        assert!(text.starts_with("MalformedInput: "), "{text}");

        let (text, _) = call(&mut s, "tree_get", json!({}));
        assert_eq!(text, "InvalidArguments: Missing 'id'");

        let (text, _) = call(&mut s, "tree_delete", json!({ "id": 5 }));
        assert_eq!(text, "NotFound: Tree 5 not found.");

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.xml");
        let (text, is_error) = call(&mut s, "tree_create", json!({ "xml_file": missing.to_str().unwrap() }));
        assert!(is_error);
        assert!(text.starts_with("InvalidArguments: Cannot read 'xml_file'"), "{text}");
    }

    #[test]
    fn test_wrapper_requests() {
        let mut s = server();
        call(
            &mut s,
            "tree_create",
            json!({ "xml_data": "<Tree><TreeName>TestTree</TreeName><person id=\"1\"><name>Franciszek</name><children/></person></Tree>" }),
        );
        let (text, is_error) = call(
            &mut s,
            "node_add",
            json!({ "id": 1, "request_xml": "<NewNode parent=\"person[@id='1']/children\"><person id=\"2\"><name>Anna</name></person></NewNode>" }),
        );
        assert!(!is_error, "{text}");
        assert!(text.starts_with("added\n"));
        assert!(text.contains("Anna"));

        let (text, _) = call(
            &mut s,
            "node_remove",
            json!({ "id": 1, "request_xml": "<RemoveNode path=\"person/children/person[@id='2']\"/>" }),
        );
        assert_eq!(text, "removed\n<Root><person id=\"1\"><name>Franciszek</name><children/></person></Root>");
    }

    #[test]
    fn test_report_uses_configured_layout() {
        let mut s = Server::new(MemoryStore::new(), Config { pretty_reports: true, ..Config::default() });
        call(&mut s, "tree_create", json!({ "xml_data": "<T><Dept><Team/></Dept></T>" }));
        let (text, _) = call(&mut s, "node_report", json!({ "id": 1, "path": "Dept" }));
        assert_eq!(text, "<Dept>\n  <Team/>\n</Dept>");
        let (text, _) = call(&mut s, "node_report", json!({ "id": 1, "path": "Dept", "pretty": false }));
        assert_eq!(text, "<Dept><Team/></Dept>");
    }

    #[test]
    fn test_validate_tool() {
        let mut s = server();
        let (text, is_error) = call(&mut s, "xml_validate", json!({ "xml_data": "<a x=\"1\"><b/><c/></a>" }));
        assert!(!is_error);
        assert_eq!(text, "Valid XML. Root element: <a> (1 attribute(s), 2 child element(s))");
        let (_, is_error) = call(&mut s, "xml_validate", json!({ "xml_data": "<a/><b/>" }));
        assert!(is_error);
    }

    #[test]
    fn test_serve_writes_notification_then_response() {
        let mut s = server();
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "not json\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/call\",\"params\":{\"name\":\"tree_list\",\"arguments\":{}}}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"bogus\"}\n",
        );
        let mut out = Vec::new();
        s.serve(input.as_bytes(), &mut out).unwrap();
        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["method"], "notifications/message");
        assert_eq!(lines[1]["params"]["data"], "Listing trees");
        assert_eq!(lines[2]["id"], 2);
        assert_eq!(lines[2]["result"]["isError"], true);
        assert_eq!(lines[3]["error"]["code"], -32601);
    }
}
