//! MCP stdio server.
//!
//! Reads line-delimited JSON-RPC requests on stdin and writes single-line
//! responses on stdout. Logging goes to stderr; stdout belongs to the
//! transport.

use std::io::{BufRead, Write};

use serde_json::{json, Map, Value};

use super::protocol::{
    InitializeResult, JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId,
    ServerCapabilities, ServerInfo, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};
use super::tools::Dispatcher;

/// The MCP server: one per process, one agent session per transport.
pub struct McpServer {
    dispatcher: Dispatcher,
}

impl McpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Serve on stdin/stdout until the client closes the stream.
    pub fn run(&self) -> std::io::Result<()> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.serve(stdin.lock(), stdout.lock())
    }

    /// Transport-agnostic loop; tests drive it with in-memory buffers.
    pub fn serve<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> std::io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line) {
                let text = serde_json::to_string(&response).unwrap_or_else(|err| {
                    format!(
                        r#"{{"jsonrpc":"2.0","id":0,"error":{{"code":{INTERNAL_ERROR},"message":"encode failure: {err}"}}}}"#
                    )
                });
                writeln!(writer, "{text}")?;
                writer.flush()?;
            }
        }
        Ok(())
    }

    fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                return Some(JsonRpcResponse::failure(
                    RequestId::Number(0),
                    PARSE_ERROR,
                    format!("invalid request: {err}"),
                ));
            }
        };

        let Some(id) = request.id.clone() else {
            // Notifications get no response.
            tracing::debug!("notification: {}", request.method);
            return None;
        };

        Some(self.handle_request(id, &request))
    }

    fn handle_request(&self, id: RequestId, request: &JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!("request: {}", request.method);
        match request.method.as_str() {
            "initialize" => respond(id, &self.initialize_result()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => respond(
                id,
                &ListToolsResult {
                    tools: self.dispatcher.tools(),
                },
            ),
            "tools/call" => self.handle_tool_call(id, request.params.as_ref()),
            other => JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        }
    }

    fn handle_tool_call(&self, id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
        let Some(name) = params
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
        else {
            return JsonRpcResponse::failure(id, INVALID_PARAMS, "tools/call requires a name");
        };

        let empty = Map::new();
        let arguments = params
            .and_then(|p| p.get("arguments"))
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let result = self.dispatcher.call(name, arguments);
        respond(id, &result)
    }

    fn initialize_result(&self) -> InitializeResult {
        InitializeResult {
            protocol_version: PROTOCOL_VERSION,
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: crate::APP_NAME.to_string(),
                version: crate::VERSION.to_string(),
            },
        }
    }
}

fn respond<T: serde::Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(err) => JsonRpcResponse::failure(id, INTERNAL_ERROR, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ClaudeClassifier;
    use crate::state::machine::StateManager;
    use crate::state::StateStore;
    use crate::tasks::TaskManager;
    use tempfile::TempDir;

    fn server() -> (TempDir, McpServer) {
        let tmp = TempDir::new().unwrap();
        let state = StateManager::with_store(StateStore::at(tmp.path().join("state")))
            .with_classifier(Box::new(ClaudeClassifier::new(None)));
        let dispatcher = Dispatcher::new(state, TaskManager::new());
        (tmp, McpServer::new(dispatcher))
    }

    fn drive(server: &McpServer, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_initialize_handshake() {
        let (_tmp, server) = server();
        let responses = drive(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{}}\n",
        );

        assert_eq!(responses.len(), 1);
        let result = &responses[0]["result"];
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], crate::APP_NAME);
    }

    #[test]
    fn test_notifications_get_no_response() {
        let (_tmp, server) = server();
        let responses = drive(
            &server,
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
             {\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n",
        );

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 2);
    }

    #[test]
    fn test_tools_list_advertises_the_surface() {
        let (_tmp, server) = server();
        let responses = drive(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tools/list\"}\n",
        );

        let tools = responses[0]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 19);
        assert!(tools
            .iter()
            .any(|tool| tool["name"] == "workflow_register"));
    }

    #[test]
    fn test_tools_call_round_trip() {
        let (_tmp, server) = server();
        let responses = drive(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"tools/call\",\
             \"params\":{\"name\":\"workflow_list_workflows\",\"arguments\":{}}}\n",
        );

        let content = responses[0]["result"]["content"][0]["text"].as_str().unwrap();
        let payload: Value = serde_json::from_str(content).unwrap();
        assert!(payload["workflows"].as_array().unwrap().iter().any(|w| w == "work"));
    }

    #[test]
    fn test_tool_failure_stays_in_band() {
        let (_tmp, server) = server();
        let responses = drive(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"tools/call\",\
             \"params\":{\"name\":\"workflow_get_status\",\
             \"arguments\":{\"worktreePath\":\"relative\"}}}\n",
        );

        // A JSON-RPC success carrying an isError tool result.
        assert!(responses[0]["error"].is_null());
        assert_eq!(responses[0]["result"]["isError"], true);
    }

    #[test]
    fn test_unknown_method_and_parse_error() {
        let (_tmp, server) = server();
        let responses = drive(
            &server,
            "{\"jsonrpc\":\"2.0\",\"id\":6,\"method\":\"resources/list\"}\n\
             not json at all\n",
        );

        assert_eq!(responses[0]["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(responses[1]["error"]["code"], PARSE_ERROR);
    }
}
