use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use factline::TemporalGraph;
use factline_agent_memory::{AgentMemory, MemoryConfig};
use serde_json::{json, Value as JsonValue};
use std::env;
use std::io::{self, BufRead, BufReader, Write};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_MESSAGE_BYTES: usize = 1_048_576; // 1 MiB
const MAX_TEXT_BYTES: usize = 32 * 1024; // 32 KiB
const MAX_NAME_BYTES: usize = 512;
const DEFAULT_DB_PATH: &str = "./factline.redb";

struct AppState {
    memory: AgentMemory,
}

impl AppState {
    fn open() -> Result<Self> {
        let db_path = env::var("FACTLINE_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        let config = MemoryConfig::from_env();
        info!(%db_path, ?config, "opening factline store");
        let graph = TemporalGraph::open(&db_path)?;
        Ok(Self {
            memory: AgentMemory::with_builtin(graph, config),
        })
    }
}

fn main() -> Result<()> {
    // stdout carries protocol frames; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let state = AppState::open().context("failed to open factline database")?;

    let args: Vec<String> = env::args().skip(1).collect();
    if !args.is_empty() {
        return run_once(&state, &args);
    }

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin.lock());
    let stdout = io::stdout();
    let mut writer = stdout.lock();

    loop {
        let maybe = match read_message(&mut reader) {
            Ok(m) => m,
            Err(e) => {
                // Bad framing is answered with -32700 and the loop keeps reading.
                warn!(error = %e, "malformed frame");
                let err_resp = json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": { "code": -32700, "message": format!("Parse error: {e}") }
                });
                write_message(&mut writer, &err_resp)?;
                continue;
            }
        };
        let Some(request) = maybe else {
            break;
        };
        if let Some(response) = handle_request(&state, &request) {
            write_message(&mut writer, &response)?;
        }
    }

    info!("stdin closed; shutting down");
    Ok(())
}

/// One-shot mode: run a single tool from argv and print its text output.
fn run_once(state: &AppState, args: &[String]) -> Result<()> {
    let params = argv_to_params(args)?;
    let out = call_tool(state, Some(&params))?;
    let text = out
        .pointer("/content/0/text")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    println!("{text}");
    if let Some(facts) = out
        .pointer("/structuredContent/facts")
        .and_then(JsonValue::as_array)
    {
        for fact in facts {
            println!(
                "  {} -> {}",
                fact["relation"].as_str().unwrap_or_default(),
                fact["object"].as_str().unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn argv_to_params(args: &[String]) -> Result<JsonValue> {
    const USAGE: &str = "usage: factline-mcp [ingest <text> | add <subject> <relation> <object> \
                         | query <subject> [rfc3339] | history <subject> | consolidate]";

    let (command, rest) = args.split_first().context(USAGE)?;
    let arguments = match (command.as_str(), rest) {
        ("ingest", words) if !words.is_empty() => json!({ "text": words.join(" ") }),
        ("add", [subject, relation, object]) => {
            json!({ "subject": subject, "relation": relation, "object": object })
        }
        ("query", [subject]) => json!({ "subject": subject }),
        ("query", [subject, at]) => json!({ "subject": subject, "at": at }),
        ("history", [subject]) => json!({ "subject": subject }),
        ("consolidate", []) => json!({}),
        _ => anyhow::bail!(USAGE),
    };
    Ok(json!({ "name": command, "arguments": arguments }))
}

fn read_message<R: BufRead>(reader: &mut R) -> Result<Option<JsonValue>> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .context("invalid Content-Length")?,
                );
            }
        }
    }

    let len = content_length.context("missing Content-Length header")?;
    if len > MAX_MESSAGE_BYTES {
        anyhow::bail!(
            "Content-Length {} exceeds max allowed {} bytes",
            len,
            MAX_MESSAGE_BYTES
        );
    }
    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload)?;
    let value: JsonValue = serde_json::from_slice(&payload).context("invalid JSON payload")?;
    Ok(Some(value))
}

fn write_message<W: Write>(writer: &mut W, value: &JsonValue) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

fn handle_request(state: &AppState, req: &JsonValue) -> Option<JsonValue> {
    let id = req.get("id").cloned();
    let method = req.get("method").and_then(JsonValue::as_str)?;
    debug!(method, "request");

    match method {
        "initialize" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "factline-mcp", "version": env!("CARGO_PKG_VERSION") }
                }
            })
        }),
        "notifications/initialized" => None,
        "tools/list" => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": {
                    "tools": tools_schema()
                }
            })
        }),
        "tools/call" => id.map(|id_val| match call_tool(state, req.get("params")) {
            Ok(tool_result) => json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "result": tool_result
            }),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "tool call failed");
                json!({
                    "jsonrpc": "2.0",
                    "id": id_val,
                    "result": {
                        "content": [{ "type": "text", "text": format!("tool error: {err:#}") }],
                        "isError": true
                    }
                })
            }
        }),
        "ping" => id.map(|id_val| json!({ "jsonrpc": "2.0", "id": id_val, "result": {} })),
        _ => id.map(|id_val| {
            json!({
                "jsonrpc": "2.0",
                "id": id_val,
                "error": {
                    "code": -32601,
                    "message": format!("method not found: {method}")
                }
            })
        }),
    }
}

fn tools_schema() -> Vec<JsonValue> {
    vec![
        json!({
            "name": "ingest",
            "description": "Extract facts from free text and store them. Single-valued relations supersede their previous value.",
            "inputSchema": {
                "type": "object",
                "properties": { "text": {"type": "string"} },
                "required": ["text"]
            }
        }),
        json!({
            "name": "add",
            "description": "Store one fact directly, superseding the previous value of single-valued relations.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "subject": {"type": "string"},
                    "relation": {"type": "string"},
                    "object": {"type": "string"},
                    "valid_at": {"type": "string", "description": "RFC3339; defaults to now"}
                },
                "required": ["subject", "relation", "object"]
            }
        }),
        json!({
            "name": "query",
            "description": "Facts currently valid for a subject, or valid at a given instant.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "subject": {"type": "string"},
                    "at": {"type": "string", "description": "RFC3339"}
                },
                "required": ["subject"]
            }
        }),
        json!({
            "name": "history",
            "description": "Every fact ever recorded for a subject, including superseded ones.",
            "inputSchema": {
                "type": "object",
                "properties": { "subject": {"type": "string"} },
                "required": ["subject"]
            }
        }),
        json!({
            "name": "consolidate",
            "description": "Group similar entities into topics and link members with BELONGS_TO.",
            "inputSchema": { "type": "object", "properties": {} }
        }),
    ]
}

fn call_tool(state: &AppState, params: Option<&JsonValue>) -> Result<JsonValue> {
    let name = params
        .and_then(|v| v.get("name"))
        .and_then(JsonValue::as_str)
        .context("missing tool name")?;
    let args = params
        .and_then(|v| v.get("arguments"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    match name {
        "ingest" => {
            let text = args
                .get("text")
                .and_then(JsonValue::as_str)
                .context("text is required")?;
            if text.len() > MAX_TEXT_BYTES {
                anyhow::bail!("text exceeds max allowed size ({} bytes)", MAX_TEXT_BYTES);
            }
            let report = state.memory.ingest(text)?;
            Ok(json!({
                "content": [{ "type": "text", "text": report.to_string() }],
                "structuredContent": report
            }))
        }
        "add" => {
            let subject = required_name(&args, "subject")?;
            let relation = required_name(&args, "relation")?;
            let object = required_name(&args, "object")?;
            let valid_at = parse_time(args.get("valid_at"), "valid_at")?.unwrap_or_else(Utc::now);
            let fact_id = state
                .memory
                .assert_fact_at(subject, relation, object, valid_at)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("stored fact {fact_id}") }],
                "structuredContent": { "fact_id": fact_id }
            }))
        }
        "query" => {
            let subject = required_name(&args, "subject")?;
            let facts = match parse_time(args.get("at"), "at")? {
                Some(at) => state.memory.recall_at(subject, at)?,
                None => state.memory.recall(subject)?,
            };
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} fact(s) about {subject}", facts.len()) }],
                "structuredContent": { "facts": facts }
            }))
        }
        "history" => {
            let subject = required_name(&args, "subject")?;
            let facts = state.memory.history(subject)?;
            Ok(json!({
                "content": [{ "type": "text", "text": format!("{} recorded fact(s) about {subject}", facts.len()) }],
                "structuredContent": { "facts": facts }
            }))
        }
        "consolidate" => {
            let report = state.memory.consolidate()?;
            Ok(json!({
                "content": [{ "type": "text", "text": report.to_string() }],
                "structuredContent": report
            }))
        }
        _ => anyhow::bail!("unknown tool: {name}"),
    }
}

fn required_name<'a>(args: &'a JsonValue, field: &str) -> Result<&'a str> {
    let value = args
        .get(field)
        .and_then(JsonValue::as_str)
        .with_context(|| format!("{field} is required"))?;
    if value.trim().is_empty() {
        anyhow::bail!("{field} must not be empty");
    }
    if value.len() > MAX_NAME_BYTES {
        anyhow::bail!("{field} exceeds max allowed size ({MAX_NAME_BYTES} bytes)");
    }
    Ok(value)
}

fn parse_time(v: Option<&JsonValue>, field: &str) -> Result<Option<DateTime<Utc>>> {
    match v.and_then(JsonValue::as_str) {
        Some(s) => Ok(Some(
            s.parse::<DateTime<Utc>>()
                .with_context(|| format!("{field} must be RFC3339"))?,
        )),
        None => Ok(None),
    }
}
