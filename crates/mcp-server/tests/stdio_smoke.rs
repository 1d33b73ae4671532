use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;

fn write_mcp_message(stdin: &mut impl Write, payload: &Value) {
    let body = serde_json::to_vec(payload).unwrap();
    write!(stdin, "Content-Length: {}\r\n\r\n", body.len()).unwrap();
    stdin.write_all(&body).unwrap();
    stdin.flush().unwrap();
}

fn read_mcp_message(stdout: &mut impl BufRead) -> Value {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = stdout.read_line(&mut line).unwrap();
        assert!(n > 0, "unexpected EOF");
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(value.trim().parse::<usize>().unwrap());
            }
        }
    }
    let len = content_length.expect("missing Content-Length");
    let mut buf = vec![0_u8; len];
    stdout.read_exact(&mut buf).unwrap();
    serde_json::from_slice(&buf).unwrap()
}

fn tool_call(id: u64, name: &str, arguments: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
}

#[test]
fn stdio_server_ingest_supersede_and_query() {
    let db = NamedTempFile::new().unwrap();
    let bin = env!("CARGO_BIN_EXE_factline-mcp");
    let mut child = Command::new(bin)
        .env("FACTLINE_DB_PATH", db.path())
        .env("RUST_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    write_mcp_message(
        &mut stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {}
        }),
    );
    let init = read_mcp_message(&mut stdout);
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["serverInfo"]["name"], "factline-mcp");

    write_mcp_message(
        &mut stdin,
        &tool_call(
            2,
            "ingest",
            serde_json::json!({ "text": "Alice works for Google. She lives in London." }),
        ),
    );
    let first = read_mcp_message(&mut stdout);
    assert_eq!(first["id"], 2);
    assert_eq!(first["result"]["structuredContent"]["stored"], 2);

    write_mcp_message(
        &mut stdin,
        &tool_call(
            3,
            "ingest",
            serde_json::json!({ "text": "Alice has moved. Alice lives in Paris." }),
        ),
    );
    let second = read_mcp_message(&mut stdout);
    assert_eq!(second["result"]["structuredContent"]["expired"], 1);

    write_mcp_message(
        &mut stdin,
        &tool_call(4, "query", serde_json::json!({ "subject": "Alice" })),
    );
    let query = read_mcp_message(&mut stdout);
    assert_eq!(query["id"], 4);
    let facts = query["result"]["structuredContent"]["facts"]
        .as_array()
        .unwrap();
    assert_eq!(facts.len(), 2);
    assert!(facts
        .iter()
        .any(|f| f["relation"] == "LOCATED_IN" && f["object"] == "Paris"));
    assert!(facts.iter().all(|f| f["object"] != "London"));

    // Stop child cleanly.
    drop(stdin);
    let _ = child.wait();
}

#[test]
fn malformed_frame_gets_parse_error_and_server_keeps_going() {
    let db = NamedTempFile::new().unwrap();
    let bin = env!("CARGO_BIN_EXE_factline-mcp");
    let mut child = Command::new(bin)
        .env("FACTLINE_DB_PATH", db.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    write!(stdin, "Content-Length: 5\r\n\r\nnope!").unwrap();
    stdin.flush().unwrap();
    let err = read_mcp_message(&mut stdout);
    assert_eq!(err["error"]["code"], -32700);

    write_mcp_message(
        &mut stdin,
        &serde_json::json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }),
    );
    let pong = read_mcp_message(&mut stdout);
    assert_eq!(pong["id"], 9);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn one_shot_mode_prints_and_exits() {
    let db = NamedTempFile::new().unwrap();
    let bin = env!("CARGO_BIN_EXE_factline-mcp");

    let add = Command::new(bin)
        .env("FACTLINE_DB_PATH", db.path())
        .args(["add", "Bob", "works_for", "Initech"])
        .output()
        .unwrap();
    assert!(add.status.success());

    let query = Command::new(bin)
        .env("FACTLINE_DB_PATH", db.path())
        .args(["query", "Bob"])
        .output()
        .unwrap();
    assert!(query.status.success());
    let stdout = String::from_utf8(query.stdout).unwrap();
    assert!(stdout.contains("WORKS_FOR -> Initech"), "got {stdout}");
}
