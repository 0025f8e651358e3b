use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

struct RpcClient {
	child: Child,
	stdin: ChildStdin,
	stdout: BufReader<ChildStdout>,
	next_id: u64,
}

impl RpcClient {
	fn spawn() -> Self {
		let bin = env!("CARGO_BIN_EXE_mcp-fs-trace");
		let mut child = Command::new(bin)
			.env_remove("MCP_OTEL_ENDPOINT")
			.env("MCP_LOG", "off")
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.spawn()
			.expect("spawn mcp-fs-trace");
		let stdin = child.stdin
			.take()
			.expect("stdin");
		let stdout = child.stdout
			.take()
			.expect("stdout");
		Self {
			child,
			stdin,
			stdout: BufReader::new(stdout),
			next_id: 1
		}
	}
	fn send(&mut self, method: &str, params: Value) -> Value {
		let id = self.next_id;
		self.next_id += 1;
		let req = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params
		});
		let line = serde_json::to_string(&req).expect("serialize request");
		writeln!(self.stdin, "{}", line).expect("write request");
		self.stdin
			.flush()
			.expect("flush request");
		let mut resp_line = String::new();
		loop {
			resp_line.clear();
			let bytes = self.stdout
				.read_line(&mut resp_line)
				.expect("read response");
			if bytes == 0 {
				panic!("mcp-fs-trace exited unexpectedly");
			}
			let trimmed = resp_line.trim();
			if trimmed.is_empty() {
				continue;
			}
			let parsed: Value = match serde_json::from_str(trimmed) {
				Ok(value) => value,
				Err(_) => continue,
			};
			if parsed.get("id").and_then(Value::as_u64) == Some(id) {
				return parsed;
			}
		}
	}
	fn call(&mut self, name: &str, arguments: Value) -> Value {
		self.send("tools/call", json!({
			"name": name,
			"arguments": arguments
		}))
	}
}

impl Drop for RpcClient {
	fn drop(&mut self) {
		let _ = self.child.kill();
	}
}

fn envelope_text(resp: &Value) -> String {
	let result = resp.get("result").expect("result");
	let content = result.get("content")
		.and_then(Value::as_array)
		.expect("content");
	assert_eq!(content.len(), 1);
	assert_eq!(content[0].get("type").and_then(Value::as_str), Some("text"));
	content[0].get("text")
		.and_then(Value::as_str)
		.expect("text")
		.to_string()
}

fn path_arg(path: &Path) -> String {
	path.to_string_lossy().to_string()
}

#[test]
fn create_then_read_round_trips_content() {
	let root = tempfile::tempdir().expect("tempdir");
	let file = root.path().join("notes.md");
	let content = "# Title\n\nline two\n\ttabbed ünïcode\n";
	let mut client = RpcClient::spawn();
	let created = client.call("createfile", json!({ "filePath": path_arg(&file), "content": content }));
	let message = envelope_text(&created);
	assert!(message.starts_with("Successfully created file at "));
	assert!(message.ends_with(&format!("({} bytes)", content.len())));
	let read = client.call("readfile", json!({ "filePath": path_arg(&file) }));
	assert_eq!(envelope_text(&read), content);
}

#[test]
fn create_accepts_empty_content() {
	let root = tempfile::tempdir().expect("tempdir");
	let file = root.path().join("empty.txt");
	let mut client = RpcClient::spawn();
	let created = client.call("createfile", json!({ "filePath": path_arg(&file), "content": "" }));
	assert!(envelope_text(&created).ends_with("(0 bytes)"));
	let read = client.call("readfile", json!({ "filePath": path_arg(&file) }));
	assert_eq!(envelope_text(&read), "");
}

#[test]
fn create_makes_missing_parent_directories() {
	let root = tempfile::tempdir().expect("tempdir");
	let file = root.path().join("a/b/c/file.txt");
	let mut client = RpcClient::spawn();
	let created = client.call("createfile", json!({ "filePath": path_arg(&file), "content": "x" }));
	assert!(envelope_text(&created).starts_with("Successfully"));
	assert!(root.path().join("a/b/c").is_dir());
	assert_eq!(std::fs::read_to_string(&file).expect("read back"), "x");
}

#[test]
fn create_twice_overwrites() {
	let root = tempfile::tempdir().expect("tempdir");
	let file = root.path().join("twice.txt");
	let mut client = RpcClient::spawn();
	client.call("createfile", json!({ "filePath": path_arg(&file), "content": "first version, longer" }));
	client.call("createfile", json!({ "filePath": path_arg(&file), "content": "second" }));
	let read = client.call("readfile", json!({ "filePath": path_arg(&file) }));
	assert_eq!(envelope_text(&read), "second");
}

#[test]
fn read_missing_file_returns_error_envelope() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn();
	let resp = client.call("readfile", json!({ "filePath": path_arg(&root.path().join("missing.txt")) }));
	assert!(resp.get("error").is_none());
	assert!(envelope_text(&resp).starts_with("Error reading file: "));
	let again = client.send("ping", json!({}));
	assert_eq!(again.get("result"), Some(&json!({})));
}

#[test]
fn read_large_file_returns_everything() {
	let root = tempfile::tempdir().expect("tempdir");
	let file = root.path().join("large.txt");
	let content = "z".repeat(2000);
	std::fs::write(&file, &content).expect("write");
	let mut client = RpcClient::spawn();
	let resp = client.call("readfile", json!({ "filePath": path_arg(&file) }));
	assert_eq!(envelope_text(&resp).len(), 2000);
}

#[test]
fn list_renders_markdown_table() {
	let root = tempfile::tempdir().expect("tempdir");
	std::fs::write(root.path().join("a.txt"), "0123456789").expect("write");
	std::fs::create_dir(root.path().join("sub")).expect("mkdir");
	let order: Vec<String> = std::fs::read_dir(root.path())
		.expect("read_dir")
		.map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
		.collect();
	let mut client = RpcClient::spawn();
	let resp = client.call("listfiles", json!({ "path": path_arg(root.path()) }));
	let table = envelope_text(&resp);
	let lines: Vec<&str> = table.lines().collect();
	assert_eq!(lines.len(), 4);
	assert_eq!(lines[0], "| File Name | File Size | File Type |");
	assert_eq!(lines[1], "| --- | --- | --- |");
	for (line, name) in lines[2..].iter().zip(order.iter()) {
		assert!(line.starts_with(&format!("| {} | ", name)));
		if name == "a.txt" {
			assert_eq!(*line, "| a.txt | 10 bytes | File |");
		}
		else {
			assert!(line.ends_with(" bytes | Directory |"));
		}
	}
}

#[test]
fn list_empty_directory_has_no_rows() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn();
	let resp = client.call("listfiles", json!({ "path": path_arg(root.path()) }));
	assert_eq!(envelope_text(&resp), "| File Name | File Size | File Type |\n| --- | --- | --- |");
}

#[test]
fn list_missing_directory_returns_error_envelope() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn();
	let resp = client.call("listfiles", json!({ "path": path_arg(&root.path().join("nope")) }));
	assert!(envelope_text(&resp).starts_with("Error listing files: "));
}

#[test]
fn missing_parameter_is_protocol_rejection() {
	let mut client = RpcClient::spawn();
	let resp = client.call("createfile", json!({ "filePath": "/tmp/never-written.txt" }));
	assert!(resp.get("result").is_none());
	let error = resp.get("error").expect("error");
	assert_eq!(error.get("code").and_then(Value::as_i64), Some(-32602));
	assert_eq!(error.get("message").and_then(Value::as_str), Some("content is required"));
}

#[test]
fn unknown_tool_is_protocol_rejection() {
	let mut client = RpcClient::spawn();
	let resp = client.call("deletefile", json!({ "path": "/tmp" }));
	let error = resp.get("error").expect("error");
	assert_eq!(error.get("code").and_then(Value::as_i64), Some(-32602));
}

#[test]
fn tools_list_describes_contracts() {
	let mut client = RpcClient::spawn();
	let resp = client.send("tools/list", json!({}));
	let tools = resp.get("result")
		.and_then(|result| result.get("tools"))
		.and_then(Value::as_array)
		.expect("tools");
	let create = tools.iter()
		.find(|tool| tool.get("name").and_then(Value::as_str) == Some("createfile"))
		.expect("createfile");
	assert_eq!(create["inputSchema"]["required"], json!(["filePath", "content"]));
	let list = tools.iter()
		.find(|tool| tool.get("name").and_then(Value::as_str) == Some("listfiles"))
		.expect("listfiles");
	assert_eq!(list["inputSchema"]["properties"]["path"]["type"], json!("string"));
}
