use crate::protocol::Envelope;
use crate::registry::{ParamField, ParamKind, ToolParams};
use crate::span::{run_traced, AttrValue, SpanHandle, SpanStatus};
use crate::telemetry::Telemetry;
use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;

pub const PREVIEW_CHARS: usize = 1000;
pub const PREVIEW_MARKER: &str = "...";

const TABLE_HEADER: &str = "| File Name | File Size | File Type |";
const TABLE_SEPARATOR: &str = "| --- | --- | --- |";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileParams {
	pub file_path: String,
	pub content: String,
}

impl ToolParams for CreateFileParams {
	fn contract() -> Vec<ParamField> {
		vec![
			ParamField::required("filePath", ParamKind::String, "Path of the file to create or overwrite"),
			ParamField::required("content", ParamKind::String, "Full contents to write; may be empty"),
		]
	}
	fn validate(&self) -> Result<(), String> {
		non_blank("filePath", &self.file_path)
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFileParams {
	pub file_path: String,
}

impl ToolParams for ReadFileParams {
	fn contract() -> Vec<ParamField> {
		vec![ParamField::required("filePath", ParamKind::String, "Path of the file to read")]
	}
	fn validate(&self) -> Result<(), String> {
		non_blank("filePath", &self.file_path)
	}
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
	pub path: String,
}

impl ToolParams for ListFilesParams {
	fn contract() -> Vec<ParamField> {
		vec![ParamField::required("path", ParamKind::String, "Directory whose immediate entries are listed")]
	}
	fn validate(&self) -> Result<(), String> {
		non_blank("path", &self.path)
	}
}

fn non_blank(field: &str, value: &str) -> Result<(), String> {
	if value.trim().is_empty() {
		return Err(format!("{} must not be empty", field));
	}
	Ok(())
}

/// Converts a handler body's outcome into the caller-facing envelope. Failures
/// mark the span, reach the exception sink and come back as text.
pub fn contain(telemetry: &Telemetry, span: &SpanHandle, action: &str, result: Result<String>) -> Envelope {
	match result {
		Ok(text) => {
			if span.status() == SpanStatus::Unset {
				span.set_status(SpanStatus::Ok, None);
			}
			Envelope::text(text)
		}
		Err(err) => {
			let message = format!("{:#}", err);
			span.set("error.message", message.clone());
			span.set("error.stack", format!("{:?}", err));
			span.set_status(SpanStatus::Error, Some(message.clone()));
			telemetry.capture_exception(span, &err);
			Envelope::text(format!("Error {}: {}", action, message))
		}
	}
}

async fn run_tool<F, Fut>(
	telemetry: &Telemetry,
	name: &str,
	operation: &str,
	action: &str,
	attributes: Vec<(&str, AttrValue)>,
	body: F) -> Envelope
where
	F: FnOnce(SpanHandle) -> Fut,
	Fut: std::future::Future<Output = Result<String>>, {
	run_traced(telemetry, name, operation, attributes, |span| async move {
		let result = body(span.clone()).await;
		contain(telemetry, &span, action, result)
	}).await
}

pub async fn create_file(telemetry: &Telemetry, params: CreateFileParams) -> Envelope {
	let path = PathBuf::from(&params.file_path);
	run_tool(
		telemetry,
		"createfile",
		"file.write",
		"creating file",
		vec![
			("file.path", AttrValue::from(params.file_path.as_str())),
			("file.content_length", AttrValue::from(params.content.chars().count())),
		],
		|span| async move {
			if let Some(parent) = path.parent() {
				span.set("directory.path", parent.display().to_string());
				if let Err(err) = fs::create_dir_all(parent).await {
					span.set("directory.create_error", err.to_string());
				}
			}
			let started = Instant::now();
			fs::write(&path, params.content.as_bytes())
				.await
				.with_context(|| format!("write {}", path.display()))?;
			let meta = fs::metadata(&path)
				.await
				.with_context(|| format!("stat {}", path.display()))?;
			span.set("file.size_bytes", meta.len());
			span.set("operation.duration_ms", elapsed_ms(started));
			span.set_status(SpanStatus::Ok, None);
			Ok(format!("Successfully created file at {} ({} bytes)", path.display(), meta.len()))
		}
	).await
}

pub async fn read_file(telemetry: &Telemetry, params: ReadFileParams) -> Envelope {
	let path = PathBuf::from(&params.file_path);
	run_tool(
		telemetry,
		"readfile",
		"file.read",
		"reading file",
		vec![("file.path", AttrValue::from(params.file_path.as_str()))],
		|span| async move {
			let result = read_traced(&span, &path).await;
			if result.is_err() {
				span.set("file.exists", false);
			}
			result
		}
	).await
}

async fn read_traced(span: &SpanHandle, path: &Path) -> Result<String> {
	let started = Instant::now();
	let meta = fs::metadata(path)
		.await
		.with_context(|| format!("stat {}", path.display()))?;
	span.set("file.exists", true);
	span.set("file.size_bytes", meta.len());
	let content = fs::read_to_string(path)
		.await
		.with_context(|| format!("read {}", path.display()))?;
	span.set("operation.duration_ms", elapsed_ms(started));
	span.set("file.content_preview", preview(&content));
	span.set("file.content_length", content.chars().count());
	span.set_status(SpanStatus::Ok, None);
	Ok(content)
}

pub fn preview(content: &str) -> String {
	match content.char_indices().nth(PREVIEW_CHARS) {
		Some((cut, _)) => format!("{}{}", &content[..cut], PREVIEW_MARKER),
		None => content.to_string(),
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
	File,
	Directory,
}

impl fmt::Display for FileKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FileKind::File => write!(f, "File"),
			FileKind::Directory => write!(f, "Directory"),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
	pub name: String,
	pub size: u64,
	pub kind: FileKind,
}

impl FileEntry {
	fn row(&self) -> String {
		format!("| {} | {} bytes | {} |", self.name, self.size, self.kind)
	}
}

pub fn render_table(entries: &[FileEntry]) -> String {
	let mut lines = Vec::with_capacity(entries.len() + 2);
	lines.push(TABLE_HEADER.to_string());
	lines.push(TABLE_SEPARATOR.to_string());
	lines.extend(entries.iter().map(FileEntry::row));
	lines.join("\n")
}

pub async fn list_files(telemetry: &Telemetry, params: ListFilesParams, concurrency: usize) -> Envelope {
	let dir = PathBuf::from(&params.path);
	run_tool(
		telemetry,
		"listfiles",
		"file.list",
		"listing files",
		vec![("directory.path", AttrValue::from(params.path.as_str()))],
		|span| async move {
			let started = Instant::now();
			let names = read_dir_names(&dir).await?;
			span.set("directory.entry_count", names.len());
			let entries = stat_entries(&dir, names, concurrency).await?;
			let dir_count = entries.iter()
				.filter(|entry| entry.kind == FileKind::Directory)
				.count();
			let total_size: u64 = entries.iter()
				.map(|entry| entry.size)
				.sum();
			span.set("directory.dir_count", dir_count);
			span.set("directory.file_count", entries.len() - dir_count);
			span.set("directory.total_size_bytes", total_size);
			span.set("operation.duration_ms", elapsed_ms(started));
			span.set_status(SpanStatus::Ok, None);
			Ok(render_table(&entries))
		}
	).await
}

async fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
	let mut reader = fs::read_dir(dir)
		.await
		.with_context(|| format!("read directory {}", dir.display()))?;
	let mut names = Vec::new();
	while let Some(entry) = reader.next_entry()
		.await
		.with_context(|| format!("read directory {}", dir.display()))? {
		names.push(entry.file_name()
			.to_string_lossy()
			.to_string());
	}
	Ok(names)
}

/// Stats every entry with at most `concurrency` in flight. Output order
/// matches `names`; the first failure aborts the whole listing.
async fn stat_entries(dir: &Path, names: Vec<String>, concurrency: usize) -> Result<Vec<FileEntry>> {
	futures::stream::iter(names)
		.map(|name| {
			let path = dir.join(&name);
			async move {
				let meta = fs::metadata(&path)
					.await
					.with_context(|| format!("stat {}", path.display()))?;
				let kind = if meta.is_dir() {
					FileKind::Directory
				}
				else {
					FileKind::File
				};
				Ok::<_, anyhow::Error>(FileEntry {
					name,
					size: meta.len(),
					kind
				})
			}
		})
		.buffered(concurrency.max(1))
		.try_collect()
		.await
}

fn elapsed_ms(started: Instant) -> u64 {
	u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
