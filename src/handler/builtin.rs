//! Demonstration handlers served by the `exchange-pipeline` binary.
//!
//! They exist to exercise the pipeline end to end and as examples of the
//! handler contract; applications register their own.

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::context::{FileOutput, RequestContext};
use crate::dispatch::{CallbackDispatcher, PropertyBag};
use crate::error::HandlerError;

use super::{HandlerRegistry, RequestHandler};

/// Directory where [`UploadReceiver`] persists uploaded files.
#[derive(Debug, Clone)]
pub struct UploadDir(pub PathBuf);

/// Directory [`FileDownload`] serves files from.
#[derive(Debug, Clone)]
pub struct DownloadRoot(pub PathBuf);

/// The demo chain: downloads, then uploads, then parameter echo.
pub fn demo_registry() -> HandlerRegistry {
    HandlerRegistry::new()
        .with(|| FileDownload)
        .with(|| UploadReceiver)
        .with(|| ParameterEcho)
}

/// Echoes the decoded parameters as JSON.
#[derive(Debug, Default)]
pub struct ParameterEcho;

impl RequestHandler for ParameterEcho {
    fn name(&self) -> &'static str {
        "parameter_echo"
    }

    fn is_my_job(&self, ctx: &RequestContext) -> bool {
        !ctx.parameters().is_empty() && !ctx.is_file_request()
    }

    fn process(&self, ctx: &Arc<RequestContext>) -> Result<(), HandlerError> {
        let body = json!({
            "status": "done",
            "method": ctx.method().as_str(),
            "path": ctx.path(),
            "params": ctx.parameters().to_json(),
        });
        ctx.write_json(&body, ctx.completion())?;
        Ok(())
    }
}

/// Summarizes uploaded parts and optionally stores them in [`UploadDir`].
#[derive(Debug, Default)]
pub struct UploadReceiver;

impl RequestHandler for UploadReceiver {
    fn name(&self) -> &'static str {
        "upload_receiver"
    }

    fn is_my_job(&self, ctx: &RequestContext) -> bool {
        ctx.is_file_request()
    }

    fn process(&self, ctx: &Arc<RequestContext>) -> Result<(), HandlerError> {
        let upload_dir = ctx.services().get::<UploadDir>();
        let mut files = Vec::new();

        for (key, part) in ctx.parts_by_field() {
            let mut entry = json!({
                "field": key,
                "file_name": part.file_name(),
                "content_type": part.content_type(),
                "size": part.size(),
            });

            if let (Some(dir), Some(name)) = (upload_dir.as_deref(), part.file_name()) {
                let Some(safe) = safe_file_name(name) else {
                    return Err(HandlerError::failed(format!("unsafe file name '{name}'")));
                };
                let outcome: Arc<Mutex<Option<PropertyBag>>> = Arc::default();
                let slot = outcome.clone();
                let record = CallbackDispatcher::new(move |bag| {
                    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(bag);
                });
                ctx.persist_part(part, &dir.0, &safe, record);

                let bag = outcome.lock().unwrap_or_else(|e| e.into_inner()).take();
                match bag {
                    Some(bag) if bag.is_done() => {
                        entry["saved_to"] = bag.get("path").cloned().unwrap_or(Value::Null);
                    }
                    Some(bag) => {
                        return Err(HandlerError::failed(
                            bag.message().unwrap_or("persist failed").to_string(),
                        ));
                    }
                    None => return Err(HandlerError::failed("persist outcome missing")),
                }
            }
            files.push(entry);
        }

        let body = json!({
            "status": "done",
            "params": ctx.parameters().to_json(),
            "files": files,
        });
        ctx.write_json(&body, ctx.completion())?;
        Ok(())
    }
}

/// Streams `name` from [`DownloadRoot`] when `act=file`.
#[derive(Debug, Default)]
pub struct FileDownload;

impl RequestHandler for FileDownload {
    fn name(&self) -> &'static str {
        "file_download"
    }

    fn is_my_job(&self, ctx: &RequestContext) -> bool {
        ctx.parameter("act") == Some("file")
    }

    fn process(&self, ctx: &Arc<RequestContext>) -> Result<(), HandlerError> {
        let root = ctx
            .services()
            .get::<DownloadRoot>()
            .ok_or_else(|| HandlerError::failed("no download root configured"))?;

        let Some(name) = ctx.parameter("name").and_then(safe_file_name) else {
            ctx.invalid_request();
            return Ok(());
        };

        let target = ctx.clone();
        let on_done = CallbackDispatcher::new(move |bag: PropertyBag| {
            if bag.is_done() || target.has_output() {
                let _ = target.complete();
            } else {
                target.report_exception(bag.message().unwrap_or("download failed"));
            }
        });

        let options = FileOutput {
            attachment: ctx.parameter("inline").is_none(),
            ..Default::default()
        };
        ctx.write_file(&root.0.join(name), options, on_done)?;
        Ok(())
    }
}

/// Accept a plain file name only: no separators, no `..`, not empty.
fn safe_file_name(name: &str) -> Option<String> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if !name.contains(['/', '\\']) => {
            Some(part.to_string_lossy().into_owned())
        }
        _ => None,
    }
}
