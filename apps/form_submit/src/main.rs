use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use form_controller::{
    config::load_settings_from, AcceptAll, EventBus, FormHost, HttpFetcher, MemoryForm,
    ReentryPolicy, RequiredFields, SubmissionController, Validator,
};
use serde_json::json;
use shared::{
    domain::{FieldValue, FilePart},
    protocol::SubmissionOutcome,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Submit a form once through the submission controller and print every
/// lifecycle notification as a JSON line.
#[derive(Parser, Debug)]
struct Args {
    /// Form `action` attribute. Relative values need `--base-url` (or a
    /// configured `base_url`); without one the submission is refused before
    /// any request.
    #[arg(long)]
    action: Option<String>,
    #[arg(long, default_value = "post")]
    method: String,
    /// `name=value`, repeatable.
    #[arg(long = "field", value_parser = parse_pair)]
    fields: Vec<(String, String)>,
    /// `name=path`, repeatable.
    #[arg(long = "file", value_parser = parse_pair)]
    files: Vec<(String, String)>,
    /// Control id that triggers the submission.
    #[arg(long)]
    submitter: Option<String>,
    /// Fields that must be present and non-blank.
    #[arg(long = "required")]
    required: Vec<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    busy_class: Option<String>,
    #[arg(long)]
    reentry: Option<ReentryPolicy>,
    #[arg(long)]
    emit_error_event: bool,
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))
}

async fn read_file_part(path: &str) -> Result<FilePart> {
    let path = PathBuf::from(path);
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload.bin")
        .to_string();
    let content_type = mime_guess::from_path(&path)
        .first_raw()
        .map(str::to_string);
    Ok(FilePart {
        file_name,
        content_type,
        bytes,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings_from(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        settings.base_url = Some(base_url);
    }
    if let Some(busy_class) = args.busy_class {
        settings.busy_class = busy_class;
    }
    if let Some(reentry) = args.reentry {
        settings.reentry = reentry;
    }
    if args.emit_error_event {
        settings.emit_error_event = true;
    }
    if args.timeout_ms.is_some() {
        settings.timeout_ms = args.timeout_ms;
    }
    debug!(?settings, "resolved settings");

    let form = Arc::new(MemoryForm::new("cli"));
    if let Some(action) = &args.action {
        form.set_attribute("action", action);
    }
    form.set_attribute("method", &args.method);
    for (name, value) in args.fields {
        form.append_field(name, FieldValue::Text(value));
    }
    for (name, path) in args.files {
        form.append_field(name, FieldValue::File(read_file_part(&path).await?));
    }
    if let Some(submitter) = &args.submitter {
        form.add_control(submitter.as_str());
    }

    let page = EventBus::default();
    let mut page_rx = page.subscribe();
    form.add_ancestor(&page);

    let validator: Arc<dyn Validator> = if args.required.is_empty() {
        Arc::new(AcceptAll)
    } else {
        Arc::new(RequiredFields::new(args.required))
    };
    let fetcher = HttpFetcher::new().with_timeout(settings.timeout());
    let controller =
        SubmissionController::new(Arc::new(fetcher), validator, settings.controller_config()?);
    let _attachment = controller.attach(form.clone());

    let results = form.submit(args.submitter.as_deref()).await;

    while let Ok(dispatched) = page_rx.try_recv() {
        println!(
            "{}",
            serde_json::to_string(&json!({
                "event": dispatched.event.name(),
                "target": dispatched.target,
                "detail": dispatched.event.detail(),
            }))?
        );
    }

    for result in results {
        match result? {
            SubmissionOutcome::Completed { status, .. } => {
                info!(form = %form.form_id(), status, "submission completed");
            }
            SubmissionOutcome::Rejected => {
                info!("submission rejected by validation; nothing sent");
            }
            SubmissionOutcome::Skipped | SubmissionOutcome::Detached => {
                info!("submission not sent");
            }
        }
    }

    Ok(())
}
