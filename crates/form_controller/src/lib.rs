use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use futures::{future, FutureExt};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::ControlId,
    error::{ErrorReport, SubmissionError},
    protocol::{FormEvent, SubmissionOutcome, SubmissionRequest},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

pub mod config;
pub mod host;
pub mod transport;
pub mod validation;

pub use host::{
    DispatchedEvent, EventBus, FormHost, MemoryForm, SubmitEvent, SubmitFuture, SubmitHandlerId,
};
pub use transport::{FetchResponse, Fetcher, HttpFetcher};
pub use validation::{AcceptAll, RequiredFields, Validator};

pub const DEFAULT_BUSY_CLASS: &str = "loading";

/// What to do when a form is submitted again while a previous submission of
/// the same form is still waiting on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReentryPolicy {
    /// Every trigger issues its own request.
    #[default]
    Allow,
    /// Triggers arriving while a request is in flight resolve to `Skipped`.
    SkipWhileInFlight,
    /// Like `SkipWhileInFlight`, and the submitter is disabled for the
    /// duration of the request.
    DisableSubmitter,
}

impl FromStr for ReentryPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "skip" | "skip-while-in-flight" => Ok(Self::SkipWhileInFlight),
            "disable-submitter" => Ok(Self::DisableSubmitter),
            other => Err(format!(
                "unknown reentry policy {other:?} (expected allow, skip or disable-submitter)"
            )),
        }
    }
}

impl ReentryPolicy {
    fn guards(self) -> bool {
        !matches!(self, Self::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base for resolving relative `action` attributes; also the target when
    /// `action` is missing.
    pub base_url: Option<Url>,
    pub busy_class: String,
    pub reentry: ReentryPolicy,
    /// Dispatch `form-submission-error` before surfacing a failure.
    pub emit_error_event: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            busy_class: DEFAULT_BUSY_CLASS.to_string(),
            reentry: ReentryPolicy::Allow,
            emit_error_event: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Validating,
    Rejected,
    Requesting,
    Decoding,
    Failed,
    Succeeded,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Rejected => "rejected",
            Self::Requesting => "requesting",
            Self::Decoding => "decoding",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

/// Per-form state shared between an [`Attachment`] and its submit handler.
#[derive(Debug, Default)]
pub struct FormSession {
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

impl FormSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_detached(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Clears the in-flight flag when a guarded submission finishes, fails or is
/// dropped.
struct InFlightGuard {
    session: Arc<FormSession>,
}

impl InFlightGuard {
    fn acquire(session: &Arc<FormSession>) -> Option<Self> {
        session
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                session: Arc::clone(session),
            })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.session.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Handle returned by [`SubmissionController::attach`].
pub struct Attachment {
    controller: Arc<SubmissionController>,
    form: Arc<dyn FormHost>,
    session: Arc<FormSession>,
    handler: SubmitHandlerId,
}

impl Attachment {
    /// Runs one submission lifecycle for this form directly, bypassing the
    /// host's trigger.
    pub fn handle_submission(&self, event: Arc<SubmitEvent>) -> SubmitFuture {
        self.controller.handle_submission(
            Arc::clone(&self.form),
            Arc::clone(&self.session),
            event,
        )
    }

    pub fn is_in_flight(&self) -> bool {
        self.session.is_in_flight()
    }

    /// Cancels the in-flight submission, if any, and unregisters the submit
    /// handler. Later triggers fall through to the host's default behavior,
    /// and the form can be attached again.
    pub fn detach(&self) {
        debug!(form = %self.form.form_id(), "detaching submission controller");
        self.session.cancel.cancel();
        self.form.remove_submit_handler(self.handler);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.session.cancel.clone()
    }
}

pub struct SubmissionController {
    fetcher: Arc<dyn Fetcher>,
    validator: Arc<dyn Validator>,
    config: ControllerConfig,
}

impl SubmissionController {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        validator: Arc<dyn Validator>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            fetcher,
            validator,
            config,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Disables the form's built-in validation and registers the submit
    /// handler. Attaching the same form twice registers two handlers.
    pub fn attach(self: &Arc<Self>, form: Arc<dyn FormHost>) -> Attachment {
        form.set_attribute("novalidate", "true");

        let session = FormSession::new();
        let controller = Arc::clone(self);
        let weak_form: Weak<dyn FormHost> = Arc::downgrade(&form);
        let handler_session = Arc::clone(&session);
        let handler = form.on_submit(Arc::new(move |event: Arc<SubmitEvent>| {
            match weak_form.upgrade() {
                Some(form) => {
                    controller.handle_submission(form, Arc::clone(&handler_session), event)
                }
                None => {
                    event.prevent_default();
                    future::ready(Ok(SubmissionOutcome::Detached)).boxed()
                }
            }
        }));
        debug!(form = %form.form_id(), "attached submission controller");

        Attachment {
            controller: Arc::clone(self),
            form,
            session,
            handler,
        }
    }

    /// One submission lifecycle. Default prevention, validation, request
    /// preparation and the re-entrancy check run before this returns; the
    /// network exchange runs when the returned future is polled.
    pub fn handle_submission(
        self: &Arc<Self>,
        form: Arc<dyn FormHost>,
        session: Arc<FormSession>,
        event: Arc<SubmitEvent>,
    ) -> SubmitFuture {
        event.prevent_default();

        let form_id = form.form_id();
        let submission_id = Uuid::new_v4();
        if session.is_detached() {
            debug!(form = %form_id, %submission_id, "form detached; ignoring trigger");
            return future::ready(Ok(SubmissionOutcome::Detached)).boxed();
        }

        debug!(form = %form_id, %submission_id, state = %SubmissionState::Validating);
        if !self.validator.validate(form.as_ref()) {
            debug!(form = %form_id, %submission_id, state = %SubmissionState::Rejected, "validation rejected submission");
            return future::ready(Ok(SubmissionOutcome::Rejected)).boxed();
        }

        // An unusable target or method fails before any lifecycle notification.
        let request = match self.prepare_request(form.as_ref()) {
            Ok(request) => request,
            Err(error) => {
                warn!(form = %form_id, %submission_id, state = %SubmissionState::Failed, %error, "cannot build submission request");
                self.notify_failure(form.as_ref(), &error);
                return future::ready(Err(error)).boxed();
            }
        };

        let guard = if self.config.reentry.guards() {
            match InFlightGuard::acquire(&session) {
                Some(guard) => Some(guard),
                None => {
                    debug!(form = %form_id, %submission_id, "submission already in flight; skipping");
                    return future::ready(Ok(SubmissionOutcome::Skipped)).boxed();
                }
            }
        } else {
            None
        };

        let controller = Arc::clone(self);
        let submitter = event.submitter().cloned();
        let cancel = session.cancel.clone();
        let span = info_span!("form_submission", form = %form_id, %submission_id);
        async move {
            let _guard = guard;
            controller.run(form.as_ref(), request, submitter, cancel).await
        }
        .instrument(span)
        .boxed()
    }

    async fn run(
        &self,
        form: &dyn FormHost,
        request: SubmissionRequest,
        submitter: Option<ControlId>,
        cancel: CancellationToken,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        form.dispatch(FormEvent::SubmissionStart);
        if let Some(control) = &submitter {
            form.set_control_class(control, &self.config.busy_class, true);
            if self.config.reentry == ReentryPolicy::DisableSubmitter {
                form.set_control_disabled(control, true);
            }
        }

        let exchange = self.exchange(request, &cancel).await;

        if self.config.reentry == ReentryPolicy::DisableSubmitter {
            if let Some(control) = &submitter {
                form.set_control_disabled(control, false);
            }
        }

        let (status, json) = match exchange {
            Ok(decoded) => decoded,
            Err(error) => {
                // The busy marker stays on the submitter after a failure.
                warn!(state = %SubmissionState::Failed, %error, "form submission failed");
                self.notify_failure(form, &error);
                return Err(error);
            }
        };

        if let Some(control) = &submitter {
            form.set_control_class(control, &self.config.busy_class, false);
        }
        form.dispatch(FormEvent::SubmissionEnd);
        form.dispatch(FormEvent::Response { json: json.clone() });
        info!(state = %SubmissionState::Succeeded, status, "form submission completed");
        debug!(state = %SubmissionState::Idle);

        Ok(SubmissionOutcome::Completed { status, json })
    }

    fn notify_failure(&self, form: &dyn FormHost, error: &SubmissionError) {
        if self.config.emit_error_event {
            form.dispatch(FormEvent::SubmissionError {
                error: ErrorReport::from(error),
            });
        }
    }

    /// Snapshot of the form's fields, target and method at trigger time.
    fn prepare_request(&self, form: &dyn FormHost) -> Result<SubmissionRequest, SubmissionError> {
        let url = self.resolve_target(form.attribute("action"))?;
        let method = form
            .attribute("method")
            .filter(|method| !method.trim().is_empty())
            .unwrap_or_else(|| "get".to_string());
        let request = SubmissionRequest::new(url, &method, form.field_set());
        if Method::from_bytes(request.method.as_bytes()).is_err() {
            return Err(SubmissionError::InvalidMethod(request.method));
        }
        Ok(request)
    }

    async fn exchange(
        &self,
        request: SubmissionRequest,
        cancel: &CancellationToken,
    ) -> Result<(u16, Value), SubmissionError> {
        debug!(state = %SubmissionState::Requesting, url = %request.url, method = %request.method);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
            response = self.fetcher.fetch(request) => response?,
        };
        let status = response.status();

        debug!(state = %SubmissionState::Decoding, status);
        let json = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SubmissionError::Cancelled),
            json = response.json() => json?,
        };
        Ok((status, json))
    }

    fn resolve_target(&self, action: Option<String>) -> Result<String, SubmissionError> {
        let action = action.filter(|action| !action.trim().is_empty());
        match (action, &self.config.base_url) {
            (Some(action), Some(base)) => base
                .join(action.trim())
                .map(String::from)
                .map_err(|err| SubmissionError::InvalidTarget(format!("{action}: {err}"))),
            (Some(action), None) => Url::parse(action.trim())
                .map(String::from)
                .map_err(|err| SubmissionError::InvalidTarget(format!("{action}: {err}"))),
            (None, Some(base)) => Ok(base.to_string()),
            (None, None) => Err(SubmissionError::InvalidTarget(
                "form has no action and no base url is configured".to_string(),
            )),
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
