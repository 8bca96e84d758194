//! Host environment seam: the form-like entity a controller attaches to.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::future::{join_all, BoxFuture};
use shared::{
    domain::{ControlId, FieldSet, FieldValue, FormId},
    error::SubmissionError,
    protocol::{FormEvent, SubmissionOutcome},
};
use tokio::sync::broadcast;
use tracing::debug;

pub type SubmitFuture = BoxFuture<'static, Result<SubmissionOutcome, SubmissionError>>;

/// Handler invoked synchronously when a submission is triggered. Work done
/// before the returned future is polled happens before the host decides
/// whether to run its default navigation.
pub type SubmitHandler = Arc<dyn Fn(Arc<SubmitEvent>) -> SubmitFuture + Send + Sync>;

/// Registration handle returned by [`FormHost::on_submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmitHandlerId(u64);

/// Ephemeral record of one submission trigger.
#[derive(Debug)]
pub struct SubmitEvent {
    target: FormId,
    submitter: Option<ControlId>,
    default_prevented: AtomicBool,
}

impl SubmitEvent {
    pub fn new(target: FormId, submitter: Option<ControlId>) -> Self {
        Self {
            target,
            submitter,
            default_prevented: AtomicBool::new(false),
        }
    }

    pub fn target(&self) -> &FormId {
        &self.target
    }

    pub fn submitter(&self) -> Option<&ControlId> {
        self.submitter.as_ref()
    }

    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::SeqCst);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::SeqCst)
    }
}

/// Everything the controller needs from the environment hosting a form.
pub trait FormHost: Send + Sync {
    fn form_id(&self) -> FormId;
    fn attribute(&self, name: &str) -> Option<String>;
    fn set_attribute(&self, name: &str, value: &str);
    /// Current field set, including file inputs and repeated names.
    fn field_set(&self) -> FieldSet;
    fn set_control_class(&self, control: &ControlId, class: &str, enabled: bool);
    fn set_control_disabled(&self, control: &ControlId, disabled: bool);
    /// Dispatches `event` from the form. Every lifecycle notification
    /// bubbles, so ancestors receive it too.
    fn dispatch(&self, event: FormEvent);
    fn on_submit(&self, handler: SubmitHandler) -> SubmitHandlerId;
    /// Unregisters a handler. Returns `false` when `id` is not registered.
    fn remove_submit_handler(&self, id: SubmitHandlerId) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    pub target: FormId,
    pub event: FormEvent,
}

/// Listener surface of an ancestor node (a page, a layout). Bubbling
/// notifications from every form attached beneath it arrive here.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchedEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: DispatchedEvent) {
        // No listeners is fine.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[derive(Debug, Default, Clone)]
struct ControlState {
    classes: BTreeSet<String>,
    disabled: bool,
}

#[derive(Default)]
struct MemoryFormState {
    attributes: HashMap<String, String>,
    fields: FieldSet,
    controls: HashMap<ControlId, ControlState>,
    handlers: Vec<(SubmitHandlerId, SubmitHandler)>,
    next_handler_id: u64,
    navigations: usize,
}

/// In-process form host. Plays the role of the page: it owns the form's
/// attributes, fields and controls, and runs registered handlers when
/// [`MemoryForm::submit`] is called.
pub struct MemoryForm {
    id: FormId,
    own: EventBus,
    ancestors: Mutex<Vec<EventBus>>,
    state: Mutex<MemoryFormState>,
}

impl MemoryForm {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: FormId::new(id),
            own: EventBus::new(256),
            ancestors: Mutex::new(Vec::new()),
            state: Mutex::new(MemoryFormState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryFormState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listeners registered directly on the form.
    pub fn subscribe_events(&self) -> broadcast::Receiver<DispatchedEvent> {
        self.own.subscribe()
    }

    pub fn add_ancestor(&self, bus: &EventBus) {
        self.ancestors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bus.clone());
    }

    pub fn append_field(&self, name: impl Into<String>, value: FieldValue) {
        self.state().fields.append(name, value);
    }

    /// Replaces every value of `name` with a single text value.
    pub fn set_field(&self, name: &str, value: impl Into<String>) {
        let mut state = self.state();
        let mut next = FieldSet::new();
        for (entry_name, entry_value) in state.fields.iter() {
            if entry_name != name {
                next.append(entry_name, entry_value.clone());
            }
        }
        next.append_text(name, value);
        state.fields = next;
    }

    pub fn add_control(&self, id: impl Into<String>) {
        self.state()
            .controls
            .entry(ControlId::new(id))
            .or_default();
    }

    pub fn control_has_class(&self, control: &str, class: &str) -> bool {
        self.state()
            .controls
            .get(&ControlId::new(control))
            .is_some_and(|state| state.classes.contains(class))
    }

    pub fn control_disabled(&self, control: &str) -> bool {
        self.state()
            .controls
            .get(&ControlId::new(control))
            .is_some_and(|state| state.disabled)
    }

    /// Times the host fell through to its default full-page navigation.
    pub fn navigation_count(&self) -> usize {
        self.state().navigations
    }

    pub fn handler_count(&self) -> usize {
        self.state().handlers.len()
    }

    /// Triggers submission the way a click on `submitter` (or an implicit
    /// submit when `None`) would. Returns one result per registered handler.
    /// A trigger from a disabled control is ignored.
    pub async fn submit(
        &self,
        submitter: Option<&str>,
    ) -> Vec<Result<SubmissionOutcome, SubmissionError>> {
        let submitter = submitter.map(ControlId::new);
        if let Some(control) = &submitter {
            if self.control_disabled(control.as_str()) {
                debug!(form = %self.id, control = %control, "ignoring trigger from disabled control");
                return Vec::new();
            }
        }

        let event = Arc::new(SubmitEvent::new(self.id.clone(), submitter));
        let handlers: Vec<SubmitHandler> = self
            .state()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        let pending: Vec<SubmitFuture> = handlers
            .iter()
            .map(|handler| handler(Arc::clone(&event)))
            .collect();

        if !event.default_prevented() {
            debug!(form = %self.id, "no handler prevented default; navigating");
            self.state().navigations += 1;
        }

        join_all(pending).await
    }
}

impl FormHost for MemoryForm {
    fn form_id(&self) -> FormId {
        self.id.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.state().attributes.get(name).cloned()
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.state()
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    fn field_set(&self) -> FieldSet {
        let state = self.state();
        let mut fields = FieldSet::new();
        for (name, value) in state.fields.iter() {
            if !name.is_empty() {
                fields.append(name, value.clone());
            }
        }
        fields
    }

    fn set_control_class(&self, control: &ControlId, class: &str, enabled: bool) {
        let mut state = self.state();
        let control = state.controls.entry(control.clone()).or_default();
        if enabled {
            control.classes.insert(class.to_string());
        } else {
            control.classes.remove(class);
        }
    }

    fn set_control_disabled(&self, control: &ControlId, disabled: bool) {
        self.state()
            .controls
            .entry(control.clone())
            .or_default()
            .disabled = disabled;
    }

    fn dispatch(&self, event: FormEvent) {
        let dispatched = DispatchedEvent {
            target: self.id.clone(),
            event,
        };
        self.own.publish(dispatched.clone());
        let ancestors = self
            .ancestors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for ancestor in ancestors {
            ancestor.publish(dispatched.clone());
        }
    }

    fn on_submit(&self, handler: SubmitHandler) -> SubmitHandlerId {
        let mut state = self.state();
        let id = SubmitHandlerId(state.next_handler_id);
        state.next_handler_id += 1;
        state.handlers.push((id, handler));
        id
    }

    fn remove_submit_handler(&self, id: SubmitHandlerId) -> bool {
        let mut state = self.state();
        let before = state.handlers.len();
        state.handlers.retain(|(registered, _)| *registered != id);
        state.handlers.len() != before
    }
}
