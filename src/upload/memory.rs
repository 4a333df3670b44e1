//! In-memory surface host and form.
//!
//! Reference implementations of the upload capabilities. They model the
//! full protocol, including opaque replies that cannot be read back, so the
//! upload path is exercisable without a real rendering surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::{
    FieldToken, FormAttributes, HiddenSurface, MULTIPART_ENCODING, SurfaceHost, UploadError,
    UploadForm,
};

#[derive(Debug, Clone)]
enum Delivery {
    Document(String),
    Opaque,
}

#[derive(Default)]
struct HostState {
    pending: HashMap<String, oneshot::Sender<Delivery>>,
    detached: Vec<String>,
}

/// Surface host keeping one mailbox per created surface. Documents are
/// delivered by name; an undelivered surface never reports loaded.
#[derive(Clone, Default)]
pub struct MemorySurfaceHost {
    state: Arc<Mutex<HostState>>,
}

impl MemorySurfaceHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a document to a surface. Returns false when no surface with
    /// that name is waiting.
    pub fn deliver(&self, surface: &str, document: impl Into<String>) -> bool {
        self.send(surface, Delivery::Document(document.into()))
    }

    /// Mark a surface as loaded with a reply that cannot be read back, the
    /// way an opaque cross-origin document behaves.
    pub fn deliver_opaque(&self, surface: &str) -> bool {
        self.send(surface, Delivery::Opaque)
    }

    fn send(&self, surface: &str, delivery: Delivery) -> bool {
        let sender = {
            let mut state = self.state.lock().expect("surface host lock poisoned");
            state.pending.remove(surface)
        };
        match sender {
            Some(sender) => sender.send(delivery).is_ok(),
            None => false,
        }
    }

    /// Names of surfaces created but not yet delivered to.
    pub fn waiting(&self) -> Vec<String> {
        let state = self.state.lock().expect("surface host lock poisoned");
        let mut names: Vec<String> = state.pending.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of surfaces that have been detached, in detach order.
    pub fn detached(&self) -> Vec<String> {
        let state = self.state.lock().expect("surface host lock poisoned");
        state.detached.clone()
    }
}

#[async_trait]
impl SurfaceHost for MemorySurfaceHost {
    async fn create(&self, name: &str) -> Result<Box<dyn HiddenSurface>, UploadError> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.state.lock().expect("surface host lock poisoned");
            state.pending.insert(name.to_string(), sender);
        }
        Ok(Box::new(MemorySurface {
            name: name.to_string(),
            receiver: Some(receiver),
            delivery: None,
            host: self.state.clone(),
        }))
    }
}

struct MemorySurface {
    name: String,
    receiver: Option<oneshot::Receiver<Delivery>>,
    delivery: Option<Delivery>,
    host: Arc<Mutex<HostState>>,
}

#[async_trait]
impl HiddenSurface for MemorySurface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn wait_loaded(&mut self) -> Result<(), UploadError> {
        let receiver = self
            .receiver
            .take()
            .ok_or_else(|| UploadError::Surface("surface already consumed".to_string()))?;
        let delivery = receiver
            .await
            .map_err(|_| UploadError::Surface("load signal dropped".to_string()))?;
        self.delivery = Some(delivery);
        Ok(())
    }

    fn read_document(&mut self) -> Result<String, UploadError> {
        match &self.delivery {
            Some(Delivery::Document(document)) => Ok(document.clone()),
            Some(Delivery::Opaque) => Err(UploadError::Document(
                "reply document is opaque".to_string(),
            )),
            None => Err(UploadError::Document("no document loaded".to_string())),
        }
    }

    async fn detach(self: Box<Self>) {
        let mut state = self.host.lock().expect("surface host lock poisoned");
        state.pending.remove(&self.name);
        state.detached.push(self.name.clone());
    }
}

/// Everything one submission observed: the attributes in force and the field
/// values that went with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub target: Option<String>,
    pub method: Option<String>,
    pub encoding: Option<String>,
    pub action: Option<String>,
    pub fields: Vec<(String, String)>,
}

struct FormField {
    token: FieldToken,
    name: String,
    value: String,
}

#[derive(Default)]
struct FormState {
    attributes: FormAttributes,
    fields: Vec<FormField>,
    next_token: FieldToken,
    submissions: Vec<SubmissionRecord>,
    responder: Option<(MemorySurfaceHost, Option<String>)>,
    fail_next: bool,
}

/// Form whose submissions are recorded and, when wired to a host, answered
/// by delivering a canned document to whatever surface the form targets.
#[derive(Clone, Default)]
pub struct MemoryForm {
    state: Arc<Mutex<FormState>>,
}

impl MemoryForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multipart form posting to `action`.
    pub fn multipart(action: impl Into<String>) -> Self {
        let form = Self::new();
        form.apply(&FormAttributes {
            target: None,
            method: Some("POST".to_string()),
            encoding: Some(MULTIPART_ENCODING.to_string()),
            action: Some(action.into()),
        });
        form
    }

    /// Plain form posting to `action`; takes the standard wire path.
    pub fn urlencoded(action: impl Into<String>) -> Self {
        let form = Self::new();
        form.apply(&FormAttributes {
            target: None,
            method: Some("POST".to_string()),
            encoding: Some("application/x-www-form-urlencoded".to_string()),
            action: Some(action.into()),
        });
        form
    }

    /// On submit, deliver `document` to the surface the form targets.
    pub fn with_host(self, host: Arc<MemorySurfaceHost>, document: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock().expect("form lock poisoned");
            state.responder = Some(((*host).clone(), Some(document.into())));
        }
        self
    }

    /// On submit, deliver an opaque reply to the surface the form targets.
    pub fn with_opaque_host(self, host: Arc<MemorySurfaceHost>) -> Self {
        {
            let mut state = self.state.lock().expect("form lock poisoned");
            state.responder = Some(((*host).clone(), None));
        }
        self
    }

    /// Add a regular (non-injected) field.
    pub fn add_field(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut state = self.state.lock().expect("form lock poisoned");
        let token = state.next_token;
        state.next_token += 1;
        state.fields.push(FormField {
            token,
            name: name.into(),
            value: value.into(),
        });
    }

    /// Make the next submit fail.
    pub fn fail_next_submit(&self) {
        let mut state = self.state.lock().expect("form lock poisoned");
        state.fail_next = true;
    }

    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        let state = self.state.lock().expect("form lock poisoned");
        state.submissions.clone()
    }
}

impl UploadForm for MemoryForm {
    fn attributes(&self) -> FormAttributes {
        let state = self.state.lock().expect("form lock poisoned");
        state.attributes.clone()
    }

    fn apply(&self, attributes: &FormAttributes) {
        let mut state = self.state.lock().expect("form lock poisoned");
        state.attributes = attributes.clone();
    }

    fn fields(&self) -> Vec<(String, String)> {
        let state = self.state.lock().expect("form lock poisoned");
        state
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.value.clone()))
            .collect()
    }

    fn inject_field(&self, name: &str, value: &str) -> FieldToken {
        let mut state = self.state.lock().expect("form lock poisoned");
        let token = state.next_token;
        state.next_token += 1;
        state.fields.push(FormField {
            token,
            name: name.to_string(),
            value: value.to_string(),
        });
        token
    }

    fn remove_field(&self, token: FieldToken) {
        let mut state = self.state.lock().expect("form lock poisoned");
        state.fields.retain(|field| field.token != token);
    }

    fn submit(&self) -> Result<(), UploadError> {
        let (responder, target) = {
            let mut state = self.state.lock().expect("form lock poisoned");
            if state.fail_next {
                state.fail_next = false;
                return Err(UploadError::Submit("simulated submit failure".to_string()));
            }
            let record = SubmissionRecord {
                target: state.attributes.target.clone(),
                method: state.attributes.method.clone(),
                encoding: state.attributes.encoding.clone(),
                action: state.attributes.action.clone(),
                fields: state
                    .fields
                    .iter()
                    .map(|field| (field.name.clone(), field.value.clone()))
                    .collect(),
            };
            state.submissions.push(record);
            (state.responder.clone(), state.attributes.target.clone())
        };
        if let (Some((host, document)), Some(target)) = (responder, target) {
            match document {
                Some(document) => host.deliver(&target, document),
                None => host.deliver_opaque(&target),
            };
        }
        Ok(())
    }
}
