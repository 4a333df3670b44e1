//! Hidden-surface form uploads.
//!
//! Multipart forms cannot travel the standard wire path; they are submitted
//! natively into a hidden rendering surface whose loaded document carries
//! the server reply. The transport drives that protocol through the
//! [`SurfaceHost`], [`HiddenSurface`], and [`UploadForm`] capabilities so it
//! never depends on a concrete surface technology.

pub mod memory;

pub use memory::{MemoryForm, MemorySurfaceHost, SubmissionRecord};

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;

use crate::request::options::Params;

/// Form encoding that forces the upload path.
pub const MULTIPART_ENCODING: &str = "multipart/form-data";

/// Token identifying one injected hidden field.
pub type FieldToken = u64;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("surface unavailable: {0}")]
    Surface(String),

    #[error("form submission failed: {0}")]
    Submit(String),

    #[error("surface document unreadable: {0}")]
    Document(String),
}

/// Mutable form attributes saved before an upload and restored afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormAttributes {
    pub target: Option<String>,
    pub method: Option<String>,
    pub encoding: Option<String>,
    pub action: Option<String>,
}

/// A submittable form.
pub trait UploadForm: Send + Sync {
    fn attributes(&self) -> FormAttributes;

    /// Overwrite the form's mutable attributes.
    fn apply(&self, attributes: &FormAttributes);

    /// Current field values in document order.
    fn fields(&self) -> Vec<(String, String)>;

    /// Add a hidden field, returning a token for later removal.
    fn inject_field(&self, name: &str, value: &str) -> FieldToken;

    fn remove_field(&self, token: FieldToken);

    /// Submit natively. Fire-and-forget: the reply arrives on the surface
    /// the form targets, not here.
    fn submit(&self) -> Result<(), UploadError>;

    fn is_multipart(&self) -> bool {
        self.attributes()
            .encoding
            .map(|encoding| encoding.to_ascii_lowercase().contains(MULTIPART_ENCODING))
            .unwrap_or(false)
    }
}

/// Creates hidden surfaces on demand.
#[async_trait]
pub trait SurfaceHost: Send + Sync {
    async fn create(&self, name: &str) -> Result<Box<dyn HiddenSurface>, UploadError>;
}

/// A hidden rendering surface a form can target.
#[async_trait]
pub trait HiddenSurface: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve once, when the surface has loaded a document.
    async fn wait_loaded(&mut self) -> Result<(), UploadError>;

    /// Text content of the loaded document.
    fn read_document(&mut self) -> Result<String, UploadError>;

    async fn detach(self: Box<Self>);
}

/// Run one hidden-surface upload.
///
/// The form's attributes are redirected at the surface, extra params are
/// injected as hidden fields, and both are restored immediately after
/// submission. Reply read failures are deliberately silent: the caller gets
/// an empty body and the upload still counts as delivered. Only surface
/// creation and submission itself can fail.
pub async fn execute_form_upload(
    host: &dyn SurfaceHost,
    form: &dyn UploadForm,
    url: &str,
    params: &Params,
    surface_name: &str,
    detach_grace: Duration,
) -> Result<String, UploadError> {
    let mut surface = host.create(surface_name).await?;

    let saved = form.attributes();
    form.apply(&FormAttributes {
        target: Some(surface.name().to_string()),
        method: Some("POST".to_string()),
        encoding: Some(MULTIPART_ENCODING.to_string()),
        action: Some(url.to_string()),
    });
    let tokens: Vec<FieldToken> = params
        .pairs()
        .iter()
        .map(|(name, value)| form.inject_field(name, value))
        .collect();

    let submitted = form.submit();

    form.apply(&saved);
    for token in tokens {
        form.remove_field(token);
    }
    if let Err(err) = submitted {
        detach_after(surface, detach_grace);
        return Err(err);
    }

    if let Err(err) = surface.wait_loaded().await {
        log::debug!("upload surface {surface_name} never loaded: {err}");
        detach_after(surface, detach_grace);
        return Ok(String::new());
    }

    let document = match surface.read_document() {
        Ok(document) => document,
        Err(err) => {
            log::debug!("upload reply on {surface_name} is unreadable: {err}");
            String::new()
        }
    };
    detach_after(surface, detach_grace);

    Ok(unwrap_textarea(&document))
}

/// Surfaces are torn down on a delay so late reply activity has settled.
fn detach_after(surface: Box<dyn HiddenSurface>, grace: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        surface.detach().await;
    });
}

/// Servers wrap structured reply text in a leading `<textarea>` so the
/// surface does not interpret it as markup. Unwrap that convention; any
/// other document passes through unchanged.
fn unwrap_textarea(document: &str) -> String {
    static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("body selector"));

    let html = Html::parse_document(document);
    let Some(body) = html.select(&BODY).next() else {
        return document.to_string();
    };
    for child in body.children() {
        match child.value() {
            Node::Text(text) if text.trim().is_empty() => continue,
            Node::Element(element) if element.name() == "textarea" => {
                if let Some(textarea) = ElementRef::wrap(child) {
                    return html_escape::decode_html_entities(&textarea.inner_html()).into_owned();
                }
                break;
            }
            _ => break,
        }
    }
    document.to_string()
}
