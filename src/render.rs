//! Template rendering for the preview.
//!
//! Every render starts from scratch: all files in the template's directory are
//! read and registered with a fresh [`Tera`] instance under their file names,
//! so includes, imports and parent templates in the same directory resolve
//! and any edit is visible on the next render. Failures never escape
//! [`Renderer::render`]; they become an HTML error document instead.

use crate::data::{self, DataStore};
use crate::error::RenderError;
use std::fs;
use std::path::{Path, PathBuf};
use tera::Tera;
use tracing::{debug, warn};

const ERROR_HTML: &str = include_str!("../static/error.html");
const LIVERELOAD_HTML: &str = include_str!("../static/livereload.html");

/// Closing tag the live-reload block is inserted in front of.
const CLOSING_TAG: &[u8] = b"</html>";

/// The template being previewed and the directory it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    path: PathBuf,
    dir: PathBuf,
    name: String,
}

impl TemplateRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { path, dir, name }
    }

    /// Path of the entry template as given.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory whose files make up the template set.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Renders the previewed template against the current data.
#[derive(Debug)]
pub struct Renderer {
    template: TemplateRef,
    editor: bool,
    error_page: Tera,
}

impl Renderer {
    /// `editor` controls whether patched pages carry the data-editing overlay.
    pub fn new(template: TemplateRef, editor: bool) -> Result<Self, tera::Error> {
        let mut error_page = Tera::default();
        error_page.add_raw_template("error.html", ERROR_HTML)?;
        Ok(Self {
            template,
            editor,
            error_page,
        })
    }

    /// Renders the template, or an error document if it cannot be rendered.
    ///
    /// With `patch` set the live-reload block is inserted before `</html>`.
    /// Error documents are patched too so the page recovers on its own once
    /// the template or the data is fixed.
    pub fn render(&self, data: &DataStore, patch: bool) -> Vec<u8> {
        let templates = self.load();

        // One snapshot for both the page and the editor contents.
        let snapshot = data.read();
        let body = match templates.and_then(|tera| self.execute(&tera, &snapshot)) {
            Ok(body) => body,
            Err(e) => {
                warn!("Render failed: {}", e.causes().join(": "));
                self.error_document(&e)
            }
        };

        if !patch {
            return body;
        }
        let editor_data = self.editor.then(|| data::pretty(&snapshot));
        drop(snapshot);

        let block = live_reload_block(editor_data.as_deref());
        inject_before_closing_tag(&body, block.as_bytes())
    }

    fn execute(&self, tera: &Tera, snapshot: &data::Context) -> Result<Vec<u8>, RenderError> {
        let context = tera::Context::from_serialize(snapshot).map_err(|source| {
            RenderError::Execute {
                path: self.template.path.clone(),
                source,
            }
        })?;

        let rendered = tera
            .render(&self.template.name, &context)
            .map_err(|source| RenderError::Execute {
                path: self.template.path.clone(),
                source,
            })?;
        Ok(rendered.into_bytes())
    }

    /// Parses every file in the template directory into one template set.
    fn load(&self) -> Result<Tera, RenderError> {
        let dir = &self.template.dir;
        let read_dir_err = |source| RenderError::ReadDir {
            path: dir.clone(),
            source,
        };

        let mut templates = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_dir_err)? {
            let path = entry.map_err(read_dir_err)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                debug!("Skipping file with non UTF-8 name: {}", path.display());
                continue;
            };
            match fs::read_to_string(&path) {
                Ok(content) => templates.push((name.to_string(), content)),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    debug!("Skipping non UTF-8 file: {}", path.display());
                }
                Err(source) => return Err(RenderError::ReadDir { path, source }),
            }
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(templates)
            .map_err(|source| RenderError::Parse {
                path: dir.clone(),
                source,
            })?;
        Ok(tera)
    }

    fn error_document(&self, error: &RenderError) -> Vec<u8> {
        let mut context = tera::Context::new();
        context.insert("kind", error.kind());
        context.insert("path", &error.path().display().to_string());
        context.insert("causes", &error.causes());

        match self.error_page.render("error.html", &context) {
            Ok(page) => page.into_bytes(),
            Err(e) => {
                warn!("Error page failed to render: {}", e);
                fallback_document(&error.causes().join("\n"))
            }
        }
    }
}

/// The script (and optional editor) injected into patched pages.
///
/// `editor_data` is the pretty-printed render context, or `None` to leave
/// the editor out.
pub fn live_reload_block(editor_data: Option<&str>) -> String {
    let enabled = if editor_data.is_some() { "true" } else { "false" };
    LIVERELOAD_HTML
        .replace("__EDITOR_ENABLED__", enabled)
        .replace("__EDITOR_DATA__", &js_string(editor_data.unwrap_or("{}")))
}

/// Encodes `s` as a JavaScript string literal safe inside a `<script>` element.
fn js_string(s: &str) -> String {
    let quoted = serde_json::Value::String(s.to_string()).to_string();
    quoted.replace("</", "<\\/")
}

/// Inserts `block` right before the last `</html>` in `html`.
///
/// The tag is matched case-insensitively. Documents without one come back
/// unchanged.
pub fn inject_before_closing_tag(html: &[u8], block: &[u8]) -> Vec<u8> {
    let Some(pos) = html
        .windows(CLOSING_TAG.len())
        .rposition(|w| w.eq_ignore_ascii_case(CLOSING_TAG))
    else {
        return html.to_vec();
    };

    let mut result = Vec::with_capacity(html.len() + block.len());
    result.extend_from_slice(&html[..pos]);
    result.extend_from_slice(block);
    result.extend_from_slice(&html[pos..]);
    result
}

/// A bare error document carrying `message` as preformatted text.
pub fn fallback_document(message: &str) -> Vec<u8> {
    format!(
        "<!DOCTYPE html>\n<html>\n<body>\n<pre>{}</pre>\n</body>\n</html>\n",
        tera::escape_html(message)
    )
    .into_bytes()
}
