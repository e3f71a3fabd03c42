//! Template fill pipeline: authenticate, decode the submitted package, render
//! it against the request data, and hand back the finished document.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;
use serde_json::Value;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use stampo_engine::{
    Delimiters, Engine, EngineError, ExpressionsModule, ImageModule, ImageOptions, RenderOptions,
    TemplateArchive,
};

use crate::config::{AuthSettings, RenderSettings, Settings};

/// Body of a fill request. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequest {
    pub template_base64: Option<String>,
    pub data: Option<Value>,
    pub api_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum FillError {
    #[error("missing templateBase64 or data")]
    MissingInput,
    #[error("invalid API key")]
    Unauthorized,
    #[error("invalid template: {0}")]
    InvalidTemplate(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("rendering did not finish within {0:?}")]
    Timeout(Duration),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stateless service carrying the settings a fill needs.
#[derive(Clone)]
pub struct FillService {
    auth: AuthSettings,
    render: RenderSettings,
}

impl FillService {
    pub fn new(settings: &Settings) -> Self {
        Self {
            auth: settings.auth.clone(),
            render: settings.render.clone(),
        }
    }

    pub async fn fill(&self, request: FillRequest) -> Result<String, FillError> {
        self.authorize(request.api_key.as_deref())?;

        let template_base64 = request
            .template_base64
            .filter(|value| !value.is_empty())
            .ok_or(FillError::MissingInput)?;
        let data = match request.data {
            Some(Value::Null) | None => return Err(FillError::MissingInput),
            Some(data) => data,
        };

        let template = STANDARD
            .decode(template_base64.trim())
            .map_err(|err| FillError::InvalidTemplate(format!("invalid base64 template: {err}")))?;

        debug!(
            target = "stampo::fill",
            template_bytes = template.len(),
            "starting render"
        );

        // Rendering is CPU-bound, so it runs off the async workers with a
        // deadline that turns runaway templates into a clean failure. The
        // cancel flag makes the blocking task stop instead of holding a pool
        // thread after the deadline passes.
        let settings = self.render.clone();
        let timeout = settings.timeout;
        let cancel = Arc::new(AtomicBool::new(false));
        let render_cancel = Arc::clone(&cancel);
        let render = tokio::task::spawn_blocking(move || {
            render_document(settings, template, data, render_cancel)
        });
        match tokio::time::timeout(timeout, render).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(FillError::Internal(format!(
                "render task failed: {join_error}"
            ))),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                Err(FillError::Timeout(timeout))
            }
        }
    }

    fn authorize(&self, presented: Option<&str>) -> Result<(), FillError> {
        let Some(expected) = self.auth.api_key.as_deref() else {
            return Ok(());
        };
        let presented = presented.unwrap_or_default();
        if presented.as_bytes().ct_eq(expected.as_bytes()).into() {
            Ok(())
        } else {
            Err(FillError::Unauthorized)
        }
    }
}

fn render_document(
    settings: RenderSettings,
    template: Vec<u8>,
    data: Value,
    cancel: Arc<AtomicBool>,
) -> Result<String, FillError> {
    let archive = TemplateArchive::from_bytes(&template).map_err(|err| match err {
        EngineError::Archive(message) => FillError::InvalidTemplate(message),
        other => FillError::Engine(other),
    })?;

    let options = RenderOptions {
        delimiters: Delimiters {
            start: settings.delimiter_start.clone(),
            end: settings.delimiter_end.clone(),
        },
        paragraph_loop: settings.paragraph_loop,
        linebreaks: settings.linebreaks,
        null_getter: Box::new(|_| String::new()),
        cancel,
    };

    let mut engine = Engine::new(archive, options);
    engine.attach_module(Box::new(ImageModule::new(ImageOptions::default())));
    if settings.expressions {
        engine.attach_module(Box::new(ExpressionsModule));
    }

    engine.render(&data).map_err(|err| match err {
        EngineError::Archive(message) => FillError::InvalidTemplate(message),
        other => FillError::Engine(other),
    })?;

    let rendered = engine
        .into_archive()
        .to_bytes()
        .map_err(|err| FillError::Internal(err.to_string()))?;

    Ok(STANDARD.encode(rendered))
}
