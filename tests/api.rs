use std::{
    io::{Cursor, Read, Write},
    num::NonZeroU64,
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use tracing::level_filters::LevelFilter;
use zip::{ZipArchive, ZipWriter, write::SimpleFileOptions};

use stampo::{
    application::fill::FillService,
    config::{
        AuthSettings, LimitsSettings, LogFormat, LoggingSettings, RenderSettings, ServerSettings,
        Settings,
    },
    infra::http::{HttpState, build_router},
};

const CONTENT_TYPES: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
<Default Extension=\"xml\" ContentType=\"application/xml\"/>\
<Override PartName=\"/word/document.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
</Types>";

const ROOT_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"word/document.xml\"/>\
</Relationships>";

const DOCUMENT_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
</Relationships>";

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|text| format!("<w:p><w:r><w:t xml:space=\"preserve\">{text}</w:t></w:r></w:p>"))
        .collect();
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
<w:body>{body}<w:sectPr/></w:body></w:document>"
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in [
        ("[Content_Types].xml", CONTENT_TYPES),
        ("_rels/.rels", ROOT_RELS),
        ("word/_rels/document.xml.rels", DOCUMENT_RELS),
        ("word/document.xml", document.as_str()),
    ] {
        writer.start_file(name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn settings(api_key: Option<&str>) -> Settings {
    Settings {
        server: ServerSettings {
            addr: "127.0.0.1:3000".parse().unwrap(),
        },
        auth: AuthSettings {
            api_key: api_key.map(str::to_string),
        },
        logging: LoggingSettings {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
        },
        limits: LimitsSettings {
            max_body_bytes: NonZeroU64::new(8 * 1024 * 1024).unwrap(),
        },
        render: RenderSettings {
            delimiter_start: "%%".to_string(),
            delimiter_end: "%%".to_string(),
            paragraph_loop: true,
            linebreaks: true,
            expressions: false,
            timeout: Duration::from_secs(5),
        },
    }
}

fn router_with(settings: Settings) -> axum::Router {
    let max_body_bytes = settings.limits.max_body_bytes.get() as usize;
    let state = HttpState {
        fill: Arc::new(FillService::new(&settings)),
    };
    build_router(state, max_body_bytes)
}

fn router(api_key: Option<&str>) -> axum::Router {
    router_with(settings(api_key))
}

fn fill_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/fill")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn rendered_document(body: &Value) -> String {
    let encoded = body["docxBase64"].as_str().expect("docxBase64 present");
    let bytes = STANDARD.decode(encoded).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut document = String::new();
    archive
        .by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut document)
        .unwrap();
    document
}

#[tokio::test]
async fn health_endpoint_reports_running() {
    let response = router(None)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("running"));
}

#[tokio::test]
async fn fill_renders_scalar_placeholders() {
    let template = STANDARD.encode(docx(&["Hello %%name%%!"]));
    let response = router(None)
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": { "name": "Ada" },
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let document = rendered_document(&body);
    assert!(document.contains("Hello Ada!"), "document: {document}");
}

#[tokio::test]
async fn missing_fields_yield_bad_request() {
    let response = router(None)
        .oneshot(fill_request(json!({ "data": { "name": "Ada" } })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body, json!({ "error": "Missing templateBase64 or data" }));
}

#[tokio::test]
async fn null_data_yields_bad_request() {
    let template = STANDARD.encode(docx(&["Hello"]));
    let response = router(None)
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": null,
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_api_key_is_forbidden() {
    let template = STANDARD.encode(docx(&["Hello"]));
    let response = router(Some("expected"))
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": {},
            "apiKey": "wrong",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body, json!({ "error": "Invalid API key" }));
}

#[tokio::test]
async fn absent_api_key_is_forbidden_when_configured() {
    let template = STANDARD.encode(docx(&["Hello"]));
    let response = router(Some("expected"))
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": {},
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn api_key_is_ignored_when_none_is_configured() {
    let template = STANDARD.encode(docx(&["Hello %%name%%"]));
    let response = router(None)
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": { "name": "Ada" },
            "apiKey": "anything",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unbalanced_delimiters_report_syntax_errors() {
    let template = STANDARD.encode(docx(&["Broken %%name here"]));
    let response = router(None)
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": { "name": "Ada" },
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "template_syntax_error");
    assert!(!body["details"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn loop_over_non_sequence_reports_render_error() {
    let template = STANDARD.encode(docx(&["%%#items%%", "%%name%%", "%%/items%%"]));
    let response = router(None)
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": { "items": "not a list" },
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "render_error");
    assert!(body["details"].as_str().unwrap().contains("items"));
}

#[tokio::test]
async fn non_zip_template_is_invalid() {
    let response = router(None)
        .oneshot(fill_request(json!({
            "templateBase64": STANDARD.encode(b"plain text, not a zip"),
            "data": {},
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "invalid_template");
}

#[tokio::test]
async fn render_exceeding_the_deadline_reports_a_timeout() {
    let mut config = settings(None);
    config.render.timeout = Duration::from_nanos(1);
    let template = STANDARD.encode(docx(&["%%#items%%", "Item: %%value%%", "%%/items%%"]));
    let items: Vec<Value> = (0..5_000).map(|n| json!({ "value": n })).collect();
    let response = router_with(config)
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": { "items": items },
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "render_timeout");
    assert!(body["details"].as_str().unwrap().contains("did not finish"));
}

#[tokio::test]
async fn paragraph_loop_repeats_rows() {
    let template = STANDARD.encode(docx(&["%%#people%%", "Name: %%name%%", "%%/people%%"]));
    let response = router(None)
        .oneshot(fill_request(json!({
            "templateBase64": template,
            "data": { "people": [ { "name": "Ada" }, { "name": "Alan" } ] },
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let document = rendered_document(&body);
    assert!(document.contains("Name: Ada"), "document: {document}");
    assert!(document.contains("Name: Alan"));
}
