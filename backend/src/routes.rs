use actix_cors::Cors;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde_json::json;
use shared::{AnalyzeRequest, UploadResponse};
use std::io::Write;

use crate::error::ApiError;
use crate::inference::service::Analyzer;
use crate::storage::upload_store::UploadStore;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        warn!("Rejected analyze body: {}", err);
        ApiError::Validation(err.to_string()).into()
    });

    cfg.app_data(json_config)
        .service(web::resource("/upload").route(web::post().to(upload_file)))
        .service(web::resource("/analyze").route(web::post().to(analyze_image)))
        .service(web::resource("/health").route(web::get().to(health_check)));
}

pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600)
}

async fn upload_file(
    store: web::Data<UploadStore>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?
    {
        let file_name = match field.content_disposition() {
            Some(cd) if field.name() == Some("file") => cd.get_filename().map(str::to_string),
            _ => None,
        };
        let Some(file_name) = file_name else {
            continue;
        };

        let mut file_data = Vec::new();
        while let Some(chunk) = field.next().await {
            let data = chunk.map_err(|e| ApiError::Validation(e.to_string()))?;
            file_data
                .write_all(&data)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
        }
        upload = Some((file_name, file_data));
        break;
    }

    let Some((file_name, file_data)) = upload else {
        warn!("Upload rejected: no file part");
        return Err(ApiError::validation("No file part"));
    };

    let stored = store.save(&file_name, &file_data).await.map_err(|e| {
        warn!("Upload of {:?} rejected: {}", file_name, e);
        ApiError::from(e)
    })?;

    Ok(HttpResponse::Ok().json(UploadResponse {
        message: "File uploaded successfully".to_string(),
        filename: stored,
    }))
}

async fn analyze_image(
    store: web::Data<UploadStore>,
    analyzer: web::Data<Analyzer>,
    body: web::Json<AnalyzeRequest>,
) -> Result<HttpResponse, ApiError> {
    let Some(filename) = body.into_inner().filename.filter(|f| !f.is_empty()) else {
        warn!("Analyze rejected: no filename");
        return Err(ApiError::validation("No filename provided"));
    };

    let image_data = store.read(&filename).await.map_err(|e| {
        warn!("Analyze of {} failed to load image: {}", filename, e);
        ApiError::from(e)
    })?;

    let analyzer = analyzer.into_inner();
    let result = web::block(move || analyzer.analyze(&image_data))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| {
            error!("Analysis of {} failed: {}", filename, e);
            ApiError::from(e)
        })?;

    info!(
        "Analyzed {}: {} ({:.4})",
        filename, result.classification, result.confidence
    );
    Ok(HttpResponse::Ok().json(result))
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "OK" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageConfig, ModelOutput};
    use crate::inference::classifier::{Classifier, ClassifierError};
    use crate::inference::service::ClassCatalog;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use ndarray::Array4;
    use serde_json::Value;
    use shared::LesionClass;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    const BOUNDARY: &str = "dermascan-test-boundary";

    struct StubClassifier(Vec<f32>);

    impl Classifier for StubClassifier {
        fn predict(&self, _input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenClassifier;

    impl Classifier for BrokenClassifier {
        fn predict(&self, _input: &Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
            Err(ClassifierError::Backend("shape mismatch".to_string()))
        }
    }

    fn temp_store() -> (TempDir, UploadStore) {
        let dir = tempfile::Builder::new()
            .prefix("dermascan-routes-")
            .tempdir()
            .unwrap();
        let allowed: Vec<String> = ["png", "jpg", "jpeg", "gif"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let store = UploadStore::new(dir.path(), &allowed, false);
        store.ensure_dir().unwrap();
        (dir, store)
    }

    fn analyzer_with(classifier: Arc<dyn Classifier>) -> Analyzer {
        Analyzer::new(
            classifier,
            ClassCatalog::lesions(),
            ImageConfig::default(),
            ModelOutput::Probabilities,
        )
    }

    fn stub_analyzer() -> Analyzer {
        analyzer_with(Arc::new(StubClassifier(vec![
            0.10, 0.05, 0.05, 0.62, 0.08, 0.05, 0.05,
        ])))
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_fn(64, 48, |x, y| image::Rgb([x as u8 * 3, y as u8 * 4, 90]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn multipart(field: &str, file_name: &str, data: &[u8]) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        write!(
            body,
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .unwrap();
        body.extend_from_slice(data);
        write!(body, "\r\n--{BOUNDARY}--\r\n").unwrap();
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    fn upload_request(field: &str, file_name: &str, data: &[u8]) -> test::TestRequest {
        let (content_type, body) = multipart(field, file_name, data);
        test::TestRequest::post()
            .uri("/upload")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
    }

    fn analyze_request(body: Value) -> test::TestRequest {
        test::TestRequest::post().uri("/analyze").set_json(body)
    }

    macro_rules! app {
        ($store:expr, $analyzer:expr) => {
            test::init_service(
                App::new()
                    .wrap(cors_policy())
                    .app_data(web::Data::new($store.clone()))
                    .app_data(web::Data::new($analyzer))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn upload_with_empty_filename_is_rejected() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let resp = test::call_service(&app, upload_request("file", "", b"abc").to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No selected file");
    }

    #[actix_web::test]
    async fn upload_of_text_file_is_rejected() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let req = upload_request("file", "notes.txt", b"hello").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "File type not allowed");
    }

    #[actix_web::test]
    async fn upload_without_file_field_is_rejected() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let req = upload_request("image", "mole.png", &png_bytes()).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "No file part");
    }

    #[actix_web::test]
    async fn upload_of_png_stores_exact_bytes() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let data = png_bytes();
        let req = upload_request("file", "mole.png", &data).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: UploadResponse = test::read_body_json(resp).await;
        assert_eq!(body.message, "File uploaded successfully");
        let (token, original) = body.filename.split_once('_').unwrap();
        assert!(Uuid::parse_str(token).is_ok());
        assert_eq!(original, "mole.png");

        let stored = std::fs::read(store.dir().join(&body.filename)).unwrap();
        assert_eq!(stored, data);
    }

    #[actix_web::test]
    async fn analyze_without_filename_is_rejected() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        for body in [json!({}), json!({ "filename": "" }), json!({ "filename": null })] {
            let resp = test::call_service(&app, analyze_request(body).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "No filename provided");
        }
    }

    #[actix_web::test]
    async fn analyze_rejects_path_traversal() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let req = analyze_request(json!({ "filename": "../Cargo.toml" })).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid filename");
    }

    #[actix_web::test]
    async fn analyze_of_missing_file_is_not_found_every_time() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        for _ in 0..2 {
            let req = analyze_request(json!({ "filename": "missing_mole.png" })).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            let body: Value = test::read_body_json(resp).await;
            assert!(body["error"].as_str().unwrap().contains("missing_mole.png"));
        }
    }

    #[actix_web::test]
    async fn upload_then_analyze_is_deterministic() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let req = upload_request("file", "Mole Scan.PNG", &png_bytes()).to_request();
        let uploaded: UploadResponse = test::call_and_read_body_json(&app, req).await;
        assert!(uploaded.filename.ends_with("_Mole_Scan.PNG"));

        let mut results = Vec::new();
        for _ in 0..2 {
            let req = analyze_request(json!({ "filename": &uploaded.filename })).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let body: shared::AnalysisResult = test::read_body_json(resp).await;
            results.push(body);
        }

        let first = &results[0];
        assert_eq!(first, &results[1]);
        assert_eq!(first.classification, LesionClass::BasalCellCarcinoma);
        assert!((0.0..=1.0).contains(&first.confidence));
        assert!((first.confidence - 0.62).abs() < 1e-6);
        assert_eq!(first.description, LesionClass::BasalCellCarcinoma.description());
    }

    #[actix_web::test]
    async fn analyze_of_corrupt_image_is_unprocessable() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let req = upload_request("file", "fake.png", b"not really a png").to_request();
        let uploaded: UploadResponse = test::call_and_read_body_json(&app, req).await;

        let req = analyze_request(json!({ "filename": &uploaded.filename })).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn model_failure_is_a_server_error() {
        let (_dir, store) = temp_store();
        let app = app!(store, analyzer_with(Arc::new(BrokenClassifier)));
        let req = upload_request("file", "mole.jpg", &png_bytes()).to_request();
        let uploaded: UploadResponse = test::call_and_read_body_json(&app, req).await;

        let req = analyze_request(json!({ "filename": &uploaded.filename })).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("shape mismatch"));
    }

    #[actix_web::test]
    async fn malformed_json_is_a_client_error() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let req = test::TestRequest::post()
            .uri("/analyze")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{\"filename\":")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn cross_origin_requests_are_allowed() {
        let (_dir, store) = temp_store();
        let app = app!(store, stub_analyzer());
        let req = test::TestRequest::get()
            .uri("/health")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "OK");
    }
}
