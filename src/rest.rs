/*!
sheetsql REST API Server

Upload CSV/Excel files and query them in natural language. Questions are
translated into SQL by Gemini and executed against the uploaded table.

## Usage

```bash
GEMINI_API_KEY=... sheetsql-rest --host 0.0.0.0 --port 8000 --database sqlite://data.db
```

## Endpoints

- `GET /` - Greeting
- `POST /upload` - Upload a `.csv`, `.xlsx` or `.xls` file (multipart field `file`)
- `POST /query` - Ask a question about an uploaded file
- `GET /health` - Health check with the number of uploaded files
*/

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheetsql::loader::{self, FileFormat};
use sheetsql::reader::{Reader, SqliteReader};
use sheetsql::registry::{self, Registry, UploadedTable};
use sheetsql::table;
use sheetsql::translate::{GeminiGenerator, Translator, DEFAULT_BASE_URL, DEFAULT_MODEL};
use sheetsql::{SheetsqlError, VERSION};

/// Rows included in the upload response
const PREVIEW_ROWS: usize = 5;

/// CLI arguments for the REST API server
#[derive(Parser)]
#[command(name = "sheetsql-rest")]
#[command(about = "sheetsql REST API Server")]
#[command(version = VERSION)]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0", env = "SHEETSQL_HOST")]
    host: String,

    /// Port number to bind to
    #[arg(long, default_value = "8000", env = "SHEETSQL_PORT")]
    port: u16,

    /// CORS allowed origins (comma-separated)
    #[arg(long, default_value = "*")]
    cors_origin: String,

    /// SQLite database holding uploaded tables
    /// Example: sqlite://data.db or sqlite://memory
    #[arg(long, default_value = "sqlite://data.db", env = "SHEETSQL_DATABASE")]
    database: String,

    /// API key for the Gemini text-generation service
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: String,

    /// Gemini model used for SQL generation
    #[arg(long, default_value = DEFAULT_MODEL, env = "GEMINI_MODEL")]
    gemini_model: String,

    /// Gemini API base URL
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    gemini_base_url: String,

    /// Timeout for one Gemini request, in seconds
    #[arg(long, default_value = "60")]
    gemini_timeout_secs: u64,

    /// Maximum rows returned by /query (0 = unlimited)
    #[arg(long, default_value = "100")]
    max_result_rows: usize,

    /// Maximum upload size in megabytes
    #[arg(long, default_value = "50")]
    max_upload_mb: usize,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    /// Table store
    /// Wrapped in Arc<Mutex> since the SQLite Connection is not Sync
    reader: Arc<Mutex<SqliteReader>>,

    /// Uploaded files by file_id
    registry: Arc<Registry>,

    translator: Translator,

    /// Maximum rows returned by the query endpoint (0 = unlimited)
    max_result_rows: usize,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for /query endpoint
///
/// Missing fields behave like empty strings, so an absent `file_id` is
/// reported as an unknown file rather than a malformed body.
#[derive(Debug, Deserialize)]
struct QueryRequest {
    #[serde(default)]
    file_id: String,
    #[serde(default)]
    question: String,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: String,
}

/// Upload result data
#[derive(Debug, Serialize)]
struct UploadResult {
    file_id: String,
    filename: String,
    columns: Vec<String>,
    rows: usize,
    /// First rows of the table as objects
    preview: Vec<serde_json::Value>,
}

/// Query result data
#[derive(Debug, Serialize)]
struct QueryResult {
    /// SQL text that was executed
    sql_query: String,
    /// Array of row objects
    data: Vec<serde_json::Value>,
    /// Column names
    columns: Vec<String>,
    row_count: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    files: usize,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorDetail {
    detail: String,
}

// ============================================================================
// Error Handling
// ============================================================================

/// Custom error type for API responses
struct ApiErrorResponse {
    status: StatusCode,
    detail: String,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let json = Json(ErrorDetail {
            detail: self.detail,
        });
        (self.status, json).into_response()
    }
}

impl From<JsonRejection> for ApiErrorResponse {
    fn from(rejection: JsonRejection) -> Self {
        SheetsqlError::BadRequest(rejection.body_text()).into()
    }
}

impl From<MultipartRejection> for ApiErrorResponse {
    fn from(rejection: MultipartRejection) -> Self {
        SheetsqlError::BadRequest(rejection.body_text()).into()
    }
}

impl From<SheetsqlError> for ApiErrorResponse {
    fn from(err: SheetsqlError) -> Self {
        let status = match &err {
            SheetsqlError::UnsupportedFormat | SheetsqlError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            SheetsqlError::NotFound => StatusCode::NOT_FOUND,
            SheetsqlError::ParseFailure(_)
            | SheetsqlError::QueryExecution(_)
            | SheetsqlError::RejectedStatement(_)
            | SheetsqlError::Generation(_)
            | SheetsqlError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        warn!("Request failed with {}: {}", status, err);
        ApiErrorResponse {
            status,
            detail: err.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn lock_reader(state: &AppState) -> Result<MutexGuard<'_, SqliteReader>, SheetsqlError> {
    state.reader.lock().map_err(|e| {
        SheetsqlError::InternalError(format!(
            "Database connection unavailable (mutex poisoned): {}",
            e
        ))
    })
}

/// Read the `file` field of a multipart upload.
///
/// The extension is checked as soon as the file name is known, before the
/// body of the field is read.
async fn read_upload(multipart: &mut Multipart) -> Result<(String, Bytes), SheetsqlError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SheetsqlError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| SheetsqlError::BadRequest("Upload has no file name".to_string()))?;
        FileFormat::from_filename(&filename)?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| SheetsqlError::BadRequest(e.body_text()))?;
        return Ok((filename, bytes));
    }

    Err(SheetsqlError::BadRequest(
        "Missing multipart field 'file'".to_string(),
    ))
}

// ============================================================================
// Handler Functions
// ============================================================================

/// POST /upload - Load a file into the store
async fn upload_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResult>, ApiErrorResponse> {
    let mut multipart = multipart?;
    let (filename, bytes) = read_upload(&mut multipart).await?;
    info!("Uploading {} ({} bytes)", filename, bytes.len());

    let df = loader::load(&bytes, &filename)?;
    let columns = table::column_names(&df);

    let file_id = registry::generate_file_id();
    let table_name = registry::storage_name(&file_id);
    let rows = {
        let mut reader = lock_reader(&state)?;
        reader.register(&table_name, &df)?
    };

    let record = UploadedTable::new(file_id, filename, columns, rows);
    let preview = table::to_records(&df, Some(PREVIEW_ROWS));
    let file_id = state.registry.register(record.clone())?;

    info!(
        "Registered {} as '{}' ({} rows, {} columns)",
        record.filename,
        record.table_name,
        record.rows,
        record.columns.len()
    );

    Ok(Json(UploadResult {
        file_id,
        filename: record.filename,
        columns: record.columns,
        rows: record.rows,
        preview,
    }))
}

/// POST /query - Answer a question about an uploaded file
async fn query_handler(
    State(state): State<AppState>,
    request: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, ApiErrorResponse> {
    let Json(request) = request?;
    let record = state.registry.resolve(&request.file_id)?;
    info!(
        "Question for '{}': {} chars",
        record.table_name,
        request.question.len()
    );

    let sql = state
        .translator
        .translate(&record.table_name, &record.columns, &request.question)
        .await?;

    let df = {
        let reader = lock_reader(&state)?;
        reader.execute_sql(&sql)?
    };

    let total_rows = df.height();
    let limit = if state.max_result_rows > 0 && total_rows > state.max_result_rows {
        info!(
            "Truncating query results from {} to {} rows",
            total_rows, state.max_result_rows
        );
        Some(state.max_result_rows)
    } else {
        None
    };

    let data = table::to_records(&df, limit);
    Ok(Json(QueryResult {
        sql_query: sql,
        row_count: data.len(),
        columns: table::column_names(&df),
        data,
    }))
}

/// GET /health - Health check
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        files: state.registry.len(),
    })
}

/// Root handler
async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        message: "sheetsql API - Ready!".to_string(),
    })
}

/// Upload size limit in bytes for a limit given in megabytes
fn upload_limit_bytes(max_upload_mb: usize) -> anyhow::Result<usize> {
    max_upload_mb
        .checked_mul(1024 * 1024)
        .with_context(|| format!("--max-upload-mb {} is too large", max_upload_mb))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/upload", post(upload_handler))
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetsql_rest=info,sheetsql=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    info!("Opening table store {}", cli.database);
    let reader = SqliteReader::from_connection_string(&cli.database)?;

    let generator = GeminiGenerator::with_base_url(
        &cli.gemini_base_url,
        &cli.gemini_api_key,
        &cli.gemini_model,
        cli.gemini_timeout_secs,
    )?;
    info!("Generating SQL with {}", cli.gemini_model);

    // Create application state
    let state = AppState {
        reader: Arc::new(Mutex::new(reader)),
        registry: Arc::new(Registry::new()),
        translator: Translator::new(Arc::new(generator)),
        max_result_rows: cli.max_result_rows,
    };

    // Configure CORS
    let cors = if cli.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    } else {
        let origins: Vec<HeaderValue> = cli
            .cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    };

    let body_limit = upload_limit_bytes(cli.max_upload_mb)?;

    let app = router(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    info!("Starting sheetsql REST API server on {}", addr);
    info!("API documentation:");
    info!("  POST /upload - Upload a CSV/Excel file");
    info!("  POST /query  - Ask a question about an uploaded file");
    info!("  GET  /health - Health check");

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sheetsql::translate::SqlGenerator;
    use tower::util::ServiceExt;

    const BOUNDARY: &str = "sheetsql-test-boundary";

    /// Answers every prompt with `SELECT * FROM <table>` (fenced, like real
    /// model output), reading the table name from the prompt.
    struct SelectAllGenerator;

    #[async_trait]
    impl SqlGenerator for SelectAllGenerator {
        async fn generate(&self, prompt: &str) -> sheetsql::Result<String> {
            let table = prompt
                .lines()
                .find_map(|line| line.trim().strip_prefix("Table: "))
                .unwrap_or("missing");
            Ok(format!("```sql\nSELECT * FROM {};\n```", table))
        }

        fn name(&self) -> &str {
            "select-all"
        }
    }

    /// Replies with a fixed text regardless of the prompt
    struct FixedGenerator(String);

    #[async_trait]
    impl SqlGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> sheetsql::Result<String> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl SqlGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> sheetsql::Result<String> {
            Err(SheetsqlError::Generation(
                "429 Resource has been exhausted".to_string(),
            ))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn create_test_app() -> Router {
        create_test_app_with(Arc::new(SelectAllGenerator), 100)
    }

    fn create_test_app_with(generator: Arc<dyn SqlGenerator>, max_result_rows: usize) -> Router {
        let reader = SqliteReader::in_memory().unwrap();

        let state = AppState {
            reader: Arc::new(Mutex::new(reader)),
            registry: Arc::new(Registry::new()),
            translator: Translator::new(generator),
            max_result_rows,
        };

        router(state)
    }

    fn upload_request(filename: &str, content: &str) -> Request<Body> {
        upload_request_bytes(filename, content.as_bytes())
    }

    fn upload_request_bytes(filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            b = BOUNDARY,
            f = filename,
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn query_request(file_id: &str, question: &str) -> Request<Body> {
        let body = serde_json::json!({ "file_id": file_id, "question": question });
        Request::builder()
            .method("POST")
            .uri("/query")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    const SALES_CSV: &str = "Region,Total Sales,Units\nEU,100,4\nUS,250,9\nAPAC,75,3\n";

    // ========================================================================
    // Upload Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_upload_csv() {
        let app = create_test_app();

        let (status, json) = send(&app, upload_request("sales.csv", SALES_CSV)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["filename"], "sales.csv");
        assert_eq!(
            json["columns"],
            serde_json::json!(["Region", "Total_Sales", "Units"])
        );
        assert_eq!(json["rows"], 3);
        assert_eq!(json["file_id"].as_str().unwrap().len(), 8);
        assert_eq!(json["preview"].as_array().unwrap().len(), 3);
        assert_eq!(json["preview"][1]["Region"], "US");
        assert_eq!(json["preview"][1]["Total_Sales"], 250);
    }

    #[tokio::test]
    async fn test_upload_preview_is_capped() {
        let app = create_test_app();
        let csv: String = std::iter::once("n".to_string())
            .chain((1..=12).map(|i| i.to_string()))
            .collect::<Vec<_>>()
            .join("\n");

        let (status, json) = send(&app, upload_request("numbers.csv", &csv)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["rows"], 12);
        assert_eq!(json["preview"].as_array().unwrap().len(), PREVIEW_ROWS);
        assert_eq!(json["preview"][0]["n"], 1);
    }

    #[tokio::test]
    async fn test_upload_rejects_unsupported_extension() {
        let app = create_test_app();

        let (status, json) = send(&app, upload_request("data.txt", SALES_CSV)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Only Excel and CSV files supported");

        let (_, health) = send(&app, get_request("/health")).await;
        assert_eq!(health["files"], 0);
    }

    #[tokio::test]
    async fn test_upload_strips_empty_rows_and_columns() {
        let app = create_test_app();
        let csv = "id,blank,name\n1,,alice\n,,\n2,,bob\n";

        let (status, json) = send(&app, upload_request("people.csv", csv)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["columns"], serde_json::json!(["id", "name"]));
        assert_eq!(json["rows"], 2);
    }

    #[tokio::test]
    async fn test_upload_normalizes_unnamed_headers() {
        let app = create_test_app();
        let csv = "a,b,c,Unnamed: 3\n1,2,3,4\n";

        let (status, json) = send(&app, upload_request("t.csv", csv)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["columns"], serde_json::json!(["a", "b", "c", "column_4"]));
    }

    fn sales_workbook() -> Vec<u8> {
        use rust_xlsxwriter::{Format, Workbook};

        let mut workbook = Workbook::new();
        let date = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Region").unwrap();
        sheet.write_string(0, 1, "Total Sales").unwrap();
        sheet.write_string(0, 2, "Booked").unwrap();
        sheet.write_string(1, 0, "EU").unwrap();
        sheet.write_number(1, 1, 100.0).unwrap();
        sheet.write_number_with_format(1, 2, 45000.5, &date).unwrap();
        sheet.write_string(2, 0, "US").unwrap();
        sheet.write_number(2, 1, 250.0).unwrap();
        sheet.write_number_with_format(2, 2, 45001.0, &date).unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_query_xlsx() {
        let app = create_test_app();

        let (status, upload) =
            send(&app, upload_request_bytes("sales.xlsx", &sales_workbook())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            upload["columns"],
            serde_json::json!(["Region", "Total_Sales", "Booked"])
        );
        assert_eq!(upload["rows"], 2);
        assert_eq!(upload["preview"][0]["Total_Sales"], 100);
        assert_eq!(upload["preview"][0]["Booked"], "2023-03-15 12:00:00");

        let file_id = upload["file_id"].as_str().unwrap();
        let (status, json) = send(&app, query_request(file_id, "all bookings")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["row_count"], 2);
        assert_eq!(json["data"][1]["Region"], "US");
        assert_eq!(json["data"][1]["Total_Sales"], 250);
        assert_eq!(json["data"][1]["Booked"], "2023-03-16 00:00:00");
    }

    #[tokio::test]
    async fn test_upload_without_multipart_content_type() {
        let app = create_test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from("Region\nEU\n"))
            .unwrap();

        let (status, json) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["detail"].is_string());
    }

    #[tokio::test]
    async fn test_upload_corrupt_excel_is_internal_error() {
        let app = create_test_app();

        let (status, json) = send(&app, upload_request("book.xlsx", "not a workbook")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["detail"].is_string());
    }

    #[tokio::test]
    async fn test_upload_without_file_field() {
        let app = create_test_app();
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{b}--\r\n",
            b = BOUNDARY
        );
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, json) = send(&app, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["detail"], "Missing multipart field 'file'");
    }

    // ========================================================================
    // Query Endpoint Tests
    // ========================================================================

    #[tokio::test]
    async fn test_upload_then_query_round_trip() {
        let app = create_test_app();

        let (_, upload) = send(&app, upload_request("sales.csv", SALES_CSV)).await;
        let file_id = upload["file_id"].as_str().unwrap();

        let (status, json) = send(&app, query_request(file_id, "show everything")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["columns"], upload["columns"]);
        assert_eq!(
            json["sql_query"],
            format!("SELECT * FROM table_{};", file_id)
        );
        assert!(json["row_count"].as_u64().unwrap() <= upload["rows"].as_u64().unwrap());
        assert_eq!(json["row_count"], 3);
        assert_eq!(json["data"][2]["Region"], "APAC");
    }

    #[tokio::test]
    async fn test_reupload_gives_independent_tables() {
        let app = create_test_app();

        let (_, first) = send(&app, upload_request("sales.csv", SALES_CSV)).await;
        let (_, second) = send(&app, upload_request("sales.csv", SALES_CSV)).await;
        assert_ne!(first["file_id"], second["file_id"]);

        for upload in [&first, &second] {
            let file_id = upload["file_id"].as_str().unwrap();
            let (status, json) = send(&app, query_request(file_id, "all rows")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["row_count"], 3);
        }

        let (_, health) = send(&app, get_request("/health")).await;
        assert_eq!(health["files"], 2);
    }

    #[tokio::test]
    async fn test_query_unknown_file_id() {
        let app = create_test_app();

        let (status, json) = send(&app, query_request("ffffffff", "DROP everything")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["detail"], "File not found");
    }

    async fn send_query_body(
        app: &Router,
        content_type: Option<&str>,
        body: &'static str,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method("POST").uri("/query");
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        send(app, builder.body(Body::from(body)).unwrap()).await
    }

    #[tokio::test]
    async fn test_query_malformed_bodies_are_bad_requests() {
        let app = create_test_app();

        for (content_type, body) in [
            (Some("application/json"), "not json"),
            (Some("application/json"), r#"{"file_id": 123}"#),
            (None, r#"{"file_id": "deadbeef", "question": "?"}"#),
            (Some("text/plain"), r#"{"file_id": "deadbeef"}"#),
        ] {
            let (status, json) = send_query_body(&app, content_type, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
            assert!(
                !json["detail"].as_str().unwrap().is_empty(),
                "body: {}",
                body
            );
        }
    }

    #[tokio::test]
    async fn test_query_missing_file_id_is_not_found() {
        let app = create_test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/query")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"question": "how many rows?"}"#))
            .unwrap();

        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_results_are_truncated() {
        let app = create_test_app_with(Arc::new(SelectAllGenerator), 2);

        let (_, upload) = send(&app, upload_request("sales.csv", SALES_CSV)).await;
        let file_id = upload["file_id"].as_str().unwrap();

        let (status, json) = send(&app, query_request(file_id, "everything")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["row_count"], 2);
        assert_eq!(json["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_rejects_mutating_sql() {
        let app = create_test_app_with(
            Arc::new(FixedGenerator("DELETE FROM sqlite_master".to_string())),
            100,
        );

        let (_, upload) = send(&app, upload_request("sales.csv", SALES_CSV)).await;
        let file_id = upload["file_id"].as_str().unwrap();

        let (status, json) = send(&app, query_request(file_id, "delete it all")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["detail"]
            .as_str()
            .unwrap()
            .starts_with("Only single read-only SELECT statements"));
    }

    #[tokio::test]
    async fn test_query_invalid_sql_passes_store_message() {
        let app = create_test_app_with(
            Arc::new(FixedGenerator("SELECT nope FROM nowhere".to_string())),
            100,
        );

        let (_, upload) = send(&app, upload_request("sales.csv", SALES_CSV)).await;
        let file_id = upload["file_id"].as_str().unwrap();

        let (status, json) = send(&app, query_request(file_id, "?")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["detail"].as_str().unwrap().contains("no such table"));
    }

    #[tokio::test]
    async fn test_query_generation_failure() {
        let app = create_test_app_with(Arc::new(FailingGenerator), 100);

        let (_, upload) = send(&app, upload_request("sales.csv", SALES_CSV)).await;
        let file_id = upload["file_id"].as_str().unwrap();

        let (status, json) = send(&app, query_request(file_id, "anything")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["detail"], "429 Resource has been exhausted");
    }

    // ========================================================================
    // Utility Endpoint Tests
    // ========================================================================

    #[test]
    fn test_upload_limit_bytes() {
        assert_eq!(upload_limit_bytes(50).unwrap(), 50 * 1024 * 1024);
        assert_eq!(upload_limit_bytes(0).unwrap(), 0);
        assert!(upload_limit_bytes(usize::MAX).is_err());
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = create_test_app();

        let (status, json) = send(&app, get_request("/")).await;

        assert_eq!(status, StatusCode::OK);
        assert!(json["message"].as_str().unwrap().contains("Ready"));
    }

    #[tokio::test]
    async fn test_health_counts_uploads() {
        let app = create_test_app();

        let (status, json) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["files"], 0);

        for expected in 1..=3 {
            send(&app, upload_request("sales.csv", SALES_CSV)).await;
            let (_, json) = send(&app, get_request("/health")).await;
            assert_eq!(json["files"], expected);
        }
    }
}
