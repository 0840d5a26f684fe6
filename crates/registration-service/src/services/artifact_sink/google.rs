//! Google Workspace sink: Drive v3 for artifacts, Sheets v4 for rows.
//!
//! # Drive
//!
//! - Folders are looked up with `files.list` by name, parent, folder MIME
//!   type and `trashed = false` before `files.create` is called.
//! - Files use the multipart upload endpoint, then receive an
//!   `anyone/reader` permission so the returned `webViewLink` is shareable.
//!
//! # Sheets
//!
//! One sheet per event inside the configured spreadsheet. A missing sheet is
//! added with `batchUpdate addSheet`. The header row is written whenever the
//! sheet has no first cell yet, so a sheet left empty by an interrupted
//! creation still gets its header before the first data row.
//!
//! Access tokens are read from the `TokenReceiver` on every request, so a
//! refresh by the token manager takes effect immediately.

use super::{ArtifactSink, FolderRegistry, SinkError, StoredFile};
use crate::config::GoogleConfig;
use bytes::Bytes;
use common::secret::ExposeSecret;
use common::token_manager::TokenReceiver;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Timeout for Drive/Sheets requests; uploads of a few MiB fit comfortably.
const GOOGLE_REQUEST_TIMEOUT_SECS: u64 = 30;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileId>,
}

#[derive(Debug, Deserialize)]
struct FileId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFileResponse {
    id: String,
    web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMetadata {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Escape a value for a Drive `q` string literal.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build the Drive query that finds a folder by name under a parent.
pub fn folder_query(parent_id: &str, name: &str) -> String {
    format!(
        "name='{}' and mimeType='{FOLDER_MIME_TYPE}' and '{}' in parents and trashed=false",
        escape_query_value(name),
        escape_query_value(parent_id),
    )
}

/// A1 range that addresses the first cell of `sheet`.
fn sheet_range(sheet: &str) -> String {
    format!("'{}'!A1", sheet.replace('\'', "''"))
}

/// Default shareable link when Drive omits `webViewLink`.
fn drive_view_link(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{file_id}/view")
}

/// Google Drive + Sheets sink.
pub struct GoogleWorkspaceSink {
    client: Client,
    tokens: TokenReceiver,
    root_folder_id: String,
    spreadsheet_id: Option<String>,
    drive_api_base: String,
    upload_api_base: String,
    sheets_api_base: String,
    folders: FolderRegistry,
    sheets: FolderRegistry,
}

impl GoogleWorkspaceSink {
    /// Create a sink for the configured Drive folder and spreadsheet.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Io` if the HTTP client cannot be built.
    pub fn new(config: &GoogleConfig, tokens: TokenReceiver) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(GOOGLE_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "reg.sink.google", error = %e, "Failed to build HTTP client");
                SinkError::Io(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            tokens,
            root_folder_id: config.drive_folder_id.clone(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            drive_api_base: config.drive_api_base.clone(),
            upload_api_base: config.upload_api_base.clone(),
            sheets_api_base: config.sheets_api_base.clone(),
            folders: FolderRegistry::new(),
            sheets: FolderRegistry::new(),
        })
    }

    /// `base` with `segments` appended, each percent-encoded.
    fn api_url(base: &str, segments: &[&str]) -> Result<Url, SinkError> {
        let mut url = Url::parse(base)
            .map_err(|e| SinkError::InvalidResponse(format!("Invalid API base '{base}': {e}")))?;
        url.path_segments_mut()
            .map_err(|()| SinkError::InvalidResponse(format!("API base '{base}' cannot be a base")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.tokens.token();
        request.bearer_auth(token.expose_secret())
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response, SinkError> {
        let response = self.authorized(request).send().await.map_err(|e| {
            warn!(target: "reg.sink.google", operation, error = %e, "Google request failed");
            SinkError::Unavailable(format!("{operation}: {e}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            warn!(target: "reg.sink.google", operation, "Google resource not found");
            Err(SinkError::NotFound(format!("{operation}: HTTP {status}")))
        } else if status.is_server_error() || status.as_u16() == 429 {
            warn!(target: "reg.sink.google", operation, status = %status, "Google returned server error");
            Err(SinkError::Unavailable(format!("{operation}: HTTP {status}")))
        } else {
            warn!(target: "reg.sink.google", operation, status = %status, body = %body, "Google rejected request");
            Err(SinkError::Rejected(format!("{operation}: HTTP {status}")))
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: Response,
        operation: &str,
    ) -> Result<T, SinkError> {
        response.json().await.map_err(|e| {
            error!(target: "reg.sink.google", operation, error = %e, "Failed to parse Google response");
            SinkError::InvalidResponse(format!("{operation}: {e}"))
        })
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, SinkError> {
        let url = Self::api_url(&self.drive_api_base, &["files"])?;
        let query = folder_query(parent_id, name);
        let request = self.client.get(url).query(&[
            ("q", query.as_str()),
            ("fields", "files(id)"),
            ("pageSize", "1"),
        ]);

        let list: FileList = Self::parse(self.send(request, "files.list").await?, "files.list").await?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, SinkError> {
        let url = Self::api_url(&self.drive_api_base, &["files"])?;
        let request = self.client.post(url).query(&[("fields", "id")]).json(&json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        }));

        let created: FileId =
            Self::parse(self.send(request, "files.create").await?, "files.create").await?;
        Ok(created.id)
    }

    async fn share_with_link(&self, file_id: &str) -> Result<(), SinkError> {
        let url = Self::api_url(&self.drive_api_base, &["files", file_id, "permissions"])?;
        let request = self.client.post(url).json(&json!({
            "role": "reader",
            "type": "anyone",
        }));
        self.send(request, "permissions.create").await?;
        Ok(())
    }

    fn spreadsheet_id(&self) -> Result<&str, SinkError> {
        self.spreadsheet_id
            .as_deref()
            .ok_or_else(|| SinkError::Rejected("No spreadsheet configured".to_string()))
    }

    async fn sheet_exists(&self, spreadsheet_id: &str, sheet: &str) -> Result<bool, SinkError> {
        let url = Self::api_url(&self.sheets_api_base, &["spreadsheets", spreadsheet_id])?;
        let request = self
            .client
            .get(url)
            .query(&[("fields", "sheets.properties.title")]);

        let metadata: SpreadsheetMetadata = Self::parse(
            self.send(request, "spreadsheets.get").await?,
            "spreadsheets.get",
        )
        .await?;
        Ok(metadata.sheets.iter().any(|s| s.properties.title == sheet))
    }

    async fn add_sheet(&self, spreadsheet_id: &str, sheet: &str) -> Result<(), SinkError> {
        let batch_update = format!("{spreadsheet_id}:batchUpdate");
        let url = Self::api_url(&self.sheets_api_base, &["spreadsheets", &batch_update])?;
        let request = self.client.post(url).json(&json!({
            "requests": [{ "addSheet": { "properties": { "title": sheet } } }]
        }));
        self.send(request, "spreadsheets.batchUpdate").await?;
        Ok(())
    }

    /// True when the first cell of `sheet` holds nothing.
    async fn sheet_is_empty(&self, spreadsheet_id: &str, sheet: &str) -> Result<bool, SinkError> {
        let first_cell = format!("{}:A1", sheet_range(sheet));
        let url = Self::api_url(
            &self.sheets_api_base,
            &["spreadsheets", spreadsheet_id, "values", &first_cell],
        )?;

        let range: ValueRange =
            Self::parse(self.send(self.client.get(url), "values.get").await?, "values.get").await?;
        Ok(range.values.iter().all(Vec::is_empty))
    }

    async fn append_values<S: serde::Serialize + Sync>(
        &self,
        spreadsheet_id: &str,
        sheet: &str,
        values: &[S],
    ) -> Result<(), SinkError> {
        let append = format!("{}:append", sheet_range(sheet));
        let url = Self::api_url(
            &self.sheets_api_base,
            &["spreadsheets", spreadsheet_id, "values", &append],
        )?;
        let request = self
            .client
            .post(url)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": [values] }));
        self.send(request, "values.append").await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ArtifactSink for GoogleWorkspaceSink {
    fn root_folder(&self) -> &str {
        &self.root_folder_id
    }

    async fn forget_folder(&self, parent_id: &str, name: &str) {
        self.folders.forget(parent_id, name).await;
    }

    #[instrument(skip_all, name = "reg.sink.google.folder", fields(name = %name))]
    async fn find_or_create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<String, SinkError> {
        self.folders
            .resolve(parent_id, name, || async {
                if let Some(id) = self.find_folder(parent_id, name).await? {
                    debug!(target: "reg.sink.google", folder_id = %id, "Found existing folder");
                    return Ok(id);
                }
                let id = self.create_folder(parent_id, name).await?;
                debug!(target: "reg.sink.google", folder_id = %id, "Created folder");
                Ok(id)
            })
            .await
    }

    #[instrument(skip_all, name = "reg.sink.google.upload", fields(name = %name, size = bytes.len()))]
    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<StoredFile, SinkError> {
        let url = Self::api_url(&self.upload_api_base, &["files"])?;
        let boundary = format!("reg-{}", uuid::Uuid::new_v4().simple());
        let metadata = json!({ "name": name, "parents": [folder_id] }).to_string();

        let mut body = Vec::with_capacity(bytes.len() + metadata.len() + 256);
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
                 --{boundary}\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(&bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let request = self
            .client
            .post(url)
            .query(&[("uploadType", "multipart"), ("fields", "id,webViewLink")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        let uploaded: UploadedFileResponse =
            Self::parse(self.send(request, "files.upload").await?, "files.upload").await?;

        if let Err(e) = self.share_with_link(&uploaded.id).await {
            // Unshared uploads are removed
            if let Err(delete_error) = self.delete_file(&uploaded.id).await {
                warn!(
                    target: "reg.sink.google",
                    file_id = %uploaded.id,
                    error = %delete_error,
                    "Failed to delete upload after permission grant failed"
                );
            }
            return Err(e);
        }

        Ok(StoredFile {
            link: uploaded
                .web_view_link
                .unwrap_or_else(|| drive_view_link(&uploaded.id)),
            file_id: uploaded.id,
        })
    }

    #[instrument(skip_all, name = "reg.sink.google.delete", fields(file_id = %file_id))]
    async fn delete_file(&self, file_id: &str) -> Result<(), SinkError> {
        let url = Self::api_url(&self.drive_api_base, &["files", file_id])?;
        self.send(self.client.delete(url), "files.delete").await?;
        Ok(())
    }

    #[instrument(skip_all, name = "reg.sink.google.append", fields(sheet = %sheet))]
    async fn append_row(
        &self,
        sheet: &str,
        header: &[&str],
        row: &[String],
    ) -> Result<(), SinkError> {
        let spreadsheet_id = self.spreadsheet_id()?;

        self.sheets
            .resolve(spreadsheet_id, sheet, || async {
                if !self.sheet_exists(spreadsheet_id, sheet).await? {
                    self.add_sheet(spreadsheet_id, sheet).await?;
                    debug!(target: "reg.sink.google", sheet = %sheet, "Created sheet");
                }
                if self.sheet_is_empty(spreadsheet_id, sheet).await? {
                    self.append_values(spreadsheet_id, sheet, header).await?;
                    debug!(target: "reg.sink.google", sheet = %sheet, "Wrote sheet header");
                }
                Ok(sheet.to_string())
            })
            .await?;

        self.append_values(spreadsheet_id, sheet, row).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::GoogleAuth;
    use common::secret::SecretString;
    use std::sync::Arc;
    use tokio::sync::watch;
    use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink_for(server: &MockServer, spreadsheet_id: Option<&str>) -> GoogleWorkspaceSink {
        let config = GoogleConfig {
            drive_folder_id: "root-folder".to_string(),
            spreadsheet_id: spreadsheet_id.map(str::to_string),
            auth: GoogleAuth::ServiceAccount {
                key_json: SecretString::from("{}"),
            },
            token_uri: format!("{}/token", server.uri()),
            drive_api_base: format!("{}/drive/v3", server.uri()),
            upload_api_base: format!("{}/upload/drive/v3", server.uri()),
            sheets_api_base: format!("{}/v4", server.uri()),
        };
        let (_tx, rx) = watch::channel(SecretString::from("test-access-token"));
        GoogleWorkspaceSink::new(&config, TokenReceiver::from_watch_receiver(rx)).unwrap()
    }

    #[test]
    fn test_folder_query_escapes_quotes() {
        let query = folder_query("root", "Jum'at Bersih - 12 Jan 2026");
        assert_eq!(
            query,
            "name='Jum\\'at Bersih - 12 Jan 2026' and mimeType='application/vnd.google-apps.folder' \
             and 'root' in parents and trashed=false"
        );
    }

    #[test]
    fn test_sheet_range_quotes_title() {
        assert_eq!(sheet_range("Event - 1 Jan"), "'Event - 1 Jan'!A1");
        assert_eq!(sheet_range("Jum'at"), "'Jum''at'!A1");
    }

    #[test]
    fn test_api_url_encodes_segments() {
        let url = GoogleWorkspaceSink::api_url(
            "https://sheets.googleapis.com/v4",
            &["spreadsheets", "abc", "values", "'My Sheet'!A1:append"],
        )
        .unwrap();
        assert!(url
            .as_str()
            .starts_with("https://sheets.googleapis.com/v4/spreadsheets/abc/values/"));
        assert!(!url.path().contains(' '));
    }

    #[tokio::test]
    async fn test_existing_folder_is_reused() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(header("authorization", "Bearer test-access-token"))
            .and(query_param("q", folder_query("root-folder", "Event - 1 Jan 2026")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "files": [{ "id": "existing" }] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "new" })))
            .expect(0)
            .mount(&server)
            .await;

        let sink = sink_for(&server, None);
        let id = sink
            .find_or_create_folder("root-folder", "Event - 1 Jan 2026")
            .await
            .unwrap();
        assert_eq!(id, "existing");
    }

    #[tokio::test]
    async fn test_concurrent_lookups_create_one_folder() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "files": [] }))
                    .set_delay(Duration::from_millis(20)),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_partial_json(json!({
                "name": "Event - 1 Jan 2026",
                "mimeType": FOLDER_MIME_TYPE,
                "parents": ["root-folder"],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "created" })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = Arc::new(sink_for(&server, None));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sink = Arc::clone(&sink);
            handles.push(tokio::spawn(async move {
                sink.find_or_create_folder("root-folder", "Event - 1 Jan 2026")
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "created");
        }
    }

    #[tokio::test]
    async fn test_upload_shares_file() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "multipart"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "file-1",
                "webViewLink": "https://drive.google.com/file/d/file-1/view?usp=drivesdk",
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/drive/v3/files/file-1/permissions"))
            .and(body_partial_json(json!({ "role": "reader", "type": "anyone" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "perm" })))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink_for(&server, None);
        let stored = sink
            .upload_file(
                "folder-1",
                "payment_Budi Santoso_1700000000000.png",
                "image/png",
                Bytes::from_static(b"\x89PNG"),
            )
            .await
            .unwrap();

        assert_eq!(stored.file_id, "file-1");
        assert!(stored.link.contains("file-1"));
    }

    #[tokio::test]
    async fn test_upload_server_error_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sink = sink_for(&server, None);
        let result = sink
            .upload_file("folder-1", "a.png", "image/png", Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(SinkError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_delete_forbidden_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/file-9"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let sink = sink_for(&server, None);
        assert!(matches!(
            sink.delete_file("file-9").await,
            Err(SinkError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_append_row_creates_missing_sheet() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [{ "properties": { "title": "Sheet1" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-id:batchUpdate"))
            .and(body_partial_json(json!({
                "requests": [{ "addSheet": { "properties": { "title": "Event" } } }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+A1:A1$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Event!A1:A1",
                "majorDimension": "ROWS",
            })))
            .expect(1)
            .mount(&server)
            .await;

        // Header row and two data rows
        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+:append$"))
            .and(query_param("valueInputOption", "RAW"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(3)
            .mount(&server)
            .await;

        let sink = sink_for(&server, Some("sheet-id"));
        let header = ["No", "Nama"];
        sink.append_row("Event", &header, &["1".to_string(), "Budi".to_string()])
            .await
            .unwrap();
        sink.append_row("Event", &header, &["2".to_string(), "Sari".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_append_row_existing_sheet_skips_header() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [{ "properties": { "title": "Event" } }]
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id:batchUpdate$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+A1:A1$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Event!A1:A1",
                "majorDimension": "ROWS",
                "values": [["No"]],
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+:append$"))
            .and(body_partial_json(json!({ "values": [["7", "Budi"]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink_for(&server, Some("sheet-id"));
        sink.append_row("Event", &["No", "Nama"], &["7".to_string(), "Budi".to_string()])
            .await
            .unwrap();
    }

    /// A sheet whose header append failed gets the header on the next row.
    #[tokio::test]
    async fn test_append_row_writes_header_after_interrupted_creation() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [{ "properties": { "title": "Sheet1" } }]
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [
                    { "properties": { "title": "Sheet1" } },
                    { "properties": { "title": "Event" } }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-id:batchUpdate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+A1:A1$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Event!A1:A1",
                "majorDimension": "ROWS",
            })))
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+:append$"))
            .and(body_partial_json(json!({ "values": [["No", "Nama"]] })))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+:append$"))
            .and(body_partial_json(json!({ "values": [["No", "Nama"]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path_regex(r"^/v4/spreadsheets/sheet-id/values/.+:append$"))
            .and(body_partial_json(json!({ "values": [["1", "Budi"]] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink_for(&server, Some("sheet-id"));
        let header = ["No", "Nama"];
        let row = ["1".to_string(), "Budi".to_string()];

        let first = sink.append_row("Event", &header, &row).await;
        assert!(matches!(first, Err(SinkError::Unavailable(_))));

        sink.append_row("Event", &header, &row).await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_removed_when_permission_grant_fails() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "file-1" })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/drive/v3/files/file-1/permissions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/file-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink_for(&server, None);
        let result = sink
            .upload_file("folder-1", "a.png", "image/png", Bytes::from_static(b"x"))
            .await;

        assert!(matches!(result, Err(SinkError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_missing_folder_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let sink = sink_for(&server, None);
        let result = sink
            .upload_file("gone", "a.png", "image/png", Bytes::from_static(b"x"))
            .await;

        assert!(matches!(result, Err(SinkError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_forgotten_folder_is_looked_up_again() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "files": [{ "id": "existing" }] })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let sink = sink_for(&server, None);
        sink.find_or_create_folder("root-folder", "Event").await.unwrap();
        sink.find_or_create_folder("root-folder", "Event").await.unwrap();

        sink.forget_folder("root-folder", "Event").await;
        sink.find_or_create_folder("root-folder", "Event").await.unwrap();
    }

    #[tokio::test]
    async fn test_append_row_without_spreadsheet_is_rejected() {
        let server = MockServer::start().await;
        let sink = sink_for(&server, None);

        assert!(matches!(
            sink.append_row("Event", &["No"], &["1".to_string()]).await,
            Err(SinkError::Rejected(_))
        ));
    }
}
