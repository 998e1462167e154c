// API client module: a small blocking HTTP client for the Drive upload
// endpoint. Uploads use the resumable protocol: one request opens a session
// with the file metadata, a second streams the bytes.

use std::fs::File;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Body, Client, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credential::Credential;
use crate::error::{OpenError, OpenResult};

/// Remote storage able to take a local file and hand back its document id.
pub trait DocumentStore {
    fn upload(
        &self,
        credential: &Credential,
        file_path: &Path,
        title: &str,
        content_type: &str,
    ) -> OpenResult<String>;
}

/// Metadata sent when opening an upload session.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    title: &'a str,
    mime_type: &'a str,
}

/// The part of the Drive file resource we need back.
#[derive(Deserialize, Debug)]
struct FileResource {
    id: String,
}

/// Blocking Drive client. Holds the reqwest client and the upload endpoint.
#[derive(Clone)]
pub struct DriveClient {
    client: Client,
    upload_url: String,
    show_progress: bool,
}

impl DriveClient {
    pub fn new(upload_url: impl Into<String>) -> OpenResult<Self> {
        let client = Client::builder().build()?;
        Ok(DriveClient {
            client,
            upload_url: upload_url.into(),
            show_progress: true,
        })
    }

    /// Hide the upload progress bar (useful when not attached to a terminal).
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Open a resumable session and return its URL.
    fn start_session(
        &self,
        credential: &Credential,
        title: &str,
        content_type: &str,
        len: u64,
    ) -> OpenResult<String> {
        let metadata = FileMetadata {
            title,
            mime_type: content_type,
        };
        let res = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable")])
            .header(AUTHORIZATION, credential.authorization())
            .header("X-Upload-Content-Type", content_type)
            .header("X-Upload-Content-Length", len)
            .json(&metadata)
            .send()?;
        let res = check_status(res, "starting upload session")?;

        let location = res
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| OpenError::Upload("upload session has no Location header".into()))?;
        debug!(session = %location, "Opened upload session");
        Ok(location.to_string())
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {percent:>3}% {bytes}/{total_bytes}") {
            bar.set_style(style);
        }
        bar
    }
}

impl DocumentStore for DriveClient {
    fn upload(
        &self,
        credential: &Credential,
        file_path: &Path,
        title: &str,
        content_type: &str,
    ) -> OpenResult<String> {
        let file = File::open(file_path)?;
        let len = file.metadata()?.len();
        info!(title = %title, bytes = len, "Uploading");

        let session = self.start_session(credential, title, content_type, len)?;

        let bar = self.progress_bar(len);
        let body = Body::sized(bar.wrap_read(file), len);
        let res = self
            .client
            .put(&session)
            .header(AUTHORIZATION, credential.authorization())
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send();
        bar.finish_and_clear();

        let res = check_status(res?, "uploading file")?;
        let resource: FileResource = res.json()?;
        info!(id = %resource.id, "Upload complete");
        Ok(resource.id)
    }
}

fn check_status(res: Response, action: &str) -> OpenResult<Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let txt = res.text().unwrap_or_default();
    Err(OpenError::Upload(format!("{} failed: {} - {}", action, status, txt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_doc(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("report.docx");
        std::fs::write(&path, b"fake docx bytes").unwrap();
        path
    }

    async fn upload_blocking(
        server_uri: String,
        file: std::path::PathBuf,
    ) -> OpenResult<String> {
        tokio::task::spawn_blocking(move || {
            let client = DriveClient::new(format!("{server_uri}/upload/drive/v2/files"))
                .unwrap()
                .without_progress();
            client.upload(
                &Credential::bearer("tok"),
                &file,
                "report.docx",
                "application/msword",
            )
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resumable_upload() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = write_doc(&dir);

        Mock::given(method("POST"))
            .and(path("/upload/drive/v2/files"))
            .and(query_param("uploadType", "resumable"))
            .and(header("authorization", "Bearer tok"))
            .and(header("x-upload-content-type", "application/msword"))
            .and(body_json(serde_json::json!({
                "title": "report.docx",
                "mimeType": "application/msword"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}/session/42", server.uri()).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/session/42"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "doc-123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = upload_blocking(server.uri(), file).await.unwrap();
        assert_eq!(id, "doc-123");

        let requests = server.received_requests().await.unwrap();
        let put = requests.iter().find(|r| r.method.to_string() == "PUT").unwrap();
        assert_eq!(put.body, b"fake docx bytes");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_upload_is_an_error() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = write_doc(&dir);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let err = upload_blocking(server.uri(), file).await.unwrap_err();
        match err {
            OpenError::Upload(msg) => {
                assert!(msg.contains("401"));
                assert!(msg.contains("invalid credentials"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_session_location() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let file = write_doc(&dir);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = upload_blocking(server.uri(), file).await.unwrap_err();
        assert!(matches!(err, OpenError::Upload(_)));
    }

    #[test]
    fn test_missing_file() {
        let client = DriveClient::new("http://127.0.0.1:9/upload").unwrap();
        let err = client
            .upload(
                &Credential::bearer("tok"),
                Path::new("/no/such/file.docx"),
                "file.docx",
                "application/msword",
            )
            .unwrap_err();
        assert!(matches!(err, OpenError::Io(_)));
    }
}
