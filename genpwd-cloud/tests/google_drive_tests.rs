mod support;

use genpwd_cloud::{
    AuthOutcome, CloudError, CloudProvider, GoogleDriveConfig, GoogleDriveProvider, ProviderKind,
    RemoteVaultRef, RetryPolicy,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::*;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FOLDER_FIELDS: &str = "files(id,name)";
const FILE_LIST_FIELDS: &str = "files(id,name,size,modifiedTime)";

async fn drive(server: &MockServer, token: &str, retry: RetryPolicy) -> GoogleDriveProvider {
    let (auth, _) = signed_in(server, token, 3600).await;
    let config = GoogleDriveConfig {
        oauth: oauth_config(&server.uri()),
        api_base_url: server.uri(),
        upload_base_url: server.uri(),
        ..GoogleDriveConfig::default()
    };
    GoogleDriveProvider::new(config, auth, retry).unwrap()
}

async fn mount_existing_folder(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("fields", FOLDER_FIELDS))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [{"id": "folder-1", "name": "GenPwdPro"}]
        })))
        .mount(server)
        .await;
}

async fn mount_file_lookup(server: &MockServer, files: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("fields", FILE_LIST_FIELDS))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": files })))
        .mount(server)
        .await;
}

fn remote(id: &str) -> RemoteVaultRef {
    RemoteVaultRef {
        id: id.into(),
        name: "vault_v1.enc".into(),
        provider: ProviderKind::GoogleDrive,
        size_bytes: 0,
        modified_at: None,
    }
}

// ── Upload ──

#[tokio::test]
async fn first_upload_creates_folder_then_multipart_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(query_param("fields", FOLDER_FIELDS))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/drive/v3/files"))
        .and(body_string_contains("application/vnd.google-apps.folder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "folder-1", "name": "GenPwdPro"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_file_lookup(&server, serde_json::json!([])).await;
    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .and(query_param("uploadType", "multipart"))
        .and(header("authorization", "Bearer at-1"))
        .and(body_string_contains("\"parents\":[\"folder-1\"]"))
        .and(body_string_contains("envelope-bytes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "file-1",
            "name": "vault_v1.enc",
            "size": "14",
            "modifiedTime": "2024-05-01T10:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", RetryPolicy::none()).await;
    let uploaded = drive.upload_vault("vault_v1.enc", b"envelope-bytes").await.unwrap();

    assert_eq!(uploaded.id, "file-1");
    assert_eq!(uploaded.size_bytes, 14);
    assert_eq!(uploaded.provider, ProviderKind::GoogleDrive);
    assert!(uploaded.modified_at.is_some());
}

#[tokio::test]
async fn existing_file_is_replaced_with_media_patch() {
    let server = MockServer::start().await;
    mount_existing_folder(&server).await;
    mount_file_lookup(
        &server,
        serde_json::json!([{"id": "file-1", "name": "vault_v1.enc", "size": "3"}]),
    )
    .await;
    Mock::given(method("PATCH"))
        .and(path("/upload/drive/v3/files/file-1"))
        .and(query_param("uploadType", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "file-1", "name": "vault_v1.enc", "size": "5"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", RetryPolicy::none()).await;
    let uploaded = drive.upload_vault("vault_v1.enc", b"newer").await.unwrap();
    assert_eq!(uploaded.size_bytes, 5);
}

#[tokio::test]
async fn quota_exceeded_is_terminal() {
    let server = MockServer::start().await;
    mount_existing_folder(&server).await;
    mount_file_lookup(&server, serde_json::json!([])).await;
    Mock::given(method("POST"))
        .and(path("/upload/drive/v3/files"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": {"code": 403, "errors": [{"reason": "storageQuotaExceeded"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", fast_retry()).await;
    let err = drive.upload_vault("vault_v1.enc", b"x").await.unwrap_err();
    assert!(matches!(err, CloudError::QuotaExceeded(_)));
}

// ── Download / 401 Handling ──

#[tokio::test]
async fn download_returns_media_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file-1"))
        .and(query_param("alt", "media"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"sealed".to_vec()))
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", RetryPolicy::none()).await;
    assert_eq!(drive.download_vault(&remote("file-1")).await.unwrap(), b"sealed");
}

#[tokio::test]
async fn unauthorized_refreshes_once_and_retries() {
    support::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file-1"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("fresh", None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file-1"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"sealed".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let drive = drive(&server, "stale", RetryPolicy::none()).await;
    assert_eq!(drive.download_vault(&remote("file-1")).await.unwrap(), b"sealed");
}

#[tokio::test]
async fn second_unauthorized_surfaces_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_response("fresh", None)))
        .mount(&server)
        .await;

    let drive = drive(&server, "stale", fast_retry()).await;
    let err = drive.download_vault(&remote("file-1")).await.unwrap_err();
    assert!(matches!(err, CloudError::Authentication(_)));
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", fast_retry()).await;
    assert!(matches!(
        drive.download_vault(&remote("gone")).await,
        Err(CloudError::NotFound(_))
    ));
}

// ── Retry ──

#[tokio::test]
async fn server_errors_are_retried_then_surface_as_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/files/file-1"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", fast_retry()).await;
    let err = drive.download_vault(&remote("file-1")).await.unwrap_err();
    assert!(matches!(err, CloudError::Network(_)));
}

// ── Listing / Quota ──

#[tokio::test]
async fn list_vaults_maps_drive_files() {
    let server = MockServer::start().await;
    mount_existing_folder(&server).await;
    mount_file_lookup(
        &server,
        serde_json::json!([
            {"id": "a", "name": "vault_1.enc", "size": "100", "modifiedTime": "2024-01-01T00:00:00Z"},
            {"id": "b", "name": "vault_2.enc"}
        ]),
    )
    .await;

    let drive = drive(&server, "at-1", RetryPolicy::none()).await;
    let vaults = drive.list_vaults().await.unwrap();

    assert_eq!(vaults.len(), 2);
    assert_eq!(vaults[0].name, "vault_1.enc");
    assert_eq!(vaults[0].size_bytes, 100);
    assert_eq!(vaults[1].size_bytes, 0);
    assert!(vaults[1].modified_at.is_none());

    let found = drive.find_vault("vault_1.enc").await.unwrap();
    assert_eq!(found.map(|v| v.id).as_deref(), Some("a"));
}

#[tokio::test]
async fn quota_parses_string_counters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/about"))
        .and(query_param("fields", "storageQuota"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "storageQuota": {"limit": "16106127360", "usage": "1073741824"}
        })))
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", RetryPolicy::none()).await;
    let quota = drive.get_quota().await.unwrap();
    assert_eq!(quota.used_bytes, 1_073_741_824);
    assert_eq!(quota.total_bytes, Some(16_106_127_360));
    assert_eq!(quota.available_bytes(), Some(15_032_385_536));
}

#[tokio::test]
async fn unlimited_quota_has_no_total() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drive/v3/about"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "storageQuota": {"usage": "42"}
        })))
        .mount(&server)
        .await;

    let drive = drive(&server, "at-1", RetryPolicy::none()).await;
    let quota = drive.get_quota().await.unwrap();
    assert_eq!(quota.total_bytes, None);
}

// ── Authentication ──

#[tokio::test]
async fn authenticate_signed_in_account() {
    let server = MockServer::start().await;
    let drive = drive(&server, "at-1", RetryPolicy::none()).await;
    assert_eq!(drive.authenticate().await.unwrap(), AuthOutcome::Authenticated);
}

#[tokio::test]
async fn sign_out_drops_account() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let drive = Arc::new(drive(&server, "at-1", RetryPolicy::none()).await);
    drive.sign_out().await.unwrap();
    assert!(!drive.authenticator().is_authenticated().await);

    // Next authenticate starts an interactive flow
    match drive.authenticate().await.unwrap() {
        AuthOutcome::Pending { authorization_url } => {
            assert!(authorization_url.contains("code_challenge="));
        }
        other => panic!("expected pending authorization, got {other:?}"),
    }
}
