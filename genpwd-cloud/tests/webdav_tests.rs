mod support;

use genpwd_cloud::{
    AuthOutcome, CloudError, CloudProvider, CredentialStore, MemoryCredentialStore, ProviderKind,
    RemoteVaultRef, RetryPolicy, WebDavConfig, WebDavProvider,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::fast_retry;
use wiremock::matchers::{header, header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zeroize::Zeroizing;

// base64("alice:s3cret")
const BASIC_AUTH: &str = "Basic YWxpY2U6czNjcmV0";

fn config(server: &MockServer) -> WebDavConfig {
    WebDavConfig {
        base_url: format!("{}/dav", server.uri()),
        username: "alice".into(),
        ..WebDavConfig::default()
    }
}

fn provider(server: &MockServer, retry: RetryPolicy) -> WebDavProvider {
    WebDavProvider::new(config(server), Zeroizing::new("s3cret".to_string()), retry).unwrap()
}

fn multistatus(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(207)
        .insert_header("Content-Type", "application/xml; charset=utf-8")
        .set_body_string(format!(
            r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:">{body}</d:multistatus>"#
        ))
}

async fn mount_existing_folder(server: &MockServer) {
    Mock::given(method("PROPFIND"))
        .and(path("/dav/GenPwdPro/"))
        .and(header("Depth", "0"))
        .respond_with(multistatus(
            "<d:response><d:href>/dav/GenPwdPro/</d:href><d:propstat><d:prop>\
             <d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response>",
        ))
        .mount(server)
        .await;
}

// ── URL Policy ──

#[test]
fn plain_http_to_remote_host_is_refused() {
    let cfg = WebDavConfig {
        base_url: "http://cloud.example.com/remote.php/dav/".into(),
        username: "alice".into(),
        ..WebDavConfig::default()
    };
    let result = WebDavProvider::new(cfg, Zeroizing::new("pw".into()), RetryPolicy::none());
    assert!(matches!(result, Err(CloudError::Config(_))));
}

#[test]
fn https_with_certificate_opt_out_is_accepted() {
    let cfg = WebDavConfig {
        base_url: "https://nas.local/dav/".into(),
        username: "alice".into(),
        accept_invalid_certs: true,
        ..WebDavConfig::default()
    };
    assert!(WebDavProvider::new(cfg, Zeroizing::new("pw".into()), RetryPolicy::none()).is_ok());
}

// ── Authentication ──

#[tokio::test]
async fn authenticate_checks_credentials_with_propfind() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(multistatus("<d:response><d:href>/dav/</d:href></d:response>"))
        .expect(1)
        .mount(&server)
        .await;

    let dav = provider(&server, RetryPolicy::none());
    assert_eq!(dav.authenticate().await.unwrap(), AuthOutcome::Authenticated);
}

#[tokio::test]
async fn wrong_password_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let dav = provider(&server, fast_retry());
    assert!(matches!(
        dav.authenticate().await,
        Err(CloudError::Authentication(_))
    ));
}

// ── Upload ──

#[tokio::test]
async fn upload_creates_folder_and_moves_staged_file() {
    support::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/GenPwdPro/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("MKCOL"))
        .and(path("/dav/GenPwdPro/"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/dav/GenPwdPro/\.vault_v1\.enc\.[0-9a-f]{32}\.part$"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(ResponseTemplate::new(201))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("MOVE"))
        .and(path_regex(r"^/dav/GenPwdPro/\.vault_v1\.enc\..*\.part$"))
        .and(header("Overwrite", "T"))
        .and(header_exists("Destination"))
        .respond_with(ResponseTemplate::new(201))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let dav = provider(&server, RetryPolicy::none());
    let uploaded = dav.upload_vault("vault_v1.enc", b"sealed").await.unwrap();

    assert_eq!(uploaded.id, "/dav/GenPwdPro/vault_v1.enc");
    assert_eq!(uploaded.name, "vault_v1.enc");
    assert_eq!(uploaded.size_bytes, 6);

    // Folder is only checked once per provider
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("MOVE"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    dav.upload_vault("vault_v1.enc", b"sealed-again").await.unwrap();
}

#[tokio::test]
async fn insufficient_storage_is_quota_exceeded() {
    let server = MockServer::start().await;
    mount_existing_folder(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(507))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("MOVE"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let dav = provider(&server, fast_retry());
    let err = dav.upload_vault("vault_v1.enc", b"sealed").await.unwrap_err();
    assert!(matches!(err, CloudError::QuotaExceeded(_)));
}

#[tokio::test]
async fn failed_move_removes_staging_file() {
    let server = MockServer::start().await;
    mount_existing_folder(&server).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("MOVE"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"\.part$"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dav = provider(&server, RetryPolicy::none());
    let err = dav.upload_vault("vault_v1.enc", b"sealed").await.unwrap_err();
    assert!(matches!(err, CloudError::Api { status: 412, .. }));
}

// ── Download / List ──

#[tokio::test]
async fn list_skips_collections_and_staging_files() {
    let server = MockServer::start().await;
    mount_existing_folder(&server).await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/GenPwdPro/"))
        .and(header("Depth", "1"))
        .respond_with(multistatus(
            r#"<d:response><d:href>/dav/GenPwdPro/</d:href><d:propstat><d:prop>
                 <d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response>
               <d:response><d:href>/dav/GenPwdPro/vault_1.enc</d:href><d:propstat><d:prop>
                 <d:resourcetype/><d:getcontentlength>512</d:getcontentlength>
                 <d:getlastmodified>Mon, 01 Jan 2024 00:00:00 GMT</d:getlastmodified>
               </d:prop></d:propstat></d:response>
               <d:response><d:href>/dav/GenPwdPro/.vault_1.enc.abc.part</d:href><d:propstat><d:prop>
                 <d:resourcetype/></d:prop></d:propstat></d:response>"#,
        ))
        .mount(&server)
        .await;

    let dav = provider(&server, RetryPolicy::none());
    let vaults = dav.list_vaults().await.unwrap();

    assert_eq!(vaults.len(), 1);
    assert_eq!(vaults[0].name, "vault_1.enc");
    assert_eq!(vaults[0].id, "/dav/GenPwdPro/vault_1.enc");
    assert_eq!(vaults[0].size_bytes, 512);
    assert_eq!(vaults[0].modified_at.map(|d| d.timestamp()), Some(1_704_067_200));
}

#[tokio::test]
async fn download_fetches_href() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dav/GenPwdPro/vault_1.enc"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"sealed".to_vec()))
        .mount(&server)
        .await;

    let dav = provider(&server, RetryPolicy::none());
    let bytes = dav
        .download_vault(&RemoteVaultRef {
            id: "/dav/GenPwdPro/vault_1.enc".into(),
            name: "vault_1.enc".into(),
            provider: ProviderKind::WebDav,
            size_bytes: 6,
            modified_at: None,
        })
        .await
        .unwrap();
    assert_eq!(bytes, b"sealed");
}

#[tokio::test]
async fn href_on_another_server_is_refused() {
    let server = MockServer::start().await;
    let dav = provider(&server, RetryPolicy::none());

    let err = dav
        .download_vault(&RemoteVaultRef {
            id: "https://attacker.example/steal".into(),
            name: "x".into(),
            provider: ProviderKind::WebDav,
            size_bytes: 0,
            modified_at: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::Config(_)));
}

// ── Quota ──

#[tokio::test]
async fn quota_uses_rfc4331_properties() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .respond_with(multistatus(
            "<d:response><d:href>/dav/</d:href><d:propstat><d:prop>\
             <d:quota-used-bytes>1000</d:quota-used-bytes>\
             <d:quota-available-bytes>9000</d:quota-available-bytes>\
             </d:prop></d:propstat></d:response>",
        ))
        .mount(&server)
        .await;

    let dav = provider(&server, RetryPolicy::none());
    let quota = dav.get_quota().await.unwrap();
    assert_eq!(quota.used_bytes, 1000);
    assert_eq!(quota.total_bytes, Some(10_000));
}

#[tokio::test]
async fn unknown_available_space_has_no_total() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .respond_with(multistatus(
            "<d:response><d:href>/dav/</d:href><d:propstat><d:prop>\
             <d:quota-used-bytes>1000</d:quota-used-bytes>\
             <d:quota-available-bytes>-2</d:quota-available-bytes>\
             </d:prop></d:propstat></d:response>",
        ))
        .mount(&server)
        .await;

    let dav = provider(&server, RetryPolicy::none());
    assert_eq!(dav.get_quota().await.unwrap().total_bytes, None);
}

// ── Stored Credentials ──

#[tokio::test]
async fn remembered_password_rebuilds_provider() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/dav/"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(multistatus("<d:response><d:href>/dav/</d:href></d:response>"))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryCredentialStore::new());
    let mut dav = provider(&server, RetryPolicy::none());
    dav.remember(store.clone()).unwrap();

    let restored = WebDavProvider::from_store(config(&server), store.clone(), RetryPolicy::none())
        .unwrap();
    assert_eq!(restored.authenticate().await.unwrap(), AuthOutcome::Authenticated);

    restored.sign_out().await.unwrap();
    assert!(
        store
            .load(ProviderKind::WebDav, &restored.account_id())
            .unwrap()
            .is_none()
    );
}

#[test]
fn missing_saved_password_is_authentication_error() {
    let store = Arc::new(MemoryCredentialStore::new());
    let cfg = WebDavConfig {
        base_url: "https://cloud.example.com/dav/".into(),
        username: "alice".into(),
        ..WebDavConfig::default()
    };
    assert!(matches!(
        WebDavProvider::from_store(cfg, store, RetryPolicy::none()),
        Err(CloudError::Authentication(_))
    ));
}
