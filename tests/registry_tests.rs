mod common;

use common::{corrupt_digest, fast_retry, write_image_tar};
use mockito::{Matcher, Server, ServerGuard};
use regpush::{
    Digest, ImageBundle, ManifestV2, RegistryClient, RegistryEndpoint, RegistryError,
};

fn client_for(server: &ServerGuard) -> RegistryClient {
    RegistryClient::new(RegistryEndpoint::new(server.url()))
        .unwrap()
        .with_retry_config(fast_retry())
}

async fn sample_manifest() -> ManifestV2 {
    let tar = write_image_tar(&["app:latest"]);
    let bundle = ImageBundle::from_tar(tar.path()).await.unwrap();
    ManifestV2::from_bundle(&bundle)
}

#[tokio::test]
async fn get_manifest_parses_and_hashes_the_body() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let manifest = sample_manifest().await;
    let body = manifest.canonical_bytes().unwrap();

    let _get = server
        .mock("GET", "/v2/app/manifests/latest")
        .match_header(
            "accept",
            "application/vnd.docker.distribution.manifest.v2+json",
        )
        .with_status(200)
        .with_header(
            "content-type",
            "application/vnd.docker.distribution.manifest.v2+json",
        )
        .with_body(&body)
        .create_async()
        .await;

    let fetched = client.get_manifest("app", "latest").await.unwrap();
    assert_eq!(fetched.manifest, manifest);
    assert_eq!(fetched.digest, Digest::sha256(&body));
    assert_eq!(&fetched.raw[..], &body[..]);
}

#[tokio::test]
async fn get_manifest_maps_404_to_not_found() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let _get = server
        .mock("GET", "/v2/app/manifests/gone")
        .with_status(404)
        .create_async()
        .await;

    let err = client.get_manifest("app", "gone").await.unwrap_err();
    match err {
        RegistryError::NotFound(reference) => assert_eq!(reference, "app:gone"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn put_manifest_round_trips_the_digest() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let manifest = sample_manifest().await;
    let digest = manifest.digest().unwrap();

    let put = server
        .mock("PUT", "/v2/app/manifests/v1")
        .match_header(
            "content-type",
            "application/vnd.docker.distribution.manifest.v2+json",
        )
        .match_body(Matcher::Exact(
            String::from_utf8(manifest.canonical_bytes().unwrap()).unwrap(),
        ))
        .with_status(201)
        .with_header("Docker-Content-Digest", &digest.to_string())
        .expect(1)
        .create_async()
        .await;

    let returned = client.put_manifest("app", "v1", &manifest).await.unwrap();
    assert_eq!(returned, digest);
    put.assert_async().await;
}

#[tokio::test]
async fn put_manifest_falls_back_when_digest_header_is_absent() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let manifest = sample_manifest().await;

    let _put = server
        .mock("PUT", "/v2/app/manifests/v1")
        .with_status(201)
        .create_async()
        .await;

    let returned = client.put_manifest("app", "v1", &manifest).await.unwrap();
    assert_eq!(returned, manifest.digest().unwrap());
}

#[tokio::test]
async fn put_manifest_rejects_disagreeing_digest_echo() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let manifest = sample_manifest().await;
    let digest = manifest.digest().unwrap();

    let _put = server
        .mock("PUT", "/v2/app/manifests/v1")
        .with_status(201)
        .with_header("Docker-Content-Digest", &corrupt_digest(&digest))
        .create_async()
        .await;

    let err = client.put_manifest("app", "v1", &manifest).await.unwrap_err();
    assert!(matches!(err, RegistryError::DigestMismatch { .. }), "{err:?}");
}

#[tokio::test]
async fn delete_manifest_accepts_202() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let digest = Digest::sha256(b"manifest");
    let del = server
        .mock("DELETE", format!("/v2/app/manifests/{digest}").as_str())
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    client.delete_manifest("app", &digest).await.unwrap();
    del.assert_async().await;
}

#[tokio::test]
async fn delete_manifest_maps_405_to_deletion_disabled() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let digest = Digest::sha256(b"manifest");
    let _del = server
        .mock("DELETE", format!("/v2/app/manifests/{digest}").as_str())
        .with_status(405)
        .create_async()
        .await;

    assert!(matches!(
        client.delete_manifest("app", &digest).await,
        Err(RegistryError::DeletionDisabled)
    ));
}

#[tokio::test]
async fn delete_by_tag_resolves_the_digest_first() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let manifest = sample_manifest().await;
    let body = manifest.canonical_bytes().unwrap();
    let digest = Digest::sha256(&body);

    let get = server
        .mock("GET", "/v2/app/manifests/stale")
        .with_status(200)
        .with_body(&body)
        .expect(1)
        .create_async()
        .await;
    let del = server
        .mock("DELETE", format!("/v2/app/manifests/{digest}").as_str())
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let deleted = client.delete_manifest_by_tag("app", "stale").await.unwrap();
    assert_eq!(deleted, digest);
    get.assert_async().await;
    del.assert_async().await;
}

#[tokio::test]
async fn list_repositories_single_page() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let _catalog = server
        .mock("GET", "/v2/_catalog")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"repositories":["app","team/web"]}"#)
        .create_async()
        .await;

    let repositories = client.list_repositories().await.unwrap();
    assert_eq!(repositories, vec!["app".to_string(), "team/web".to_string()]);
}

#[tokio::test]
async fn list_repositories_follows_link_headers() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let _page1 = server
        .mock("GET", "/v2/_catalog")
        .with_status(200)
        .with_header("Link", "</v2/catalog-page-2>; rel=\"next\"")
        .with_body(r#"{"repositories":["aardvark","app"]}"#)
        .create_async()
        .await;
    let _page2 = server
        .mock("GET", "/v2/catalog-page-2")
        .with_status(200)
        .with_body(r#"{"repositories":["zebra"]}"#)
        .create_async()
        .await;

    let repositories = client.list_repositories().await.unwrap();
    assert_eq!(
        repositories,
        vec![
            "aardvark".to_string(),
            "app".to_string(),
            "zebra".to_string()
        ]
    );
}

#[tokio::test]
async fn list_tags_normalizes_null_to_empty() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let _tags = server
        .mock("GET", "/v2/app/tags/list")
        .with_status(200)
        .with_body(r#"{"name":"app","tags":null}"#)
        .create_async()
        .await;

    let tags = client.list_tags("app").await.unwrap();
    assert!(tags.is_empty());
}

#[tokio::test]
async fn list_tags_returns_the_listing() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let _tags = server
        .mock("GET", "/v2/app/tags/list")
        .with_status(200)
        .with_body(r#"{"name":"app","tags":["latest","v1"]}"#)
        .create_async()
        .await;

    let tags = client.list_tags("app").await.unwrap();
    assert_eq!(tags, vec!["latest".to_string(), "v1".to_string()]);
}

#[tokio::test]
async fn list_tags_unknown_repository_is_not_found() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let _tags = server
        .mock("GET", "/v2/ghost/tags/list")
        .with_status(404)
        .create_async()
        .await;

    assert!(matches!(
        client.list_tags("ghost").await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn blob_exists_maps_statuses() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let present = Digest::sha256(b"present");
    let absent = Digest::sha256(b"absent");
    let broken = Digest::sha256(b"broken");

    let _present = server
        .mock("HEAD", format!("/v2/app/blobs/{present}").as_str())
        .with_status(200)
        .create_async()
        .await;
    let _absent = server
        .mock("HEAD", format!("/v2/app/blobs/{absent}").as_str())
        .with_status(404)
        .create_async()
        .await;
    let _broken = server
        .mock("HEAD", format!("/v2/app/blobs/{broken}").as_str())
        .with_status(403)
        .create_async()
        .await;

    assert!(client.blob_exists("app", &present).await.unwrap());
    assert!(!client.blob_exists("app", &absent).await.unwrap());
    assert!(matches!(
        client.blob_exists("app", &broken).await,
        Err(RegistryError::RegistryProtocolError { .. })
    ));
}

#[tokio::test]
async fn fetch_blob_returns_bytes() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let digest = Digest::sha256(b"blob content");
    let _get = server
        .mock("GET", format!("/v2/app/blobs/{digest}").as_str())
        .with_status(200)
        .with_body("blob content")
        .create_async()
        .await;

    let bytes = client.fetch_blob("app", &digest).await.unwrap();
    assert_eq!(&bytes[..], b"blob content");
}

#[tokio::test]
async fn check_api_reports_v2_support() {
    let mut server = Server::new_async().await;
    let client = client_for(&server);

    let _probe = server
        .mock("GET", "/v2/")
        .with_status(200)
        .create_async()
        .await;
    assert!(client.check_api().await.unwrap());

    let mut server = Server::new_async().await;
    let client = client_for(&server);
    let _probe = server
        .mock("GET", "/v2/")
        .with_status(401)
        .create_async()
        .await;
    assert!(!client.check_api().await.unwrap());
}

#[tokio::test]
async fn validation_rejects_bad_names_client_side() {
    let server = Server::new_async().await;
    let client = client_for(&server);

    assert!(matches!(
        client.list_tags("UPPER").await,
        Err(RegistryError::InvalidReference(_))
    ));
    assert!(matches!(
        client.get_manifest("app", "bad tag").await,
        Err(RegistryError::InvalidReference(_))
    ));
    assert!(matches!(
        client.delete_manifest_by_tag("app", "").await,
        Err(RegistryError::InvalidReference(_))
    ));
}
