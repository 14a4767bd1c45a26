mod support;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use support::{config, current_marker, release_archive, APP};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use vinst_common::config::Config;
use vinst_common::error::VinstError;
use vinst_common::manifest::ReleaseSpec;
use vinst_core::checksum::compute_sha256;
use vinst_core::{InstallOptions, Installer};

const LISTING_PATH: &str = "/repos/acme/zyng/releases";

fn asset_json(base: &str, name: &str, digest: Option<&str>) -> String {
    let digest = digest
        .map(|d| format!(r#","digest":"sha256:{d}""#))
        .unwrap_or_default();
    format!(r#"{{"name":"{name}","browser_download_url":"{base}/download/{name}","size":0{digest}}}"#)
}

fn listing(assets: &[String]) -> Vec<u8> {
    format!(
        r#"[
  {{"tag_name":"v3.0.0-rc1","draft":false,"prerelease":true,"published_at":"2026-03-01T00:00:00Z","assets":[]}},
  {{"tag_name":"v2.1.0","draft":false,"prerelease":false,"published_at":"2026-02-01T00:00:00Z","assets":[{}]}},
  {{"tag_name":"v2.0.0","draft":false,"prerelease":false,"published_at":"2026-01-01T00:00:00Z","assets":[]}}
]"#,
        assets.join(",")
    )
    .into_bytes()
}

fn latest_release_spec() -> ReleaseSpec {
    let raw = format!(
        r#"
name = "{APP}"
version = "2.1.0"
entrypoint = "src/main.py"

[source]
type = "latest-release"
location = "acme/zyng"
"#
    );
    ReleaseSpec::from_toml_str(&raw).unwrap()
}

fn release_config(sandbox: &Path, base: &str) -> Config {
    let mut config = config(sandbox);
    config.release_api_base = base.to_string();
    config.allow_insecure_http = true;
    config
}

#[tokio::test]
async fn latest_release_asset_is_installed_with_advertised_digest() {
    let sandbox = TempDir::new().unwrap();
    let archive = release_archive(sandbox.path(), "2.1.0", "remote");
    let digest = compute_sha256(&archive).unwrap();
    let asset_name = "zyng-2.1.0.tar.gz";

    let assets = [
        asset_json("{BASE}", "zyng-2.1.0-windows-x64.zip", None),
        asset_json("{BASE}", "checksums.txt", None),
        asset_json("{BASE}", asset_name, Some(&digest)),
    ];
    let base = serve_listing(&assets, &[(asset_name, fs::read(&archive).unwrap())]);

    let installer = Installer::new(latest_release_spec(), release_config(sandbox.path(), &base)).unwrap();
    let report = installer.install(&InstallOptions::default()).await.unwrap();
    let root = sandbox.path().join("root");
    assert_eq!(report.installed, root.join("zyng-2.1.0"));
    assert_eq!(current_marker(&root), "remote");
}

#[tokio::test]
async fn wrong_advertised_digest_is_an_integrity_error() {
    let sandbox = TempDir::new().unwrap();
    let archive = release_archive(sandbox.path(), "2.1.0", "tampered");
    let asset_name = "zyng-2.1.0.tar.gz";
    let wrong = "0".repeat(64);
    let assets = [asset_json("{BASE}", asset_name, Some(&wrong))];
    let base = serve_listing(&assets, &[(asset_name, fs::read(&archive).unwrap())]);

    let installer = Installer::new(latest_release_spec(), release_config(sandbox.path(), &base)).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::Integrity(_)), "{err:?}");
    assert!(!sandbox.path().join("root").exists());
}

#[tokio::test]
async fn release_without_usable_asset_is_no_suitable_asset() {
    let sandbox = TempDir::new().unwrap();
    let assets = [
        asset_json("{BASE}", "zyng-2.1.0.dmg", None),
        asset_json("{BASE}", "zyng-2.1.0-setup.exe", None),
        asset_json("{BASE}", "zyng-2.1.0-windows.zip", None),
    ];
    let base = serve_listing(&assets, &[]);

    let installer = Installer::new(latest_release_spec(), release_config(sandbox.path(), &base)).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    match &err {
        VinstError::NoSuitableAsset(msg) => {
            assert!(msg.contains("v2.1.0"), "{msg}");
            assert!(msg.contains("zyng-2.1.0.dmg"), "{msg}");
        }
        other => panic!("expected NoSuitableAsset, got {other:?}"),
    }
    assert!(err.is_preflight());
    assert!(!sandbox.path().join("root").exists());
}

#[tokio::test]
async fn missing_listing_is_a_fetch_error() {
    let sandbox = TempDir::new().unwrap();
    let (listener, base) = bind();
    serve_on(listener, Vec::new());

    let installer = Installer::new(latest_release_spec(), release_config(sandbox.path(), &base)).unwrap();
    let err = installer.install(&InstallOptions::default()).await.unwrap_err();
    assert!(matches!(err, VinstError::Fetch(..)), "{err:?}");
    assert!(!sandbox.path().join("root").exists());
}

fn bind() -> (TcpListener, String) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    (TcpListener::from_std(listener).unwrap(), base)
}

/// Serves a listing whose download URLs point back at the same listener.
fn serve_listing(assets: &[String], downloads: &[(&str, Vec<u8>)]) -> String {
    let (listener, base) = bind();
    let assets: Vec<String> = assets.iter().map(|a| a.replace("{BASE}", &base)).collect();
    let mut routes = vec![(LISTING_PATH.to_string(), listing(&assets))];
    routes.extend(
        downloads
            .iter()
            .map(|(name, body)| (format!("/download/{name}"), body.clone())),
    );
    serve_on(listener, routes);
    base
}

/// Answers each connection with the body registered for the request path, or 404.
fn serve_on(listener: TcpListener, routes: Vec<(String, Vec<u8>)>) {
    let routes = Arc::new(routes);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = match routes.iter().find(|(route, _)| *route == path) {
                    Some((_, body)) => ("200 OK", body.clone()),
                    None => ("404 Not Found", Vec::new()),
                };
                let header = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
}
