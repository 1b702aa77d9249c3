//! Static delivery over the wire: directories, archives, conditional GETs.

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use portico::files::FileStore;
use portico::routing::RouteRegistry;
use portico::security::{CsrfGuard, MemorySessions};

mod common;
use common::{exchange, get, parse_one};

fn site() -> (tempfile::TempDir, RouteRegistry) {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs").join("default.html"), "docs index").unwrap();
    fs::create_dir(dir.path().join("empty")).unwrap();

    let mut store = FileStore::new();
    store.add_root(dir.path()).unwrap();
    let mut registry = RouteRegistry::new();
    registry.add_file_store("/static", store);
    (dir, registry)
}

#[tokio::test]
async fn serves_files_with_metadata() {
    let (_dir, registry) = site();
    let server = common::server(registry, |b| b);

    let response = get(&server, "/static/hello.txt").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "hello world");
    assert_eq!(response.header("Content-Length"), Some("11"));
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
    assert!(response.header("Last-Modified").is_some_and(|v| v.ends_with(" GMT")));
    assert!(response.header("Date").is_some());
    assert!(response.header("Server").is_some_and(|v| v.starts_with("portico/")));
}

#[tokio::test]
async fn percent_encoded_names_are_decoded_once() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a b.txt"), "spaced").unwrap();
    fs::write(dir.path().join("100%.txt"), "literal").unwrap();
    let mut store = FileStore::new();
    store.add_root(dir.path()).unwrap();
    let mut registry = RouteRegistry::new();
    registry.add_file_store("/f", store);
    let server = common::server(registry, |b| b);

    assert_eq!(get(&server, "/f/a%20b.txt").await.text(), "spaced");
    assert_eq!(get(&server, "/f/100%25.txt").await.text(), "literal");
}

#[tokio::test]
async fn directories_redirect_then_serve_their_index() {
    let (_dir, registry) = site();
    let server = common::server(registry, |b| b);

    let response = get(&server, "/static/docs").await;
    assert_eq!(response.status, 301);
    assert_eq!(response.header("Location"), Some("/static/docs/"));

    assert_eq!(get(&server, "/static/docs/").await.text(), "docs index");
    assert_eq!(get(&server, "/static/").await.text(), "<h1>home</h1>");
    assert_eq!(get(&server, "/static/empty/").await.status, 404);
    assert_eq!(get(&server, "/static/missing.txt").await.status, 404);
}

#[tokio::test]
async fn redirects_for_non_ascii_directories_keep_their_location() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("bücher")).unwrap();
    fs::write(dir.path().join("bücher").join("index.html"), "shelf").unwrap();
    let mut store = FileStore::new();
    store.add_root(dir.path()).unwrap();
    let mut registry = RouteRegistry::new();
    registry.add_file_store("/static", store);
    let server = common::server(registry, |b| b);

    let response = get(&server, "/static/b%C3%BCcher").await;
    assert_eq!(response.status, 301);
    let location = response.header("Location").expect("redirect carries a Location");
    assert_eq!(location, "/static/b%C3%BCcher/");
    assert_eq!(get(&server, location).await.text(), "shelf");
}

#[tokio::test]
async fn head_has_headers_but_no_body() {
    let (_dir, registry) = site();
    let server = common::server(registry, |b| b);

    let raw = exchange(&server, b"HEAD /static/hello.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
    let (response, rest) = parse_one(&raw, false);
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Length"), Some("11"));
    assert!(rest.is_empty());
}

#[tokio::test]
async fn conditional_get() {
    let (_dir, registry) = site();
    let server = common::server(registry, |b| b);
    let modified = get(&server, "/static/hello.txt").await.header("Last-Modified").unwrap().to_string();

    let request = format!("GET /static/hello.txt HTTP/1.1\r\nIf-Modified-Since: {}\r\nConnection: close\r\n\r\n", modified);
    let raw = exchange(&server, request.as_bytes()).await;
    let (response, rest) = parse_one(&raw, true);
    assert_eq!(response.status, 304);
    assert!(rest.is_empty());

    let request = format!(
        "GET /static/hello.txt HTTP/1.1\r\nIf-Modified-Since: {}; length=3\r\nConnection: close\r\n\r\n",
        modified
    );
    let raw = exchange(&server, request.as_bytes()).await;
    assert_eq!(parse_one(&raw, true).0.status, 200);

    let request = "GET /static/hello.txt HTTP/1.1\r\nIf-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT\r\nConnection: close\r\n\r\n";
    let raw = exchange(&server, request.as_bytes()).await;
    assert_eq!(parse_one(&raw, true).0.text(), "hello world");
}

#[tokio::test]
async fn dot_dot_paths_answer_not_found() {
    let (_dir, registry) = site();
    let server = common::server(registry, |b| b);

    for path in ["/static/../../etc/passwd", "/static/%2e%2e/%2e%2e/etc/passwd"] {
        let response = get(&server, path).await;
        assert_eq!(response.status, 404, "{}", path);
        assert!(!response.text().contains("root:"));
    }
}

#[tokio::test]
async fn static_requests_open_no_sessions() {
    let (_dir, registry) = site();
    let sessions = Arc::new(MemorySessions::new("PSESSION"));
    let server = common::server(registry, |b| {
        b.csrf(Some(CsrfGuard::new(b"k".to_vec(), Duration::from_secs(600))))
            .sessions(sessions.clone())
    });

    for _ in 0..50 {
        let response = get(&server, "/static/hello.txt").await;
        assert_eq!(response.status, 200);
        assert!(response.header("Set-Cookie").is_none());
    }
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn traversal_stays_inside_the_root() {
    let outer = tempfile::tempdir().unwrap();
    fs::write(outer.path().join("secret.txt"), "secret").unwrap();
    let inner = outer.path().join("public");
    fs::create_dir(&inner).unwrap();
    let mut store = FileStore::new();
    store.add_root(&inner).unwrap();
    let mut registry = RouteRegistry::new();
    registry.add_file_store("/s", store);
    let server = common::server(registry, |b| b);

    for path in ["/s/../secret.txt", "/s/%2e%2e/secret.txt", "/s/..%2fsecret.txt"] {
        let response = get(&server, path).await;
        assert_ne!(response.text(), "secret", "{} escaped the root", path);
    }
}

#[tokio::test]
async fn zip_roots_and_root_order() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = dir.path().join("site.zip");
    {
        let mut zip = zip::ZipWriter::new(fs::File::create(&archive_path).unwrap());
        let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        zip.start_file("css/site.css", options).unwrap();
        zip.write_all(b"body{}").unwrap();
        zip.start_file("shared.txt", options).unwrap();
        zip.write_all(b"from archive").unwrap();
        zip.finish().unwrap();
    }
    let plain = dir.path().join("plain");
    fs::create_dir(&plain).unwrap();
    fs::write(plain.join("shared.txt"), "from directory").unwrap();

    let mut store = FileStore::new();
    store.add_root(&plain).unwrap().add_root(&archive_path).unwrap();
    let mut registry = RouteRegistry::new();
    registry.add_file_store("/assets", store);
    let server = common::server(registry, |b| b);

    let css = get(&server, "/assets/css/site.css").await;
    assert_eq!(css.text(), "body{}");
    assert_eq!(css.header("Content-Type"), Some("text/css"));
    assert_eq!(get(&server, "/assets/shared.txt").await.text(), "from directory");
    assert_eq!(get(&server, "/assets/css").await.status, 301);
}

#[tokio::test]
async fn only_get_and_head() {
    let (_dir, registry) = site();
    let server = common::server(registry, |b| b.csrf(None));
    let raw = exchange(&server, b"DELETE /static/hello.txt HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(parse_one(&raw, true).0.status, 400);
}
