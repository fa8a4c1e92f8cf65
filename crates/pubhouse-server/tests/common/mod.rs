#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Request, StatusCode, header},
};
use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use pubhouse_registry::{MemoryMetadataStorage, MemoryStorage, Registry, RegistryConfig};
use pubhouse_server::{AppState, config::ServerConfig, create_router};
use pubhouse_worker::{JobQueue, QueueConfig};
use serde_json::Value;
use std::sync::Arc;
use tar::{Builder, Header};
use tower::ServiceExt;

pub const ALICE: &str = "alice-token";
pub const BOB: &str = "bob-token";
pub const ADMIN: &str = "admin-token";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn error_code(&self) -> String {
        self.json()["error"]["code"].as_str().unwrap().to_string()
    }
}

/// App over in-memory storage with alice, bob and an administrator
pub async fn test_app() -> TestApp {
    let registry = Registry::new(
        RegistryConfig {
            base_url: "https://pub.example.com".to_string(),
        },
        Arc::new(MemoryMetadataStorage::new()),
        Arc::new(MemoryStorage::new()),
        JobQueue::new(QueueConfig::default()),
    );

    let state = AppState {
        registry: Arc::new(registry),
        config: ServerConfig {
            database_url: "memory".to_string(),
            max_upload_bytes: 1024 * 1024,
            ..ServerConfig::default()
        },
    };

    let registry = &state.registry;
    registry.create_user("alice@example.com", false, ALICE).await.unwrap();
    registry.create_user("bob@example.com", false, BOB).await.unwrap();
    registry.create_user("admin@example.com", true, ADMIN).await.unwrap();

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn get_as(&self, uri: &str, token: &str) -> TestResponse {
        let request = Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn put_json(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        let request = Request::put(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn upload(&self, token: Option<&str>, archive: Bytes) -> TestResponse {
        let mut request = Request::post("/api/packages/versions/newUpload")
            .header(header::USER_AGENT, "dart pub 3.4.0")
            .header("x-forwarded-for", "10.1.2.3, 172.16.0.1");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(request.body(Body::from(archive)).unwrap()).await
    }
}

/// Gzipped tar with the given (path, content) entries
pub fn build_archive(files: &[(&str, &str)]) -> Bytes {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = Builder::new(encoder);

    for (path, content) in files {
        let mut header = Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append(&header, content.as_bytes()).unwrap();
    }

    Bytes::from(tar.into_inner().unwrap().finish().unwrap())
}

pub fn package_archive(name: &str, version: &str) -> Bytes {
    let pubspec = format!(
        "name: {}\nversion: {}\ndescription: The {} package\n",
        name, version, name
    );
    build_archive(&[
        ("pubspec.yaml", &pubspec),
        ("README.md", "# readme"),
        ("lib/widgets.dart", "library widgets;"),
        ("lib/src/impl.dart", "part of widgets;"),
    ])
}
