use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use backy::fetch::http::{HttpClient, HttpResponse};
use backy::fetch::object_store::{ObjectStoreClient, ObjectStoreError};
use backy::types::BoxFuture;

/// An HTTP client that:
/// - serves canned bodies by URL (404 for anything else)
/// - counts every request it receives.
#[derive(Default)]
pub struct FakeHttp {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    requests: AtomicUsize,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.lock().unwrap().insert(url.to_string(), body.into());
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl HttpClient for FakeHttp {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<HttpResponse, String>> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let body = self.bodies.lock().unwrap().get(url).cloned();
            Ok(match body {
                Some(body) => HttpResponse {
                    status: 200,
                    status_text: "OK".to_string(),
                    body,
                },
                None => HttpResponse {
                    status: 404,
                    status_text: "Not Found".to_string(),
                    body: Vec::new(),
                },
            })
        })
    }
}

/// Object store keyed by `bucket/key`, counting requests.
///
/// [`FakeObjectStore::set_unreachable`] makes every request fail with a
/// transport error, as if the endpoint were down.
#[derive(Default)]
pub struct FakeObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    requests: AtomicUsize,
    unreachable: AtomicBool,
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), body.into());
        self
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        self.objects.lock().unwrap().remove(&format!("{bucket}/{key}"));
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ObjectStoreClient for FakeObjectStore {
    fn get_object<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Vec<u8>, ObjectStoreError>> {
        Box::pin(async move {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(ObjectStoreError::Transport("connection refused".to_string()));
            }
            self.objects
                .lock()
                .unwrap()
                .get(&format!("{bucket}/{key}"))
                .cloned()
                .ok_or_else(|| ObjectStoreError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
        })
    }
}
