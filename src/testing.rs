//! Test doubles shared by the module tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::net::{FetchError, Fetcher, Request, Response};

/// Fetcher answering from a table of canned responses keyed by URL
///
/// URLs without an entry fail with a network error, as does every URL while
/// the fetcher is set offline.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Result<Response, FetchError>>>,
    offline: AtomicBool,
    hanging: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(response));
    }

    pub fn fail(&self, url: &str, error: FetchError) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(error));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every fetch wait forever, like a connection that never answers
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.lock().unwrap().push(request.url.clone());

        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Network("offline".to_string()));
        }

        self.routes
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Network(format!("no route for {}", request.url))))
    }
}

/// Shorthand for a 200 response with a text body
pub fn ok_text(body: &str) -> Response {
    Response::new(200, body.as_bytes().to_vec())
}
