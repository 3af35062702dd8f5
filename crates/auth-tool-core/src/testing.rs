//! In-process transport double used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{FlowError, FlowResult};
use crate::http::{HttpReply, HttpTransport};

enum Scripted {
    Reply(HttpReply),
    Fail,
}

#[derive(Default)]
pub(crate) struct FakeTransport {
    gets: HashMap<String, HttpReply>,
    posts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get(mut self, url: &str, status: u16, body: Value) -> Self {
        self.gets.insert(
            url.to_string(),
            HttpReply {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn with_post(self, url: &str, status: u16, body: Value) -> Self {
        self.with_post_raw(url, status, &body.to_string())
    }

    pub fn with_post_raw(self, url: &str, status: u16, body: &str) -> Self {
        self.push(
            url,
            Scripted::Reply(HttpReply {
                status,
                body: body.to_string(),
            }),
        );
        self
    }

    pub fn with_post_failure(self, url: &str) -> Self {
        self.push(url, Scripted::Fail);
        self
    }

    /// Every POST seen so far as `(url, body)`.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    fn push(&self, url: &str, scripted: Scripted) {
        self.posts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(scripted);
    }
}

impl HttpTransport for FakeTransport {
    async fn get(&self, url: &str) -> FlowResult<HttpReply> {
        self.gets
            .get(url)
            .cloned()
            .ok_or_else(|| FlowError::network(url, "no route"))
    }

    async fn post_form(&self, url: &str, body: String) -> FlowResult<HttpReply> {
        self.sent.lock().unwrap().push((url.to_string(), body));
        let next = self
            .posts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail) | None => Err(FlowError::network(url, "connection reset")),
        }
    }
}
