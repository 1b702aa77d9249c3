//! Session lookup for CSRF binding.
//!
//! # Responsibilities
//! - Map a request to a session id (cookie based)
//! - Issue new ids for clients without a live session
//! - Expire sessions that have been idle too long
//!
//! # Design Decisions
//! - The lookup is a trait so an application can plug in its own store
//! - The in-memory store is a `DashMap`; lookups on different shards never
//!   contend

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

use crate::http::Request;

pub trait SessionLookup: Send + Sync {
    /// Session id for this request, creating one if the store does that.
    fn session_for(&self, req: &mut Request) -> Option<String>;

    /// Drop sessions idle for longer than `max_idle`; returns how many went.
    fn expire_idle(&self, _max_idle: Duration) -> usize {
        0
    }
}

/// No sessions at all; CSRF tokens are bound to the empty id.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSessions;

impl SessionLookup for NoSessions {
    fn session_for(&self, _req: &mut Request) -> Option<String> {
        None
    }
}

/// Cookie-keyed sessions kept in process memory.
#[derive(Debug)]
pub struct MemorySessions {
    cookie: String,
    sessions: DashMap<String, Instant>,
}

impl MemorySessions {
    pub fn new(cookie: impl Into<String>) -> Self {
        Self { cookie: cookie.into(), sessions: DashMap::new() }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionLookup for MemorySessions {
    fn session_for(&self, req: &mut Request) -> Option<String> {
        if let Some(id) = req.cookie(&self.cookie) {
            if let Some(mut last_used) = self.sessions.get_mut(id) {
                *last_used = Instant::now();
                return Some(id.to_string());
            }
        }

        let id = new_session_id();
        self.sessions.insert(id.clone(), Instant::now());
        req.reply.headers.append("Set-Cookie", format!("{}={}; path=/", self.cookie, id));
        req.cookies.insert(self.cookie.clone(), id.clone());
        tracing::debug!(session = %id, "Session created");
        Some(id)
    }

    fn expire_idle(&self, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, last_used| last_used.elapsed() <= max_idle);
        before.saturating_sub(self.sessions.len())
    }
}

/// A fresh id shaped `xxxxxx-xxxxxx-xxxxxx` in base 36.
pub fn new_session_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let mut group = || -> String {
        (0..6).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
    };
    format!("{}-{}-{}", group(), group(), group())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::Headers;
    use crate::http::request::{HttpVersion, RequestLine};
    use bytes::Bytes;

    fn request(cookie: Option<&str>) -> Request {
        let line = RequestLine { method: "GET".into(), uri: "/".into(), version: HttpVersion::Http11 };
        let header = cookie.map(|c| format!("Cookie: {}", c));
        let headers = Headers::from_lines(header.as_deref());
        let mut req = Request::new(line, headers, Bytes::new(), "127.0.0.1:1".parse().unwrap());
        req.cookies = crate::http::form::parse_cookies(req.headers.get_all("Cookie"));
        req
    }

    #[test]
    fn id_shape() {
        let id = new_session_id();
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.len() == 6 && g.chars().all(|c| c.is_ascii_alphanumeric())));
        assert_ne!(id, new_session_id());
    }

    #[test]
    fn issues_then_recognizes_sessions() {
        let sessions = MemorySessions::new("PSESSION");
        let mut first = request(None);
        let id = sessions.session_for(&mut first).unwrap();
        let cookie = first.reply.headers.get("Set-Cookie").unwrap().to_string();
        assert_eq!(cookie, format!("PSESSION={}; path=/", id));

        let mut again = request(Some(&format!("PSESSION={}", id)));
        assert_eq!(sessions.session_for(&mut again).as_deref(), Some(id.as_str()));
        assert!(!again.reply.headers.contains("Set-Cookie"));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn unknown_cookie_gets_new_session() {
        let sessions = MemorySessions::new("PSESSION");
        let mut req = request(Some("PSESSION=forged"));
        let id = sessions.session_for(&mut req).unwrap();
        assert_ne!(id, "forged");
        assert!(req.reply.headers.contains("Set-Cookie"));
    }

    #[test]
    fn idle_sessions_expire() {
        let sessions = MemorySessions::new("PSESSION");
        sessions.session_for(&mut request(None));
        assert_eq!(sessions.expire_idle(Duration::from_secs(3600)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sessions.expire_idle(Duration::from_millis(1)), 1);
        assert!(sessions.is_empty());
    }
}
