use std::{
    collections::HashMap,
    future::{ready, Ready},
    sync::Mutex,
    time::{Duration, Instant},
};

use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};

use crate::{errors::AppError, utils};

/// What the request layer knows about an authenticated caller.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub is_admin: bool,
}

struct Entry {
    session: Session,
    created: Instant,
}

/// Bearer-token session store with TTL expiry. Created once at startup and
/// injected through `web::Data`; sessions are created on login/register and
/// destroyed on logout or expiry.
pub struct SessionStore {
    ttl: Duration,
    inner: Mutex<HashMap<String, Entry>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, session: Session) -> String {
        let token = utils::generate_token();
        self.lock().insert(
            token.clone(),
            Entry {
                session,
                created: Instant::now(),
            },
        );
        token
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        let mut map = self.lock();
        match map.get(token) {
            Some(entry) if entry.created.elapsed() <= self.ttl => Some(entry.session.clone()),
            Some(_) => {
                map.remove(token);
                None
            }
            None => None,
        }
    }

    pub fn destroy(&self, token: &str) -> bool {
        self.lock().remove(token).is_some()
    }

    /// Drop every expired entry. Cheap enough to call opportunistically.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.lock().retain(|_, entry| entry.created.elapsed() <= ttl);
    }
}

pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn session_from_request(req: &HttpRequest) -> Result<Session, AppError> {
    let store = req
        .app_data::<Data<SessionStore>>()
        .ok_or(AppError::Internal)?;
    let token = bearer_token(req).ok_or(AppError::Unauthorized)?;
    store.get(token).ok_or(AppError::Unauthorized)
}

/// Extractor for any authenticated caller.
pub struct AuthedUser(pub Session);

impl FromRequest for AuthedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, AppError>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(session_from_request(req).map(AuthedUser))
    }
}

/// Extractor that additionally requires the admin flag.
pub struct AdminUser(pub Session);

impl FromRequest for AdminUser {
    type Error = AppError;
    type Future = Ready<Result<Self, AppError>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(session_from_request(req).and_then(|session| {
            if session.is_admin {
                Ok(AdminUser(session))
            } else {
                Err(AppError::Forbidden)
            }
        }))
    }
}
