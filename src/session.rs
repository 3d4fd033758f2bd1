//! Session state, auth events and the guard in front of the timesheet view.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::mpsc::{self, Receiver, Sender};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::backend::{Backend, BackendError};
use crate::models::Session;
use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: Vec<(u64, Sender<AuthEvent>)>,
}

/// Broadcasts auth state changes to every live [`Subscription`].
#[derive(Clone, Default)]
pub struct AuthEvents {
    inner: Rc<RefCell<Subscribers>>,
}

impl AuthEvents {
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.senders.push((id, sender));
        Subscription {
            id,
            receiver,
            hub: Rc::downgrade(&self.inner),
        }
    }

    pub fn emit(&self, event: AuthEvent) {
        info!(?event, subscribers = self.subscriber_count(), "auth state changed");
        let inner = self.inner.borrow();
        for (_, sender) in &inner.senders {
            let _ = sender.send(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().senders.len()
    }
}

/// Receives auth events until dropped.
pub struct Subscription {
    id: u64,
    receiver: Receiver<AuthEvent>,
    hub: Weak<RefCell<Subscribers>>,
}

impl Subscription {
    pub fn try_next(&self) -> Option<AuthEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.borrow_mut().senders.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Owns the current session and keeps the backend's token in step with it.
pub struct Auth {
    session: Option<Session>,
    events: AuthEvents,
    persist: bool,
}

impl Auth {
    pub fn new(session: Option<Session>, persist: bool) -> Self {
        Self {
            session,
            events: AuthEvents::default(),
            persist,
        }
    }

    pub fn events(&self) -> &AuthEvents {
        &self.events
    }

    #[cfg(test)]
    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.user.id.as_str())
    }

    pub fn email(&self) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|session| session.user.email.as_deref())
    }

    /// Current session, refreshed first when its access token has expired.
    pub fn get_session(
        &mut self,
        backend: &mut dyn Backend,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, BackendError> {
        let Some(session) = self.session.clone() else {
            backend.set_access_token(None);
            return Ok(None);
        };

        if !session.is_expired(now) {
            backend.set_access_token(Some(session.access_token.clone()));
            return Ok(Some(session));
        }

        match backend.refresh_session(&session.refresh_token) {
            Ok(refreshed) => {
                self.store(Some(refreshed.clone()), backend);
                self.events.emit(AuthEvent::TokenRefreshed);
                Ok(Some(refreshed))
            }
            Err(err) => {
                warn!(%err, "token refresh failed");
                self.store(None, backend);
                self.events.emit(AuthEvent::SignedOut);
                Err(err)
            }
        }
    }

    pub fn sign_in(
        &mut self,
        backend: &mut dyn Backend,
        email: &str,
        password: &str,
    ) -> Result<(), BackendError> {
        let session = backend.sign_in_with_password(email, password)?;
        self.store(Some(session), backend);
        self.events.emit(AuthEvent::SignedIn);
        Ok(())
    }

    /// Returns `false` when the account must confirm its email first.
    pub fn sign_up(
        &mut self,
        backend: &mut dyn Backend,
        email: &str,
        password: &str,
    ) -> Result<bool, BackendError> {
        match backend.sign_up(email, password)? {
            Some(session) => {
                self.store(Some(session), backend);
                self.events.emit(AuthEvent::SignedIn);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn sign_out(&mut self, backend: &mut dyn Backend) {
        if let Some(session) = &self.session {
            if let Err(err) = backend.sign_out(&session.access_token) {
                warn!(%err, "remote sign-out failed");
            }
        }
        self.store(None, backend);
        self.events.emit(AuthEvent::SignedOut);
    }

    fn store(&mut self, session: Option<Session>, backend: &mut dyn Backend) {
        backend.set_access_token(session.as_ref().map(|s| s.access_token.clone()));
        if self.persist {
            let result = match &session {
                Some(session) => storage::write_session(session),
                None => storage::clear_session(),
            };
            if let Err(err) = result {
                warn!(%err, "failed to persist session");
            }
        }
        self.session = session;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Resolving,
    Authenticated,
    Unauthenticated,
}

/// Lets the protected view render only while a session exists.
pub struct SessionGuard {
    state: GuardState,
    subscription: Option<Subscription>,
}

impl SessionGuard {
    pub fn mount(events: &AuthEvents) -> Self {
        Self {
            state: GuardState::Resolving,
            subscription: Some(events.subscribe()),
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// Settles the initial lookup. A failed lookup counts as signed out.
    pub fn resolve(&mut self, lookup: Result<Option<Session>, BackendError>) {
        self.state = match lookup {
            Ok(Some(_)) => GuardState::Authenticated,
            Ok(None) => GuardState::Unauthenticated,
            Err(err) => {
                warn!(%err, "session check failed");
                GuardState::Unauthenticated
            }
        };
    }

    /// Applies queued auth events; returns whether the state changed.
    pub fn poll_events(&mut self) -> bool {
        let Some(subscription) = &self.subscription else {
            return false;
        };
        let before = self.state;
        while let Some(event) = subscription.try_next() {
            self.state = match event {
                AuthEvent::SignedOut => GuardState::Unauthenticated,
                AuthEvent::SignedIn | AuthEvent::TokenRefreshed => GuardState::Authenticated,
            };
        }
        self.state != before
    }

    pub fn unmount(&mut self) {
        self.subscription = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::models::User;
    use chrono::Duration;

    fn session(expires_at: i64) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
            user: User {
                id: "user-1".to_string(),
                email: Some("me@example.com".to_string()),
            },
        }
    }

    #[test]
    fn subscription_unsubscribes_on_drop() {
        let events = AuthEvents::default();
        let first = events.subscribe();
        let second = events.subscribe();
        assert_eq!(events.subscriber_count(), 2);

        drop(first);
        assert_eq!(events.subscriber_count(), 1);

        events.emit(AuthEvent::SignedIn);
        assert_eq!(second.try_next(), Some(AuthEvent::SignedIn));
        assert_eq!(second.try_next(), None);
    }

    #[test]
    fn guard_resolves_lookup() {
        let events = AuthEvents::default();
        let mut guard = SessionGuard::mount(&events);
        assert_eq!(guard.state(), GuardState::Resolving);

        guard.resolve(Ok(Some(session(i64::MAX))));
        assert_eq!(guard.state(), GuardState::Authenticated);

        guard.resolve(Err(BackendError::Network("offline".to_string())));
        assert_eq!(guard.state(), GuardState::Unauthenticated);
    }

    #[test]
    fn guard_follows_auth_events() {
        let events = AuthEvents::default();
        let mut guard = SessionGuard::mount(&events);
        guard.resolve(Ok(None));

        events.emit(AuthEvent::SignedIn);
        assert!(guard.poll_events());
        assert_eq!(guard.state(), GuardState::Authenticated);

        events.emit(AuthEvent::TokenRefreshed);
        assert!(!guard.poll_events());

        events.emit(AuthEvent::SignedOut);
        assert!(guard.poll_events());
        assert_eq!(guard.state(), GuardState::Unauthenticated);
    }

    #[test]
    fn unmounted_guard_stops_listening() {
        let events = AuthEvents::default();
        let mut guard = SessionGuard::mount(&events);
        guard.unmount();
        assert_eq!(events.subscriber_count(), 0);
        events.emit(AuthEvent::SignedIn);
        assert!(!guard.poll_events());
    }

    #[test]
    fn expired_session_is_refreshed() {
        let mut backend = MemoryBackend::new();
        let now = Utc::now();
        let mut auth = Auth::new(Some(session((now - Duration::minutes(1)).timestamp())), false);
        let listener = auth.events().subscribe();

        let current = auth.get_session(&mut backend, now).unwrap().unwrap();
        assert!(!current.is_expired(now));
        assert_eq!(listener.try_next(), Some(AuthEvent::TokenRefreshed));
        assert_eq!(backend.access_token().as_deref(), Some(current.access_token.as_str()));
    }

    #[test]
    fn sign_in_and_out_update_backend_token() {
        let mut backend = MemoryBackend::new();
        let mut auth = Auth::new(None, false);
        assert_eq!(auth.get_session(&mut backend, Utc::now()).unwrap(), None);

        auth.sign_in(&mut backend, "me@example.com", "hunter22").unwrap();
        assert_eq!(auth.user_id(), Some(crate::memory::USER_ID));
        assert!(backend.access_token().is_some());

        auth.sign_out(&mut backend);
        assert_eq!(auth.user_id(), None);
        assert!(backend.access_token().is_none());
    }
}
