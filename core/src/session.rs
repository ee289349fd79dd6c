/// Session context shared by every engine component.
///
/// One instance per signed-in user. Replaces any notion of process-global
/// identity or store handles: components receive the context explicitly,
/// which keeps tests free to run many sessions against one fake store.
use crate::config::Config;
use crate::store::DocumentStore;
use crate::types::{AuthUser, ChatEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

pub struct SessionContext {
    /// Identity key of the signed-in user (provider-assigned)
    pub uid: String,

    /// The identity handed over by the provider at sign-in
    pub auth: AuthUser,

    /// Remote document store handle
    pub store: Arc<dyn DocumentStore>,

    /// Engine configuration
    pub config: Config,

    /// Connectivity flag. Gates sends only; subscriptions ride out network
    /// loss on the store's own retry behavior.
    online: AtomicBool,

    /// Event stream consumed by the embedding UI layer
    events: broadcast::Sender<ChatEvent>,
}

impl SessionContext {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config, auth: AuthUser) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            uid: auth.uid.clone(),
            auth,
            store,
            config,
            online: AtomicBool::new(true),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Publish an event. Nobody listening is fine.
    pub fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    /// Surface a transient, user-visible message (toast/banner material).
    pub fn notice(&self, text: impl Into<String>, warning: bool) {
        let text = text.into();
        if warning {
            warn!("{}", text);
        }
        self.emit(ChatEvent::Notice { text, warning });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::LocalStore;

    fn context() -> SessionContext {
        let auth = AuthUser {
            uid: "u1".to_string(),
            display_name: Some("Test".to_string()),
            photo_url: None,
            guest: false,
        };
        SessionContext::new(Arc::new(LocalStore::new()), Config::default(), auth)
    }

    #[tokio::test]
    async fn test_connectivity_flag() {
        let ctx = context();
        assert!(ctx.is_online());
        ctx.set_online(false);
        assert!(!ctx.is_online());
    }

    #[tokio::test]
    async fn test_notice_reaches_subscribers() {
        let ctx = context();
        let mut rx = ctx.subscribe_events();
        ctx.notice("something happened", false);
        match rx.recv().await.unwrap() {
            ChatEvent::Notice { text, warning } => {
                assert_eq!(text, "something happened");
                assert!(!warning);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
