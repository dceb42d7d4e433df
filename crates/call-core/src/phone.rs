//! Phone instance: shared configuration, event bus and collaborators
//!
//! A [`Phone`] is cheap to clone. Every call it creates captures the same
//! frozen [`CallConfig`], publishes on the same [`EventBus`] and carries the
//! phone's id as the leading argument of its notifications.
//!
//! # Examples
//!
//! ```rust
//! use softphone_call_core::{CallConfig, Phone};
//!
//! let phone = Phone::builder()
//!     .config(CallConfig::new().with_start_muted(true, false))
//!     .with_call_list(true)
//!     .build();
//!
//! let call = phone.create_call(None);
//! assert!(!call.is_primary());
//! assert!(phone.call_list().unwrap().switch_to(call.id()));
//! assert!(call.is_primary());
//! ```

use std::sync::{Arc, Weak};

use uuid::Uuid;

use crate::call::Call;
use crate::config::CallConfig;
use crate::events::{CallEvent, Channel, EventBus, Notification};
use crate::providers::Collaborators;
use crate::registry::CallList;
use crate::session::SignalingSession;

/// Builder for [`Phone`]
#[derive(Debug, Default)]
pub struct PhoneBuilder {
    config: CallConfig,
    collaborators: Collaborators,
    call_list: bool,
}

impl PhoneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CallConfig) -> Self {
        self.config = config;
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Attach a [`CallList`]; calls then no longer promote themselves on creation
    pub fn with_call_list(mut self, enabled: bool) -> Self {
        self.call_list = enabled;
        self
    }

    pub fn build(self) -> Phone {
        let config = self.config.effective(self.collaborators.mixer.is_some());
        let bus = EventBus::new();

        let call_list = self.call_list.then(|| {
            let list = Arc::new(CallList::new());
            let registry: Weak<CallList> = Arc::downgrade(&list);
            bus.subscribe(Arc::new(move |notification: &Notification| {
                if notification.channel == Channel::Call && notification.event == CallEvent::Terminated {
                    if let Some(list) = registry.upgrade() {
                        list.remove(&notification.call_id);
                    }
                }
            }));
            list
        });

        let phone = Phone {
            id: Uuid::new_v4(),
            config: Arc::new(config),
            bus,
            collaborators: self.collaborators,
            call_list,
        };
        tracing::info!(phone_id = %phone.id, call_list = phone.call_list.is_some(), "Phone created");
        phone
    }
}

/// Library instance owning the shared call context
#[derive(Clone)]
pub struct Phone {
    id: Uuid,
    config: Arc<CallConfig>,
    bus: EventBus,
    collaborators: Collaborators,
    call_list: Option<Arc<CallList>>,
}

impl Phone {
    pub fn builder() -> PhoneBuilder {
        PhoneBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn call_list(&self) -> Option<&Arc<CallList>> {
        self.call_list.as_ref()
    }

    /// Create a call for `session`, or a standalone placeholder without one.
    ///
    /// Without a call list the new call promotes itself; with one it is
    /// registered and waits to be switched to.
    pub fn create_call(&self, session: Option<Arc<dyn SignalingSession>>) -> Arc<Call> {
        let call = Call::create(
            self.id,
            Arc::clone(&self.config),
            self.bus.clone(),
            self.collaborators.clone(),
            session,
            self.call_list.is_none(),
        );

        if let Some(list) = &self.call_list {
            list.add(Arc::clone(&call));
        }
        call
    }
}

impl std::fmt::Debug for Phone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phone")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("collaborators", &self.collaborators)
            .field("call_list", &self.call_list.is_some())
            .finish()
    }
}
