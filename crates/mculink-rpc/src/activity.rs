use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::sync::lock;

/// Link activity reported to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Disconnected,
    Connected,
    /// Bytes are about to move (a request is being sent, or streams opened).
    Active,
    /// The link went idle again.
    Inactive,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activity::Disconnected => "disconnected",
            Activity::Connected => "connected",
            Activity::Active => "active",
            Activity::Inactive => "inactive",
        };
        f.write_str(name)
    }
}

pub type Observer = Arc<dyn Fn(Activity) + Send + Sync>;

/// Ordered list of activity observers.
///
/// Notification walks a snapshot of the list in registration order, so an
/// observer may register further observers without deadlocking.
#[derive(Clone, Default)]
pub struct Observers {
    list: Arc<Mutex<Vec<Observer>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: impl Fn(Activity) + Send + Sync + 'static) {
        lock(&self.list).push(Arc::new(observer));
    }

    pub fn notify(&self, activity: Activity) {
        let snapshot: Vec<Observer> = lock(&self.list).clone();
        for observer in snapshot {
            observer(activity);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.list).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("len", &self.len())
            .finish()
    }
}
