//! User-facing keyboard settings observed by the engine.
//!
//! The host owns the settings screen; the engine only ever reads. Updates
//! flow through a tokio watch channel so long-lived tasks can react to
//! changes (the processor drops its result cache when anything flips).

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Per-user toggles that change at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyboardSettings {
    /// Validate words against the dictionary and highlight misses.
    pub spell_check_enabled: bool,
    /// Publish suggestion lists to the host suggestion bar.
    pub show_suggestions: bool,
    /// Number of suggestions the host wants to display.
    pub suggestion_count: usize,
    /// Add committed words to the learned vocabulary.
    pub learn_new_words: bool,
    /// Replace a quick double space with ". ". Read by hosts; the engine
    /// only carries it.
    pub double_space_period: bool,
}

impl Default for KeyboardSettings {
    fn default() -> Self {
        Self {
            spell_check_enabled: true,
            show_suggestions: true,
            suggestion_count: 3,
            learn_new_words: true,
            double_space_period: true,
        }
    }
}

/// Sender half, held by the host. Every publish wakes all handles.
pub struct SettingsPublisher {
    tx: watch::Sender<KeyboardSettings>,
}

impl SettingsPublisher {
    pub fn new(initial: KeyboardSettings) -> (Self, SettingsHandle) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, SettingsHandle { rx })
    }

    pub fn publish(&self, settings: KeyboardSettings) {
        self.tx.send_replace(settings);
    }

    pub fn subscribe(&self) -> SettingsHandle {
        SettingsHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side handed to engine components. Clones observe the same stream.
#[derive(Clone)]
pub struct SettingsHandle {
    rx: watch::Receiver<KeyboardSettings>,
}

impl SettingsHandle {
    /// A handle that always reports `settings` and never signals a change.
    /// For hosts without a live settings screen, and for tests.
    pub fn fixed(settings: KeyboardSettings) -> Self {
        // Dropping the sender freezes the value; `changed` reports shutdown.
        let (_tx, rx) = watch::channel(settings);
        Self { rx }
    }

    /// The settings as of right now.
    pub fn current(&self) -> KeyboardSettings {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish. Returns `false` once the publisher is
    /// gone, which watcher loops treat as shutdown.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = KeyboardSettings::default();
        assert!(s.spell_check_enabled);
        assert!(s.show_suggestions);
        assert_eq!(s.suggestion_count, 3);
        assert!(s.learn_new_words);
        assert!(s.double_space_period);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_handles() {
        let (publisher, handle_a) = SettingsPublisher::new(KeyboardSettings::default());
        let handle_b = publisher.subscribe();

        publisher.publish(KeyboardSettings {
            suggestion_count: 5,
            ..KeyboardSettings::default()
        });

        assert_eq!(handle_a.current().suggestion_count, 5);
        assert_eq!(handle_b.current().suggestion_count, 5);
    }

    #[tokio::test]
    async fn test_changed_wakes_on_publish() {
        let (publisher, mut handle) = SettingsPublisher::new(KeyboardSettings::default());

        let waiter = tokio::spawn(async move {
            let woke = handle.changed().await;
            (woke, handle.current())
        });

        publisher.publish(KeyboardSettings {
            spell_check_enabled: false,
            ..KeyboardSettings::default()
        });

        let (woke, settings) = waiter.await.unwrap();
        assert!(woke);
        assert!(!settings.spell_check_enabled);
    }

    #[tokio::test]
    async fn test_changed_reports_publisher_gone() {
        let (publisher, mut handle) = SettingsPublisher::new(KeyboardSettings::default());
        drop(publisher);
        assert!(!handle.changed().await);
    }

    #[test]
    fn test_fixed_handle_reads_without_publisher() {
        let handle = SettingsHandle::fixed(KeyboardSettings {
            learn_new_words: false,
            ..KeyboardSettings::default()
        });
        assert!(!handle.current().learn_new_words);
    }
}
