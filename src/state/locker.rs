// DANS : src/state/locker.rs

use dashmap::DashMap;
use std::hash::Hash;
use tokio::sync::oneshot;

/// Exclusion mutuelle par clé, en ordre d'arrivée.
///
/// `enqueue` est synchrone : l'ordre des tours est celui des appels, même si les tâches
/// qui attendent leur tour sont ordonnancées dans un autre ordre. Chaque tour attend la fin
/// du précédent (la libération de son `Sender`). Une entrée par clé, gardée à vie.
pub struct KeyedLock<K> {
    tails: DashMap<K, oneshot::Receiver<()>>,
}

impl<K: Eq + Hash + Clone> KeyedLock<K> {
    pub fn new() -> Self {
        Self { tails: DashMap::new() }
    }

    pub fn enqueue(&self, key: K) -> PendingTurn {
        let (release, tail) = oneshot::channel();
        let previous = self.tails.insert(key, tail);
        PendingTurn { previous, release: Some(release) }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tails.len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLock<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Une place réservée dans la file d'une clé.
pub struct PendingTurn {
    previous: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl PendingTurn {
    pub async fn acquire(mut self) -> Turn {
        if let Some(previous) = self.previous.take() {
            // Err = le tour précédent est terminé (Sender lâché).
            let _ = previous.await;
        }
        Turn { _release: self.release.take() }
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        // Place abandonnée sans avoir été prise : on ne libère le suivant qu'après le précédent.
        let (Some(previous), Some(release)) = (self.previous.take(), self.release.take()) else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = previous.await;
                drop(release);
            });
        }
    }
}

/// Le tour en cours ; le lâcher laisse passer le suivant.
pub struct Turn {
    _release: Option<oneshot::Sender<()>>,
}
