// DANS : src/state/store.rs

use crate::decoders::raydium::amm_v4::{AmmPool, Market};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

pub const POOLS_FILE_NAME: &str = "amm_v4_pools.json";
pub const MARKETS_FILE_NAME: &str = "markets.json";

/// Une ligne persistée, identifiée par son adresse.
pub trait Entity: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> Pubkey;
}

impl Entity for AmmPool {
    fn id(&self) -> Pubkey {
        self.id
    }
}

impl Entity for Market {
    fn id(&self) -> Pubkey {
        self.id
    }
}

pub type Predicate<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

/// Le stockage durable des identités (pools, marchés).
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    async fn count(&self) -> Result<usize>;

    /// Lignes triées par id, `skip` puis `take`.
    async fn find_page(&self, skip: usize, take: usize) -> Result<Vec<T>>;

    async fn find_by(&self, predicate: Predicate<'_, T>) -> Result<Vec<T>>;

    /// Insère ou remplace la ligne de même id.
    async fn upsert(&self, entity: T) -> Result<()> {
        self.upsert_many(vec![entity]).await.map(|_| ())
    }

    /// Applique les lignes dans l'ordre (la dernière d'un même id gagne). Renvoie le nombre
    /// de lignes réellement modifiées.
    async fn upsert_many(&self, entities: Vec<T>) -> Result<usize>;
}

/// Un fichier JSON chargé en mémoire, réécrit une fois par lot de changements effectifs.
pub struct JsonStore<T: Entity> {
    path: Option<PathBuf>,
    rows: Mutex<BTreeMap<Pubkey, T>>,
    // Sérialise les écritures du fichier sans bloquer les lectures des lignes.
    file: Mutex<()>,
}

impl<T: Entity> JsonStore<T> {
    /// Ouvre (ou crée au premier upsert) le fichier `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut rows = BTreeMap::new();

        if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("Impossible d'ouvrir le fichier '{}'", path.display()))?;
            let entities: Vec<T> = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("Erreur de désérialisation du fichier '{}'", path.display()))?;
            rows.extend(entities.into_iter().map(|entity| (entity.id(), entity)));
            info!(path = %path.display(), rows = rows.len(), "[Store] Fichier chargé.");
        }

        Ok(Self { path: Some(path), rows: Mutex::new(rows), file: Mutex::new(()) })
    }

    pub fn in_memory() -> Self {
        Self { path: None, rows: Mutex::new(BTreeMap::new()), file: Mutex::new(()) }
    }

    fn persist(path: &Path, entities: &[T]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Impossible de créer le dossier '{}'", parent.display()))?;
        }
        // Écriture dans un fichier temporaire puis rename pour ne jamais laisser un JSON tronqué.
        let tmp = path.with_extension("json.tmp");
        let file = File::create(&tmp)
            .with_context(|| format!("Impossible de créer le fichier '{}'", tmp.display()))?;
        serde_json::to_writer(BufWriter::new(file), entities)
            .with_context(|| format!("Erreur de sérialisation vers '{}'", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Impossible de remplacer '{}'", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for JsonStore<T> {
    async fn count(&self) -> Result<usize> {
        Ok(self.rows.lock().await.len())
    }

    async fn find_page(&self, skip: usize, take: usize) -> Result<Vec<T>> {
        let rows = self.rows.lock().await;
        Ok(rows.values().skip(skip).take(take).cloned().collect())
    }

    async fn find_by(&self, predicate: Predicate<'_, T>) -> Result<Vec<T>> {
        let rows = self.rows.lock().await;
        Ok(rows.values().filter(|row| predicate(row)).cloned().collect())
    }

    async fn upsert_many(&self, entities: Vec<T>) -> Result<usize> {
        // Pris avant les lignes : deux instantanés ne sont jamais écrits dans le désordre.
        let _file = self.file.lock().await;

        let (changed, path, snapshot) = {
            let mut rows = self.rows.lock().await;
            let mut changed = 0;
            for entity in entities {
                if rows.get(&entity.id()) != Some(&entity) {
                    rows.insert(entity.id(), entity);
                    changed += 1;
                }
            }
            let Some(path) = self.path.clone().filter(|_| changed > 0) else {
                return Ok(changed);
            };
            (changed, path, rows.values().cloned().collect::<Vec<T>>())
        };

        tokio::task::spawn_blocking(move || Self::persist(&path, &snapshot))
            .await
            .context("La tâche d'écriture du fichier a paniqué")??;
        Ok(changed)
    }
}

/// Lance la tâche d'écriture d'un registre. Tout ce qui est en attente dans le canal forme
/// un lot, appliqué dans l'ordre d'envoi puis écrit une seule fois. Un échec est journalisé
/// sans jamais remonter vers l'état en mémoire.
pub fn spawn_writer<T: Entity>(
    store: Arc<dyn Repository<T>>,
    component: &'static str,
) -> mpsc::UnboundedSender<T> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<T>();

    tokio::spawn(async move {
        while let Some(first) = receiver.recv().await {
            let mut batch = vec![first];
            while let Ok(next) = receiver.try_recv() {
                batch.push(next);
            }

            let rows = batch.len();
            match store.upsert_many(batch).await {
                Ok(changed) => debug!(component, rows, changed, "[Store] Lot sauvegardé."),
                Err(e) => error!(component, rows, "[Store] Échec de la sauvegarde du lot : {:?}", e),
            }
        }
    });

    sender
}
