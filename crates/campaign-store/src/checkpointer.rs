// Archivo: checkpointer.rs
// Propósito: ciclo de vida de los checkpoints de modelos. El blob se guarda
// tal cual en un `BlobStore`; este módulo nunca interpreta su contenido.
use crate::errors::Result;
use crate::lock::Lease;
use crate::repository::{BlobStore, CheckpointRepository};
use campaign_domain::Checkpoint;
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

pub struct ModelCheckpointer<R: CheckpointRepository + ?Sized> {
    repo: Arc<R>,
    blobs: Arc<dyn BlobStore>,
}

impl<R: CheckpointRepository + ?Sized> Clone for ModelCheckpointer<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone(), blobs: self.blobs.clone() }
    }
}

impl<R: CheckpointRepository + ?Sized> ModelCheckpointer<R> {
    pub fn new(repo: Arc<R>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { repo, blobs }
    }

    /// Escribe el blob y después la fila de metadatos (con fence). Si la
    /// fila no se puede guardar se intenta borrar el blob huérfano.
    pub fn save(&self,
                campaign_id: &Uuid,
                iteration_id: &Uuid,
                blob: &[u8],
                metadata: JsonValue,
                lease: Option<&Lease>)
                -> Result<Checkpoint> {
        let id = Uuid::new_v4();
        let checkpoint = Checkpoint { id,
                                      campaign_id: *campaign_id,
                                      iteration_id: *iteration_id,
                                      blob_key: format!("{}/{}.ckpt", campaign_id, id),
                                      size_bytes: blob.len() as u64,
                                      metadata,
                                      created_at: Utc::now() };
        self.blobs.put(&checkpoint.blob_key, blob)?;
        if let Err(e) = self.repo.insert_checkpoint(&checkpoint, lease) {
            if let Err(cleanup) = self.blobs.delete(&checkpoint.blob_key) {
                log::warn!("no se pudo borrar el blob huérfano {}: {}", checkpoint.blob_key, cleanup);
            }
            return Err(e);
        }
        log::info!("checkpoint guardado campaign={} iteración={} bytes={}",
                   campaign_id,
                   iteration_id,
                   checkpoint.size_bytes);
        Ok(checkpoint)
    }

    /// Checkpoint de la iteración pedida, o el más reciente de la campaña.
    pub fn load(&self, campaign_id: &Uuid, iteration_id: Option<&Uuid>) -> Result<Option<(Checkpoint, Vec<u8>)>> {
        let found = match iteration_id {
            Some(it) => self.repo.checkpoint_for_iteration(campaign_id, it)?,
            None => self.repo.latest_checkpoint(campaign_id)?,
        };
        match found {
            Some(cp) => {
                let bytes = self.blobs.get(&cp.blob_key)?;
                Ok(Some((cp, bytes)))
            }
            None => Ok(None),
        }
    }

    /// Borra todos menos los `keep_last` más recientes (nunca el último).
    /// Los fallos individuales se registran y no interrumpen la limpieza.
    pub fn cleanup(&self, campaign_id: &Uuid, keep_last: usize) -> Result<usize> {
        let keep = keep_last.max(1);
        let all = self.repo.list_checkpoints(campaign_id)?;
        let mut removed = 0;
        for cp in all.into_iter().skip(keep) {
            if let Err(e) = self.blobs.delete(&cp.blob_key) {
                log::warn!("no se pudo borrar el blob {} del checkpoint {}: {}", cp.blob_key, cp.id, e);
            }
            match self.repo.delete_checkpoint(&cp.id) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("no se pudo borrar el checkpoint {}: {}", cp.id, e),
            }
        }
        if removed > 0 {
            log::info!("{} checkpoints eliminados de la campaña {}", removed, campaign_id);
        }
        Ok(removed)
    }

    pub fn list(&self, campaign_id: &Uuid) -> Result<Vec<Checkpoint>> {
        self.repo.list_checkpoints(campaign_id)
    }
}
