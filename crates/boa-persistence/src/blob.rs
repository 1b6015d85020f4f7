// Blob store sobre el sistema de ficheros. Cada clave `a/b.ckpt` se guarda
// en `<root>/a/b.ckpt`; la escritura pasa por un fichero temporal y un
// rename para que un lector nunca vea un blob a medias.
use campaign_store::{BlobStore, Result, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FsBlobStore {
  root: PathBuf,
}

impl FsBlobStore {
  pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    fs::create_dir_all(&root).map_err(|e| StoreError::Storage(format!("no se pudo crear {}: {}", root.display(), e)))?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Sólo se aceptan claves relativas sin `..`.
  fn path_for(&self, key: &str) -> Result<PathBuf> {
    let rel = Path::new(key);
    if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
      return Err(StoreError::Other(format!("clave de blob inválida: {}", key)));
    }
    Ok(self.root.join(rel))
  }
}

impl BlobStore for FsBlobStore {
  fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
    let path = self.path_for(key)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| StoreError::Storage(format!("blob {}: {}", key, e)))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| StoreError::Storage(format!("blob {}: {}", key, e)))?;
    fs::rename(&tmp, &path).map_err(|e| StoreError::Storage(format!("blob {}: {}", key, e)))?;
    Ok(())
  }

  fn get(&self, key: &str) -> Result<Vec<u8>> {
    let path = self.path_for(key)?;
    fs::read(&path).map_err(|e| match e.kind() {
                     ErrorKind::NotFound => StoreError::NotFound(format!("blob {}", key)),
                     _ => StoreError::Storage(format!("blob {}: {}", key, e)),
                   })
  }

  fn delete(&self, key: &str) -> Result<()> {
    let path = self.path_for(key)?;
    fs::remove_file(&path).map_err(|e| match e.kind() {
                            ErrorKind::NotFound => StoreError::NotFound(format!("blob {}", key)),
                            _ => StoreError::Storage(format!("blob {}: {}", key, e)),
                          })
  }
}
