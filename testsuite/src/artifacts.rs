use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use everscale_types::prelude::*;
use tycho_testsuite_abi::{Abi, CellExt};

use crate::error::{HarnessError, HarnessResult};
use crate::registry::ContractImage;

/// Loads compiled contracts from a directory.
///
/// A contract `name` is stored as `name.tvc` (serialized `StateInit`)
/// and `name.abi.json`.
#[derive(Debug, Clone)]
pub struct ArtifactLoader {
    root: PathBuf,
}

impl ArtifactLoader {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.tvc"))
    }

    pub fn abi_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.abi.json"))
    }

    pub fn load_image(&self, name: &str) -> HarnessResult<ContractImage> {
        let path = self.image_path(name);
        let bytes = self.read(name, &path)?;
        ContractImage::from_boc(&bytes).map_err(|e| HarnessError::Artifact {
            name: name.to_owned(),
            source: anyhow::Error::new(e).context(format!("invalid image {}", path.display())),
        })
    }

    pub fn load_abi(&self, name: &str) -> HarnessResult<Arc<Abi>> {
        let path = self.abi_path(name);
        let bytes = self.read(name, &path)?;
        let json = std::str::from_utf8(&bytes)
            .context("abi is not valid utf-8")
            .and_then(|json| Abi::from_json(name, json).map_err(anyhow::Error::from))
            .map_err(|source| HarnessError::Artifact {
                name: name.to_owned(),
                source,
            })?;
        Ok(json.into_shared())
    }

    /// Code cell of `name.tvc`.
    pub fn load_code(&self, name: &str) -> HarnessResult<Cell> {
        self.load_image(name).map(|image| image.code)
    }

    /// Data cell of `name.tvc`.
    pub fn load_data(&self, name: &str) -> HarnessResult<Cell> {
        self.load_image(name).map(|image| image.data)
    }

    /// Any bag of cells relative to the root.
    pub fn load_cell(&self, file: &str) -> HarnessResult<Cell> {
        let path = self.root.join(file);
        let bytes = self.read(file, &path)?;
        Cell::from_boc(&bytes).map_err(|e| HarnessError::Artifact {
            name: file.to_owned(),
            source: anyhow::anyhow!("invalid boc {}: {e}", path.display()),
        })
    }

    fn read(&self, name: &str, path: &Path) -> HarnessResult<Vec<u8>> {
        std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))
            .map_err(|source| HarnessError::Artifact {
                name: name.to_owned(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::make_code;

    fn make_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tycho-testsuite-{name}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_image_and_abi() -> anyhow::Result<()> {
        let dir = make_dir("artifacts");
        let image = ContractImage::new(make_code("wallet"), CellBuilder::build_from(5u32)?);
        std::fs::write(dir.join("Wallet.tvc"), image.to_cell()?.to_boc())?;
        std::fs::write(
            dir.join("Wallet.abi.json"),
            r#"{"ABI version": 2, "functions": [], "events": []}"#,
        )?;

        let loader = ArtifactLoader::new(&dir);
        assert_eq!(loader.load_image("Wallet")?, image);
        assert_eq!(loader.load_code("Wallet")?, image.code);
        assert_eq!(loader.load_data("Wallet")?, image.data);
        assert_eq!(loader.load_cell("Wallet.tvc")?, image.to_cell()?);
        assert_eq!(loader.load_abi("Wallet")?.name(), "Wallet");

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn missing_artifact() {
        let loader = ArtifactLoader::new(make_dir("missing"));
        assert!(matches!(
            loader.load_image("Nope"),
            Err(HarnessError::Artifact { name, .. }) if name == "Nope"
        ));
        assert!(matches!(
            loader.load_abi("Nope"),
            Err(HarnessError::Artifact { .. })
        ));
    }
}
