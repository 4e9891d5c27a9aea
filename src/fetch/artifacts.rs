//! On-disk archive of acquired payloads.
//!
//! Layout: `{root}/{source}/{stem}.{xml|html|pdf}` where the stem is the
//! publication's PMC id, PMID or sanitized DOI, falling back to the md5 of
//! the content URL.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::models::{ArtifactRecord, CanonicalRecord};
use crate::sources::FetchedContent;
use crate::utils::sanitize_filename;

/// File stem for a publication's artifacts
pub fn artifact_stem(publication: &CanonicalRecord, url: &str) -> String {
    let preferred = [
        publication.pmc_id().map(str::to_string),
        publication.pmid().map(|p| format!("PMID{}", p)),
        publication.doi().map(str::to_string),
    ];
    preferred
        .into_iter()
        .flatten()
        .find_map(|candidate| sanitize_filename(&candidate).ok())
        .unwrap_or_else(|| format!("{:x}", md5::compute(url.as_bytes())))
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a payload from `source` for `publication` is stored
    pub fn path_for(
        &self,
        source: &str,
        publication: &CanonicalRecord,
        content: &FetchedContent,
    ) -> PathBuf {
        let dir = sanitize_filename(source).unwrap_or_else(|_| "unknown".to_string());
        self.root.join(dir).join(format!(
            "{}.{}",
            artifact_stem(publication, &content.url),
            content.content_type.extension()
        ))
    }

    /// Write the payload and return its record; an existing file is replaced
    pub async fn save(
        &self,
        source: &str,
        publication: &CanonicalRecord,
        content: &FetchedContent,
    ) -> std::io::Result<ArtifactRecord> {
        let path = self.path_for(source, publication, content);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, &content.bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        let sha256 = format!("{:x}", Sha256::digest(&content.bytes));
        tracing::debug!("Archived {} bytes to {}", content.bytes.len(), path.display());

        Ok(ArtifactRecord {
            path,
            bytes: content.bytes.len() as u64,
            sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentType, Identifier};
    use tempfile::tempdir;

    fn pdf(url: &str) -> FetchedContent {
        FetchedContent {
            bytes: b"%PDF-1.4 hello".to_vec(),
            content_type: ContentType::Pdf,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_stem_preference() {
        let mut record =
            CanonicalRecord::from_identifier(Identifier::doi("10.1000/xyz").unwrap());
        assert_eq!(artifact_stem(&record, "https://x"), "10.1000_xyz");

        record.identifiers.insert(Identifier::pmid("31452104").unwrap());
        assert_eq!(artifact_stem(&record, "https://x"), "PMID31452104");

        record.identifiers.insert(Identifier::pmcid("PMC7000001").unwrap());
        assert_eq!(artifact_stem(&record, "https://x"), "PMC7000001");
    }

    #[tokio::test]
    async fn test_save_writes_file_and_digest() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let record = CanonicalRecord::from_identifier(Identifier::pmcid("PMC42").unwrap());

        let artifact = store
            .save("europe_pmc", &record, &pdf("https://x/p.pdf"))
            .await
            .unwrap();

        assert_eq!(artifact.path, dir.path().join("europe_pmc").join("PMC42.pdf"));
        assert_eq!(artifact.bytes, 14);
        assert_eq!(artifact.sha256.len(), 64);
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"%PDF-1.4 hello");
        assert!(!artifact.path.with_extension("part").exists());
    }
}
