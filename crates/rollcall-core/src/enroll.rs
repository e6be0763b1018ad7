//! Reference set construction from a directory of labeled enrollment images.
//!
//! Each file's stem is the identity label. Files that cannot be decoded, or in
//! which no face is found, are skipped with a diagnostic; one bad photo never
//! aborts enrollment, and the resulting set may be empty.

use crate::extract::FaceExtractor;
use crate::types::{Identity, ReferenceSet};
use image::GrayImage;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot read enrollment directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why an enrollment asset contributed no identity.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The file is not a decodable image.
    Decode(String),
    /// Extraction ran but found no face.
    NoFaceDetected,
    /// The extraction collaborator failed on this asset.
    Extraction(String),
    /// The embedding dimension disagrees with earlier identities.
    DimensionMismatch { expected: usize, actual: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Decode(e) => write!(f, "decode failed: {e}"),
            SkipReason::NoFaceDetected => f.write_str("no face detected"),
            SkipReason::Extraction(e) => write!(f, "extraction failed: {e}"),
            SkipReason::DimensionMismatch { expected, actual } => {
                write!(f, "embedding has {actual} dims, expected {expected}")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedAsset {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Outcome of enrollment: the usable reference set plus what was left out.
#[derive(Debug, Clone)]
pub struct EnrollmentReport {
    pub reference: ReferenceSet,
    pub skipped: Vec<SkippedAsset>,
}

/// Enrollment label for an asset path: the file name without its extension.
pub fn label_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Regular files in `dir`, sorted by file name.
fn list_assets(dir: &Path) -> Result<Vec<PathBuf>, EnrollError> {
    let read_dir = |source| EnrollError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir)? {
        let entry = entry.map_err(read_dir)?;
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Build the reference set from every image in `dir`.
pub fn build_reference_set(
    dir: &Path,
    extractor: &mut dyn FaceExtractor,
) -> Result<EnrollmentReport, EnrollError> {
    let assets = list_assets(dir)?;
    tracing::info!(dir = %dir.display(), assets = assets.len(), "enrolling");

    let decoded = assets.into_iter().map(|path| {
        let image = image::open(&path)
            .map(|img| img.to_luma8())
            .map_err(|e| e.to_string());
        (path, image)
    });
    Ok(enroll_images(decoded, extractor))
}

/// Enroll already-decoded assets, in order.
pub fn enroll_images<I>(assets: I, extractor: &mut dyn FaceExtractor) -> EnrollmentReport
where
    I: IntoIterator<Item = (PathBuf, Result<GrayImage, String>)>,
{
    let mut identities: Vec<Identity> = Vec::new();
    let mut skipped = Vec::new();

    for (path, image) in assets {
        match enroll_one(&path, image, extractor, &identities) {
            Ok(identity) => {
                tracing::info!(name = %identity.name, path = %path.display(), "enrolled");
                identities.push(identity);
            }
            Err(reason) => {
                tracing::warn!(path = %path.display(), %reason, "enrollment asset skipped");
                skipped.push(SkippedAsset { path, reason });
            }
        }
    }

    tracing::info!(
        enrolled = identities.len(),
        skipped = skipped.len(),
        "encoding complete"
    );

    EnrollmentReport {
        // Dimensions were checked as each identity was admitted.
        reference: ReferenceSet::new(identities).unwrap_or_default(),
        skipped,
    }
}

fn enroll_one(
    path: &Path,
    image: Result<GrayImage, String>,
    extractor: &mut dyn FaceExtractor,
    enrolled: &[Identity],
) -> Result<Identity, SkipReason> {
    let name = label_for(path)
        .ok_or_else(|| SkipReason::Decode("file name is not a valid label".into()))?;
    let image = image.map_err(SkipReason::Decode)?;

    let faces = extractor
        .extract(&image)
        .map_err(|e| SkipReason::Extraction(e.to_string()))?;
    if faces.len() > 1 {
        tracing::debug!(
            path = %path.display(),
            faces = faces.len(),
            "several faces; using the most confident"
        );
    }
    let face = faces
        .into_iter()
        .max_by(|a, b| a.bbox.confidence.total_cmp(&b.bbox.confidence))
        .ok_or(SkipReason::NoFaceDetected)?;

    if let Some(first) = enrolled.first() {
        let expected = first.embedding.dimension();
        let actual = face.embedding.dimension();
        if expected != actual {
            return Err(SkipReason::DimensionMismatch { expected, actual });
        }
    }

    Ok(Identity {
        name,
        embedding: face.embedding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractError;
    use crate::types::{BoundingBox, DetectedFace, Embedding};
    use image::Luma;

    /// Pixel (0, 0) encodes the face: 0 means no face, otherwise the
    /// embedding is `[value, 1.0]`.
    struct PixelExtractor {
        calls: usize,
    }

    impl FaceExtractor for PixelExtractor {
        fn extract(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, ExtractError> {
            self.calls += 1;
            let value = image.get_pixel(0, 0).0[0];
            if value == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![DetectedFace {
                bbox: BoundingBox {
                    x: 0.0, y: 0.0, width: 4.0, height: 4.0,
                    confidence: 0.9, landmarks: None,
                },
                embedding: Embedding::new(vec![value as f32, 1.0]),
            }])
        }
    }

    fn write_png(dir: &Path, name: &str, value: u8) {
        GrayImage::from_pixel(4, 4, Luma([value]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_skips_asset_without_face() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 10);
        write_png(dir.path(), "bob.png", 20);
        write_png(dir.path(), "blurry.png", 0);
        write_png(dir.path(), "carol.png", 30);

        let mut extractor = PixelExtractor { calls: 0 };
        let report = build_reference_set(dir.path(), &mut extractor).unwrap();

        assert_eq!(extractor.calls, 4);
        assert_eq!(report.reference.len(), 3);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::NoFaceDetected);
        assert!(report.skipped[0].path.ends_with("blurry.png"));
    }

    #[test]
    fn test_skips_undecodable_file() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "alice.png", 10);
        std::fs::write(dir.path().join("corrupt.png"), b"not an image").unwrap();

        let mut extractor = PixelExtractor { calls: 0 };
        let report = build_reference_set(dir.path(), &mut extractor).unwrap();

        assert_eq!(report.reference.names().collect::<Vec<_>>(), vec!["alice"]);
        assert!(matches!(report.skipped[0].reason, SkipReason::Decode(_)));
        // Undecodable assets never reach the extractor.
        assert_eq!(extractor.calls, 1);
    }

    #[test]
    fn test_order_follows_file_names() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "zed.png", 3);
        write_png(dir.path(), "amy.png", 1);
        write_png(dir.path(), "mia.png", 2);
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let report = build_reference_set(dir.path(), &mut PixelExtractor { calls: 0 }).unwrap();
        assert_eq!(
            report.reference.names().collect::<Vec<_>>(),
            vec!["amy", "mia", "zed"]
        );
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn test_empty_directory_gives_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let report = build_reference_set(dir.path(), &mut PixelExtractor { calls: 0 }).unwrap();
        assert!(report.reference.is_empty());
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = build_reference_set(&missing, &mut PixelExtractor { calls: 0 }).unwrap_err();
        assert!(matches!(err, EnrollError::ReadDir { .. }));
    }

    #[test]
    fn test_dimension_mismatch_is_skipped() {
        struct GrowingExtractor(usize);
        impl FaceExtractor for GrowingExtractor {
            fn extract(&mut self, _: &GrayImage) -> Result<Vec<DetectedFace>, ExtractError> {
                self.0 += 1;
                Ok(vec![DetectedFace {
                    bbox: BoundingBox {
                        x: 0.0, y: 0.0, width: 1.0, height: 1.0,
                        confidence: 1.0, landmarks: None,
                    },
                    embedding: Embedding::new(vec![0.0; self.0]),
                }])
            }
        }

        let image = GrayImage::new(2, 2);
        let assets = vec![
            (PathBuf::from("a.png"), Ok(image.clone())),
            (PathBuf::from("b.png"), Ok(image)),
        ];
        let report = enroll_images(assets, &mut GrowingExtractor(0));
        assert_eq!(report.reference.len(), 1);
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::DimensionMismatch { expected: 1, actual: 2 }
        );
    }

    #[test]
    fn test_label_for() {
        assert_eq!(label_for(Path::new("imgs/Elon Musk.jpg")).as_deref(), Some("Elon Musk"));
        assert_eq!(label_for(Path::new("bill.gates.png")).as_deref(), Some("bill.gates"));
    }
}
