//! Idea pictures: storage path convention and the three derived variants.

use std::io::Cursor;
use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use crate::models::IdeaId;
use crate::storage::{MediaStore, MediaStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantFormat {
    Jpeg { quality: u8 },
    Png,
}

impl VariantFormat {
    fn extension(self) -> &'static str {
        match self {
            VariantFormat::Jpeg { .. } => "jpg",
            VariantFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: VariantFormat,
}

pub const SOCIAL: VariantSpec = VariantSpec { name: "social", width: 1024, height: 512, format: VariantFormat::Jpeg { quality: 100 } };
pub const LARGE: VariantSpec = VariantSpec { name: "large", width: 800, height: 400, format: VariantFormat::Png };
pub const THUMBNAIL: VariantSpec = VariantSpec { name: "thumbnail", width: 728, height: 250, format: VariantFormat::Png };

pub const VARIANTS: [VariantSpec; 3] = [SOCIAL, LARGE, THUMBNAIL];

pub const ALLOWED_MIME: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

#[derive(Debug, thiserror::Error)]
pub enum PictureError {
    #[error("unsupported picture type {0}")]
    Unsupported(String),
    #[error("cannot decode picture: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Store(#[from] MediaStoreError),
    #[error("image worker failed")]
    Blocking,
}

/// `ideas/<YYYY>/<MM>/<id><ext>` with the upload's lower-cased extension.
pub fn upload_path(id: IdeaId, filename: &str, now: DateTime<Utc>) -> String {
    tagged_upload_path(id, filename, now, "")
}

/// Like [`upload_path`], but never equal to `current`: a replacement gets a
/// short random tag so the stored picture stays intact until the save commits.
pub fn replacement_upload_path(id: IdeaId, filename: &str, now: DateTime<Utc>, current: Option<&str>) -> String {
    let path = upload_path(id, filename, now);
    if current != Some(path.as_str()) {
        return path;
    }
    let tag = uuid::Uuid::new_v4().simple().to_string();
    tagged_upload_path(id, filename, now, &format!("-{}", &tag[..8]))
}

fn tagged_upload_path(id: IdeaId, filename: &str, now: DateTime<Utc>, tag: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    format!("ideas/{:04}/{:02}/{id}{tag}{ext}", now.year(), now.month())
}

/// Storage path of one derived variant of `original`.
pub fn variant_path(original: &str, spec: &VariantSpec) -> String {
    let (dir, file) = original.rsplit_once('/').unwrap_or(("", original));
    let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
    let name = format!("{stem}_{}.{}", spec.name, spec.format.extension());
    if dir.is_empty() {
        name
    } else {
        format!("{dir}/{name}")
    }
}

/// URLs (under `/media/`) of the original and each variant.
pub fn picture_urls(original: &str) -> serde_json::Value {
    let mut urls = serde_json::Map::new();
    urls.insert("original".into(), format!("/media/{original}").into());
    for spec in &VARIANTS {
        urls.insert(spec.name.into(), format!("/media/{}", variant_path(original, spec)).into());
    }
    serde_json::Value::Object(urls)
}

pub fn sniff_image_mime(bytes: &[u8]) -> Result<String, PictureError> {
    let mime = infer::get(bytes).map(|t| t.mime_type().to_string()).unwrap_or_else(|| "application/octet-stream".into());
    if ALLOWED_MIME.contains(&mime.as_str()) {
        Ok(mime)
    } else {
        Err(PictureError::Unsupported(mime))
    }
}

fn encode(img: &DynamicImage, format: VariantFormat) -> Result<Vec<u8>, PictureError> {
    let mut buf = Vec::new();
    match format {
        VariantFormat::Jpeg { quality } => {
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
            encoder.encode_image(&img.to_rgb8())?;
        }
        VariantFormat::Png => img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?,
    }
    Ok(buf)
}

/// Decode `bytes` and produce every variant, resized to fill and
/// center-cropped. CPU bound; call from a blocking context.
pub fn render_variants(bytes: &[u8]) -> Result<Vec<(VariantSpec, Vec<u8>)>, PictureError> {
    let img = image::load_from_memory(bytes)?;
    VARIANTS
        .iter()
        .map(|spec| {
            let resized = img.resize_to_fill(spec.width, spec.height, FilterType::Lanczos3);
            Ok((*spec, encode(&resized, spec.format)?))
        })
        .collect()
}

/// Store the original at `path` and all its variants next to it.
pub async fn store_picture(store: &dyn MediaStore, path: &str, bytes: Vec<u8>) -> Result<(), PictureError> {
    sniff_image_mime(&bytes)?;
    let (bytes, variants) = actix_web::web::block(move || render_variants(&bytes).map(|v| (bytes, v)))
        .await
        .map_err(|_| PictureError::Blocking)??;
    store.save(path, &bytes).await?;
    for (spec, data) in variants {
        let vpath = variant_path(path, &spec);
        debug!(path = %vpath, size = data.len(), "stored picture variant");
        store.save(&vpath, &data).await?;
    }
    Ok(())
}

/// Remove the variants and then the original. Missing files are fine.
pub async fn delete_picture(store: &dyn MediaStore, path: &str) -> Result<(), MediaStoreError> {
    let mut paths: Vec<String> = VARIANTS.iter().map(|spec| variant_path(path, spec)).collect();
    paths.push(path.to_string());
    for p in paths {
        match store.delete(&p).await {
            Ok(()) | Err(MediaStoreError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
