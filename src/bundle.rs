//! # Bundle Module
//!
//! Alcune memory con filtro vengono scaricate come un unico archivio ZIP
//! invece che come due locator separati.
//!
//! ## Responsabilità:
//! - Riconosce un archivio dalla firma `PK\x03\x04`
//! - Estrae il media principale (`*-main.*`, altrimenti il primo file)
//! - Estrae l'overlay (`*-overlay.*`) se presente
//! - Ignora le voci `__MACOSX` e i file nascosti
//!
//! L'estensione del media principale sostituisce quella dedotta dal locator.

use crate::error::{ArchiveError, ArchiveResult};
use crate::export_parser::{media_extension, MediaKind};
use std::io::{Cursor, Read};
use zip::ZipArchive;

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Media extracted from a bundled download
#[derive(Debug, Clone, PartialEq)]
pub struct AssetBundle {
    pub main: Vec<u8>,
    pub main_name: String,
    pub overlay: Option<Vec<u8>>,
}

impl AssetBundle {
    pub fn is_bundle(bytes: &[u8]) -> bool {
        bytes.starts_with(ZIP_SIGNATURE)
    }

    pub fn unpack(bytes: &[u8]) -> ArchiveResult<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(bundle_error)?;

        let mut names = Vec::new();
        for index in 0..archive.len() {
            let file = archive.by_index(index).map_err(bundle_error)?;
            if file.is_dir() || is_hidden(file.name()) {
                continue;
            }
            names.push(file.name().to_string());
        }

        let main_name = names
            .iter()
            .find(|name| name.to_lowercase().contains("-main."))
            .or_else(|| names.first())
            .cloned()
            .ok_or_else(|| ArchiveError::Composition("bundle holds no media file".to_string()))?;
        let overlay_name = names
            .iter()
            .find(|name| name.to_lowercase().contains("-overlay.") && **name != main_name)
            .cloned();

        let main = read_entry(&mut archive, &main_name)?;
        let overlay = match overlay_name {
            Some(ref name) => Some(read_entry(&mut archive, name)?),
            None => None,
        };

        Ok(Self { main, main_name, overlay })
    }

    /// Extension of the main file when it is a known media type
    pub fn extension(&self) -> Option<String> {
        media_extension(&self.main_name)
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        self.extension().and_then(|ext| MediaKind::from_extension(&ext))
    }
}

fn is_hidden(name: &str) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    name.starts_with("__MACOSX") || name.starts_with('.') || file_name.starts_with('.')
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> ArchiveResult<Vec<u8>> {
    let mut file = archive.by_name(name).map_err(bundle_error)?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(content)
}

fn bundle_error(error: zip::result::ZipError) -> ArchiveError {
    ArchiveError::Composition(format!("unreadable bundle: {}", error))
}
