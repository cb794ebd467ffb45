//! File classification for engineering artifacts.
//!
//! The kind drives presentation (which diff renderer the platform picks) and
//! the default binary flag when content sniffing is unavailable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Cad,
    Pcb,
    Code,
    Doc,
    Image,
    #[default]
    Other,
}

/// Extension -> kind map for the artifact formats the platform knows about.
static FILE_KINDS: phf::Map<&'static str, FileKind> = phf::phf_map! {
    // Mechanical CAD
    "step" => FileKind::Cad,
    "stp" => FileKind::Cad,
    "iges" => FileKind::Cad,
    "igs" => FileKind::Cad,
    "stl" => FileKind::Cad,
    "f3d" => FileKind::Cad,
    "sldprt" => FileKind::Cad,
    "sldasm" => FileKind::Cad,
    "dwg" => FileKind::Cad,
    "dxf" => FileKind::Cad,
    "3mf" => FileKind::Cad,
    // PCB / EDA
    "kicad_pcb" => FileKind::Pcb,
    "kicad_sch" => FileKind::Pcb,
    "kicad_pro" => FileKind::Pcb,
    "brd" => FileKind::Pcb,
    "sch" => FileKind::Pcb,
    "gbr" => FileKind::Pcb,
    "drl" => FileKind::Pcb,
    // Firmware / software
    "rs" => FileKind::Code,
    "c" => FileKind::Code,
    "h" => FileKind::Code,
    "cpp" => FileKind::Code,
    "hpp" => FileKind::Code,
    "py" => FileKind::Code,
    "js" => FileKind::Code,
    "ts" => FileKind::Code,
    "ino" => FileKind::Code,
    "v" => FileKind::Code,
    "sv" => FileKind::Code,
    "vhd" => FileKind::Code,
    "toml" => FileKind::Code,
    "yaml" => FileKind::Code,
    "yml" => FileKind::Code,
    "json" => FileKind::Code,
    // Documentation
    "md" => FileKind::Doc,
    "txt" => FileKind::Doc,
    "csv" => FileKind::Doc,
    "rst" => FileKind::Doc,
    "pdf" => FileKind::Doc,
    // Images
    "png" => FileKind::Image,
    "jpg" => FileKind::Image,
    "jpeg" => FileKind::Image,
    "gif" => FileKind::Image,
    "svg" => FileKind::Image,
    "bmp" => FileKind::Image,
    "webp" => FileKind::Image,
};

impl FileKind {
    /// Classify by the path's extension (case-insensitive).
    pub fn from_path(path: &str) -> Self {
        path.rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .and_then(|ext| FILE_KINDS.get(ext.as_str()).copied())
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Cad => "cad",
            FileKind::Pcb => "pcb",
            FileKind::Code => "code",
            FileKind::Doc => "doc",
            FileKind::Image => "image",
            FileKind::Other => "other",
        }
    }

    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "cad" => Some(FileKind::Cad),
            "pcb" => Some(FileKind::Pcb),
            "code" => Some(FileKind::Code),
            "doc" => Some(FileKind::Doc),
            "image" => Some(FileKind::Image),
            "other" => Some(FileKind::Other),
            _ => None,
        }
    }

    /// Kinds whose formats are binary containers unless sniffing says otherwise.
    pub fn binary_by_default(&self) -> bool {
        matches!(self, FileKind::Cad | FileKind::Pcb | FileKind::Image)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
