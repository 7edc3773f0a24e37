use std::fmt;

/// Container type of an uploaded buffer, detected from its leading bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerKind {
    Zip,
    Rar,
    SevenZip,
    #[default]
    Flat,
}

impl ContainerKind {
    const ZIP_MAGIC: &'static [u8] = b"PK";
    const RAR_MAGIC: &'static [u8] = b"Rar!";
    const SEVEN_ZIP_MAGIC: &'static [u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

    /// Detect the container from the first bytes of a buffer. Anything that
    /// is not a known archive signature is a plain file.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(Self::ZIP_MAGIC) {
            Self::Zip
        } else if bytes.starts_with(Self::RAR_MAGIC) {
            Self::Rar
        } else if bytes.starts_with(Self::SEVEN_ZIP_MAGIC) {
            Self::SevenZip
        } else {
            Self::Flat
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zip => write!(f, "ZIP"),
            Self::Rar => write!(f, "RAR"),
            Self::SevenZip => write!(f, "7z"),
            Self::Flat => write!(f, "plain file"),
        }
    }
}

/// What a file inside a scan upload is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileRole {
    /// Raw voxel data, `*.vol`.
    Volume,
    /// Scan geometry, `VolumeId.xml`.
    VolumeId,
    /// Patient and acquisition record, `ver_ctrl.txt`.
    VerCtrl,
    /// Viewer installers, fonts, configuration and everything else.
    Other,
}

impl FileRole {
    pub const VOLUME_EXTENSION: &'static str = ".vol";
    pub const VOLUME_ID_NAME: &'static str = "VolumeId.xml";
    pub const VER_CTRL_NAME: &'static str = "ver_ctrl.txt";

    /// Classify a bare file name. Folder uploads match exactly, archive
    /// entries ignore ASCII case.
    pub fn classify(name: &str, case_sensitive: bool) -> Self {
        if case_sensitive {
            if name == Self::VOLUME_ID_NAME {
                Self::VolumeId
            } else if name == Self::VER_CTRL_NAME {
                Self::VerCtrl
            } else if name.len() > Self::VOLUME_EXTENSION.len()
                && name.ends_with(Self::VOLUME_EXTENSION)
            {
                Self::Volume
            } else {
                Self::Other
            }
        } else {
            let lower = name.to_ascii_lowercase();
            if lower == Self::VOLUME_ID_NAME.to_ascii_lowercase() {
                Self::VolumeId
            } else if lower == Self::VER_CTRL_NAME {
                Self::VerCtrl
            } else if lower.len() > Self::VOLUME_EXTENSION.len()
                && lower.ends_with(Self::VOLUME_EXTENSION)
            {
                Self::Volume
            } else {
                Self::Other
            }
        }
    }

    pub fn is_medical(&self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Which estimate the dimension resolver settled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DimensionSource {
    /// Diameter in voxels derived from `dmmVolumeRadius` and `dmmVoxelSize`.
    Geometry,
    /// Cube root of the number of samples actually present in the file.
    ByteCount,
}

#[cfg(test)]
mod tests {
    use super::{ContainerKind, FileRole};

    #[test]
    pub fn test_detect_container() {
        assert_eq!(ContainerKind::Zip, ContainerKind::detect(b"PK\x03\x04rest"));
        assert_eq!(ContainerKind::Rar, ContainerKind::detect(b"Rar!\x1a\x07\x00"));
        assert_eq!(
            ContainerKind::SevenZip,
            ContainerKind::detect(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C, 0x00])
        );
        assert_eq!(ContainerKind::Flat, ContainerKind::detect(b"P"));
        assert_eq!(ContainerKind::Flat, ContainerKind::detect(&[]));
    }

    #[test]
    pub fn test_classify_exact() {
        assert_eq!(FileRole::VolumeId, FileRole::classify("VolumeId.xml", true));
        assert_eq!(FileRole::Other, FileRole::classify("volumeid.xml", true));
        assert_eq!(FileRole::VerCtrl, FileRole::classify("ver_ctrl.txt", true));
        assert_eq!(FileRole::Volume, FileRole::classify("CT_0001.vol", true));
        assert_eq!(FileRole::Other, FileRole::classify("CT_0001.VOL", true));
        assert_eq!(FileRole::Other, FileRole::classify(".vol", true));
        assert_eq!(FileRole::Other, FileRole::classify("Viewer.exe", true));
    }

    #[test]
    pub fn test_classify_case_insensitive() {
        assert_eq!(FileRole::VolumeId, FileRole::classify("VOLUMEID.XML", false));
        assert_eq!(FileRole::VerCtrl, FileRole::classify("Ver_Ctrl.TXT", false));
        assert_eq!(FileRole::Volume, FileRole::classify("CT_0001.VOL", false));
        assert!(!FileRole::classify("font.ttf", false).is_medical());
    }
}
