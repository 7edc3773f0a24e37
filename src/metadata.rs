//! Scan metadata from the `VolumeId.xml` and `ver_ctrl.txt` sidecars.
//!
//! Parsing never fails. Patient and acquisition fields are informational, so
//! anything missing or malformed falls back to the defaults below and the
//! voxel data can still be loaded.

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Field-of-view radius used when `dmmVolumeRadius` is missing or invalid.
pub const DEFAULT_VOLUME_RADIUS_MM: f64 = 44.0;
/// Voxel edge length used when `dmmVoxelSize` is missing, zero or invalid.
pub const DEFAULT_VOXEL_SIZE_MM: f64 = 0.125;

const PRIMARY_VOLUME_ELEMENT: &[u8] = b"V0";

static RE_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*"([^"]*)""#).expect("valid assignment regex")
});

// One pattern per technical parameter found in the Comment field.
static RE_KV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bkV\s*:\s*([-+]?\d+(?:\.\d+)?)").expect("valid kV regex"));
static RE_MA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bmA\s*:\s*([-+]?\d+(?:\.\d+)?)").expect("valid mA regex"));
static RE_SLICE_INTERVAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bSliceInterval\s*:\s*([-+]?\d+(?:\.\d+)?)\s*(?:mm)?")
        .expect("valid slice interval regex")
});
static RE_SLICE_THICKNESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bSliceThickness\s*:\s*([-+]?\d+(?:\.\d+)?)\s*(?:mm)?")
        .expect("valid slice thickness regex")
});
static RE_PIXEL_SPACING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bPixelSpacing\s*:\s*(\d+(?:\.\d+)?)(?:\s*\\\s*(\d+(?:\.\d+)?))?")
        .expect("valid pixel spacing regex")
});
static RE_PIXEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bPIXEL\s*:\s*(\d+(?:\.\d+)?)\s*(?:um)?").expect("valid pixel regex")
});

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Acquisition parameters embedded in the `Comment` field of `ver_ctrl.txt`.
///
/// `None` means the scanner did not report the value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TechnicalParams {
    pub tube_voltage_kv: Option<f64>,
    pub tube_current_ma: Option<f64>,
    pub slice_interval_mm: Option<f64>,
    pub slice_thickness_mm: Option<f64>,
    pub pixel_spacing_um: Option<f64>,
}

impl TechnicalParams {
    /// Extract every known token from a comment string. Each token is matched
    /// on its own, so an unknown or malformed token never affects the others.
    pub fn from_comment(comment: &str) -> Self {
        Self {
            tube_voltage_kv: capture_number(&RE_KV, comment),
            tube_current_ma: capture_number(&RE_MA, comment),
            slice_interval_mm: capture_number(&RE_SLICE_INTERVAL, comment),
            slice_thickness_mm: capture_number(&RE_SLICE_THICKNESS, comment),
            pixel_spacing_um: capture_number(&RE_PIXEL_SPACING, comment)
                .or_else(|| capture_number(&RE_PIXEL, comment)),
        }
    }

    pub fn tube_voltage_kv_or_zero(&self) -> f64 {
        self.tube_voltage_kv.unwrap_or_default()
    }

    pub fn tube_current_ma_or_zero(&self) -> f64 {
        self.tube_current_ma.unwrap_or_default()
    }

    pub fn slice_interval_mm_or_zero(&self) -> f64 {
        self.slice_interval_mm.unwrap_or_default()
    }

    pub fn slice_thickness_mm_or_zero(&self) -> f64 {
        self.slice_thickness_mm.unwrap_or_default()
    }

    pub fn pixel_spacing_um_or_zero(&self) -> f64 {
        self.pixel_spacing_um.unwrap_or_default()
    }
}

/// Scan geometry and patient record of a single scan.
#[derive(Clone, Debug, PartialEq)]
pub struct VolumeMetadata {
    pub volume_radius_mm: f64,
    pub voxel_size_mm: f64,
    pub volume_center: Point3,
    pub reconstruction_filter_name: String,

    pub patient_id: String,
    pub patient_name: String,
    pub birth_date: String,
    pub sex: String,
    pub scan_task_id: String,
    pub scan_date: String,

    pub technical: TechnicalParams,

    /// Every `key = "value"` pair found in `ver_ctrl.txt`, including the ones
    /// mapped onto the named fields above.
    pub fields: BTreeMap<String, String>,
}

impl Default for VolumeMetadata {
    fn default() -> Self {
        Self {
            volume_radius_mm: DEFAULT_VOLUME_RADIUS_MM,
            voxel_size_mm: DEFAULT_VOXEL_SIZE_MM,
            volume_center: Point3::default(),
            reconstruction_filter_name: String::new(),
            patient_id: String::new(),
            patient_name: String::new(),
            birth_date: String::new(),
            sex: String::new(),
            scan_task_id: String::new(),
            scan_date: String::new(),
            technical: TechnicalParams::default(),
            fields: BTreeMap::new(),
        }
    }
}

impl VolumeMetadata {
    /// Look up a raw `ver_ctrl.txt` field by its key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

/// Geometry elements read from one volume entry of `VolumeId.xml`.
#[derive(Debug, Default)]
struct Geometry {
    radius_mm: Option<f64>,
    voxel_size_mm: Option<f64>,
    center: Option<Point3>,
    filter_name: Option<String>,
}

impl Geometry {
    fn absorb(&mut self, element: &BytesStart<'_>) {
        match element.local_name().as_ref() {
            b"dmmVolumeRadius" => {
                if self.radius_mm.is_none() {
                    self.radius_mm = attribute(element, b"value").and_then(|v| parse_number(&v));
                }
            }
            b"dmmVoxelSize" => {
                if self.voxel_size_mm.is_none() {
                    self.voxel_size_mm =
                        attribute(element, b"value").and_then(|v| parse_number(&v));
                }
            }
            b"dmmVolumeCenter" => {
                if self.center.is_none() {
                    let axis = |name: &[u8]| {
                        attribute(element, name)
                            .and_then(|v| parse_number(&v))
                            .unwrap_or_default()
                    };
                    self.center = Some(Point3 {
                        x: axis(b"X"),
                        y: axis(b"Y"),
                        z: axis(b"Z"),
                    });
                }
            }
            b"strReconstructionFilterSetName" => {
                if self.filter_name.is_none() {
                    self.filter_name = attribute(element, b"value");
                }
            }
            _ => {}
        }
    }
}

pub struct MetadataParser;

impl MetadataParser {
    /// Parse both sidecars into a `VolumeMetadata`, falling back to defaults
    /// for every field that is missing or malformed.
    pub fn parse(volume_id_xml: &str, ver_ctrl: &str) -> VolumeMetadata {
        let geometry = Self::parse_volume_id(volume_id_xml);
        let fields = Self::parse_ver_ctrl(ver_ctrl);

        let voxel_size_mm = match geometry.voxel_size_mm {
            Some(size) if size > 0.0 => size,
            other => {
                warn!("Invalid or missing voxel size {other:?}, using {DEFAULT_VOXEL_SIZE_MM}mm");
                DEFAULT_VOXEL_SIZE_MM
            }
        };
        let volume_radius_mm = match geometry.radius_mm {
            Some(radius) if radius > 0.0 => radius,
            other => {
                warn!(
                    "Invalid or missing volume radius {other:?}, using {DEFAULT_VOLUME_RADIUS_MM}mm"
                );
                DEFAULT_VOLUME_RADIUS_MM
            }
        };

        let text = |key: &str| fields.get(key).cloned().unwrap_or_default();
        let technical = fields
            .get("Comment")
            .map(|comment| TechnicalParams::from_comment(comment))
            .unwrap_or_default();

        VolumeMetadata {
            volume_radius_mm,
            voxel_size_mm,
            volume_center: geometry.center.unwrap_or_default(),
            reconstruction_filter_name: geometry.filter_name.unwrap_or_default(),
            patient_id: text("PatientID"),
            patient_name: text("PatientName"),
            birth_date: text("BirthDay"),
            sex: text("Sex"),
            scan_task_id: text("CTTaskID"),
            scan_date: text("PhotoDate"),
            technical,
            fields,
        }
    }

    /// Read the geometry of the primary volume (`V0`). Documents without a
    /// `V0` element use the first occurrence of each element instead.
    fn parse_volume_id(xml: &str) -> Geometry {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut primary = Geometry::default();
        let mut fallback = Geometry::default();
        let mut primary_seen = false;
        let mut in_primary = false;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if e.local_name().as_ref() == PRIMARY_VOLUME_ELEMENT && !primary_seen {
                        primary_seen = true;
                        in_primary = true;
                    } else if in_primary {
                        primary.absorb(&e);
                    } else {
                        fallback.absorb(&e);
                    }
                }
                Ok(Event::Empty(e)) => {
                    if e.local_name().as_ref() == PRIMARY_VOLUME_ELEMENT {
                        primary_seen = true;
                    } else if in_primary {
                        primary.absorb(&e);
                    } else {
                        fallback.absorb(&e);
                    }
                }
                Ok(Event::End(e)) => {
                    if in_primary && e.local_name().as_ref() == PRIMARY_VOLUME_ELEMENT {
                        in_primary = false;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    warn!(
                        "Malformed VolumeId.xml at position {}: {e}",
                        reader.buffer_position()
                    );
                    break;
                }
                _ => {}
            }
        }

        if primary_seen {
            primary
        } else {
            debug!("No V0 element in VolumeId.xml, using first geometry elements");
            fallback
        }
    }

    /// Capture every `identifier = "value"` assignment. Later duplicates win.
    fn parse_ver_ctrl(text: &str) -> BTreeMap<String, String> {
        RE_ASSIGNMENT
            .captures_iter(text)
            .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()))
            .collect()
    }
}

/// Decode a sidecar file into text. A byte order mark selects UTF-16, UTF-8
/// is assumed otherwise; invalid sequences are replaced.
pub fn decode_text(bytes: &[u8]) -> String {
    let (text, encoding, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if had_errors {
        warn!("Sidecar is not valid {}, invalid bytes replaced", encoding.name());
    }
    text.into_owned()
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.trim().to_string())
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn capture_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)?.get(1).and_then(|m| parse_number(m.as_str()))
}
