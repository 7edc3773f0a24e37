use std::fs;
use std::io::{Cursor, Write};

use cbct_volume::{
    ArchiveError, DimensionResolver, DimensionSource, ExtractedFile, RenderError, VolumeDimensions,
    VolumeLoader, VolumeLoaderError, WindowSettings,
};
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

const EDGE: usize = 16;

fn volume_id(radius: f64, voxel: f64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<VolumeId>
  <V0 strGuid="{{11111111-2222-3333-4444-555555555555}}">
    <dmmVolumeRadius value="{radius}"/>
    <dmmVoxelSize value="{voxel}"/>
    <dmmVolumeCenter X="0" Y="0" Z="12.5"/>
    <strReconstructionFilterSetName value="Standard"/>
  </V0>
</VolumeId>"#
    )
}

const VER_CTRL: &str = r#"PatientID = "P-1"
PatientName = "Test^Patient"
BirthDay = "19900101"
Sex = "M"
CTTaskID = "CT-99"
PhotoDate = "20250101"
Comment = "kV:70.0 mA:5.0 SliceInterval:0.125mm SliceThickness:0.125mm PIXEL:125um"
"#;

/// Voxel value at (x, y, z): a ramp across x, offset per slice.
fn voxel_value(x: usize, _y: usize, z: usize) -> u16 {
    (x * 200 + z * 10) as u16
}

fn vol_bytes(edge: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(edge * edge * edge * 2);
    for z in 0..edge {
        for y in 0..edge {
            for x in 0..edge {
                bytes.extend_from_slice(&voxel_value(x, y, z).to_le_bytes());
            }
        }
    }
    bytes
}

fn scan_zip() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    writer.add_directory("Viewer/", stored).unwrap();
    writer.start_file("Viewer/CTViewer.exe", stored).unwrap();
    writer.write_all(b"MZ\x90\x00program").unwrap();
    writer.start_file("Viewer/config.ini", stored).unwrap();
    writer.write_all(b"[viewer]\nlang=en\n").unwrap();
    writer.start_file("Data/CT_20250101.vol", deflated).unwrap();
    writer.write_all(&vol_bytes(EDGE)).unwrap();
    writer.start_file("Data/VolumeId.xml", stored).unwrap();
    writer.write_all(volume_id(1.0, 0.125).as_bytes()).unwrap();
    writer.start_file("Data/ver_ctrl.txt", stored).unwrap();
    writer.write_all(VER_CTRL.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

#[test]
fn test_load_zip_and_render() {
    let scan = VolumeLoader::default().load_from_archive(&scan_zip()).unwrap();

    assert_eq!(VolumeDimensions::cube(EDGE), scan.dimensions());
    assert_eq!(DimensionSource::Geometry, scan.resolution.source);
    assert_eq!("Test^Patient", scan.metadata.patient_name);
    assert_eq!("Standard", scan.metadata.reconstruction_filter_name);
    assert_eq!(12.5, scan.metadata.volume_center.z);
    assert_eq!(Some(125.0), scan.metadata.technical.pixel_spacing_um);
    assert_eq!(voxel_value(5, 3, 9), scan.volume.voxel(5, 3, 9));

    // Slice 0 spans 0..=3000 across x.
    let image = scan
        .volume
        .render_slice(0, &WindowSettings::new(1500, 3000))
        .unwrap();
    assert_eq!((EDGE as u32, EDGE as u32), image.dimensions());
    assert_eq!([0, 0, 0, 255], image.get_pixel(0, 7).0);
    assert_eq!([255, 255, 255, 255], image.get_pixel(15, 7).0);
    assert_eq!([17, 17, 17, 255], image.get_pixel(1, 0).0);
}

#[test]
fn test_load_folder() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("CT_20250101.vol"), vol_bytes(EDGE)).unwrap();
    fs::write(dir.path().join("VolumeId.xml"), volume_id(1.0, 0.125)).unwrap();
    fs::write(dir.path().join("ver_ctrl.txt"), VER_CTRL).unwrap();
    fs::write(dir.path().join("readme.txt"), "not part of the scan").unwrap();

    let scan = VolumeLoader::default().load_from_path(dir.path()).unwrap();
    assert_eq!(VolumeDimensions::cube(EDGE), scan.dimensions());
    assert_eq!("CT-99", scan.metadata.scan_task_id);
}

#[test]
fn test_load_folder_with_zip() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("upload.zip"), scan_zip()).unwrap();

    let scan = VolumeLoader::default().load_from_directory(dir.path()).unwrap();
    assert_eq!(VolumeDimensions::cube(EDGE), scan.dimensions());
}

#[test]
fn test_rar_upload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.rar");
    fs::write(&path, b"Rar!\x1a\x07\x01\x00rest").unwrap();

    let result = VolumeLoader::default().load_from_path(&path);
    assert!(matches!(
        result,
        Err(VolumeLoaderError::Archive(ArchiveError::UnsupportedArchiveFormat { .. }))
    ));
}

#[test]
fn test_folder_with_stray_rar_loads() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("CT_20250101.vol"), vol_bytes(EDGE)).unwrap();
    fs::write(dir.path().join("VolumeId.xml"), volume_id(1.0, 0.125)).unwrap();
    fs::write(dir.path().join("ver_ctrl.txt"), VER_CTRL).unwrap();
    fs::write(dir.path().join("viewer_fonts.rar"), b"Rar!\x1a\x07\x00fonts").unwrap();

    let scan = VolumeLoader::default().load_from_directory(dir.path()).unwrap();
    assert_eq!(VolumeDimensions::cube(EDGE), scan.dimensions());
}

#[test]
fn test_odd_length_volume_loads() {
    // 8 samples' worth minus one byte; the pad byte completes the last sample.
    let mut vol = vol_bytes(2);
    let last = vol.len() - 1;
    vol.truncate(last);

    let files = vec![
        ExtractedFile::new("VolumeId.xml", volume_id(0.125, 0.125).into_bytes()),
        ExtractedFile::new("ver_ctrl.txt", Vec::new()),
        ExtractedFile::new("tiny.vol", vol.clone()),
    ];
    let scan = VolumeLoader::default().load_from_files(files).unwrap();
    assert_eq!(VolumeDimensions::cube(2), scan.dimensions());
    let expected_last = u16::from(vol[last - 1]);
    assert_eq!(expected_last, scan.volume.voxel(1, 1, 1));
}

#[test]
fn test_full_size_scan_dimensions() {
    let bytes = 704 * 704 * 704 * 2;
    assert_eq!(
        VolumeDimensions::cube(704),
        DimensionResolver::resolve(bytes, 0.125, 44.0)
    );
}

#[test]
fn test_render_rejects_invalid_requests() {
    let scan = VolumeLoader::default().load_from_archive(&scan_zip()).unwrap();
    assert!(matches!(
        scan.volume.render_slice(0, &WindowSettings::new(1800, 0)),
        Err(RenderError::InvalidWindowWidth)
    ));
    assert!(matches!(
        scan.volume.render_slice(EDGE, &WindowSettings::default()),
        Err(RenderError::IndexOutOfRange { .. })
    ));
}

#[tokio::test]
async fn test_load_async() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.zip");
    fs::write(&path, scan_zip()).unwrap();

    let scan = VolumeLoader::default().load_from_path_async(&path).await.unwrap();
    assert_eq!(VolumeDimensions::cube(EDGE), scan.dimensions());
}
