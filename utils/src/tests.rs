use crate::region::Rect;
use crate::spirv;
use crate::PixelData;

#[test]
fn pixel_data_size_is_checked() {
    assert!(PixelData::new(vec![0; 16], 4, 2, 2).is_ok());
    assert!(PixelData::new(vec![0; 15], 4, 2, 2).is_err());
}

#[test]
fn solid_pixels() {
    let img = PixelData::solid(&[1, 2, 3, 4], 3, 2);
    assert_eq!(img.len(), 24);
    assert_eq!(&img[4..8], &[1, 2, 3, 4]);
    assert_eq!(img.checksum(), 6 * 10);
}

#[test]
fn rect_halves() {
    let full = Rect::new(0.0, 0.0, 800.0, 600.0);

    assert_eq!(full.horizontal_half(false), Rect::new(0.0, 0.0, 400.0, 600.0));
    assert_eq!(full.horizontal_half(true), Rect::new(400.0, 0.0, 400.0, 600.0));
    assert_eq!(full.vertical_half(true), Rect::new(0.0, 300.0, 800.0, 300.0));

    let quarter = full.horizontal_half(true).vertical_half(true);
    assert_eq!(quarter, Rect::new(400.0, 300.0, 400.0, 300.0));
    assert!(quarter.intersects(400.0, 300.0));
    assert!(!quarter.intersects(399.0, 300.0));
}

#[test]
fn spirv_words() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&spirv::SPIRV_MAGIC.to_le_bytes());
    bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
    assert_eq!(
        spirv::words_from_bytes(&bytes).unwrap(),
        vec![spirv::SPIRV_MAGIC, 0x0001_0000]
    );

    // big endian modules get swapped
    let mut be = Vec::new();
    be.extend_from_slice(&spirv::SPIRV_MAGIC.to_be_bytes());
    be.extend_from_slice(&7u32.to_be_bytes());
    assert_eq!(spirv::words_from_bytes(&be).unwrap(), vec![spirv::SPIRV_MAGIC, 7]);

    assert!(spirv::words_from_bytes(&[1, 2, 3]).is_err());
    assert!(spirv::words_from_bytes(&[0, 0, 0, 0]).is_err());
    assert!(spirv::words_from_bytes(&[]).is_err());
}

#[test]
fn read_spirv_reports_missing_file() {
    let err = spirv::read_spirv("/nonexistent/shader.spv").unwrap_err();
    assert!(format!("{:#}", err).contains("shader.spv"));
}

#[test]
fn read_spirv_from_disk() {
    let path = std::env::temp_dir().join(format!("utils-spirv-{}.spv", std::process::id()));
    std::fs::write(&path, spirv::SPIRV_MAGIC.to_le_bytes()).unwrap();

    let words = spirv::read_spirv(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(words, vec![spirv::SPIRV_MAGIC]);
}
