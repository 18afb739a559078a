//! Synthetic image fixtures for tests in this and dependent crates.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

/// Encode an image buffer as PNG bytes.
pub fn png_bytes(image: DynamicImage) -> Vec<u8> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("PNG encoding into memory");
    buffer
}

/// Minimal JPEG with an APP1 EXIF block holding `DateTimeOriginal` and,
/// optionally, `SubSecTimeOriginal`. Little-endian TIFF layout:
/// header, IFD0 with an ExifOffset pointer, the Exif IFD, then the
/// 20-byte timestamp string.
pub fn jpeg_with_exif(date_time: &str, subsec: Option<&str>) -> Vec<u8> {
    assert_eq!(date_time.len(), 19);
    let exif_ifd_offset: u32 = 8 + 2 + 12 + 4;
    let exif_entries: u16 = if subsec.is_some() { 2 } else { 1 };
    let string_offset = exif_ifd_offset + 2 + 12 * exif_entries as u32 + 4;

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());

    // IFD0: ExifOffset (LONG)
    tiff.extend_from_slice(&1u16.to_le_bytes());
    tiff.extend_from_slice(&0x8769u16.to_le_bytes());
    tiff.extend_from_slice(&4u16.to_le_bytes());
    tiff.extend_from_slice(&1u32.to_le_bytes());
    tiff.extend_from_slice(&exif_ifd_offset.to_le_bytes());
    tiff.extend_from_slice(&0u32.to_le_bytes());

    // Exif IFD: DateTimeOriginal (ASCII, 20 bytes, out of line)
    tiff.extend_from_slice(&exif_entries.to_le_bytes());
    tiff.extend_from_slice(&0x9003u16.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    tiff.extend_from_slice(&20u32.to_le_bytes());
    tiff.extend_from_slice(&string_offset.to_le_bytes());
    if let Some(subsec) = subsec {
        // SubSecTimeOriginal (ASCII, inline, up to 3 chars + NUL)
        assert!(subsec.len() <= 3);
        let mut inline = [0u8; 4];
        inline[..subsec.len()].copy_from_slice(subsec.as_bytes());
        tiff.extend_from_slice(&0x9291u16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(subsec.len() as u32 + 1).to_le_bytes());
        tiff.extend_from_slice(&inline);
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());

    tiff.extend_from_slice(date_time.as_bytes());
    tiff.push(0);

    let segment_len = (2 + 6 + tiff.len()) as u16;
    let mut jpeg = vec![0xff, 0xd8, 0xff, 0xe1];
    jpeg.extend_from_slice(&segment_len.to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xff, 0xd9]);
    jpeg
}
